// 🖋️ Journal Projection - store state rendered back to plain text
//
// The month files are derived output: regenerated wholesale from the store
// after every mutation. Anything rendered here must parse back through
// `parser` to the same transaction shape.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::LedgerPaths;
use crate::error::{LedgerError, Result};
use crate::model::Transaction;
use crate::parser::month_files;

const POSTING_INDENT: &str = "  ";
const AMOUNT_GAP: &str = "                  ";
const INDEX_HEADER: &str = "; transactions\n\n";

// ============================================================================
// RENDERING
// ============================================================================

/// Journal strings cannot carry double quotes or line breaks
pub fn sanitize(value: &str) -> String {
    value.replace('"', "'").replace(&['\n', '\r'][..], " ")
}

fn render_header(tx: &Transaction) -> String {
    let mut header = format!("{} {}", tx.date, tx.flag);
    if let Some(payee) = &tx.payee {
        header.push_str(&format!(" \"{}\"", sanitize(payee)));
    }
    header.push_str(&format!(" \"{}\"", sanitize(&tx.narration)));
    for tag in &tx.tags {
        header.push_str(&format!(" #{}", tag));
    }
    for link in &tx.links {
        header.push_str(&format!(" ^{}", link));
    }
    header
}

/// One directive block, newline-terminated
pub fn render_transaction(tx: &Transaction) -> String {
    if tx.is_balance_assertion() {
        if let [posting] = tx.postings.as_slice() {
            return format!(
                "{} balance {} {} {}\n",
                tx.date, posting.account, posting.amount, posting.currency
            );
        }
    }
    if tx.is_pad() {
        if let [target, source] = tx.postings.as_slice() {
            return format!("{} pad {} {}\n", tx.date, target.account, source.account);
        }
    }

    let mut block = render_header(tx);
    block.push('\n');
    for posting in &tx.postings {
        block.push_str(&format!(
            "{}{}{}{} {}\n",
            POSTING_INDENT, posting.account, AMOUNT_GAP, posting.amount, posting.currency
        ));
    }
    block
}

/// Blocks in timestamp order, separated by blank lines. Same-time blocks
/// keep the order they are given in.
pub fn render_month(transactions: &[&Transaction]) -> String {
    let mut ordered = transactions.to_vec();
    ordered.sort_by_key(|tx| tx.timestamp);
    ordered
        .iter()
        .map(|tx| render_transaction(tx))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_index(months: &BTreeSet<(String, String)>) -> String {
    let mut index = INDEX_HEADER.to_string();
    for (year, month) in months {
        index.push_str(&format!("include \"{}/{}-{}.bean\"\n", year, year, month));
    }
    index
}

// ============================================================================
// WRITING
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProjectionReport {
    pub months_written: usize,
    pub months_unchanged: usize,
    pub stale_removed: usize,
}

/// Write only when the content differs
fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if fs::read_to_string(path).map_or(false, |current| current == content) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(true)
}

/// Regenerate every month file and the index, and drop month files that no
/// longer hold any transaction. `transactions` come in insertion order.
pub fn write_projection(paths: &LedgerPaths, transactions: &[Transaction]) -> Result<ProjectionReport> {
    write_all(paths, transactions).map_err(|err| {
        warn!(error = %err, "journal regeneration failed");
        LedgerError::Projection(err.to_string())
    })
}

fn write_all(paths: &LedgerPaths, transactions: &[Transaction]) -> Result<ProjectionReport> {
    let mut by_month: BTreeMap<(String, String), Vec<&Transaction>> = BTreeMap::new();
    for tx in transactions {
        match tx.year_month() {
            Some((year, month)) => by_month
                .entry((year.to_string(), month.to_string()))
                .or_default()
                .push(tx),
            None => warn!(id = %tx.id, date = %tx.date, "transaction without a usable date left out of journal"),
        }
    }

    let mut report = ProjectionReport::default();
    let mut written: BTreeSet<PathBuf> = BTreeSet::new();
    for ((year, month), txs) in &by_month {
        let path = paths.month_file(year, month);
        if write_if_changed(&path, &render_month(txs))? {
            report.months_written += 1;
        } else {
            report.months_unchanged += 1;
        }
        written.insert(path);
    }

    let months: BTreeSet<(String, String)> = by_month.keys().cloned().collect();
    write_if_changed(&paths.journal_index(), &render_index(&months))?;

    for file in month_files(paths)? {
        if written.contains(&file) {
            continue;
        }
        fs::remove_file(&file)?;
        report.stale_removed += 1;
        debug!(file = %file.display(), "removed stale month file");
        if let Some(year_dir) = file.parent() {
            // only succeeds once the directory is empty
            let _ = fs::remove_dir(year_dir);
        }
    }

    info!(
        transactions = transactions.len(),
        months = by_month.len(),
        written = report.months_written,
        stale = report.stale_removed,
        "regenerated journal"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Posting, TransactionType};
    use crate::parser::{parse_journal, DirectiveKind};

    fn dinner(id: &str, date: &str, timestamp: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            date: date.to_string(),
            flag: '*',
            payee: Some("Noodle \"House\"".to_string()),
            narration: "Dinner\nwith friends".to_string(),
            tags: vec!["food".to_string()],
            links: vec!["trip-1".to_string()],
            kind: TransactionType::Expense,
            postings: vec![
                Posting::new("Expenses:Food", 42.5),
                Posting::new("Assets:Cash", -42.5),
            ],
            timestamp,
        }
    }

    #[test]
    fn test_render_transaction_block() {
        let text = render_transaction(&dinner("t1", "2024-03-05", 1));
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "2024-03-05 * \"Noodle 'House'\" \"Dinner with friends\" #food ^trip-1"
        );
        assert_eq!(lines.next().unwrap(), "  Expenses:Food                  42.5 CNY");
        assert_eq!(lines.next().unwrap(), "  Assets:Cash                  -42.5 CNY");
        assert!(lines.next().is_none());
        println!("✅ Transaction renders as header plus postings");
    }

    #[test]
    fn test_render_directives() {
        let assertion = Transaction::balance_assertion(
            "b".to_string(),
            "2024-03-02",
            "Assets:Bank:Checking",
            500.0,
            "CNY",
            "Checking",
        );
        assert_eq!(
            render_transaction(&assertion),
            "2024-03-02 balance Assets:Bank:Checking 500 CNY\n"
        );

        let pad = Transaction::pad(
            "p".to_string(),
            "2024-03-02",
            Posting::new("Assets:Bank:Checking", 50.0),
            Posting::new("Equity:Opening", -50.0),
            "Checking",
        );
        assert_eq!(
            render_transaction(&pad),
            "2024-03-02 pad Assets:Bank:Checking Equity:Opening\n"
        );
        println!("✅ Balance and pad render as one-line directives");
    }

    #[test]
    fn test_rendered_month_parses_back() {
        let payee_only = Transaction {
            payee: Some("Landlord".to_string()),
            narration: String::new(),
            ..dinner("t2", "2024-03-01", 1)
        };
        let bare = Transaction {
            payee: None,
            tags: vec![],
            links: vec![],
            ..dinner("t3", "2024-03-09", 3)
        };
        let first = dinner("t1", "2024-03-05", 2);
        let text = render_month(&[&first, &payee_only, &bare]);

        let parsed = parse_journal("2024-03.bean", &text, 0.001);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.directives.len(), 3);
        assert!(parsed.directives.iter().all(|d| d.kind == DirectiveKind::Transaction));

        let landlord = &parsed.directives[0].transaction;
        assert_eq!(landlord.payee.as_deref(), Some("Landlord"));
        assert_eq!(landlord.narration, "");

        let noodles = &parsed.directives[1].transaction;
        assert_eq!(noodles.narration, "Dinner with friends");
        assert_eq!(noodles.postings, first.postings);
        assert_eq!(noodles.tags, vec!["food".to_string()]);
        assert_eq!(parsed.directives[2].transaction.payee, None);
        println!("✅ Rendered month re-parses to the same transactions");
    }

    #[test]
    fn test_same_time_blocks_keep_given_order() {
        let later = Transaction {
            narration: "Second".to_string(),
            ..dinner("a", "2024-03-05", 7)
        };
        let earlier = Transaction {
            narration: "First".to_string(),
            ..dinner("z", "2024-03-05", 7)
        };
        let text = render_month(&[&earlier, &later]);
        assert!(text.find("First").unwrap() < text.find("Second").unwrap());
    }

    #[test]
    fn test_write_projection_removes_stale_months() {
        let dir = tempfile::tempdir().unwrap();
        let paths = LedgerPaths::new(dir.path());
        paths.ensure_layout("CNY").unwrap();

        let jan = dinner("a", "2023-01-10", 1);
        let mar = dinner("b", "2024-03-05", 2);
        let report = write_projection(&paths, &[jan, mar.clone()]).unwrap();
        assert_eq!(report.months_written, 2);
        assert!(paths.month_file("2023", "01").exists());
        assert_eq!(
            fs::read_to_string(paths.journal_index()).unwrap(),
            "; transactions\n\ninclude \"2023/2023-01.bean\"\ninclude \"2024/2024-03.bean\"\n"
        );

        let report = write_projection(&paths, &[mar]).unwrap();
        assert_eq!(report.stale_removed, 1);
        assert_eq!(report.months_unchanged, 1);
        assert!(!paths.month_file("2023", "01").exists());
        assert!(!paths.journal_dir().join("2023").exists());
        assert!(!fs::read_to_string(paths.journal_index()).unwrap().contains("2023"));
        println!("✅ Regeneration drops months with no transactions");
    }
}
