// 📜 Journal Parser - plain-text directives back into transactions
//
// Line-anchored matching, not a full grammar. Three directive shapes are
// recognised: transactions (header + indented posting block), `pad` and
// `balance`. Everything else (open/close/note/include/comments) is skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::LedgerPaths;
use crate::error::{LedgerError, Result};
use crate::model::{
    date_timestamp, validate_postings, Posting, Transaction, TransactionType,
};

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+([*!])(?:\s+(.*?))?\s*$").unwrap());
static PAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+pad\s+(\S+)\s+(\S+)").unwrap());
static BALANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+balance\s+(\S+)\s+([-+]?[\d.]+)\s+(\S+)").unwrap()
});
static POSTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(\S+)\s+([-+]?[\d.]+)\s+(\S+)\s*$").unwrap());
static METADATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+[a-z][\w-]*:(\s|$)").unwrap());
static HEADER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)"|(\S+)"#).unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#([\w\-/.]+)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\^([\w\-/.]+)").unwrap());

/// Placeholder for an absent payee or narration
const PLACEHOLDER: &str = "-";

// ============================================================================
// DIRECTIVES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Transaction,
    Pad,
    Balance,
}

/// One parsed unit, already shaped as a Transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// 1-based line of the directive header
    pub line: usize,
    pub transaction: Transaction,
}

// ============================================================================
// STABLE IDENTITY
// ============================================================================

/// Polynomial rolling hash (h = h*31 + c over UTF-16 units, 32-bit
/// wraparound), absolute value rendered in base 36. Byte-identical input
/// always yields the same id; any whitespace change yields a different one.
pub fn stable_hash(content: &str) -> String {
    let mut hash: i32 = 0;
    for unit in content.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    to_base36((hash as i64).unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Account names with ':' replaced, for use inside ids
pub fn id_segment(account: &str) -> String {
    account.replace(':', "_")
}

pub fn pad_id(date: &str, target: &str) -> String {
    format!("pad_{}_{}", date, id_segment(target))
}

pub fn balance_id(date: &str, account: &str, amount: f64, currency: &str) -> String {
    format!("balance_{}_{}_{}_{}", date, id_segment(account), amount, currency)
}

// ============================================================================
// PARSER
// ============================================================================

/// Lazy iterator over the directives of one journal file.
///
/// Each item is either a directive or the error for one line range; an error
/// never stops the iteration.
pub struct Directives<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    pos: usize,
    tolerance: f64,
}

impl<'a> Directives<'a> {
    pub fn new(source: &'a str, text: &'a str, tolerance: f64) -> Self {
        Directives {
            source,
            lines: text.lines().collect(),
            pos: 0,
            tolerance,
        }
    }

    fn location(&self, line: usize) -> String {
        format!("{}:{}", self.source, line)
    }

    fn parse_pad(&self, caps: &regex::Captures, line: usize) -> Result<Directive> {
        let date = &caps[1];
        let target = &caps[2];
        let source = &caps[3];
        if date_timestamp(date).is_none() {
            return Err(LedgerError::parse(self.location(line), format!("invalid date {}", date)));
        }

        // amounts are filled in when the balance is resolved
        let transaction = Transaction::pad(
            pad_id(date, target),
            date,
            Posting::new(target, 0.0),
            Posting::new(source, 0.0),
            target,
        );
        Ok(Directive {
            kind: DirectiveKind::Pad,
            line,
            transaction,
        })
    }

    fn parse_balance(&self, caps: &regex::Captures, line: usize) -> Result<Directive> {
        let date = &caps[1];
        let account = &caps[2];
        let currency = &caps[4];
        if date_timestamp(date).is_none() {
            return Err(LedgerError::parse(self.location(line), format!("invalid date {}", date)));
        }
        let amount: f64 = caps[3].parse().map_err(|_| {
            LedgerError::parse(self.location(line), format!("invalid amount {}", &caps[3]))
        })?;

        let transaction = Transaction::balance_assertion(
            balance_id(date, account, amount, currency),
            date,
            account,
            amount,
            currency,
            account,
        );
        Ok(Directive {
            kind: DirectiveKind::Balance,
            line,
            transaction,
        })
    }

    /// Parse a header plus its posting block. Consumes the whole block even
    /// when it turns out to be invalid.
    fn parse_transaction(&mut self, caps: &regex::Captures, line: usize) -> Result<Directive> {
        let date = caps[1].to_string();
        let flag = caps[2].chars().next().unwrap_or('*');
        let rest = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let header = parse_header(rest);

        let mut postings = Vec::new();
        let mut raw_block = String::new();
        let mut bad_line: Option<usize> = None;

        while self.pos < self.lines.len() {
            let text = self.lines[self.pos];
            let indented = text.starts_with(' ') || text.starts_with('\t');
            if !indented || text.trim().is_empty() {
                break;
            }
            self.pos += 1;

            let trimmed = text.trim_start();
            if trimmed.starts_with(';') || METADATA.is_match(text) {
                continue;
            }
            match POSTING.captures(text) {
                Some(p) => match p[2].parse::<f64>() {
                    Ok(amount) => {
                        postings.push(Posting::new(&p[1], amount).with_currency(&p[3]));
                        raw_block.push_str(text);
                        raw_block.push('\n');
                    }
                    Err(_) => bad_line = bad_line.or(Some(self.pos)),
                },
                None => bad_line = bad_line.or(Some(self.pos)),
            }
        }

        let header = header.map_err(|msg| LedgerError::parse(self.location(line), msg))?;
        if let Some(bad) = bad_line {
            return Err(LedgerError::parse(
                self.location(bad),
                "unrecognised posting line",
            ));
        }
        let timestamp = date_timestamp(&date).ok_or_else(|| {
            LedgerError::parse(self.location(line), format!("invalid date {}", date))
        })?;
        if postings.is_empty() {
            return Err(LedgerError::parse(self.location(line), "transaction has no postings"));
        }
        validate_postings(&postings, self.tolerance)
            .map_err(|e| LedgerError::parse(self.location(line), e.to_string()))?;

        let id_content = format!(
            "{}{}{}{}{}{}{}",
            date,
            flag,
            header.payee.as_deref().unwrap_or(""),
            header.narration,
            header.tags.join(","),
            header.links.join(","),
            raw_block
        );
        let id = format!("bean_{}_{}", date, stable_hash(&id_content));

        let transaction = Transaction {
            id,
            kind: TransactionType::classify(&postings),
            date,
            flag,
            payee: header.payee,
            narration: header.narration,
            tags: header.tags,
            links: header.links,
            postings,
            timestamp,
        };
        Ok(Directive {
            kind: DirectiveKind::Transaction,
            line,
            transaction,
        })
    }
}

impl<'a> Iterator for Directives<'a> {
    type Item = Result<Directive>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.lines.len() {
            let text = self.lines[self.pos];
            let line = self.pos + 1;
            self.pos += 1;

            if let Some(caps) = BALANCE.captures(text) {
                return Some(self.parse_balance(&caps, line));
            }
            if let Some(caps) = PAD.captures(text) {
                return Some(self.parse_pad(&caps, line));
            }
            if let Some(caps) = HEADER.captures(text) {
                return Some(self.parse_transaction(&caps, line));
            }
        }
        None
    }
}

// ============================================================================
// HEADER
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct Header {
    payee: Option<String>,
    narration: String,
    tags: Vec<String>,
    links: Vec<String>,
}

/// Everything after the flag: one string is a narration, two are payee
/// then narration, more is an error. Once a #tag or ^link appears, the
/// rest is metadata.
fn parse_header(rest: &str) -> std::result::Result<Header, String> {
    let mut strings: Vec<String> = Vec::new();
    let mut header = Header::default();
    let mut in_metadata = false;

    for caps in HEADER_TOKEN.captures_iter(rest) {
        if let Some(quoted) = caps.get(1) {
            if !in_metadata {
                strings.push(quoted.as_str().to_string());
            }
            continue;
        }
        let token = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if token.starts_with(';') {
            break;
        }
        if let Some(tag) = TAG.captures(token) {
            in_metadata = true;
            header.tags.push(tag[1].to_string());
        } else if let Some(link) = LINK.captures(token) {
            in_metadata = true;
            header.links.push(link[1].to_string());
        } else if !in_metadata {
            strings.push(token.to_string());
        }
    }

    match strings.len() {
        0 => {}
        1 => header.narration = strings.remove(0),
        2 => {
            let payee = strings.remove(0);
            header.narration = strings.remove(0);
            if !payee.is_empty() && payee != PLACEHOLDER {
                header.payee = Some(payee);
            }
        }
        n => return Err(format!("expected payee and narration, found {} strings", n)),
    }
    if header.narration == PLACEHOLDER {
        header.narration.clear();
    }
    Ok(header)
}

// ============================================================================
// FILE AND DIRECTORY ENTRY POINTS
// ============================================================================

/// Eagerly parsed file: the good directives plus one error per bad range
#[derive(Debug, Default)]
pub struct JournalParse {
    pub directives: Vec<Directive>,
    pub errors: Vec<LedgerError>,
}

pub fn parse_journal(source: &str, text: &str, tolerance: f64) -> JournalParse {
    let mut parsed = JournalParse::default();
    for item in Directives::new(source, text, tolerance) {
        match item {
            Ok(directive) => parsed.directives.push(directive),
            Err(err) => parsed.errors.push(err),
        }
    }
    parsed
}

/// Parse every `date/{year}/*.bean` file. A file that cannot be read, or a
/// directive that cannot be parsed, is logged and skipped.
pub fn load_journal(paths: &LedgerPaths, tolerance: f64) -> Result<Vec<Transaction>> {
    let mut transactions = Vec::new();

    for file in month_files(paths)? {
        let source = file
            .strip_prefix(paths.journal_dir())
            .unwrap_or(file.as_path())
            .display()
            .to_string();

        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(err) => {
                warn!(file = %source, error = %err, "skipping unreadable journal file");
                continue;
            }
        };

        let parsed = parse_journal(&source, &text, tolerance);
        for err in &parsed.errors {
            warn!(error = %err, "skipping directive");
        }
        debug!(
            file = %source,
            directives = parsed.directives.len(),
            skipped = parsed.errors.len(),
            "parsed journal file"
        );
        transactions.extend(parsed.directives.into_iter().map(|d| d.transaction));
    }

    Ok(transactions)
}

/// Month files under numeric year directories, in path order
pub fn month_files(paths: &LedgerPaths) -> Result<Vec<PathBuf>> {
    let journal_dir = paths.journal_dir();
    if !journal_dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&journal_dir)? {
        let year_dir = entry?.path();
        if !year_dir.is_dir() || !is_year_dir(&year_dir) {
            continue;
        }
        for entry in fs::read_dir(&year_dir)? {
            let file = entry?.path();
            if file.is_file() && file.extension().map_or(false, |ext| ext == "bean") {
                files.push(file);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_year_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}
