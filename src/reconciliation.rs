// 🔄 Sync Engine - reconcile the store with the journal files
//
// Store rows and text directives live in two id spaces: store rows carry a
// time+random id, text directives a content-derived id. Every store row is
// therefore also known by its projection key, the id its own rendered text
// parses back to. A row and a directive are the same entry when the
// directive's id equals either key.
//
//   to_add    = text directives matching no store key
//   to_delete = store rows with neither key present in the text

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::LedgerPaths;
use crate::error::Result;
use crate::model::Transaction;
use crate::parser::{load_journal, parse_journal};
use crate::projection::{render_transaction, write_projection};
use crate::store::TransactionStore;

// ============================================================================
// SYNC PLAN
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub to_add: Vec<Transaction>,
    pub to_delete: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_delete.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub added: usize,
    pub deleted: usize,
    pub store_count: usize,
    pub text_count: usize,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.deleted == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Sync: {} store rows, {} journal entries, +{} added, -{} deleted",
            self.store_count, self.text_count, self.added, self.deleted
        )
    }
}

// ============================================================================
// SYNC ENGINE
// ============================================================================

pub struct SyncEngine {
    /// Zero-sum tolerance used when re-parsing
    pub tolerance: f64,
}

impl SyncEngine {
    pub fn new(tolerance: f64) -> Self {
        SyncEngine { tolerance }
    }

    /// Id that `tx` gets once written to the journal and parsed back, or
    /// None when its rendering does not parse
    pub fn projection_key(&self, tx: &Transaction) -> Option<String> {
        let text = render_transaction(tx);
        parse_journal("projection", &text, self.tolerance)
            .directives
            .into_iter()
            .next()
            .map(|d| d.transaction.id)
    }

    /// Diff store rows against parsed journal entries
    pub fn plan(&self, store_rows: &[Transaction], text_rows: Vec<Transaction>) -> SyncPlan {
        let mut store_keys: HashSet<String> = HashSet::new();
        let keyed: Vec<(&Transaction, Option<String>)> = store_rows
            .iter()
            .map(|tx| {
                let key = self.projection_key(tx);
                store_keys.insert(tx.id.clone());
                if let Some(key) = &key {
                    store_keys.insert(key.clone());
                }
                (tx, key)
            })
            .collect();

        let text_ids: HashSet<String> = text_rows.iter().map(|tx| tx.id.clone()).collect();

        let to_delete = keyed
            .into_iter()
            .filter(|(tx, key)| {
                !text_ids.contains(&tx.id) && key.as_ref().map_or(true, |k| !text_ids.contains(k))
            })
            .map(|(tx, _)| tx.id.clone())
            .collect();

        // identical blocks in the text parse to one id; keep the first
        let mut seen = HashSet::new();
        let to_add = text_rows
            .into_iter()
            .filter(|tx| !store_keys.contains(&tx.id) && seen.insert(tx.id.clone()))
            .collect();

        SyncPlan { to_add, to_delete }
    }

    /// Full sync pass: diff, apply atomically, regenerate the journal
    pub fn run(&self, store: &mut dyn TransactionStore, paths: &LedgerPaths) -> Result<SyncReport> {
        let store_rows = store.all()?;
        let text_rows = load_journal(paths, self.tolerance)?;
        let store_count = store_rows.len();
        let text_count = text_rows.len();

        let plan = self.plan(&store_rows, text_rows);
        let report = SyncReport {
            added: plan.to_add.len(),
            deleted: plan.to_delete.len(),
            store_count,
            text_count,
            synced_at: Utc::now(),
        };

        if plan.is_empty() {
            debug!(store_count, text_count, "sync found no differences");
        } else {
            store.apply(&plan.to_delete, &plan.to_add)?;
            info!(added = report.added, deleted = report.deleted, "synced store with journal");
        }

        write_projection(paths, &store.snapshot()?)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::model::{Posting, TransactionType};
    use std::fs;

    fn coffee(id: &str, date: &str, timestamp: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            date: date.to_string(),
            flag: '*',
            payee: Some("Cafe".to_string()),
            narration: "Coffee".to_string(),
            tags: vec![],
            links: vec![],
            kind: TransactionType::Expense,
            postings: vec![Posting::new("Expenses:Food", 4.5), Posting::new("Assets:Cash", -4.5)],
            timestamp,
        }
    }

    fn setup() -> (tempfile::TempDir, LedgerPaths, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let paths = LedgerPaths::new(dir.path());
        paths.ensure_layout("CNY").unwrap();
        (dir, paths, SqliteStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_projection_key_is_stable() {
        let engine = SyncEngine::new(0.001);
        let tx = coffee("1710000000000abcde", "2024-03-09", 1_710_000_000_000);
        let key = engine.projection_key(&tx).unwrap();
        assert!(key.starts_with("bean_2024-03-09_"));
        assert_eq!(engine.projection_key(&coffee("other", "2024-03-09", 5)), Some(key));
        println!("✅ Projection key depends on content, not store id");
    }

    #[test]
    fn test_plan_matches_by_id_or_projection_key() {
        let engine = SyncEngine::new(0.001);
        let stored = coffee("1710000000000abcde", "2024-03-09", 1);
        let reparsed = Transaction {
            id: engine.projection_key(&stored).unwrap(),
            ..stored.clone()
        };
        let gone = coffee("1710000000001fghij", "2024-04-01", 2);
        let fresh = Transaction {
            id: "bean_2024-05-01_xyz".to_string(),
            ..coffee("x", "2024-05-01", 3)
        };

        let plan = engine.plan(
            &[stored, gone],
            vec![reparsed, fresh.clone(), fresh.clone()],
        );
        assert_eq!(plan.to_delete, vec!["1710000000001fghij".to_string()]);
        assert_eq!(plan.to_add, vec![fresh]);
        println!("✅ Plan keeps projected rows and adds only new text");
    }

    #[test]
    fn test_sync_twice_is_idempotent() {
        let (_dir, paths, mut store) = setup();
        store.insert(&coffee("1710000000000abcde", "2024-03-09", 1_710_000_000_000)).unwrap();
        write_projection(&paths, &store.all().unwrap()).unwrap();
        fs::write(
            paths.month_file("2024", "02"),
            "2024-02-01 * \"Salary\"\n  Assets:Bank   1000 CNY\n  Income:Job   -1000 CNY\n\n2024-02-02 balance Assets:Bank 1000 CNY\n",
        )
        .unwrap();

        let engine = SyncEngine::new(0.001);
        let first = engine.run(&mut store, &paths).unwrap();
        assert_eq!(first.added, 2);
        assert_eq!(first.deleted, 0);
        assert_eq!(store.all().unwrap().len(), 3);

        let second = engine.run(&mut store, &paths).unwrap();
        assert!(second.is_noop(), "{}", second.summary());
        assert!(store.contains("1710000000000abcde").unwrap());

        let index = fs::read_to_string(paths.journal_index()).unwrap();
        assert!(index.contains("include \"2024/2024-02.bean\""));
        assert!(index.contains("include \"2024/2024-03.bean\""));
        println!("✅ Second sync changes nothing");
    }

    #[test]
    fn test_removed_text_deletes_store_rows() {
        let (_dir, paths, mut store) = setup();
        store.insert(&coffee("1710000000000abcde", "2024-03-09", 1)).unwrap();
        write_projection(&paths, &store.all().unwrap()).unwrap();
        let engine = SyncEngine::new(0.001);
        assert!(engine.run(&mut store, &paths).unwrap().is_noop());

        // user deletes the month file by hand
        fs::remove_file(paths.month_file("2024", "03")).unwrap();
        let report = engine.run(&mut store, &paths).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.all().unwrap().is_empty());
        println!("✅ Entries removed from the journal leave the store");
    }

    #[test]
    fn test_malformed_text_is_skipped() {
        let (_dir, paths, mut store) = setup();
        fs::create_dir_all(paths.journal_dir().join("2024")).unwrap();
        fs::write(
            paths.month_file("2024", "01"),
            "2024-01-03 * \"Broken\"\n  Assets:Cash   10 CNY\n  Expenses:Food   5 CNY\n\n2024-01-04 * \"Fine\"\n  Assets:Cash   -5 CNY\n  Expenses:Food   5 CNY\n",
        )
        .unwrap();

        let report = SyncEngine::new(0.001).run(&mut store, &paths).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(store.all().unwrap()[0].narration, "Fine");
        println!("✅ Unbalanced directive skipped, the rest imported");
    }
}
