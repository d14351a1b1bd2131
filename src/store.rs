// 🗄️ Transaction Store - one interface, two storage tiers
//
// SQLite is the primary tier; a JSON snapshot is the durable fallback.
// TieredStore routes every call to the primary while it is healthy and
// to the fallback otherwise. Queries on the fallback are linear scans that
// must return exactly what the indexed SQL path returns.

use std::slice;
use tracing::{info, warn};

use crate::balance::{account_postings, AccountPosting};
use crate::error::{LedgerError, Result};
use crate::model::Transaction;

// ============================================================================
// QUERY
// ============================================================================

/// Window over transaction timestamps (both ends inclusive) plus row cap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<usize>,
}

impl TransactionQuery {
    pub fn new(start: Option<i64>, end: Option<i64>, limit: Option<usize>) -> Self {
        TransactionQuery {
            start,
            end,
            // zero means "no cap"
            limit: limit.filter(|l| *l > 0),
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.start.map_or(true, |s| tx.timestamp >= s) && self.end.map_or(true, |e| tx.timestamp <= e)
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait TransactionStore: Send {
    fn name(&self) -> &'static str;

    /// Cheap probe used to decide routing
    fn health_check(&mut self) -> Result<()>;

    /// Delete `delete_ids` then insert `insert`, as one atomic unit.
    /// Returns how many transactions were deleted.
    fn apply(&mut self, delete_ids: &[String], insert: &[Transaction]) -> Result<usize>;

    /// Replace the whole content, as one atomic unit. Rows keep the order
    /// of `transactions` as their insertion order.
    fn replace_all(&mut self, transactions: &[Transaction]) -> Result<()>;

    /// Every transaction in insertion order
    fn snapshot(&mut self) -> Result<Vec<Transaction>>;

    /// Newest first (timestamp, then id, descending)
    fn query(&mut self, query: &TransactionQuery) -> Result<Vec<Transaction>>;

    /// Transactions with a posting against `account`, newest first
    fn query_by_account(&mut self, account: &str, limit: Option<usize>) -> Result<Vec<Transaction>>;

    /// Postings against `account`, ordered for the balance engine
    fn account_postings(&mut self, account: &str) -> Result<Vec<AccountPosting>>;

    fn contains(&mut self, id: &str) -> Result<bool>;

    /// Any posting references `account`
    fn is_referenced(&mut self, account: &str) -> Result<bool>;

    fn all(&mut self) -> Result<Vec<Transaction>> {
        self.query(&TransactionQuery::default())
    }

    fn insert(&mut self, transaction: &Transaction) -> Result<()> {
        self.apply(&[], slice::from_ref(transaction)).map(|_| ())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        Ok(self.apply(&[id.to_string()], &[])? > 0)
    }
}

// ============================================================================
// LINEAR SCAN (fallback semantics)
// ============================================================================

fn newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

fn cap(mut transactions: Vec<Transaction>, limit: Option<usize>) -> Vec<Transaction> {
    if let Some(limit) = limit.filter(|l| *l > 0) {
        transactions.truncate(limit);
    }
    transactions
}

pub fn scan_query(transactions: &[Transaction], query: &TransactionQuery) -> Vec<Transaction> {
    let mut found: Vec<Transaction> = transactions
        .iter()
        .filter(|tx| query.matches(tx))
        .cloned()
        .collect();
    newest_first(&mut found);
    cap(found, query.limit)
}

pub fn scan_by_account(
    transactions: &[Transaction],
    account: &str,
    limit: Option<usize>,
) -> Vec<Transaction> {
    let mut found: Vec<Transaction> = transactions
        .iter()
        .filter(|tx| tx.touches(account))
        .cloned()
        .collect();
    newest_first(&mut found);
    cap(found, limit)
}

/// `transactions` must be in insertion order
pub fn scan_account_postings(transactions: &[Transaction], account: &str) -> Vec<AccountPosting> {
    account_postings(account, transactions)
}

// ============================================================================
// TIERED STORE
// ============================================================================

pub struct TieredStore {
    primary: Box<dyn TransactionStore>,
    fallback: Box<dyn TransactionStore>,
    primary_healthy: bool,
    /// Writes landed in the fallback that the primary has not seen
    fallback_dirty: bool,
    /// The last mirror failed, so the fallback lags the primary
    snapshot_stale: bool,
}

impl TieredStore {
    pub fn new(primary: Box<dyn TransactionStore>, fallback: Box<dyn TransactionStore>) -> Self {
        let mut store = TieredStore {
            primary,
            fallback,
            primary_healthy: true,
            fallback_dirty: false,
            snapshot_stale: false,
        };
        if store.primary.health_check().is_err() {
            warn!(primary = store.primary.name(), "primary store unavailable at startup");
            store.primary_healthy = false;
        } else {
            store.mirror();
        }
        store
    }

    pub fn primary_healthy(&self) -> bool {
        self.primary_healthy
    }

    pub fn snapshot_stale(&self) -> bool {
        self.snapshot_stale
    }

    /// Copy the primary's content into the fallback snapshot
    fn mirror(&mut self) {
        let result = self
            .primary
            .snapshot()
            .and_then(|snapshot| self.fallback.replace_all(&snapshot));
        match result {
            Ok(()) => self.snapshot_stale = false,
            Err(err) => {
                warn!(fallback = self.fallback.name(), error = %err, "could not refresh fallback snapshot");
                self.snapshot_stale = true;
            }
        }
    }

    /// True when the call should go to the primary. An unhealthy primary is
    /// probed; once it answers it is re-seeded from the fallback, but only
    /// when writes went there in the meantime.
    fn route(&mut self) -> bool {
        if self.primary_healthy {
            return true;
        }
        if self.primary.health_check().is_err() {
            return false;
        }

        if self.fallback_dirty {
            let snapshot = match self.fallback.snapshot() {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(error = %err, "primary is back but the fallback snapshot is unreadable");
                    return false;
                }
            };
            if let Err(err) = self.primary.replace_all(&snapshot) {
                warn!(error = %err, "could not re-seed primary store");
                return false;
            }
            info!(
                primary = self.primary.name(),
                transactions = snapshot.len(),
                "primary store recovered, re-seeded from fallback"
            );
            self.fallback_dirty = false;
        } else {
            info!(primary = self.primary.name(), "primary store recovered");
        }

        self.primary_healthy = true;
        if self.snapshot_stale {
            self.mirror();
        }
        true
    }

    /// The fallback may only serve while it holds everything the primary
    /// committed
    fn fallback_usable(&self, cause: Option<LedgerError>) -> Result<()> {
        if !self.snapshot_stale {
            return Ok(());
        }
        Err(cause.unwrap_or_else(|| {
            LedgerError::Persistence("primary store unavailable and fallback snapshot is out of date".to_string())
        }))
    }

    fn read<T, F>(&mut self, operation: &str, op: F) -> Result<T>
    where
        F: Fn(&mut dyn TransactionStore) -> Result<T>,
    {
        let mut cause = None;
        if self.route() {
            match op(self.primary.as_mut()) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(operation, error = %err, "primary store read failed, scanning fallback");
                    self.primary_healthy = false;
                    cause = Some(err);
                }
            }
        }
        self.fallback_usable(cause)?;
        op(self.fallback.as_mut())
    }

    fn write<T, F>(&mut self, operation: &str, op: F) -> Result<T>
    where
        F: Fn(&mut dyn TransactionStore) -> Result<T>,
    {
        let mut cause = None;
        if self.route() {
            match op(self.primary.as_mut()) {
                Ok(value) => {
                    self.mirror();
                    return Ok(value);
                }
                Err(err) => {
                    // the primary rolled back; retry against the snapshot
                    warn!(operation, error = %err, "primary store write failed, writing to fallback");
                    self.primary_healthy = false;
                    cause = Some(err);
                }
            }
        }
        self.fallback_usable(cause)?;
        let value = op(self.fallback.as_mut())?;
        self.fallback_dirty = true;
        Ok(value)
    }
}

impl TransactionStore for TieredStore {
    fn name(&self) -> &'static str {
        "tiered"
    }

    fn health_check(&mut self) -> Result<()> {
        if self.route() {
            Ok(())
        } else {
            self.fallback.health_check()
        }
    }

    fn apply(&mut self, delete_ids: &[String], insert: &[Transaction]) -> Result<usize> {
        self.write("apply", |store| store.apply(delete_ids, insert))
    }

    fn replace_all(&mut self, transactions: &[Transaction]) -> Result<()> {
        self.write("replace_all", |store| store.replace_all(transactions))
    }

    fn snapshot(&mut self) -> Result<Vec<Transaction>> {
        self.read("snapshot", |store| store.snapshot())
    }

    fn query(&mut self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        self.read("query", |store| store.query(query))
    }

    fn query_by_account(&mut self, account: &str, limit: Option<usize>) -> Result<Vec<Transaction>> {
        self.read("query_by_account", |store| store.query_by_account(account, limit))
    }

    fn account_postings(&mut self, account: &str) -> Result<Vec<AccountPosting>> {
        self.read("account_postings", |store| store.account_postings(account))
    }

    fn contains(&mut self, id: &str) -> Result<bool> {
        self.read("contains", |store| store.contains(id))
    }

    fn is_referenced(&mut self, account: &str) -> Result<bool> {
        self.read("is_referenced", |store| store.is_referenced(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::error::LedgerError;
    use crate::fallback::JsonStore;
    use crate::model::{Posting, TransactionType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn tx(id: &str, timestamp: i64, from: &str, to: &str, amount: f64) -> Transaction {
        Transaction {
            id: id.to_string(),
            date: "2024-01-01".to_string(),
            flag: '*',
            payee: None,
            narration: id.to_string(),
            tags: vec![],
            links: vec![],
            kind: TransactionType::Transfer,
            postings: vec![Posting::new(to, amount), Posting::new(from, -amount)],
            timestamp,
        }
    }

    /// SQLite store that can be switched off from the test
    struct Flaky {
        inner: SqliteStore,
        down: Arc<AtomicBool>,
    }

    impl Flaky {
        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(LedgerError::Persistence("database is locked".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl TransactionStore for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn health_check(&mut self) -> Result<()> {
            self.check()
        }
        fn apply(&mut self, d: &[String], i: &[Transaction]) -> Result<usize> {
            self.check()?;
            self.inner.apply(d, i)
        }
        fn replace_all(&mut self, t: &[Transaction]) -> Result<()> {
            self.check()?;
            self.inner.replace_all(t)
        }
        fn snapshot(&mut self) -> Result<Vec<Transaction>> {
            self.check()?;
            self.inner.snapshot()
        }
        fn query(&mut self, q: &TransactionQuery) -> Result<Vec<Transaction>> {
            self.check()?;
            self.inner.query(q)
        }
        fn query_by_account(&mut self, a: &str, l: Option<usize>) -> Result<Vec<Transaction>> {
            self.check()?;
            self.inner.query_by_account(a, l)
        }
        fn account_postings(&mut self, a: &str) -> Result<Vec<AccountPosting>> {
            self.check()?;
            self.inner.account_postings(a)
        }
        fn contains(&mut self, id: &str) -> Result<bool> {
            self.check()?;
            self.inner.contains(id)
        }
        fn is_referenced(&mut self, a: &str) -> Result<bool> {
            self.check()?;
            self.inner.is_referenced(a)
        }
    }

    #[test]
    fn test_scan_query_window_and_limit() {
        let txs = vec![
            tx("a", 10, "Assets:Cash", "Expenses:Food", 1.0),
            tx("b", 20, "Assets:Cash", "Expenses:Food", 2.0),
            tx("c", 30, "Assets:Bank", "Expenses:Rent", 3.0),
        ];

        let all = scan_query(&txs, &TransactionQuery::default());
        assert_eq!(all.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["c", "b", "a"]);

        let window = scan_query(&txs, &TransactionQuery::new(Some(10), Some(20), None));
        assert_eq!(window.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);

        let capped = scan_query(&txs, &TransactionQuery::new(None, None, Some(1)));
        assert_eq!(capped[0].id, "c");

        let uncapped = scan_query(&txs, &TransactionQuery::new(None, None, Some(0)));
        assert_eq!(uncapped.len(), 3);

        let cash = scan_by_account(&txs, "Assets:Cash", Some(1));
        assert_eq!(cash.len(), 1);
        assert_eq!(cash[0].id, "b");
    }

    #[test]
    fn test_fallback_scan_matches_sqlite_path() {
        let checkpoint = |id: &str, amount: f64| {
            let mut t = tx(id, 40, "Assets:Cash", "Assets:Cash", 0.0);
            t.postings = vec![Posting::new("Assets:Cash", amount)];
            t.tags = vec!["balance".to_string()];
            t
        };
        let txs = vec![
            tx("a", 10, "Assets:Cash", "Expenses:Food", 1.0),
            tx("b", 10, "Assets:Cash", "Expenses:Food", 2.0),
            tx("c", 30, "Assets:Bank", "Expenses:Rent", 3.0),
            checkpoint("z", 100.0),
            checkpoint("y", 200.0),
        ];
        let mut sqlite = SqliteStore::open_in_memory().unwrap();
        sqlite.replace_all(&txs).unwrap();

        for query in [
            TransactionQuery::default(),
            TransactionQuery::new(Some(10), Some(10), None),
            TransactionQuery::new(None, Some(29), Some(1)),
        ] {
            assert_eq!(sqlite.query(&query).unwrap(), scan_query(&txs, &query));
        }
        assert_eq!(
            sqlite.query_by_account("Assets:Cash", None).unwrap(),
            scan_by_account(&txs, "Assets:Cash", None)
        );
        assert_eq!(sqlite.snapshot().unwrap(), txs);

        // sequence values differ between tiers; the resulting order must not
        let order = |postings: Vec<AccountPosting>| -> Vec<(String, f64)> {
            postings.into_iter().map(|p| (p.transaction_id, p.amount)).collect()
        };
        let sql_order = order(sqlite.account_postings("Assets:Cash").unwrap());
        assert_eq!(sql_order, order(scan_account_postings(&txs, "Assets:Cash")));
        assert_eq!(sql_order.last(), Some(&("y".to_string(), 200.0)));
    }

    #[test]
    fn test_tiered_store_fails_over_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let down = Arc::new(AtomicBool::new(false));
        let primary = Flaky {
            inner: SqliteStore::open_in_memory().unwrap(),
            down: down.clone(),
        };
        let fallback = JsonStore::new(dir.path().join("transactions.json"));
        let mut store = TieredStore::new(Box::new(primary), Box::new(fallback));

        store.insert(&tx("a", 10, "Assets:Cash", "Expenses:Food", 1.0)).unwrap();

        // primary goes away: writes land in the snapshot, reads scan it
        down.store(true, Ordering::SeqCst);
        store.insert(&tx("b", 20, "Assets:Cash", "Expenses:Food", 2.0)).unwrap();
        assert!(!store.primary_healthy());
        let ids: Vec<String> = store.all().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);

        // primary comes back and is re-seeded before serving again
        down.store(false, Ordering::SeqCst);
        assert!(store.contains("b").unwrap());
        assert!(store.primary_healthy());
        assert_eq!(store.query_by_account("Expenses:Food", None).unwrap().len(), 2);
    }

    #[test]
    fn test_stale_snapshot_never_overwrites_primary() {
        let dir = tempfile::tempdir().unwrap();
        let down = Arc::new(AtomicBool::new(false));
        let primary = Flaky {
            inner: SqliteStore::open_in_memory().unwrap(),
            down: down.clone(),
        };
        let path = dir.path().join("t.json");
        let mut store = TieredStore::new(Box::new(primary), Box::new(JsonStore::new(&path)));
        store.insert(&tx("a", 10, "Assets:Cash", "Expenses:Food", 1.0)).unwrap();

        // a directory on the staging path makes every snapshot write fail
        let staging = dir.path().join("t.json.tmp");
        std::fs::create_dir(&staging).unwrap();
        store.insert(&tx("b", 20, "Assets:Cash", "Expenses:Food", 2.0)).unwrap();
        assert!(store.snapshot_stale());

        // one failed read: the out-of-date snapshot must not answer or accept writes
        down.store(true, Ordering::SeqCst);
        assert!(store.all().is_err());
        assert!(store.insert(&tx("c", 30, "Assets:Cash", "Expenses:Food", 3.0)).is_err());

        down.store(false, Ordering::SeqCst);
        std::fs::remove_dir(&staging).unwrap();
        let ids: Vec<String> = store.all().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
        assert!(store.primary_healthy());
        assert!(!store.snapshot_stale());
        assert_eq!(JsonStore::new(&path).load().unwrap().len(), 2);
        println!("✅ Committed rows survive a failed mirror and a transient outage");
    }

    #[test]
    fn test_default_delete_reports_missing() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert(&tx("a", 10, "Assets:Cash", "Expenses:Food", 1.0)).unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(!store.is_referenced("Assets:Cash").unwrap());
    }
}
