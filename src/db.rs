// 💾 SQLite Store - primary tier
//
// Two tables: `transactions` holds header fields, `posts` holds one row per
// posting. Every mutation runs inside a single SQLite transaction.

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::balance::{sort_for_balance, AccountPosting};
use crate::error::Result;
use crate::model::{Posting, Transaction, TransactionType, BALANCE_TAG, DEFAULT_FLAG};
use crate::store::{TransactionQuery, TransactionStore};

const TRANSACTION_COLUMNS: &str =
    "id, date, flag, payee, narration, tags, links, type, timestamp";

const NEWEST_FIRST: &str = "ORDER BY timestamp DESC, id DESC";

const INSERTION_ORDER: &str = "ORDER BY rowid";

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            flag TEXT NOT NULL DEFAULT '*',
            payee TEXT,
            narration TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '[]',
            links TEXT NOT NULL DEFAULT '[]',
            type TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            account TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_posts_account ON posts(account)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_posts_transaction ON posts(transaction_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn json_list(row: &Row, index: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let flag: String = row.get(2)?;
    let kind: String = row.get(7)?;
    let kind = TransactionType::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Text,
            format!("unknown transaction type '{}'", kind).into(),
        )
    })?;

    Ok(Transaction {
        id: row.get(0)?,
        date: row.get(1)?,
        flag: flag.chars().next().unwrap_or(DEFAULT_FLAG),
        payee: row.get(3)?,
        narration: row.get(4)?,
        tags: json_list(row, 5)?,
        links: json_list(row, 6)?,
        kind,
        postings: Vec::new(),
        timestamp: row.get(8)?,
    })
}

fn insert_transaction(tx: &rusqlite::Transaction, transaction: &Transaction) -> Result<()> {
    tx.prepare_cached(
        "INSERT INTO transactions (id, date, flag, payee, narration, tags, links, type, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?
    .execute(params![
        transaction.id,
        transaction.date,
        transaction.flag.to_string(),
        transaction.payee,
        transaction.narration,
        serde_json::to_string(&transaction.tags)?,
        serde_json::to_string(&transaction.links)?,
        transaction.kind.as_str(),
        transaction.timestamp,
    ])?;

    let mut insert_post = tx.prepare_cached(
        "INSERT INTO posts (transaction_id, account, amount, currency) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for posting in &transaction.postings {
        insert_post.execute(params![
            transaction.id,
            posting.account,
            posting.amount,
            posting.currency
        ])?;
    }
    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    /// Load transactions matching `filter` (a WHERE clause or empty) in
    /// `order`, with postings in insertion order
    fn select(
        &self,
        filter: &str,
        order: &str,
        values: &[Value],
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut values = values.to_vec();
        let limit_sql = match limit.filter(|l| *l > 0) {
            Some(limit) => {
                values.push(Value::Integer(limit as i64));
                " LIMIT ?"
            }
            None => "",
        };

        let tx_sql = format!(
            "SELECT {} FROM transactions {} {}{}",
            TRANSACTION_COLUMNS, filter, order, limit_sql
        );
        let mut stmt = self.conn.prepare(&tx_sql)?;
        let mut transactions = stmt
            .query_map(params_from_iter(values.iter()), transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let post_sql = format!(
            "SELECT transaction_id, account, amount, currency FROM posts
             WHERE transaction_id IN (SELECT id FROM transactions {} {}{})
             ORDER BY id",
            filter, order, limit_sql
        );
        let mut stmt = self.conn.prepare(&post_sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                Posting {
                    account: row.get(1)?,
                    amount: row.get(2)?,
                    currency: row.get(3)?,
                },
            ))
        })?;

        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        for row in rows {
            let (transaction_id, posting) = row?;
            postings.entry(transaction_id).or_default().push(posting);
        }
        for transaction in &mut transactions {
            transaction.postings = postings.remove(&transaction.id).unwrap_or_default();
        }

        Ok(transactions)
    }

    fn write<F>(&mut self, op: F) -> Result<usize>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<usize>,
    {
        let tx = self.conn.transaction()?;
        // dropping `tx` on error rolls back
        let affected = op(&tx)?;
        tx.commit()?;
        Ok(affected)
    }
}

impl TransactionStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn health_check(&mut self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn apply(&mut self, delete_ids: &[String], insert: &[Transaction]) -> Result<usize> {
        self.write(|tx| {
            let mut deleted = 0;
            for id in delete_ids {
                tx.prepare_cached("DELETE FROM posts WHERE transaction_id = ?1")?
                    .execute([id])?;
                deleted += tx
                    .prepare_cached("DELETE FROM transactions WHERE id = ?1")?
                    .execute([id])?;
            }
            for transaction in insert {
                insert_transaction(tx, transaction)?;
            }
            Ok(deleted)
        })
    }

    fn replace_all(&mut self, transactions: &[Transaction]) -> Result<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM posts", [])?;
            tx.execute("DELETE FROM transactions", [])?;
            for transaction in transactions {
                insert_transaction(tx, transaction)?;
            }
            Ok(transactions.len())
        })?;
        Ok(())
    }

    fn query(&mut self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(start) = query.start {
            clauses.push("timestamp >= ?");
            values.push(Value::Integer(start));
        }
        if let Some(end) = query.end {
            clauses.push("timestamp <= ?");
            values.push(Value::Integer(end));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        self.select(&filter, NEWEST_FIRST, &values, query.limit)
    }

    fn snapshot(&mut self) -> Result<Vec<Transaction>> {
        self.select("", INSERTION_ORDER, &[], None)
    }

    fn query_by_account(&mut self, account: &str, limit: Option<usize>) -> Result<Vec<Transaction>> {
        self.select(
            "WHERE id IN (SELECT transaction_id FROM posts WHERE account = ?)",
            NEWEST_FIRST,
            &[Value::Text(account.to_string())],
            limit,
        )
    }

    fn account_postings(&mut self, account: &str) -> Result<Vec<AccountPosting>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.timestamp, p.amount, t.tags, t.rowid
             FROM posts p JOIN transactions t ON t.id = p.transaction_id
             WHERE p.account = ?1
             ORDER BY t.timestamp, t.rowid",
        )?;
        let mut postings = stmt
            .query_map([account], |row| {
                let tags = json_list(row, 3)?;
                Ok(AccountPosting {
                    transaction_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    amount: row.get(2)?,
                    is_assertion: tags.iter().any(|t| t == BALANCE_TAG),
                    sequence: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        sort_for_balance(&mut postings);
        Ok(postings)
    }

    fn contains(&mut self, id: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?)
    }

    fn is_referenced(&mut self, account: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE account = ?1)",
            [account],
            |row| row.get(0),
        )?)
    }
}
