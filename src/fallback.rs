// 📄 JSON Snapshot Store - fallback tier
//
// The whole transaction list lives in one JSON file. Writes go to a sibling
// temp file which is then renamed over the snapshot.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::balance::AccountPosting;
use crate::error::{LedgerError, Result};
use crate::model::Transaction;
use crate::store::{scan_account_postings, scan_by_account, scan_query, TransactionQuery, TransactionStore};

pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonStore { path: path.into() }
    }

    /// Missing snapshot reads as empty
    pub fn load(&self) -> Result<Vec<Transaction>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, transactions: &[Transaction]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(transactions)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn check_unique(transactions: &[Transaction]) -> Result<()> {
    let mut seen = HashSet::new();
    for tx in transactions {
        if !seen.insert(tx.id.as_str()) {
            return Err(LedgerError::Persistence(format!(
                "transaction id '{}' already stored",
                tx.id
            )));
        }
    }
    Ok(())
}

impl TransactionStore for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn health_check(&mut self) -> Result<()> {
        self.load().map(|_| ())
    }

    fn apply(&mut self, delete_ids: &[String], insert: &[Transaction]) -> Result<usize> {
        let mut transactions = self.load()?;
        let before = transactions.len();
        transactions.retain(|tx| !delete_ids.contains(&tx.id));
        let deleted = before - transactions.len();

        transactions.extend(insert.iter().cloned());
        check_unique(&transactions)?;
        self.save(&transactions)?;
        Ok(deleted)
    }

    fn replace_all(&mut self, transactions: &[Transaction]) -> Result<()> {
        check_unique(transactions)?;
        self.save(transactions)
    }

    /// File order is insertion order: `apply` only appends
    fn snapshot(&mut self) -> Result<Vec<Transaction>> {
        self.load()
    }

    fn query(&mut self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        Ok(scan_query(&self.load()?, query))
    }

    fn query_by_account(&mut self, account: &str, limit: Option<usize>) -> Result<Vec<Transaction>> {
        Ok(scan_by_account(&self.load()?, account, limit))
    }

    fn account_postings(&mut self, account: &str) -> Result<Vec<AccountPosting>> {
        Ok(scan_account_postings(&self.load()?, account))
    }

    fn contains(&mut self, id: &str) -> Result<bool> {
        Ok(self.load()?.iter().any(|tx| tx.id == id))
    }

    fn is_referenced(&mut self, account: &str) -> Result<bool> {
        Ok(self.load()?.iter().any(|tx| tx.touches(account)))
    }
}
