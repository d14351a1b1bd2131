// 📒 Ledger - the engine's function-level contract
//
// One explicitly constructed handle owns the store, the account registry and
// the journal layout. Every operation takes the handle's lock for its whole
// validate → persist → regenerate sequence, so mutations never interleave.

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::accounts::{is_canonical_name, AccountRegistry};
use crate::balance::{balances_by_account, compute_balance, current_year, monthly_stats, pad_difference, summarize};
use crate::config::{LedgerConfig, LedgerPaths};
use crate::db::SqliteStore;
use crate::error::{LedgerError, Result};
use crate::fallback::JsonStore;
use crate::model::{
    date_timestamp, new_store_id, now_millis, AccountInfo, AccountType, BalanceSummary, MonthlyStat, Posting,
    Transaction, TransactionInput,
};
use crate::projection::write_projection;
use crate::reconciliation::{SyncEngine, SyncReport};
use crate::store::{TieredStore, TransactionQuery, TransactionStore};

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

struct LedgerState {
    config: LedgerConfig,
    paths: LedgerPaths,
    store: TieredStore,
    registry: AccountRegistry,
    sync: SyncEngine,
}

impl LedgerState {
    /// Rewrite the journal from the committed store state. Any failure here
    /// happens after the commit and is reported as a projection failure.
    fn regenerate(&mut self) -> Result<()> {
        let result = self
            .store
            .snapshot()
            .and_then(|rows| write_projection(&self.paths, &rows).map(|_| ()));
        result.map_err(|err| match err {
            LedgerError::Projection(_) => err,
            other => LedgerError::Projection(other.to_string()),
        })
    }

    fn account_balance(&mut self, actual_name: &str) -> Result<f64> {
        Ok(compute_balance(&self.store.account_postings(actual_name)?).balance)
    }

    fn accounts(&mut self) -> Result<Vec<AccountInfo>> {
        let entries = self.registry.list()?;
        let balances = balances_by_account(&self.store.snapshot()?);
        Ok(entries
            .into_iter()
            .map(|entry| {
                let (balance, transaction_count) =
                    balances.get(&entry.actual_name).copied().unwrap_or((0.0, 0));
                AccountInfo {
                    nickname: entry.nickname,
                    actual_name: entry.actual_name,
                    kind: entry.kind,
                    balance,
                    transaction_count,
                }
            })
            .collect())
    }
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Open (and bootstrap if needed) the ledger under `config.data_dir`
    pub fn open(config: LedgerConfig) -> Result<Self> {
        let paths = config.paths();
        paths.ensure_layout(&config.default_currency)?;

        let primary = SqliteStore::open(&config.database_path())?;
        let fallback = JsonStore::new(config.fallback_path());
        let store = TieredStore::new(Box::new(primary), Box::new(fallback));
        let registry = AccountRegistry::new(paths.clone(), config.default_currency.clone());
        let sync = SyncEngine::new(config.balance_tolerance);

        info!(data_dir = %config.data_dir.display(), "ledger opened");
        Ok(Ledger {
            state: Mutex::new(LedgerState {
                config,
                paths,
                store,
                registry,
                sync,
            }),
        })
    }

    pub async fn paths(&self) -> LedgerPaths {
        self.state.lock().await.paths.clone()
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    pub async fn get_transactions(
        &self,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let mut state = self.state.lock().await;
        state.store.query(&TransactionQuery::new(start, end, limit))
    }

    pub async fn add_transaction(&self, mut input: TransactionInput) -> Result<Transaction> {
        let mut state = self.state.lock().await;

        let resolver = state.registry.resolver()?;
        for posting in &mut input.postings {
            posting.account = resolver.resolve(posting.account.trim());
        }
        input.validate(state.config.balance_tolerance)?;

        let timestamp = now_millis();
        let transaction = input.into_transaction(new_store_id(timestamp), timestamp);
        state.store.insert(&transaction)?;
        info!(id = %transaction.id, date = %transaction.date, "added transaction");

        state.regenerate()?;
        Ok(transaction)
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.store.contains(id)? {
            return Err(LedgerError::NotFound(format!("transaction {}", id)));
        }
        state.store.delete(id)?;
        info!(id, "deleted transaction");

        state.regenerate()
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    pub async fn get_accounts(&self) -> Result<Vec<AccountInfo>> {
        self.state.lock().await.accounts()
    }

    pub async fn add_account(
        &self,
        nickname: &str,
        actual_name: &str,
        kind: AccountType,
    ) -> Result<AccountInfo> {
        let mut state = self.state.lock().await;
        let entry = state.registry.open(nickname, actual_name, kind, &today())?;

        let postings = state.store.account_postings(&entry.actual_name)?;
        Ok(AccountInfo {
            balance: compute_balance(&postings).balance,
            transaction_count: postings.len(),
            nickname: entry.nickname,
            actual_name: entry.actual_name,
            kind: entry.kind,
        })
    }

    pub async fn delete_account(&self, name: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let store = &mut state.store;
        state
            .registry
            .close(name, &today(), |actual| store.is_referenced(actual))?;
        Ok(())
    }

    pub async fn get_account_balance(&self, name: &str) -> Result<f64> {
        let mut state = self.state.lock().await;
        let actual_name = state.registry.resolve(name)?;
        state.account_balance(&actual_name)
    }

    pub async fn get_account_transactions(&self, name: &str, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let mut state = self.state.lock().await;
        let actual_name = state.registry.resolve(name)?;
        state.store.query_by_account(&actual_name, limit)
    }

    /// Assert `account` holds `amount` and pad the difference from
    /// `pad_account`. Returns false, without writing anything, when either
    /// account is unknown and not a canonical account name.
    pub async fn set_account_balance(
        &self,
        account: &str,
        date: &str,
        amount: f64,
        pad_account: &str,
    ) -> Result<bool> {
        if date_timestamp(date).is_none() {
            return Err(LedgerError::Validation(format!("date must be YYYY-MM-DD, got {:?}", date)));
        }
        if !amount.is_finite() {
            return Err(LedgerError::Validation(format!("invalid amount {}", amount)));
        }

        let mut state = self.state.lock().await;
        let resolver = state.registry.resolver()?;
        for name in [account, pad_account] {
            if !resolver.is_registered(name) && !is_canonical_name(name) {
                warn!(account = name, "balance not set: unknown account");
                return Ok(false);
            }
        }
        let target = resolver.resolve(account);
        let source = resolver.resolve(pad_account);
        if target == source {
            return Err(LedgerError::Validation(format!(
                "cannot pad {} from itself",
                target
            )));
        }

        let label = state
            .registry
            .find(&target)?
            .map(|entry| entry.nickname)
            .unwrap_or_else(|| target.clone());
        let currency = state.config.default_currency.clone();
        let current = state.account_balance(&target)?;

        // pad and assertion share one timestamp; the pad sorts first
        let timestamp = now_millis();
        let mut rows = Vec::new();
        if let Some(difference) = pad_difference(current, amount) {
            let mut pad = Transaction::pad(
                new_store_id(timestamp),
                date,
                Posting::new(&target, difference).with_currency(&currency),
                Posting::new(&source, -difference).with_currency(&currency),
                &label,
            );
            pad.timestamp = timestamp;
            rows.push(pad);
        }
        let mut assertion =
            Transaction::balance_assertion(new_store_id(timestamp), date, &target, amount, &currency, &label);
        assertion.timestamp = timestamp;
        rows.push(assertion);

        state.store.apply(&[], &rows)?;
        info!(
            account = %target,
            amount,
            previous = current,
            padded = (rows.len() > 1),
            "set account balance"
        );

        state.regenerate()?;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Sync and reports
    // ------------------------------------------------------------------------

    pub async fn sync_transactions(&self) -> Result<SyncReport> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.sync.run(&mut state.store, &state.paths)
    }

    pub async fn get_balance(&self) -> Result<BalanceSummary> {
        let accounts = self.state.lock().await.accounts()?;
        Ok(summarize(&accounts))
    }

    /// Current calendar year
    pub async fn get_monthly_stats(&self) -> Result<Vec<MonthlyStat>> {
        self.get_monthly_stats_for(current_year()).await
    }

    pub async fn get_monthly_stats_for(&self, year: i32) -> Result<Vec<MonthlyStat>> {
        let mut state = self.state.lock().await;
        Ok(monthly_stats(&state.store.all()?, year))
    }
}
