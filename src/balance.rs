// ⚖️ Balance Engine - running balances with assertion checkpoints
//
// A balance assertion SETS the running balance to the asserted amount.
// Every other posting ADDS its amount, before or after a checkpoint.

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{AccountInfo, AccountType, BalanceSummary, MonthlyStat, Transaction, TransactionType};

/// Differences smaller than this are treated as already balanced
const PAD_EPSILON: f64 = 1e-9;

// ============================================================================
// ACCOUNT POSTINGS
// ============================================================================

/// One posting against a single account, with what the engine needs to
/// order and interpret it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPosting {
    pub transaction_id: String,
    pub timestamp: i64,
    pub amount: f64,
    /// Owning transaction is tagged `balance`
    pub is_assertion: bool,
    /// Insertion position of the owning transaction within its store
    pub sequence: i64,
}

/// Timestamp ascending; on equal timestamps assertions go last so a pad
/// dated the same day is applied before the assertion it serves, and
/// remaining ties follow insertion order
pub fn sort_for_balance(postings: &mut [AccountPosting]) {
    postings.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.is_assertion.cmp(&b.is_assertion))
            .then(a.sequence.cmp(&b.sequence))
    });
}

/// Postings against `account` from a transaction list in insertion order,
/// ordered for the checkpoint algorithm
pub fn account_postings(account: &str, transactions: &[Transaction]) -> Vec<AccountPosting> {
    let mut postings: Vec<AccountPosting> = transactions
        .iter()
        .enumerate()
        .filter_map(|(sequence, tx)| {
            tx.posting_for(account).map(|p| AccountPosting {
                transaction_id: tx.id.clone(),
                timestamp: tx.timestamp,
                amount: p.amount,
                is_assertion: tx.is_balance_assertion(),
                sequence: sequence as i64,
            })
        })
        .collect();
    sort_for_balance(&mut postings);
    postings
}

// ============================================================================
// RUNNING BALANCE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningBalance {
    pub balance: f64,
    /// At least one assertion has been applied
    pub checkpointed: bool,
}

impl RunningBalance {
    pub fn apply(&mut self, posting: &AccountPosting) {
        if posting.is_assertion {
            self.balance = posting.amount;
            self.checkpointed = true;
        } else {
            self.balance += posting.amount;
        }
    }
}

/// Fold already-ordered postings into a balance
pub fn compute_balance(postings: &[AccountPosting]) -> RunningBalance {
    let mut running = RunningBalance::default();
    for posting in postings {
        running.apply(posting);
    }
    running
}

/// Delta a pad must carry so that `current` becomes `asserted`, or None when
/// no pad is needed
pub fn pad_difference(current: f64, asserted: f64) -> Option<f64> {
    let difference = asserted - current;
    if difference.abs() > PAD_EPSILON {
        Some(difference)
    } else {
        None
    }
}

// ============================================================================
// LEDGER-WIDE FIGURES
// ============================================================================

/// Balance and transaction count for every account touched by
/// `transactions`, which must be in insertion order
pub fn balances_by_account(transactions: &[Transaction]) -> HashMap<String, (f64, usize)> {
    let mut grouped: HashMap<String, Vec<AccountPosting>> = HashMap::new();
    for (sequence, tx) in transactions.iter().enumerate() {
        for posting in &tx.postings {
            grouped
                .entry(posting.account.clone())
                .or_default()
                .push(AccountPosting {
                    transaction_id: tx.id.clone(),
                    timestamp: tx.timestamp,
                    amount: posting.amount,
                    is_assertion: tx.is_balance_assertion(),
                    sequence: sequence as i64,
                });
        }
    }

    grouped
        .into_iter()
        .map(|(account, mut postings)| {
            sort_for_balance(&mut postings);
            let count = postings.len();
            (account, (compute_balance(&postings).balance, count))
        })
        .collect()
}

/// Net worth is assets plus liabilities (liabilities are negative);
/// income and expense totals are absolute values
pub fn summarize(accounts: &[AccountInfo]) -> BalanceSummary {
    let mut summary = BalanceSummary::default();
    for account in accounts {
        match account.kind {
            AccountType::Asset | AccountType::Liability => summary.balance += account.balance,
            AccountType::Income => summary.total_income += account.balance.abs(),
            AccountType::Expense => summary.total_expense += account.balance.abs(),
        }
    }
    summary
}

/// Twelve entries "01".."12" for `year`; an income or expense transaction
/// counts the absolute amount of its first posting
pub fn monthly_stats(transactions: &[Transaction], year: i32) -> Vec<MonthlyStat> {
    let mut stats: Vec<MonthlyStat> = (1..=12)
        .map(|m| MonthlyStat {
            month: format!("{:02}", m),
            income: 0.0,
            expense: 0.0,
        })
        .collect();
    let year = year.to_string();

    for tx in transactions {
        let Some((tx_year, month)) = tx.year_month() else {
            continue;
        };
        if tx_year != year {
            continue;
        }
        let Some(index) = month.parse::<usize>().ok().filter(|m| (1..=12).contains(m)) else {
            continue;
        };
        let amount = tx.postings.first().map(|p| p.amount.abs()).unwrap_or(0.0);
        match tx.kind {
            TransactionType::Income => stats[index - 1].income += amount,
            TransactionType::Expense => stats[index - 1].expense += amount,
            TransactionType::Transfer => {}
        }
    }

    stats
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Posting;

    fn posting(timestamp: i64, amount: f64, is_assertion: bool) -> AccountPosting {
        AccountPosting {
            transaction_id: format!("t{}", timestamp),
            timestamp,
            amount,
            is_assertion,
            sequence: timestamp,
        }
    }

    fn tx(id: &str, date: &str, timestamp: i64, kind: TransactionType, postings: Vec<Posting>) -> Transaction {
        Transaction {
            id: id.to_string(),
            date: date.to_string(),
            flag: '*',
            payee: None,
            narration: String::new(),
            tags: vec![],
            links: vec![],
            kind,
            postings,
            timestamp,
        }
    }

    #[test]
    fn test_checkpoint_overrides_then_accumulates() {
        let postings = vec![posting(1, 100.0, false), posting(2, 50.0, true), posting(3, 10.0, false)];
        let result = compute_balance(&postings);
        assert_eq!(result.balance, 60.0);
        assert!(result.checkpointed);
    }

    #[test]
    fn test_without_checkpoint_is_plain_sum() {
        let postings = vec![posting(1, 100.0, false), posting(2, -25.5, false)];
        let result = compute_balance(&postings);
        assert_eq!(result.balance, 74.5);
        assert!(!result.checkpointed);
    }

    #[test]
    fn test_same_timestamp_pad_applies_before_assertion() {
        let mut postings = vec![posting(5, 500.0, true), posting(5, 50.0, false), posting(1, 450.0, false)];
        sort_for_balance(&mut postings);
        assert_eq!(compute_balance(&postings).balance, 500.0);
    }

    #[test]
    fn test_same_day_assertions_follow_insertion_order() {
        let assertion = |id: &str, amount: f64| {
            let mut t = tx(id, "2024-03-02", 7, TransactionType::Transfer, vec![Posting::new("Assets:Cash", amount)]);
            t.tags = vec!["balance".to_string()];
            t
        };
        // ids sort the other way round; insertion order must win
        let txs = vec![assertion("z", 100.0), assertion("a", 200.0)];

        assert_eq!(balances_by_account(&txs)["Assets:Cash"].0, 200.0);
        assert_eq!(compute_balance(&account_postings("Assets:Cash", &txs)).balance, 200.0);
        println!("✅ Later assertion on the same day wins");
    }

    #[test]
    fn test_pad_difference() {
        assert_eq!(pad_difference(450.0, 500.0), Some(50.0));
        assert_eq!(pad_difference(500.0, 500.0), None);
        assert_eq!(pad_difference(0.1 + 0.2, 0.3), None);
        assert_eq!(pad_difference(20.0, -5.0), Some(-25.0));
    }

    #[test]
    fn test_balances_by_account_counts_transactions() {
        let mut assertion = tx("b", "2024-01-03", 3, TransactionType::Transfer, vec![Posting::new("Assets:Cash", 50.0)]);
        assertion.tags = vec!["balance".to_string()];
        let txs = vec![
            tx("a", "2024-01-01", 1, TransactionType::Expense, vec![
                Posting::new("Assets:Cash", 100.0),
                Posting::new("Equity:Opening", -100.0),
            ]),
            assertion,
            tx("c", "2024-01-04", 4, TransactionType::Expense, vec![
                Posting::new("Assets:Cash", 10.0),
                Posting::new("Income:Gift", -10.0),
            ]),
        ];

        let balances = balances_by_account(&txs);
        assert_eq!(balances["Assets:Cash"], (60.0, 3));
        assert_eq!(balances["Equity:Opening"], (-100.0, 1));
        assert_eq!(account_postings("Assets:Cash", &txs).len(), 3);
    }

    #[test]
    fn test_summarize() {
        let info = |kind, balance| AccountInfo {
            nickname: String::new(),
            actual_name: String::new(),
            kind,
            balance,
            transaction_count: 0,
        };
        let summary = summarize(&[
            info(AccountType::Asset, 1000.0),
            info(AccountType::Liability, -300.0),
            info(AccountType::Income, -2000.0),
            info(AccountType::Expense, 700.0),
        ]);
        assert_eq!(summary.balance, 700.0);
        assert_eq!(summary.total_income, 2000.0);
        assert_eq!(summary.total_expense, 700.0);
    }

    #[test]
    fn test_monthly_stats_only_counts_requested_year() {
        let txs = vec![
            tx("1", "2024-01-15", 1, TransactionType::Expense, vec![
                Posting::new("Expenses:Food", -30.0),
                Posting::new("Assets:Cash", 30.0),
            ]),
            tx("2", "2024-03-01", 2, TransactionType::Income, vec![
                Posting::new("Income:Salary", 1000.0),
                Posting::new("Assets:Bank", -1000.0),
            ]),
            tx("3", "2023-03-01", 3, TransactionType::Income, vec![
                Posting::new("Income:Salary", 1000.0),
                Posting::new("Assets:Bank", -1000.0),
            ]),
        ];

        let stats = monthly_stats(&txs, 2024);
        assert_eq!(stats.len(), 12);
        assert_eq!(stats[0].month, "01");
        assert_eq!(stats[0].expense, 30.0);
        assert_eq!(stats[2].income, 1000.0);
        assert_eq!(stats[11].month, "12");
        assert_eq!(stats.iter().map(|s| s.income).sum::<f64>(), 1000.0);
    }
}
