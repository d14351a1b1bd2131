// Ledger data model - transactions, postings, accounts
//
// A Transaction owns its postings; the id is the join key between the
// transactions and posts tables and never changes once assigned.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{LedgerError, Result};

pub const BALANCE_TAG: &str = "balance";
pub const PAD_TAG: &str = "pad";
pub const DEFAULT_FLAG: char = '*';
pub const DEFAULT_CURRENCY: &str = "CNY";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_flag() -> char {
    DEFAULT_FLAG
}

// ============================================================================
// POSTING
// ============================================================================

/// One signed account-amount line. Positive amounts flow into the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub account: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Posting {
    pub fn new(account: impl Into<String>, amount: f64) -> Self {
        Posting {
            account: account.into(),
            amount,
            currency: default_currency(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

// ============================================================================
// TRANSACTION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "income" => Some(TransactionType::Income),
            "expense" => Some(TransactionType::Expense),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }

    /// Classify from posting signs: money arriving on an Income account
    /// together with money leaving an Expenses account is a transfer.
    pub fn classify(postings: &[Posting]) -> Self {
        let has_income = postings
            .iter()
            .any(|p| p.amount > 0.0 && p.account.starts_with("Income"));
        let has_expense = postings
            .iter()
            .any(|p| p.amount < 0.0 && p.account.starts_with("Expenses"));

        match (has_income, has_expense) {
            (true, true) => TransactionType::Transfer,
            (true, false) => TransactionType::Income,
            _ => TransactionType::Expense,
        }
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub date: String,
    #[serde(default = "default_flag")]
    pub flag: char,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<String>,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub postings: Vec<Posting>,
    /// Insertion/event order in milliseconds
    pub timestamp: i64,
}

impl Transaction {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Single posting whose amount is an absolute balance, not a delta
    pub fn is_balance_assertion(&self) -> bool {
        self.has_tag(BALANCE_TAG)
    }

    pub fn is_pad(&self) -> bool {
        self.has_tag(PAD_TAG)
    }

    /// Balance assertions and pads are directives, not economic entries
    pub fn is_directive(&self) -> bool {
        self.is_balance_assertion() || self.is_pad()
    }

    pub fn posting_for(&self, account: &str) -> Option<&Posting> {
        self.postings.iter().find(|p| p.account == account)
    }

    pub fn touches(&self, account: &str) -> bool {
        self.posting_for(account).is_some()
    }

    /// ("2024", "01") for a transaction dated 2024-01-15
    pub fn year_month(&self) -> Option<(&str, &str)> {
        let mut parts = self.date.splitn(3, '-');
        let year = parts.next()?;
        let month = parts.next()?;
        if year.len() == 4 && month.len() == 2 {
            Some((year, month))
        } else {
            None
        }
    }

    /// Synthetic single-posting transaction for a balance directive
    pub fn balance_assertion(
        id: String,
        date: &str,
        account: &str,
        amount: f64,
        currency: &str,
        label: &str,
    ) -> Self {
        Transaction {
            id,
            date: date.to_string(),
            flag: DEFAULT_FLAG,
            payee: None,
            narration: format!("Balance check for {}", label),
            tags: vec![BALANCE_TAG.to_string()],
            links: Vec::new(),
            kind: TransactionType::Transfer,
            postings: vec![Posting::new(account, amount).with_currency(currency)],
            timestamp: date_timestamp(date).unwrap_or_default(),
        }
    }

    /// Synthetic pad: postings are [target, source]
    pub fn pad(
        id: String,
        date: &str,
        target: Posting,
        source: Posting,
        label: &str,
    ) -> Self {
        Transaction {
            id,
            date: date.to_string(),
            flag: DEFAULT_FLAG,
            payee: None,
            narration: format!("Pad transaction for {}", label),
            tags: vec![PAD_TAG.to_string()],
            links: Vec::new(),
            kind: TransactionType::Transfer,
            postings: vec![target, source],
            timestamp: date_timestamp(date).unwrap_or_default(),
        }
    }
}

// ============================================================================
// TRANSACTION INPUT
// ============================================================================

/// What a caller supplies to add a transaction; id and timestamp are assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub date: String,
    #[serde(default)]
    pub flag: Option<char>,
    #[serde(default)]
    pub payee: Option<String>,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub postings: Vec<Posting>,
}

impl TransactionInput {
    /// Check everything that can be checked without touching storage.
    /// Postings must already carry resolved account names.
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        if date_timestamp(&self.date).is_none() {
            return Err(LedgerError::Validation(format!(
                "date must be YYYY-MM-DD, got {:?}",
                self.date
            )));
        }
        if let Some(flag) = self.flag {
            if flag != '*' && flag != '!' {
                return Err(LedgerError::Validation(format!(
                    "flag must be '*' or '!', got {:?}",
                    flag
                )));
            }
        }
        for tag in self.tags.iter().chain(self.links.iter()) {
            if !is_symbol(tag) {
                return Err(LedgerError::Validation(format!(
                    "tags and links may only contain letters, digits, '-', '_', '/' or '.': {:?}",
                    tag
                )));
            }
        }
        if self.tags.iter().any(|t| t == BALANCE_TAG || t == PAD_TAG) {
            return Err(LedgerError::Validation(
                "the balance and pad tags are reserved for directives".to_string(),
            ));
        }
        validate_postings(&self.postings, tolerance)
    }

    pub fn into_transaction(self, id: String, timestamp: i64) -> Transaction {
        Transaction {
            id,
            date: self.date,
            flag: self.flag.unwrap_or(DEFAULT_FLAG),
            payee: self.payee.filter(|p| !p.is_empty()),
            narration: self.narration,
            tags: dedup(self.tags),
            links: dedup(self.links),
            kind: self.kind,
            postings: self.postings,
            timestamp,
        }
    }
}

/// Double-entry rules for economic transactions: at least two postings,
/// distinct accounts, amounts summing to zero within `tolerance`.
pub fn validate_postings(postings: &[Posting], tolerance: f64) -> Result<()> {
    if postings.len() < 2 {
        return Err(LedgerError::Validation(
            "a transaction needs at least two postings".to_string(),
        ));
    }

    for posting in postings {
        if posting.account.is_empty() || posting.account.chars().any(char::is_whitespace) {
            return Err(LedgerError::Validation(format!(
                "invalid account name {:?}",
                posting.account
            )));
        }
        if posting.currency.is_empty() || posting.currency.chars().any(char::is_whitespace) {
            return Err(LedgerError::Validation(format!(
                "invalid currency {:?}",
                posting.currency
            )));
        }
        if !posting.amount.is_finite() {
            return Err(LedgerError::Validation(format!(
                "amount for {} is not a number",
                posting.account
            )));
        }
    }

    let total: f64 = postings.iter().map(|p| p.amount).sum();
    if total.abs() > tolerance {
        return Err(LedgerError::Validation(format!(
            "postings do not balance, off by {:.2}",
            total
        )));
    }

    let mut seen = HashSet::new();
    for posting in postings {
        if !seen.insert(posting.account.as_str()) {
            return Err(LedgerError::Validation(format!(
                "account {} appears twice in one transaction",
                posting.account
            )));
        }
    }

    Ok(())
}

// ============================================================================
// ACCOUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Income,
    Expense,
}

impl AccountType {
    pub const ALL: [AccountType; 4] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Income,
        AccountType::Expense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Income => "income",
            AccountType::Expense => "expense",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asset" => Some(AccountType::Asset),
            "liability" => Some(AccountType::Liability),
            "income" => Some(AccountType::Income),
            "expense" => Some(AccountType::Expense),
            _ => None,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            AccountType::Asset => "assets.bean",
            AccountType::Liability => "liabilities.bean",
            AccountType::Income => "income.bean",
            AccountType::Expense => "expenses.bean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub nickname: String,
    pub actual_name: String,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub balance: f64,
    pub transaction_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub balance: f64,
    pub total_income: f64,
    pub total_expense: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyStat {
    pub month: String,
    pub income: f64,
    pub expense: f64,
}

// ============================================================================
// HELPERS
// ============================================================================

/// UTC midnight of an ISO date, in milliseconds
pub fn date_timestamp(date: &str) -> Option<i64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Time-ordered id for store-originated rows: millis + 5 random chars
pub fn new_store_id(timestamp: i64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", timestamp, &suffix[..5])
}

fn is_symbol(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
