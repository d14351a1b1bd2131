// 💳 Account Registry - open/close lifecycle in the category files
//
// "Nickname is a VALUE shown to people, actualName is the IDENTITY postings use"
//
// The four category files are the only record of accounts. They are
// re-scanned on every call; nothing is cached between calls. Lines are only
// ever appended, so a closed account stays visible in the file history.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use tracing::{info, warn};

use crate::config::LedgerPaths;
use crate::error::{LedgerError, Result};
use crate::model::AccountType;

static OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d{4}-\d{2}-\d{2})[ \t]+open[ \t]+(\S+)(?:[ \t]+(.*?))?[ \t]*$").unwrap()
});
static CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\d{4}-\d{2}-\d{2}[ \t]+close[ \t]+(\S+)").unwrap());
static NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\d{4}-\d{2}-\d{2}[ \t]+note[ \t]+(\S+)[ \t]+"([^"]*)""#).unwrap()
});

const ROOTS: [&str; 5] = ["Assets", "Liabilities", "Equity", "Income", "Expenses"];

// ============================================================================
// ACCOUNT ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AccountEntry {
    pub nickname: String,
    pub actual_name: String,
    pub kind: AccountType,
    pub opened: String,
}

/// `Assets:Bank:Checking` style: a known root and at least two segments
pub fn is_canonical_name(name: &str) -> bool {
    let mut segments = name.split(':');
    let root = segments.next().unwrap_or("");
    let rest: Vec<&str> = segments.collect();
    ROOTS.contains(&root)
        && !rest.is_empty()
        && rest.iter().all(|s| !s.is_empty())
        && !name.chars().any(char::is_whitespace)
}

fn default_nickname(actual_name: &str) -> String {
    actual_name
        .rsplit(':')
        .next()
        .unwrap_or(actual_name)
        .to_string()
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Point-in-time nickname → actualName mapping, for resolving many names
/// against one scan of the category files
#[derive(Debug, Clone, Default)]
pub struct AccountResolver {
    by_nickname: HashMap<String, String>,
    actual_names: HashSet<String>,
}

impl AccountResolver {
    pub fn from_entries(entries: &[AccountEntry]) -> Self {
        let mut resolver = AccountResolver::default();
        for entry in entries {
            resolver
                .by_nickname
                .entry(entry.nickname.clone())
                .or_insert_with(|| entry.actual_name.clone());
            resolver.actual_names.insert(entry.actual_name.clone());
        }
        resolver
    }

    /// Canonical name for a nickname or actualName; unknown input is
    /// assumed to be canonical already
    pub fn resolve(&self, name: &str) -> String {
        if self.actual_names.contains(name) {
            return name.to_string();
        }
        self.by_nickname
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.actual_names.contains(name) || self.by_nickname.contains_key(name)
    }
}

// ============================================================================
// ACCOUNT REGISTRY
// ============================================================================

pub struct AccountRegistry {
    paths: LedgerPaths,
    default_currency: String,
}

impl AccountRegistry {
    pub fn new(paths: LedgerPaths, default_currency: impl Into<String>) -> Self {
        AccountRegistry {
            paths,
            default_currency: default_currency.into(),
        }
    }

    fn read_file(&self, kind: AccountType) -> Result<String> {
        let path = self.paths.account_file(kind);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Active accounts of every type, in file order
    pub fn list(&self) -> Result<Vec<AccountEntry>> {
        let mut accounts = Vec::new();
        for kind in AccountType::ALL {
            match self.read_file(kind) {
                Ok(text) => accounts.extend(parse_accounts(&text, kind)),
                Err(err) => {
                    warn!(file = kind.file_name(), error = %err, "skipping account file");
                }
            }
        }
        Ok(accounts)
    }

    pub fn resolver(&self) -> Result<AccountResolver> {
        Ok(AccountResolver::from_entries(&self.list()?))
    }

    pub fn resolve(&self, name: &str) -> Result<String> {
        Ok(self.resolver()?.resolve(name))
    }

    /// Look up an active account by nickname or actualName
    pub fn find(&self, name: &str) -> Result<Option<AccountEntry>> {
        let accounts = self.list()?;
        Ok(accounts
            .iter()
            .find(|a| a.actual_name == name)
            .or_else(|| accounts.iter().find(|a| a.nickname == name))
            .cloned())
    }

    /// Append `open` and `note` lines to the type's category file
    pub fn open(
        &self,
        nickname: &str,
        actual_name: &str,
        kind: AccountType,
        date: &str,
    ) -> Result<AccountEntry> {
        let nickname = nickname.trim().replace('"', "'").replace(&['\n', '\r'][..], " ");
        if nickname.is_empty() {
            return Err(LedgerError::Validation("nickname is required".to_string()));
        }
        if actual_name.is_empty() || actual_name.chars().any(char::is_whitespace) {
            return Err(LedgerError::Validation(format!(
                "invalid account name {:?}",
                actual_name
            )));
        }

        for existing in self.list()? {
            if existing.actual_name == actual_name {
                return Err(LedgerError::Duplicate(format!("account {}", actual_name)));
            }
            if existing.nickname == nickname {
                return Err(LedgerError::Duplicate(format!("nickname {}", nickname)));
            }
        }

        let mut text = self.read_file(kind)?;
        if closed_accounts(&text).contains(actual_name) {
            return Err(LedgerError::Duplicate(format!(
                "account {} was closed and cannot be reopened",
                actual_name
            )));
        }

        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!(
            "{} open {} {}\n{} note {} \"{}\"\n",
            date, actual_name, self.default_currency, date, actual_name, nickname
        ));
        fs::write(self.paths.account_file(kind), text)?;

        info!(account = actual_name, nickname = %nickname, kind = kind.as_str(), "opened account");
        Ok(AccountEntry {
            nickname,
            actual_name: actual_name.to_string(),
            kind,
            opened: date.to_string(),
        })
    }

    /// Append a `close` line. `is_referenced` reports whether any posting
    /// still uses the account; if so nothing is written.
    pub fn close<F>(&self, name: &str, date: &str, is_referenced: F) -> Result<AccountEntry>
    where
        F: FnOnce(&str) -> Result<bool>,
    {
        let entry = self
            .find(name)?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", name)))?;

        if is_referenced(&entry.actual_name)? {
            return Err(LedgerError::HasTransactions(entry.actual_name));
        }

        let mut text = self.read_file(entry.kind)?;
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("{} close {}\n", date, entry.actual_name));
        fs::write(self.paths.account_file(entry.kind), text)?;

        info!(account = %entry.actual_name, "closed account");
        Ok(entry)
    }
}

fn closed_accounts(text: &str) -> HashSet<String> {
    CLOSE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Open accounts of one category file, minus any closed anywhere in it
fn parse_accounts(text: &str, kind: AccountType) -> Vec<AccountEntry> {
    let closed = closed_accounts(text);

    let mut nicknames: HashMap<&str, &str> = HashMap::new();
    for caps in NOTE.captures_iter(text) {
        let account = caps.get(1).map_or("", |m| m.as_str());
        let note = caps.get(2).map_or("", |m| m.as_str());
        nicknames.entry(account).or_insert(note);
    }

    let mut seen = HashSet::new();
    let mut accounts = Vec::new();
    for caps in OPEN.captures_iter(text) {
        let actual_name = &caps[2];
        if closed.contains(actual_name) || !seen.insert(actual_name.to_string()) {
            continue;
        }
        let nickname = nicknames
            .get(actual_name)
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string())
            .unwrap_or_else(|| default_nickname(actual_name));

        accounts.push(AccountEntry {
            nickname,
            actual_name: actual_name.to_string(),
            kind,
            opened: caps[1].to_string(),
        });
    }
    accounts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, AccountRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let paths = LedgerPaths::new(dir.path());
        paths.ensure_layout("CNY").unwrap();
        (dir, AccountRegistry::new(paths, "CNY"))
    }

    #[test]
    fn test_open_then_list() {
        let (_dir, registry) = registry();
        registry
            .open("Checking", "Assets:Bank:Checking", AccountType::Asset, "2024-01-01")
            .unwrap();
        registry
            .open("Food", "Expenses:Food", AccountType::Expense, "2024-01-01")
            .unwrap();

        let accounts = registry.list().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].nickname, "Checking");
        assert_eq!(accounts[0].actual_name, "Assets:Bank:Checking");
        assert_eq!(accounts[0].kind, AccountType::Asset);
        assert_eq!(accounts[1].kind, AccountType::Expense);

        let text = fs::read_to_string(registry.paths.account_file(AccountType::Asset)).unwrap();
        assert!(text.contains("2024-01-01 open Assets:Bank:Checking CNY\n"));
        assert!(text.contains("2024-01-01 note Assets:Bank:Checking \"Checking\"\n"));
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let (_dir, registry) = registry();
        registry
            .open("Cash", "Assets:Cash", AccountType::Asset, "2024-01-01")
            .unwrap();

        let again = registry.open("Wallet", "Assets:Cash", AccountType::Asset, "2024-01-02");
        assert!(matches!(again, Err(LedgerError::Duplicate(_))));

        let same_nick = registry.open("Cash", "Liabilities:Cash", AccountType::Liability, "2024-01-02");
        assert!(matches!(same_nick, Err(LedgerError::Duplicate(_))));
    }

    #[test]
    fn test_resolve_accepts_either_name() {
        let (_dir, registry) = registry();
        registry
            .open("Checking", "Assets:Bank:Checking", AccountType::Asset, "2024-01-01")
            .unwrap();

        assert_eq!(registry.resolve("Checking").unwrap(), "Assets:Bank:Checking");
        assert_eq!(registry.resolve("Assets:Bank:Checking").unwrap(), "Assets:Bank:Checking");
        assert_eq!(registry.resolve("Equity:Opening").unwrap(), "Equity:Opening");
    }

    #[test]
    fn test_close_blocked_by_references() {
        let (_dir, registry) = registry();
        registry
            .open("Cash", "Assets:Cash", AccountType::Asset, "2024-01-01")
            .unwrap();
        let file = registry.paths.account_file(AccountType::Asset);
        let before = fs::read_to_string(&file).unwrap();

        let result = registry.close("Cash", "2024-02-01", |_| Ok(true));
        assert!(matches!(result, Err(LedgerError::HasTransactions(ref a)) if a == "Assets:Cash"));
        assert_eq!(fs::read_to_string(&file).unwrap(), before);
    }

    #[test]
    fn test_close_hides_account_and_keeps_history() {
        let (_dir, registry) = registry();
        registry
            .open("Cash", "Assets:Cash", AccountType::Asset, "2024-01-01")
            .unwrap();
        registry.close("Cash", "2024-02-01", |_| Ok(false)).unwrap();

        assert!(registry.list().unwrap().is_empty());
        let text = fs::read_to_string(registry.paths.account_file(AccountType::Asset)).unwrap();
        assert!(text.contains("open Assets:Cash"));
        assert!(text.ends_with("2024-02-01 close Assets:Cash\n"));

        let reopen = registry.open("Cash", "Assets:Cash", AccountType::Asset, "2024-03-01");
        assert!(matches!(reopen, Err(LedgerError::Duplicate(_))));

        let missing = registry.close("Cash", "2024-03-01", |_| Ok(false));
        assert!(matches!(missing, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_nickname_falls_back_to_last_segment() {
        let text = "2024-01-01 open Assets:Bank:Savings CNY\n\
                    2024-01-01 open Assets:Bank:Savings2\n\
                    2024-01-01 note Assets:Bank:Savings2 \"Rainy day\"\n\
                    2024-01-01 open Assets:Old\n\
                    2024-06-01 close Assets:Old\n";
        let accounts = parse_accounts(text, AccountType::Asset);
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].nickname, "Savings");
        assert_eq!(accounts[1].nickname, "Rainy day");
    }

    #[test]
    fn test_canonical_names() {
        assert!(is_canonical_name("Equity:Opening"));
        assert!(is_canonical_name("Assets:Bank:Checking"));
        assert!(!is_canonical_name("Checking"));
        assert!(!is_canonical_name("Stuff:Things"));
        assert!(!is_canonical_name("Assets:"));
    }
}
