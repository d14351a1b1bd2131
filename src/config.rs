// ⚙️ Configuration - data directory layout and engine settings

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::AccountType;

// ============================================================================
// LEDGER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Root of the journal tree and the database files
    pub data_dir: PathBuf,

    /// SQLite file name, relative to data_dir
    pub database_file: String,

    /// JSON snapshot used when SQLite is unavailable
    pub fallback_file: String,

    pub default_currency: String,

    /// Largest absolute posting sum still accepted as balanced
    pub balance_tolerance: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            data_dir: PathBuf::from("data"),
            database_file: "transactions.db".to_string(),
            fallback_file: "transactions.json".to_string(),
            default_currency: "CNY".to_string(),
            balance_tolerance: 0.001,
        }
    }
}

impl LedgerConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        LedgerConfig {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by BEAN_LEDGER_DATA_DIR / BEAN_LEDGER_CURRENCY
    pub fn from_env() -> Self {
        let mut config = LedgerConfig::default();
        if let Ok(dir) = std::env::var("BEAN_LEDGER_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(currency) = std::env::var("BEAN_LEDGER_CURRENCY") {
            if !currency.trim().is_empty() {
                config.default_currency = currency.trim().to_string();
            }
        }
        config
    }

    /// Read a JSON config file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn paths(&self) -> LedgerPaths {
        LedgerPaths::new(&self.data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn fallback_path(&self) -> PathBuf {
        self.data_dir.join(&self.fallback_file)
    }
}

// ============================================================================
// FILE LAYOUT
// ============================================================================

/// Every file location of the plain-text projection
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPaths {
    pub root: PathBuf,
}

impl LedgerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LedgerPaths { root: root.into() }
    }

    pub fn main_file(&self) -> PathBuf {
        self.root.join("main.bean")
    }

    pub fn accounts_dir(&self) -> PathBuf {
        self.root.join("accounts")
    }

    pub fn account_file(&self, account_type: AccountType) -> PathBuf {
        self.accounts_dir().join(account_type.file_name())
    }

    pub fn equity_file(&self) -> PathBuf {
        self.accounts_dir().join("equity.bean")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("date")
    }

    /// The index that includes every month file
    pub fn journal_index(&self) -> PathBuf {
        self.journal_dir().join("date.bean")
    }

    pub fn month_file(&self, year: &str, month: &str) -> PathBuf {
        self.journal_dir()
            .join(year)
            .join(format!("{}-{}.bean", year, month))
    }

    /// Create whatever part of the layout is missing. Existing files are
    /// left untouched.
    pub fn ensure_layout(&self, currency: &str) -> Result<()> {
        fs::create_dir_all(self.accounts_dir())?;
        fs::create_dir_all(self.journal_dir())?;

        for account_type in AccountType::ALL {
            write_if_missing(
                &self.account_file(account_type),
                &format!("; {} accounts\n", account_type.as_str()),
            )?;
        }
        write_if_missing(&self.equity_file(), "; equity accounts\n")?;
        write_if_missing(&self.journal_index(), "; transactions\n\n")?;
        write_if_missing(
            &self.main_file(),
            &format!(
                "option \"operating_currency\" \"{}\"\n\n\
                 include \"accounts/assets.bean\"\n\
                 include \"accounts/liabilities.bean\"\n\
                 include \"accounts/equity.bean\"\n\
                 include \"accounts/income.bean\"\n\
                 include \"accounts/expenses.bean\"\n\
                 include \"date/date.bean\"\n",
                currency
            ),
        )?;

        Ok(())
    }
}

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if !path.exists() {
        fs::write(path, content)?;
    }
    Ok(())
}
