// Bean Ledger - Core Library
// Double-entry ledger backed by SQLite, projected to plain-text journal files

pub mod config;
pub mod error;
pub mod model;
pub mod parser;         // Journal text → directives
pub mod accounts;       // Account registry (open/close/note files)
pub mod balance;        // Checkpoint-aware balance engine
pub mod store;          // Storage trait + tiered routing
pub mod db;             // SQLite primary tier
pub mod fallback;       // JSON snapshot tier
pub mod projection;     // Store → journal text
pub mod reconciliation; // Store ↔ journal sync
pub mod manager;        // Ledger handle

// Re-export commonly used types
pub use config::{LedgerConfig, LedgerPaths};
pub use error::{LedgerError, Result};
pub use model::{
    AccountInfo, AccountType, BalanceSummary, MonthlyStat, Posting,
    Transaction, TransactionInput, TransactionType,
};
pub use parser::{
    parse_journal, load_journal, stable_hash,
    Directive, DirectiveKind, Directives, JournalParse,
};
pub use accounts::{AccountEntry, AccountRegistry, AccountResolver};
pub use balance::{compute_balance, AccountPosting, RunningBalance};
pub use store::{TieredStore, TransactionQuery, TransactionStore};
pub use db::SqliteStore;
pub use fallback::JsonStore;
pub use projection::{render_transaction, write_projection, ProjectionReport};
pub use reconciliation::{SyncEngine, SyncPlan, SyncReport};
pub use manager::Ledger;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
