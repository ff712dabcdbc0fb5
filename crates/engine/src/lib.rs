//! Running-balance ledger for bank accounts.
//!
//! The [`Engine`] numbers, stores and deletes transactions through a
//! [`DocumentStore`], keeps each account's `current_balance` and year-end
//! balance cache in sync, and validates both against the transaction log.

pub use balances::{
    BalanceEntry, OptimizedBalances, RunningBalances, SortedTransactions, YearStart,
    YearStartSource,
};
pub use bank_accounts::BankAccount;
pub use bulk::{
    BulkOptions, BulkOutcome, BulkWriteCoordinator, CancellationFlag, ItemOutcome, Progress,
    ProgressFn, Strategy,
};
pub use commands::{NewBankAccount, SplitDraft, TransactionDraft, TransactionPatch};
pub use consistency::{ConsistencyValidator, ValidationReport};
pub use dates::{DateResolver, DateStrategy};
pub use error::EngineError;
pub use money::MoneyCents;
pub use numbering::{AllocatedNumber, TransactionNumberAllocator};
pub use ops::{Engine, EngineBuilder};
pub use settings::{LedgerSettings, ParallelSettings, RetrySettings};
pub use splits::TransactionSplit;
pub use store::{DocumentStore, MemoryStore, SqlStore};
pub use transactions::{MAX_SEQUENCE, Transaction, TransactionNumber};
pub use year_end::{InitializeSummary, YearEndBalanceCache};

pub mod balances;
mod bank_accounts;
pub mod bulk;
mod commands;
mod consistency;
mod dates;
mod error;
mod money;
mod numbering;
mod ops;
mod settings;
mod splits;
pub mod store;
mod transactions;
mod year_end;

pub type ResultEngine<T> = Result<T, EngineError>;
