//! Split records.
//!
//! A split assigns part of a transaction's amount to its own category. A
//! transaction either carries a direct `category` or a set of splits, never
//! both.

use serde::{Deserialize, Serialize};

use crate::MoneyCents;

pub(crate) const TRANSACTION_ID: &str = "transaction_id";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSplit {
    pub id: String,
    pub transaction_id: String,
    /// Position of the split inside its transaction.
    pub split_index: u32,
    pub amount: MoneyCents,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
