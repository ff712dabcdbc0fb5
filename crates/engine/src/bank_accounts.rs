//! The module contains the `BankAccount` record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::MoneyCents;

/// A bank account tracked by the ledger.
///
/// `current_balance` and `year_end_balances` are denormalized caches: the
/// engine rewrites them after every mutation touching the account, and the
/// validators compare them against the transaction log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: String,
    pub name: String,
    /// Only its last four digits matter to the ledger (transaction numbers).
    pub account_number: String,
    /// Balance before the first transaction.
    pub initial_amount: MoneyCents,
    #[serde(default)]
    pub current_balance: MoneyCents,
    /// Fiscal year -> balance as of 31 December of that year.
    #[serde(default)]
    pub year_end_balances: BTreeMap<i32, MoneyCents>,
}

impl BankAccount {
    pub fn new(
        name: impl Into<String>,
        account_number: impl Into<String>,
        initial_amount: MoneyCents,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            account_number: account_number.into(),
            initial_amount,
            current_balance: initial_amount,
            year_end_balances: BTreeMap::new(),
        }
    }

    /// Cached closing balance of `year`, if any.
    #[must_use]
    pub fn year_end_balance(&self, year: i32) -> Option<MoneyCents> {
        self.year_end_balances.get(&year).copied()
    }
}
