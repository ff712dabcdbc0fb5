//! Transaction records and their numbering format.
//!
//! A transaction moves money in or out of one bank account: exactly one of
//! `income` / `expense` is positive. Its `transaction_number` has the form
//! `TXN-YYYY-NNNN-SSSS` (year, last four digits of the account number,
//! per-account-per-year sequence).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{EngineError, MoneyCents, ResultEngine};

pub(crate) const BANK_ACCOUNT_ID: &str = "bank_account_id";
pub(crate) const TRANSACTION_NUMBER: &str = "transaction_number";

/// Highest sequence the four-digit field can hold.
pub const MAX_SEQUENCE: u32 = 9999;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub bank_account_id: String,
    /// Missing on records imported before numbering existed.
    #[serde(default)]
    pub transaction_number: Option<String>,
    /// As stored. Records written by the engine use `YYYY-MM-DD`.
    pub transaction_date: String,
    #[serde(default)]
    pub income: MoneyCents,
    #[serde(default)]
    pub expense: MoneyCents,
    #[serde(default)]
    pub description: Option<String>,
    /// Direct categorization; cleared once the transaction has splits.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub has_splits: bool,
}

impl Transaction {
    /// `income - expense`.
    #[must_use]
    pub fn net_amount(&self) -> MoneyCents {
        self.income - self.expense
    }

    /// The parsed number, when present and well formed.
    #[must_use]
    pub fn number(&self) -> Option<TransactionNumber> {
        self.transaction_number
            .as_deref()
            .and_then(|raw| raw.parse().ok())
    }
}

/// Enforce the amount invariant of canonical records.
pub(crate) fn validate_amounts(income: MoneyCents, expense: MoneyCents) -> ResultEngine<()> {
    if income.is_negative() || expense.is_negative() {
        return Err(EngineError::Validation(
            "income and expense must not be negative".to_string(),
        ));
    }
    if income.is_positive() && expense.is_positive() {
        return Err(EngineError::Validation(
            "a transaction cannot have both an income and an expense".to_string(),
        ));
    }
    if income.is_zero() && expense.is_zero() {
        return Err(EngineError::Validation(
            "a transaction needs either an income or an expense".to_string(),
        ));
    }
    Ok(())
}

/// A parsed `TXN-YYYY-NNNN-SSSS` number.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionNumber {
    pub year: i32,
    pub account_suffix: String,
    pub sequence: u32,
}

impl TransactionNumber {
    /// `TXN-{year}-{suffix}-`, the prefix shared by one (account, year) scope.
    #[must_use]
    pub fn prefix(year: i32, account_suffix: &str) -> String {
        format!("TXN-{year:04}-{account_suffix}-")
    }

    /// Last four digits of `account_number`, left-padded with zeros. Non-digit
    /// characters are ignored; an account number without digits yields `0000`.
    #[must_use]
    pub fn account_suffix(account_number: &str) -> String {
        let digits: Vec<char> = account_number.chars().filter(char::is_ascii_digit).collect();
        let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
        format!("{tail:0>4}")
    }
}

impl fmt::Display for TransactionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}",
            Self::prefix(self.year, &self.account_suffix),
            self.sequence
        )
    }
}

impl FromStr for TransactionNumber {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::Validation(format!("invalid transaction number: {s}"));
        let four_digits = |part: &str| part.len() == 4 && part.bytes().all(|b| b.is_ascii_digit());

        let mut parts = s.split('-');
        let (Some("TXN"), Some(year), Some(suffix), Some(sequence), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };
        if !four_digits(year) || !four_digits(suffix) || !four_digits(sequence) {
            return Err(invalid());
        }

        Ok(Self {
            year: year.parse().map_err(|_| invalid())?,
            account_suffix: suffix.to_string(),
            sequence: sequence.parse().map_err(|_| invalid())?,
        })
    }
}
