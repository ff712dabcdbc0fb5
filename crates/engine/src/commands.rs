//! Command structs for engine operations.
//!
//! These types group parameters for write operations (account creation,
//! transaction create/update, splits), keeping call sites readable and
//! avoiding long argument lists.

use crate::{
    DateResolver, MoneyCents, ResultEngine, Transaction,
    transactions::validate_amounts,
};

/// Create a bank account.
#[derive(Clone, Debug)]
pub struct NewBankAccount {
    pub name: String,
    pub account_number: String,
    pub initial_amount: MoneyCents,
}

impl NewBankAccount {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        account_number: impl Into<String>,
        initial_amount: MoneyCents,
    ) -> Self {
        Self {
            name: name.into(),
            account_number: account_number.into(),
            initial_amount,
        }
    }
}

/// A transaction that has not been persisted (nor numbered) yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionDraft {
    pub bank_account_id: String,
    pub transaction_date: String,
    pub income: MoneyCents,
    pub expense: MoneyCents,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl TransactionDraft {
    #[must_use]
    pub fn income(
        bank_account_id: impl Into<String>,
        transaction_date: impl Into<String>,
        amount: MoneyCents,
    ) -> Self {
        Self {
            bank_account_id: bank_account_id.into(),
            transaction_date: transaction_date.into(),
            income: amount,
            expense: MoneyCents::ZERO,
            description: None,
            category: None,
        }
    }

    #[must_use]
    pub fn expense(
        bank_account_id: impl Into<String>,
        transaction_date: impl Into<String>,
        amount: MoneyCents,
    ) -> Self {
        Self {
            bank_account_id: bank_account_id.into(),
            transaction_date: transaction_date.into(),
            income: MoneyCents::ZERO,
            expense: amount,
            description: None,
            category: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Check the draft and build the record it will be stored as: canonical
    /// date, trimmed texts, no id and no number yet.
    pub(crate) fn to_record(&self, dates: &DateResolver) -> ResultEngine<Transaction> {
        validate_amounts(self.income, self.expense)?;
        let transaction_date = dates.canonicalize(&self.transaction_date)?;
        Ok(Transaction {
            id: String::new(),
            bank_account_id: self.bank_account_id.clone(),
            transaction_number: None,
            transaction_date,
            income: self.income,
            expense: self.expense,
            description: normalize_optional_text(self.description.as_deref()),
            category: normalize_optional_text(self.category.as_deref()),
            has_splits: false,
        })
    }
}

/// Partial update of a transaction. `None` leaves a field untouched; an empty
/// string clears `description` / `category`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionPatch {
    pub bank_account_id: Option<String>,
    pub transaction_date: Option<String>,
    pub income: Option<MoneyCents>,
    pub expense: Option<MoneyCents>,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl TransactionPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bank_account_id(mut self, id: impl Into<String>) -> Self {
        self.bank_account_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn transaction_date(mut self, date: impl Into<String>) -> Self {
        self.transaction_date = Some(date.into());
        self
    }

    /// Turn the transaction into an income of `amount`.
    #[must_use]
    pub fn income(mut self, amount: MoneyCents) -> Self {
        self.income = Some(amount);
        self.expense = Some(MoneyCents::ZERO);
        self
    }

    /// Turn the transaction into an expense of `amount`.
    #[must_use]
    pub fn expense(mut self, amount: MoneyCents) -> Self {
        self.expense = Some(amount);
        self.income = Some(MoneyCents::ZERO);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Apply the patch on top of `existing`. The transaction number is kept
    /// verbatim, even when the bank account changes.
    pub(crate) fn apply(
        &self,
        existing: &Transaction,
        dates: &DateResolver,
    ) -> ResultEngine<Transaction> {
        let income = self.income.unwrap_or(existing.income);
        let expense = self.expense.unwrap_or(existing.expense);
        validate_amounts(income, expense)?;

        let transaction_date = match &self.transaction_date {
            Some(raw) => dates.canonicalize(raw)?,
            None => existing.transaction_date.clone(),
        };
        let category = if existing.has_splits {
            None
        } else {
            apply_optional_text_patch(existing.category.clone(), self.category.as_deref())
        };

        Ok(Transaction {
            id: existing.id.clone(),
            bank_account_id: self
                .bank_account_id
                .clone()
                .unwrap_or_else(|| existing.bank_account_id.clone()),
            transaction_number: existing.transaction_number.clone(),
            transaction_date,
            income,
            expense,
            description: apply_optional_text_patch(
                existing.description.clone(),
                self.description.as_deref(),
            ),
            category,
            has_splits: existing.has_splits,
        })
    }
}

/// One split of a transaction, in the order it should be stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitDraft {
    pub amount: MoneyCents,
    pub category: Option<String>,
    pub description: Option<String>,
}

impl SplitDraft {
    #[must_use]
    pub fn new(amount: MoneyCents) -> Self {
        Self {
            amount,
            category: None,
            description: None,
        }
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub(crate) fn normalize_optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn apply_optional_text_patch(existing: Option<String>, patch: Option<&str>) -> Option<String> {
    match patch {
        None => existing,
        Some(value) => normalize_optional_text(Some(value)),
    }
}
