//! Cross-checks between balance computations.

use crate::{
    BankAccount, DateResolver, MoneyCents, Transaction,
    balances::{net_amount, running_balances},
};

/// Outcome of a validation pass. Problems are reported, never corrected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

pub struct ConsistencyValidator<'a> {
    dates: &'a DateResolver,
    tolerance: MoneyCents,
}

impl<'a> ConsistencyValidator<'a> {
    pub fn new(dates: &'a DateResolver, tolerance: MoneyCents) -> Self {
        Self { dates, tolerance }
    }

    /// Compare, for every account, `initial + Σ net` against the last value of
    /// the running-balance accumulator. A mismatch points at the calculator,
    /// not at the data.
    pub fn validate(&self, transactions: &[Transaction], accounts: &[BankAccount]) -> ValidationReport {
        let mut errors = Vec::new();
        for account in accounts {
            let own: Vec<&Transaction> = transactions
                .iter()
                .filter(|t| t.bank_account_id == account.id)
                .collect();
            let closed_form =
                account.initial_amount + own.iter().map(|t| net_amount(t)).sum::<MoneyCents>();
            let accumulated = running_balances(own, account.initial_amount, self.dates).closing;

            if closed_form.differs_from(accumulated, self.tolerance) {
                errors.push(format!(
                    "Account {}: expected balance {closed_form} but running balance is {accumulated}",
                    account.name
                ));
            }
        }
        ValidationReport::from_errors(errors)
    }

    /// Compare each account's stored `current_balance` with the balance its
    /// transactions add up to.
    pub fn validate_current_balances(
        &self,
        transactions: &[Transaction],
        accounts: &[BankAccount],
    ) -> ValidationReport {
        let mut errors = Vec::new();
        for account in accounts {
            let computed = account.initial_amount
                + transactions
                    .iter()
                    .filter(|t| t.bank_account_id == account.id)
                    .map(net_amount)
                    .sum::<MoneyCents>();
            if computed.differs_from(account.current_balance, self.tolerance) {
                errors.push(format!(
                    "Account {}: computed balance {computed} but stored current balance is {}",
                    account.name, account.current_balance
                ));
            }
        }
        ValidationReport::from_errors(errors)
    }
}
