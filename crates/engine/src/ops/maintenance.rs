use crate::{
    MoneyCents, ResultEngine,
    consistency::{ConsistencyValidator, ValidationReport},
    year_end::InitializeSummary,
};

use super::Engine;

impl Engine {
    /// Rebuild the year-end cache of every account from full history.
    pub async fn initialize_year_end_balances(&self) -> ResultEngine<InitializeSummary> {
        self.year_end_cache().initialize_all().await
    }

    /// Compare every cached year-end balance against history. Reports only.
    pub async fn validate_year_end_balances(&self) -> ResultEngine<ValidationReport> {
        self.year_end_cache().validate_all().await
    }

    /// Cached closing balance of `account_id` for `year`.
    pub async fn year_end_balance(
        &self,
        account_id: &str,
        year: i32,
    ) -> ResultEngine<Option<MoneyCents>> {
        self.year_end_cache().get(account_id, year).await
    }

    /// Cross-check the two ways of computing each account's balance.
    pub async fn validate_consistency(&self) -> ResultEngine<ValidationReport> {
        let accounts = self.load_all_accounts().await?;
        let transactions = self.load_all_transactions().await?;
        let report = ConsistencyValidator::new(&self.dates, self.settings.balance_tolerance)
            .validate(&transactions, &accounts);
        if !report.is_valid {
            tracing::error!("{} balance inconsistencies found", report.errors.len());
        }
        Ok(report)
    }

    /// Compare the stored `current_balance` of each account with its
    /// transactions.
    pub async fn validate_current_balances(&self) -> ResultEngine<ValidationReport> {
        let accounts = self.load_all_accounts().await?;
        let transactions = self.load_all_transactions().await?;
        let report = ConsistencyValidator::new(&self.dates, self.settings.balance_tolerance)
            .validate_current_balances(&transactions, &accounts);
        if !report.is_valid {
            tracing::warn!("{} stale current balance(s)", report.errors.len());
        }
        Ok(report)
    }
}
