use crate::{
    ResultEngine, TransactionDraft,
    bulk::{BulkOptions, BulkOutcome, Progress, RECALCULATING_STEP},
};

use super::Engine;

impl Engine {
    /// Create many transactions, then refresh the balances of the accounts
    /// they landed on.
    pub async fn create_transactions(
        &self,
        drafts: &[TransactionDraft],
        options: BulkOptions,
    ) -> ResultEngine<BulkOutcome> {
        let mut outcome = self.coordinator().create_many(drafts, &options).await?;
        self.refresh_affected(&mut outcome).await;
        Ok(outcome)
    }

    /// Delete many transactions with their splits, then refresh the balances
    /// of the accounts they belonged to.
    pub async fn delete_transactions(
        &self,
        transaction_ids: &[String],
        options: BulkOptions,
    ) -> ResultEngine<BulkOutcome> {
        let mut outcome = self
            .coordinator()
            .delete_many(transaction_ids, &options)
            .await?;
        if let Some(callback) = &options.on_progress {
            let total = transaction_ids.len();
            callback(Progress::new(
                total,
                total,
                Some(RECALCULATING_STEP.to_string()),
            ));
        }
        self.refresh_affected(&mut outcome).await;
        Ok(outcome)
    }

    /// Refresh every account in `outcome.affected`. Failures become warnings:
    /// the writes already happened.
    async fn refresh_affected(&self, outcome: &mut BulkOutcome) {
        for (account_id, from_year) in outcome.affected.clone() {
            if let Err(err) = self.refresh_account(&account_id, from_year).await {
                tracing::warn!("balance refresh of account {account_id} failed: {err}");
                outcome
                    .warnings
                    .push(format!("balance refresh of account {account_id} failed: {err}"));
            }
        }
    }
}
