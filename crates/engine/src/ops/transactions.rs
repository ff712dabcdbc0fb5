use crate::{
    ResultEngine, Transaction, TransactionDraft, TransactionPatch,
    balances::sort_for_balance,
    splits::TRANSACTION_ID,
    store::{self, Filter, Query, TRANSACTION_SPLITS, TRANSACTIONS},
};

use super::Engine;

impl Engine {
    /// Create a transaction with a freshly allocated number.
    ///
    /// The bank account must exist. When numbering degrades (see
    /// [`AllocatedNumber::degraded`](crate::AllocatedNumber::degraded)) the
    /// transaction is still created and a warning is logged.
    pub async fn create_transaction(&self, draft: TransactionDraft) -> ResultEngine<Transaction> {
        let mut record = draft.to_record(&self.dates)?;
        self.require_account(&record.bank_account_id).await?;

        let number = self
            .allocator()
            .allocate(&record.bank_account_id, &record.transaction_date)
            .await?;
        if number.degraded {
            tracing::warn!(
                "transaction on account {} got degraded number {}",
                record.bank_account_id,
                number.number
            );
        }
        record.transaction_number = Some(number.number);
        record.id = self
            .store
            .add(TRANSACTIONS, store::encode(&record)?)
            .await?;

        let year = self.dates.year(&record.transaction_date).ok();
        self.refresh_account(&record.bank_account_id, year).await?;
        Ok(record)
    }

    /// Apply `patch` to a transaction. The transaction number is never
    /// changed, not even when the transaction moves to another account.
    pub async fn update_transaction(
        &self,
        transaction_id: &str,
        patch: TransactionPatch,
    ) -> ResultEngine<Transaction> {
        let existing = self.require_transaction(transaction_id).await?;
        let updated = patch.apply(&existing, &self.dates)?;
        let moved = updated.bank_account_id != existing.bank_account_id;
        if moved {
            self.require_account(&updated.bank_account_id).await?;
            tracing::info!(
                "transaction {transaction_id} moved from account {} to {}, keeping number {:?}",
                existing.bank_account_id,
                updated.bank_account_id,
                updated.transaction_number
            );
        }

        self.store
            .update(TRANSACTIONS, transaction_id, store::encode(&updated)?)
            .await?;

        let old_year = self.dates.year(&existing.transaction_date).ok();
        let new_year = self.dates.year(&updated.transaction_date).ok();
        if moved {
            self.refresh_account(&existing.bank_account_id, old_year).await?;
            self.refresh_account(&updated.bank_account_id, new_year).await?;
        } else {
            let from_year = match (old_year, new_year) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            };
            self.refresh_account(&updated.bank_account_id, from_year).await?;
        }
        Ok(updated)
    }

    /// Delete a transaction and its splits.
    ///
    /// Everything goes out in one atomic batch when it fits the store's batch
    /// limit. Otherwise the splits are deleted in full batches first and the
    /// parent last, so a failure never leaves splits without their parent.
    pub async fn delete_transaction(&self, transaction_id: &str) -> ResultEngine<()> {
        let existing = self.require_transaction(transaction_id).await?;
        let splits = self
            .store
            .query(
                TRANSACTION_SPLITS,
                &Query::new().filter(Filter::eq(TRANSACTION_ID, transaction_id)),
            )
            .await?;

        let limit = self.store.max_batch_ops().max(1);
        let mut pending: Vec<String> = splits.iter().map(|split| split.id.clone()).collect();
        while pending.len() >= limit {
            let mut batch = self.store.batch();
            for split_id in pending.drain(..limit) {
                batch.delete(TRANSACTION_SPLITS, split_id)?;
            }
            self.store.commit(batch).await?;
        }

        let mut batch = self.store.batch();
        for split_id in pending {
            batch.delete(TRANSACTION_SPLITS, split_id)?;
        }
        batch.delete(TRANSACTIONS, transaction_id)?;
        self.store.commit(batch).await?;
        tracing::info!(
            "transaction {transaction_id} deleted with {} split(s)",
            splits.len()
        );

        let year = self.dates.year(&existing.transaction_date).ok();
        self.refresh_account(&existing.bank_account_id, year).await?;
        Ok(())
    }

    /// Return a transaction snapshot.
    pub async fn transaction(&self, transaction_id: &str) -> ResultEngine<Transaction> {
        self.require_transaction(transaction_id).await
    }

    /// Transactions of one account in balance order.
    pub async fn transactions_for_account(&self, account_id: &str) -> ResultEngine<Vec<Transaction>> {
        self.require_account(account_id).await?;
        let transactions = self.load_account_transactions(account_id).await?;
        Ok(sort_for_balance(&transactions, &self.dates)
            .transactions
            .into_iter()
            .cloned()
            .collect())
    }
}
