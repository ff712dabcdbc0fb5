use serde_json::Value;

use crate::{
    EngineError, ResultEngine, SplitDraft, TransactionSplit,
    commands::normalize_optional_text,
    splits::TRANSACTION_ID,
    store::{self, Direction, Fields, Filter, Query, TRANSACTION_SPLITS, TRANSACTIONS},
};

use super::Engine;

impl Engine {
    /// Replace the splits of a transaction with `drafts`, in order.
    ///
    /// Old splits are removed, the new ones get `split_index` 0, 1, ... and
    /// the parent's direct `category` is cleared, all in one atomic batch.
    /// An empty `drafts` only removes the existing splits.
    pub async fn replace_splits(
        &self,
        transaction_id: &str,
        drafts: Vec<SplitDraft>,
    ) -> ResultEngine<Vec<TransactionSplit>> {
        self.require_transaction(transaction_id).await?;
        if let Some(position) = drafts.iter().position(|d| !d.amount.is_positive()) {
            return Err(EngineError::InvalidAmount(format!(
                "split {position} must have a positive amount"
            )));
        }

        let existing = self
            .store
            .query(
                TRANSACTION_SPLITS,
                &Query::new().filter(Filter::eq(TRANSACTION_ID, transaction_id)),
            )
            .await?;

        let mut batch = self.store.batch();
        for doc in &existing {
            batch.delete(TRANSACTION_SPLITS, doc.id.clone())?;
        }

        let mut splits = Vec::with_capacity(drafts.len());
        for (split_index, draft) in (0u32..).zip(drafts) {
            let split = TransactionSplit {
                id: store::new_id(),
                transaction_id: transaction_id.to_string(),
                split_index,
                amount: draft.amount,
                category: normalize_optional_text(draft.category.as_deref()),
                description: normalize_optional_text(draft.description.as_deref()),
            };
            batch.add(TRANSACTION_SPLITS, split.id.clone(), store::encode(&split)?)?;
            splits.push(split);
        }

        let mut parent = Fields::new();
        parent.insert("category".to_string(), Value::Null);
        parent.insert("has_splits".to_string(), Value::Bool(!splits.is_empty()));
        batch.update(TRANSACTIONS, transaction_id, parent)?;

        self.store.commit(batch).await?;
        tracing::info!(
            "transaction {transaction_id}: {} split(s) replaced by {}",
            existing.len(),
            splits.len()
        );
        Ok(splits)
    }

    /// Splits of a transaction ordered by `split_index`.
    pub async fn splits(&self, transaction_id: &str) -> ResultEngine<Vec<TransactionSplit>> {
        let docs = self
            .store
            .query(
                TRANSACTION_SPLITS,
                &Query::new()
                    .filter(Filter::eq(TRANSACTION_ID, transaction_id))
                    .order_by("split_index", Direction::Asc),
            )
            .await?;
        Ok(store::decode_all(TRANSACTION_SPLITS, docs).0)
    }
}
