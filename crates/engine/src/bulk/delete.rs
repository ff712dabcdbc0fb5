use std::sync::Arc;

use serde_json::Value;

use crate::{
    DateResolver, ResultEngine,
    settings::RetrySettings,
    splits::TRANSACTION_ID,
    store::{DocumentStore, Filter, Query, TRANSACTION_SPLITS, TRANSACTIONS},
    transactions::BANK_ACCOUNT_ID,
};

use super::{
    BulkOptions, BulkOutcome, BulkWriteCoordinator, ChunkReport, DELETING_STEP, Indexed,
    ItemOutcome, Tally, drive, into_chunks, retry_with_backoff,
};

struct PendingDelete {
    index: usize,
    id: String,
}

impl Indexed for PendingDelete {
    fn index(&self) -> usize {
        self.index
    }
}

/// A parent transaction that exists and is about to be deleted.
struct Parent {
    index: usize,
    id: String,
    bank_account_id: Option<String>,
    year: Option<i32>,
}

impl BulkWriteCoordinator {
    /// Delete transactions together with their splits. Ids that do not exist
    /// are reported as failed items.
    pub async fn delete_many(
        &self,
        ids: &[String],
        options: &BulkOptions,
    ) -> ResultEngine<BulkOutcome> {
        let total = ids.len();
        let strategy = self.select_strategy(total);
        let retry = self.retry_settings(options);
        tracing::info!("deleting {total} transactions ({strategy:?})");

        let mut tally = Tally::new(total, Some(DELETING_STEP), options.on_progress.as_ref());
        let pending = ids
            .iter()
            .enumerate()
            .map(|(index, id)| PendingDelete {
                index,
                id: id.clone(),
            })
            .collect();

        let (chunk_size, plan) = self.plan(strategy, total);
        let store = &self.store;
        let dates = &self.dates;
        drive(into_chunks(pending, chunk_size), plan, options, &mut tally, |chunk| {
            delete_chunk(Arc::clone(store), dates.clone(), retry.clone(), chunk)
        })
        .await;

        let outcome = tally.finish(strategy);
        tracing::info!(
            "bulk delete finished: {} deleted, {} failed",
            outcome.success,
            outcome.failed
        );
        Ok(outcome)
    }
}

/// Splits first (best effort), then the parents in one atomic batch, then one
/// by one if that batch cannot be committed.
async fn delete_chunk(
    store: Arc<dyn DocumentStore>,
    dates: DateResolver,
    retry: RetrySettings,
    chunk: Vec<PendingDelete>,
) -> ChunkReport {
    let mut report = ChunkReport::default();
    let store = store.as_ref();

    let mut parents = Vec::with_capacity(chunk.len());
    for PendingDelete { index, id } in chunk {
        let found = retry_with_backoff(&retry, "transaction read", || store.get(TRANSACTIONS, &id)).await;
        match found {
            Ok(Some(doc)) => {
                let text = |field: &str| doc.get(field).and_then(Value::as_str).map(str::to_string);
                parents.push(Parent {
                    index,
                    bank_account_id: text(BANK_ACCOUNT_ID),
                    year: text("transaction_date").and_then(|date| dates.year(&date).ok()),
                    id,
                });
            }
            Ok(None) => report.outcomes.push((
                index,
                ItemOutcome::Failed {
                    reason: format!("transaction {id} not found"),
                },
            )),
            Err(err) => report.outcomes.push((
                index,
                ItemOutcome::Failed {
                    reason: err.to_string(),
                },
            )),
        }
    }
    if parents.is_empty() {
        return report;
    }

    if let Err(warning) = delete_splits(store, &retry, &parents).await {
        tracing::warn!("{warning}");
        report.warnings.push(warning);
    }

    let mut batch = store.batch();
    let mut staged = Ok(());
    for parent in &parents {
        if let Err(err) = batch.delete(TRANSACTIONS, parent.id.clone()) {
            staged = Err(err);
            break;
        }
    }
    let committed = match staged {
        Ok(()) => {
            tracing::debug!("committing deletion of {} transactions", parents.len());
            retry_with_backoff(&retry, "transaction delete commit", || {
                store.commit(batch.clone())
            })
            .await
        }
        Err(err) => Err(err),
    };

    match committed {
        Ok(()) => {
            for parent in parents {
                settle_deleted(&mut report, parent);
            }
        }
        Err(err) => {
            tracing::warn!("batch delete failed ({err}), deleting one by one");
            for parent in parents {
                let deleted = retry_with_backoff(&retry, "transaction delete", || {
                    store.delete(TRANSACTIONS, &parent.id)
                })
                .await;
                match deleted {
                    Ok(()) => settle_deleted(&mut report, parent),
                    Err(err) => report.outcomes.push((
                        parent.index,
                        ItemOutcome::Failed {
                            reason: err.to_string(),
                        },
                    )),
                }
            }
        }
    }
    report
}

fn settle_deleted(report: &mut ChunkReport, parent: Parent) {
    if let Some(account_id) = parent.bank_account_id {
        report.touched.push((account_id, parent.year));
    }
    report
        .outcomes
        .push((parent.index, ItemOutcome::Deleted { id: parent.id }));
}

/// Delete every split of `parents`. Returns a warning instead of failing.
async fn delete_splits(
    store: &dyn DocumentStore,
    retry: &RetrySettings,
    parents: &[Parent],
) -> Result<(), String> {
    let query = Query::new().filter(Filter::is_in(
        TRANSACTION_ID,
        parents.iter().map(|parent| parent.id.as_str()),
    ));
    let splits = retry_with_backoff(retry, "split lookup", || {
        store.query(TRANSACTION_SPLITS, &query)
    })
    .await
    .map_err(|err| format!("could not look up splits: {err}"))?;

    let mut problems = Vec::new();
    for chunk in into_chunks(splits, store.max_batch_ops()) {
        let mut batch = store.batch();
        for split in &chunk {
            if let Err(err) = batch.delete(TRANSACTION_SPLITS, split.id.clone()) {
                problems.push(err.to_string());
            }
        }
        if let Err(err) = retry_with_backoff(retry, "split delete commit", || {
            store.commit(batch.clone())
        })
        .await
        {
            problems.push(format!("{} split(s) not deleted: {err}", chunk.len()));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}
