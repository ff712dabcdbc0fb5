use std::{collections::BTreeSet, sync::Arc};

use crate::{
    DateResolver, EngineError, ResultEngine, Transaction, TransactionDraft,
    numbering::TransactionNumberAllocator,
    settings::RetrySettings,
    store::{self, BANK_ACCOUNTS, DocumentStore, TRANSACTIONS, WriteBatch},
};

use super::{
    BulkOptions, BulkOutcome, BulkWriteCoordinator, ChunkReport, Indexed, ItemOutcome, Strategy,
    Tally, drive, into_chunks, retry_with_backoff,
};

/// A validated draft waiting to be written.
struct PendingCreate {
    index: usize,
    record: Transaction,
}

impl Indexed for PendingCreate {
    fn index(&self) -> usize {
        self.index
    }
}

impl BulkWriteCoordinator {
    /// Create every draft. Fails before writing anything when a draft is
    /// invalid or references an unknown bank account; after that, failures
    /// are reported per item in the outcome.
    pub async fn create_many(
        &self,
        drafts: &[TransactionDraft],
        options: &BulkOptions,
    ) -> ResultEngine<BulkOutcome> {
        let records = self.validate_drafts(drafts).await?;
        let total = records.len();
        let strategy = self.select_strategy(total);
        let retry = self.retry_settings(options);
        tracing::info!("creating {total} transactions ({strategy:?})");

        let mut tally = Tally::new(total, None, options.on_progress.as_ref());
        let store = &self.store;
        let dates = &self.dates;

        if strategy == Strategy::Serial {
            let units = records
                .into_iter()
                .enumerate()
                .map(|(index, record)| vec![PendingCreate { index, record }])
                .collect();
            let (_, plan) = self.plan(strategy, total);
            drive(units, plan, options, &mut tally, |chunk| {
                create_one_by_one(Arc::clone(store), dates.clone(), retry.clone(), chunk)
            })
            .await;
        } else {
            // Numbers for the whole input are allocated up front so chunks
            // committed concurrently never compete for a sequence.
            let numbers = TransactionNumberAllocator::new(self.store.as_ref(), &self.dates)
                .allocate_batch(drafts)
                .await?;
            let mut pending = Vec::with_capacity(total);
            for (index, (mut record, number)) in records.into_iter().zip(numbers).enumerate() {
                if number.degraded {
                    tally.warn(format!(
                        "item {index}: degraded transaction number {}",
                        number.number
                    ));
                }
                record.transaction_number = Some(number.number);
                pending.push(PendingCreate { index, record });
            }

            let (chunk_size, plan) = self.plan(strategy, total);
            drive(into_chunks(pending, chunk_size), plan, options, &mut tally, |chunk| {
                create_atomically(Arc::clone(store), dates.clone(), retry.clone(), chunk)
            })
            .await;
        }

        let outcome = tally.finish(strategy);
        tracing::info!(
            "bulk create finished: {} created, {} failed",
            outcome.success,
            outcome.failed
        );
        Ok(outcome)
    }

    async fn validate_drafts(&self, drafts: &[TransactionDraft]) -> ResultEngine<Vec<Transaction>> {
        let mut records = Vec::with_capacity(drafts.len());
        let mut problems = Vec::new();
        for (index, draft) in drafts.iter().enumerate() {
            match draft.to_record(&self.dates) {
                Ok(record) => records.push(record),
                Err(err) => problems.push(format!("draft {index}: {err}")),
            }
        }

        let accounts: BTreeSet<&str> = drafts
            .iter()
            .map(|draft| draft.bank_account_id.as_str())
            .collect();
        for account_id in accounts {
            if self.store.get(BANK_ACCOUNTS, account_id).await?.is_none() {
                problems.push(format!("unknown bank account {account_id}"));
            }
        }

        if problems.is_empty() {
            Ok(records)
        } else {
            Err(EngineError::Validation(problems.join("; ")))
        }
    }
}

/// Serial path: number and commit each item on its own.
async fn create_one_by_one(
    store: Arc<dyn DocumentStore>,
    dates: DateResolver,
    retry: RetrySettings,
    chunk: Vec<PendingCreate>,
) -> ChunkReport {
    let mut report = ChunkReport::default();
    let allocator = TransactionNumberAllocator::new(store.as_ref(), &dates);
    for PendingCreate { index, mut record } in chunk {
        let number = match allocator
            .allocate(&record.bank_account_id, &record.transaction_date)
            .await
        {
            Ok(number) => number,
            Err(err) => {
                report.outcomes.push((
                    index,
                    ItemOutcome::Failed {
                        reason: err.to_string(),
                    },
                ));
                continue;
            }
        };
        if number.degraded {
            report.warnings.push(format!(
                "item {index}: degraded transaction number {}",
                number.number
            ));
        }
        record.transaction_number = Some(number.number.clone());

        let id = store::new_id();
        let mut batch = store.batch();
        let staged =
            store::encode(&record).and_then(|fields| batch.add(TRANSACTIONS, id.clone(), fields));
        let added = match staged {
            Ok(()) => {
                let ids = [id.as_str()];
                commit_creates(store.as_ref(), &retry, "transaction add", &batch, &ids).await
            }
            Err(err) => Err(err),
        };
        match added {
            Ok(()) => {
                report
                    .touched
                    .push((record.bank_account_id, dates.year(&record.transaction_date).ok()));
                report.outcomes.push((
                    index,
                    ItemOutcome::Created {
                        id,
                        transaction_number: number.number,
                    },
                ));
            }
            Err(err) => report.outcomes.push((
                index,
                ItemOutcome::Failed {
                    reason: err.to_string(),
                },
            )),
        }
    }
    report
}

/// Chunked paths: one atomic batch for the whole chunk, retried as a unit.
async fn create_atomically(
    store: Arc<dyn DocumentStore>,
    dates: DateResolver,
    retry: RetrySettings,
    chunk: Vec<PendingCreate>,
) -> ChunkReport {
    let mut report = ChunkReport::default();
    let mut batch = store.batch();
    let mut staged = Vec::with_capacity(chunk.len());
    let mut failure = None;

    for PendingCreate { index, record } in chunk {
        let id = store::new_id();
        let pushed =
            store::encode(&record).and_then(|fields| batch.add(TRANSACTIONS, id.clone(), fields));
        if let Err(err) = pushed {
            failure.get_or_insert(err);
        }
        staged.push((index, id, record));
    }

    let committed = match failure {
        Some(err) => Err(err),
        None => {
            tracing::debug!("committing chunk of {} transactions", staged.len());
            let ids: Vec<&str> = staged.iter().map(|(_, id, _)| id.as_str()).collect();
            commit_creates(store.as_ref(), &retry, "transaction chunk commit", &batch, &ids).await
        }
    };

    match committed {
        Ok(()) => {
            for (index, id, record) in staged {
                let year = dates.year(&record.transaction_date).ok();
                report.touched.push((record.bank_account_id, year));
                report.outcomes.push((
                    index,
                    ItemOutcome::Created {
                        id,
                        transaction_number: record.transaction_number.unwrap_or_default(),
                    },
                ));
            }
        }
        Err(err) => {
            tracing::error!("chunk of {} transactions failed: {err}", staged.len());
            let reason = err.to_string();
            for (index, _, _) in staged {
                report.outcomes.push((
                    index,
                    ItemOutcome::Failed {
                        reason: reason.clone(),
                    },
                ));
            }
        }
    }
    report
}

/// Commit a batch of adds, retrying transient failures.
///
/// The ids are generated before the first attempt, so an attempt whose writes
/// landed but whose acknowledgement was lost shows up as stored ids. A retry
/// then fails with [`EngineError::Conflict`] instead of writing a second copy,
/// and the batch counts as committed once every id is found in the store.
async fn commit_creates(
    store: &dyn DocumentStore,
    retry: &RetrySettings,
    label: &str,
    batch: &WriteBatch,
    ids: &[&str],
) -> ResultEngine<()> {
    let err = match retry_with_backoff(retry, label, || store.commit(batch.clone())).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    for id in ids {
        match store.get(TRANSACTIONS, id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(err),
            Err(lookup) => {
                tracing::warn!("{label}: could not check stored ids: {lookup}");
                return Err(err);
            }
        }
    }
    tracing::warn!(
        "{label} reported \"{err}\" but all {} document(s) are stored",
        ids.len()
    );
    Ok(())
}
