//! Bulk creation and deletion of transactions.
//!
//! The coordinator picks a strategy from the input size:
//!
//! - small inputs are written one item at a time;
//! - medium inputs are pre-numbered and committed in atomic chunks, one after
//!   the other;
//! - large inputs are pre-numbered and committed in atomic chunks, several at
//!   once, in waves separated by a short pause.
//!
//! Every chunk commit goes through [`retry_with_backoff`]. Whatever happens,
//! each input index ends up with exactly one [`ItemOutcome`].

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinSet;

use crate::{DateResolver, LedgerSettings, settings::RetrySettings, store::DocumentStore};

pub use retry::retry_with_backoff;

mod create;
mod delete;
mod retry;

/// Phase label reported while deleting.
pub const DELETING_STEP: &str = "Deleting splits and transactions";
/// Phase label reported while balances are recomputed after a bulk write.
pub const RECALCULATING_STEP: &str = "Recalculating balances";

/// Progress of a bulk operation. `completed` never decreases and the last
/// report of an operation has `percentage == 100`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u32,
    pub current_step: Option<String>,
}

impl Progress {
    #[must_use]
    pub fn new(completed: usize, total: usize, current_step: Option<String>) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            u32::try_from(completed.min(total) * 100 / total).unwrap_or(100)
        };
        Self {
            completed,
            total,
            percentage,
            current_step,
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Cooperative cancellation, checked between chunks and waves.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct BulkOptions {
    pub on_progress: Option<ProgressFn>,
    /// Overrides `LedgerSettings::retry.max_retries`.
    pub max_retries: Option<u32>,
    pub cancellation: Option<CancellationFlag>,
}

impl fmt::Debug for BulkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("max_retries", &self.max_retries)
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

impl BulkOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationFlag::is_cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Serial,
    ChunkedAtomic,
    ParallelChunked,
}

#[must_use]
pub fn select_strategy(total: usize, settings: &LedgerSettings) -> Strategy {
    if total <= settings.serial_threshold {
        Strategy::Serial
    } else if total <= settings.atomic_threshold {
        Strategy::ChunkedAtomic
    } else {
        Strategy::ParallelChunked
    }
}

/// Final state of one input item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Created {
        id: String,
        transaction_number: String,
    },
    Deleted {
        id: String,
    },
    Failed {
        reason: String,
    },
    /// Not attempted because the operation was cancelled.
    Cancelled,
}

impl ItemOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Deleted { .. })
    }
}

/// Summary of a bulk operation. `success + failed` is the input size;
/// cancelled items count as failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkOutcome {
    pub strategy: Strategy,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// One line per failed item.
    pub errors: Vec<String>,
    /// Outcome of every input item, in input order.
    pub items: Vec<ItemOutcome>,
    /// Degraded numbers, skipped splits, failed balance refreshes.
    pub warnings: Vec<String>,
    /// Accounts touched by the operation, with the earliest year touched
    /// (`None` when unknown).
    pub affected: BTreeMap<String, Option<i32>>,
}

/// Merge a touched (account, year) into `affected`.
pub(crate) fn touch(affected: &mut BTreeMap<String, Option<i32>>, account_id: &str, year: Option<i32>) {
    affected
        .entry(account_id.to_string())
        .and_modify(|current| {
            *current = match (*current, year) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            };
        })
        .or_insert(year);
}

/// What one chunk produced.
#[derive(Debug, Default)]
pub(crate) struct ChunkReport {
    pub outcomes: Vec<(usize, ItemOutcome)>,
    pub touched: Vec<(String, Option<i32>)>,
    pub warnings: Vec<String>,
}

/// A unit of bulk work that knows its input position.
pub(crate) trait Indexed {
    fn index(&self) -> usize;
}

/// Collects outcomes and reports progress.
pub(crate) struct Tally<'a> {
    items: Vec<Option<ItemOutcome>>,
    errors: Vec<String>,
    warnings: Vec<String>,
    affected: BTreeMap<String, Option<i32>>,
    completed: usize,
    step: Option<String>,
    on_progress: Option<&'a ProgressFn>,
}

impl<'a> Tally<'a> {
    pub fn new(total: usize, step: Option<&str>, on_progress: Option<&'a ProgressFn>) -> Self {
        Self {
            items: vec![None; total],
            errors: Vec::new(),
            warnings: Vec::new(),
            affected: BTreeMap::new(),
            completed: 0,
            step: step.map(ToString::to_string),
            on_progress,
        }
    }

    pub fn warn(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    fn is_settled(&self, index: usize) -> bool {
        self.items.get(index).is_some_and(Option::is_some)
    }

    fn settle(&mut self, index: usize, outcome: ItemOutcome) {
        let Some(slot) = self.items.get_mut(index) else {
            return;
        };
        if slot.is_some() {
            return;
        }
        if let ItemOutcome::Failed { reason } = &outcome {
            self.errors.push(format!("item {index}: {reason}"));
        }
        *slot = Some(outcome);
        self.completed += 1;
    }

    fn settle_chunk(&mut self, report: ChunkReport) {
        for (index, outcome) in report.outcomes {
            self.settle(index, outcome);
        }
        for (account_id, year) in report.touched {
            touch(&mut self.affected, &account_id, year);
        }
        self.warnings.extend(report.warnings);
        self.report();
    }

    fn report(&self) {
        if let Some(callback) = self.on_progress {
            callback(Progress::new(
                self.completed,
                self.items.len(),
                self.step.clone(),
            ));
        }
    }

    pub fn finish(mut self, strategy: Strategy) -> BulkOutcome {
        let pending = self.items.iter().filter(|slot| slot.is_none()).count();
        if pending > 0 || self.items.is_empty() {
            for slot in self.items.iter_mut().filter(|slot| slot.is_none()) {
                *slot = Some(ItemOutcome::Cancelled);
            }
            self.completed = self.items.len();
            self.report();
        }

        let items: Vec<ItemOutcome> = self.items.into_iter().flatten().collect();
        let success = items.iter().filter(|item| item.is_success()).count();
        let cancelled = items
            .iter()
            .filter(|item| **item == ItemOutcome::Cancelled)
            .count();
        BulkOutcome {
            strategy,
            success,
            failed: items.len() - success,
            cancelled,
            errors: self.errors,
            items,
            warnings: self.warnings,
            affected: self.affected,
        }
    }
}

/// How chunks are scheduled.
pub(crate) enum Plan {
    Sequential,
    Waves { concurrency: usize, pause: Duration },
}

/// Run `chunks` through `run`, settling each chunk's report as it lands.
/// Cancellation is checked before each chunk (sequential) or wave.
pub(crate) async fn drive<T, F, Fut>(
    chunks: Vec<Vec<T>>,
    plan: Plan,
    options: &BulkOptions,
    tally: &mut Tally<'_>,
    run: F,
) where
    T: Indexed + Send + 'static,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = ChunkReport> + Send + 'static,
{
    match plan {
        Plan::Sequential => {
            for chunk in chunks {
                if options.is_cancelled() {
                    tracing::info!("bulk operation cancelled");
                    break;
                }
                tally.settle_chunk(run(chunk).await);
            }
        }
        Plan::Waves { concurrency, pause } => {
            let mut chunks = chunks.into_iter().peekable();
            let mut first_wave = true;
            while chunks.peek().is_some() {
                if !first_wave {
                    tokio::time::sleep(pause).await;
                }
                first_wave = false;
                if options.is_cancelled() {
                    tracing::info!("bulk operation cancelled");
                    break;
                }

                let mut wave_indexes = Vec::new();
                let mut tasks = JoinSet::new();
                for chunk in chunks.by_ref().take(concurrency.max(1)) {
                    wave_indexes.extend(chunk.iter().map(Indexed::index));
                    tasks.spawn(run(chunk));
                }
                tracing::debug!("bulk wave started: {} chunk(s)", tasks.len());

                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(report) => tally.settle_chunk(report),
                        Err(err) => tracing::error!("bulk chunk task failed: {err}"),
                    }
                }

                // Items of a chunk whose task died never got a report.
                let lost: Vec<usize> = wave_indexes
                    .into_iter()
                    .filter(|index| !tally.is_settled(*index))
                    .collect();
                if !lost.is_empty() {
                    for index in lost {
                        tally.settle(
                            index,
                            ItemOutcome::Failed {
                                reason: "chunk task aborted".to_string(),
                            },
                        );
                    }
                    tally.report();
                }
            }
        }
    }
}

pub(crate) fn into_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Creates and deletes transactions in bulk.
#[derive(Clone, Debug)]
pub struct BulkWriteCoordinator {
    store: Arc<dyn DocumentStore>,
    settings: LedgerSettings,
    dates: DateResolver,
}

impl BulkWriteCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, settings: LedgerSettings) -> Self {
        let dates = DateResolver::new(settings.date_formats.clone());
        Self {
            store,
            settings,
            dates,
        }
    }

    #[must_use]
    pub fn select_strategy(&self, total: usize) -> Strategy {
        select_strategy(total, &self.settings)
    }

    /// Largest chunk one atomic commit may carry.
    fn batch_capacity(&self) -> usize {
        self.settings
            .batch_limit
            .min(self.store.max_batch_ops())
            .max(1)
    }

    fn retry_settings(&self, options: &BulkOptions) -> RetrySettings {
        let mut retry = self.settings.retry.clone();
        if let Some(max_retries) = options.max_retries {
            retry.max_retries = max_retries;
        }
        retry
    }

    /// Chunk size and schedule for an atomic strategy.
    fn plan(&self, strategy: Strategy, total: usize) -> (usize, Plan) {
        match strategy {
            Strategy::Serial => (1, Plan::Sequential),
            Strategy::ChunkedAtomic => (self.batch_capacity(), Plan::Sequential),
            Strategy::ParallelChunked => {
                let parallel = &self.settings.parallel;
                let chunk_size = parallel.chunk_size(total).min(self.batch_capacity());
                let concurrency = parallel.concurrency(total);
                tracing::info!(
                    "parallel bulk write: {total} items, chunks of {chunk_size}, {concurrency} at once"
                );
                (
                    chunk_size,
                    Plan::Waves {
                        concurrency,
                        pause: Duration::from_millis(parallel.wave_pause_ms),
                    },
                )
            }
        }
    }
}
