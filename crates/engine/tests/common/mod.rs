#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use engine::{
    BankAccount, Engine, EngineError, LedgerSettings, MemoryStore, MoneyCents, NewBankAccount,
    ResultEngine,
    store::{
        BatchOp, Document, DocumentStore, Fields, Query, TRANSACTION_SPLITS, TRANSACTIONS,
        WriteBatch,
    },
};

pub fn cents(value: i64) -> MoneyCents {
    MoneyCents::new(value)
}

pub async fn engine_with_store(settings: LedgerSettings) -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_batch_limit(settings.batch_limit));
    let engine = Engine::builder()
        .store(store.clone())
        .settings(settings)
        .build()
        .await
        .unwrap();
    (engine, store)
}

pub async fn engine() -> (Engine, Arc<MemoryStore>) {
    engine_with_store(LedgerSettings::default()).await
}

pub async fn account(engine: &Engine, name: &str, number: &str, initial: i64) -> BankAccount {
    engine
        .create_bank_account(NewBankAccount::new(name, number, cents(initial)))
        .await
        .unwrap()
}

/// Memory store whose writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// The next N commits fail with a transient error.
    pub failing_commits: AtomicUsize,
    /// The next N commits are applied but still report a transient error.
    pub lost_acks: AtomicUsize,
    /// Commits deleting transactions always fail.
    pub reject_transaction_batch_deletes: AtomicBool,
    /// Commits deleting splits always fail.
    pub reject_split_deletes: AtomicBool,
    /// Queries on the transactions collection fail.
    pub reject_transaction_queries: AtomicBool,
    pub commits: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn lose_next_acks(&self, count: usize) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> ResultEngine<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, collection: &str, query: &Query) -> ResultEngine<Vec<Document>> {
        if collection == TRANSACTIONS && self.reject_transaction_queries.load(Ordering::SeqCst) {
            return Err(EngineError::Store("query rejected".to_string()));
        }
        self.inner.query(collection, query).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> ResultEngine<String> {
        self.inner.add(collection, fields).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> ResultEngine<()> {
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> ResultEngine<()> {
        self.inner.delete(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> ResultEngine<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let deletes = |target: &str| {
            batch.ops().iter().any(
                |op| matches!(op, BatchOp::Delete { collection, .. } if collection == target),
            )
        };
        if deletes(TRANSACTIONS) && self.reject_transaction_batch_deletes.load(Ordering::SeqCst) {
            return Err(EngineError::Store("batch delete rejected".to_string()));
        }
        if deletes(TRANSACTION_SPLITS) && self.reject_split_deletes.load(Ordering::SeqCst) {
            return Err(EngineError::Store("split delete rejected".to_string()));
        }
        if Self::take(&self.failing_commits) {
            return Err(EngineError::Store("commit unavailable".to_string()));
        }
        self.inner.commit(batch).await?;
        if Self::take(&self.lost_acks) {
            return Err(EngineError::Store("ack lost".to_string()));
        }
        Ok(())
    }

    fn max_batch_ops(&self) -> usize {
        self.inner.max_batch_ops()
    }
}
