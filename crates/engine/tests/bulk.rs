use std::{
    collections::HashMap,
    sync::{Arc, Mutex, atomic::Ordering},
};

use engine::{
    BulkOptions, CancellationFlag, Engine, EngineError, ItemOutcome, LedgerSettings, Progress,
    SplitDraft, Strategy, TransactionDraft, TransactionNumber,
    bulk::{DELETING_STEP, RECALCULATING_STEP},
    store::{TRANSACTION_SPLITS, TRANSACTIONS},
};

mod common;

use common::{FlakyStore, account, cents, engine, engine_with_store};

async fn flaky_engine(settings: LedgerSettings) -> (Engine, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let engine = Engine::builder()
        .store(store.clone())
        .settings(settings)
        .build()
        .await
        .unwrap();
    (engine, store)
}

fn recorder() -> (Arc<Mutex<Vec<Progress>>>, BulkOptions) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = BulkOptions::new().on_progress(move |progress| {
        sink.lock().unwrap().push(progress);
    });
    (seen, options)
}

fn drafts_for(account_ids: &[&str], count: usize) -> Vec<TransactionDraft> {
    (0..count)
        .map(|i| {
            let account_id = account_ids[i % account_ids.len()];
            let date = format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1);
            TransactionDraft::income(account_id, date, cents(1))
        })
        .collect()
}

fn created_ids(items: &[ItemOutcome]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            ItemOutcome::Created { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn large_input_runs_in_parallel_waves() {
    let (engine, store) = engine().await;
    let a = account(&engine, "A", "IT00 0000 0001", 0).await;
    let b = account(&engine, "B", "IT00 0000 0002", 0).await;
    let c = account(&engine, "C", "IT00 0000 0003", 0).await;
    let drafts = drafts_for(&[&a.id, &b.id, &c.id], 1200);

    let (seen, options) = recorder();
    let outcome = engine.create_transactions(&drafts, options).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::ParallelChunked);
    assert_eq!(outcome.success + outcome.failed, 1200);
    assert_eq!(outcome.success, 1200);
    assert_eq!(store.count(TRANSACTIONS), 1200);

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert_eq!(seen.last().map(|p| p.percentage), Some(100));

    // Per account, numbers grow strictly with input order.
    let mut last: HashMap<&str, u32> = HashMap::new();
    for (draft, item) in drafts.iter().zip(&outcome.items) {
        let ItemOutcome::Created {
            transaction_number, ..
        } = item
        else {
            panic!("unexpected outcome {item:?}");
        };
        let number: TransactionNumber = transaction_number.parse().unwrap();
        let previous = last.insert(draft.bank_account_id.as_str(), number.sequence);
        assert!(previous.is_none_or(|p| p < number.sequence));
    }
    assert_eq!(last.values().copied().max(), Some(400));

    for acc in [&a, &b, &c] {
        let refreshed = engine.bank_account(&acc.id).await.unwrap();
        assert_eq!(refreshed.current_balance, cents(400));
    }
}

#[tokio::test]
async fn small_input_is_written_serially() {
    let (engine, _) = engine().await;
    let acc = account(&engine, "A", "1234", 10_00).await;
    let drafts = drafts_for(&[&acc.id], 5);

    let outcome = engine
        .create_transactions(&drafts, BulkOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, Strategy::Serial);
    assert_eq!(outcome.success, 5);
    assert_eq!(outcome.affected.get(&acc.id), Some(&Some(2024)));
    let numbers: Vec<_> = outcome
        .items
        .iter()
        .map(|item| match item {
            ItemOutcome::Created {
                transaction_number, ..
            } => transaction_number.clone(),
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();
    assert_eq!(numbers[0], "TXN-2024-1234-0001");
    assert_eq!(numbers[4], "TXN-2024-1234-0005");
    assert_eq!(
        engine.bank_account(&acc.id).await.unwrap().current_balance,
        cents(10_05)
    );
}

#[tokio::test(start_paused = true)]
async fn chunk_commit_is_retried() {
    let (engine, store) = flaky_engine(LedgerSettings::default()).await;
    let acc = account(&engine, "A", "1234", 0).await;
    let drafts = drafts_for(&[&acc.id], 100);
    store.fail_next_commits(2);

    let outcome = engine
        .create_transactions(&drafts, BulkOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, Strategy::ChunkedAtomic);
    assert_eq!(outcome.success, 100);
    assert_eq!(store.failing_commits.load(Ordering::SeqCst), 0);
    assert_eq!(store.inner.count(TRANSACTIONS), 100);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_whole_chunk() {
    let (engine, store) = flaky_engine(LedgerSettings::default()).await;
    let acc = account(&engine, "A", "1234", 0).await;
    let drafts = drafts_for(&[&acc.id], 100);
    store.fail_next_commits(2);

    let outcome = engine
        .create_transactions(&drafts, BulkOptions::new().max_retries(1))
        .await
        .unwrap();

    assert_eq!(outcome.success, 0);
    assert_eq!(outcome.failed, 100);
    assert_eq!(outcome.errors.len(), 100);
    assert!(outcome.affected.is_empty());
    assert_eq!(store.inner.count(TRANSACTIONS), 0);
}

#[tokio::test]
async fn cancellation_stops_between_chunks() {
    let settings = LedgerSettings {
        batch_limit: 50,
        ..LedgerSettings::default()
    };
    let (engine, store) = engine_with_store(settings).await;
    let acc = account(&engine, "A", "1234", 0).await;
    let drafts = drafts_for(&[&acc.id], 120);

    let flag = CancellationFlag::new();
    let trigger = flag.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = BulkOptions::new()
        .cancellation(flag)
        .on_progress(move |progress: Progress| {
            trigger.cancel();
            sink.lock().unwrap().push(progress.percentage);
        });

    let outcome = engine.create_transactions(&drafts, options).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::ChunkedAtomic);
    assert_eq!(outcome.success, 50);
    assert_eq!(outcome.cancelled, 70);
    assert_eq!(outcome.failed, 70);
    assert_eq!(store.count(TRANSACTIONS), 50);
    assert_eq!(*seen.lock().unwrap(), [41, 100]);
    assert_eq!(
        engine.bank_account(&acc.id).await.unwrap().current_balance,
        cents(50)
    );
}

#[tokio::test]
async fn invalid_draft_aborts_before_writing() {
    let (engine, store) = engine().await;
    let acc = account(&engine, "A", "1234", 0).await;
    let mut drafts = drafts_for(&[&acc.id], 80);
    drafts.push(TransactionDraft::income("ghost", "2024-01-01", cents(1)));
    drafts.push(TransactionDraft::income(&acc.id, "someday", cents(1)));

    let err = engine
        .create_transactions(&drafts, BulkOptions::new())
        .await
        .unwrap_err();

    let EngineError::Validation(message) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(message.contains("draft 81"));
    assert!(message.contains("unknown bank account ghost"));
    assert_eq!(store.count(TRANSACTIONS), 0);
}

#[tokio::test]
async fn delete_reports_missing_ids_and_labels_progress() {
    let (engine, _) = engine().await;
    let acc = account(&engine, "A", "1234", 0).await;
    let kept = engine
        .create_transaction(TransactionDraft::income(&acc.id, "2024-01-01", cents(7_00)))
        .await
        .unwrap();
    let doomed = engine
        .create_transaction(TransactionDraft::income(&acc.id, "2024-01-02", cents(3_00)))
        .await
        .unwrap();

    let (seen, options) = recorder();
    let ids = [doomed.id.clone(), "missing".to_string()];
    let outcome = engine.delete_transactions(&ids, options).await.unwrap();

    assert_eq!(outcome.success, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.errors, ["item 1: transaction missing not found"]);
    assert_eq!(
        outcome.items[0],
        ItemOutcome::Deleted {
            id: doomed.id.clone()
        }
    );

    let steps: Vec<_> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.current_step.clone().unwrap_or_default())
        .collect();
    assert_eq!(steps, [DELETING_STEP, DELETING_STEP, RECALCULATING_STEP]);

    assert_eq!(engine.transactions_for_account(&acc.id).await.unwrap(), [kept]);
    assert_eq!(
        engine.bank_account(&acc.id).await.unwrap().current_balance,
        cents(7_00)
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_batch_delete_falls_back_to_single_deletes() {
    let (engine, store) = flaky_engine(LedgerSettings::default()).await;
    let acc = account(&engine, "A", "1234", 0).await;
    let created = engine
        .create_transactions(&drafts_for(&[&acc.id], 60), BulkOptions::new())
        .await
        .unwrap();
    let ids = created_ids(&created.items);
    engine
        .replace_splits(
            &ids[0],
            vec![SplitDraft::new(cents(1)).category("fees")],
        )
        .await
        .unwrap();
    assert_eq!(store.inner.count(TRANSACTION_SPLITS), 1);

    store
        .reject_transaction_batch_deletes
        .store(true, Ordering::SeqCst);
    let outcome = engine
        .delete_transactions(&ids, BulkOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome.strategy, Strategy::ChunkedAtomic);
    assert_eq!(outcome.success, 60);
    assert_eq!(store.inner.count(TRANSACTIONS), 0);
    assert_eq!(store.inner.count(TRANSACTION_SPLITS), 0);
    assert_eq!(
        engine.bank_account(&acc.id).await.unwrap().current_balance,
        cents(0)
    );
}

#[tokio::test(start_paused = true)]
async fn lost_acknowledgements_never_duplicate_writes() {
    for (count, lost, strategy) in [
        (5, 1, Strategy::Serial),
        (60, 1, Strategy::ChunkedAtomic),
        (600, 3, Strategy::ParallelChunked),
    ] {
        let (engine, store) = flaky_engine(LedgerSettings::default()).await;
        let acc = account(&engine, "A", "1234", 0).await;
        let drafts = drafts_for(&[&acc.id], count);
        store.lose_next_acks(lost);

        let outcome = engine
            .create_transactions(&drafts, BulkOptions::new())
            .await
            .unwrap();

        assert_eq!(outcome.strategy, strategy);
        assert_eq!((outcome.success, outcome.failed), (count, 0));
        assert_eq!(store.lost_acks.load(Ordering::SeqCst), 0);
        assert_eq!(store.inner.count(TRANSACTIONS), count);
        assert_eq!(created_ids(&outcome.items).len(), count);
        assert_eq!(
            engine.bank_account(&acc.id).await.unwrap().current_balance,
            cents(i64::try_from(count).unwrap())
        );
        assert!(engine.validate_current_balances().await.unwrap().is_valid);
    }
}

#[tokio::test(start_paused = true)]
async fn large_delete_runs_in_parallel_waves() {
    let (engine, store) = engine().await;
    let a = account(&engine, "A", "IT00 0000 0001", 0).await;
    let b = account(&engine, "B", "IT00 0000 0002", 5_00).await;
    let created = engine
        .create_transactions(&drafts_for(&[&a.id, &b.id], 600), BulkOptions::new())
        .await
        .unwrap();
    let ids = created_ids(&created.items);
    assert_eq!(ids.len(), 600);

    let (seen, options) = recorder();
    let outcome = engine.delete_transactions(&ids, options).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::ParallelChunked);
    assert_eq!((outcome.success, outcome.failed), (600, 0));
    assert_eq!(store.count(TRANSACTIONS), 0);

    let seen = seen.lock().unwrap().clone();
    assert!(seen.len() > 2);
    assert!(seen.windows(2).all(|w| w[0].completed <= w[1].completed));
    let last = seen.last().unwrap();
    assert_eq!(last.percentage, 100);
    assert_eq!(last.current_step.as_deref(), Some(RECALCULATING_STEP));

    assert_eq!(
        engine.bank_account(&a.id).await.unwrap().current_balance,
        cents(0)
    );
    assert_eq!(
        engine.bank_account(&b.id).await.unwrap().current_balance,
        cents(5_00)
    );
}

#[tokio::test(start_paused = true)]
async fn split_cleanup_failure_does_not_block_the_parent_delete() {
    let (engine, store) = flaky_engine(LedgerSettings::default()).await;
    let acc = account(&engine, "A", "1234", 0).await;
    let txn = engine
        .create_transaction(TransactionDraft::income(&acc.id, "2024-05-01", cents(5_00)))
        .await
        .unwrap();
    engine
        .replace_splits(
            &txn.id,
            vec![
                SplitDraft::new(cents(3_00)).category("rent"),
                SplitDraft::new(cents(2_00)).category("fees"),
            ],
        )
        .await
        .unwrap();

    store.reject_split_deletes.store(true, Ordering::SeqCst);
    let outcome = engine
        .delete_transactions(&[txn.id.clone()], BulkOptions::new())
        .await
        .unwrap();

    assert_eq!((outcome.success, outcome.failed), (1, 0));
    assert_eq!(outcome.items[0], ItemOutcome::Deleted { id: txn.id.clone() });
    assert!(
        outcome
            .warnings
            .iter()
            .any(|warning| warning.contains("2 split(s) not deleted"))
    );
    assert_eq!(store.inner.count(TRANSACTIONS), 0);
    assert_eq!(store.inner.count(TRANSACTION_SPLITS), 2);
    assert_eq!(
        engine.bank_account(&acc.id).await.unwrap().current_balance,
        cents(0)
    );
}
