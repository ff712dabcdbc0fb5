//! Transaction number allocation.
//!
//! Numbers are scoped per (bank account, fiscal year). The allocator reads the
//! highest sequence already stored for a scope and hands out the following
//! ones in input order. When the account or its existing numbers cannot be
//! read, it degrades to a timestamp-derived number instead of failing.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    BankAccount, DateResolver, EngineError, ResultEngine, TransactionDraft,
    store::{self, BANK_ACCOUNTS, DocumentStore, Filter, Query, TRANSACTIONS},
    transactions::{BANK_ACCOUNT_ID, MAX_SEQUENCE, TRANSACTION_NUMBER, TransactionNumber},
};

/// A number handed out by [`TransactionNumberAllocator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocatedNumber {
    pub number: String,
    /// `true` when the number comes from the timestamp fallback and may
    /// collide with another one.
    pub degraded: bool,
}

pub struct TransactionNumberAllocator<'a> {
    store: &'a dyn DocumentStore,
    dates: &'a DateResolver,
}

impl<'a> TransactionNumberAllocator<'a> {
    pub fn new(store: &'a dyn DocumentStore, dates: &'a DateResolver) -> Self {
        Self { store, dates }
    }

    /// Next number for one transaction of `bank_account_id` dated `date`.
    pub async fn allocate(
        &self,
        bank_account_id: &str,
        date: &str,
    ) -> ResultEngine<AllocatedNumber> {
        let year = self.dates.year(date)?;
        let mut numbers = self.allocate_group(bank_account_id, year, 1).await?;
        numbers
            .pop()
            .ok_or_else(|| EngineError::Store("no transaction number allocated".to_string()))
    }

    /// Numbers for every draft, same length and order as `drafts`. Drafts
    /// sharing (account, year) get strictly increasing sequences in input
    /// order.
    pub async fn allocate_batch(
        &self,
        drafts: &[TransactionDraft],
    ) -> ResultEngine<Vec<AllocatedNumber>> {
        let mut groups: BTreeMap<(&str, i32), Vec<usize>> = BTreeMap::new();
        for (index, draft) in drafts.iter().enumerate() {
            let year = self.dates.year(&draft.transaction_date)?;
            groups
                .entry((draft.bank_account_id.as_str(), year))
                .or_default()
                .push(index);
        }

        let mut slots: Vec<Option<AllocatedNumber>> = vec![None; drafts.len()];
        for ((account_id, year), indexes) in groups {
            let numbers = self.allocate_group(account_id, year, indexes.len()).await?;
            for (index, number) in indexes.into_iter().zip(numbers) {
                slots[index] = Some(number);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    EngineError::Store("transaction number missing from batch".to_string())
                })
            })
            .collect()
    }

    /// `count` consecutive numbers for one (account, year) scope.
    pub async fn allocate_group(
        &self,
        bank_account_id: &str,
        year: i32,
        count: usize,
    ) -> ResultEngine<Vec<AllocatedNumber>> {
        let account = match self.store.get(BANK_ACCOUNTS, bank_account_id).await {
            Ok(Some(doc)) => store::decode::<BankAccount>(BANK_ACCOUNTS, doc),
            Ok(None) => Err(EngineError::KeyNotFound(format!(
                "{BANK_ACCOUNTS}/{bank_account_id}"
            ))),
            Err(err) => Err(err),
        };
        let suffix = match account {
            Ok(account) => TransactionNumber::account_suffix(&account.account_number),
            Err(err) => {
                tracing::warn!(
                    "cannot resolve bank account {bank_account_id} for numbering: {err}"
                );
                return Ok(fallback(year, "0000", count));
            }
        };

        let prefix = TransactionNumber::prefix(year, &suffix);
        let query = Query::new()
            .filter(Filter::eq(BANK_ACCOUNT_ID, bank_account_id))
            .filter(Filter::starts_with(TRANSACTION_NUMBER, prefix.clone()));
        let existing = match self.store.query(TRANSACTIONS, &query).await {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!("cannot read existing numbers under {prefix}: {err}");
                return Ok(fallback(year, &suffix, count));
            }
        };

        let max = existing
            .iter()
            .filter_map(|doc| doc.get(TRANSACTION_NUMBER).and_then(Value::as_str))
            .filter_map(|number| sequence_after(number, &prefix))
            .max()
            .unwrap_or(0);

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        if max.saturating_add(count) > MAX_SEQUENCE {
            return Err(EngineError::SequenceExhausted(format!(
                "account {bank_account_id}, year {year}"
            )));
        }

        Ok((1..=count)
            .map(|offset| AllocatedNumber {
                number: TransactionNumber {
                    year,
                    account_suffix: suffix.clone(),
                    sequence: max + offset,
                }
                .to_string(),
                degraded: false,
            })
            .collect())
    }
}

/// Sequence of `number` when it is `prefix` followed by exactly four digits.
fn sequence_after(number: &str, prefix: &str) -> Option<u32> {
    let tail = number.strip_prefix(prefix)?;
    if tail.len() != 4 || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

/// Timestamp-derived numbers. Not guaranteed unique.
fn fallback(year: i32, suffix: &str, count: usize) -> Vec<AllocatedNumber> {
    let millis = chrono::Utc::now().timestamp_millis();
    let prefix = TransactionNumber::prefix(year, suffix);
    tracing::warn!("allocating {count} degraded transaction number(s) under {prefix}");
    (0..count)
        .map(|i| {
            let sequence = (millis + i as i64).rem_euclid(10_000);
            AllocatedNumber {
                number: format!("{prefix}{sequence:04}"),
                degraded: true,
            }
        })
        .collect()
}
