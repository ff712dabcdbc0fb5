//! Year-end balance cache.
//!
//! Closing balances per fiscal year are stored on the bank account document
//! (`year_end_balances`) so year-start balances can be read without scanning
//! the history. This module is the only writer of that field.

use std::collections::BTreeMap;

use crate::{
    BankAccount, DateResolver, EngineError, MoneyCents, ResultEngine, Transaction,
    balances::{balance_at_year_end, year_end_balances},
    consistency::ValidationReport,
    store::{self, BANK_ACCOUNTS, DocumentStore, Fields, Query, Quarantined, TRANSACTIONS},
};

const YEAR_END_BALANCES: &str = "year_end_balances";

/// What [`YearEndBalanceCache::initialize_all`] rewrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitializeSummary {
    pub accounts: usize,
    pub entries: usize,
    /// Documents skipped because they do not decode.
    pub quarantined: Vec<Quarantined>,
}

pub struct YearEndBalanceCache<'a> {
    store: &'a dyn DocumentStore,
    dates: &'a DateResolver,
    tolerance: MoneyCents,
}

impl<'a> YearEndBalanceCache<'a> {
    pub fn new(store: &'a dyn DocumentStore, dates: &'a DateResolver, tolerance: MoneyCents) -> Self {
        Self {
            store,
            dates,
            tolerance,
        }
    }

    async fn account(&self, account_id: &str) -> ResultEngine<BankAccount> {
        let doc = self
            .store
            .get(BANK_ACCOUNTS, account_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("{BANK_ACCOUNTS}/{account_id}")))?;
        store::decode(BANK_ACCOUNTS, doc)
    }

    pub async fn get(&self, account_id: &str, year: i32) -> ResultEngine<Option<MoneyCents>> {
        Ok(self.account(account_id).await?.year_end_balance(year))
    }

    pub async fn set(&self, account_id: &str, year: i32, balance: MoneyCents) -> ResultEngine<()> {
        let mut account = self.account(account_id).await?;
        account.year_end_balances.insert(year, balance);
        self.store
            .update(BANK_ACCOUNTS, account_id, fields(&account.year_end_balances)?)
            .await
    }

    /// Recompute every account's closing balances from its full history and
    /// replace the cached ones. Running it twice yields the same cache.
    pub async fn initialize_all(&self) -> ResultEngine<InitializeSummary> {
        let (accounts, mut quarantined) = store::decode_all::<BankAccount>(
            BANK_ACCOUNTS,
            self.store.query(BANK_ACCOUNTS, &Query::new()).await?,
        );
        let (transactions, skipped) = store::decode_all::<Transaction>(
            TRANSACTIONS,
            self.store.query(TRANSACTIONS, &Query::new()).await?,
        );
        quarantined.extend(skipped);

        let mut summary = InitializeSummary {
            accounts: accounts.len(),
            quarantined,
            ..InitializeSummary::default()
        };

        let mut batch = self.store.batch();
        for account in &accounts {
            let balances = year_end_balances(account, &transactions, self.dates);
            summary.entries += balances.len();
            if batch.len() == self.store.max_batch_ops() {
                let full = std::mem::replace(&mut batch, self.store.batch());
                self.store.commit(full).await?;
            }
            batch.update(BANK_ACCOUNTS, account.id.clone(), fields(&balances)?)?;
        }
        if !batch.is_empty() {
            self.store.commit(batch).await?;
        }

        tracing::info!(
            "year-end balances initialized: {} accounts, {} entries",
            summary.accounts,
            summary.entries
        );
        Ok(summary)
    }

    /// Recompute every cached entry from history and report the ones that
    /// drifted. Nothing is rewritten.
    pub async fn validate_all(&self) -> ResultEngine<ValidationReport> {
        let (accounts, _) = store::decode_all::<BankAccount>(
            BANK_ACCOUNTS,
            self.store.query(BANK_ACCOUNTS, &Query::new()).await?,
        );
        let (transactions, _) = store::decode_all::<Transaction>(
            TRANSACTIONS,
            self.store.query(TRANSACTIONS, &Query::new()).await?,
        );

        let mut errors = Vec::new();
        for account in &accounts {
            for (&year, &cached) in &account.year_end_balances {
                let computed = balance_at_year_end(account, year, &transactions, self.dates);
                if computed.differs_from(cached, self.tolerance) {
                    errors.push(format!(
                        "Account {}: year {year} computed {computed} but cached {cached}",
                        account.name
                    ));
                }
            }
        }
        if !errors.is_empty() {
            tracing::warn!("{} stale year-end balance(s)", errors.len());
        }
        Ok(ValidationReport::from_errors(errors))
    }

    /// Rewrite the cache of `account` after a mutation. Entries before
    /// `from_year` are kept; the others are recomputed from `transactions`.
    /// `None` recomputes everything.
    pub async fn refresh(
        &self,
        account: &BankAccount,
        from_year: Option<i32>,
        transactions: &[Transaction],
    ) -> ResultEngine<BTreeMap<i32, MoneyCents>> {
        let computed = year_end_balances(account, transactions, self.dates);
        let balances = match from_year {
            Some(from_year) => merge_from(&account.year_end_balances, computed, from_year),
            None => computed,
        };
        self.store
            .update(BANK_ACCOUNTS, &account.id, fields(&balances)?)
            .await?;
        Ok(balances)
    }
}

fn merge_from(
    cached: &BTreeMap<i32, MoneyCents>,
    computed: BTreeMap<i32, MoneyCents>,
    from_year: i32,
) -> BTreeMap<i32, MoneyCents> {
    cached
        .range(..from_year)
        .map(|(&year, &balance)| (year, balance))
        .chain(computed.into_iter().filter(|(year, _)| *year >= from_year))
        .collect()
}

fn fields(balances: &BTreeMap<i32, MoneyCents>) -> ResultEngine<Fields> {
    let mut fields = Fields::new();
    fields.insert(
        YEAR_END_BALANCES.to_string(),
        serde_json::to_value(balances)?,
    );
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_older_entries() {
        let cached: BTreeMap<_, _> = [
            (2022, MoneyCents::new(1)),
            (2023, MoneyCents::new(2)),
            (2024, MoneyCents::new(3)),
        ]
        .into_iter()
        .collect();
        let computed: BTreeMap<_, _> = [
            (2022, MoneyCents::new(10)),
            (2023, MoneyCents::new(20)),
            (2024, MoneyCents::new(30)),
        ]
        .into_iter()
        .collect();

        let merged = merge_from(&cached, computed, 2023);
        assert_eq!(
            merged.into_iter().collect::<Vec<_>>(),
            [
                (2022, MoneyCents::new(1)),
                (2023, MoneyCents::new(20)),
                (2024, MoneyCents::new(30)),
            ]
        );
    }
}
