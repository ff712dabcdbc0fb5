use std::sync::Arc;

use crate::{
    BankAccount, DateResolver, EngineError, LedgerSettings, MoneyCents, ResultEngine, Transaction,
    balances::running_balances,
    bulk::BulkWriteCoordinator,
    numbering::TransactionNumberAllocator,
    store::{self, BANK_ACCOUNTS, DocumentStore, Fields, Filter, MemoryStore, Query, TRANSACTIONS},
    transactions::BANK_ACCOUNT_ID,
    year_end::YearEndBalanceCache,
};

mod accounts;
mod balances;
mod bulk;
mod maintenance;
mod splits;
mod transactions;

const CURRENT_BALANCE: &str = "current_balance";

/// Entry point of the ledger: every read and write goes through it.
///
/// Mutations keep the denormalized `current_balance` and year-end caches of
/// the accounts they touch up to date.
#[derive(Clone, Debug)]
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    settings: LedgerSettings,
    dates: DateResolver,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn dates(&self) -> &DateResolver {
        &self.dates
    }

    fn allocator(&self) -> TransactionNumberAllocator<'_> {
        TransactionNumberAllocator::new(self.store.as_ref(), &self.dates)
    }

    fn year_end_cache(&self) -> YearEndBalanceCache<'_> {
        YearEndBalanceCache::new(
            self.store.as_ref(),
            &self.dates,
            self.settings.balance_tolerance,
        )
    }

    fn coordinator(&self) -> BulkWriteCoordinator {
        BulkWriteCoordinator::new(Arc::clone(&self.store), self.settings.clone())
    }

    async fn require_account(&self, account_id: &str) -> ResultEngine<BankAccount> {
        let doc = self
            .store
            .get(BANK_ACCOUNTS, account_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("bank account {account_id}")))?;
        store::decode(BANK_ACCOUNTS, doc)
    }

    async fn require_transaction(&self, transaction_id: &str) -> ResultEngine<Transaction> {
        let doc = self
            .store
            .get(TRANSACTIONS, transaction_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound(format!("transaction {transaction_id}")))?;
        store::decode(TRANSACTIONS, doc)
    }

    /// Every readable transaction of one account, in storage order.
    async fn load_account_transactions(&self, account_id: &str) -> ResultEngine<Vec<Transaction>> {
        let docs = self
            .store
            .query(
                TRANSACTIONS,
                &Query::new().filter(Filter::eq(BANK_ACCOUNT_ID, account_id)),
            )
            .await?;
        Ok(store::decode_all(TRANSACTIONS, docs).0)
    }

    async fn load_all_accounts(&self) -> ResultEngine<Vec<BankAccount>> {
        let docs = self.store.query(BANK_ACCOUNTS, &Query::new()).await?;
        Ok(store::decode_all(BANK_ACCOUNTS, docs).0)
    }

    async fn load_all_transactions(&self) -> ResultEngine<Vec<Transaction>> {
        let docs = self.store.query(TRANSACTIONS, &Query::new()).await?;
        Ok(store::decode_all(TRANSACTIONS, docs).0)
    }

    /// Recompute `current_balance` of an account and refresh its year-end
    /// cache from `from_year` on (everything when `None`).
    async fn refresh_account(
        &self,
        account_id: &str,
        from_year: Option<i32>,
    ) -> ResultEngine<MoneyCents> {
        let account = self.require_account(account_id).await?;
        let transactions = self.load_account_transactions(account_id).await?;
        let running = running_balances(&transactions, account.initial_amount, &self.dates);

        let mut fields = Fields::new();
        fields.insert(
            CURRENT_BALANCE.to_string(),
            serde_json::to_value(running.closing)?,
        );
        self.store.update(BANK_ACCOUNTS, account_id, fields).await?;
        self.year_end_cache()
            .refresh(&account, from_year, &transactions)
            .await?;

        tracing::debug!(
            "account {account_id} refreshed: current balance {}",
            running.closing
        );
        Ok(running.closing)
    }
}

fn normalize_required_text(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{label} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn DocumentStore>>,
    settings: LedgerSettings,
}

impl EngineBuilder {
    /// Pass the document store. Defaults to an empty [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> EngineBuilder {
        self.store = Some(store);
        self
    }

    /// Pass the tunables. Defaults to [`LedgerSettings::default`].
    pub fn settings(mut self, settings: LedgerSettings) -> EngineBuilder {
        self.settings = settings;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let settings = self.settings;
        settings.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::with_batch_limit(settings.batch_limit)));
        Ok(Engine {
            store,
            dates: DateResolver::new(settings.date_formats.clone()),
            settings,
        })
    }
}
