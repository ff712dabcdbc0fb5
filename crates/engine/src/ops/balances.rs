use std::collections::BTreeSet;

use crate::{
    MoneyCents, ResultEngine, Transaction,
    balances::{self, OptimizedBalances, RunningBalances, YearStart},
};

use super::Engine;

impl Engine {
    /// Recompute `current_balance` and the whole year-end cache of an account
    /// from its transactions.
    pub async fn recompute_account_balance(&self, account_id: &str) -> ResultEngine<MoneyCents> {
        let balance = self.refresh_account(account_id, None).await?;
        tracing::info!("account {account_id} recomputed: {balance}");
        Ok(balance)
    }

    /// Running balance after each transaction of an account, in balance order.
    pub async fn account_running_balances(&self, account_id: &str) -> ResultEngine<RunningBalances> {
        let account = self.require_account(account_id).await?;
        let transactions = self.load_account_transactions(account_id).await?;
        Ok(balances::running_balances(
            &transactions,
            account.initial_amount,
            &self.dates,
        ))
    }

    /// Balance of an account on 1 January of `year`. Served from the
    /// year-end cache when `year - 1` is cached, without reading any
    /// transaction.
    pub async fn year_start_balance(&self, account_id: &str, year: i32) -> ResultEngine<YearStart> {
        let account = self.require_account(account_id).await?;
        let transactions = if account.year_end_balance(year - 1).is_some() {
            Vec::new()
        } else {
            self.load_account_transactions(account_id).await?
        };
        Ok(balances::year_start_balance(
            &account,
            year,
            &transactions,
            &self.dates,
        ))
    }

    /// Running balances of `filtered` (for example one page of a report).
    /// With `year_filter`, each account starts from its year-start balance;
    /// otherwise from its full history.
    pub async fn optimized_balances(
        &self,
        filtered: &[Transaction],
        year_filter: Option<i32>,
    ) -> ResultEngine<OptimizedBalances> {
        let account_ids: BTreeSet<&str> = filtered
            .iter()
            .map(|t| t.bank_account_id.as_str())
            .collect();

        let mut accounts = Vec::with_capacity(account_ids.len());
        let mut all = Vec::new();
        for account_id in account_ids {
            let account = self.require_account(account_id).await?;
            let cached = year_filter.is_some_and(|year| account.year_end_balance(year - 1).is_some());
            if !cached {
                all.extend(self.load_account_transactions(account_id).await?);
            }
            accounts.push(account);
        }

        Ok(balances::optimized_balances(
            filtered,
            &all,
            &accounts,
            year_filter,
            &self.dates,
        ))
    }
}
