//! Balance computations.
//!
//! Everything here is pure: callers load transactions and accounts, these
//! functions order and accumulate them. Ordering rules:
//!
//! - transactions with a well formed number are ordered by (year, sequence,
//!   number text);
//! - the others are ordered by resolved date;
//! - the two runs are merged by resolved date, unparsable dates last;
//! - every tie keeps input order.
//!
//! The result only depends on the input, so duplicate numbers or garbage
//! dates never make ordering fail.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    iter::Peekable,
};

use chrono::{Datelike, NaiveDate};

use crate::{BankAccount, DateResolver, MoneyCents, Transaction, TransactionNumber};

/// `income - expense`.
#[must_use]
pub fn net_amount(transaction: &Transaction) -> MoneyCents {
    transaction.net_amount()
}

/// Transactions in balance order.
#[derive(Debug)]
pub struct SortedTransactions<'a> {
    pub transactions: Vec<&'a Transaction>,
    /// One line per transaction whose date could not be parsed.
    pub warnings: Vec<String>,
}

struct Keyed<'a> {
    index: usize,
    date: Option<NaiveDate>,
    number: Option<TransactionNumber>,
    transaction: &'a Transaction,
}

impl Keyed<'_> {
    fn merge_key(&self) -> (bool, Option<NaiveDate>, usize) {
        (self.date.is_none(), self.date, self.index)
    }
}

/// Order `transactions` for accumulation.
pub fn sort_for_balance<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    dates: &DateResolver,
) -> SortedTransactions<'a> {
    let mut warnings = Vec::new();
    let mut numbered = Vec::new();
    let mut unnumbered = Vec::new();

    for (index, transaction) in transactions.into_iter().enumerate() {
        let date = dates.resolve(&transaction.transaction_date).ok();
        if date.is_none() {
            let warning = format!(
                "transaction {} has an unparsable date \"{}\"",
                transaction.id, transaction.transaction_date
            );
            tracing::warn!("{warning}");
            warnings.push(warning);
        }
        let keyed = Keyed {
            index,
            date,
            number: transaction.number(),
            transaction,
        };
        if keyed.number.is_some() {
            numbered.push(keyed);
        } else {
            unnumbered.push(keyed);
        }
    }

    numbered.sort_by(|a, b| number_order(a).cmp(&number_order(b)));
    unnumbered.sort_by_key(|k| (k.date.is_none(), k.date));

    SortedTransactions {
        transactions: merge(numbered.into_iter().peekable(), unnumbered.into_iter().peekable()),
        warnings,
    }
}

fn number_order<'a>(keyed: &Keyed<'a>) -> (Option<(i32, u32)>, Option<&'a str>) {
    (
        keyed.number.as_ref().map(|n| (n.year, n.sequence)),
        keyed.transaction.transaction_number.as_deref(),
    )
}

fn merge<'a, I>(mut left: Peekable<I>, mut right: Peekable<I>) -> Vec<&'a Transaction>
where
    I: Iterator<Item = Keyed<'a>>,
{
    let mut merged = Vec::new();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.merge_key() <= r.merge_key(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        if let Some(keyed) = next {
            merged.push(keyed.transaction);
        }
    }
    merged
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceEntry {
    pub transaction_id: String,
    pub balance: MoneyCents,
}

/// Running balance after each transaction, in balance order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunningBalances {
    pub entries: Vec<BalanceEntry>,
    /// Balance after the last transaction (the starting balance when empty).
    pub closing: MoneyCents,
    pub warnings: Vec<String>,
}

impl RunningBalances {
    #[must_use]
    pub fn get(&self, transaction_id: &str) -> Option<MoneyCents> {
        self.entries
            .iter()
            .find(|entry| entry.transaction_id == transaction_id)
            .map(|entry| entry.balance)
    }

    #[must_use]
    pub fn by_id(&self) -> HashMap<String, MoneyCents> {
        self.entries
            .iter()
            .map(|entry| (entry.transaction_id.clone(), entry.balance))
            .collect()
    }
}

pub fn running_balances<'a>(
    transactions: impl IntoIterator<Item = &'a Transaction>,
    starting_balance: MoneyCents,
    dates: &DateResolver,
) -> RunningBalances {
    let sorted = sort_for_balance(transactions, dates);
    let mut balance = starting_balance;
    let entries = sorted
        .transactions
        .iter()
        .map(|transaction| {
            balance += net_amount(transaction);
            BalanceEntry {
                transaction_id: transaction.id.clone(),
                balance,
            }
        })
        .collect();
    RunningBalances {
        entries,
        closing: balance,
        warnings: sorted.warnings,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YearStartSource {
    /// Read from `year_end_balances[year - 1]`.
    Cache,
    /// Summed from the account's history.
    Computed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct YearStart {
    pub balance: MoneyCents,
    pub source: YearStartSource,
}

/// Balance of `account` on 1 January of `year`.
pub fn year_start_balance<'a>(
    account: &BankAccount,
    year: i32,
    transactions: impl IntoIterator<Item = &'a Transaction>,
    dates: &DateResolver,
) -> YearStart {
    if let Some(balance) = account.year_end_balance(year - 1) {
        return YearStart {
            balance,
            source: YearStartSource::Cache,
        };
    }
    YearStart {
        balance: balance_at_year_end(account, year - 1, transactions, dates),
        source: YearStartSource::Computed,
    }
}

/// Closing balance of `account` on 31 December of `year`, always from
/// history. Transactions with unparsable dates are left out.
pub fn balance_at_year_end<'a>(
    account: &BankAccount,
    year: i32,
    transactions: impl IntoIterator<Item = &'a Transaction>,
    dates: &DateResolver,
) -> MoneyCents {
    account.initial_amount
        + transactions
            .into_iter()
            .filter(|t| t.bank_account_id == account.id)
            .filter(|t| {
                dates
                    .resolve(&t.transaction_date)
                    .is_ok_and(|date| date.year() <= year)
            })
            .map(net_amount)
            .sum::<MoneyCents>()
}

/// Closing balance for every year from the first to the last dated year of
/// the account. Years without transactions carry the previous balance.
pub fn year_end_balances<'a>(
    account: &BankAccount,
    transactions: impl IntoIterator<Item = &'a Transaction>,
    dates: &DateResolver,
) -> BTreeMap<i32, MoneyCents> {
    let mut per_year: BTreeMap<i32, MoneyCents> = BTreeMap::new();
    for transaction in transactions
        .into_iter()
        .filter(|t| t.bank_account_id == account.id)
    {
        if let Ok(date) = dates.resolve(&transaction.transaction_date) {
            *per_year.entry(date.year()).or_default() += net_amount(transaction);
        }
    }

    let (Some(&first), Some(&last)) = (per_year.keys().next(), per_year.keys().next_back()) else {
        return BTreeMap::new();
    };
    let mut balance = account.initial_amount;
    (first..=last)
        .map(|year| {
            balance += per_year.get(&year).copied().unwrap_or_default();
            (year, balance)
        })
        .collect()
}

/// Balances for the `filtered` transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptimizedBalances {
    pub balances: HashMap<String, MoneyCents>,
    /// Accounts whose year-start balance came from the year-end cache.
    pub cache_hits: usize,
    pub warnings: Vec<String>,
}

/// Running balances of `filtered`, a subset of `all`.
///
/// With a year filter each account starts from its year-start balance and
/// only its filtered transactions are accumulated. Without one, the whole
/// history of each account is accumulated from `initial_amount`.
pub fn optimized_balances(
    filtered: &[Transaction],
    all: &[Transaction],
    accounts: &[BankAccount],
    year_filter: Option<i32>,
    dates: &DateResolver,
) -> OptimizedBalances {
    let mut result = OptimizedBalances::default();
    let wanted: HashSet<&str> = filtered.iter().map(|t| t.id.as_str()).collect();
    for account in accounts {
        let own = |t: &&Transaction| t.bank_account_id == account.id;
        let running = match year_filter {
            Some(year) => {
                let start = year_start_balance(account, year, all.iter().filter(own), dates);
                if start.source == YearStartSource::Cache {
                    result.cache_hits += 1;
                }
                running_balances(filtered.iter().filter(own), start.balance, dates)
            }
            None => running_balances(all.iter().filter(own), account.initial_amount, dates),
        };
        result.warnings.extend(running.warnings.iter().cloned());
        for entry in running.entries {
            if wanted.contains(entry.transaction_id.as_str()) {
                result.balances.insert(entry.transaction_id, entry.balance);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(initial: i64) -> BankAccount {
        BankAccount {
            id: "acc".to_string(),
            ..BankAccount::new("Main", "IT00 0000 1234", MoneyCents::new(initial))
        }
    }

    fn txn(id: &str, date: &str, number: Option<&str>, net: i64) -> Transaction {
        Transaction {
            id: id.to_string(),
            bank_account_id: "acc".to_string(),
            transaction_number: number.map(ToString::to_string),
            transaction_date: date.to_string(),
            income: MoneyCents::new(net.max(0)),
            expense: MoneyCents::new((-net).max(0)),
            description: None,
            category: None,
            has_splits: false,
        }
    }

    fn ids(sorted: &SortedTransactions<'_>) -> Vec<String> {
        sorted.transactions.iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn running_balances_accumulate_by_date() {
        let txns = [
            txn("c", "2024-01-03", None, 300_00),
            txn("a", "2024-01-01", None, 500_00),
            txn("b", "2024-01-02", None, -200_00),
        ];
        let running = running_balances(&txns, MoneyCents::new(1000_00), &DateResolver::default());
        let balances: Vec<_> = running.entries.iter().map(|e| e.balance.cents()).collect();
        assert_eq!(balances, [1500_00, 1300_00, 1600_00]);
        assert_eq!(running.closing, MoneyCents::new(1600_00));
    }

    #[test]
    fn numbers_win_over_dates() {
        let txns = [
            txn("second", "2024-01-01", Some("TXN-2024-1234-0002"), 1),
            txn("first", "2024-01-05", Some("TXN-2024-1234-0001"), 1),
        ];
        let sorted = sort_for_balance(&txns, &DateResolver::default());
        assert_eq!(ids(&sorted), ["first", "second"]);
    }

    #[test]
    fn duplicate_numbers_keep_input_order() {
        let txns = [
            txn("x", "2024-02-01", Some("TXN-2024-1234-0007"), 1),
            txn("y", "2024-02-01", Some("TXN-2024-1234-0007"), 2),
            txn("z", "2024-01-01", Some("TXN-2024-1234-0007"), 3),
        ];
        let sorted = sort_for_balance(&txns, &DateResolver::default());
        assert_eq!(ids(&sorted), ["x", "y", "z"]);
    }

    #[test]
    fn unparsable_dates_sort_last_with_warning() {
        let txns = [
            txn("bad", "someday", None, 1),
            txn("late", "2024-06-01", None, 1),
            txn("early", "2024-01-01", None, 1),
        ];
        let sorted = sort_for_balance(&txns, &DateResolver::default());
        assert_eq!(ids(&sorted), ["early", "late", "bad"]);
        assert_eq!(sorted.warnings.len(), 1);
    }

    #[test]
    fn year_start_prefers_cache() {
        let mut acc = account(1000_00);
        let txns = [txn("a", "2024-03-01", None, 600_00)];
        let dates = DateResolver::default();

        let computed = year_start_balance(&acc, 2025, &txns, &dates);
        assert_eq!(computed.balance, MoneyCents::new(1600_00));
        assert_eq!(computed.source, YearStartSource::Computed);

        acc.year_end_balances.insert(2024, MoneyCents::new(1600_00));
        let cached = year_start_balance(&acc, 2025, std::iter::empty(), &dates);
        assert_eq!(cached.balance, MoneyCents::new(1600_00));
        assert_eq!(cached.source, YearStartSource::Cache);
    }

    #[test]
    fn year_end_fills_gap_years() {
        let txns = [
            txn("a", "2022-05-01", None, 100_00),
            txn("b", "2024-05-01", None, -50_00),
        ];
        let map = year_end_balances(&account(1000_00), &txns, &DateResolver::default());
        let expected: BTreeMap<_, _> = [
            (2022, MoneyCents::new(1100_00)),
            (2023, MoneyCents::new(1100_00)),
            (2024, MoneyCents::new(1050_00)),
        ]
        .into_iter()
        .collect();
        assert_eq!(map, expected);
    }

    #[test]
    fn optimized_balances_with_year_filter() {
        let mut acc = account(1000_00);
        acc.year_end_balances.insert(2023, MoneyCents::new(1200_00));
        let all = [
            txn("old", "2023-06-01", None, 200_00),
            txn("new", "2024-02-01", None, -100_00),
        ];
        let filtered = [all[1].clone()];
        let dates = DateResolver::default();

        let with_year = optimized_balances(&filtered, &all, &[acc.clone()], Some(2024), &dates);
        assert_eq!(with_year.balances["new"], MoneyCents::new(1100_00));
        assert_eq!(with_year.cache_hits, 1);

        let full = optimized_balances(&filtered, &all, &[acc], None, &dates);
        assert_eq!(full.balances.len(), 1);
        assert_eq!(full.balances["new"], MoneyCents::new(1100_00));
    }
}
