//! Transaction date resolution.
//!
//! Stored transactions carry their date as text, and historical imports used
//! several layouts. A [`DateResolver`] tries an ordered list of
//! [`DateStrategy`] values and keeps the first one that yields a valid
//! calendar date.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

/// Layouts accepted by [`DateStrategy::Permissive`], after the configured
/// patterns have failed.
const PERMISSIVE_PATTERNS: &[&str] = &[
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d.%m.%Y",
    "%Y%m%d",
];

const PERMISSIVE_DATETIME_PATTERNS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One way of reading a date string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStrategy {
    /// A `chrono` format string, e.g. `%d-%b-%Y`.
    Pattern(String),
    /// RFC 3339 / ISO date-times and a handful of human layouts.
    Permissive,
}

impl DateStrategy {
    /// `DD-MMM-YYYY`, `YYYY-MM-DD`, `DD/MM/YYYY`, `MM/DD/YYYY`, then permissive.
    #[must_use]
    pub fn defaults() -> Vec<DateStrategy> {
        vec![
            Self::Pattern("%d-%b-%Y".to_string()),
            Self::Pattern("%Y-%m-%d".to_string()),
            Self::Pattern("%d/%m/%Y".to_string()),
            Self::Pattern("%m/%d/%Y".to_string()),
            Self::Permissive,
        ]
    }

    pub fn parse(&self, raw: &str) -> Option<NaiveDate> {
        match self {
            Self::Pattern(pattern) => NaiveDate::parse_from_str(raw, pattern).ok(),
            Self::Permissive => parse_permissive(raw),
        }
    }
}

fn parse_permissive(raw: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.date_naive());
    }
    PERMISSIVE_DATETIME_PATTERNS
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(raw, pattern).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            PERMISSIVE_PATTERNS
                .iter()
                .find_map(|pattern| NaiveDate::parse_from_str(raw, pattern).ok())
        })
}

/// Ordered chain of date strategies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateResolver {
    strategies: Vec<DateStrategy>,
}

impl Default for DateResolver {
    fn default() -> Self {
        Self::new(DateStrategy::defaults())
    }
}

impl DateResolver {
    #[must_use]
    pub fn new(strategies: Vec<DateStrategy>) -> Self {
        Self { strategies }
    }

    #[must_use]
    pub fn strategies(&self) -> &[DateStrategy] {
        &self.strategies
    }

    /// Resolve `raw` with the first strategy that accepts it.
    pub fn resolve(&self, raw: &str) -> ResultEngine<NaiveDate> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidDate(raw.to_string()));
        }
        self.strategies
            .iter()
            .find_map(|strategy| strategy.parse(trimmed))
            .ok_or_else(|| EngineError::InvalidDate(raw.to_string()))
    }

    /// Resolve and return only the fiscal year.
    pub fn year(&self, raw: &str) -> ResultEngine<i32> {
        self.resolve(raw).map(|date| date.year())
    }

    /// Canonical storage form (`YYYY-MM-DD`).
    pub fn canonicalize(&self, raw: &str) -> ResultEngine<String> {
        self.resolve(raw).map(|date| date.format("%Y-%m-%d").to_string())
    }
}
