//! Tunables for the ledger engine.
//!
//! Every field has a default matching the behaviour the back-office has always
//! shipped with, so an empty configuration file is valid. Binaries load this
//! struct through the `config` crate; tests build it directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EngineError, MoneyCents, ResultEngine, dates::DateStrategy};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Maximum number of writes the store accepts in one atomic batch.
    pub batch_limit: usize,
    /// Bulk inputs up to this size are written one by one.
    pub serial_threshold: usize,
    /// Bulk inputs up to this size use sequential atomic chunks; above it the
    /// parallel strategy kicks in.
    pub atomic_threshold: usize,
    pub retry: RetrySettings,
    pub parallel: ParallelSettings,
    /// Date parsers, tried in order.
    pub date_formats: Vec<DateStrategy>,
    /// Largest difference two balances may have and still count as equal.
    pub balance_tolerance: MoneyCents,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            batch_limit: 500,
            serial_threshold: 50,
            atomic_threshold: 500,
            retry: RetrySettings::default(),
            parallel: ParallelSettings::default(),
            date_formats: DateStrategy::defaults(),
            balance_tolerance: MoneyCents::new(1),
        }
    }
}

impl LedgerSettings {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> ResultEngine<()> {
        if self.batch_limit == 0 {
            return Err(EngineError::Validation(
                "batch_limit must be greater than zero".to_string(),
            ));
        }
        if self.date_formats.is_empty() {
            return Err(EngineError::Validation(
                "at least one date format is required".to_string(),
            ));
        }
        self.parallel.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    pub chunk_divisor: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub concurrency_divisor: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    /// Pause between two waves of concurrent chunks.
    pub wave_pause_ms: u64,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            chunk_divisor: 20,
            min_chunk_size: 20,
            max_chunk_size: 100,
            concurrency_divisor: 200,
            min_concurrency: 3,
            max_concurrency: 8,
            wave_pause_ms: 100,
        }
    }
}

impl ParallelSettings {
    fn validate(&self) -> ResultEngine<()> {
        let bounds = [
            ("chunk size", self.min_chunk_size, self.max_chunk_size),
            ("concurrency", self.min_concurrency, self.max_concurrency),
        ];
        for (what, min, max) in bounds {
            if min == 0 || min > max {
                return Err(EngineError::Validation(format!(
                    "parallel {what} bounds must satisfy 0 < min <= max, got {min}..{max}"
                )));
            }
        }
        Ok(())
    }

    /// `clamp(n / chunk_divisor, min_chunk_size, max_chunk_size)`.
    #[must_use]
    pub fn chunk_size(&self, total: usize) -> usize {
        (total / self.chunk_divisor.max(1)).clamp(self.min_chunk_size, self.max_chunk_size)
    }

    /// `clamp(n / concurrency_divisor, min_concurrency, max_concurrency)`.
    #[must_use]
    pub fn concurrency(&self, total: usize) -> usize {
        (total / self.concurrency_divisor.max(1)).clamp(self.min_concurrency, self.max_concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let retry = RetrySettings::default();
        assert_eq!(retry.delay_for(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(4000));
        assert_eq!(retry.delay_for(4), Duration::from_millis(5000));
        assert_eq!(retry.delay_for(60), Duration::from_millis(5000));
    }

    #[test]
    fn parallel_sizing_is_clamped() {
        let parallel = ParallelSettings::default();
        assert_eq!(parallel.chunk_size(501), 25);
        assert_eq!(parallel.chunk_size(1200), 60);
        assert_eq!(parallel.chunk_size(10_000), 100);
        assert_eq!(parallel.concurrency(501), 3);
        assert_eq!(parallel.concurrency(1200), 6);
        assert_eq!(parallel.concurrency(10_000), 8);
    }

    #[test]
    fn inverted_parallel_bounds_are_rejected() {
        let mut settings = LedgerSettings::default();
        assert_eq!(settings.validate(), Ok(()));

        settings.parallel.min_concurrency = 9;
        assert!(matches!(
            settings.validate(),
            Err(EngineError::Validation(message)) if message.contains("concurrency")
        ));

        settings.parallel = ParallelSettings {
            min_chunk_size: 0,
            ..ParallelSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(EngineError::Validation(message)) if message.contains("chunk size")
        ));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let settings: LedgerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, LedgerSettings::default());
    }
}
