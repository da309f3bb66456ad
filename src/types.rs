//! Core types used throughout aurum
//!
//! Defines common data structures for quotes, consensus results and
//! persisted records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quote currencies the tracker reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Usd,
    Eur,
}

impl Currency {
    /// ISO code used by provider APIs
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Why a fetch cycle was triggered. Diagnostic only; every reason goes
/// through the same orchestrator guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchReason {
    Boot,
    Periodic,
    Fallback,
    NetworkAvailable,
    Manual,
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchReason::Boot => write!(f, "boot"),
            FetchReason::Periodic => write!(f, "periodic"),
            FetchReason::Fallback => write!(f, "fallback"),
            FetchReason::NetworkAvailable => write!(f, "network-available"),
            FetchReason::Manual => write!(f, "manual"),
        }
    }
}

/// One price point from one provider. Ephemeral; discarded after
/// consensus. `value` is `None` when the provider failed, returned an
/// unparseable payload, or fell outside the plausibility band.
#[derive(Debug, Clone)]
pub struct Quote {
    pub source: String,
    pub currency: Currency,
    pub value: Option<Decimal>,
}

impl Quote {
    pub fn present(source: impl Into<String>, currency: Currency, value: Decimal) -> Self {
        Self {
            source: source.into(),
            currency,
            value: Some(value),
        }
    }

    pub fn absent(source: impl Into<String>, currency: Currency) -> Self {
        Self {
            source: source.into(),
            currency,
            value: None,
        }
    }
}

/// Per-cycle consensus over one currency's quote set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusResult {
    pub currency: Currency,
    /// Mean of the kept set, rounded half-up to 2 decimals.
    /// Zero when no valid quote survived.
    pub value: Decimal,
    /// Quotes that carried a value at all
    pub considered: usize,
    /// Quotes that survived outlier trimming (or all valid quotes when
    /// trimming emptied the set)
    pub kept: usize,
    /// max - min over the valid set, diagnostic only
    pub spread: Decimal,
}

impl ConsensusResult {
    pub fn is_empty(&self) -> bool {
        self.kept == 0
    }
}

/// Latest consensus values. Singleton, overwritten each successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub usd: Decimal,
    pub eur: Decimal,
    pub eur_usd: Decimal,
    pub updated_ms: i64,
}

/// One row of the bounded rolling history (FIFO, capacity-bounded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub ts_ms: i64,
    pub usd: Decimal,
    pub eur: Decimal,
    pub fx: Decimal,
}

/// Most recent successful consensus regardless of day. Seeds a new day's
/// provisional open in the intraday series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLastQuote {
    pub value: Decimal,
    pub ts_ms: i64,
    pub day_key: String,
}

/// Format a UTC timestamp as the day key used by the intraday store
pub fn day_key(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn currency_round_trips_through_code() {
        assert_eq!(Currency::from_str("usd"), Some(Currency::Usd));
        assert_eq!(Currency::from_str("EUR"), Some(Currency::Eur));
        assert_eq!(Currency::from_str("GBP"), None);
        assert_eq!(Currency::Usd.code(), "USD");
    }

    #[test]
    fn day_key_is_utc_date() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap();
        assert_eq!(day_key(ts), "2024-03-07");
    }
}
