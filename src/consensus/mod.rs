//! Consensus Engine - reduces per-source quotes into one robust value
//!
//! Median-centered outlier trimming: quotes farther than an absolute
//! threshold from the median of the valid set are excluded, and the
//! consensus is the mean of what remains. If trimming empties the set
//! (systematic disagreement), the unfiltered valid set is used instead
//! so a cycle still produces a value.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};

use crate::types::{ConsensusResult, Currency, Quote};

/// Reduce one currency's quote set to a consensus value.
///
/// `outlier_threshold` is an absolute price distance from the median.
/// Zero valid quotes yields the zero sentinel (`kept == 0`).
pub fn consensus(
    currency: Currency,
    quotes: &[Quote],
    outlier_threshold: Decimal,
) -> ConsensusResult {
    let mut valid: Vec<Decimal> = quotes.iter().filter_map(|q| q.value).collect();

    if valid.is_empty() {
        warn!(%currency, sources = quotes.len(), "no valid quotes, consensus is empty");
        return ConsensusResult {
            currency,
            value: Decimal::ZERO,
            considered: 0,
            kept: 0,
            spread: Decimal::ZERO,
        };
    }

    valid.sort();
    let considered = valid.len();
    let spread = valid[considered - 1] - valid[0];
    let med = median(&valid);

    let kept: Vec<Decimal> = valid
        .iter()
        .copied()
        .filter(|v| (*v - med).abs() <= outlier_threshold)
        .collect();

    // Trimming emptied the set: sources disagree systematically, fall
    // back to the unfiltered mean rather than reporting an outage.
    let kept = if kept.is_empty() {
        warn!(
            %currency,
            considered,
            spread = %spread,
            threshold = %outlier_threshold,
            "outlier trimming emptied the kept set, using all valid quotes"
        );
        valid.clone()
    } else {
        kept
    };

    let value = rounded_mean(&kept);

    debug!(
        %currency,
        considered,
        kept = kept.len(),
        median = %med,
        value = %value,
        spread = %spread,
        "consensus computed"
    );

    ConsensusResult {
        currency,
        value,
        considered,
        kept: kept.len(),
        spread,
    }
}

/// Median of a sorted, non-empty slice
fn median(sorted: &[Decimal]) -> Decimal {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::TWO
    }
}

/// Mean at 6-decimal working precision, rounded half-up to 2 decimals
fn rounded_mean(values: &[Decimal]) -> Decimal {
    let sum: Decimal = values.iter().copied().sum();
    let mean = (sum / Decimal::from(values.len() as u64)).round_dp(6);
    mean.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
