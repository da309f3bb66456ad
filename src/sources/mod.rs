//! Quote source implementations (GoldAPI, metals.dev, scraped spot page)
//!
//! Each adapter fetches one price point from one external provider and
//! is an independent failure domain: HTTP errors, timeouts, parse
//! failures, missing fields and out-of-band values all degrade to an
//! absent `Quote`, logged, never raised.

mod fx;
mod gold_api;
mod metals_dev;
mod spot_page;

pub use fx::{FrankfurterFx, FxRateSource};
pub use gold_api::GoldApiSource;
pub use metals_dev::MetalsDevSource;
pub use spot_page::SpotPageSource;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{ConsensusConfig, SourcesConfig};
use crate::types::{Currency, Quote};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) aurum/0.1";

/// Trait for price quote providers
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Provider name for logging and diagnostics
    fn name(&self) -> &str;

    /// Currency this adapter quotes in
    fn currency(&self) -> Currency;

    /// Fetch one price point. Never fails past this boundary.
    async fn fetch(&self) -> Quote;
}

/// Currency-specific plausibility band; out-of-band quotes become absent
#[derive(Debug, Clone, Copy)]
pub struct PlausibilityBand {
    pub min: Decimal,
    pub max: Decimal,
}

impl PlausibilityBand {
    pub fn new(min: f64, max: f64) -> Option<Self> {
        Some(Self {
            min: Decimal::from_f64(min)?,
            max: Decimal::from_f64(max)?,
        })
    }

    pub fn contains(&self, value: Decimal) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Shared HTTP client for all adapters (pooled, rustls)
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

/// Validate a raw provider value against the plausibility band.
/// Logs and returns `None` when the value is missing or out of band.
pub(crate) fn validate_quote(
    source: &str,
    currency: Currency,
    value: Option<Decimal>,
    band: PlausibilityBand,
) -> Option<Decimal> {
    match value {
        Some(v) if band.contains(v) => Some(v),
        Some(v) => {
            warn!(source, %currency, value = %v, min = %band.min, max = %band.max,
                "quote outside plausibility band, dropping");
            None
        }
        None => {
            warn!(source, %currency, "provider returned no usable value");
            None
        }
    }
}

/// Per-currency adapter sets plus the FX rate source, built from config
pub struct SourceSet {
    pub usd: Vec<Arc<dyn QuoteSource>>,
    pub eur: Vec<Arc<dyn QuoteSource>>,
    pub fx: Arc<dyn FxRateSource>,
}

/// Construct every enabled adapter for both currency groups. Adapters
/// whose API key is missing are skipped (logged by their constructors);
/// at least one adapter in some group is required.
pub fn build_sources(sources: &SourcesConfig, consensus: &ConsensusConfig) -> Result<SourceSet> {
    let client = http_client(sources.timeout_secs)?;

    let usd_band = PlausibilityBand::new(consensus.usd_band_min, consensus.usd_band_max)
        .context("invalid USD plausibility band")?;
    let eur_band = PlausibilityBand::new(consensus.eur_band_min, consensus.eur_band_max)
        .context("invalid EUR plausibility band")?;

    let mut usd: Vec<Arc<dyn QuoteSource>> = Vec::new();
    let mut eur: Vec<Arc<dyn QuoteSource>> = Vec::new();

    if sources.gold_api_enabled {
        if let Some(s) = GoldApiSource::new(client.clone(), Currency::Usd, usd_band) {
            usd.push(Arc::new(s));
        }
        if let Some(s) = GoldApiSource::new(client.clone(), Currency::Eur, eur_band) {
            eur.push(Arc::new(s));
        }
    }
    if sources.metals_dev_enabled {
        if let Some(s) = MetalsDevSource::new(client.clone(), Currency::Usd, usd_band) {
            usd.push(Arc::new(s));
        }
        if let Some(s) = MetalsDevSource::new(client.clone(), Currency::Eur, eur_band) {
            eur.push(Arc::new(s));
        }
    }
    if sources.spot_page_enabled {
        usd.push(Arc::new(SpotPageSource::new(
            client.clone(),
            Currency::Usd,
            usd_band,
            &sources.spot_page_url,
        )?));
        eur.push(Arc::new(SpotPageSource::new(
            client.clone(),
            Currency::Eur,
            eur_band,
            &sources.spot_page_url,
        )?));
    }

    if usd.is_empty() && eur.is_empty() {
        bail!("no quote sources enabled or configured");
    }

    info!(
        usd_sources = usd.len(),
        eur_sources = eur.len(),
        "quote sources ready"
    );

    Ok(SourceSet {
        usd,
        eur,
        fx: Arc::new(FrankfurterFx::new(client)),
    })
}

/// Parse localized numeric text into a Decimal.
///
/// The later of the last comma / last dot is the decimal separator; the
/// other, if present, is a thousands separator to strip. A lone comma is
/// treated as the decimal separator.
pub fn parse_price_text(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    normalized.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_handles_comma_decimal_with_dot_thousands() {
        assert_eq!(parse_price_text("1.850,25"), Some(dec!(1850.25)));
    }

    #[test]
    fn parse_handles_dot_decimal_with_comma_thousands() {
        assert_eq!(parse_price_text("1,850.25"), Some(dec!(1850.25)));
    }

    #[test]
    fn lone_comma_is_decimal_separator() {
        assert_eq!(parse_price_text("1850,25"), Some(dec!(1850.25)));
        assert_eq!(parse_price_text("1,850"), Some(dec!(1.850)));
    }

    #[test]
    fn plain_numbers_parse_directly() {
        assert_eq!(parse_price_text("1850.25"), Some(dec!(1850.25)));
        assert_eq!(parse_price_text("1850"), Some(dec!(1850)));
    }

    #[test]
    fn surrounding_markup_is_ignored() {
        assert_eq!(parse_price_text(" $ 1,850.25 /oz"), Some(dec!(1850.25)));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(parse_price_text("n/a"), None);
        assert_eq!(parse_price_text(""), None);
    }

    #[test]
    fn band_drops_out_of_range_values() {
        let band = PlausibilityBand::new(200.0, 15000.0).unwrap();
        assert_eq!(
            validate_quote("test", Currency::Usd, Some(dec!(1850)), band),
            Some(dec!(1850))
        );
        assert_eq!(
            validate_quote("test", Currency::Usd, Some(dec!(50)), band),
            None
        );
        assert_eq!(
            validate_quote("test", Currency::Usd, Some(dec!(20000)), band),
            None
        );
        assert_eq!(validate_quote("test", Currency::Usd, None, band), None);
    }
}
