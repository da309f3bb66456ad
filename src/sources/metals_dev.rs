//! metals.dev JSON client
//!
//! Fetches the gold spot price per troy ounce from api.metals.dev.
//! Requires `METALS_DEV_KEY`; a missing key disables the adapter.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sources::{validate_quote, PlausibilityBand, QuoteSource};
use crate::types::{Currency, Quote};

const METALS_DEV_URL: &str = "https://api.metals.dev/v1/latest";

#[derive(Debug, Clone, Deserialize)]
struct MetalsDevResponse {
    metals: Option<MetalsDevMetals>,
}

#[derive(Debug, Clone, Deserialize)]
struct MetalsDevMetals {
    gold: Option<f64>,
}

pub struct MetalsDevSource {
    client: reqwest::Client,
    currency: Currency,
    band: PlausibilityBand,
    api_key: String,
}

impl MetalsDevSource {
    /// Returns `None` when no API key is configured
    pub fn new(
        client: reqwest::Client,
        currency: Currency,
        band: PlausibilityBand,
    ) -> Option<Self> {
        let api_key = match std::env::var("METALS_DEV_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                warn!(
                    source = "MetalsDev",
                    "METALS_DEV_KEY not set, adapter disabled"
                );
                return None;
            }
        };
        Some(Self {
            client,
            currency,
            band,
            api_key,
        })
    }

    async fn fetch_price(&self) -> Option<Decimal> {
        let request = self.client.get(METALS_DEV_URL).query(&[
            ("api_key", self.api_key.as_str()),
            ("currency", self.currency.code()),
            ("unit", "toz"),
        ]);

        let response = match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                warn!(source = "MetalsDev", currency = %self.currency, error = %e, "request failed");
                return None;
            }
        };

        let payload: MetalsDevResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(source = "MetalsDev", currency = %self.currency, error = %e, "bad payload");
                return None;
            }
        };

        payload
            .metals
            .and_then(|m| m.gold)
            .and_then(Decimal::from_f64)
    }
}

#[async_trait]
impl QuoteSource for MetalsDevSource {
    fn name(&self) -> &str {
        "MetalsDev"
    }

    fn currency(&self) -> Currency {
        self.currency
    }

    async fn fetch(&self) -> Quote {
        let raw = self.fetch_price().await;
        match validate_quote(self.name(), self.currency, raw, self.band) {
            Some(value) => {
                debug!(source = self.name(), currency = %self.currency, %value, "quote fetched");
                Quote::present(self.name(), self.currency, value)
            }
            None => Quote::absent(self.name(), self.currency),
        }
    }
}
