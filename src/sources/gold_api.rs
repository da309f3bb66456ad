//! GoldAPI JSON client
//!
//! Fetches the XAU spot price from www.goldapi.io. Requires an access
//! token in the `GOLDAPI_KEY` environment variable; a missing key
//! disables the adapter at construction.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sources::{validate_quote, PlausibilityBand, QuoteSource};
use crate::types::{Currency, Quote};

const GOLD_API_BASE: &str = "https://www.goldapi.io/api/XAU";

#[derive(Debug, Clone, Deserialize)]
struct GoldApiResponse {
    /// Spot price per troy ounce
    price: Option<f64>,
}

pub struct GoldApiSource {
    client: reqwest::Client,
    currency: Currency,
    band: PlausibilityBand,
    api_key: String,
}

impl GoldApiSource {
    /// Returns `None` when no API key is configured
    pub fn new(
        client: reqwest::Client,
        currency: Currency,
        band: PlausibilityBand,
    ) -> Option<Self> {
        let api_key = match std::env::var("GOLDAPI_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                warn!(source = "GoldAPI", "GOLDAPI_KEY not set, adapter disabled");
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
        let url = format!("{}/{}", GOLD_API_BASE, self.currency.code());
        let response = self
            .client
            .get(&url)
            .header("x-access-token", &self.api_key)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(source = "GoldAPI", currency = %self.currency, error = %e, "request failed");
                return None;
            }
        };

        let payload: GoldApiResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(source = "GoldAPI", currency = %self.currency, error = %e, "bad payload");
                return None;
            }
        };

        payload.price.and_then(Decimal::from_f64)
    }
}

#[async_trait]
impl QuoteSource for GoldApiSource {
    fn name(&self) -> &str {
        "GoldAPI"
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
