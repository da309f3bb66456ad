//! EUR/USD exchange rate client (Frankfurter)
//!
//! The rate feeds the FX-derived EUR quote and the snapshot's `eur_usd`
//! field. Like the quote adapters it absorbs every failure into `None`.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

const FRANKFURTER_URL: &str = "https://api.frankfurter.dev/v1/latest";

/// EUR/USD rate provider seam; same absorb-all-failure contract as the
/// quote adapters
#[async_trait]
pub trait FxRateSource: Send + Sync {
    /// USD per EUR, or `None` on any failure
    async fn fetch_eur_usd(&self) -> Option<Decimal>;
}

#[derive(Debug, Clone, Deserialize)]
struct FrankfurterResponse {
    rates: HashMap<String, f64>,
}

pub struct FrankfurterFx {
    client: reqwest::Client,
}

impl FrankfurterFx {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FxRateSource for FrankfurterFx {
    async fn fetch_eur_usd(&self) -> Option<Decimal> {
        let request = self
            .client
            .get(FRANKFURTER_URL)
            .query(&[("base", "EUR"), ("symbols", "USD")]);

        let response = match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                warn!(source = "Frankfurter", error = %e, "fx request failed");
                return None;
            }
        };

        let payload: FrankfurterResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(source = "Frankfurter", error = %e, "bad fx payload");
                return None;
            }
        };

        let rate = payload
            .rates
            .get("USD")
            .copied()
            .filter(|r| *r > 0.0)
            .and_then(Decimal::from_f64);

        match rate {
            Some(r) => {
                debug!(source = "Frankfurter", rate = %r, "eur/usd rate fetched");
                Some(r)
            }
            None => {
                warn!(source = "Frankfurter", "fx payload missing USD rate");
                None
            }
        }
    }
}
