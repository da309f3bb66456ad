//! Scraped spot-price page client
//!
//! Pulls the gold spot price out of a provider's HTML page with a
//! per-currency regex. Scraped pages use localized number formatting,
//! so the captured text goes through `parse_price_text`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::sources::{parse_price_text, validate_quote, PlausibilityBand, QuoteSource};
use crate::types::{Currency, Quote};

pub struct SpotPageSource {
    client: reqwest::Client,
    currency: Currency,
    band: PlausibilityBand,
    url: String,
    pattern: Regex,
}

impl SpotPageSource {
    pub fn new(
        client: reqwest::Client,
        currency: Currency,
        band: PlausibilityBand,
        url: impl Into<String>,
    ) -> Result<Self> {
        // The page renders one price element per currency, e.g.
        //   <span class="spot-price" data-currency="USD">1,850.25</span>
        let pattern = Regex::new(&format!(
            r#"data-currency="{}"[^>]*>\s*([0-9][0-9.,]*)"#,
            currency.code()
        ))
        .context("Failed to compile spot page pattern")?;

        Ok(Self {
            client,
            currency,
            band,
            url: url.into(),
            pattern,
        })
    }

    fn extract(&self, html: &str) -> Option<Decimal> {
        let captured = self.pattern.captures(html)?.get(1)?.as_str().to_string();
        parse_price_text(&captured)
    }

    async fn fetch_price(&self) -> Option<Decimal> {
        let response = match self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(r) => r,
            Err(e) => {
                warn!(source = "SpotPage", currency = %self.currency, error = %e, "request failed");
                return None;
            }
        };

        let html = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(source = "SpotPage", currency = %self.currency, error = %e, "body read failed");
                return None;
            }
        };

        let value = self.extract(&html);
        if value.is_none() {
            warn!(source = "SpotPage", currency = %self.currency, "price not found in page");
        }
        value
    }
}

#[async_trait]
impl QuoteSource for SpotPageSource {
    fn name(&self) -> &str {
        "SpotPage"
    }

    fn currency(&self) -> Currency {
        self.currency
    }

    async fn fetch(&self) -> Quote {
        let raw = self.fetch_price().await;
        match validate_quote(self.name(), self.currency, raw, self.band) {
            Some(value) => {
                debug!(source = self.name(), currency = %self.currency, %value, "quote scraped");
                Quote::present(self.name(), self.currency, value)
            }
            None => Quote::absent(self.name(), self.currency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn source(currency: Currency) -> SpotPageSource {
        SpotPageSource::new(
            reqwest::Client::new(),
            currency,
            PlausibilityBand::new(200.0, 15000.0).unwrap(),
            "https://example.invalid/gold",
        )
        .unwrap()
    }

    #[test]
    fn extracts_usd_price_from_markup() {
        let html = r#"
            <div class="prices">
              <span class="spot-price" data-currency="USD">1,850.25</span>
              <span class="spot-price" data-currency="EUR">1.701,10</span>
            </div>"#;
        assert_eq!(source(Currency::Usd).extract(html), Some(dec!(1850.25)));
    }

    #[test]
    fn extracts_localized_eur_price() {
        let html = r#"<span class="spot-price" data-currency="EUR">1.701,10</span>"#;
        assert_eq!(source(Currency::Eur).extract(html), Some(dec!(1701.10)));
    }

    #[test]
    fn missing_element_yields_none() {
        let html = "<html><body>maintenance</body></html>";
        assert_eq!(source(Currency::Usd).extract(html), None);
    }
}
