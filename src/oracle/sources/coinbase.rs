//! Coinbase Exchange REST ticker adapter

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use super::{http_client, SourceAdapter};
use crate::types::{ChainId, PriceObservation};

const COINBASE_REST_URL: &str = "https://api.exchange.coinbase.com/products";

#[derive(Debug, Clone, Deserialize)]
struct CoinbaseTicker {
    price: String,
    volume: Option<String>,
    time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoinbaseAdapter {
    source_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl CoinbaseAdapter {
    pub fn new(source_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            source_id: source_id.into(),
            base_url: COINBASE_REST_URL.to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the product id (e.g., "ETH-USD")
    fn product_id(symbol: &str) -> String {
        format!("{}-USD", symbol.to_uppercase())
    }

    fn to_observation(&self, symbol: &str, ticker: CoinbaseTicker) -> Result<PriceObservation> {
        let price = Decimal::from_str(&ticker.price)
            .with_context(|| format!("Invalid Coinbase price: {}", ticker.price))?;

        // Coinbase reports base-asset volume; convert to quote terms
        let volume = ticker
            .volume
            .as_deref()
            .and_then(|v| Decimal::from_str(v).ok())
            .and_then(|v| v.checked_mul(price));

        let observed_at = ticker
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut obs = PriceObservation::new(symbol, &self.source_id, price).observed_at(observed_at);
        obs.volume_24h = volume;
        Ok(obs)
    }
}

#[async_trait]
impl SourceAdapter for CoinbaseAdapter {
    fn supports(&self, _symbol: &str, chain: Option<ChainId>) -> bool {
        chain.is_none()
    }

    async fn fetch(
        &self,
        symbol: &str,
        _chain: Option<ChainId>,
        deadline: Duration,
    ) -> Result<PriceObservation> {
        let url = format!("{}/{}/ticker", self.base_url, Self::product_id(symbol));

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "pricemesh")
            .timeout(deadline)
            .send()
            .await
            .context("Failed to fetch ticker from Coinbase")?;

        if !response.status().is_success() {
            bail!("Coinbase API returned error: {}", response.status());
        }

        let ticker: CoinbaseTicker = response
            .json()
            .await
            .context("Failed to parse Coinbase ticker response")?;

        self.to_observation(symbol, ticker)
    }
}
