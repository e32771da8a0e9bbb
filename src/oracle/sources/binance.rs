//! Binance REST ticker adapter
//!
//! Pulls the 24h rolling ticker from the Binance spot API. Centralized
//! exchange prices are chain-agnostic, so this adapter only answers
//! requests without a chain.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::time::Duration;

use super::{http_client, parse_decimal, SourceAdapter};
use crate::types::{ChainId, PriceObservation};

const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3/ticker/24hr";

#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    source_id: String,
    base_url: String,
    quote_asset: String,
    client: reqwest::Client,
}

impl BinanceAdapter {
    pub fn new(source_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            source_id: source_id.into(),
            base_url: BINANCE_REST_URL.to_string(),
            quote_asset: "USDT".to_string(),
            client: http_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Get the trading pair (e.g., "ETHUSDT")
    fn trading_pair(&self, symbol: &str) -> String {
        format!("{}{}", symbol.to_uppercase(), self.quote_asset)
    }

    fn parse_ticker(&self, symbol: &str, ticker: &serde_json::Value) -> Result<PriceObservation> {
        let price = parse_decimal(&ticker["lastPrice"], "lastPrice")?;
        let volume = parse_decimal(&ticker["quoteVolume"], "quoteVolume").ok();
        let observed_at = ticker["closeTime"]
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let mut obs = PriceObservation::new(symbol, &self.source_id, price).observed_at(observed_at);
        obs.volume_24h = volume;
        Ok(obs)
    }
}

#[async_trait]
impl SourceAdapter for BinanceAdapter {
    fn supports(&self, _symbol: &str, chain: Option<ChainId>) -> bool {
        chain.is_none()
    }

    async fn fetch(
        &self,
        symbol: &str,
        _chain: Option<ChainId>,
        deadline: Duration,
    ) -> Result<PriceObservation> {
        let pair = self.trading_pair(symbol);

        tracing::debug!(source = %self.source_id, pair = %pair, "Fetching Binance ticker");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("symbol", pair.as_str())])
            .timeout(deadline)
            .send()
            .await
            .context("Failed to fetch ticker from Binance")?;

        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        let ticker: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Binance ticker response")?;

        self.parse_ticker(symbol, &ticker)
    }
}
