//! Generic HTTP JSON adapter
//!
//! Covers oracle gateways, DEX pool readers and custom feeds that expose a
//! JSON document per symbol. The URL template may contain `{symbol}` and
//! `{chain}`; fields are located with JSON pointers (RFC 6901).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{http_client, parse_decimal, SourceAdapter};
use crate::types::{ChainId, PriceObservation};

/// Endpoint description for one HTTP JSON source
#[derive(Debug, Clone, Deserialize)]
pub struct HttpJsonSpec {
    pub url: String,
    pub price_pointer: String,
    #[serde(default)]
    pub volume_pointer: Option<String>,
    #[serde(default)]
    pub liquidity_pointer: Option<String>,
    #[serde(default)]
    pub confidence_pointer: Option<String>,
    /// Chains served; empty means chain-agnostic
    #[serde(default)]
    pub chains: Vec<u64>,
    /// Symbols served; empty means any
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HttpJsonAdapter {
    source_id: String,
    spec: HttpJsonSpec,
    client: reqwest::Client,
}

impl HttpJsonAdapter {
    pub fn new(source_id: impl Into<String>, spec: HttpJsonSpec) -> Result<Self> {
        if !spec.price_pointer.starts_with('/') {
            bail!("price_pointer must be a JSON pointer: {}", spec.price_pointer);
        }
        Ok(Self {
            source_id: source_id.into(),
            spec,
            client: http_client()?,
        })
    }

    fn render_url(&self, symbol: &str, chain: Option<ChainId>) -> String {
        let chain = chain.map(|c| c.to_string()).unwrap_or_default();
        self.spec
            .url
            .replace("{symbol}", symbol)
            .replace("{chain}", &chain)
    }

    fn extract(
        &self,
        symbol: &str,
        chain: Option<ChainId>,
        body: &serde_json::Value,
    ) -> Result<PriceObservation> {
        let price_value = body
            .pointer(&self.spec.price_pointer)
            .with_context(|| format!("No value at {}", self.spec.price_pointer))?;
        let price = parse_decimal(price_value, "price")?;
        if price.is_sign_negative() || price.is_zero() {
            bail!("Non-positive price from {}: {}", self.source_id, price);
        }

        let optional = |pointer: &Option<String>, field: &str| {
            pointer
                .as_deref()
                .and_then(|p| body.pointer(p))
                .and_then(|v| parse_decimal(v, field).ok())
        };

        let mut obs = PriceObservation::new(symbol, &self.source_id, price);
        obs.volume_24h = optional(&self.spec.volume_pointer, "volume");
        if let Some(confidence) = optional(&self.spec.confidence_pointer, "confidence") {
            obs.confidence = confidence.clamp(rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ONE);
        }
        if let Some(chain) = chain {
            obs = obs.with_chain(chain, optional(&self.spec.liquidity_pointer, "liquidity"));
        }
        Ok(obs)
    }
}

#[async_trait]
impl SourceAdapter for HttpJsonAdapter {
    fn supports(&self, symbol: &str, chain: Option<ChainId>) -> bool {
        let symbol_ok = self.spec.symbols.is_empty()
            || self.spec.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol));
        let chain_ok = match chain {
            Some(c) => self.spec.chains.contains(&c.0),
            None => self.spec.chains.is_empty(),
        };
        symbol_ok && chain_ok
    }

    async fn fetch(
        &self,
        symbol: &str,
        chain: Option<ChainId>,
        deadline: Duration,
    ) -> Result<PriceObservation> {
        let url = self.render_url(symbol, chain);

        let response = self
            .client
            .get(&url)
            .timeout(deadline)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", self.source_id))?;

        if !response.status().is_success() {
            bail!("{} returned error: {}", self.source_id, response.status());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.source_id))?;

        self.extract(symbol, chain, &body)
    }
}
