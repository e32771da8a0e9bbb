//! Source adapter implementations (Binance, Coinbase, generic HTTP JSON)

mod binance;
mod coinbase;
mod http_json;

pub use binance::BinanceAdapter;
pub use coinbase::CoinbaseAdapter;
pub use http_json::{HttpJsonAdapter, HttpJsonSpec};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::types::{ChainId, PriceObservation};

/// Trait for per-upstream price connectors
///
/// Implementations must honour `deadline`; the coordinator additionally
/// wraps every call in its own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Whether this upstream can price `symbol` on `chain`
    fn supports(&self, _symbol: &str, _chain: Option<ChainId>) -> bool {
        true
    }

    /// Fetch one observation
    async fn fetch(
        &self,
        symbol: &str,
        chain: Option<ChainId>,
        deadline: Duration,
    ) -> Result<PriceObservation>;
}

/// Shared HTTP client for REST adapters
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")
}

/// Parse an exchange decimal string without passing through f64
pub(crate) fn parse_decimal(value: &serde_json::Value, field: &str) -> Result<Decimal> {
    match value {
        serde_json::Value::String(s) => {
            Decimal::from_str(s).with_context(|| format!("Invalid decimal in {}: {}", field, s))
        }
        serde_json::Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .with_context(|| format!("Invalid number in {}: {}", field, s))
        }
        _ => anyhow::bail!("Missing {}", field),
    }
}
