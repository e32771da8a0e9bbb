//! Core types used throughout PriceMesh
//!
//! Defines sources, observations, consensus prices and arbitrage signals.
//! Every monetary quantity is a [`Decimal`] so that consensus math is
//! reproducible bit-for-bit; serde renders decimals as strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Fractional digits kept on every computed price and percentage.
pub const PRICE_SCALE: u32 = 18;

/// Default per-adapter deadline when a source declares no latency budget.
pub const DEFAULT_LATENCY_BUDGET: Duration = Duration::from_secs(5);

/// EVM-style numeric chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

/// Upstream category of a price source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    OnChainOracle,
    DecentralizedExchange,
    CentralizedExchange,
    Custom,
}

impl SourceKind {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "on_chain_oracle" | "oracle" => Some(SourceKind::OnChainOracle),
            "decentralized_exchange" | "dex" => Some(SourceKind::DecentralizedExchange),
            "centralized_exchange" | "cex" => Some(SourceKind::CentralizedExchange),
            "custom" => Some(SourceKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::OnChainOracle => write!(f, "on-chain-oracle"),
            SourceKind::DecentralizedExchange => write!(f, "decentralized-exchange"),
            SourceKind::CentralizedExchange => write!(f, "centralized-exchange"),
            SourceKind::Custom => write!(f, "custom"),
        }
    }
}

/// Static trust parameters of a registered source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSource {
    pub id: String,
    pub kind: SourceKind,
    /// Relative trust; weights across sources need not sum to 1
    pub weight: Decimal,
    /// Historical uptime/accuracy in [0, 1]
    pub reliability: Decimal,
    /// Deadline applied to every fetch against this source
    #[serde(with = "duration_ms")]
    pub latency_budget: Duration,
}

impl PriceSource {
    pub fn new(id: impl Into<String>, kind: SourceKind, weight: Decimal, reliability: Decimal) -> Self {
        Self {
            id: id.into(),
            kind,
            weight,
            reliability,
            latency_budget: DEFAULT_LATENCY_BUDGET,
        }
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }
}

/// One source's answer for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    pub source_id: String,
    /// Source-reported certainty in [0, 1]; adapters default to 1
    pub confidence: Decimal,
    pub volume_24h: Option<Decimal>,
    /// Set by chain-aware adapters (DEX pools, on-chain oracles)
    pub chain_id: Option<ChainId>,
    /// Pool liquidity backing the price on `chain_id`
    pub liquidity: Option<Decimal>,
}

impl PriceObservation {
    pub fn new(symbol: impl Into<String>, source_id: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            observed_at: Utc::now(),
            source_id: source_id.into(),
            confidence: Decimal::ONE,
            volume_24h: None,
            chain_id: None,
            liquidity: None,
        }
    }

    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_volume(mut self, volume_24h: Decimal) -> Self {
        self.volume_24h = Some(volume_24h);
        self
    }

    pub fn with_chain(mut self, chain_id: ChainId, liquidity: Option<Decimal>) -> Self {
        self.chain_id = Some(chain_id);
        self.liquidity = liquidity;
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// Per-chain price and backing liquidity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPrice {
    pub price: Decimal,
    pub liquidity: Decimal,
}

/// Consensus record produced by one aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub symbol: String,
    /// Cache key chain; `None` for the chain-agnostic consensus
    pub chain_id: Option<ChainId>,
    pub price: Decimal,
    pub computed_at: DateTime<Utc>,
    /// Monotonic aggregation stamp, assigned when the cycle starts
    pub sequence: u64,
    pub confidence: Decimal,
    /// Max relative distance of any observation from consensus, in percent
    pub deviation_pct: Decimal,
    /// (max - min) / consensus across observations, in percent
    pub spread_pct: Decimal,
    pub quality_score: Decimal,
    pub manipulation_risk: Decimal,
    pub volume_24h: Option<Decimal>,
    pub observation_count: usize,
    pub chain_prices: BTreeMap<ChainId, ChainPrice>,
    pub contributing_sources: Vec<PriceSource>,
    /// Served from an expired cache entry because every source failed
    #[serde(default)]
    pub stale: bool,
}

/// Which leg to buy in a cross-chain discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrageDirection {
    BuySourceSellTarget,
    BuyTargetSellSource,
}

impl fmt::Display for ArbitrageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbitrageDirection::BuySourceSellTarget => write!(f, "BUY_SOURCE_SELL_TARGET"),
            ArbitrageDirection::BuyTargetSellSource => write!(f, "BUY_TARGET_SELL_SOURCE"),
        }
    }
}

/// Point-in-time cross-chain price discrepancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub symbol: String,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub source_price: Decimal,
    pub target_price: Decimal,
    pub price_difference_pct: Decimal,
    pub direction: ArbitrageDirection,
    pub detected_at: DateTime<Utc>,
}

/// Result of a manipulation check for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManipulationStatus {
    pub symbol: String,
    pub chain_id: Option<ChainId>,
    pub detected: bool,
    /// Additive heuristic score in [0, 1]
    pub confidence: Decimal,
    pub evidence: Vec<String>,
    /// False when the rolling history is too short to judge
    pub sufficient_history: bool,
}

impl ManipulationStatus {
    pub fn insufficient(symbol: &str, chain_id: Option<ChainId>, have: usize, need: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            chain_id,
            detected: false,
            confidence: Decimal::ZERO,
            evidence: vec![format!("insufficient history: {} of {} points", have, need)],
            sufficient_history: false,
        }
    }
}

/// Uppercase, trimmed symbol used for every key
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
