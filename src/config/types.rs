//! Typed settings derived from the raw configuration sections

use rust_decimal::Decimal;
use std::time::Duration;

use crate::oracle::{FetchConfig, ManipulationConfig};
use crate::types::ChainId;

/// Symbols and chains the scheduler keeps warm
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchList {
    pub symbols: Vec<String>,
    pub chains: Vec<ChainId>,
}

impl WatchList {
    /// Every cache key to refresh: the chain-agnostic key plus one per chain
    pub fn keys(&self) -> Vec<(String, Option<ChainId>)> {
        self.symbols
            .iter()
            .flat_map(|s| {
                std::iter::once((s.clone(), None))
                    .chain(self.chains.iter().map(move |c| (s.clone(), Some(*c))))
            })
            .collect()
    }
}

/// Everything the engine needs to build its components
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub stale_grace: Duration,
    pub serve_stale: bool,
    pub stale_quality_factor: Decimal,
    pub fetch: FetchConfig,
    pub min_sources: usize,
    pub min_healthy_sources: usize,
    pub quality_max_age: Duration,
    pub manipulation: ManipulationConfig,
    pub min_profit_pct: Decimal,
    pub watch_list: WatchList,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            stale_grace: Duration::from_secs(300),
            serve_stale: true,
            stale_quality_factor: Decimal::new(5, 1),
            fetch: FetchConfig::default(),
            min_sources: 2,
            min_healthy_sources: 2,
            quality_max_age: Duration::from_secs(300),
            manipulation: ManipulationConfig::default(),
            min_profit_pct: Decimal::new(5, 1),
            watch_list: WatchList::default(),
        }
    }
}

/// Periods of the three background loops
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub refresh_interval: Duration,
    pub arbitrage_interval: Duration,
    pub manipulation_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            arbitrage_interval: Duration::from_secs(30),
            manipulation_interval: Duration::from_secs(60),
        }
    }
}
