//! Configuration management for PriceMesh
//!
//! Loads from YAML files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::oracle::sources::{BinanceAdapter, CoinbaseAdapter, HttpJsonAdapter, HttpJsonSpec};
use crate::oracle::SourceAdapter;
use crate::types::{ChainId, PriceSource, SourceKind};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub quality: QualitySection,
    pub manipulation: ManipulationSection,
    pub arbitrage: ArbitrageSection,
    pub scheduler: SchedulerSection,
    pub watch_list: WatchListSection,
    #[serde(default)]
    pub sources: Vec<SourceSection>,
    pub persistence: PersistenceSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// TTL of on-demand cache entries in seconds
    pub cache_ttl_secs: u64,
    /// How long an expired entry may still be served as stale, in seconds
    pub stale_grace_secs: u64,
    /// Serve stale entries when every source fails
    pub serve_stale: bool,
    /// Multiplier applied to the quality score of stale entries
    pub stale_quality_factor: f64,
    /// Deadline for sources without a latency budget, in milliseconds
    pub default_source_timeout_ms: u64,
    /// In-flight adapter calls per fetch (0 = one per source)
    pub max_concurrent_fetches: usize,
    /// Sources needed before the source count stops lowering confidence
    pub min_sources: usize,
    /// Fewer responders than this raises a degradation alert
    pub min_healthy_sources: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualitySection {
    /// Age in seconds at which an observation has zero influence
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManipulationSection {
    pub window: usize,
    pub min_history: usize,
    pub sample_interval_secs: u64,
    pub sudden_move_pct: f64,
    pub sudden_move_weight: f64,
    pub volume_multiplier: f64,
    pub volume_weight: f64,
    pub spread_high_pct: f64,
    pub spread_high_weight: f64,
    pub spread_low_pct: f64,
    pub spread_low_weight: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageSection {
    /// Minimum cross-chain difference in percent
    pub min_profit_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
    pub arbitrage_interval_secs: u64,
    pub manipulation_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchListSection {
    /// Symbols kept warm in cache
    pub symbols: Vec<String>,
    /// Chains refreshed per symbol in addition to the chain-agnostic key
    #[serde(default)]
    pub chains: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub id: String,
    /// on_chain_oracle | decentralized_exchange | centralized_exchange | custom
    pub kind: String,
    /// binance | coinbase | http_json
    pub adapter: String,
    pub weight: f64,
    pub reliability: f64,
    #[serde(default)]
    pub latency_budget_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override endpoint for REST adapters
    #[serde(default)]
    pub base_url: Option<String>,
    /// Endpoint description for `http_json`
    #[serde(default)]
    pub http: Option<HttpJsonSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    pub data_dir: String,
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

fn default_true() -> bool {
    true
}

fn decimal(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64(value).with_context(|| format!("{} is not a finite number", field))
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let builder = Self::with_defaults(Config::builder())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEMESH__*)
            .add_source(
                Environment::with_prefix("PRICEMESH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("watch_list.symbols")
                    .with_list_parse_key("watch_list.chains")
                    .try_parsing(true),
            );

        let app_config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Built-in defaults only, without files or environment
    pub fn defaults() -> Result<Self> {
        let config: AppConfig = Self::with_defaults(Config::builder())?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(builder
            // Engine defaults
            .set_default("engine.cache_ttl_secs", 30)?
            .set_default("engine.stale_grace_secs", 300)?
            .set_default("engine.serve_stale", true)?
            .set_default("engine.stale_quality_factor", 0.5)?
            .set_default("engine.default_source_timeout_ms", 5000)?
            .set_default("engine.max_concurrent_fetches", 0)?
            .set_default("engine.min_sources", 2)?
            .set_default("engine.min_healthy_sources", 2)?
            // Quality defaults
            .set_default("quality.max_age_secs", 300)?
            // Manipulation defaults
            .set_default("manipulation.window", 60)?
            .set_default("manipulation.min_history", 10)?
            .set_default("manipulation.sample_interval_secs", 60)?
            .set_default("manipulation.sudden_move_pct", 10.0)?
            .set_default("manipulation.sudden_move_weight", 0.3)?
            .set_default("manipulation.volume_multiplier", 5.0)?
            .set_default("manipulation.volume_weight", 0.4)?
            .set_default("manipulation.spread_high_pct", 5.0)?
            .set_default("manipulation.spread_high_weight", 0.3)?
            .set_default("manipulation.spread_low_pct", 2.0)?
            .set_default("manipulation.spread_low_weight", 0.15)?
            .set_default("manipulation.threshold", 0.7)?
            // Arbitrage defaults
            .set_default("arbitrage.min_profit_pct", 0.5)?
            // Scheduler defaults
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.refresh_interval_secs", 10)?
            .set_default("scheduler.arbitrage_interval_secs", 30)?
            .set_default("scheduler.manipulation_interval_secs", 60)?
            // Watch-list defaults
            .set_default("watch_list.symbols", vec!["BTC", "ETH"])?
            .set_default("watch_list.chains", Vec::<u64>::new())?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", false)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.cache_ttl_secs == 0 {
            bail!("engine.cache_ttl_secs must be positive");
        }
        if !(0.0..=1.0).contains(&self.engine.stale_quality_factor) {
            bail!("engine.stale_quality_factor must be within [0, 1]");
        }
        if self.manipulation.window < self.manipulation.min_history {
            bail!("manipulation.window must be at least manipulation.min_history");
        }
        if self.scheduler.refresh_interval_secs == 0
            || self.scheduler.arbitrage_interval_secs == 0
            || self.scheduler.manipulation_interval_secs == 0
        {
            bail!("scheduler intervals must be positive");
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                bail!("duplicate source id in config: {}", source.id);
            }
            source.to_price_source()?;
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            cache_ttl: Duration::from_secs(self.engine.cache_ttl_secs),
            stale_grace: Duration::from_secs(self.engine.stale_grace_secs),
            serve_stale: self.engine.serve_stale,
            stale_quality_factor: decimal(
                self.engine.stale_quality_factor,
                "engine.stale_quality_factor",
            )?,
            fetch: crate::oracle::FetchConfig {
                default_timeout: Duration::from_millis(self.engine.default_source_timeout_ms),
                max_concurrency: self.engine.max_concurrent_fetches,
            },
            min_sources: self.engine.min_sources,
            min_healthy_sources: self.engine.min_healthy_sources,
            quality_max_age: Duration::from_secs(self.quality.max_age_secs),
            manipulation: self.manipulation_config()?,
            min_profit_pct: decimal(self.arbitrage.min_profit_pct, "arbitrage.min_profit_pct")?,
            watch_list: self.watch_list(),
        })
    }

    pub fn manipulation_config(&self) -> Result<crate::oracle::ManipulationConfig> {
        let m = &self.manipulation;
        Ok(crate::oracle::ManipulationConfig {
            window: m.window,
            min_history: m.min_history,
            sample_interval: Duration::from_secs(m.sample_interval_secs),
            sudden_move_pct: decimal(m.sudden_move_pct, "manipulation.sudden_move_pct")?,
            sudden_move_weight: decimal(m.sudden_move_weight, "manipulation.sudden_move_weight")?,
            volume_multiplier: decimal(m.volume_multiplier, "manipulation.volume_multiplier")?,
            volume_weight: decimal(m.volume_weight, "manipulation.volume_weight")?,
            spread_high_pct: decimal(m.spread_high_pct, "manipulation.spread_high_pct")?,
            spread_high_weight: decimal(m.spread_high_weight, "manipulation.spread_high_weight")?,
            spread_low_pct: decimal(m.spread_low_pct, "manipulation.spread_low_pct")?,
            spread_low_weight: decimal(m.spread_low_weight, "manipulation.spread_low_weight")?,
            threshold: decimal(m.threshold, "manipulation.threshold")?,
        })
    }

    pub fn watch_list(&self) -> WatchList {
        WatchList {
            symbols: self.watch_list.symbols.clone(),
            chains: self.watch_list.chains.iter().copied().map(ChainId).collect(),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            refresh_interval: Duration::from_secs(self.scheduler.refresh_interval_secs),
            arbitrage_interval: Duration::from_secs(self.scheduler.arbitrage_interval_secs),
            manipulation_interval: Duration::from_secs(self.scheduler.manipulation_interval_secs),
        }
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "symbols={:?} chains={:?} sources={} ttl={}s refresh={}s min_profit={}%",
            self.watch_list.symbols,
            self.watch_list.chains,
            self.sources.iter().filter(|s| s.enabled).count(),
            self.engine.cache_ttl_secs,
            self.scheduler.refresh_interval_secs,
            self.arbitrage.min_profit_pct
        )
    }
}

impl SourceSection {
    pub fn to_price_source(&self) -> Result<PriceSource> {
        let kind = SourceKind::from_str(&self.kind)
            .with_context(|| format!("unknown source kind for {}: {}", self.id, self.kind))?;
        if self.weight < 0.0 {
            bail!("source {} has negative weight", self.id);
        }
        if !(0.0..=1.0).contains(&self.reliability) {
            bail!("source {} reliability must be within [0, 1]", self.id);
        }

        let mut source = PriceSource::new(
            self.id.clone(),
            kind,
            decimal(self.weight, "weight")?,
            decimal(self.reliability, "reliability")?,
        );
        if let Some(ms) = self.latency_budget_ms {
            source = source.with_latency_budget(Duration::from_millis(ms));
        }
        Ok(source)
    }

    /// Construct the adapter named by `adapter`
    pub fn build_adapter(&self) -> Result<Arc<dyn SourceAdapter>> {
        let adapter: Arc<dyn SourceAdapter> = match self.adapter.as_str() {
            "binance" => {
                let mut adapter = BinanceAdapter::new(self.id.clone())?;
                if let Some(url) = &self.base_url {
                    adapter = adapter.with_base_url(url.clone());
                }
                Arc::new(adapter)
            }
            "coinbase" => {
                let mut adapter = CoinbaseAdapter::new(self.id.clone())?;
                if let Some(url) = &self.base_url {
                    adapter = adapter.with_base_url(url.clone());
                }
                Arc::new(adapter)
            }
            "http_json" => {
                let spec = self
                    .http
                    .clone()
                    .with_context(|| format!("source {} uses http_json without an http block", self.id))?;
                Arc::new(HttpJsonAdapter::new(self.id.clone(), spec)?)
            }
            other => bail!("unknown adapter for {}: {}", self.id, other),
        };
        Ok(adapter)
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
