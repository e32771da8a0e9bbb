//! Oracle module - Multi-source price aggregation
//!
//! Fans out to every registered source adapter, folds the surviving
//! observations into one weighted consensus per symbol and chain, and
//! keeps the result in a short-lived cache for the arbitrage scanner and
//! the manipulation detector.

mod aggregator;
mod arbitrage;
mod cache;
mod fetcher;
mod manipulation;
mod quality;
mod registry;
pub mod sources;

pub use aggregator::{effective_weight, ConsensusAggregator};
pub use arbitrage::ArbitrageScanner;
pub use cache::{CacheEntry, CacheKey, CacheStats, PriceCache, PutOutcome};
pub use fetcher::{FetchConfig, FetchCoordinator};
pub use manipulation::{Assessment, HistoryPoint, ManipulationConfig, ManipulationDetector};
pub use quality::QualityScorer;
pub use registry::{RegisteredSource, SourceRegistry};
pub use sources::SourceAdapter;
