//! Price engine - owns every oracle component and serves the public queries
//!
//! One engine instance holds the registry, cache and manipulation history.
//! The scheduler and on-demand callers share it behind an `Arc`.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::alerts::{Alert, AlertSink, LogAlertSink};
use crate::config::{EngineSettings, WatchList};
use crate::error::{OracleError, Result};
use crate::oracle::{
    ArbitrageScanner, ConsensusAggregator, FetchCoordinator, ManipulationDetector, PriceCache,
    PutOutcome, QualityScorer, SourceAdapter, SourceRegistry,
};
use crate::persistence::PriceSink;
use crate::types::{
    normalize_symbol, AggregatedPrice, ArbitrageOpportunity, ChainId, ManipulationStatus, PriceSource,
    SourceKind, PRICE_SCALE,
};

pub struct PriceEngine {
    settings: EngineSettings,
    registry: Arc<SourceRegistry>,
    fetcher: FetchCoordinator,
    aggregator: ConsensusAggregator,
    scorer: QualityScorer,
    detector: ManipulationDetector,
    cache: Arc<PriceCache>,
    scanner: ArbitrageScanner,
    /// Stamp for the next aggregation attempt
    sequence: AtomicU64,
    sink: Option<Arc<dyn PriceSink>>,
    alerts: Arc<dyn AlertSink>,
}

impl PriceEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let registry = Arc::new(SourceRegistry::new());
        let cache = Arc::new(PriceCache::new(settings.cache_ttl, settings.stale_grace));

        Self {
            fetcher: FetchCoordinator::new(registry.clone(), settings.fetch.clone()),
            aggregator: ConsensusAggregator::new(registry.clone(), settings.min_sources),
            scorer: QualityScorer::new(settings.quality_max_age),
            detector: ManipulationDetector::new(settings.manipulation.clone()),
            scanner: ArbitrageScanner::new(cache.clone(), settings.min_profit_pct),
            registry,
            cache,
            sequence: AtomicU64::new(1),
            sink: None,
            alerts: Arc::new(LogAlertSink),
            settings,
        }
    }

    /// Attach a persistence collaborator
    pub fn with_sink(mut self, sink: Arc<dyn PriceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the default log-only alert sink
    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn watch_list(&self) -> &WatchList {
        &self.settings.watch_list
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub fn detector(&self) -> &ManipulationDetector {
        &self.detector
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    // ========================================================================
    // Sources
    // ========================================================================

    pub fn register_source(&self, source: PriceSource, adapter: Arc<dyn SourceAdapter>) -> Result<()> {
        self.registry.register(source, adapter)
    }

    pub fn get_source(&self, id: &str) -> Result<PriceSource> {
        self.registry.get(id)
    }

    pub fn list_sources(&self, kind: Option<SourceKind>) -> Vec<PriceSource> {
        self.registry.list(kind)
    }

    // ========================================================================
    // Prices
    // ========================================================================

    /// Run one fetch-aggregate cycle and publish the result to the cache
    pub async fn refresh(&self, symbol: &str, chain: Option<ChainId>) -> Result<AggregatedPrice> {
        let symbol = normalize_symbol(symbol);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let eligible = self.fetcher.eligible_sources(&symbol, chain);
        let observations = self.fetcher.fetch_all(&symbol, chain).await;
        self.check_source_health(&symbol, chain, observations.len(), eligible);

        let mut aggregated = self.aggregator.aggregate(&symbol, &observations, chain)?;
        aggregated.sequence = sequence;
        // Zero-weight observations still count towards quality
        aggregated.quality_score = self
            .scorer
            .score_aggregate(&observations, &self.registry.list(None));

        let risk = self.detector.score_candidate(&aggregated);
        aggregated.manipulation_risk = aggregated.manipulation_risk.max(risk);

        match self.cache.put(aggregated.clone()) {
            PutOutcome::RejectedOlder => {
                tracing::debug!(symbol = %symbol, chain = ?chain, sequence, "Newer aggregate already cached");
            }
            PutOutcome::Inserted | PutOutcome::Replaced => {
                self.detector.observe(&aggregated);
                tracing::debug!(
                    symbol = %symbol,
                    chain = ?chain,
                    sequence,
                    price = %aggregated.price,
                    "Aggregate cached"
                );
            }
        }

        self.persist(&aggregated);
        Ok(aggregated)
    }

    /// Cached price, refreshed on miss, stale fallback when every source fails
    pub async fn get_price(&self, symbol: &str, chain: Option<ChainId>) -> Result<AggregatedPrice> {
        if let Some(cached) = self.cache.get(symbol, chain) {
            return Ok(cached);
        }

        match self.refresh(symbol, chain).await {
            Ok(price) => Ok(price),
            Err(e) if e.is_unavailable() && self.settings.serve_stale => {
                match self.cache.get_stale(symbol, chain) {
                    Some(stale) => {
                        tracing::warn!(
                            symbol = %stale.symbol,
                            chain = ?chain,
                            error = %e,
                            "Serving stale price"
                        );
                        Ok(self.mark_stale(stale))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Prices for several symbols; unavailable symbols are omitted
    pub async fn get_prices(
        &self,
        symbols: &[String],
        chain: Option<ChainId>,
    ) -> HashMap<String, AggregatedPrice> {
        let results = join_all(symbols.iter().map(|s| async move {
            (normalize_symbol(s), self.get_price(s, chain).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(symbol, result)| match result {
                Ok(price) => Some((symbol, price)),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, chain = ?chain, error = %e, "Price unavailable");
                    None
                }
            })
            .collect()
    }

    /// Refresh every watch-list key; failures stay per key
    pub async fn refresh_watch_list(&self) -> usize {
        let keys = self.settings.watch_list.keys();
        let results = join_all(
            keys.iter()
                .map(|(symbol, chain)| async move { (symbol, *chain, self.refresh(symbol, *chain).await) }),
        )
        .await;

        let mut refreshed = 0;
        for (symbol, chain, result) in results {
            match result {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, chain = ?chain, error = %e, "Refresh failed");
                }
            }
        }
        refreshed
    }

    fn mark_stale(&self, mut price: AggregatedPrice) -> AggregatedPrice {
        price.stale = true;
        price.quality_score = (price.quality_score * self.settings.stale_quality_factor)
            .clamp(Decimal::ZERO, Decimal::ONE)
            .round_dp(PRICE_SCALE);
        price
    }

    fn check_source_health(&self, symbol: &str, chain: Option<ChainId>, responded: usize, eligible: usize) {
        // Only a shortfall caused by failing sources counts as degradation
        if responded < eligible && responded < self.settings.min_healthy_sources {
            self.alerts.alert(Alert::SourcesDegraded {
                symbol: symbol.to_string(),
                chain,
                responded,
                eligible,
            });
        }
    }

    fn persist(&self, price: &AggregatedPrice) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let price = price.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.save(&price).await {
                tracing::warn!(symbol = %price.symbol, error = %e, "Failed to persist aggregate");
            }
        });
    }

    // ========================================================================
    // Arbitrage
    // ========================================================================

    /// Opportunities from the last scan
    pub fn arbitrage_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        self.scanner.latest()
    }

    /// Scan the watch-list over cached prices and publish the result
    pub fn scan_arbitrage(&self) -> Vec<ArbitrageOpportunity> {
        let watch = &self.settings.watch_list;
        self.scanner.scan_and_store(&watch.symbols, &watch.chains)
    }

    /// One-off scan over arbitrary symbols and chains
    pub fn scan_arbitrage_for(&self, symbols: &[String], chains: &[ChainId]) -> Vec<ArbitrageOpportunity> {
        self.scanner.scan(symbols, chains)
    }

    // ========================================================================
    // Manipulation
    // ========================================================================

    pub fn manipulation_status(&self, symbol: &str) -> ManipulationStatus {
        self.detector.detect(symbol)
    }

    pub fn manipulation_status_for(&self, symbol: &str, chain: Option<ChainId>) -> ManipulationStatus {
        self.detector.detect_for(symbol, chain)
    }

    /// Like [`Self::manipulation_status`] but an error when history is short
    pub fn require_manipulation_status(&self, symbol: &str) -> Result<ManipulationStatus> {
        let status = self.detector.detect(symbol);
        if status.sufficient_history {
            Ok(status)
        } else {
            Err(OracleError::InsufficientHistory {
                symbol: status.symbol,
                required: self.detector.config().min_history,
                available: self.detector.history_len(symbol, None),
            })
        }
    }

    /// Check every key with enough history and alert on detections
    pub fn sweep_manipulation(&self) -> Vec<ManipulationStatus> {
        let detections: Vec<ManipulationStatus> = self
            .detector
            .tracked_keys()
            .into_iter()
            .map(|(symbol, chain)| self.detector.detect_for(&symbol, chain))
            .filter(|status| status.detected)
            .collect();

        for status in &detections {
            self.alerts.alert(Alert::ManipulationDetected {
                symbol: status.symbol.clone(),
                chain: status.chain_id,
                confidence: status.confidence,
                evidence: status.evidence.clone(),
            });
        }
        detections
    }
}
