//! End-to-end tests for the price engine with stub adapters

use async_trait::async_trait;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pricemesh::alerts::{Alert, ChannelAlertSink};
use pricemesh::config::{EngineSettings, WatchList};
use pricemesh::oracle::{ManipulationConfig, PutOutcome, SourceAdapter};
use pricemesh::types::{ArbitrageDirection, ChainId, PriceObservation, PriceSource, SourceKind};
use pricemesh::{OracleError, PriceEngine};

// ============================================================================
// Stub adapters
// ============================================================================

/// Returns a fixed price with the given confidence
struct Fixed {
    price: Decimal,
    confidence: Decimal,
}

#[async_trait]
impl SourceAdapter for Fixed {
    async fn fetch(
        &self,
        symbol: &str,
        _chain: Option<ChainId>,
        _deadline: Duration,
    ) -> anyhow::Result<PriceObservation> {
        Ok(PriceObservation::new(symbol, "fixed", self.price).with_confidence(self.confidence))
    }
}

/// Never answers within any sane deadline
struct Slow;

#[async_trait]
impl SourceAdapter for Slow {
    async fn fetch(
        &self,
        symbol: &str,
        _chain: Option<ChainId>,
        _deadline: Duration,
    ) -> anyhow::Result<PriceObservation> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(PriceObservation::new(symbol, "slow", dec!(1)))
    }
}

/// Price and volume that tests can move between refreshes
struct Scripted {
    state: Mutex<(Decimal, Option<Decimal>)>,
    failing: AtomicBool,
}

impl Scripted {
    fn new(price: Decimal, volume: Option<Decimal>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new((price, volume)),
            failing: AtomicBool::new(false),
        })
    }

    fn set(&self, price: Decimal, volume: Option<Decimal>) {
        *self.state.lock().unwrap() = (price, volume);
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceAdapter for Scripted {
    async fn fetch(
        &self,
        symbol: &str,
        _chain: Option<ChainId>,
        _deadline: Duration,
    ) -> anyhow::Result<PriceObservation> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("upstream unavailable");
        }
        let (price, volume) = *self.state.lock().unwrap();
        let mut obs = PriceObservation::new(symbol, "scripted", price);
        if let Some(volume) = volume {
            obs = obs.with_volume(volume);
        }
        Ok(obs)
    }
}

/// Chain-aware quote table, no chain-agnostic answers
struct PerChain {
    prices: HashMap<u64, Decimal>,
}

#[async_trait]
impl SourceAdapter for PerChain {
    fn supports(&self, _symbol: &str, chain: Option<ChainId>) -> bool {
        chain.map_or(false, |c| self.prices.contains_key(&c.0))
    }

    async fn fetch(
        &self,
        symbol: &str,
        chain: Option<ChainId>,
        _deadline: Duration,
    ) -> anyhow::Result<PriceObservation> {
        let chain = chain.ok_or_else(|| anyhow::anyhow!("chain required"))?;
        let price = self
            .prices
            .get(&chain.0)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no pool on chain {}", chain))?;
        Ok(PriceObservation::new(symbol, "dex", price).with_chain(chain, Some(dec!(1000000))))
    }
}

fn fixed(price: Decimal, confidence: Decimal) -> Arc<dyn SourceAdapter> {
    Arc::new(Fixed { price, confidence })
}

fn cex(id: &str, weight: Decimal) -> PriceSource {
    PriceSource::new(id, SourceKind::CentralizedExchange, weight, dec!(1))
        .with_latency_budget(Duration::from_millis(100))
}

// ============================================================================
// Fetch and aggregation
// ============================================================================

#[tokio::test]
async fn test_end_to_end_eth_consensus() {
    let engine = PriceEngine::new(EngineSettings::default());
    engine
        .register_source(cex("A", dec!(0.3)), fixed(dec!(2000), dec!(0.9)))
        .unwrap();
    engine
        .register_source(cex("B", dec!(0.2)), fixed(dec!(2010), dec!(0.95)))
        .unwrap();
    engine.register_source(cex("C", dec!(0.5)), Arc::new(Slow)).unwrap();

    let price = engine.get_price("ETH", None).await.unwrap();

    // (2000 * 0.27 + 2010 * 0.19) / 0.46
    let expected = dec!(2004.130434782608695652);
    assert!((price.price - expected).abs() <= dec!(0.000000000000000001));
    assert_eq!(price.observation_count, 2);
    assert!(price.spread_pct > dec!(0.49) && price.spread_pct < dec!(0.51));
    assert!(price.deviation_pct < dec!(0.5));
    assert_eq!(price.manipulation_risk, Decimal::ZERO);
    assert!(!price.stale);

    let ids: Vec<&str> = price.contributing_sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);

    let ttl = engine.cache().ttl_remaining("ETH", None).unwrap();
    assert!(ttl > Duration::from_secs(29) && ttl <= Duration::from_secs(30));

    // Second read is served from cache
    let cached = engine.get_price("eth", None).await.unwrap();
    assert_eq!(cached.sequence, price.sequence);
}

#[tokio::test]
async fn test_partial_failure_tolerance() {
    let engine = PriceEngine::new(EngineSettings::default());
    for (i, price) in [dec!(100), dec!(101), dec!(102)].into_iter().enumerate() {
        engine
            .register_source(cex(&format!("ok-{}", i), dec!(1)), fixed(price, dec!(1)))
            .unwrap();
    }
    engine.register_source(cex("slow-1", dec!(1)), Arc::new(Slow)).unwrap();
    engine.register_source(cex("slow-2", dec!(1)), Arc::new(Slow)).unwrap();

    let started = std::time::Instant::now();
    let price = engine.refresh("BTC", None).await.unwrap();

    assert_eq!(price.observation_count, 3);
    assert_eq!(price.price, dec!(101));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_no_observations_only_when_nothing_survives() {
    let engine = PriceEngine::new(EngineSettings::default());
    engine.register_source(cex("slow-1", dec!(1)), Arc::new(Slow)).unwrap();
    engine.register_source(cex("slow-2", dec!(1)), Arc::new(Slow)).unwrap();

    let err = engine.get_price("ETH", None).await.unwrap_err();
    assert!(matches!(err, OracleError::NoObservations { .. }));
    assert!(err.is_unavailable());

    engine
        .register_source(cex("ok", dec!(1)), fixed(dec!(1500), dec!(1)))
        .unwrap();
    let price = engine.get_price("ETH", None).await.unwrap();
    assert_eq!(price.price, dec!(1500));
}

#[tokio::test]
async fn test_single_source_risk_floor() {
    let engine = PriceEngine::new(EngineSettings::default());
    engine
        .register_source(cex("only", dec!(1)), fixed(dec!(42), dec!(1)))
        .unwrap();

    let price = engine.get_price("SOL", None).await.unwrap();
    assert_eq!(price.deviation_pct, Decimal::ZERO);
    assert_eq!(price.manipulation_risk, Decimal::ONE);
}

#[tokio::test]
async fn test_registry_errors_surface() {
    let engine = PriceEngine::new(EngineSettings::default());
    engine
        .register_source(cex("A", dec!(1)), fixed(dec!(1), dec!(1)))
        .unwrap();

    let dup = engine
        .register_source(cex("A", dec!(2)), fixed(dec!(1), dec!(1)))
        .unwrap_err();
    assert_eq!(dup, OracleError::DuplicateSource("A".to_string()));

    let unknown = engine.get_source("missing").unwrap_err();
    assert_eq!(unknown, OracleError::UnknownSource("missing".to_string()));

    assert_eq!(engine.list_sources(Some(SourceKind::CentralizedExchange)).len(), 1);
    assert!(engine.list_sources(Some(SourceKind::OnChainOracle)).is_empty());
}

#[tokio::test]
async fn test_get_prices_omits_unavailable_symbols() {
    struct Listed;

    #[async_trait]
    impl SourceAdapter for Listed {
        fn supports(&self, symbol: &str, _chain: Option<ChainId>) -> bool {
            symbol == "ETH" || symbol == "BTC"
        }

        async fn fetch(
            &self,
            symbol: &str,
            _chain: Option<ChainId>,
            _deadline: Duration,
        ) -> anyhow::Result<PriceObservation> {
            let price = if symbol == "ETH" { dec!(2000) } else { dec!(50000) };
            Ok(PriceObservation::new(symbol, "listed", price))
        }
    }

    let engine = PriceEngine::new(EngineSettings::default());
    engine.register_source(cex("listed", dec!(1)), Arc::new(Listed)).unwrap();

    let symbols = vec!["eth".to_string(), "BTC".to_string(), "DOGE".to_string()];
    let prices = engine.get_prices(&symbols, None).await;

    assert_eq!(prices.len(), 2);
    assert_eq!(prices["ETH"].price, dec!(2000));
    assert_eq!(prices["BTC"].price, dec!(50000));
    assert!(!prices.contains_key("DOGE"));
}

// ============================================================================
// Cache behaviour
// ============================================================================

#[tokio::test]
async fn test_older_aggregate_never_overwrites_newer() {
    let engine = PriceEngine::new(EngineSettings::default());
    engine
        .register_source(cex("A", dec!(1)), fixed(dec!(10), dec!(1)))
        .unwrap();

    let older = engine.refresh("ETH", None).await.unwrap();
    let newer = engine.refresh("ETH", None).await.unwrap();
    assert!(newer.sequence > older.sequence);

    assert_eq!(engine.cache().put(older), PutOutcome::RejectedOlder);
    assert_eq!(engine.cache().get("ETH", None).unwrap().sequence, newer.sequence);
}

#[tokio::test]
async fn test_concurrent_refreshes_keep_latest_sequence() {
    let engine = Arc::new(PriceEngine::new(EngineSettings::default()));
    engine
        .register_source(cex("A", dec!(1)), fixed(dec!(10), dec!(1)))
        .unwrap();

    let results = join_all((0..16).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.refresh("ETH", None).await })
    }))
    .await;

    let max_sequence = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().sequence)
        .max()
        .unwrap();
    assert_eq!(engine.cache().get("ETH", None).unwrap().sequence, max_sequence);
}

#[tokio::test]
async fn test_stale_fallback_when_sources_fail() {
    let settings = EngineSettings {
        cache_ttl: Duration::from_millis(50),
        stale_grace: Duration::from_secs(10),
        ..Default::default()
    };
    let engine = PriceEngine::new(settings);
    let upstream = Scripted::new(dec!(2000), None);
    engine.register_source(cex("A", dec!(1)), upstream.clone()).unwrap();

    let fresh = engine.get_price("ETH", None).await.unwrap();
    assert!(!fresh.stale);

    upstream.fail(true);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let stale = engine.get_price("ETH", None).await.unwrap();
    assert!(stale.stale);
    assert_eq!(stale.price, dec!(2000));
    let halved = fresh.quality_score * dec!(0.5);
    assert!((stale.quality_score - halved).abs() <= dec!(0.000000000000000001));
}

#[tokio::test]
async fn test_stale_fallback_can_be_disabled() {
    let settings = EngineSettings {
        cache_ttl: Duration::from_millis(50),
        serve_stale: false,
        ..Default::default()
    };
    let engine = PriceEngine::new(settings);
    let upstream = Scripted::new(dec!(2000), None);
    engine.register_source(cex("A", dec!(1)), upstream.clone()).unwrap();

    engine.get_price("ETH", None).await.unwrap();
    upstream.fail(true);
    tokio::time::sleep(Duration::from_millis(80)).await;

    let err = engine.get_price("ETH", None).await.unwrap_err();
    assert!(matches!(err, OracleError::NoObservations { .. }));
}

// ============================================================================
// Arbitrage
// ============================================================================

#[tokio::test]
async fn test_cross_chain_arbitrage_through_engine() {
    let settings = EngineSettings {
        watch_list: WatchList {
            symbols: vec!["ETH".to_string()],
            chains: vec![ChainId(1), ChainId(42161)],
        },
        ..Default::default()
    };
    let engine = PriceEngine::new(settings);
    let dex = PerChain {
        prices: HashMap::from([(1, dec!(1000)), (42161, dec!(1006))]),
    };
    engine
        .register_source(
            PriceSource::new("dex", SourceKind::DecentralizedExchange, dec!(1), dec!(1)),
            Arc::new(dex),
        )
        .unwrap();

    // Chain-agnostic key has no supporting source
    assert_eq!(engine.refresh_watch_list().await, 2);

    let mainnet = engine.cache().get("ETH", Some(ChainId(1))).unwrap();
    assert_eq!(mainnet.chain_prices[&ChainId(1)].price, dec!(1000));

    let found = engine.scan_arbitrage();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].price_difference_pct, dec!(0.6));
    assert_eq!(found[0].direction, ArbitrageDirection::BuySourceSellTarget);
    assert_eq!(engine.arbitrage_opportunities(), found);

    // Ad-hoc scans do not replace the published result
    let chains = [ChainId(1), ChainId(42161)];
    let adhoc = engine.scan_arbitrage_for(&["eth".to_string()], &chains);
    assert_eq!(adhoc.len(), 1);
    assert_eq!(adhoc[0].symbol, "ETH");
    assert!(engine.scan_arbitrage_for(&["BTC".to_string()], &chains).is_empty());
    assert_eq!(engine.arbitrage_opportunities().len(), 1);

    // History is tracked per chain
    let per_chain = engine.manipulation_status_for("ETH", Some(ChainId(42161)));
    assert_eq!(per_chain.chain_id, Some(ChainId(42161)));
    assert!(!per_chain.sufficient_history);
    assert_eq!(engine.detector().history_len("ETH", Some(ChainId(42161))), 1);
    assert_eq!(engine.detector().history_len("ETH", None), 0);
}

// ============================================================================
// Manipulation
// ============================================================================

fn every_refresh_sampled() -> EngineSettings {
    EngineSettings {
        manipulation: ManipulationConfig {
            sample_interval: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_spike_is_detected_with_evidence_and_alert() {
    let (alerts, mut rx) = ChannelAlertSink::new(16);
    let engine = PriceEngine::new(every_refresh_sampled()).with_alert_sink(Arc::new(alerts));
    let a = Scripted::new(dec!(2000), Some(dec!(1000)));
    let b = Scripted::new(dec!(2000), Some(dec!(1000)));
    engine.register_source(cex("A", dec!(1)), a.clone()).unwrap();
    engine.register_source(cex("B", dec!(1)), b.clone()).unwrap();

    for _ in 0..11 {
        engine.refresh("ETH", None).await.unwrap();
    }
    let quiet = engine.manipulation_status("ETH");
    assert!(quiet.sufficient_history);
    assert!(!quiet.detected);
    assert!(engine.sweep_manipulation().is_empty());

    // 13.5% jump, 10.5x volume, 2.6% cross-source spread
    a.set(dec!(2300), Some(dec!(20000)));
    b.set(dec!(2240), Some(dec!(1000)));
    let spiked = engine.refresh("ETH", None).await.unwrap();
    assert_eq!(spiked.price, dec!(2270));
    assert_eq!(spiked.manipulation_risk, dec!(0.85));

    let status = engine.manipulation_status("ETH");
    assert!(status.detected);
    assert_eq!(status.confidence, dec!(0.85));
    assert!(status
        .evidence
        .iter()
        .any(|e| e.contains("sudden move") && e.contains("up")));

    let detections = engine.sweep_manipulation();
    assert_eq!(detections.len(), 1);
    match rx.try_recv().unwrap() {
        Alert::ManipulationDetected { symbol, confidence, .. } => {
            assert_eq!(symbol, "ETH");
            assert_eq!(confidence, dec!(0.85));
        }
        other => panic!("unexpected alert: {:?}", other),
    }
}

#[tokio::test]
async fn test_price_jump_alone_crosses_lowered_threshold() {
    let mut settings = every_refresh_sampled();
    settings.manipulation.threshold = dec!(0.25);
    let engine = PriceEngine::new(settings);
    let a = Scripted::new(dec!(2000), None);
    let b = Scripted::new(dec!(2000), None);
    engine.register_source(cex("A", dec!(1)), a.clone()).unwrap();
    engine.register_source(cex("B", dec!(1)), b.clone()).unwrap();

    for _ in 0..10 {
        engine.refresh("ETH", None).await.unwrap();
    }
    a.set(dec!(2300), None);
    b.set(dec!(2300), None);
    engine.refresh("ETH", None).await.unwrap();

    let status = engine.manipulation_status("ETH");
    assert!(status.detected);
    assert_eq!(status.confidence, dec!(0.3));
    assert!(status.evidence[0].contains("15"));
}

#[tokio::test]
async fn test_insufficient_history_does_not_block_prices() {
    let engine = PriceEngine::new(EngineSettings::default());
    engine
        .register_source(cex("A", dec!(1)), fixed(dec!(1), dec!(1)))
        .unwrap();
    engine
        .register_source(cex("B", dec!(1)), fixed(dec!(1), dec!(1)))
        .unwrap();

    engine.get_price("ETH", None).await.unwrap();
    let status = engine.manipulation_status("ETH");
    assert!(!status.sufficient_history);
    assert!(!status.detected);
    assert!(status.evidence[0].contains("insufficient history"));
}
