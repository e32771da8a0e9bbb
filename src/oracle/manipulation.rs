//! Manipulation detector - heuristic scoring over rolling aggregate history
//!
//! Signals are additive and capped at 1:
//! - sudden move between consecutive samples
//! - 24h volume far above the trailing window average
//! - cross-source spread of the latest observation set (highest bracket only)
//! - a lone surviving source floors the score at 1
//!
//! Scoring is a pure function of the recorded points, so equal inputs give
//! equal scores, and a worse signal can only add to the total.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::time::Duration;

use crate::oracle::cache::CacheKey;
use crate::types::{normalize_symbol, AggregatedPrice, ChainId, ManipulationStatus};

const HUNDRED: Decimal = dec!(100);

/// Detector thresholds and signal weights
#[derive(Debug, Clone)]
pub struct ManipulationConfig {
    /// Points kept per key
    pub window: usize,
    /// Points required before `detect` reports
    pub min_history: usize,
    /// Minimum spacing between recorded points
    pub sample_interval: Duration,
    pub sudden_move_pct: Decimal,
    pub sudden_move_weight: Decimal,
    pub volume_multiplier: Decimal,
    pub volume_weight: Decimal,
    pub spread_high_pct: Decimal,
    pub spread_high_weight: Decimal,
    pub spread_low_pct: Decimal,
    pub spread_low_weight: Decimal,
    /// `detected` when the score is strictly above this
    pub threshold: Decimal,
}

impl Default for ManipulationConfig {
    fn default() -> Self {
        Self {
            window: 60,
            min_history: 10,
            sample_interval: Duration::from_secs(60),
            sudden_move_pct: dec!(10),
            sudden_move_weight: dec!(0.3),
            volume_multiplier: dec!(5),
            volume_weight: dec!(0.4),
            spread_high_pct: dec!(5),
            spread_high_weight: dec!(0.3),
            spread_low_pct: dec!(2),
            spread_low_weight: dec!(0.15),
            threshold: dec!(0.7),
        }
    }
}

/// One recorded aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPoint {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub price: Decimal,
    pub volume_24h: Option<Decimal>,
    pub spread_pct: Decimal,
    pub source_count: usize,
}

impl From<&AggregatedPrice> for HistoryPoint {
    fn from(agg: &AggregatedPrice) -> Self {
        Self {
            sequence: agg.sequence,
            at: agg.computed_at,
            price: agg.price,
            volume_24h: agg.volume_24h,
            spread_pct: agg.spread_pct,
            source_count: agg.observation_count,
        }
    }
}

/// Score with the evidence that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: Decimal,
    pub evidence: Vec<String>,
}

#[derive(Debug)]
pub struct ManipulationDetector {
    config: ManipulationConfig,
    /// Sampled history per key, oldest first
    history: DashMap<CacheKey, VecDeque<HistoryPoint>>,
    /// Most recent aggregate per key, sampled or not
    latest: DashMap<CacheKey, HistoryPoint>,
}

impl ManipulationDetector {
    pub fn new(config: ManipulationConfig) -> Self {
        Self {
            config,
            history: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ManipulationConfig {
        &self.config
    }

    /// Risk of `agg` against the recorded history, without recording it
    pub fn score_candidate(&self, agg: &AggregatedPrice) -> Decimal {
        let key = (normalize_symbol(&agg.symbol), agg.chain_id);
        let mut points: Vec<HistoryPoint> = self
            .history
            .get(&key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        points.push(HistoryPoint::from(agg));
        self.assess(&points).score
    }

    /// Record an aggregate and return its manipulation risk
    ///
    /// An aggregate older than the latest one seen for its key is scored
    /// but not recorded.
    pub fn observe(&self, agg: &AggregatedPrice) -> Decimal {
        let key = (normalize_symbol(&agg.symbol), agg.chain_id);
        let point = HistoryPoint::from(agg);

        let points = {
            let mut series = self.history.entry(key.clone()).or_default();
            let out_of_order = self
                .latest
                .get(&key)
                .map_or(false, |latest| latest.sequence > point.sequence);
            if out_of_order {
                tracing::debug!(
                    symbol = %key.0,
                    chain = ?key.1,
                    sequence = point.sequence,
                    "Skipping out-of-order aggregate"
                );
                let mut points: Vec<HistoryPoint> = series.iter().cloned().collect();
                points.push(point);
                points
            } else {
                let due = series.back().map_or(true, |last| {
                    let elapsed = (point.at - last.at).to_std().unwrap_or(Duration::ZERO);
                    elapsed >= self.config.sample_interval
                });
                if due {
                    series.push_back(point.clone());
                    while series.len() > self.config.window {
                        series.pop_front();
                    }
                }
                let mut points: Vec<HistoryPoint> = series.iter().cloned().collect();
                if !due {
                    points.push(point.clone());
                }
                self.latest.insert(key, point);
                points
            }
        };

        self.assess(&points).score
    }

    /// Status for the chain-agnostic series of `symbol`
    pub fn detect(&self, symbol: &str) -> ManipulationStatus {
        self.detect_for(symbol, None)
    }

    pub fn detect_for(&self, symbol: &str, chain: Option<ChainId>) -> ManipulationStatus {
        let symbol = normalize_symbol(symbol);
        let points = self.points_for(&(symbol.clone(), chain));

        if points.len() < self.config.min_history {
            return ManipulationStatus::insufficient(
                &symbol,
                chain,
                points.len(),
                self.config.min_history,
            );
        }

        let assessment = self.assess(&points);
        ManipulationStatus {
            symbol,
            chain_id: chain,
            detected: assessment.score > self.config.threshold,
            confidence: assessment.score,
            evidence: assessment.evidence,
            sufficient_history: true,
        }
    }

    /// Keys with enough history for a sweep
    pub fn tracked_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .history
            .iter()
            .filter(|e| e.value().len() >= self.config.min_history)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn history_len(&self, symbol: &str, chain: Option<ChainId>) -> usize {
        self.history
            .get(&(normalize_symbol(symbol), chain))
            .map_or(0, |s| s.len())
    }

    /// Sampled history plus the latest aggregate when it was not sampled
    fn points_for(&self, key: &CacheKey) -> Vec<HistoryPoint> {
        let mut points: Vec<HistoryPoint> = self
            .history
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        if let Some(latest) = self.latest.get(key) {
            if points.last().map_or(true, |p| p.sequence < latest.sequence) {
                points.push(latest.clone());
            }
        }
        points
    }

    /// Score a series whose last element is the current aggregate
    pub fn assess(&self, points: &[HistoryPoint]) -> Assessment {
        let cfg = &self.config;
        let mut score = Decimal::ZERO;
        let mut evidence = Vec::new();

        let Some(current) = points.last() else {
            return Assessment { score, evidence };
        };

        // Sudden move: largest consecutive change above threshold
        let largest_move = points
            .windows(2)
            .filter(|w| !w[0].price.is_zero())
            .map(|w| (w[1].price - w[0].price) / w[0].price * HUNDRED)
            .max_by_key(|change| change.abs());
        if let Some(change) = largest_move {
            if change.abs() > cfg.sudden_move_pct {
                score += cfg.sudden_move_weight;
                let direction = if change.is_sign_positive() { "up" } else { "down" };
                evidence.push(format!(
                    "sudden move {}% {} between consecutive aggregates",
                    change.abs().round_dp(2),
                    direction
                ));
            }
        }

        // Volume anomaly against the trailing window
        if let Some(latest_volume) = current.volume_24h {
            let trailing: Vec<Decimal> = points[..points.len() - 1]
                .iter()
                .filter_map(|p| p.volume_24h)
                .collect();
            if !trailing.is_empty() {
                let average = trailing.iter().copied().sum::<Decimal>() / Decimal::from(trailing.len());
                if !average.is_zero() && latest_volume > average * cfg.volume_multiplier {
                    score += cfg.volume_weight;
                    evidence.push(format!(
                        "volume {} is {}x the trailing average {}",
                        latest_volume.round_dp(2),
                        (latest_volume / average).round_dp(2),
                        average.round_dp(2)
                    ));
                }
            }
        }

        // Cross-source spread, highest matching bracket only
        if current.spread_pct > cfg.spread_high_pct {
            score += cfg.spread_high_weight;
            evidence.push(format!(
                "cross-source spread {}% exceeds {}%",
                current.spread_pct.round_dp(2),
                cfg.spread_high_pct
            ));
        } else if current.spread_pct > cfg.spread_low_pct {
            score += cfg.spread_low_weight;
            evidence.push(format!(
                "cross-source spread {}% exceeds {}%",
                current.spread_pct.round_dp(2),
                cfg.spread_low_pct
            ));
        }

        if current.source_count == 1 {
            score = Decimal::ONE;
            evidence.push("single source: price cannot be cross-validated".to_string());
        }

        Assessment {
            score: score.min(Decimal::ONE),
            evidence,
        }
    }
}

impl Default for ManipulationDetector {
    fn default() -> Self {
        Self::new(ManipulationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn point(i: i64, price: Decimal) -> HistoryPoint {
        HistoryPoint {
            sequence: i as u64,
            at: DateTime::<Utc>::from_timestamp(1_700_000_000 + i * 60, 0).unwrap(),
            price,
            volume_24h: None,
            spread_pct: dec!(0.1),
            source_count: 3,
        }
    }

    fn stable(n: i64) -> Vec<HistoryPoint> {
        (0..n).map(|i| point(i, dec!(2000))).collect()
    }

    #[test]
    fn test_quiet_series_scores_zero() {
        let detector = ManipulationDetector::default();
        let assessment = detector.assess(&stable(12));
        assert_eq!(assessment.score, Decimal::ZERO);
        assert!(assessment.evidence.is_empty());
    }

    #[test]
    fn test_sudden_move_adds_weight_with_evidence() {
        let detector = ManipulationDetector::default();
        let mut points = stable(10);
        points.push(point(10, dec!(2300)));

        let assessment = detector.assess(&points);
        assert_eq!(assessment.score, dec!(0.3));
        assert!(assessment.evidence[0].contains("15"));
        assert!(assessment.evidence[0].contains("up"));
    }

    #[test]
    fn test_spread_uses_highest_bracket_only() {
        let detector = ManipulationDetector::default();
        let mut points = stable(10);
        points.last_mut().unwrap().spread_pct = dec!(3);
        assert_eq!(detector.assess(&points).score, dec!(0.15));

        points.last_mut().unwrap().spread_pct = dec!(6);
        assert_eq!(detector.assess(&points).score, dec!(0.3));
    }

    #[test]
    fn test_volume_anomaly() {
        let detector = ManipulationDetector::default();
        let mut points: Vec<HistoryPoint> = stable(10)
            .into_iter()
            .map(|mut p| {
                p.volume_24h = Some(dec!(1000));
                p
            })
            .collect();
        points.last_mut().unwrap().volume_24h = Some(dec!(6000));

        let assessment = detector.assess(&points);
        assert_eq!(assessment.score, dec!(0.4));
        assert!(assessment.evidence[0].contains("volume"));
    }

    #[test]
    fn test_single_source_floor() {
        let detector = ManipulationDetector::default();
        let mut points = stable(3);
        points.last_mut().unwrap().source_count = 1;
        assert_eq!(detector.assess(&points).score, Decimal::ONE);
    }

    #[test]
    fn test_score_is_capped_and_monotone() {
        let detector = ManipulationDetector::default();
        let mut points: Vec<HistoryPoint> = stable(10)
            .into_iter()
            .map(|mut p| {
                p.volume_24h = Some(dec!(1000));
                p
            })
            .collect();
        let mut spike = point(10, dec!(2300));
        spike.volume_24h = Some(dec!(9000));
        spike.spread_pct = dec!(3);
        points.push(spike);

        let medium = detector.assess(&points).score;
        assert_eq!(medium, dec!(0.85));

        points.last_mut().unwrap().spread_pct = dec!(8);
        let worse = detector.assess(&points).score;
        assert!(worse >= medium);
        assert_eq!(worse, Decimal::ONE);
    }

    #[test]
    fn test_detect_requires_min_history() {
        let detector = ManipulationDetector::new(ManipulationConfig {
            sample_interval: Duration::ZERO,
            ..Default::default()
        });
        let status = detector.detect("ETH");
        assert!(!status.sufficient_history);
        assert!(!status.detected);
        assert_eq!(status.confidence, Decimal::ZERO);
    }

    #[test]
    fn test_observe_samples_by_interval() {
        let detector = ManipulationDetector::default();
        let base = Utc::now();
        let mut agg = crate::oracle::test_support::aggregate("ETH", None, dec!(2000), 1);
        agg.computed_at = base;
        detector.observe(&agg);

        // Inside the sampling interval: tracked as latest, not sampled
        agg.sequence = 2;
        agg.computed_at = base + ChronoDuration::seconds(10);
        detector.observe(&agg);
        assert_eq!(detector.history_len("ETH", None), 1);

        agg.sequence = 3;
        agg.computed_at = base + ChronoDuration::seconds(61);
        detector.observe(&agg);
        assert_eq!(detector.history_len("ETH", None), 2);
    }

    #[test]
    fn test_window_is_bounded() {
        let detector = ManipulationDetector::new(ManipulationConfig {
            window: 5,
            sample_interval: Duration::ZERO,
            ..Default::default()
        });
        for i in 0..20 {
            let mut agg = crate::oracle::test_support::aggregate("ETH", None, dec!(2000), i);
            agg.computed_at = Utc::now();
            detector.observe(&agg);
        }
        assert_eq!(detector.history_len("ETH", None), 5);
    }

    #[test]
    fn test_out_of_order_aggregate_is_not_recorded() {
        let detector = ManipulationDetector::new(ManipulationConfig {
            sample_interval: Duration::ZERO,
            ..Default::default()
        });
        let base = Utc::now();
        let mut agg = crate::oracle::test_support::aggregate("ETH", None, dec!(2000), 5);
        agg.computed_at = base;
        detector.observe(&agg);

        let mut late = crate::oracle::test_support::aggregate("ETH", None, dec!(2600), 4);
        late.computed_at = base + ChronoDuration::seconds(1);
        let score = detector.observe(&late);

        assert_eq!(score, dec!(0.3));
        assert_eq!(detector.history_len("ETH", None), 1);
        assert_eq!(detector.points_for(&("ETH".to_string(), None))[0].price, dec!(2000));
    }

    #[test]
    fn test_score_candidate_leaves_history_untouched() {
        let detector = ManipulationDetector::default();
        let agg = crate::oracle::test_support::aggregate("ETH", None, dec!(2000), 1);
        assert_eq!(detector.score_candidate(&agg), Decimal::ZERO);
        assert_eq!(detector.history_len("ETH", None), 0);
        assert!(detector.latest.is_empty());
    }
}
