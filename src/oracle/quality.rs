//! Quality scoring - confidence x reliability, linearly devalued by age

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

use crate::types::{PriceObservation, PriceSource, PRICE_SCALE};

#[derive(Debug, Clone)]
pub struct QualityScorer {
    /// Age at which an observation reaches zero influence
    max_age: Duration,
}

impl QualityScorer {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    /// Score one observation relative to now
    pub fn score(&self, obs: &PriceObservation, source: &PriceSource) -> Decimal {
        self.score_at(obs, source, Utc::now())
    }

    /// `confidence * reliability * (1 - min(1, age / max_age))`
    pub fn score_at(&self, obs: &PriceObservation, source: &PriceSource, now: DateTime<Utc>) -> Decimal {
        let penalty = self.age_penalty(obs.observed_at, now);
        let raw = obs.confidence * source.reliability * (Decimal::ONE - penalty);
        raw.clamp(Decimal::ZERO, Decimal::ONE).round_dp(PRICE_SCALE)
    }

    /// Mean of per-observation scores; observations without a known source are skipped
    pub fn score_aggregate(&self, observations: &[PriceObservation], sources: &[PriceSource]) -> Decimal {
        self.score_aggregate_at(observations, sources, Utc::now())
    }

    pub fn score_aggregate_at(
        &self,
        observations: &[PriceObservation],
        sources: &[PriceSource],
        now: DateTime<Utc>,
    ) -> Decimal {
        let scores: Vec<Decimal> = observations
            .iter()
            .filter_map(|obs| {
                sources
                    .iter()
                    .find(|s| s.id == obs.source_id)
                    .map(|s| self.score_at(obs, s, now))
            })
            .collect();

        if scores.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = scores.iter().copied().sum();
        (sum / Decimal::from(scores.len())).round_dp(PRICE_SCALE)
    }

    fn age_penalty(&self, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
        let max_ms = self.max_age.as_millis() as i64;
        if max_ms <= 0 {
            return Decimal::ONE;
        }
        // Clock skew can put observations slightly in the future
        let age_ms = (now - observed_at).num_milliseconds().max(0);
        if age_ms >= max_ms {
            return Decimal::ONE;
        }
        Decimal::from(age_ms) / Decimal::from(max_ms)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(Duration::from_secs(300)) // 5 minutes
    }
}
