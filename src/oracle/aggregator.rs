//! Consensus Aggregator - Combines observations from multiple sources
//!
//! Produces a single fixed-point weighted price per symbol with deviation,
//! spread and confidence derived from source agreement. Effective weight of
//! an observation is `weight * confidence * reliability`.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{OracleError, Result};
use crate::oracle::registry::SourceRegistry;
use crate::types::{
    normalize_symbol, AggregatedPrice, ChainId, ChainPrice, PriceObservation, PriceSource, PRICE_SCALE,
};

const HUNDRED: Decimal = dec!(100);

/// Weighted-consensus aggregator
pub struct ConsensusAggregator {
    registry: Arc<SourceRegistry>,
    /// Number of sources needed before source count stops lowering confidence
    min_sources: usize,
}

impl ConsensusAggregator {
    pub fn new(registry: Arc<SourceRegistry>, min_sources: usize) -> Self {
        Self {
            registry,
            min_sources: min_sources.max(1),
        }
    }

    /// Aggregate one fetch cycle's observations
    ///
    /// The returned record carries `sequence = 0` and a zero quality score;
    /// the engine stamps both before publishing it.
    pub fn aggregate(
        &self,
        symbol: &str,
        observations: &[PriceObservation],
        chain: Option<ChainId>,
    ) -> Result<AggregatedPrice> {
        let symbol = normalize_symbol(symbol);

        let weighted: Vec<(&PriceObservation, PriceSource, Decimal)> = observations
            .iter()
            .filter_map(|obs| match self.registry.get(&obs.source_id) {
                Ok(source) => {
                    let w = effective_weight(obs, &source);
                    Some((obs, source, w))
                }
                Err(_) => {
                    tracing::warn!(
                        source = %obs.source_id,
                        symbol = %symbol,
                        "Dropping observation from unregistered source"
                    );
                    None
                }
            })
            .collect();

        if weighted.is_empty() {
            return Err(OracleError::NoObservations { symbol, chain });
        }

        let overflow = || OracleError::Arithmetic(symbol.clone());

        let mut total_weight = Decimal::ZERO;
        let mut weighted_sum = Decimal::ZERO;
        for (obs, _, w) in &weighted {
            total_weight = total_weight.checked_add(*w).ok_or_else(overflow)?;
            let term = obs.price.checked_mul(*w).ok_or_else(overflow)?;
            weighted_sum = weighted_sum.checked_add(term).ok_or_else(overflow)?;
        }

        if total_weight.is_zero() {
            return Err(OracleError::DegenerateWeights {
                symbol: symbol.clone(),
            });
        }

        let price = weighted_sum
            .checked_div(total_weight)
            .ok_or_else(overflow)?
            .round_dp(PRICE_SCALE);

        let prices: Vec<Decimal> = weighted.iter().map(|(o, _, _)| o.price).collect();
        let deviation_pct = Self::calculate_deviation(&prices, price).ok_or_else(overflow)?;
        let spread_pct = Self::calculate_spread(&prices, price).ok_or_else(overflow)?;

        // Confidence-weighted mean confidence, scaled by agreement
        let mut confidence_sum = Decimal::ZERO;
        for (obs, _, w) in &weighted {
            let term = obs.confidence.checked_mul(*w).ok_or_else(overflow)?;
            confidence_sum = confidence_sum.checked_add(term).ok_or_else(overflow)?;
        }
        let mean_confidence = confidence_sum.checked_div(total_weight).ok_or_else(overflow)?;

        let contributing: Vec<&(&PriceObservation, PriceSource, Decimal)> =
            weighted.iter().filter(|(_, _, w)| !w.is_zero()).collect();

        let confidence = (mean_confidence
            * Self::agreement_scale(contributing.len(), self.min_sources, spread_pct))
        .clamp(Decimal::ZERO, Decimal::ONE)
        .round_dp(PRICE_SCALE);

        let mut volume_24h: Option<Decimal> = None;
        for volume in weighted.iter().filter_map(|(o, _, _)| o.volume_24h) {
            let total = volume_24h.unwrap_or(Decimal::ZERO);
            volume_24h = Some(total.checked_add(volume).ok_or_else(overflow)?);
        }

        let observation_list: Vec<&PriceObservation> = weighted.iter().map(|(o, _, _)| *o).collect();
        let chain_prices = Self::chain_prices(&observation_list).ok_or_else(overflow)?;

        let contributing_sources: Vec<PriceSource> =
            contributing.iter().map(|(_, s, _)| s.clone()).collect();

        // A lone price that actually moves the consensus cannot be corroborated
        let manipulation_risk = if contributing.len() == 1 {
            Decimal::ONE
        } else {
            Decimal::ZERO
        };

        tracing::debug!(
            symbol = %symbol,
            chain = ?chain,
            price = %price,
            deviation_pct = %deviation_pct.round_dp(4),
            sources = contributing_sources.len(),
            "Consensus computed"
        );

        Ok(AggregatedPrice {
            symbol,
            chain_id: chain,
            price,
            computed_at: Utc::now(),
            sequence: 0,
            confidence,
            deviation_pct,
            spread_pct,
            quality_score: Decimal::ZERO,
            manipulation_risk,
            volume_24h,
            observation_count: contributing_sources.len(),
            chain_prices,
            contributing_sources,
            stale: false,
        })
    }

    /// Largest relative distance from consensus, in percent; `None` on overflow
    fn calculate_deviation(prices: &[Decimal], consensus: Decimal) -> Option<Decimal> {
        if prices.len() < 2 || consensus.is_zero() {
            return Some(Decimal::ZERO);
        }
        let mut max = Decimal::ZERO;
        for p in prices {
            let pct = p
                .checked_sub(consensus)?
                .abs()
                .checked_div(consensus)?
                .checked_mul(HUNDRED)?;
            max = max.max(pct);
        }
        Some(max.round_dp(PRICE_SCALE))
    }

    /// Spread between highest and lowest price relative to consensus, in percent
    fn calculate_spread(prices: &[Decimal], consensus: Decimal) -> Option<Decimal> {
        if prices.len() < 2 || consensus.is_zero() {
            return Some(Decimal::ZERO);
        }
        let min = prices.iter().copied().min()?;
        let max = prices.iter().copied().max()?;
        let pct = max
            .checked_sub(min)?
            .checked_div(consensus)?
            .checked_mul(HUNDRED)?;
        Some(pct.round_dp(PRICE_SCALE))
    }

    /// Scale in [0.5, 1] from source count and agreement
    ///
    /// A 10% spread removes all agreement credit.
    fn agreement_scale(count: usize, min_sources: usize, spread_pct: Decimal) -> Decimal {
        let source_factor = (Decimal::from(count) / Decimal::from(min_sources)).min(Decimal::ONE);
        let agreement_factor = Decimal::ONE - (spread_pct / dec!(10)).min(Decimal::ONE);
        dec!(0.5) + dec!(0.5) * source_factor * agreement_factor
    }

    /// Liquidity-weighted price per chain for chain-aware observations
    ///
    /// Liquidity is reported in whatever units the pool uses, so every step
    /// is checked; `None` means the products left the decimal range.
    fn chain_prices(observations: &[&PriceObservation]) -> Option<BTreeMap<ChainId, ChainPrice>> {
        let mut grouped: BTreeMap<ChainId, Vec<(Decimal, Decimal)>> = BTreeMap::new();
        for obs in observations {
            if let (Some(chain), Some(liquidity)) = (obs.chain_id, obs.liquidity) {
                grouped
                    .entry(chain)
                    .or_default()
                    .push((obs.price, liquidity.max(Decimal::ZERO)));
            }
        }

        let mut result = BTreeMap::new();
        for (chain, points) in grouped {
            let mut liquidity = Decimal::ZERO;
            let mut weighted = Decimal::ZERO;
            let mut plain = Decimal::ZERO;
            for (p, l) in &points {
                liquidity = liquidity.checked_add(*l)?;
                weighted = weighted.checked_add(p.checked_mul(*l)?)?;
                plain = plain.checked_add(*p)?;
            }
            let price = if liquidity.is_zero() {
                plain.checked_div(Decimal::from(points.len()))?
            } else {
                weighted.checked_div(liquidity)?
            };
            result.insert(
                chain,
                ChainPrice {
                    price: price.round_dp(PRICE_SCALE),
                    liquidity,
                },
            );
        }
        Some(result)
    }
}

/// `weight * confidence * reliability`, floored at zero
pub fn effective_weight(obs: &PriceObservation, source: &PriceSource) -> Decimal {
    (source.weight * obs.confidence * source.reliability).max(Decimal::ZERO)
}
