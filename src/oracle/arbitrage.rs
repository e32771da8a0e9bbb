//! Arbitrage scanner - cross-chain discrepancies over cached consensus prices
//!
//! Reads only the price cache; a scan never triggers an upstream fetch.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, RwLock};

use crate::oracle::cache::PriceCache;
use crate::types::{normalize_symbol, ArbitrageDirection, ArbitrageOpportunity, ChainId, PRICE_SCALE};

pub struct ArbitrageScanner {
    cache: Arc<PriceCache>,
    /// Emit only when the difference is strictly above this percentage
    min_profit_pct: Decimal,
    /// Result of the last full scan, replaced wholesale
    latest: RwLock<Vec<ArbitrageOpportunity>>,
}

impl ArbitrageScanner {
    pub fn new(cache: Arc<PriceCache>, min_profit_pct: Decimal) -> Self {
        Self {
            cache,
            min_profit_pct,
            latest: RwLock::new(Vec::new()),
        }
    }

    /// Compare every unordered chain pair per symbol
    pub fn scan(&self, symbols: &[String], chains: &[ChainId]) -> Vec<ArbitrageOpportunity> {
        let mut opportunities = Vec::new();

        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            let priced: Vec<(ChainId, Decimal)> = chains
                .iter()
                .filter_map(|&chain| {
                    self.cache
                        .get(&symbol, Some(chain))
                        .filter(|p| p.price > Decimal::ZERO)
                        .map(|p| (chain, p.price))
                })
                .collect();

            for (i, &(source_chain, source_price)) in priced.iter().enumerate() {
                for &(target_chain, target_price) in &priced[i + 1..] {
                    if let Some(opp) =
                        self.evaluate(&symbol, source_chain, source_price, target_chain, target_price)
                    {
                        tracing::info!(
                            symbol = %opp.symbol,
                            source_chain = %opp.source_chain,
                            target_chain = %opp.target_chain,
                            profit_pct = %opp.price_difference_pct.round_dp(4),
                            direction = %opp.direction,
                            "Arbitrage opportunity"
                        );
                        opportunities.push(opp);
                    }
                }
            }
        }

        opportunities
    }

    /// Scan and publish as the latest result set
    pub fn scan_and_store(&self, symbols: &[String], chains: &[ChainId]) -> Vec<ArbitrageOpportunity> {
        let opportunities = self.scan(symbols, chains);
        if let Ok(mut latest) = self.latest.write() {
            *latest = opportunities.clone();
        }
        opportunities
    }

    pub fn latest(&self) -> Vec<ArbitrageOpportunity> {
        self.latest.read().map(|l| l.clone()).unwrap_or_default()
    }

    fn evaluate(
        &self,
        symbol: &str,
        source_chain: ChainId,
        source_price: Decimal,
        target_chain: ChainId,
        target_price: Decimal,
    ) -> Option<ArbitrageOpportunity> {
        let cheaper = source_price.min(target_price);
        if cheaper.is_zero() {
            return None;
        }
        let profit_pct =
            ((source_price - target_price).abs() / cheaper * dec!(100)).round_dp(PRICE_SCALE);
        if profit_pct <= self.min_profit_pct {
            return None;
        }

        let direction = if source_price < target_price {
            ArbitrageDirection::BuySourceSellTarget
        } else {
            ArbitrageDirection::BuyTargetSellSource
        };

        Some(ArbitrageOpportunity {
            symbol: symbol.to_string(),
            source_chain,
            target_chain,
            source_price,
            target_price,
            price_difference_pct: profit_pct,
            direction,
            detected_at: Utc::now(),
        })
    }
}
