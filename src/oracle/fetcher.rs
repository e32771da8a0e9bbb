//! Fetch coordinator - concurrent, deadline-bounded fan-out to every adapter
//!
//! A failing or slow adapter only loses its own observation. The returned
//! list is whatever completed in time, possibly empty.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::oracle::registry::{RegisteredSource, SourceRegistry};
use crate::types::{normalize_symbol, ChainId, PriceObservation};

/// Fan-out settings
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Deadline for sources whose latency budget is zero
    pub default_timeout: Duration,
    /// Upper bound on in-flight adapter calls per fetch; 0 means one per source
    pub max_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            max_concurrency: 0,
        }
    }
}

pub struct FetchCoordinator {
    registry: Arc<SourceRegistry>,
    config: FetchConfig,
}

impl FetchCoordinator {
    pub fn new(registry: Arc<SourceRegistry>, config: FetchConfig) -> Self {
        Self { registry, config }
    }

    /// Number of sources that would be queried for this key
    pub fn eligible_sources(&self, symbol: &str, chain: Option<ChainId>) -> usize {
        let symbol = normalize_symbol(symbol);
        self.registry
            .snapshot()
            .iter()
            .filter(|r| r.adapter.supports(&symbol, chain))
            .count()
    }

    /// Query every supporting adapter concurrently
    pub async fn fetch_all(&self, symbol: &str, chain: Option<ChainId>) -> Vec<PriceObservation> {
        let symbol = normalize_symbol(symbol);
        let targets: Vec<RegisteredSource> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|r| r.adapter.supports(&symbol, chain))
            .collect();

        if targets.is_empty() {
            tracing::warn!(symbol = %symbol, chain = ?chain, "No source supports this symbol");
            return Vec::new();
        }

        let limit = match self.config.max_concurrency {
            0 => targets.len(),
            n => n.min(targets.len()),
        };

        let results: Vec<Option<PriceObservation>> = stream::iter(targets)
            .map(|registered| {
                let symbol = symbol.clone();
                async move { self.fetch_one(registered, &symbol, chain).await }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut observations: Vec<PriceObservation> = results.into_iter().flatten().collect();
        // Completion order is nondeterministic; aggregation must not be
        observations.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        tracing::debug!(
            symbol = %symbol,
            chain = ?chain,
            survivors = observations.len(),
            "Fetch cycle complete"
        );

        observations
    }

    async fn fetch_one(
        &self,
        registered: RegisteredSource,
        symbol: &str,
        chain: Option<ChainId>,
    ) -> Option<PriceObservation> {
        let source = &registered.source;
        let deadline = if source.latency_budget.is_zero() {
            self.config.default_timeout
        } else {
            source.latency_budget
        };

        let started = std::time::Instant::now();
        match tokio::time::timeout(deadline, registered.adapter.fetch(symbol, chain, deadline)).await {
            Ok(Ok(mut obs)) => {
                if obs.price.is_sign_negative() || obs.price.is_zero() {
                    tracing::warn!(
                        source = %source.id,
                        symbol = %symbol,
                        price = %obs.price,
                        "Discarding non-positive price"
                    );
                    return None;
                }
                // The registry id is authoritative, whatever the adapter stamped
                obs.source_id = source.id.clone();
                obs.symbol = symbol.to_string();
                tracing::trace!(
                    source = %source.id,
                    symbol = %symbol,
                    price = %obs.price,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Observation received"
                );
                Some(obs)
            }
            Ok(Err(e)) => {
                tracing::warn!(source = %source.id, symbol = %symbol, error = %e, "Source fetch failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    source = %source.id,
                    symbol = %symbol,
                    timeout_ms = deadline.as_millis() as u64,
                    "Source fetch timed out"
                );
                None
            }
        }
    }
}
