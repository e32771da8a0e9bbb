//! Error types for the consensus engine

use crate::types::ChainId;

/// Errors surfaced by registry, aggregation and price queries.
///
/// Adapter-level failures never appear here; the fetch coordinator absorbs
/// them and they only show up indirectly as [`OracleError::NoObservations`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    /// Lookup of a source id that was never registered.
    #[error("unknown price source: {0}")]
    UnknownSource(String),

    /// Registration of an id that already exists.
    #[error("price source already registered: {0}")]
    DuplicateSource(String),

    /// Every adapter failed or timed out for this key.
    #[error("no observations for {symbol} (chain {chain:?})")]
    NoObservations {
        symbol: String,
        chain: Option<ChainId>,
    },

    /// All surviving observations carried zero effective weight.
    #[error("degenerate weights for {symbol}: total effective weight is zero")]
    DegenerateWeights { symbol: String },

    /// Not enough aggregates recorded to run manipulation checks.
    #[error("insufficient history for {symbol}: need {required}, have {available}")]
    InsufficientHistory {
        symbol: String,
        required: usize,
        available: usize,
    },

    /// Fixed-point overflow while combining prices.
    #[error("arithmetic overflow while aggregating {0}")]
    Arithmetic(String),
}

impl OracleError {
    /// Whether the caller should treat this as "temporarily unavailable".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            OracleError::NoObservations { .. }
                | OracleError::DegenerateWeights { .. }
                | OracleError::Arithmetic(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;
