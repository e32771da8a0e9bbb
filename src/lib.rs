//! PriceMesh Library
//!
//! Multi-source price consensus with cross-chain arbitrage scanning and
//! manipulation detection

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod persistence;
pub mod scheduler;
pub mod types;

pub use engine::PriceEngine;
pub use error::OracleError;
