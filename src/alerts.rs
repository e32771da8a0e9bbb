//! Alert sinks for manipulation detections and source degradation
//!
//! Delivery is fire-and-forget: a sink must never block the engine.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::ChainId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    ManipulationDetected {
        symbol: String,
        chain: Option<ChainId>,
        confidence: Decimal,
        evidence: Vec<String>,
    },
    /// Fewer sources answered than the configured healthy minimum
    SourcesDegraded {
        symbol: String,
        chain: Option<ChainId>,
        responded: usize,
        eligible: usize,
    },
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// Writes alerts to the log at warn level
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: Alert) {
        match alert {
            Alert::ManipulationDetected {
                symbol,
                chain,
                confidence,
                evidence,
            } => {
                tracing::warn!(
                    symbol = %symbol,
                    chain = ?chain,
                    confidence = %confidence,
                    evidence = ?evidence,
                    "🚨 Possible price manipulation"
                );
            }
            Alert::SourcesDegraded {
                symbol,
                chain,
                responded,
                eligible,
            } => {
                tracing::warn!(
                    symbol = %symbol,
                    chain = ?chain,
                    responded,
                    eligible,
                    "⚠️ Price sources degraded"
                );
            }
        }
    }
}

/// Forwards alerts to a bounded channel, dropping when the consumer lags
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<Alert>,
}

impl ChannelAlertSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn alert(&self, alert: Alert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(alert = ?dropped, "Alert channel full, dropping alert");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Alert channel closed");
            }
        }
    }
}
