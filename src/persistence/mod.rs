//! CSV Persistence Module
//!
//! Stores aggregated prices for historical analytics. Saving is optional
//! and best-effort; the engine only logs failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::types::AggregatedPrice;

/// Persistence collaborator for aggregated prices
#[async_trait]
pub trait PriceSink: Send + Sync {
    async fn save(&self, price: &AggregatedPrice) -> Result<()>;
}

/// Flat CSV row for one aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub timestamp: i64,
    pub symbol: String,
    pub chain_id: Option<u64>,
    pub sequence: u64,
    pub price: String,
    pub confidence: String,
    pub deviation_pct: String,
    pub spread_pct: String,
    pub quality_score: String,
    pub manipulation_risk: String,
    pub volume_24h: Option<String>,
    pub sources: String,
    pub stale: bool,
}

impl From<&AggregatedPrice> for AggregateRecord {
    fn from(p: &AggregatedPrice) -> Self {
        Self {
            timestamp: p.computed_at.timestamp_millis(),
            symbol: p.symbol.clone(),
            chain_id: p.chain_id.map(|c| c.0),
            sequence: p.sequence,
            price: p.price.to_string(),
            confidence: p.confidence.to_string(),
            deviation_pct: p.deviation_pct.to_string(),
            spread_pct: p.spread_pct.to_string(),
            quality_score: p.quality_score.to_string(),
            manipulation_risk: p.manipulation_risk.to_string(),
            volume_24h: p.volume_24h.map(|v| v.to_string()),
            sources: p
                .contributing_sources
                .iter()
                .map(|s| s.id.as_str())
                .collect::<Vec<_>>()
                .join("|"),
            stale: p.stale,
        }
    }
}

struct DailyWriter {
    date: NaiveDate,
    writer: csv::Writer<std::fs::File>,
}

/// Appends aggregates to `<data_dir>/aggregates/aggregates_<date>.csv`
pub struct CsvPriceSink {
    dir: PathBuf,
    current: Mutex<Option<DailyWriter>>,
}

impl CsvPriceSink {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().join("aggregates");
        fs::create_dir_all(&dir).context("Failed to create aggregates directory")?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("aggregates_{}.csv", date.format("%Y-%m-%d")))
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file_has_data =
            path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open CSV file")?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }
}

#[async_trait]
impl PriceSink for CsvPriceSink {
    async fn save(&self, price: &AggregatedPrice) -> Result<()> {
        let record = AggregateRecord::from(price);
        let today = Utc::now().date_naive();

        let mut guard = self.current.lock().await;
        let rotate = guard.as_ref().map_or(true, |w| w.date != today);
        if rotate {
            let writer = Self::create_writer(&self.path_for(today))?;
            *guard = Some(DailyWriter { date: today, writer });
        }

        let daily = guard.as_mut().context("CSV writer not initialised")?;
        daily
            .writer
            .serialize(&record)
            .context("Failed to write aggregate record")?;
        daily.writer.flush().context("Failed to flush aggregate writer")?;
        Ok(())
    }
}
