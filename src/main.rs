//! PriceMesh - consensus price engine
//!
//! Loads configuration, registers the configured sources and keeps the
//! watch-list warm until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pricemesh::alerts::LogAlertSink;
use pricemesh::config::{AppConfig, LoggingSection};
use pricemesh::persistence::CsvPriceSink;
use pricemesh::scheduler::Scheduler;
use pricemesh::PriceEngine;

fn init_tracing(logging: &LoggingSection) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    tracing::info!("🚀 Starting PriceMesh v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(config = %config, "Configuration loaded");

    let mut engine = PriceEngine::new(config.engine_settings()?).with_alert_sink(Arc::new(LogAlertSink));
    if config.persistence.csv_enabled {
        let sink = CsvPriceSink::new(&config.persistence.data_dir)
            .context("Failed to initialise CSV persistence")?;
        engine = engine.with_sink(Arc::new(sink));
        tracing::info!(dir = %config.persistence.data_dir, "💾 CSV persistence enabled");
    }

    for section in config.sources.iter().filter(|s| s.enabled) {
        let source = section.to_price_source()?;
        let adapter = section.build_adapter()?;
        engine.register_source(source, adapter)?;
        tracing::info!(
            source = %section.id,
            kind = %section.kind,
            adapter = %section.adapter,
            "📡 Source registered"
        );
    }
    if engine.registry().is_empty() {
        tracing::warn!("No sources enabled; every price request will be unavailable");
    }

    let engine = Arc::new(engine);
    let scheduler = if config.scheduler.enabled {
        Some(Scheduler::start(engine.clone(), config.scheduler_settings()))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("🛑 Shutdown signal received");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }

    let stats = &engine.cache().stats;
    tracing::info!(
        hit_rate = stats.hit_rate(),
        cached = engine.cache().len(),
        "👋 PriceMesh stopped"
    );
    Ok(())
}
