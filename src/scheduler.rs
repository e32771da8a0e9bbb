//! Background scheduler - refresh, arbitrage and manipulation loops
//!
//! Each loop runs on its own timer and only talks to the engine. A failure
//! for one symbol is logged and the loop moves on.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::SchedulerSettings;
use crate::engine::PriceEngine;

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the three loops
    pub fn start(engine: Arc<PriceEngine>, settings: SchedulerSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            refresh_secs = settings.refresh_interval.as_secs(),
            arbitrage_secs = settings.arbitrage_interval.as_secs(),
            manipulation_secs = settings.manipulation_interval.as_secs(),
            "Starting scheduler"
        );

        let handles = vec![
            spawn_loop(
                "refresh",
                settings.refresh_interval,
                engine.clone(),
                shutdown_rx.clone(),
                |engine| async move {
                    let refreshed = engine.refresh_watch_list().await;
                    tracing::debug!(refreshed, "Refresh tick");
                },
            ),
            spawn_loop(
                "arbitrage",
                settings.arbitrage_interval,
                engine.clone(),
                shutdown_rx.clone(),
                |engine| async move {
                    let found = engine.scan_arbitrage();
                    tracing::debug!(opportunities = found.len(), "Arbitrage tick");
                },
            ),
            spawn_loop(
                "manipulation",
                settings.manipulation_interval,
                engine,
                shutdown_rx,
                |engine| async move {
                    let detections = engine.sweep_manipulation();
                    let purged = engine.cache().purge();
                    tracing::debug!(detections = detections.len(), purged, "Manipulation tick");
                },
            ),
        ];

        Self { shutdown_tx, handles }
    }

    /// Signal every loop and wait for in-flight ticks to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    engine: Arc<PriceEngine>,
    mut shutdown_rx: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<PriceEngine>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick(engine.clone()).await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!(task = name, "Scheduler loop exiting");
                        break;
                    }
                }
            }
        }
    })
}
