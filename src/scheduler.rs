// src/scheduler.rs
use std::time::Duration;

use chrono::Utc;
use metrics::gauge;
use tokio::task::JoinHandle;

use crate::model::MarketId;
use crate::service::AttentionService;

#[derive(Clone, Debug, Default)]
pub struct SchedulerCfg {
    pub tick_secs: u64,
    /// Empty means every market in the store.
    pub markets: Vec<MarketId>,
}

/// One scheduler pass: refresh every selected market whose index is due.
/// Returns the markets that committed a tick.
pub async fn run_due(service: &AttentionService, cfg: &SchedulerCfg) -> Vec<MarketId> {
    let now = Utc::now();
    let due = match service.due_markets(now).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(target: "scheduler", error = ?e, "listing markets failed");
            return Vec::new();
        }
    };

    let mut refreshed = Vec::new();
    for market_id in due
        .into_iter()
        .filter(|m| cfg.markets.is_empty() || cfg.markets.contains(m))
    {
        match service.refresh(market_id).await {
            Ok(report) => {
                tracing::debug!(target: "scheduler", market_id, value = report.value, "scheduled refresh");
                refreshed.push(market_id);
            }
            Err(e) => {
                tracing::warn!(target: "scheduler", error = ?e, market_id, "scheduled refresh failed");
            }
        }
    }
    gauge!("attention_scheduler_last_run_ts").set(now.timestamp() as f64);
    refreshed
}

/// Background loop calling [`run_due`] every `tick_secs`.
pub fn spawn_scheduler(service: AttentionService, cfg: SchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.tick_secs.max(1)));
        loop {
            ticker.tick().await;
            let refreshed = run_due(&service, &cfg).await;
            tracing::info!(target: "scheduler", refreshed = refreshed.len(), "scheduler tick");
        }
    })
}
