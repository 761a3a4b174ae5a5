// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_described();
        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Register descriptions once per process; harmless without a recorder.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("attention_refresh_total", "Committed refresh ticks.");
        describe_counter!(
            "attention_source_errors_total",
            "Adapter calls that failed or timed out, by source."
        );
        describe_histogram!("attention_fetch_ms", "Adapter call latency in milliseconds.");
        describe_gauge!("attention_index_value", "Latest aggregate value per index.");
        describe_counter!("narrative_items_total", "Narrative items served.");
        describe_gauge!(
            "attention_scheduler_last_run_ts",
            "Unix ts when the scheduler last ran."
        );
    });
}
