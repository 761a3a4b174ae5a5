//! Attention index service: binary entrypoint.
//! Loads config, builds the store and adapters, spawns the scheduler and serves
//! the Axum router.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use attention_index::{
    api::{self, AppState},
    config::{load_seed, AppConfig, StoreKind},
    metrics::Metrics,
    scheduler::{spawn_scheduler, SchedulerCfg},
    sources::AdapterRegistry,
    store::{IndexStore, JsonFileStore, MemoryStore},
    AttentionService, Orchestrator,
};

/// Compact logs by default; `ATTENTION_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("attention_index=info,warn"));
    let json = std::env::var("ATTENTION_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // The runtime may already have installed a subscriber; keep it in that case.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

async fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn IndexStore>> {
    let seed = match &cfg.store.seed {
        Some(p) => load_seed(p)?,
        None => Vec::new(),
    };
    match cfg.store.kind {
        StoreKind::Memory => {
            let store = MemoryStore::new();
            for e in seed {
                store.insert(e.market_id, e.index);
            }
            Ok(Arc::new(store))
        }
        StoreKind::File => {
            let dir = cfg
                .store
                .dir
                .clone()
                .context("store.kind = \"file\" requires store.dir or ATTENTION_STORE_DIR")?;
            let store = JsonFileStore::new(dir);
            for e in seed {
                // Existing files are left alone so restarts keep their history.
                if store.load(e.index.id).await.is_err() {
                    store.seed(e.market_id, &e.index).await?;
                }
            }
            Ok(Arc::new(store))
        }
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default()?;
    tracing::info!(store = ?cfg.store.kind, scheduler = cfg.scheduler.enabled, "config loaded");

    let store = build_store(&cfg).await?;
    let registry = AdapterRegistry::from_env(&cfg.user_agent);
    let orchestrator = Arc::new(Orchestrator::new(store, registry).with_timeout(cfg.adapter_timeout()));
    let service =
        AttentionService::new(orchestrator).with_default_window(cfg.narrative.default_window.clone());

    if cfg.scheduler.enabled {
        spawn_scheduler(
            service.clone(),
            SchedulerCfg {
                tick_secs: cfg.scheduler.tick_secs,
                markets: cfg.scheduler.markets.clone(),
            },
        );
    }

    let mut router = api::router(AppState { service });
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = ?e, "prometheus recorder not installed; /metrics disabled"),
    }

    Ok(router.into())
}
