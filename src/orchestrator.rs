// src/orchestrator.rs
//! One refresh tick per call: fetch due sources, normalize, commit.
//!
//! Adapter calls for one index run concurrently, each bounded by a timeout.
//! Everything that writes an index runs under that index's lock, so two ticks
//! for the same index never interleave their rebase updates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{FetchError, RefreshError};
use crate::model::{AttentionIndex, IndexId, MarketId, NewsEntry, NewsSourceState, SeriesEntry};
use crate::normalize::{normalize_tick, round2};
use crate::sources::{AdapterRegistry, Capabilities, FetchRequest};
use crate::store::{IndexPatch, IndexStore, TickCommit};

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_millis(5000);

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub market_id: MarketId,
    pub index_id: IndexId,
    pub at: DateTime<Utc>,
    pub value: f64,
    pub current_price: f64,
    /// Sources whose reading was used this tick.
    pub fetched: Vec<String>,
    pub failed: Vec<String>,
    /// Not due yet.
    pub skipped: Vec<String>,
    /// Configured under a role its adapter cannot serve; never called.
    pub unsupported: Vec<String>,
    pub rebased: Vec<String>,
    /// Sources that returned a narrative payload.
    pub narratives: Vec<String>,
}

pub struct Orchestrator {
    store: Arc<dyn IndexStore>,
    registry: AdapterRegistry,
    timeout: Duration,
    locks: StdMutex<HashMap<IndexId, Arc<Mutex<()>>>>,
    warned: StdMutex<HashSet<(IndexId, String, &'static str)>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn IndexStore>, registry: AdapterRegistry) -> Self {
        Self {
            store,
            registry,
            timeout: DEFAULT_ADAPTER_TIMEOUT,
            locks: StdMutex::new(HashMap::new()),
            warned: StdMutex::new(HashSet::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub async fn refresh(&self, market_id: MarketId) -> Result<TickReport, RefreshError> {
        self.refresh_at(market_id, Utc::now()).await
    }

    /// Run one tick as of `now`. Adapter failures are logged and skipped;
    /// store failures abort the tick and are returned.
    pub async fn refresh_at(
        &self,
        market_id: MarketId,
        now: DateTime<Utc>,
    ) -> Result<TickReport, RefreshError> {
        crate::metrics::ensure_described();
        let index_id = self.store.index_for_market(market_id).await?;
        let lock = self.lock_for(index_id);
        let _guard = lock.lock().await;

        let index = self.store.load(index_id).await?;

        let (due, skipped): (Vec<_>, Vec<_>) =
            index.sources.iter().partition(|(_, s)| s.is_due(now));
        let (due, no_metric): (Vec<_>, Vec<_>) = due
            .into_iter()
            .partition(|&(name, _)| self.supports(index_id, name, "metric", |c| c.metric));
        let metric_calls = due.iter().map(|&(name, state)| {
            let req = FetchRequest::new(index_id, index.entity, &state.query);
            async move { (name.as_str(), self.fetch_metric(name, req).await) }
        });

        let news_due: Vec<(&String, &NewsSourceState)> = if index.track_news {
            index.news_sources.iter().filter(|(_, s)| s.is_due(now)).collect()
        } else {
            Vec::new()
        };
        let (news_due, no_narrative): (Vec<_>, Vec<_>) = news_due
            .into_iter()
            .partition(|&(name, _)| self.supports(index_id, name, "narrative", |c| c.narrative));
        let unsupported: Vec<String> = no_metric
            .iter()
            .map(|(n, _)| n.to_string())
            .chain(no_narrative.iter().map(|(n, _)| n.to_string()))
            .collect();
        let narrative_calls = news_due.iter().map(|&(name, state)| {
            let req = FetchRequest::new(index_id, index.entity, &state.query);
            let window = Duration::from_secs(state.frequency);
            async move { (name.as_str(), self.fetch_narrative(name, req, window).await) }
        });

        let (metric_results, narrative_results) =
            futures::join!(join_all(metric_calls), join_all(narrative_calls));

        // Metric readings; watermark persisted per source as soon as it is known.
        let mut prior = index.sources.clone();
        let mut readings = BTreeMap::new();
        let mut failed = Vec::new();
        for (name, res) in metric_results {
            match res {
                Ok(v) => {
                    if let Some(state) = prior.get_mut(name) {
                        state.last_fetched_at = Some(now);
                        self.store
                            .update(index_id, IndexPatch::source(name, state.clone()))
                            .await?;
                    }
                    readings.insert(name.to_string(), v);
                }
                Err(e) => {
                    tracing::warn!(target: "refresh", error = ?e, index_id, source = name, "source fetch failed");
                    counter!("attention_source_errors_total", "source" => name.to_string())
                        .increment(1);
                    failed.push(name.to_string());
                }
            }
        }

        let mut news_states = BTreeMap::new();
        let mut news = NewsEntry::new();
        for (name, res) in narrative_results {
            match res {
                Ok(payload) => {
                    if let Some(state) = index.news_sources.get(name) {
                        let mut state = state.clone();
                        state.last_fetched_at = Some(now);
                        self.store
                            .update(index_id, IndexPatch::news_source(name, state.clone()))
                            .await?;
                        news_states.insert(name.to_string(), state);
                    }
                    if is_empty_payload(&payload) {
                        tracing::debug!(target: "refresh", index_id, source = name, "empty narrative payload");
                    } else {
                        news.insert(name.to_string(), payload);
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "refresh", error = ?e, index_id, source = name, "narrative fetch failed");
                    counter!("attention_source_errors_total", "source" => name.to_string())
                        .increment(1);
                }
            }
        }

        let outcome = normalize_tick(&prior, &readings);
        let at = next_tick_time(now, &index);
        let current_price = round2(outcome.aggregate);
        let narratives: Vec<String> = news.keys().cloned().collect();

        let commit = TickCommit {
            patch: IndexPatch {
                sources: outcome.states,
                news_sources: news_states,
                current_price: Some(current_price),
                last_update: Some(at),
            },
            at,
            entry: SeriesEntry {
                value: outcome.aggregate,
                sources: outcome.used,
                raw: readings.clone(),
            },
            news: (!news.is_empty()).then_some(news),
        };
        self.store.commit_tick(index_id, commit).await?;

        counter!("attention_refresh_total").increment(1);
        gauge!("attention_index_value", "index" => index_id.to_string()).set(outcome.aggregate);
        tracing::info!(
            target: "refresh",
            market_id,
            index_id,
            value = outcome.aggregate,
            fetched = readings.len(),
            failed = failed.len(),
            "tick committed"
        );

        Ok(TickReport {
            market_id,
            index_id,
            at,
            value: outcome.aggregate,
            current_price,
            fetched: readings.into_keys().collect(),
            failed,
            skipped: skipped.into_iter().map(|(n, _)| n.clone()).collect(),
            unsupported,
            rebased: outcome.rebased,
            narratives,
        })
    }

    fn lock_for(&self, id: IndexId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// False when the registered adapter lacks `role`. Unknown sources pass
    /// through so the fetch reports them as failures.
    fn supports(
        &self,
        index_id: IndexId,
        source: &str,
        role: &'static str,
        has: fn(Capabilities) -> bool,
    ) -> bool {
        let Some(adapter) = self.registry.get(source) else {
            return true;
        };
        if has(adapter.capabilities()) {
            return true;
        }
        let mut warned = self.warned.lock().unwrap_or_else(|p| p.into_inner());
        if warned.insert((index_id, source.to_string(), role)) {
            tracing::warn!(target: "refresh", index_id, source, role, "adapter lacks capability; source ignored");
        }
        false
    }

    async fn fetch_metric(&self, source: &str, req: FetchRequest<'_>) -> Result<f64, FetchError> {
        let adapter = self
            .registry
            .get(source)
            .ok_or_else(|| FetchError::UnknownSource(source.to_string()))?;
        let started = Instant::now();
        let res = match tokio::time::timeout(self.timeout, adapter.fetch_metric(&req)).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(self.timeout.as_millis() as u64)),
        };
        record_latency(source, started);
        res
    }

    async fn fetch_narrative(
        &self,
        source: &str,
        req: FetchRequest<'_>,
        window: Duration,
    ) -> Result<Value, FetchError> {
        let adapter = self
            .registry
            .get(source)
            .ok_or_else(|| FetchError::UnknownSource(source.to_string()))?;
        let started = Instant::now();
        let res = match tokio::time::timeout(self.timeout, adapter.fetch_narrative(&req, window)).await
        {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(self.timeout.as_millis() as u64)),
        };
        record_latency(source, started);
        res
    }
}

fn record_latency(source: &str, started: Instant) {
    histogram!("attention_fetch_ms", "source" => source.to_string())
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

/// Series and news keys must strictly increase; nudge `now` past the last key.
fn next_tick_time(now: DateTime<Utc>, index: &AttentionIndex) -> DateTime<Utc> {
    let last = index
        .last_tick()
        .into_iter()
        .chain(index.news_series.keys().next_back().copied())
        .max();
    match last {
        Some(last) if last >= now => last + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

fn is_empty_payload(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use chrono::TimeZone;

    #[test]
    fn tick_time_moves_past_last_entry() {
        let t = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut idx = AttentionIndex::new(1, EntityKind::Song);
        assert_eq!(next_tick_time(t, &idx), t);
        idx.series.insert(t, SeriesEntry::value_only(1.0));
        assert_eq!(next_tick_time(t, &idx), t + chrono::Duration::milliseconds(1));
        assert_eq!(
            next_tick_time(t + chrono::Duration::seconds(5), &idx),
            t + chrono::Duration::seconds(5)
        );
    }

    #[test]
    fn empty_payload_detection() {
        assert!(is_empty_payload(&Value::Null));
        assert!(is_empty_payload(&serde_json::json!({})));
        assert!(is_empty_payload(&serde_json::json!([])));
        assert!(!is_empty_payload(&serde_json::json!({"data": []})));
    }
}
