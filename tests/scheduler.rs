// tests/scheduler.rs
use std::sync::Arc;

use attention_index::model::{AttentionIndex, EntityKind, SourceState, SourceType};
use attention_index::scheduler::{run_due, SchedulerCfg};
use attention_index::sources::{scripted::ScriptedAdapter, AdapterRegistry};
use attention_index::store::MemoryStore;
use attention_index::{AttentionService, Orchestrator};

fn index(id: u64) -> AttentionIndex {
    let mut idx = AttentionIndex::new(id, EntityKind::Artist)
        .with_source("spotify", SourceState::new(SourceType::Raw, 60));
    idx.update_frequency = 600;
    idx
}

#[tokio::test]
async fn refreshes_only_due_and_selected_markets() {
    let store = Arc::new(MemoryStore::new());
    store.insert(1, index(11));
    store.insert(2, index(12));
    let mut fresh = index(13);
    fresh.last_update = Some(chrono::Utc::now());
    store.insert(3, fresh);

    let spotify = Arc::new(ScriptedAdapter::new("spotify").with_fallback(42.0));
    let registry = AdapterRegistry::new().with(spotify.clone());
    let service = AttentionService::new(Arc::new(Orchestrator::new(store.clone(), registry)));

    let cfg = SchedulerCfg {
        tick_secs: 1,
        markets: vec![],
    };
    assert_eq!(run_due(&service, &cfg).await, vec![1, 2]);
    assert_eq!(spotify.metric_calls(), 2);
    assert_eq!(store.snapshot(11).unwrap().current_price, 42.0);

    // Just refreshed: nothing is due until update_frequency elapses.
    assert!(run_due(&service, &cfg).await.is_empty());

    let mut stale = index(14);
    stale.last_update = Some(chrono::Utc::now() - chrono::Duration::seconds(601));
    store.insert(4, stale);
    store.insert(5, index(15));
    let only_four = SchedulerCfg {
        tick_secs: 1,
        markets: vec![4],
    };
    assert_eq!(run_due(&service, &only_four).await, vec![4]);
    assert!(store.snapshot(15).unwrap().series.is_empty());
}
