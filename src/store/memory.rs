// src/store/memory.rs
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{append_entry, apply_commit, IndexPatch, IndexStore, TickCommit};
use crate::error::StoreError;
use crate::model::{AttentionIndex, IndexId, MarketId, NewsEntry, SeriesEntry};

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<IndexId, AttentionIndex>,
    markets: HashMap<MarketId, IndexId>,
}

/// Process-local store. Every operation runs under one lock, so each is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an index and link it to a market.
    pub fn insert(&self, market_id: MarketId, index: AttentionIndex) {
        let mut g = self.lock();
        g.markets.insert(market_id, index.id);
        g.indices.insert(index.id, index);
    }

    /// Synchronous snapshot, handy in tests.
    pub fn snapshot(&self, id: IndexId) -> Option<AttentionIndex> {
        self.lock().indices.get(&id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn with_index<T>(
        &self,
        id: IndexId,
        f: impl FnOnce(&mut AttentionIndex) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut g = self.lock();
        let idx = g
            .indices
            .get_mut(&id)
            .ok_or(StoreError::IndexNotFound(id))?;
        f(idx)
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn index_for_market(&self, market_id: MarketId) -> Result<IndexId, StoreError> {
        self.lock()
            .markets
            .get(&market_id)
            .copied()
            .ok_or(StoreError::MarketNotFound(market_id))
    }

    async fn markets(&self) -> Result<Vec<(MarketId, IndexId)>, StoreError> {
        let mut v: Vec<_> = self.lock().markets.iter().map(|(m, i)| (*m, *i)).collect();
        v.sort_unstable();
        Ok(v)
    }

    async fn load(&self, id: IndexId) -> Result<AttentionIndex, StoreError> {
        self.with_index(id, |idx| Ok(idx.clone()))
    }

    async fn update(&self, id: IndexId, patch: IndexPatch) -> Result<(), StoreError> {
        self.with_index(id, |idx| {
            patch.apply(idx);
            Ok(())
        })
    }

    async fn append_series(
        &self,
        id: IndexId,
        at: DateTime<Utc>,
        entry: SeriesEntry,
    ) -> Result<(), StoreError> {
        self.with_index(id, |idx| append_entry(&mut idx.series, at, entry))
    }

    async fn append_news(
        &self,
        id: IndexId,
        at: DateTime<Utc>,
        entry: NewsEntry,
    ) -> Result<(), StoreError> {
        self.with_index(id, |idx| append_entry(&mut idx.news_series, at, entry))
    }

    async fn commit_tick(&self, id: IndexId, commit: TickCommit) -> Result<(), StoreError> {
        self.with_index(id, |idx| apply_commit(idx, commit))
    }
}
