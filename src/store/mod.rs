// src/store/mod.rs
//! Persistence collaborator. The core needs: resolve a market, read one index,
//! partially update it, and append to its series/news maps keyed by timestamp.
//! A refresh tick is committed through [`IndexStore::commit_tick`], which applies
//! state, series append and news append together or not at all.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    AttentionIndex, IndexId, MarketId, NewsEntry, NewsSourceState, SeriesEntry, SourceState,
};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Partial update. Map fields merge per key; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexPatch {
    pub sources: BTreeMap<String, SourceState>,
    pub news_sources: BTreeMap<String, NewsSourceState>,
    pub current_price: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl IndexPatch {
    pub fn source(name: &str, state: SourceState) -> Self {
        let mut p = Self::default();
        p.sources.insert(name.to_string(), state);
        p
    }

    pub fn news_source(name: &str, state: NewsSourceState) -> Self {
        let mut p = Self::default();
        p.news_sources.insert(name.to_string(), state);
        p
    }

    pub fn apply(self, idx: &mut AttentionIndex) {
        idx.sources.extend(self.sources);
        idx.news_sources.extend(self.news_sources);
        if let Some(p) = self.current_price {
            idx.current_price = p;
        }
        if let Some(t) = self.last_update {
            idx.last_update = Some(t);
        }
    }
}

/// Everything one tick writes.
#[derive(Debug, Clone, PartialEq)]
pub struct TickCommit {
    pub patch: IndexPatch,
    pub at: DateTime<Utc>,
    pub entry: SeriesEntry,
    /// Only present when at least one narrative payload was collected.
    pub news: Option<NewsEntry>,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn index_for_market(&self, market_id: MarketId) -> Result<IndexId, StoreError>;

    /// All `(market, index)` pairs, for the scheduler.
    async fn markets(&self) -> Result<Vec<(MarketId, IndexId)>, StoreError>;

    async fn load(&self, id: IndexId) -> Result<AttentionIndex, StoreError>;

    async fn update(&self, id: IndexId, patch: IndexPatch) -> Result<(), StoreError>;

    async fn append_series(
        &self,
        id: IndexId,
        at: DateTime<Utc>,
        entry: SeriesEntry,
    ) -> Result<(), StoreError>;

    async fn append_news(
        &self,
        id: IndexId,
        at: DateTime<Utc>,
        entry: NewsEntry,
    ) -> Result<(), StoreError>;

    async fn commit_tick(&self, id: IndexId, commit: TickCommit) -> Result<(), StoreError>;
}

/// Insert into an append-only map; timestamps must move forward.
pub(crate) fn append_entry<V>(
    map: &mut BTreeMap<DateTime<Utc>, V>,
    at: DateTime<Utc>,
    value: V,
) -> Result<(), StoreError> {
    check_append(map, at)?;
    map.insert(at, value);
    Ok(())
}

fn check_append<V>(map: &BTreeMap<DateTime<Utc>, V>, at: DateTime<Utc>) -> Result<(), StoreError> {
    match map.keys().next_back() {
        Some(last) if *last >= at => Err(StoreError::Conflict(format!(
            "append at {at} is not after last entry {last}"
        ))),
        _ => Ok(()),
    }
}

/// Validate first, then mutate: a rejected commit leaves `idx` untouched.
pub(crate) fn apply_commit(idx: &mut AttentionIndex, commit: TickCommit) -> Result<(), StoreError> {
    check_append(&idx.series, commit.at)?;
    if commit.news.is_some() {
        check_append(&idx.news_series, commit.at)?;
    }
    commit.patch.apply(idx);
    idx.series.insert(commit.at, commit.entry);
    if let Some(news) = commit.news {
        idx.news_series.insert(commit.at, news);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, SourceType};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn patch_merges_per_source() {
        let mut idx = AttentionIndex::new(1, EntityKind::Song)
            .with_source("x", SourceState::new(SourceType::Raw, 60))
            .with_source("youtube", SourceState::new(SourceType::Raw, 60));
        let mut yt = SourceState::new(SourceType::DifferenceRaw, 120);
        yt.has_valid_data = true;
        IndexPatch::source("youtube", yt.clone()).apply(&mut idx);
        assert_eq!(idx.sources["youtube"], yt);
        assert_eq!(idx.sources["x"].frequency, 60);
        assert_eq!(idx.current_price, 0.0);
    }

    #[test]
    fn rejected_commit_leaves_index_untouched() {
        let mut idx = AttentionIndex::new(1, EntityKind::Song);
        idx.series.insert(t0(), SeriesEntry::value_only(1.0));
        let before = idx.clone();

        let commit = TickCommit {
            patch: IndexPatch {
                current_price: Some(9.0),
                ..Default::default()
            },
            at: t0() - Duration::seconds(1),
            entry: SeriesEntry::value_only(9.0),
            news: None,
        };
        assert!(matches!(apply_commit(&mut idx, commit), Err(StoreError::Conflict(_))));
        assert_eq!(idx, before);
    }

    #[test]
    fn append_requires_forward_time() {
        let mut m: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
        append_entry(&mut m, t0(), 1.0).unwrap();
        assert!(append_entry(&mut m, t0(), 2.0).is_err());
        append_entry(&mut m, t0() + Duration::milliseconds(1), 2.0).unwrap();
        assert_eq!(m.len(), 2);
    }
}
