// src/store/file.rs
//! JSON-file store: `<dir>/markets.json` maps market ids to index ids and each
//! index lives in `<dir>/indices/<id>.json`. Writes go to a temp file and are
//! renamed into place, so a reader never sees a half-written index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{fs, sync::Mutex};

use super::{append_entry, apply_commit, IndexPatch, IndexStore, TickCommit};
use crate::error::StoreError;
use crate::model::{AttentionIndex, IndexId, MarketId, NewsEntry, SeriesEntry};

const MARKETS_FILE: &str = "markets.json";
const INDICES_DIR: &str = "indices";

pub struct JsonFileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an index and link it to a market (creates directories as needed).
    pub async fn seed(&self, market_id: MarketId, index: &AttentionIndex) -> Result<(), StoreError> {
        let _g = self.write_lock.lock().await;
        let mut markets = self.read_markets().await?;
        markets.insert(market_id.to_string(), index.id);
        write_atomic(&self.dir.join(MARKETS_FILE), &serde_json::to_vec_pretty(&markets)?).await?;
        self.write_index(index).await
    }

    fn index_path(&self, id: IndexId) -> PathBuf {
        self.dir.join(INDICES_DIR).join(format!("{id}.json"))
    }

    async fn read_markets(&self) -> Result<BTreeMap<String, IndexId>, StoreError> {
        match fs::read(self.dir.join(MARKETS_FILE)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_index(&self, id: IndexId) -> Result<AttentionIndex, StoreError> {
        match fs::read(self.index_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::IndexNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &AttentionIndex) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path(index.id), &bytes).await
    }

    async fn modify<T>(
        &self,
        id: IndexId,
        f: impl FnOnce(&mut AttentionIndex) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let _g = self.write_lock.lock().await;
        let mut idx = self.read_index(id).await?;
        let out = f(&mut idx)?;
        self.write_index(&idx).await?;
        Ok(out)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl IndexStore for JsonFileStore {
    async fn index_for_market(&self, market_id: MarketId) -> Result<IndexId, StoreError> {
        self.read_markets()
            .await?
            .get(&market_id.to_string())
            .copied()
            .ok_or(StoreError::MarketNotFound(market_id))
    }

    async fn markets(&self) -> Result<Vec<(MarketId, IndexId)>, StoreError> {
        let mut v: Vec<(MarketId, IndexId)> = self
            .read_markets()
            .await?
            .into_iter()
            .filter_map(|(k, id)| match k.parse::<MarketId>() {
                Ok(m) => Some((m, id)),
                Err(_) => {
                    tracing::warn!(key = %k, "non-numeric market key in markets.json skipped");
                    None
                }
            })
            .collect();
        v.sort_unstable();
        Ok(v)
    }

    async fn load(&self, id: IndexId) -> Result<AttentionIndex, StoreError> {
        self.read_index(id).await
    }

    async fn update(&self, id: IndexId, patch: IndexPatch) -> Result<(), StoreError> {
        self.modify(id, |idx| {
            patch.apply(idx);
            Ok(())
        })
        .await
    }

    async fn append_series(
        &self,
        id: IndexId,
        at: DateTime<Utc>,
        entry: SeriesEntry,
    ) -> Result<(), StoreError> {
        self.modify(id, |idx| append_entry(&mut idx.series, at, entry))
            .await
    }

    async fn append_news(
        &self,
        id: IndexId,
        at: DateTime<Utc>,
        entry: NewsEntry,
    ) -> Result<(), StoreError> {
        self.modify(id, |idx| append_entry(&mut idx.news_series, at, entry))
            .await
    }

    async fn commit_tick(&self, id: IndexId, commit: TickCommit) -> Result<(), StoreError> {
        self.modify(id, |idx| apply_commit(idx, commit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, SourceState, SourceType};
    use chrono::TimeZone;

    #[tokio::test]
    async fn seed_load_and_commit_roundtrip_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path());
        let idx = AttentionIndex::new(5, EntityKind::Song)
            .with_source("x", SourceState::new(SourceType::Raw, 60));
        store.seed(42, &idx).await.unwrap();

        assert_eq!(store.index_for_market(42).await.unwrap(), 5);
        assert_eq!(store.markets().await.unwrap(), vec![(42, 5)]);

        let at = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let commit = TickCommit {
            patch: IndexPatch {
                current_price: Some(12.5),
                last_update: Some(at),
                ..Default::default()
            },
            at,
            entry: SeriesEntry::value_only(12.5),
            news: None,
        };
        store.commit_tick(5, commit).await.unwrap();

        // A fresh handle sees the committed state.
        let reopened = JsonFileStore::new(tmp.path());
        let back = reopened.load(5).await.unwrap();
        assert_eq!(back.current_price, 12.5);
        assert_eq!(back.series.len(), 1);
        assert!(!tmp.path().join("indices/5.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_files_map_to_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path());
        assert!(matches!(
            store.index_for_market(1).await,
            Err(StoreError::MarketNotFound(1))
        ));
        assert!(matches!(store.load(9).await, Err(StoreError::IndexNotFound(9))));
    }
}
