// src/service.rs
//! Façade used by the HTTP layer and the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RefreshError, StoreError};
use crate::model::{AttentionIndex, IndexId, MarketId};
use crate::narrative::{build_feed, NarrativeResponse, ParserRegistry};
use crate::orchestrator::{Orchestrator, TickReport};
use crate::query::{query_index, IndexView, Timeframe};
use crate::store::IndexStore;

/// Display summary of a market's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: MarketId,
    pub index_id: IndexId,
    pub current_price: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub update_frequency: u64,
    pub time_until_next_update: u64,
    pub sources: Vec<String>,
    pub track_news: bool,
}

#[derive(Clone)]
pub struct AttentionService {
    orchestrator: Arc<Orchestrator>,
    parsers: ParserRegistry,
    default_window: String,
}

impl AttentionService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            parsers: ParserRegistry::default(),
            default_window: "24h".to_string(),
        }
    }

    /// Window used by `get_narrative` when the caller passes none.
    pub fn with_default_window(mut self, window: impl Into<String>) -> Self {
        self.default_window = window.into();
        self
    }

    fn store(&self) -> &Arc<dyn IndexStore> {
        self.orchestrator.store()
    }

    pub async fn refresh(&self, market_id: MarketId) -> Result<TickReport, RefreshError> {
        self.orchestrator.refresh(market_id).await
    }

    pub async fn get_index(
        &self,
        market_id: MarketId,
        timeframe: Timeframe,
        log_scale: bool,
    ) -> Result<IndexView, StoreError> {
        self.get_index_at(market_id, timeframe, log_scale, Utc::now()).await
    }

    pub async fn get_index_at(
        &self,
        market_id: MarketId,
        timeframe: Timeframe,
        log_scale: bool,
        now: DateTime<Utc>,
    ) -> Result<IndexView, StoreError> {
        let id = self.store().index_for_market(market_id).await?;
        let index = self.store().load(id).await?;
        Ok(query_index(&index, timeframe, now, log_scale))
    }

    pub async fn get_narrative(
        &self,
        market_id: MarketId,
        timeframe: Option<&str>,
    ) -> Result<NarrativeResponse, StoreError> {
        self.get_narrative_at(market_id, timeframe, Utc::now()).await
    }

    pub async fn get_narrative_at(
        &self,
        market_id: MarketId,
        timeframe: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<NarrativeResponse, StoreError> {
        let id = self.store().index_for_market(market_id).await?;
        let index = self.store().load(id).await?;
        let tf = timeframe
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(self.default_window.as_str());
        Ok(build_feed(&index, &self.parsers, tf, now))
    }

    pub async fn summary(&self, market_id: MarketId) -> Result<MarketSummary, StoreError> {
        let id = self.store().index_for_market(market_id).await?;
        let index = self.store().load(id).await?;
        Ok(summarize(market_id, &index, Utc::now()))
    }

    pub async fn list_markets(&self) -> Result<Vec<MarketSummary>, StoreError> {
        self.list_markets_at(Utc::now()).await
    }

    /// Every market with a readable index, in market id order.
    pub async fn list_markets_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketSummary>, StoreError> {
        let mut out = Vec::new();
        for (market_id, index_id) in self.store().markets().await? {
            match self.store().load(index_id).await {
                Ok(idx) => out.push(summarize(market_id, &idx, now)),
                Err(e) => {
                    tracing::warn!(target: "api", error = %e, market_id, index_id, "index unreadable; market left out");
                }
            }
        }
        Ok(out)
    }

    /// Markets whose index is due for a scheduled refresh at `now`.
    pub async fn due_markets(&self, now: DateTime<Utc>) -> Result<Vec<MarketId>, StoreError> {
        let mut due = Vec::new();
        for (market_id, index_id) in self.store().markets().await? {
            match self.store().load(index_id).await {
                Ok(idx) if idx.time_until_next_update(now) == 0 => due.push(market_id),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "scheduler", error = %e, market_id, index_id, "index unreadable");
                }
            }
        }
        Ok(due)
    }
}

fn summarize(market_id: MarketId, index: &AttentionIndex, now: DateTime<Utc>) -> MarketSummary {
    MarketSummary {
        market_id,
        index_id: index.id,
        current_price: index.current_price,
        last_update: index.last_update,
        update_frequency: index.update_frequency,
        time_until_next_update: index.time_until_next_update(now),
        sources: index.sources.keys().cloned().collect(),
        track_news: index.track_news,
    }
}
