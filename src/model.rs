//! # Data model
//! Strongly-typed attention index state. Serialized as JSON only at the
//! store boundary; internal logic never touches untyped maps, except for the
//! opaque narrative payloads which stay raw until standardization.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type IndexId = u64;
pub type MarketId = u64;

/// Appended once per tick, keyed by tick timestamp.
pub type Series = BTreeMap<DateTime<Utc>, SeriesEntry>;
/// Raw narrative payloads per source, keyed by tick timestamp.
pub type NewsSeries = BTreeMap<DateTime<Utc>, NewsEntry>;
pub type NewsEntry = BTreeMap<String, serde_json::Value>;

/// What kind of cultural entity the market tracks. Some adapters pick a
/// different metric per kind (Spotify: popularity for songs, followers for artists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Song,
    Artist,
    Album,
}

/// How raw readings become a comparable base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Gauge: the reading is the base value.
    #[default]
    Raw,
    /// Signed delta since the previous reading.
    DifferenceRaw,
    /// Absolute delta since the previous reading.
    DifferenceMagnitude,
}

/// Last raw reading and last positive delta, carried across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PrevReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<f64>,
}

/// Adapter query parameters. Which fields are required depends on the source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceQuery {
    /// Native id (YouTube video id, Spotify/Deezer track id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-text search query (X, Reddit, NewsAPI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

/// Per-source normalization state embedded in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(rename = "type", default)]
    pub kind: SourceType,
    #[serde(default)]
    pub has_valid_data: bool,
    #[serde(default)]
    pub prev: PrevReading,
    #[serde(default)]
    pub rebase_offset: f64,
    /// Polling cadence in seconds.
    #[serde(default = "default_frequency_secs")]
    pub frequency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub query: SourceQuery,
    /// Display metadata only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

fn default_frequency_secs() -> u64 {
    3600
}

impl SourceState {
    pub fn new(kind: SourceType, frequency: u64) -> Self {
        Self {
            kind,
            has_valid_data: false,
            prev: PrevReading::default(),
            rebase_offset: 0.0,
            frequency,
            last_fetched_at: None,
            query: SourceQuery::default(),
            metric: None,
            picture: None,
        }
    }

    pub fn with_query(mut self, query: SourceQuery) -> Self {
        self.query = query;
        self
    }

    /// Due when never fetched, or when `frequency` seconds have elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        is_due(self.last_fetched_at, self.frequency, now)
    }

    /// Drop all continuity state; the next valid observation starts a new rebase episode.
    pub fn invalidate(&mut self) {
        self.has_valid_data = false;
        self.prev = PrevReading::default();
        self.rebase_offset = 0.0;
    }
}

/// Narrative polling state for one news-capable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSourceState {
    #[serde(default)]
    pub query: SourceQuery,
    /// Cadence in seconds; also the lookback window handed to the adapter.
    #[serde(default = "default_frequency_secs")]
    pub frequency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl NewsSourceState {
    pub fn new(query: SourceQuery, frequency: u64) -> Self {
        Self {
            query,
            frequency,
            last_fetched_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        is_due(self.last_fetched_at, self.frequency, now)
    }
}

/// `at + secs`, or `None` when the sum falls outside chrono's range.
fn offset_by(at: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let delta = Duration::try_seconds(i64::try_from(secs).ok()?)?;
    at.checked_add_signed(delta)
}

// A frequency too large to represent is never due again.
fn is_due(last: Option<DateTime<Utc>>, frequency: u64, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(at) => offset_by(at, frequency).is_some_and(|next| now >= next),
    }
}

/// One tick of the index: the aggregate plus each source's rebased contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub value: f64,
    /// Rebased contribution per source (`base + rebase_offset`).
    #[serde(default)]
    pub sources: BTreeMap<String, f64>,
    /// Raw readings actually fetched this tick.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw: BTreeMap<String, f64>,
}

impl SeriesEntry {
    pub fn value_only(value: f64) -> Self {
        Self {
            value,
            sources: BTreeMap::new(),
            raw: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionIndex {
    pub id: IndexId,
    #[serde(default)]
    pub entity: EntityKind,
    /// Configured sources and their normalization state.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceState>,
    #[serde(default)]
    pub series: Series,
    #[serde(default)]
    pub track_news: bool,
    #[serde(default)]
    pub news_sources: BTreeMap<String, NewsSourceState>,
    #[serde(default)]
    pub news_series: NewsSeries,
    /// Display cache of the series tail, rounded to 2 decimals.
    #[serde(default)]
    pub current_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Whole-index refresh cadence in seconds (used by the scheduler).
    #[serde(default = "default_frequency_secs")]
    pub update_frequency: u64,
}

impl AttentionIndex {
    pub fn new(id: IndexId, entity: EntityKind) -> Self {
        Self {
            id,
            entity,
            sources: BTreeMap::new(),
            series: BTreeMap::new(),
            track_news: false,
            news_sources: BTreeMap::new(),
            news_series: BTreeMap::new(),
            current_price: 0.0,
            last_update: None,
            update_frequency: default_frequency_secs(),
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, state: SourceState) -> Self {
        self.sources.insert(name.into(), state);
        self
    }

    pub fn with_news_source(mut self, name: impl Into<String>, state: NewsSourceState) -> Self {
        self.track_news = true;
        self.news_sources.insert(name.into(), state);
        self
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.series.keys().next_back().copied()
    }

    /// Seconds until the scheduler considers this index due again.
    pub fn time_until_next_update(&self, now: DateTime<Utc>) -> u64 {
        match self.last_update {
            None => 0,
            Some(at) => match offset_by(at, self.update_frequency) {
                Some(next) => (next - now).num_seconds().max(0) as u64,
                None => u64::MAX,
            },
        }
    }
}

/// Article or social post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeKind {
    Article,
    Post,
}

/// Standardized form of a post or an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeItem {
    /// `<source>-<native id or url>`; used for de-duplication.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NarrativeKind,
    pub time: DateTime<Utc>,
    pub author: String,
    pub source: String,
    pub has_title: bool,
    pub title: Option<String>,
    pub body: String,
    pub url: String,
    pub metrics: Option<serde_json::Value>,
    pub picture: Option<String>,
}
