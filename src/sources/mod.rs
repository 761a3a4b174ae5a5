// src/sources/mod.rs
//! Source adapters: one per external API, behind a common capability-based trait.
//! The orchestrator only sees [`SourceAdapter`] through the [`AdapterRegistry`].

pub mod deezer;
pub mod lastfm;
pub mod newsapi;
pub mod reddit;
pub mod scripted;
pub mod spotify;
pub mod x;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::FetchError;
use crate::model::{EntityKind, IndexId, SourceQuery};

/// What an adapter can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Produces a numeric index contribution.
    pub metric: bool,
    /// Produces raw narrative payloads (posts/articles).
    pub narrative: bool,
}

impl Capabilities {
    pub const METRIC: Self = Self {
        metric: true,
        narrative: false,
    };
    pub const NARRATIVE: Self = Self {
        metric: false,
        narrative: true,
    };
    pub const BOTH: Self = Self {
        metric: true,
        narrative: true,
    };
}

/// Everything an adapter needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub index_id: IndexId,
    pub entity: EntityKind,
    pub query: &'a SourceQuery,
}

impl<'a> FetchRequest<'a> {
    pub fn new(index_id: IndexId, entity: EntityKind, query: &'a SourceQuery) -> Self {
        Self {
            index_id,
            entity,
            query,
        }
    }

    pub fn id(&self) -> Result<&'a str, FetchError> {
        non_empty(self.query.id.as_deref()).ok_or(FetchError::MissingParam("id"))
    }

    pub fn search(&self) -> Result<&'a str, FetchError> {
        non_empty(self.query.query.as_deref()).ok_or(FetchError::MissingParam("query"))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Current metric value for the index contribution.
    async fn fetch_metric(&self, _req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        Err(FetchError::Unsupported {
            source_name: self.name().to_string(),
            capability: "metric",
        })
    }

    /// Raw narrative payload covering the last `window`. Opaque until standardized.
    async fn fetch_narrative(
        &self,
        _req: &FetchRequest<'_>,
        _window: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        Err(FetchError::Unsupported {
            source_name: self.name().to_string(),
            capability: "narrative",
        })
    }
}

/// Source name → adapter. New sources plug in here without touching the orchestrator.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.adapters.keys().cloned().collect();
        v.sort();
        v
    }

    /// All HTTP adapters, credentials read from the environment.
    pub fn from_env(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = ?e, "http client builder failed; using defaults");
                reqwest::Client::new()
            });

        Self::new()
            .with(Arc::new(youtube::YouTubeAdapter::from_env(client.clone())))
            .with(Arc::new(lastfm::LastFmAdapter::from_env(client.clone())))
            .with(Arc::new(deezer::DeezerAdapter::new(client.clone())))
            .with(Arc::new(spotify::SpotifyAdapter::from_env(client.clone())))
            .with(Arc::new(x::XAdapter::from_env(client.clone())))
            .with(Arc::new(reddit::RedditAdapter::from_env(client.clone())))
            .with(Arc::new(newsapi::NewsApiAdapter::from_env(client)))
    }
}

/// Send, map auth/status failures, decode JSON.
pub(crate) async fn send_json<T: DeserializeOwned>(
    rb: reqwest::RequestBuilder,
    source_name: &'static str,
) -> Result<T, FetchError> {
    let resp = rb.send().await?;
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(FetchError::Auth(source_name));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(source = source_name, status = status.as_u16(), body = %truncate(&body, 200), "api error");
        return Err(FetchError::Status {
            source_name,
            status: status.as_u16(),
        });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed(format!("{source_name}: {e}")))
}

/// Bearer token held by an adapter until shortly before it expires.
#[derive(Default)]
pub(crate) struct TokenCache {
    inner: tokio::sync::Mutex<Option<(String, std::time::Instant)>>,
}

impl TokenCache {
    const SAFETY_MARGIN: Duration = Duration::from_secs(60);

    /// Return the cached token, or call `refresh` (→ token, lifetime) and cache its result.
    pub(crate) async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(String, Duration), FetchError>>,
    {
        let mut guard = self.inner.lock().await;
        if let Some((token, expires_at)) = guard.as_ref() {
            if std::time::Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }
        let (token, lifetime) = refresh().await?;
        let ttl = lifetime.saturating_sub(Self::SAFETY_MARGIN);
        *guard = Some((token.clone(), std::time::Instant::now() + ttl));
        Ok(token)
    }

    pub(crate) async fn clear(&self) {
        *self.inner.lock().await = None;
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub(crate) fn env_credential(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse counters that some APIs ship as strings ("12345").
pub(crate) fn parse_count(raw: &str, what: &str) -> Result<f64, FetchError> {
    raw.trim()
        .parse::<u64>()
        .map(|n| n as f64)
        .map_err(|_| FetchError::Malformed(format!("{what} is not a count: {raw:?}")))
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::scripted::ScriptedAdapter;

    #[test]
    fn registry_lookup_by_name() {
        let reg = AdapterRegistry::new()
            .with(Arc::new(ScriptedAdapter::new("youtube")))
            .with(Arc::new(ScriptedAdapter::new("x")));
        assert!(reg.get("youtube").is_some());
        assert!(reg.get("tiktok").is_none());
        assert_eq!(reg.names(), vec!["x".to_string(), "youtube".to_string()]);
    }

    #[test]
    fn request_requires_non_blank_params() {
        let q = SourceQuery {
            id: Some("  ".into()),
            query: Some("Chappell Roan".into()),
            ..Default::default()
        };
        let req = FetchRequest::new(1, EntityKind::Song, &q);
        assert!(matches!(req.id(), Err(FetchError::MissingParam("id"))));
        assert_eq!(req.search().unwrap(), "Chappell Roan");
    }

    #[test]
    fn parse_count_accepts_string_numbers() {
        assert_eq!(parse_count("1024", "viewCount").unwrap(), 1024.0);
        assert!(parse_count("n/a", "viewCount").is_err());
    }

    #[tokio::test]
    async fn token_cache_refreshes_once_until_cleared() {
        let cache = TokenCache::default();
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let refresh = || async {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(("tok".to_string(), Duration::from_secs(3600)))
        };
        assert_eq!(cache.get_or_refresh(refresh).await.unwrap(), "tok");
        assert_eq!(cache.get_or_refresh(refresh).await.unwrap(), "tok");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        cache.clear().await;
        cache.get_or_refresh(refresh).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn default_methods_report_unsupported() {
        struct Bare;
        #[async_trait]
        impl SourceAdapter for Bare {
            fn name(&self) -> &str {
                "bare"
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities::METRIC
            }
        }
        let q = SourceQuery::default();
        let err = Bare
            .fetch_narrative(&FetchRequest::new(1, EntityKind::Song, &q), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unsupported { .. }));
    }
}
