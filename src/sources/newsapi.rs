// src/sources/newsapi.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::{env_credential, send_json, Capabilities, FetchRequest, SourceAdapter};
use crate::error::FetchError;

const EVERYTHING_URL: &str = "https://newsapi.org/v2/everything";

/// Articles only; no index metric.
pub struct NewsApiAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl NewsApiAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env_credential("NEWSAPI_API_KEY"),
        }
    }
}

#[async_trait]
impl SourceAdapter for NewsApiAdapter {
    fn name(&self) -> &str {
        "newsapi"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NARRATIVE
    }

    async fn fetch_narrative(
        &self,
        req: &FetchRequest<'_>,
        window: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::Credentials("NEWSAPI_API_KEY"))?;
        let query = req.search()?;
        let to = Utc::now();
        let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(1));
        let from = to
            .checked_sub_signed(span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let to = to.to_rfc3339_opts(SecondsFormat::Secs, true);
        tracing::debug!(source = "newsapi", %from, %to, query, "fetching articles");

        let rb = self.client.get(EVERYTHING_URL).query(&[
            ("q", query),
            ("from", from.as_str()),
            ("to", to.as_str()),
            ("language", "en"),
            ("sortBy", "popularity"),
            ("pageSize", "5"),
            ("apiKey", key),
        ]);
        send_json(rb, "newsapi").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, SourceQuery};

    #[tokio::test]
    async fn metric_is_unsupported() {
        let a = NewsApiAdapter {
            client: reqwest::Client::new(),
            api_key: Some("k".into()),
        };
        assert!(!a.capabilities().metric);
        let q = SourceQuery::default();
        let err = a
            .fetch_metric(&FetchRequest::new(1, EntityKind::Song, &q))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unsupported { .. }));
    }
}
