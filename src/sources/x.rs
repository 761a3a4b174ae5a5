// src/sources/x.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use super::{env_credential, send_json, Capabilities, FetchRequest, SourceAdapter};
use crate::error::FetchError;

const COUNTS_URL: &str = "https://api.x.com/2/tweets/counts/recent";
const SEARCH_URL: &str = "https://api.x.com/2/tweets/search/recent";
/// The recent endpoints reject an `end_time` too close to now.
const END_LAG_SECS: i64 = 10;

#[derive(Debug, Deserialize)]
struct Counts {
    meta: Option<CountsMeta>,
}

#[derive(Debug, Deserialize)]
struct CountsMeta {
    total_tweet_count: Option<f64>,
}

/// Tweet volume over the last hour; narrative from recent search.
pub struct XAdapter {
    client: reqwest::Client,
    bearer: Option<String>,
}

impl XAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            bearer: env_credential("TWITTER_BEARER_TOKEN"),
        }
    }

    fn bearer(&self) -> Result<&str, FetchError> {
        self.bearer
            .as_deref()
            .ok_or(FetchError::Credentials("TWITTER_BEARER_TOKEN"))
    }

    fn parse_total(body: Counts) -> Result<f64, FetchError> {
        body.meta
            .and_then(|m| m.total_tweet_count)
            .ok_or_else(|| FetchError::Malformed("tweet count data not available".into()))
    }

    /// `(start_time, end_time)` covering `window`, ending slightly in the past.
    fn time_range(window: Duration) -> (String, String) {
        let end = Utc::now() - chrono::Duration::seconds(END_LAG_SECS);
        let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1));
        let start = end.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
        (
            start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

#[async_trait]
impl SourceAdapter for XAdapter {
    fn name(&self) -> &str {
        "x"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BOTH
    }

    async fn fetch_metric(&self, req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        let bearer = self.bearer()?;
        let query = req.search()?;
        let (start, end) = Self::time_range(Duration::from_secs(3600));
        let rb = self
            .client
            .get(COUNTS_URL)
            .bearer_auth(bearer)
            .query(&[
                ("granularity", "hour"),
                ("query", query),
                ("start_time", start.as_str()),
                ("end_time", end.as_str()),
            ]);
        let body: Counts = send_json(rb, "x").await?;
        Self::parse_total(body)
    }

    async fn fetch_narrative(
        &self,
        req: &FetchRequest<'_>,
        window: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        let bearer = self.bearer()?;
        let query = req.search()?;
        let (start, end) = Self::time_range(window);
        let rb = self
            .client
            .get(SEARCH_URL)
            .bearer_auth(bearer)
            .query(&[
                ("query", query),
                ("start_time", start.as_str()),
                ("end_time", end.as_str()),
                ("max_results", "10"),
                ("sort_order", "relevancy"),
                ("tweet.fields", "created_at,public_metrics,author_id"),
                ("expansions", "author_id"),
                ("user.fields", "username,profile_image_url"),
            ]);
        send_json(rb, "x").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tweet_count_from_meta() {
        let body: Counts = serde_json::from_str(
            r#"{"data":[{"end":"2025-05-01T12:00:00.000Z","tweet_count":812}],"meta":{"total_tweet_count":812}}"#,
        )
        .unwrap();
        assert_eq!(XAdapter::parse_total(body).unwrap(), 812.0);
    }

    #[test]
    fn time_range_spans_window() {
        let (start, end) = XAdapter::time_range(Duration::from_secs(1800));
        let s = chrono::DateTime::parse_from_rfc3339(&start).unwrap();
        let e = chrono::DateTime::parse_from_rfc3339(&end).unwrap();
        assert_eq!((e - s).num_seconds(), 1800);
    }

    #[test]
    fn time_range_survives_an_enormous_window() {
        let (start, _) = XAdapter::time_range(Duration::from_secs(9_000_000_000_000_000));
        assert!(!start.is_empty());
    }
}
