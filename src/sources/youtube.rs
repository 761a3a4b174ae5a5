// src/sources/youtube.rs
use async_trait::async_trait;
use serde::Deserialize;

use super::{env_credential, parse_count, send_json, Capabilities, FetchRequest, SourceAdapter};
use crate::error::FetchError;

const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

#[derive(Debug, Deserialize)]
struct VideoList {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}

/// Cumulative video view count.
pub struct YouTubeAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl YouTubeAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env_credential("YOUTUBE_API_KEY"),
        }
    }

    fn parse_view_count(body: VideoList) -> Result<f64, FetchError> {
        let video = body
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Malformed("video not found".into()))?;
        let raw = video
            .statistics
            .and_then(|s| s.view_count)
            .ok_or_else(|| FetchError::Malformed("video statistics missing viewCount".into()))?;
        parse_count(&raw, "viewCount")
    }
}

#[async_trait]
impl SourceAdapter for YouTubeAdapter {
    fn name(&self) -> &str {
        "youtube"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::METRIC
    }

    async fn fetch_metric(&self, req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::Credentials("YOUTUBE_API_KEY"))?;
        let id = req.id()?;
        let rb = self
            .client
            .get(VIDEOS_URL)
            .query(&[("part", "statistics"), ("id", id), ("key", key)]);
        let body: VideoList = send_json(rb, "youtube").await?;
        Self::parse_view_count(body)
    }
}
