// src/sources/deezer.rs
use async_trait::async_trait;
use serde::Deserialize;

use super::{send_json, Capabilities, FetchRequest, SourceAdapter};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct TrackData {
    rank: Option<f64>,
}

/// Track rank (public API, no credentials).
pub struct DeezerAdapter {
    client: reqwest::Client,
}

impl DeezerAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn parse_rank(body: TrackData) -> Result<f64, FetchError> {
        body.rank
            .ok_or_else(|| FetchError::Malformed("rank not available for this track".into()))
    }
}

#[async_trait]
impl SourceAdapter for DeezerAdapter {
    fn name(&self) -> &str {
        "deezer"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::METRIC
    }

    async fn fetch_metric(&self, req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        let id = req.id()?;
        let url = format!("https://api.deezer.com/track/{id}");
        let body: TrackData = send_json(self.client.get(url), "deezer").await?;
        Self::parse_rank(body)
    }
}
