// src/sources/lastfm.rs
use async_trait::async_trait;
use serde::Deserialize;

use super::{env_credential, parse_count, send_json, Capabilities, FetchRequest, SourceAdapter};
use crate::error::FetchError;

const API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

#[derive(Debug, Deserialize)]
struct TrackInfo {
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct Track {
    playcount: Option<String>,
}

/// Cumulative scrobble count for `artist` + `track`.
pub struct LastFmAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl LastFmAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            api_key: env_credential("LASTFM_API_KEY"),
        }
    }

    fn parse_playcount(body: TrackInfo) -> Result<f64, FetchError> {
        let raw = body
            .track
            .and_then(|t| t.playcount)
            .ok_or_else(|| FetchError::Malformed("track or playcount not available".into()))?;
        parse_count(&raw, "playcount")
    }
}

#[async_trait]
impl SourceAdapter for LastFmAdapter {
    fn name(&self) -> &str {
        "last.fm"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::METRIC
    }

    async fn fetch_metric(&self, req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::Credentials("LASTFM_API_KEY"))?;
        let artist = req
            .query
            .artist
            .as_deref()
            .ok_or(FetchError::MissingParam("artist"))?;
        let track = req
            .query
            .track
            .as_deref()
            .ok_or(FetchError::MissingParam("track"))?;
        let rb = self.client.get(API_URL).query(&[
            ("method", "track.getInfo"),
            ("api_key", key),
            ("artist", artist),
            ("track", track),
            ("format", "json"),
        ]);
        let body: TrackInfo = send_json(rb, "last.fm").await?;
        Self::parse_playcount(body)
    }
}
