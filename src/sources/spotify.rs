// src/sources/spotify.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    env_credential, send_json, Capabilities, FetchRequest, SourceAdapter, TokenCache,
    TokenResponse,
};
use crate::error::FetchError;
use crate::model::EntityKind;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Deserialize)]
struct Popularity {
    popularity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    followers: Option<Followers>,
}

#[derive(Debug, Deserialize)]
struct Followers {
    total: Option<f64>,
}

/// Songs and albums report `popularity` (0..100 gauge); artists report follower count.
pub struct SpotifyAdapter {
    client: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    token: TokenCache,
}

impl SpotifyAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            client_id: env_credential("SPOTIFY_CLIENT_ID"),
            client_secret: env_credential("SPOTIFY_CLIENT_SECRET"),
            token: TokenCache::default(),
        }
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        let (Some(id), Some(secret)) = (self.client_id.as_deref(), self.client_secret.as_deref())
        else {
            return Err(FetchError::Credentials("SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET"));
        };
        self.token
            .get_or_refresh(|| async move {
                tracing::debug!(source = "spotify", "requesting client-credentials token");
                let rb = self
                    .client
                    .post(TOKEN_URL)
                    .basic_auth(id, Some(secret))
                    .form(&[("grant_type", "client_credentials")]);
                let t: TokenResponse = send_json(rb, "spotify").await?;
                Ok((t.access_token, Duration::from_secs(t.expires_in)))
            })
            .await
    }

    fn endpoint(entity: EntityKind, id: &str) -> String {
        match entity {
            EntityKind::Song => format!("{API_BASE}/tracks/{id}"),
            EntityKind::Artist => format!("{API_BASE}/artists/{id}"),
            EntityKind::Album => format!("{API_BASE}/albums/{id}"),
        }
    }

    fn parse_metric(entity: EntityKind, body: serde_json::Value) -> Result<f64, FetchError> {
        let malformed = |e: serde_json::Error| FetchError::Malformed(format!("spotify: {e}"));
        match entity {
            EntityKind::Artist => {
                let a: Artist = serde_json::from_value(body).map_err(malformed)?;
                a.followers
                    .and_then(|f| f.total)
                    .ok_or_else(|| FetchError::Malformed("followers not available".into()))
            }
            EntityKind::Song | EntityKind::Album => {
                let p: Popularity = serde_json::from_value(body).map_err(malformed)?;
                p.popularity
                    .ok_or_else(|| FetchError::Malformed("popularity not available".into()))
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for SpotifyAdapter {
    fn name(&self) -> &str {
        "spotify"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::METRIC
    }

    async fn fetch_metric(&self, req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        let id = req.id()?;
        let token = self.access_token().await?;
        let rb = self
            .client
            .get(Self::endpoint(req.entity, id))
            .bearer_auth(token);
        match send_json::<serde_json::Value>(rb, "spotify").await {
            Ok(body) => Self::parse_metric(req.entity, body),
            Err(e @ FetchError::Auth(_)) => {
                // Revoked early; next call fetches a fresh token.
                self.token.clear().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
