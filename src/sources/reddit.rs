// src/sources/reddit.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    env_credential, send_json, truncate, Capabilities, FetchRequest, SourceAdapter, TokenCache,
    TokenResponse,
};
use crate::error::FetchError;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const SEARCH_URL: &str = "https://oauth.reddit.com/search";
const MAX_PAGES: usize = 20;
const NARRATIVE_POSTS: usize = 10;
const BODY_CHARS: usize = 250;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    selftext: String,
}

/// Narrative payload shape produced by this adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditNarrative {
    pub posts: Vec<RedditNarrativePost>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditNarrativePost {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub comments: u64,
    pub created_utc: f64,
    pub author: String,
    pub body: String,
}

/// Engagement (posts + comments) in the past hour; narrative from the hottest posts.
pub struct RedditAdapter {
    client: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
    token: TokenCache,
}

impl RedditAdapter {
    pub fn from_env(client: reqwest::Client) -> Self {
        Self {
            client,
            client_id: env_credential("REDDIT_CLIENT_ID"),
            client_secret: env_credential("REDDIT_CLIENT_SECRET"),
            username: env_credential("REDDIT_USERNAME"),
            password: env_credential("REDDIT_PASSWORD"),
            token: TokenCache::default(),
        }
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        let (Some(id), Some(secret), Some(user), Some(pass)) = (
            self.client_id.as_deref(),
            self.client_secret.as_deref(),
            self.username.as_deref(),
            self.password.as_deref(),
        ) else {
            return Err(FetchError::Credentials("REDDIT_CLIENT_ID/SECRET/USERNAME/PASSWORD"));
        };
        self.token
            .get_or_refresh(|| async move {
                tracing::debug!(source = "reddit", "requesting password-grant token");
                let rb = self
                    .client
                    .post(TOKEN_URL)
                    .basic_auth(id, Some(secret))
                    .form(&[
                        ("grant_type", "password"),
                        ("username", user),
                        ("password", pass),
                    ]);
                let t: TokenResponse = send_json(rb, "reddit").await?;
                Ok((t.access_token, Duration::from_secs(t.expires_in)))
            })
            .await
    }

    async fn search_page(
        &self,
        token: &str,
        query: &str,
        period: &str,
        after: Option<&str>,
    ) -> Result<ListingData, FetchError> {
        let mut params = vec![
            ("q", query),
            ("sort", "hot"),
            ("limit", "100"),
            ("t", period),
        ];
        if let Some(a) = after {
            params.push(("after", a));
        }
        let rb = self.client.get(SEARCH_URL).bearer_auth(token).query(&params);
        let listing: Listing = match send_json(rb, "reddit").await {
            Err(e @ FetchError::Auth(_)) => {
                self.token.clear().await;
                return Err(e);
            }
            other => other?,
        };
        Ok(listing.data)
    }

    fn engagement(children: &[Child]) -> (u64, u64) {
        let posts = children.len() as u64;
        let comments = children.iter().map(|c| c.data.num_comments).sum();
        (posts, comments)
    }

    fn narrative_from(children: Vec<Child>) -> RedditNarrative {
        let posts = children
            .into_iter()
            .take(NARRATIVE_POSTS)
            .map(|c| {
                let p = c.data;
                RedditNarrativePost {
                    id: p.id,
                    title: p.title,
                    url: format!("https://reddit.com{}", p.permalink),
                    score: p.score,
                    comments: p.num_comments,
                    created_utc: p.created_utc,
                    author: p.author,
                    body: truncate(&p.selftext, BODY_CHARS),
                }
            })
            .collect();
        RedditNarrative { posts }
    }

    /// Reddit search buckets: hour, day, week, month.
    fn period_for(window: Duration) -> &'static str {
        match window.as_secs() {
            0..=3600 => "hour",
            3601..=86_400 => "day",
            86_401..=604_800 => "week",
            _ => "month",
        }
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn name(&self) -> &str {
        "reddit"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::BOTH
    }

    async fn fetch_metric(&self, req: &FetchRequest<'_>) -> Result<f64, FetchError> {
        let query = req.search()?;
        let token = self.access_token().await?;

        let (mut posts, mut comments) = (0u64, 0u64);
        let mut after: Option<String> = None;
        for page in 0..MAX_PAGES {
            let data = self.search_page(&token, query, "hour", after.as_deref()).await?;
            let (p, c) = Self::engagement(&data.children);
            posts += p;
            comments += c;
            after = data.after;
            if after.is_none() {
                break;
            }
            if page + 1 == MAX_PAGES {
                tracing::debug!(source = "reddit", "pagination capped at {MAX_PAGES} pages");
            }
        }
        Ok((posts + comments) as f64)
    }

    async fn fetch_narrative(
        &self,
        req: &FetchRequest<'_>,
        window: Duration,
    ) -> Result<serde_json::Value, FetchError> {
        let query = req.search()?;
        let token = self.access_token().await?;
        let data = self
            .search_page(&token, query, Self::period_for(window), None)
            .await?;
        serde_json::to_value(Self::narrative_from(data.children))
            .map_err(|e| FetchError::Malformed(format!("reddit: {e}")))
    }
}
