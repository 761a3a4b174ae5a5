// src/narrative.rs
//! Narrative standardization: turn opaque per-source payloads from `news_series`
//! into [`NarrativeItem`]s, filter them by a lookback window, de-duplicate and
//! split into articles and posts.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::model::{AttentionIndex, NarrativeItem, NarrativeKind, SourceQuery};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Parse `<integer><m|h|d>` ("15m", "24h", "7d"). Anything else is 24h.
pub fn parse_window(raw: &str) -> Duration {
    let s = raw.trim();
    let Some(unit) = s.chars().last() else {
        return DEFAULT_WINDOW;
    };
    let secs_per = match unit {
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return DEFAULT_WINDOW,
    };
    match s[..s.len() - 1].parse::<u64>() {
        Ok(n) if n > 0 => Duration::from_secs(n.saturating_mul(secs_per)),
        _ => DEFAULT_WINDOW,
    }
}

pub type PayloadParser = fn(&Value, &SourceQuery) -> Result<Vec<NarrativeItem>, serde_json::Error>;

/// Source name → payload parser.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, PayloadParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut r = Self {
            parsers: HashMap::new(),
        };
        r.register("x", parse_x);
        r.register("reddit", parse_reddit);
        r.register("newsapi", parse_newsapi);
        r
    }
}

impl ParserRegistry {
    fn register(&mut self, source: &str, parser: PayloadParser) -> &mut Self {
        self.parsers.insert(source.to_string(), parser);
        self
    }

    pub fn get(&self, source: &str) -> Option<PayloadParser> {
        self.parsers.get(source).copied()
    }
}

/// Standardize one raw payload: parse, drop items older than `now - window`,
/// drop repeated ids. Unknown sources and malformed payloads yield nothing.
pub fn standardize(
    parsers: &ParserRegistry,
    source: &str,
    raw: &Value,
    params: &SourceQuery,
    window: Duration,
    now: DateTime<Utc>,
) -> Vec<NarrativeItem> {
    let Some(parse) = parsers.get(source) else {
        tracing::warn!(target: "narrative", source, "no parser registered; payload skipped");
        return Vec::new();
    };
    let items = match parse(raw, params) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(target: "narrative", source, error = %e, "malformed narrative payload");
            return Vec::new();
        }
    };
    let cutoff = cutoff(now, window);
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| i.time >= cutoff)
        .filter(|i| seen.insert(i.id.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeResponse {
    pub articles: Vec<NarrativeItem>,
    pub posts: Vec<NarrativeItem>,
    pub timeframe: String,
}

/// Collect the narrative feed of an index over `timeframe`. Items repeated
/// across stored payloads appear once.
pub fn build_feed(
    index: &AttentionIndex,
    parsers: &ParserRegistry,
    timeframe: &str,
    now: DateTime<Utc>,
) -> NarrativeResponse {
    let window = parse_window(timeframe);
    let from = cutoff(now, window);
    let default_params = SourceQuery::default();

    let mut seen = HashSet::new();
    let (mut articles, mut posts) = (Vec::new(), Vec::new());
    // A payload stored before the cutoff only holds items older than it.
    for (_, entry) in index.news_series.range(from..) {
        for (source, raw) in entry {
            let params = index
                .news_sources
                .get(source)
                .map(|s| &s.query)
                .unwrap_or(&default_params);
            for item in standardize(parsers, source, raw, params, window, now) {
                if !seen.insert(item.id.clone()) {
                    continue;
                }
                match item.kind {
                    NarrativeKind::Article => articles.push(item),
                    NarrativeKind::Post => posts.push(item),
                }
            }
        }
    }
    articles.sort_by(|a, b| b.time.cmp(&a.time));
    posts.sort_by(|a, b| b.time.cmp(&a.time));
    metrics::counter!("narrative_items_total").increment((articles.len() + posts.len()) as u64);
    tracing::debug!(
        target: "narrative",
        index_id = index.id,
        articles = articles.len(),
        posts = posts.len(),
        "feed built"
    );

    NarrativeResponse {
        articles,
        posts,
        timeframe: timeframe.to_string(),
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Short stable id for items that only have a URL.
fn url_digest(url: &str) -> String {
    let hex = format!("{:x}", Sha256::digest(url.as_bytes()));
    hex[..16].to_string()
}

static RE_TAGS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").ok());
static RE_WS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

/// Decode entities, strip tags, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();
    if let Some(re) = RE_TAGS.as_ref() {
        out = re.replace_all(&out, "").into_owned();
    }
    if let Some(re) = RE_WS.as_ref() {
        out = re.replace_all(&out, " ").into_owned();
    }
    out.trim().to_string()
}

// ---- X ----

#[derive(Deserialize)]
struct XSearch {
    #[serde(default)]
    data: Vec<XTweet>,
    #[serde(default)]
    includes: XIncludes,
}

#[derive(Deserialize)]
struct XTweet {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    author_id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    public_metrics: XPublicMetrics,
}

#[derive(Deserialize, Default)]
struct XPublicMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    quote_count: u64,
    #[serde(default)]
    bookmark_count: u64,
    #[serde(default)]
    impression_count: u64,
}

#[derive(Deserialize, Default)]
struct XIncludes {
    #[serde(default)]
    users: Vec<XUser>,
}

#[derive(Deserialize)]
struct XUser {
    id: String,
    #[serde(default)]
    username: String,
    profile_image_url: Option<String>,
}

fn parse_x(raw: &Value, _params: &SourceQuery) -> Result<Vec<NarrativeItem>, serde_json::Error> {
    let search = XSearch::deserialize(raw)?;
    let users: HashMap<&str, &XUser> = search
        .includes
        .users
        .iter()
        .map(|u| (u.id.as_str(), u))
        .collect();

    Ok(search
        .data
        .iter()
        .map(|t| {
            let user = users.get(t.author_id.as_str());
            let author = user.map(|u| u.username.clone()).unwrap_or_default();
            let m = &t.public_metrics;
            NarrativeItem {
                id: format!("x-{}", t.id),
                kind: NarrativeKind::Post,
                time: t.created_at,
                url: format!("https://x.com/{}/status/{}", author, t.id),
                author,
                source: "X".to_string(),
                has_title: false,
                title: None,
                body: clean_text(&t.text),
                metrics: Some(json!({
                    "likes": m.like_count,
                    "retweets": m.retweet_count,
                    "replies": m.reply_count,
                    "quotes": m.quote_count,
                    "bookmarks": m.bookmark_count,
                    "impressions": m.impression_count,
                })),
                picture: user.and_then(|u| u.profile_image_url.clone()),
            }
        })
        .collect())
}

// ---- Reddit ----

fn parse_reddit(raw: &Value, _params: &SourceQuery) -> Result<Vec<NarrativeItem>, serde_json::Error> {
    let payload = crate::sources::reddit::RedditNarrative::deserialize(raw)?;
    Ok(payload
        .posts
        .into_iter()
        .filter_map(|p| {
            let time = Utc.timestamp_opt(p.created_utc as i64, 0).single()?;
            let native = if p.id.is_empty() { url_digest(&p.url) } else { p.id };
            Some(NarrativeItem {
                id: format!("reddit-{native}"),
                kind: NarrativeKind::Post,
                time,
                author: p.author,
                source: "Reddit".to_string(),
                has_title: true,
                title: Some(clean_text(&p.title)),
                body: clean_text(&p.body),
                url: p.url,
                metrics: Some(json!({ "score": p.score, "comments": p.comments })),
                picture: None,
            })
        })
        .collect())
}

// ---- NewsAPI ----

#[derive(Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    url: String,
    title: Option<String>,
    author: Option<String>,
    #[serde(default)]
    source: NewsApiSource,
    description: Option<String>,
    content: Option<String>,
    url_to_image: Option<String>,
    published_at: DateTime<Utc>,
}

#[derive(Deserialize, Default)]
struct NewsApiSource {
    name: Option<String>,
}

fn parse_newsapi(raw: &Value, _params: &SourceQuery) -> Result<Vec<NarrativeItem>, serde_json::Error> {
    let resp = NewsApiResponse::deserialize(raw)?;
    Ok(resp
        .articles
        .into_iter()
        .map(|a| {
            let title = a.title.as_deref().map(clean_text).filter(|t| !t.is_empty());
            let body = a
                .description
                .or(a.content)
                .map(|b| clean_text(&b))
                .unwrap_or_default();
            let publisher = a.source.name.unwrap_or_else(|| "NewsAPI".to_string());
            NarrativeItem {
                id: format!("newsapi-{}", url_digest(&a.url)),
                kind: NarrativeKind::Article,
                time: a.published_at,
                author: a.author.unwrap_or_else(|| publisher.clone()),
                source: publisher,
                has_title: title.is_some(),
                title,
                body,
                url: a.url,
                metrics: None,
                picture: a.url_to_image,
            }
        })
        .collect())
}
