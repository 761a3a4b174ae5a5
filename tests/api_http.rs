// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use attention_index::api::{self, AppState};
use attention_index::model::{
    AttentionIndex, EntityKind, NewsSourceState, SourceQuery, SourceState, SourceType,
};
use attention_index::sources::{scripted::ScriptedAdapter, AdapterRegistry, Capabilities};
use attention_index::store::MemoryStore;
use attention_index::{AttentionService, Orchestrator};

const BODY_LIMIT: usize = 1024 * 1024;

fn test_router() -> Router {
    let store = Arc::new(MemoryStore::new());
    let q = SourceQuery {
        query: Some("attention".into()),
        ..Default::default()
    };
    store.insert(
        1,
        AttentionIndex::new(5, EntityKind::Song)
            .with_source("deezer", SourceState::new(SourceType::Raw, 60))
            .with_news_source("newsapi", NewsSourceState::new(q, 3600)),
    );

    let now = chrono::Utc::now() - chrono::Duration::minutes(5);
    let news = json!({"status": "ok", "articles": [{
        "url": "https://news.example/charts", "title": "Chart climb", "author": "Desk",
        "source": {"id": null, "name": "Charts Daily"}, "description": "Up ten places.",
        "content": null, "urlToImage": null, "publishedAt": now.to_rfc3339()
    }]});
    let registry = AdapterRegistry::new()
        .with(Arc::new(ScriptedAdapter::new("deezer").with_fallback(250.0)))
        .with(Arc::new(
            ScriptedAdapter::new("newsapi")
                .with_capabilities(Capabilities::NARRATIVE)
                .with_narrative(news),
        ));
    let orch = Arc::new(Orchestrator::new(store, registry));
    api::router(AppState {
        service: AttentionService::new(orch),
    })
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn json_body(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_router();
    let (status, body) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap().trim(), "ok");
}

#[tokio::test]
async fn bad_and_unknown_market_ids() {
    let app = test_router();

    let (status, body) = send(&app, "POST", "/markets/abc/refresh").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["error"].as_str().unwrap().contains("abc"));

    let (status, _) = send(&app, "GET", "/markets/abc/index").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/markets/999/refresh").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/markets/999/narrative").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_then_read_index_narrative_and_summary() {
    let app = test_router();

    let (status, body) = send(&app, "POST", "/markets/1/refresh").await;
    assert_eq!(status, StatusCode::CREATED);
    let report = json_body(&body);
    assert_eq!(report["value"], 250.0);
    assert_eq!(report["narratives"], json!(["newsapi"]));

    let (status, body) = send(&app, "GET", "/markets/1/index?timeframe=24h").await;
    assert_eq!(status, StatusCode::OK);
    let view = json_body(&body);
    assert_eq!(view["timeframe"], "24h");
    assert_eq!(view["series"].as_object().unwrap().len(), 1);
    assert_eq!(view["metrics"]["current"], 250.0);
    assert_eq!(view["metrics"]["changePercent"], 0.0);

    // Unknown timeframe degrades to 3h; log scale only changes values.
    let (status, body) = send(&app, "GET", "/markets/1/index?timeframe=1y&scale=log").await;
    assert_eq!(status, StatusCode::OK);
    let view = json_body(&body);
    assert_eq!(view["timeframe"], "3h");
    let v = view["series"].as_object().unwrap().values().next().unwrap()["value"]
        .as_f64()
        .unwrap();
    assert!((v - 251f64.ln()).abs() < 1e-9);
    assert_eq!(view["metrics"]["current"], 250.0);

    let (status, body) = send(&app, "GET", "/markets/1/narrative").await;
    assert_eq!(status, StatusCode::OK);
    let feed = json_body(&body);
    assert_eq!(feed["timeframe"], "24h");
    assert_eq!(feed["articles"].as_array().unwrap().len(), 1);
    assert_eq!(feed["articles"][0]["type"], "article");
    assert_eq!(feed["articles"][0]["has_title"], true);
    assert!(feed["articles"][0]["metrics"].is_null());
    assert!(feed["posts"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, "GET", "/markets/1/summary").await;
    assert_eq!(status, StatusCode::OK);
    let summary = json_body(&body);
    assert_eq!(summary["current_price"], 250.0);
    assert_eq!(summary["index_id"], 5);
    assert!(summary["time_until_next_update"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn lists_markets_before_and_after_a_refresh() {
    let app = test_router();

    let (status, body) = send(&app, "GET", "/markets").await;
    assert_eq!(status, StatusCode::OK);
    let list = json_body(&body);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["market_id"], 1);
    assert_eq!(list[0]["index_id"], 5);
    assert_eq!(list[0]["current_price"], 0.0);
    assert!(list[0]["last_update"].is_null());
    assert_eq!(list[0]["sources"], json!(["deezer"]));

    let (status, _) = send(&app, "POST", "/markets/1/refresh").await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&app, "GET", "/markets").await;
    let list = json_body(&body);
    assert_eq!(list[0]["current_price"], 250.0);
    assert!(list[0]["last_update"].is_string());
    assert!(list[0]["update_frequency"].is_u64());
}
