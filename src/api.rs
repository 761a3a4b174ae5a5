// src/api.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::ApiError;
use crate::model::MarketId;
use crate::narrative::NarrativeResponse;
use crate::orchestrator::TickReport;
use crate::query::{IndexView, Timeframe};
use crate::service::{AttentionService, MarketSummary};

#[derive(Clone)]
pub struct AppState {
    pub service: AttentionService,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/markets", get(list_markets))
        .route("/markets/{market_id}/refresh", post(refresh))
        .route("/markets/{market_id}/index", get(get_index))
        .route("/markets/{market_id}/narrative", get(get_narrative))
        .route("/markets/{market_id}/summary", get(summary))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct IndexParams {
    timeframe: Option<String>,
    /// `log` selects the ln(v + 1) presentation.
    scale: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NarrativeParams {
    timeframe: Option<String>,
}

fn parse_market_id(raw: &str) -> Result<MarketId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid market id `{raw}`")))
}

async fn list_markets(
    State(state): State<AppState>,
) -> Result<Json<Vec<MarketSummary>>, ApiError> {
    Ok(Json(state.service.list_markets().await?))
}

async fn refresh(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<(StatusCode, Json<TickReport>), ApiError> {
    let market_id = parse_market_id(&market_id)?;
    let report = state.service.refresh(market_id).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_index(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
    Query(q): Query<IndexParams>,
) -> Result<Json<IndexView>, ApiError> {
    let market_id = parse_market_id(&market_id)?;
    let timeframe = Timeframe::parse(q.timeframe.as_deref());
    let log_scale = q
        .scale
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("log"));
    let view = state.service.get_index(market_id, timeframe, log_scale).await?;
    Ok(Json(view))
}

async fn get_narrative(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
    Query(q): Query<NarrativeParams>,
) -> Result<Json<NarrativeResponse>, ApiError> {
    let market_id = parse_market_id(&market_id)?;
    let feed = state
        .service
        .get_narrative(market_id, q.timeframe.as_deref())
        .await?;
    Ok(Json(feed))
}

async fn summary(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<MarketSummary>, ApiError> {
    let market_id = parse_market_id(&market_id)?;
    Ok(Json(state.service.summary(market_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_id_must_be_numeric() {
        assert_eq!(parse_market_id(" 42 ").unwrap(), 42);
        assert!(matches!(parse_market_id("abc"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_market_id("-1"), Err(ApiError::BadRequest(_))));
    }
}
