//! `/api` routes

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::NaiveDate;
use engine::{GridService, RunBacktestRequest, Strategy, StrategyConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::APP_VERSION;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GridService>,
}

/// Date window for OHLC queries
#[derive(Debug, Default, Deserialize)]
pub struct OhlcQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BacktestListQuery {
    pub strategy_id: Option<i64>,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api_health))
        .route("/strategy/generate", post(api_generate))
        .route("/strategy/save", post(api_save))
        .route("/strategy/list", get(api_list_strategies))
        .route("/strategy/:id", get(api_get_strategy).delete(api_delete_strategy))
        .route("/strategy/:id/rows", get(api_strategy_rows))
        .route("/backtest/run", post(api_run_backtest))
        .route("/backtest/list", get(api_list_backtests))
        .route("/backtest/:id", get(api_get_backtest))
        .route("/stocks", get(api_list_stocks))
        .route("/stocks/:code/ohlc", get(api_stock_ohlc))
        .route("/imports", get(api_list_imports))
        .route("/imports/:id", delete(api_delete_import))
        .with_state(state)
}

fn ok(data: impl serde::Serialize) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "data": data,
    })))
}

// ============================================================================
// Health
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "grid-lab",
        "version": APP_VERSION,
    }))
}

// ============================================================================
// Strategies
// ============================================================================

/// POST /api/strategy/generate - build the ladder without saving it
async fn api_generate(
    State(state): State<AppState>,
    payload: Result<Json<StrategyConfig>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(config) = payload?;
    let strategy = state.service.generate(&config)?;
    ok(strategy)
}

/// POST /api/strategy/save
async fn api_save(
    State(state): State<AppState>,
    payload: Result<Json<Strategy>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(strategy) = payload?;
    let id = state.service.save(&strategy).await?;
    Ok(Json(json!({
        "success": true,
        "id": id,
    })))
}

/// GET /api/strategy/list
async fn api_list_strategies(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let strategies = state.service.list_strategies().await?;
    ok(strategies)
}

/// GET /api/strategy/:id
async fn api_get_strategy(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id.map_err(|e| ApiError::Malformed(e.body_text()))?;
    ok(state.service.get_strategy(id).await?)
}

/// GET /api/strategy/:id/rows
async fn api_strategy_rows(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id.map_err(|e| ApiError::Malformed(e.body_text()))?;
    ok(state.service.get_strategy_rows(id).await?)
}

/// DELETE /api/strategy/:id - also removes the strategy's backtests
async fn api_delete_strategy(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id.map_err(|e| ApiError::Malformed(e.body_text()))?;
    state.service.delete_strategy(id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Strategy {id} deleted"),
    })))
}

// ============================================================================
// Backtests
// ============================================================================

/// POST /api/backtest/run
async fn api_run_backtest(
    State(state): State<AppState>,
    payload: Result<Json<RunBacktestRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = payload?;
    info!(
        strategy_id = request.strategy_id,
        code = %request.code,
        "Backtest requested"
    );
    ok(state.service.run_backtest(&request).await?)
}

/// GET /api/backtest/list?strategy_id=
async fn api_list_backtests(
    State(state): State<AppState>,
    query: Result<Query<BacktestListQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    ok(state.service.list_backtests(query.strategy_id).await?)
}

/// GET /api/backtest/:id
async fn api_get_backtest(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id.map_err(|e| ApiError::Malformed(e.body_text()))?;
    ok(state.service.get_backtest(id).await?)
}

// ============================================================================
// Market data
// ============================================================================

/// GET /api/stocks - instruments with latest close and change percent
async fn api_list_stocks(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    ok(state.service.list_instruments().await?)
}

/// GET /api/stocks/:code/ohlc?start_date=&end_date=
async fn api_stock_ohlc(
    State(state): State<AppState>,
    code: Result<Path<String>, PathRejection>,
    query: Result<Query<OhlcQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Path(code) = code.map_err(|e| ApiError::Malformed(e.body_text()))?;
    let Query(window) = query?;
    let bars = state
        .service
        .get_ohlc(&code, window.start_date, window.end_date)
        .await?;

    Ok(Json(json!({
        "success": true,
        "meta": { "code": code, "count": bars.len() },
        "data": bars,
    })))
}

/// GET /api/imports
async fn api_list_imports(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    ok(state.service.list_imports().await?)
}

/// DELETE /api/imports/:id - removes the batch and its bars
async fn api_delete_import(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = id.map_err(|e| ApiError::Malformed(e.body_text()))?;
    state.service.delete_import(id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Import {id} deleted"),
    })))
}
