use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::CurrentUser;
use crate::db::{copier_repo, mapping_repo, trade_repo};
use crate::errors::AppError;
use crate::models::{Trade, TradeMapping};
use crate::AppState;

use super::ApiResponse;

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<ApiResponse<Vec<Trade>>>, AppError> {
    let trades = trade_repo::list_open_trades(&state.db, user_id).await?;
    Ok(Json(ApiResponse::ok(trades)))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn history(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<Trade>>>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1_000);
    let trades = trade_repo::list_history(&state.db, user_id, limit).await?;
    Ok(Json(ApiResponse::ok(trades)))
}

pub async fn mappings(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(copier_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<TradeMapping>>>, AppError> {
    let copier = copier_repo::get_copier_for_user(&state.db, copier_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;

    let mappings = mapping_repo::list_for_copier(&state.db, copier.id).await?;
    Ok(Json(ApiResponse::ok(mappings)))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Trade>>, AppError> {
    let trade = trade_repo::get_trade_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("trade not found".into()))?;
    Ok(Json(ApiResponse::ok(trade)))
}
