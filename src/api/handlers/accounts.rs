use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::CurrentUser;
use crate::db::account_repo::{self, AccountPatch, NewAccount};
use crate::errors::AppError;
use crate::models::{Firm, Platform, TradingAccount};
use crate::services::account_manager::{
    self, DiscoveredAccount, PlatformConnectSummary, PlatformCredentials, TestConnectionResult,
};
use crate::AppState;

use super::ApiResponse;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub firm: Firm,
    pub platform: Platform,
    pub account_number: String,
    pub display_name: Option<String>,
    pub nominal_size: Option<Decimal>,
    pub current_balance: Option<Decimal>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub max_drawdown: Option<Decimal>,
    pub daily_loss_limit: Option<Decimal>,
    pub additional_config: Option<serde_json::Value>,
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<ApiResponse<TradingAccount>>, AppError> {
    if req.account_number.trim().is_empty() {
        return Err(AppError::Validation("accountNumber must not be empty".into()));
    }

    let fields = NewAccount {
        display_name: req.display_name,
        nominal_size: req.nominal_size,
        current_balance: req.current_balance,
        email: req.email,
        password: req.password,
        api_key: req.api_key,
        api_secret: req.api_secret,
        max_drawdown: req.max_drawdown,
        daily_loss_limit: req.daily_loss_limit,
        additional_config: req.additional_config,
    };

    let account = account_repo::insert_account(
        &state.db,
        user_id,
        req.firm,
        req.platform,
        &req.account_number,
        &fields,
    )
    .await?;

    Ok(Json(ApiResponse::ok(account)))
}

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<ApiResponse<Vec<TradingAccount>>>, AppError> {
    let accounts = account_repo::list_accounts(&state.db, user_id).await?;
    Ok(Json(ApiResponse::ok(accounts)))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TradingAccount>>, AppError> {
    let account = account_repo::get_account_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;
    Ok(Json(ApiResponse::ok(account)))
}

pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<AccountPatch>,
) -> Result<Json<ApiResponse<TradingAccount>>, AppError> {
    let account = account_repo::update_account(&state.db, id, user_id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;
    Ok(Json(ApiResponse::ok(account)))
}

pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    account_manager::delete_account(&state.db, id, user_id).await?;
    Ok(Json(ApiResponse::ok(())))
}

pub async fn connect(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TradingAccount>>, AppError> {
    let account = account_manager::connect_account(&state.db, &state.registry, id, user_id).await?;
    Ok(Json(ApiResponse::ok(account)))
}

pub async fn disconnect(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TradingAccount>>, AppError> {
    let account =
        account_manager::disconnect_account(&state.db, &state.registry, id, user_id).await?;
    Ok(Json(ApiResponse::ok(account)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformRequest {
    pub firm: Firm,
    pub platform: Platform,
    #[serde(flatten)]
    pub credentials: PlatformCredentials,
}

pub async fn test_connection(
    State(state): State<AppState>,
    CurrentUser(_user_id): CurrentUser,
    Json(req): Json<PlatformRequest>,
) -> Result<Json<ApiResponse<TestConnectionResult>>, AppError> {
    let result =
        account_manager::test_connection(&state.registry, req.firm, req.platform, &req.credentials)
            .await;
    Ok(Json(ApiResponse::ok(result)))
}

pub async fn connect_platform(
    State(state): State<AppState>,
    CurrentUser(_user_id): CurrentUser,
    Json(req): Json<PlatformRequest>,
) -> Result<Json<ApiResponse<PlatformConnectSummary>>, AppError> {
    let summary =
        account_manager::connect_platform(&state.registry, req.firm, req.platform, &req.credentials)
            .await?;
    Ok(Json(ApiResponse::ok(summary)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFromPlatformRequest {
    pub firm: Firm,
    pub platform: Platform,
    pub accounts: Vec<DiscoveredAccount>,
    #[serde(flatten)]
    pub credentials: PlatformCredentials,
}

pub async fn create_from_platform(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateFromPlatformRequest>,
) -> Result<Json<ApiResponse<Vec<TradingAccount>>>, AppError> {
    let imported = account_manager::create_accounts_from_platform(
        &state.db,
        user_id,
        req.firm,
        req.platform,
        &req.accounts,
        &req.credentials,
    )
    .await?;
    Ok(Json(ApiResponse::ok(imported)))
}
