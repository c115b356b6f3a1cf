use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::api::CurrentUser;
use crate::db::copier_repo::{
    self, CopierPatch, FollowerConfigPatch, NewCopier, NewFollowerConfig,
};
use crate::db::{account_repo, log_repo};
use crate::errors::AppError;
use crate::models::{Copier, CopierAccountConfig, ExecutionLog};
use crate::AppState;

use super::ApiResponse;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCopierRequest {
    pub name: String,
    pub master_account_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub latency_tolerance_ms: Option<i32>,
    pub copy_entries: Option<bool>,
    pub copy_exits: Option<bool>,
    pub copy_modifications: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopierDetail {
    #[serde(flatten)]
    pub copier: Copier,
    pub slaves: Vec<CopierAccountConfig>,
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateCopierRequest>,
) -> Result<Json<ApiResponse<Copier>>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }

    // The master must belong to the caller and resolve to an adapter.
    let master = account_repo::get_account_for_user(&state.db, req.master_account_id, user_id)
        .await?
        .ok_or_else(|| AppError::Validation("master account not found for user".into()))?;
    if !AdapterRegistry::is_supported(master.platform, master.firm) {
        return Err(AppError::Validation(format!(
            "no adapter registered for {}/{}",
            master.platform, master.firm
        )));
    }

    let copier = copier_repo::insert_copier(
        &state.db,
        user_id,
        &NewCopier {
            name: req.name,
            master_account_id: master.id,
            organization_id: req.organization_id,
            latency_tolerance_ms: req.latency_tolerance_ms.unwrap_or(1_000),
            copy_entries: req.copy_entries.unwrap_or(true),
            copy_exits: req.copy_exits.unwrap_or(true),
            copy_modifications: req.copy_modifications.unwrap_or(false),
        },
    )
    .await?;

    Ok(Json(ApiResponse::ok(copier)))
}

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<ApiResponse<Vec<Copier>>>, AppError> {
    let copiers = copier_repo::list_copiers(&state.db, user_id).await?;
    Ok(Json(ApiResponse::ok(copiers)))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CopierDetail>>, AppError> {
    let copier = copier_repo::get_copier_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;
    let slaves = copier_repo::get_configs(&state.db, copier.id).await?;

    Ok(Json(ApiResponse::ok(CopierDetail { copier, slaves })))
}

pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<CopierPatch>,
) -> Result<Json<ApiResponse<Copier>>, AppError> {
    let copier = copier_repo::update_copier(&state.db, id, user_id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;
    Ok(Json(ApiResponse::ok(copier)))
}

pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    if state.engine.is_running(id).await {
        return Err(AppError::Conflict("stop the copier before deleting it".into()));
    }

    let deleted = copier_repo::delete_copier(&state.db, id, user_id).await?;
    if !deleted {
        return Err(AppError::NotFound("copier not found".into()));
    }
    Ok(Json(ApiResponse::ok(())))
}

pub async fn start(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.engine.start(id, user_id).await?;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "status": "ACTIVE" }))))
}

pub async fn stop(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.engine.stop(id, user_id).await?;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "status": "STOPPED" }))))
}

pub async fn pause(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.engine.pause(id, user_id).await?;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "status": "PAUSED" }))))
}

pub async fn add_slave(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<NewFollowerConfig>,
) -> Result<Json<ApiResponse<CopierAccountConfig>>, AppError> {
    let copier = copier_repo::get_copier_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;

    // Followers must belong to the copier's owner.
    let follower = account_repo::get_account_for_user(&state.db, req.slave_account_id, user_id)
        .await?
        .ok_or_else(|| AppError::Validation("follower account not found for user".into()))?;
    if follower.id == copier.master_account_id {
        return Err(AppError::Validation(
            "master account cannot follow itself".into(),
        ));
    }

    let config = copier_repo::insert_config(&state.db, copier.id, &req)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                AppError::Conflict("follower account is already bound to this copier".into())
            } else {
                AppError::Internal(e.into())
            }
        })?;

    Ok(Json(ApiResponse::ok(config)))
}

pub async fn update_slave(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((id, slave_account_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<FollowerConfigPatch>,
) -> Result<Json<ApiResponse<CopierAccountConfig>>, AppError> {
    let copier = copier_repo::get_copier_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;

    let config = copier_repo::update_config(&state.db, copier.id, slave_account_id, &patch)
        .await?
        .ok_or_else(|| AppError::NotFound("follower binding not found".into()))?;
    Ok(Json(ApiResponse::ok(config)))
}

pub async fn remove_slave(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((id, slave_account_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let copier = copier_repo::get_copier_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;

    let deleted = copier_repo::delete_config(&state.db, copier.id, slave_account_id).await?;
    if !deleted {
        return Err(AppError::NotFound("follower binding not found".into()));
    }
    Ok(Json(ApiResponse::ok(())))
}

pub async fn logs(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ExecutionLog>>>, AppError> {
    let copier = copier_repo::get_copier_for_user(&state.db, id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("copier not found".into()))?;

    let entries = log_repo::list_for_copier(&state.db, copier.id, 200).await?;
    Ok(Json(ApiResponse::ok(entries)))
}
