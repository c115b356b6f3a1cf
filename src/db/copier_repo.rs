use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Copier, CopierAccountConfig, CopierStatus, ScalingType};

#[derive(Debug, Clone)]
pub struct NewCopier {
    pub name: String,
    pub master_account_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub latency_tolerance_ms: i32,
    pub copy_entries: bool,
    pub copy_exits: bool,
    pub copy_modifications: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopierPatch {
    pub name: Option<String>,
    pub latency_tolerance_ms: Option<i32>,
    pub copy_entries: Option<bool>,
    pub copy_exits: Option<bool>,
    pub copy_modifications: Option<bool>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFollowerConfig {
    pub slave_account_id: Uuid,
    pub scaling_type: ScalingType,
    pub fixed_contracts: Option<i32>,
    pub percentage_scale: Option<Decimal>,
    pub max_contracts: Option<i32>,
    pub daily_loss_limit: Option<Decimal>,
    #[serde(default)]
    pub auto_disable: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerConfigPatch {
    pub scaling_type: Option<ScalingType>,
    pub fixed_contracts: Option<i32>,
    pub percentage_scale: Option<Decimal>,
    pub max_contracts: Option<i32>,
    pub daily_loss_limit: Option<Decimal>,
    pub auto_disable: Option<bool>,
    pub is_active: Option<bool>,
}

pub async fn insert_copier(
    pool: &PgPool,
    user_id: Uuid,
    new: &NewCopier,
) -> anyhow::Result<Copier> {
    let copier = sqlx::query_as::<_, Copier>(
        r#"
        INSERT INTO copiers
            (user_id, organization_id, name, master_account_id, latency_tolerance_ms,
             copy_entries, copy_exits, copy_modifications)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(new.organization_id)
    .bind(&new.name)
    .bind(new.master_account_id)
    .bind(new.latency_tolerance_ms)
    .bind(new.copy_entries)
    .bind(new.copy_exits)
    .bind(new.copy_modifications)
    .fetch_one(pool)
    .await?;

    Ok(copier)
}

pub async fn get_copier(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Copier>> {
    let copier = sqlx::query_as::<_, Copier>("SELECT * FROM copiers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(copier)
}

pub async fn get_copier_for_user(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<Option<Copier>> {
    let copier = sqlx::query_as::<_, Copier>(
        "SELECT * FROM copiers WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(copier)
}

pub async fn list_copiers(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Copier>> {
    let copiers = sqlx::query_as::<_, Copier>(
        "SELECT * FROM copiers WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(copiers)
}

/// Copiers persisted in a given status — used by crash recovery at boot.
pub async fn list_by_status(pool: &PgPool, status: CopierStatus) -> anyhow::Result<Vec<Copier>> {
    let copiers = sqlx::query_as::<_, Copier>("SELECT * FROM copiers WHERE status = $1")
        .bind(status)
        .fetch_all(pool)
        .await?;

    Ok(copiers)
}

pub async fn update_copier(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    patch: &CopierPatch,
) -> anyhow::Result<Option<Copier>> {
    let copier = sqlx::query_as::<_, Copier>(
        r#"
        UPDATE copiers SET
            name                 = COALESCE($3, name),
            latency_tolerance_ms = COALESCE($4, latency_tolerance_ms),
            copy_entries         = COALESCE($5, copy_entries),
            copy_exits           = COALESCE($6, copy_exits),
            copy_modifications   = COALESCE($7, copy_modifications),
            updated_at           = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(&patch.name)
    .bind(patch.latency_tolerance_ms)
    .bind(patch.copy_entries)
    .bind(patch.copy_exits)
    .bind(patch.copy_modifications)
    .fetch_optional(pool)
    .await?;

    Ok(copier)
}

pub async fn set_status(pool: &PgPool, id: Uuid, status: CopierStatus) -> anyhow::Result<()> {
    sqlx::query("UPDATE copiers SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete_copier(pool: &PgPool, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM copiers WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Follower configs
// ---------------------------------------------------------------------------

/// Insert a follower binding. A unique violation on
/// (copier_id, slave_account_id) surfaces as `sqlx::Error` for the caller
/// to map to a conflict.
pub async fn insert_config(
    pool: &PgPool,
    copier_id: Uuid,
    new: &NewFollowerConfig,
) -> Result<CopierAccountConfig, sqlx::Error> {
    sqlx::query_as::<_, CopierAccountConfig>(
        r#"
        INSERT INTO copier_account_configs
            (copier_id, slave_account_id, scaling_type, fixed_contracts,
             percentage_scale, max_contracts, daily_loss_limit, auto_disable)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(copier_id)
    .bind(new.slave_account_id)
    .bind(new.scaling_type)
    .bind(new.fixed_contracts)
    .bind(new.percentage_scale)
    .bind(new.max_contracts)
    .bind(new.daily_loss_limit)
    .bind(new.auto_disable)
    .fetch_one(pool)
    .await
}

pub async fn get_configs(
    pool: &PgPool,
    copier_id: Uuid,
) -> anyhow::Result<Vec<CopierAccountConfig>> {
    let configs = sqlx::query_as::<_, CopierAccountConfig>(
        "SELECT * FROM copier_account_configs WHERE copier_id = $1 ORDER BY created_at",
    )
    .bind(copier_id)
    .fetch_all(pool)
    .await?;

    Ok(configs)
}

pub async fn get_active_configs(
    pool: &PgPool,
    copier_id: Uuid,
) -> anyhow::Result<Vec<CopierAccountConfig>> {
    let configs = sqlx::query_as::<_, CopierAccountConfig>(
        "SELECT * FROM copier_account_configs WHERE copier_id = $1 AND is_active = TRUE ORDER BY created_at",
    )
    .bind(copier_id)
    .fetch_all(pool)
    .await?;

    Ok(configs)
}

pub async fn get_config(
    pool: &PgPool,
    copier_id: Uuid,
    slave_account_id: Uuid,
) -> anyhow::Result<Option<CopierAccountConfig>> {
    let config = sqlx::query_as::<_, CopierAccountConfig>(
        "SELECT * FROM copier_account_configs WHERE copier_id = $1 AND slave_account_id = $2",
    )
    .bind(copier_id)
    .bind(slave_account_id)
    .fetch_optional(pool)
    .await?;

    Ok(config)
}

pub async fn update_config(
    pool: &PgPool,
    copier_id: Uuid,
    slave_account_id: Uuid,
    patch: &FollowerConfigPatch,
) -> anyhow::Result<Option<CopierAccountConfig>> {
    let config = sqlx::query_as::<_, CopierAccountConfig>(
        r#"
        UPDATE copier_account_configs SET
            scaling_type     = COALESCE($3, scaling_type),
            fixed_contracts  = COALESCE($4, fixed_contracts),
            percentage_scale = COALESCE($5, percentage_scale),
            max_contracts    = COALESCE($6, max_contracts),
            daily_loss_limit = COALESCE($7, daily_loss_limit),
            auto_disable     = COALESCE($8, auto_disable),
            is_active        = COALESCE($9, is_active),
            disabled_reason  = CASE WHEN $9 = TRUE THEN NULL ELSE disabled_reason END,
            updated_at       = NOW()
        WHERE copier_id = $1 AND slave_account_id = $2
        RETURNING *
        "#,
    )
    .bind(copier_id)
    .bind(slave_account_id)
    .bind(patch.scaling_type)
    .bind(patch.fixed_contracts)
    .bind(patch.percentage_scale)
    .bind(patch.max_contracts)
    .bind(patch.daily_loss_limit)
    .bind(patch.auto_disable)
    .bind(patch.is_active)
    .fetch_optional(pool)
    .await?;

    Ok(config)
}

/// Atomically deactivate a follower binding after a risk trip.
pub async fn disable_config(
    pool: &PgPool,
    config_id: Uuid,
    reason: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copier_account_configs
        SET is_active = FALSE, disabled_reason = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(config_id)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_config(
    pool: &PgPool,
    copier_id: Uuid,
    slave_account_id: Uuid,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "DELETE FROM copier_account_configs WHERE copier_id = $1 AND slave_account_id = $2",
    )
    .bind(copier_id)
    .bind(slave_account_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
