use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TradeMapping;

/// Record a successful follower copy. Returns None when a mapping for
/// (master_trade_id, slave_account_id) already exists — the fan-out
/// already ran and the caller must treat the replay as success.
pub async fn insert_synced(
    pool: &PgPool,
    copier_id: Uuid,
    master_trade_id: Uuid,
    slave_account_id: Uuid,
    slave_trade_id: Uuid,
) -> anyhow::Result<Option<TradeMapping>> {
    let mapping = sqlx::query_as::<_, TradeMapping>(
        r#"
        INSERT INTO trade_mappings
            (copier_id, master_trade_id, slave_account_id, slave_trade_id, status, synced_at)
        VALUES ($1, $2, $3, $4, 'synced', NOW())
        ON CONFLICT (master_trade_id, slave_account_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(copier_id)
    .bind(master_trade_id)
    .bind(slave_account_id)
    .bind(slave_trade_id)
    .fetch_optional(pool)
    .await?;

    Ok(mapping)
}

/// Record a failed follower copy: no slave trade, error message kept.
pub async fn insert_failed(
    pool: &PgPool,
    copier_id: Uuid,
    master_trade_id: Uuid,
    slave_account_id: Uuid,
    error_message: &str,
) -> anyhow::Result<Option<TradeMapping>> {
    let mapping = sqlx::query_as::<_, TradeMapping>(
        r#"
        INSERT INTO trade_mappings
            (copier_id, master_trade_id, slave_account_id, status, error_message)
        VALUES ($1, $2, $3, 'failed', $4)
        ON CONFLICT (master_trade_id, slave_account_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(copier_id)
    .bind(master_trade_id)
    .bind(slave_account_id)
    .bind(error_message)
    .fetch_optional(pool)
    .await?;

    Ok(mapping)
}

/// True when the fan-out for this (master trade, follower) pair already
/// produced a mapping — checked before placing a follower order so a
/// replayed master execution never reaches the broker twice.
pub async fn exists(
    pool: &PgPool,
    master_trade_id: Uuid,
    slave_account_id: Uuid,
) -> anyhow::Result<bool> {
    let row: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM trade_mappings
            WHERE master_trade_id = $1 AND slave_account_id = $2
        )
        "#,
    )
    .bind(master_trade_id)
    .bind(slave_account_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

pub async fn list_for_copier(
    pool: &PgPool,
    copier_id: Uuid,
) -> anyhow::Result<Vec<TradeMapping>> {
    let mappings = sqlx::query_as::<_, TradeMapping>(
        "SELECT * FROM trade_mappings WHERE copier_id = $1 ORDER BY created_at DESC",
    )
    .bind(copier_id)
    .fetch_all(pool)
    .await?;

    Ok(mappings)
}
