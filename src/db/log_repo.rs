use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ExecutionLog, LogLevel};

/// Optional trade/account references attached to an audit entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRefs {
    pub master_trade_id: Option<Uuid>,
    pub slave_trade_id: Option<Uuid>,
    pub slave_account_id: Option<Uuid>,
}

pub async fn append(
    pool: &PgPool,
    copier_id: Uuid,
    level: LogLevel,
    message: &str,
    refs: LogRefs,
    details: Option<serde_json::Value>,
) -> anyhow::Result<ExecutionLog> {
    let entry = sqlx::query_as::<_, ExecutionLog>(
        r#"
        INSERT INTO execution_logs
            (copier_id, level, message, master_trade_id, slave_trade_id, slave_account_id, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(copier_id)
    .bind(level)
    .bind(message)
    .bind(refs.master_trade_id)
    .bind(refs.slave_trade_id)
    .bind(refs.slave_account_id)
    .bind(details)
    .fetch_one(pool)
    .await?;

    Ok(entry)
}

pub async fn list_for_copier(
    pool: &PgPool,
    copier_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<ExecutionLog>> {
    let entries = sqlx::query_as::<_, ExecutionLog>(
        "SELECT * FROM execution_logs WHERE copier_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(copier_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
