use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::LogLevel;

/// Append-only audit entry for copier activity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub copier_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub master_trade_id: Option<Uuid>,
    pub slave_trade_id: Option<Uuid>,
    pub slave_account_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
