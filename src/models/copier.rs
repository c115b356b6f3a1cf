use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{CopierStatus, ScalingType};

/// Database row for copiers table. One master account, N follower configs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Copier {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub name: String,
    pub master_account_id: Uuid,
    pub status: CopierStatus,
    pub latency_tolerance_ms: i32,
    pub copy_entries: bool,
    pub copy_exits: bool,
    pub copy_modifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for copier_account_configs table — one follower binding.
/// `(copier_id, slave_account_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CopierAccountConfig {
    pub id: Uuid,
    pub copier_id: Uuid,
    pub slave_account_id: Uuid,
    pub scaling_type: ScalingType,
    pub fixed_contracts: Option<i32>,
    pub percentage_scale: Option<Decimal>,
    pub max_contracts: Option<i32>,
    pub daily_loss_limit: Option<Decimal>,
    pub auto_disable: bool,
    pub is_active: bool,
    pub disabled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for risk_rules table — a named threshold/action attached
/// to a follower config.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RiskRule {
    pub id: Uuid,
    pub config_id: Uuid,
    pub name: String,
    pub threshold: Decimal,
    pub action: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}
