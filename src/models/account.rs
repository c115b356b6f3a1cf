use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Firm, Platform};

/// Database row for trading_accounts table.
///
/// Credentials are stored as delivered by the persistence layer; encryption
/// at rest is handled underneath this service. They must never be logged or
/// echoed back through the API.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradingAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub firm: Firm,
    pub platform: Platform,
    pub account_number: String,
    pub display_name: Option<String>,
    pub nominal_size: Option<Decimal>,
    pub current_balance: Option<Decimal>,

    #[serde(skip_serializing)]
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,

    pub is_connected: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    pub max_drawdown: Option<Decimal>,
    pub daily_loss_limit: Option<Decimal>,
    pub additional_config: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
