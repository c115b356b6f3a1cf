use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{MappingStatus, OrderType, Side, TradeStatus};

/// Database row for trades table — one recorded execution on one account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub account_id: Uuid,
    pub copier_id: Option<Uuid>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i32,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: TradeStatus,
    pub realized_pnl: Option<Decimal>,
    pub external_order_id: Option<String>,
    pub external_trade_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for trade_mappings table — one master-trade→follower edge.
/// `(master_trade_id, slave_account_id)` is unique; that constraint is the
/// idempotency guarantee for fan-out retries.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeMapping {
    pub id: Uuid,
    pub copier_id: Uuid,
    pub master_trade_id: Uuid,
    pub slave_account_id: Uuid,
    pub slave_trade_id: Option<Uuid>,
    pub status: MappingStatus,
    pub error_message: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
