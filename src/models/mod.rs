pub mod account;
pub mod copier;
pub mod execution_log;
pub mod trade;
pub mod user;

pub use account::TradingAccount;
pub use copier::{Copier, CopierAccountConfig, RiskRule};
pub use execution_log::ExecutionLog;
pub use trade::{Trade, TradeMapping};
pub use user::{Organization, User};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "side", rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Normalise a vendor side string. Platforms disagree on casing and
    /// some (ProjectX, Tradovate) send numeric codes.
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "B" | "BID" | "LONG" | "0" => Some(Side::Buy),
            "SELL" | "S" | "ASK" | "SHORT" | "1" => Some(Side::Sell),
            _ => None,
        }
    }

}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "order_type", rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "trade_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl TradeStatus {
    /// Normalise a vendor status string.
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" | "working" | "accepted" | "new" | "submitted" | "open" => {
                Some(TradeStatus::Pending)
            }
            "filled" | "matched" | "complete" | "completed" | "executed" => {
                Some(TradeStatus::Filled)
            }
            "partially_filled" | "partial" | "partialfill" | "part_filled" => {
                Some(TradeStatus::PartiallyFilled)
            }
            "cancelled" | "canceled" | "expired" => Some(TradeStatus::Cancelled),
            "rejected" | "failed" | "violation" => Some(TradeStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_fill(self) -> bool {
        matches!(self, TradeStatus::Filled | TradeStatus::PartiallyFilled)
    }
}

// ---------------------------------------------------------------------------
// Platform / firm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "platform", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Rithmic,
    Tradovate,
    Ninjatrader,
    Projectx,
    Other,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Rithmic => write!(f, "RITHMIC"),
            Platform::Tradovate => write!(f, "TRADOVATE"),
            Platform::Ninjatrader => write!(f, "NINJATRADER"),
            Platform::Projectx => write!(f, "PROJECTX"),
            Platform::Other => write!(f, "OTHER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "firm", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Firm {
    Topstepx,
    AlphaFutures,
    MyfundedFutures,
    TakeprofitTrader,
    Tradefy,
}

impl fmt::Display for Firm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Firm::Topstepx => write!(f, "TOPSTEPX"),
            Firm::AlphaFutures => write!(f, "ALPHA_FUTURES"),
            Firm::MyfundedFutures => write!(f, "MYFUNDED_FUTURES"),
            Firm::TakeprofitTrader => write!(f, "TAKEPROFIT_TRADER"),
            Firm::Tradefy => write!(f, "TRADEFY"),
        }
    }
}

// ---------------------------------------------------------------------------
// Copier lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "copier_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopierStatus {
    Stopped,
    Active,
    Paused,
    Error,
}

impl fmt::Display for CopierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopierStatus::Stopped => write!(f, "STOPPED"),
            CopierStatus::Active => write!(f, "ACTIVE"),
            CopierStatus::Paused => write!(f, "PAUSED"),
            CopierStatus::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "scaling_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingType {
    Fixed,
    Percentage,
    BalanceBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "mapping_status", rename_all = "lowercase")]
pub enum MappingStatus {
    Pending,
    Synced,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "log_level", rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    User,
}

// ---------------------------------------------------------------------------
// TradeExecution — normalised adapter event, the engine's core message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecution {
    /// Vendor account number the execution belongs to.
    pub account_id: String,
    pub external_order_id: Option<String>,
    pub external_trade_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i32,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: TradeStatus,
    pub executed_at: DateTime<Utc>,
}

impl fmt::Display for TradeExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Execution: account={} symbol={} side={} qty={} status={:?}",
            self.account_id, self.symbol, self.side, self.quantity, self.status,
        )
    }
}

/// Normalised position snapshot emitted on the position channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub account_id: String,
    pub symbol: String,
    /// Signed net quantity: positive long, negative short.
    pub net_quantity: i32,
    pub avg_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_normalisation() {
        assert_eq!(Side::from_api_str("buy"), Some(Side::Buy));
        assert_eq!(Side::from_api_str("SELL"), Some(Side::Sell));
        assert_eq!(Side::from_api_str("0"), Some(Side::Buy));
        assert_eq!(Side::from_api_str("short"), Some(Side::Sell));
        assert_eq!(Side::from_api_str("hold"), None);
    }

    #[test]
    fn test_status_normalisation() {
        assert_eq!(TradeStatus::from_api_str("Matched"), Some(TradeStatus::Filled));
        assert_eq!(TradeStatus::from_api_str("working"), Some(TradeStatus::Pending));
        assert_eq!(
            TradeStatus::from_api_str("PartialFill"),
            Some(TradeStatus::PartiallyFilled)
        );
        assert_eq!(TradeStatus::from_api_str("Canceled"), Some(TradeStatus::Cancelled));
        assert_eq!(TradeStatus::from_api_str("violation"), Some(TradeStatus::Rejected));
        assert_eq!(TradeStatus::from_api_str("???"), None);
    }

    #[test]
    fn test_fill_predicate() {
        assert!(TradeStatus::Filled.is_fill());
        assert!(TradeStatus::PartiallyFilled.is_fill());
        assert!(!TradeStatus::Pending.is_fill());
    }
}
