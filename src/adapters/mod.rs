pub mod mock;
pub mod ninjatrader;
pub mod projectx;
pub mod registry;
pub mod rithmic;
pub mod stream;
pub mod tradovate;
pub mod transport;

pub use registry::{AdapterRegistry, AdapterSettings};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Firm, OrderType, Platform, PositionUpdate, Side, TradeExecution, TradingAccount};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("no adapter registered for {platform}/{firm}")]
    UnknownAdapter { platform: Platform, firm: Firm },

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        AdapterError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterIdentity {
    pub firm: Firm,
    pub platform: Platform,
}

/// Credentials and connection options handed to `connect`. Any subset of
/// the credential fields may be present; the auth probe tries the
/// combinations in a fixed order.
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub account_number: Option<String>,
    pub environment: Option<String>,
    /// Explicit base URL override; takes precedence over all candidates.
    pub base_url: Option<String>,
}

impl ConnectConfig {
    pub fn from_account(account: &TradingAccount) -> Self {
        let base_url = account
            .additional_config
            .as_ref()
            .and_then(|c| c.get("baseUrl"))
            .and_then(|v| v.as_str())
            .map(String::from);
        let environment = account
            .additional_config
            .as_ref()
            .and_then(|c| c.get("environment"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Self {
            email: account.email.clone(),
            password: account.password.clone(),
            api_key: account.api_key.clone(),
            api_secret: account.api_secret.clone(),
            account_number: Some(account.account_number.clone()),
            environment,
            base_url,
        }
    }

    pub fn has_any_credentials(&self) -> bool {
        (self.email.is_some() && self.password.is_some())
            || (self.api_key.is_some() && self.api_secret.is_some())
            || (self.account_number.is_some() && self.password.is_some())
    }
}

/// Order request as the engine builds it, pre-normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    /// Vendor account number to place against.
    pub account_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: i32,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub quantity: Option<i32>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

/// Normalised account snapshot returned by `get_account_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub name: Option<String>,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin_used: Decimal,
    pub positions: Vec<PositionUpdate>,
}

/// Uniform brokerage interface. One implementation per platform family;
/// shared auth probing, discovery, backoff and polling live in
/// `transport`/`stream` and are consumed by every implementation.
///
/// Subscriptions are broadcast channels: dropping the receiver disposes
/// the subscription, `disconnect` tears down the producing tasks.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn identity(&self) -> AdapterIdentity;

    /// Establish a session. Idempotent: reconnecting replaces the session.
    async fn connect(&self, cfg: &ConnectConfig) -> Result<(), AdapterError>;

    /// Idempotent; releases stream/poll tasks and the cached session.
    async fn disconnect(&self);

    /// Live state — reflects underlying socket/poll health, not just the
    /// last `connect` outcome.
    fn is_connected(&self) -> bool;

    async fn place_order(&self, order: &TradeOrder) -> Result<TradeExecution, AdapterError>;
    async fn cancel_order(&self, external_order_id: &str) -> Result<(), AdapterError>;
    async fn modify_order(
        &self,
        external_order_id: &str,
        updates: &OrderUpdate,
    ) -> Result<(), AdapterError>;
    async fn close_position(&self, symbol: &str, side: Option<Side>) -> Result<(), AdapterError>;

    async fn get_account_info(&self) -> Result<AccountSnapshot, AdapterError>;

    /// All accounts reachable under the current session. Providers without
    /// enumeration fall back to the single-account snapshot.
    async fn get_all_accounts(&self) -> Result<Vec<AccountSnapshot>, AdapterError> {
        Ok(vec![self.get_account_info().await?])
    }

    fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecution>;
    fn subscribe_positions(&self) -> broadcast::Receiver<PositionUpdate>;
}
