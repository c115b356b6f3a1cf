//! Rithmic platform-family adapter.
//!
//! Prop firms on Rithmic front the protocol with per-firm web gateways, so
//! this adapter is mostly a base-URL table plus the shared probe: the firm
//! override is tried first, then the platform default. Sessions without a
//! token fall back to polling the fills endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};

use crate::models::{
    Firm, OrderType, Platform, PositionUpdate, Side, TradeExecution, TradeStatus,
};

use super::registry::AdapterSettings;
use super::stream::{spawn_poll, spawn_stream, MessageParser, StreamEvent};
use super::transport::{discover_endpoints, probe_auth, send_json, AuthSession, SessionCore};
use super::{
    AccountSnapshot, AdapterError, AdapterIdentity, BrokerAdapter, ConnectConfig, OrderUpdate,
    TradeOrder,
};

const DEFAULT_BASE_URL: &str = "https://gateway.rithmic.com/api";
const DEFAULT_WS_URL: &str = "wss://gateway.rithmic.com/stream";

fn firm_base_url(firm: Firm) -> Option<&'static str> {
    match firm {
        Firm::Topstepx => Some("https://api.topstep.com"),
        Firm::TakeprofitTrader => Some("https://api.takeprofittrader.com"),
        Firm::MyfundedFutures => Some("https://api.myfundedfutures.com"),
        Firm::AlphaFutures => Some("https://api.alphafutures.com"),
        Firm::Tradefy => Some("https://api.tradefy.com"),
    }
}

pub struct RithmicAdapter {
    firm: Firm,
    settings: Arc<AdapterSettings>,
    core: SessionCore,
    account_number: RwLock<Option<String>>,
    /// Fills endpoint resolved by discovery; default otherwise.
    trades_endpoint: RwLock<String>,
}

impl RithmicAdapter {
    pub fn new(firm: Firm, settings: Arc<AdapterSettings>) -> Self {
        let core = SessionCore::new(settings.http_timeout);
        Self {
            firm,
            settings,
            core,
            account_number: RwLock::new(None),
            trades_endpoint: RwLock::new("/fills".to_string()),
        }
    }

    fn base_url_candidates(&self, cfg: &ConnectConfig) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(url) = &cfg.base_url {
            candidates.push(url.clone());
        }
        if let Some(url) = self.settings.base_url_override(Platform::Rithmic) {
            candidates.push(url);
        }
        if let Some(url) = firm_base_url(self.firm) {
            candidates.push(url.to_string());
        }
        candidates.push(DEFAULT_BASE_URL.to_string());
        candidates.dedup();
        candidates
    }

    fn ws_url(&self, token: &str) -> String {
        let base = self
            .settings
            .ws_url_override(Platform::Rithmic)
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        format!("{base}?token={token}")
    }

    async fn bound_account(&self) -> Result<String, AdapterError> {
        self.account_number
            .read()
            .await
            .clone()
            .ok_or(AdapterError::NotConnected)
    }
}

#[async_trait]
impl BrokerAdapter for RithmicAdapter {
    fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            firm: self.firm,
            platform: Platform::Rithmic,
        }
    }

    async fn connect(&self, cfg: &ConnectConfig) -> Result<(), AdapterError> {
        if !cfg.has_any_credentials() {
            return Err(AdapterError::Auth("no credentials supplied".into()));
        }

        self.core.teardown().await;

        let candidates = self.base_url_candidates(cfg);
        let session = if self.settings.enable_discovery {
            let discovered =
                discover_endpoints(&self.core.http, &candidates, &[], cfg).await?;
            *self.trades_endpoint.write().await = discovered.trades_endpoint.clone();
            discovered.auth
        } else {
            probe_auth(&self.core.http, &candidates, &[], cfg).await?
        };

        let account_number = cfg.account_number.clone().unwrap_or_default();
        *self.account_number.write().await = Some(account_number.clone());

        let token = session.token.clone();
        self.core.install_session(session.clone()).await;

        match token {
            Some(token) => {
                let subscribe_frame = serde_json::json!({
                    "action": "subscribe",
                    "account": account_number,
                    "channels": ["trades", "positions", "account"],
                })
                .to_string();

                let parser: MessageParser = Arc::new({
                    let account = account_number.clone();
                    move |text| parse_gateway_message(text, &account)
                });
                let handle = spawn_stream(
                    self.ws_url(&token),
                    vec![subscribe_frame],
                    parser,
                    self.core.trade_sender(),
                    self.core.position_sender(),
                    self.core.connected_flag(),
                    self.settings.reconnect.clone(),
                );
                self.core.track_task(handle).await;
            }
            None => {
                let poller = FillPoller {
                    http: self.core.http.clone(),
                    session,
                    endpoint: self.trades_endpoint.read().await.clone(),
                    account: account_number.clone(),
                };
                let handle = spawn_poll(
                    self.settings.poll_interval,
                    self.core.connected_flag(),
                    self.core.trade_sender(),
                    move || {
                        let poller = poller.clone();
                        async move { poller.fetch().await }
                    },
                );
                self.core.track_task(handle).await;
            }
        }

        tracing::info!(firm = %self.firm, account = %account_number, "Rithmic adapter connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.core.teardown().await;
        *self.account_number.write().await = None;
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    async fn place_order(&self, order: &TradeOrder) -> Result<TradeExecution, AdapterError> {
        let body = serde_json::json!({
            "accountId": order.account_id,
            "symbol": order.symbol,
            "side": order.side.to_string(),
            "orderType": order.order_type.to_string(),
            "quantity": order.quantity,
            "limitPrice": order.limit_price,
            "stopPrice": order.stop_price,
        });

        let req = self.core.authed_post("/orders/place", &body).await?;
        let parsed = send_json(req).await?;

        if parsed.get("success").and_then(|v| v.as_bool()) == Some(false) {
            let reason = parsed
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("order rejected");
            return Err(AdapterError::Unexpected(reason.to_string()));
        }

        let order_id = parsed
            .get("orderId")
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        Ok(TradeExecution {
            account_id: order.account_id.clone(),
            external_order_id: order_id,
            external_trade_id: None,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.limit_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            status: TradeStatus::Pending,
            executed_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, external_order_id: &str) -> Result<(), AdapterError> {
        let body = serde_json::json!({ "orderId": external_order_id });
        let req = self.core.authed_post("/orders/cancel", &body).await?;
        send_json(req).await?;
        Ok(())
    }

    async fn modify_order(
        &self,
        external_order_id: &str,
        updates: &OrderUpdate,
    ) -> Result<(), AdapterError> {
        let body = serde_json::json!({
            "orderId": external_order_id,
            "quantity": updates.quantity,
            "limitPrice": updates.limit_price,
            "stopPrice": updates.stop_price,
        });
        let req = self.core.authed_post("/orders/modify", &body).await?;
        send_json(req).await?;
        Ok(())
    }

    async fn close_position(&self, symbol: &str, side: Option<Side>) -> Result<(), AdapterError> {
        let account = self.bound_account().await?;
        let body = serde_json::json!({
            "accountId": account,
            "symbol": symbol,
            "side": side.map(|s| s.to_string()),
        });
        let req = self.core.authed_post("/positions/close", &body).await?;
        send_json(req).await?;
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountSnapshot, AdapterError> {
        let account = self.bound_account().await?;
        let all = self.get_all_accounts().await?;
        all.into_iter()
            .find(|snap| snap.account_id == account)
            .ok_or_else(|| AdapterError::Unexpected(format!("account {account} not in session")))
    }

    async fn get_all_accounts(&self) -> Result<Vec<AccountSnapshot>, AdapterError> {
        let req = self.core.authed_get("/accounts").await?;
        let parsed = send_json(req).await?;

        // Either a bare array or wrapped in {"accounts": [...]}.
        let list = parsed
            .get("accounts")
            .cloned()
            .unwrap_or(parsed);

        let accounts: Vec<RithmicAccount> =
            serde_json::from_value(list).map_err(|e| AdapterError::Unexpected(e.to_string()))?;

        Ok(accounts.into_iter().map(RithmicAccount::into_snapshot).collect())
    }

    fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecution> {
        self.core.subscribe_trades()
    }

    fn subscribe_positions(&self) -> broadcast::Receiver<PositionUpdate> {
        self.core.subscribe_positions()
    }
}

#[derive(Clone)]
struct FillPoller {
    http: reqwest::Client,
    session: AuthSession,
    endpoint: String,
    account: String,
}

impl FillPoller {
    async fn fetch(&self) -> Result<Vec<TradeExecution>, AdapterError> {
        let url = format!(
            "{}{}?account={}",
            self.session.base_url, self.endpoint, self.account
        );
        let mut req = self.http.get(&url);
        if let Some(token) = &self.session.token {
            req = req.bearer_auth(token);
        }
        let parsed = send_json(req).await?;

        let list = parsed.get("fills").cloned().unwrap_or(parsed);
        let fills: Vec<RithmicFill> =
            serde_json::from_value(list).map_err(|e| AdapterError::Unexpected(e.to_string()))?;

        Ok(fills.iter().filter_map(|f| f.normalise(&self.account)).collect())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RithmicAccount {
    #[serde(alias = "accountId", alias = "accountNumber")]
    id: serde_json::Value,
    name: Option<String>,
    balance: Option<Decimal>,
    #[serde(default)]
    equity: Option<Decimal>,
    #[serde(default)]
    margin_used: Option<Decimal>,
}

impl RithmicAccount {
    fn into_snapshot(self) -> AccountSnapshot {
        let account_id = match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let balance = self.balance.unwrap_or(Decimal::ZERO);
        AccountSnapshot {
            account_id,
            name: self.name,
            equity: self.equity.unwrap_or(balance),
            margin_used: self.margin_used.unwrap_or(Decimal::ZERO),
            balance,
            positions: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RithmicFill {
    #[serde(alias = "fillId")]
    id: Option<serde_json::Value>,
    order_id: Option<serde_json::Value>,
    symbol: Option<String>,
    side: Option<String>,
    quantity: Option<i32>,
    price: Option<Decimal>,
    status: Option<String>,
    #[serde(alias = "time")]
    timestamp: Option<DateTime<Utc>>,
}

impl RithmicFill {
    fn normalise(&self, account_number: &str) -> Option<TradeExecution> {
        let side = Side::from_api_str(self.side.as_deref()?)?;
        let status = self
            .status
            .as_deref()
            .and_then(TradeStatus::from_api_str)
            .unwrap_or(TradeStatus::Filled);

        Some(TradeExecution {
            account_id: account_number.to_string(),
            external_order_id: self.order_id.as_ref().map(json_id),
            external_trade_id: self.id.as_ref().map(json_id),
            symbol: self.symbol.clone()?,
            side,
            order_type: OrderType::Market,
            quantity: self.quantity.unwrap_or(0),
            price: self.price,
            stop_loss: None,
            take_profit: None,
            status,
            executed_at: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

fn json_id(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Gateway messages carry a `type` discriminator and a flat payload:
/// `{"type": "fill", "symbol": "ESM5", "side": "BUY", ...}`.
fn parse_gateway_message(text: &str, account_number: &str) -> Vec<StreamEvent> {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        return vec![StreamEvent::Ignored];
    };

    match frame.get("type").and_then(|v| v.as_str()) {
        Some("fill") | Some("trade") => {
            match serde_json::from_value::<RithmicFill>(frame.clone()) {
                Ok(fill) => fill
                    .normalise(account_number)
                    .map(|e| vec![StreamEvent::Trade(e)])
                    .unwrap_or_else(|| vec![StreamEvent::Ignored]),
                Err(_) => vec![StreamEvent::Ignored],
            }
        }
        Some("position") => {
            let symbol = frame
                .get("symbol")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if symbol.is_empty() {
                return vec![StreamEvent::Ignored];
            }
            vec![StreamEvent::Position(PositionUpdate {
                account_id: account_number.to_string(),
                symbol,
                net_quantity: frame.get("netQuantity").and_then(|v| v.as_i64()).unwrap_or(0)
                    as i32,
                avg_price: frame
                    .get("avgPrice")
                    .and_then(|v| v.as_f64())
                    .and_then(|f| Decimal::try_from(f).ok()),
                updated_at: Utc::now(),
            })]
        }
        _ => vec![StreamEvent::Ignored],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fill_message() {
        let text = r#"{"type":"fill","id":"F-77","orderId":"O-12","symbol":"NQM5",
                       "side":"SELL","quantity":1,"price":20100.25,
                       "timestamp":"2025-03-01T16:00:00Z"}"#;
        let events = parse_gateway_message(text, "MFF-3");
        match &events[0] {
            StreamEvent::Trade(exec) => {
                assert_eq!(exec.external_trade_id.as_deref(), Some("F-77"));
                assert_eq!(exec.side, Side::Sell);
                assert_eq!(exec.status, TradeStatus::Filled);
            }
            other => panic!("expected trade event, got {other:?}"),
        }
    }

    #[test]
    fn test_firm_base_url_table() {
        assert!(firm_base_url(Firm::TakeprofitTrader).unwrap().contains("takeprofit"));
        assert!(firm_base_url(Firm::AlphaFutures).unwrap().contains("alpha"));
    }
}
