//! ProjectX gateway adapter — the primary real adapter for TOPSTEPX.
//!
//! REST order calls against the ProjectX gateway API, push stream over the
//! user hub WebSocket with the session token in the query string.

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
use super::transport::{discover_endpoints, probe_auth, status_error, SessionCore};
use super::{
    AccountSnapshot, AdapterError, AdapterIdentity, BrokerAdapter, ConnectConfig, OrderUpdate,
    TradeOrder,
};

const DEFAULT_BASE_URLS: &[&str] = &["https://gateway.projectx.com"];
const TOPSTEPX_BASE_URL: &str = "https://api.topstepx.com";
const DEFAULT_WS_URL: &str = "wss://rtc.topstepx.com/hubs/user";

/// Vendor auth endpoints probed before the shared candidates.
const VENDOR_AUTH_ENDPOINTS: &[&str] = &["/api/Auth/loginKey", "/api/Auth/login"];

// ProjectX numeric order codes.
const PX_TYPE_LIMIT: i32 = 1;
const PX_TYPE_MARKET: i32 = 2;
const PX_TYPE_STOP: i32 = 4;
const PX_SIDE_BUY: i32 = 0;
const PX_SIDE_SELL: i32 = 1;

pub struct ProjectXAdapter {
    firm: Firm,
    settings: Arc<AdapterSettings>,
    core: SessionCore,
    /// Vendor account number bound at connect; used by snapshot and polling.
    account_number: RwLock<Option<String>>,
}

impl ProjectXAdapter {
    pub fn new(firm: Firm, settings: Arc<AdapterSettings>) -> Self {
        let core = SessionCore::new(settings.http_timeout);
        Self {
            firm,
            settings,
            core,
            account_number: RwLock::new(None),
        }
    }

    fn base_url_candidates(&self, cfg: &ConnectConfig) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(url) = &cfg.base_url {
            candidates.push(url.clone());
        }
        if let Some(url) = self.settings.base_url_override(Platform::Projectx) {
            candidates.push(url);
        }
        if self.firm == Firm::Topstepx {
            candidates.push(TOPSTEPX_BASE_URL.to_string());
        }
        candidates.extend(DEFAULT_BASE_URLS.iter().map(|s| s.to_string()));
        candidates.dedup();
        candidates
    }

    fn ws_url(&self, token: &str) -> String {
        let base = self
            .settings
            .ws_url_override(Platform::Projectx)
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        format!("{base}?access_token={token}")
    }

    fn subscribe_frames(account_number: &str) -> Vec<String> {
        // One subscribe frame per channel, SignalR-invocation shaped.
        ["trades", "positions", "account"]
            .iter()
            .map(|channel| {
                serde_json::json!({
                    "type": "subscribe",
                    "channel": channel,
                    "accountId": account_number,
                })
                .to_string()
            })
            .collect()
    }

    fn order_type_code(order_type: OrderType) -> i32 {
        match order_type {
            OrderType::Limit => PX_TYPE_LIMIT,
            OrderType::Market => PX_TYPE_MARKET,
            OrderType::Stop => PX_TYPE_STOP,
        }
    }

    async fn bound_account(&self) -> Result<String, AdapterError> {
        self.account_number
            .read()
            .await
            .clone()
            .ok_or(AdapterError::NotConnected)
    }

    async fn fetch_trades(&self, account_number: &str) -> Result<Vec<TradeExecution>, AdapterError> {
        let body = serde_json::json!({ "accountId": account_number });
        let resp = self
            .core
            .authed_post("/api/Trade/search", &body)
            .await?
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }

        let parsed: PxTradeSearchResponse = resp.json().await?;
        Ok(parsed
            .trades
            .iter()
            .filter_map(|t| t.normalise(account_number))
            .collect())
    }
}

#[async_trait]
impl BrokerAdapter for ProjectXAdapter {
    fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            firm: self.firm,
            platform: Platform::Projectx,
        }
    }

    async fn connect(&self, cfg: &ConnectConfig) -> Result<(), AdapterError> {
        if !cfg.has_any_credentials() {
            return Err(AdapterError::Auth("no credentials supplied".into()));
        }

        // Replace any previous session.
        self.core.teardown().await;

        let candidates = self.base_url_candidates(cfg);
        let session = if self.settings.enable_discovery {
            discover_endpoints(&self.core.http, &candidates, VENDOR_AUTH_ENDPOINTS, cfg)
                .await?
                .auth
        } else {
            probe_auth(&self.core.http, &candidates, VENDOR_AUTH_ENDPOINTS, cfg).await?
        };

        let account_number = cfg.account_number.clone().unwrap_or_default();
        *self.account_number.write().await = Some(account_number.clone());

        let token = session.token.clone();
        self.core.install_session(session).await;

        match token {
            Some(token) => {
                let parser: MessageParser = Arc::new({
                    let account = account_number.clone();
                    move |text| parse_stream_message(text, &account)
                });
                let handle = spawn_stream(
                    self.ws_url(&token),
                    Self::subscribe_frames(&account_number),
                    parser,
                    self.core.trade_sender(),
                    self.core.position_sender(),
                    self.core.connected_flag(),
                    self.settings.reconnect.clone(),
                );
                self.core.track_task(handle).await;
            }
            None => {
                // No token issued: poll the trade-search endpoint instead.
                let adapter = ProjectXPoller {
                    core_http: self.core.http.clone(),
                    session: self.core.session().await,
                    account: account_number.clone(),
                };
                let handle = spawn_poll(
                    self.settings.poll_interval,
                    self.core.connected_flag(),
                    self.core.trade_sender(),
                    move || {
                        let poller = adapter.clone();
                        async move { poller.fetch().await }
                    },
                );
                self.core.track_task(handle).await;
            }
        }

        tracing::info!(firm = %self.firm, account = %account_number, "ProjectX adapter connected");
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
            "contractId": order.symbol,
            "type": Self::order_type_code(order.order_type),
            "side": match order.side { Side::Buy => PX_SIDE_BUY, Side::Sell => PX_SIDE_SELL },
            "size": order.quantity,
            "limitPrice": order.limit_price,
            "stopPrice": order.stop_price,
        });

        let resp = self.core.authed_post("/api/Order/place", &body).await?.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }

        let parsed: PxOrderResponse = resp.json().await?;
        if !parsed.success {
            return Err(AdapterError::Unexpected(
                parsed.error_message.unwrap_or_else(|| "order rejected".into()),
            ));
        }

        Ok(TradeExecution {
            account_id: order.account_id.clone(),
            external_order_id: parsed.order_id.map(|id| id.to_string()),
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
        let resp = self.core.authed_post("/api/Order/cancel", &body).await?.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn modify_order(
        &self,
        external_order_id: &str,
        updates: &OrderUpdate,
    ) -> Result<(), AdapterError> {
        let body = serde_json::json!({
            "orderId": external_order_id,
            "size": updates.quantity,
            "limitPrice": updates.limit_price,
            "stopPrice": updates.stop_price,
        });
        let resp = self.core.authed_post("/api/Order/modify", &body).await?.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    async fn close_position(&self, symbol: &str, _side: Option<Side>) -> Result<(), AdapterError> {
        let account = self.bound_account().await?;
        let body = serde_json::json!({ "accountId": account, "contractId": symbol });
        let resp = self
            .core
            .authed_post("/api/Position/closeContract", &body)
            .await?
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }
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
        let body = serde_json::json!({ "onlyActiveAccounts": true });
        let resp = self
            .core
            .authed_post("/api/Account/search", &body)
            .await?
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }

        let parsed: PxAccountSearchResponse = resp.json().await?;
        Ok(parsed.accounts.into_iter().map(PxAccount::into_snapshot).collect())
    }

    fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecution> {
        self.core.subscribe_trades()
    }

    fn subscribe_positions(&self) -> broadcast::Receiver<PositionUpdate> {
        self.core.subscribe_positions()
    }
}

/// Cloneable capture for the polling task.
#[derive(Clone)]
struct ProjectXPoller {
    core_http: reqwest::Client,
    session: Option<super::transport::AuthSession>,
    account: String,
}

impl ProjectXPoller {
    async fn fetch(&self) -> Result<Vec<TradeExecution>, AdapterError> {
        let session = self.session.as_ref().ok_or(AdapterError::NotConnected)?;
        let url = format!("{}/api/Trade/search", session.base_url);
        let mut req = self
            .core_http
            .post(&url)
            .json(&serde_json::json!({ "accountId": self.account }));
        if let Some(token) = &session.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &resp.text().await.unwrap_or_default()));
        }

        let parsed: PxTradeSearchResponse = resp.json().await?;
        Ok(parsed
            .trades
            .iter()
            .filter_map(|t| t.normalise(&self.account))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PxOrderResponse {
    success: bool,
    order_id: Option<i64>,
    #[allow(dead_code)]
    error_code: Option<i32>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PxAccountSearchResponse {
    #[serde(default)]
    accounts: Vec<PxAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PxAccount {
    id: serde_json::Value,
    name: Option<String>,
    balance: Option<Decimal>,
    #[serde(default)]
    equity: Option<Decimal>,
    #[serde(default)]
    margin_used: Option<Decimal>,
}

impl PxAccount {
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
struct PxTradeSearchResponse {
    #[serde(default)]
    trades: Vec<PxTrade>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PxTrade {
    id: Option<i64>,
    order_id: Option<i64>,
    contract_id: Option<String>,
    side: Option<i32>,
    size: Option<i32>,
    price: Option<Decimal>,
    creation_timestamp: Option<DateTime<Utc>>,
}

impl PxTrade {
    fn normalise(&self, account_number: &str) -> Option<TradeExecution> {
        let side = match self.side? {
            PX_SIDE_BUY => Side::Buy,
            PX_SIDE_SELL => Side::Sell,
            _ => return None,
        };

        Some(TradeExecution {
            account_id: account_number.to_string(),
            external_order_id: self.order_id.map(|id| id.to_string()),
            external_trade_id: self.id.map(|id| id.to_string()),
            symbol: self.contract_id.clone()?,
            side,
            order_type: OrderType::Market,
            quantity: self.size.unwrap_or(0),
            price: self.price,
            stop_loss: None,
            take_profit: None,
            status: TradeStatus::Filled,
            executed_at: self.creation_timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// Gateway stream frames: `{"type": "GatewayUserTrade", "data": {...}}`.
/// Unknown types are ignored.
fn parse_stream_message(text: &str, account_number: &str) -> Vec<StreamEvent> {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        return vec![StreamEvent::Ignored];
    };

    let frame_type = frame
        .get("type")
        .or_else(|| frame.get("event"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    match frame_type {
        "GatewayUserTrade" | "trade" => {
            let Some(data) = frame.get("data") else {
                return vec![StreamEvent::Ignored];
            };
            match serde_json::from_value::<PxTrade>(data.clone()) {
                Ok(trade) => trade
                    .normalise(account_number)
                    .map(StreamEvent::Trade)
                    .map(|e| vec![e])
                    .unwrap_or_else(|| vec![StreamEvent::Ignored]),
                Err(_) => vec![StreamEvent::Ignored],
            }
        }
        "GatewayUserPosition" | "position" => {
            let Some(data) = frame.get("data") else {
                return vec![StreamEvent::Ignored];
            };
            let symbol = data
                .get("contractId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if symbol.is_empty() {
                return vec![StreamEvent::Ignored];
            }
            // PositionType: 1 = long, 2 = short.
            let size = data.get("size").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            let net_quantity = match data.get("type").and_then(|v| v.as_i64()) {
                Some(2) => -size,
                _ => size,
            };
            vec![StreamEvent::Position(PositionUpdate {
                account_id: account_number.to_string(),
                symbol,
                net_quantity,
                avg_price: data
                    .get("averagePrice")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok()),
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
    fn test_parse_gateway_trade_frame() {
        let text = r#"{
            "type": "GatewayUserTrade",
            "data": {"id": 991, "orderId": 551, "contractId": "CON.F.US.EP.M25",
                     "side": 0, "size": 2, "price": 5000.25,
                     "creationTimestamp": "2025-03-01T14:30:00Z"}
        }"#;
        let events = parse_stream_message(text, "TSX-1");
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Trade(exec) => {
                assert_eq!(exec.account_id, "TSX-1");
                assert_eq!(exec.external_trade_id.as_deref(), Some("991"));
                assert_eq!(exec.side, Side::Buy);
                assert_eq!(exec.quantity, 2);
                assert_eq!(exec.status, TradeStatus::Filled);
            }
            other => panic!("expected trade event, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_frame_ignored() {
        let events = parse_stream_message(r#"{"type": "GatewayUserDepth", "data": {}}"#, "TSX-1");
        assert!(matches!(events[0], StreamEvent::Ignored));

        let events = parse_stream_message("not json", "TSX-1");
        assert!(matches!(events[0], StreamEvent::Ignored));
    }

    #[test]
    fn test_short_position_frame_sign() {
        let text = r#"{
            "type": "GatewayUserPosition",
            "data": {"contractId": "CON.F.US.EP.M25", "type": 2, "size": 3}
        }"#;
        let events = parse_stream_message(text, "TSX-1");
        match &events[0] {
            StreamEvent::Position(pos) => assert_eq!(pos.net_quantity, -3),
            other => panic!("expected position event, got {other:?}"),
        }
    }
}
