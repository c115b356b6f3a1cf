//! Tradovate adapter, used by TAKEPROFIT_TRADER and MYFUNDED_FUTURES.
//!
//! REST order calls against the Tradovate v1 API; the push stream uses
//! Tradovate's SockJS-style framing (`a[...]` array frames carrying
//! entity events), normalised here to the canonical execution shape.

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
use super::transport::{probe_auth, send_json, AuthSession, SessionCore};
use super::{
    AccountSnapshot, AdapterError, AdapterIdentity, BrokerAdapter, ConnectConfig, OrderUpdate,
    TradeOrder,
};

const DEFAULT_BASE_URLS: &[&str] = &[
    "https://live.tradovateapi.com/v1",
    "https://demo.tradovateapi.com/v1",
];
const DEFAULT_WS_URL: &str = "wss://md.tradovateapi.com/v1/websocket";

/// Tradovate's own token endpoints, probed before the shared candidates.
const VENDOR_AUTH_ENDPOINTS: &[&str] = &["/auth/accesstokenrequest", "/auth/oauthtoken"];

pub struct TradovateAdapter {
    firm: Firm,
    settings: Arc<AdapterSettings>,
    core: SessionCore,
    account_number: RwLock<Option<String>>,
}

impl TradovateAdapter {
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
        if let Some(url) = self.settings.base_url_override(Platform::Tradovate) {
            candidates.push(url);
        }
        // Demo environment first when the account asks for it.
        if cfg.environment.as_deref() == Some("demo") {
            candidates.push("https://demo.tradovateapi.com/v1".to_string());
        }
        candidates.extend(DEFAULT_BASE_URLS.iter().map(|s| s.to_string()));
        candidates.dedup();
        candidates
    }

    fn ws_url(&self, token: &str) -> String {
        let base = self
            .settings
            .ws_url_override(Platform::Tradovate)
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        format!("{base}?token={token}")
    }

    fn order_type_name(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
            OrderType::Stop => "Stop",
        }
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
impl BrokerAdapter for TradovateAdapter {
    fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            firm: self.firm,
            platform: Platform::Tradovate,
        }
    }

    async fn connect(&self, cfg: &ConnectConfig) -> Result<(), AdapterError> {
        if !cfg.has_any_credentials() {
            return Err(AdapterError::Auth("no credentials supplied".into()));
        }

        self.core.teardown().await;

        let candidates = self.base_url_candidates(cfg);
        let session = probe_auth(&self.core.http, &candidates, VENDOR_AUTH_ENDPOINTS, cfg).await?;

        let account_number = cfg.account_number.clone().unwrap_or_default();
        *self.account_number.write().await = Some(account_number.clone());

        let token = session.token.clone();
        self.core.install_session(session.clone()).await;

        match token {
            Some(token) => {
                let parser: MessageParser = Arc::new({
                    let account = account_number.clone();
                    move |text| parse_socket_frame(text, &account)
                });
                // Frame 0 authorises, frame 1 requests the user sync feed.
                let subscribe_frames = vec![
                    format!("authorize\n0\n\n{token}"),
                    format!(
                        "user/syncrequest\n1\n\n{}",
                        serde_json::json!({ "accounts": [account_number] })
                    ),
                ];
                let handle = spawn_stream(
                    self.ws_url(&token),
                    subscribe_frames,
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

        tracing::info!(firm = %self.firm, account = %account_number, "Tradovate adapter connected");
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
            "accountSpec": order.account_id,
            "action": match order.side { Side::Buy => "Buy", Side::Sell => "Sell" },
            "symbol": order.symbol,
            "orderQty": order.quantity,
            "orderType": Self::order_type_name(order.order_type),
            "price": order.limit_price,
            "stopPrice": order.stop_price,
            "isAutomated": true,
        });

        let req = self.core.authed_post("/order/placeorder", &body).await?;
        let parsed = send_json(req).await?;

        if let Some(reason) = parsed.get("failureText").and_then(|v| v.as_str()) {
            return Err(AdapterError::Unexpected(reason.to_string()));
        }

        let order_id = parsed.get("orderId").and_then(|v| v.as_i64());

        Ok(TradeExecution {
            account_id: order.account_id.clone(),
            external_order_id: order_id.map(|id| id.to_string()),
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
        let req = self.core.authed_post("/order/cancelorder", &body).await?;
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
            "orderQty": updates.quantity,
            "price": updates.limit_price,
            "stopPrice": updates.stop_price,
        });
        let req = self.core.authed_post("/order/modifyorder", &body).await?;
        send_json(req).await?;
        Ok(())
    }

    async fn close_position(&self, symbol: &str, _side: Option<Side>) -> Result<(), AdapterError> {
        let account = self.bound_account().await?;
        let body = serde_json::json!({ "accountSpec": account, "symbol": symbol });
        let req = self.core.authed_post("/order/liquidateposition", &body).await?;
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
        let req = self.core.authed_get("/account/list").await?;
        let parsed = send_json(req).await?;

        let accounts: Vec<TvAccount> =
            serde_json::from_value(parsed).map_err(|e| AdapterError::Unexpected(e.to_string()))?;

        Ok(accounts.into_iter().map(TvAccount::into_snapshot).collect())
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
    account: String,
}

impl FillPoller {
    async fn fetch(&self) -> Result<Vec<TradeExecution>, AdapterError> {
        let url = format!("{}/fill/list", self.session.base_url);
        let mut req = self.http.get(&url);
        if let Some(token) = &self.session.token {
            req = req.bearer_auth(token);
        }
        let parsed = send_json(req).await?;

        let fills: Vec<TvFill> =
            serde_json::from_value(parsed).map_err(|e| AdapterError::Unexpected(e.to_string()))?;

        Ok(fills.iter().filter_map(|f| f.normalise(&self.account)).collect())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TvAccount {
    id: i64,
    name: Option<String>,
    #[serde(default)]
    balance: Option<Decimal>,
}

impl TvAccount {
    fn into_snapshot(self) -> AccountSnapshot {
        let balance = self.balance.unwrap_or(Decimal::ZERO);
        AccountSnapshot {
            account_id: self.name.clone().unwrap_or_else(|| self.id.to_string()),
            name: self.name,
            balance,
            equity: balance,
            margin_used: Decimal::ZERO,
            positions: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TvFill {
    id: Option<i64>,
    order_id: Option<i64>,
    contract_id: Option<i64>,
    #[serde(default)]
    symbol: Option<String>,
    action: Option<String>,
    qty: Option<i32>,
    price: Option<Decimal>,
    timestamp: Option<DateTime<Utc>>,
}

impl TvFill {
    fn normalise(&self, account_number: &str) -> Option<TradeExecution> {
        let side = Side::from_api_str(self.action.as_deref()?)?;
        let symbol = self
            .symbol
            .clone()
            .or_else(|| self.contract_id.map(|id| id.to_string()))?;

        Some(TradeExecution {
            account_id: account_number.to_string(),
            external_order_id: self.order_id.map(|id| id.to_string()),
            external_trade_id: self.id.map(|id| id.to_string()),
            symbol,
            side,
            order_type: OrderType::Market,
            quantity: self.qty.unwrap_or(0),
            price: self.price,
            stop_loss: None,
            take_profit: None,
            status: TradeStatus::Filled,
            executed_at: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// SockJS-style frames: `o` (open), `h` (heartbeat), `a[...]` (messages).
/// Entity events arrive as `{"e": "props", "d": {"entityType": "fill",
/// "entity": {...}}}` inside the array.
fn parse_socket_frame(text: &str, account_number: &str) -> Vec<StreamEvent> {
    let Some(rest) = text.strip_prefix('a') else {
        return vec![StreamEvent::Ignored];
    };

    let Ok(messages) = serde_json::from_str::<Vec<serde_json::Value>>(rest) else {
        return vec![StreamEvent::Ignored];
    };

    let mut events = Vec::new();
    for msg in messages {
        if msg.get("e").and_then(|v| v.as_str()) != Some("props") {
            continue;
        }
        let Some(data) = msg.get("d") else { continue };

        match data.get("entityType").and_then(|v| v.as_str()) {
            Some("fill") => {
                if let Some(entity) = data.get("entity") {
                    if let Ok(fill) = serde_json::from_value::<TvFill>(entity.clone()) {
                        if let Some(exec) = fill.normalise(account_number) {
                            events.push(StreamEvent::Trade(exec));
                        }
                    }
                }
            }
            Some("position") => {
                if let Some(entity) = data.get("entity") {
                    let symbol = entity
                        .get("symbol")
                        .and_then(|v| v.as_str())
                        .or_else(|| entity.get("contractId").and_then(|v| v.as_str()))
                        .unwrap_or_default()
                        .to_string();
                    if symbol.is_empty() {
                        continue;
                    }
                    events.push(StreamEvent::Position(PositionUpdate {
                        account_id: account_number.to_string(),
                        symbol,
                        net_quantity: entity.get("netPos").and_then(|v| v.as_i64()).unwrap_or(0)
                            as i32,
                        avg_price: entity
                            .get("netPrice")
                            .and_then(|v| v.as_f64())
                            .and_then(|f| Decimal::try_from(f).ok()),
                        updated_at: Utc::now(),
                    }));
                }
            }
            _ => {}
        }
    }

    if events.is_empty() {
        vec![StreamEvent::Ignored]
    } else {
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fill_frame() {
        let text = r#"a[{"e":"props","d":{"entityType":"fill","entity":
            {"id":42,"orderId":7,"symbol":"MESM5","action":"Sell","qty":3,
             "price":5701.5,"timestamp":"2025-03-01T15:00:00Z"}}}]"#;
        let events = parse_socket_frame(text, "TPT-9");
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Trade(exec) => {
                assert_eq!(exec.side, Side::Sell);
                assert_eq!(exec.quantity, 3);
                assert_eq!(exec.external_trade_id.as_deref(), Some("42"));
                assert_eq!(exec.account_id, "TPT-9");
            }
            other => panic!("expected trade event, got {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_and_open_frames_ignored() {
        assert!(matches!(parse_socket_frame("h", "A")[0], StreamEvent::Ignored));
        assert!(matches!(parse_socket_frame("o", "A")[0], StreamEvent::Ignored));
        assert!(matches!(
            parse_socket_frame(r#"a[{"e":"clock","d":"..."}]"#, "A")[0],
            StreamEvent::Ignored
        ));
    }
}
