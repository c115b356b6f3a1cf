//! NinjaTrader adapter, used by TAKEPROFIT_TRADER and MYFUNDED_FUTURES.
//!
//! Firms expose NinjaTrader accounts through a REST bridge; order calls
//! are JSON POSTs, executions arrive on a WebSocket hub or, without a
//! token, through the executions polling endpoint.

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

const DEFAULT_BASE_URLS: &[&str] = &["https://api.ninjatrader.com", "https://gw.ninjatrader.com"];
const DEFAULT_WS_URL: &str = "wss://stream.ninjatrader.com/hub";

pub struct NinjaTraderAdapter {
    firm: Firm,
    settings: Arc<AdapterSettings>,
    core: SessionCore,
    account_number: RwLock<Option<String>>,
}

impl NinjaTraderAdapter {
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
        if let Some(url) = self.settings.base_url_override(Platform::Ninjatrader) {
            candidates.push(url);
        }
        candidates.extend(DEFAULT_BASE_URLS.iter().map(|s| s.to_string()));
        candidates.dedup();
        candidates
    }

    fn ws_url(&self, token: &str) -> String {
        let base = self
            .settings
            .ws_url_override(Platform::Ninjatrader)
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        format!("{base}?access_token={token}")
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
impl BrokerAdapter for NinjaTraderAdapter {
    fn identity(&self) -> AdapterIdentity {
        AdapterIdentity {
            firm: self.firm,
            platform: Platform::Ninjatrader,
        }
    }

    async fn connect(&self, cfg: &ConnectConfig) -> Result<(), AdapterError> {
        if !cfg.has_any_credentials() {
            return Err(AdapterError::Auth("no credentials supplied".into()));
        }

        self.core.teardown().await;

        let candidates = self.base_url_candidates(cfg);
        let session = probe_auth(&self.core.http, &candidates, &[], cfg).await?;

        let account_number = cfg.account_number.clone().unwrap_or_default();
        *self.account_number.write().await = Some(account_number.clone());

        let token = session.token.clone();
        self.core.install_session(session.clone()).await;

        match token {
            Some(token) => {
                let subscribe_frame = serde_json::json!({
                    "op": "subscribe",
                    "account": account_number,
                    "streams": ["executions", "positions", "account"],
                })
                .to_string();

                let parser: MessageParser = Arc::new({
                    let account = account_number.clone();
                    move |text| parse_hub_message(text, &account)
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
                let poller = ExecutionPoller {
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

        tracing::info!(firm = %self.firm, account = %account_number, "NinjaTrader adapter connected");
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
            "account": order.account_id,
            "instrument": order.symbol,
            "action": order.side.to_string(),
            "quantity": order.quantity,
            "orderType": order.order_type.to_string(),
            "limitPrice": order.limit_price,
            "stopPrice": order.stop_price,
        });

        let req = self.core.authed_post("/api/orders", &body).await?;
        let parsed = send_json(req).await?;

        if let Some(err) = parsed.get("error").and_then(|v| v.as_str()) {
            return Err(AdapterError::Unexpected(err.to_string()));
        }

        let order_id = parsed
            .get("orderId")
            .or_else(|| parsed.get("id"))
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
        let req = self.core.authed_post("/api/orders/cancel", &body).await?;
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
        let req = self.core.authed_post("/api/orders/modify", &body).await?;
        send_json(req).await?;
        Ok(())
    }

    async fn close_position(&self, symbol: &str, side: Option<Side>) -> Result<(), AdapterError> {
        let account = self.bound_account().await?;
        let body = serde_json::json!({
            "account": account,
            "instrument": symbol,
            "side": side.map(|s| s.to_string()),
        });
        let req = self.core.authed_post("/api/positions/close", &body).await?;
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
        let req = self.core.authed_get("/api/accounts").await?;
        let parsed = send_json(req).await?;

        let list = parsed.get("accounts").cloned().unwrap_or(parsed);
        let accounts: Vec<NtAccount> =
            serde_json::from_value(list).map_err(|e| AdapterError::Unexpected(e.to_string()))?;

        Ok(accounts.into_iter().map(NtAccount::into_snapshot).collect())
    }

    fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecution> {
        self.core.subscribe_trades()
    }

    fn subscribe_positions(&self) -> broadcast::Receiver<PositionUpdate> {
        self.core.subscribe_positions()
    }
}

#[derive(Clone)]
struct ExecutionPoller {
    http: reqwest::Client,
    session: AuthSession,
    account: String,
}

impl ExecutionPoller {
    async fn fetch(&self) -> Result<Vec<TradeExecution>, AdapterError> {
        let url = format!(
            "{}/api/executions?account={}",
            self.session.base_url, self.account
        );
        let mut req = self.http.get(&url);
        if let Some(token) = &self.session.token {
            req = req.bearer_auth(token);
        }
        let parsed = send_json(req).await?;

        let list = parsed.get("executions").cloned().unwrap_or(parsed);
        let executions: Vec<NtExecution> =
            serde_json::from_value(list).map_err(|e| AdapterError::Unexpected(e.to_string()))?;

        Ok(executions
            .iter()
            .filter_map(|e| e.normalise(&self.account))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NtAccount {
    #[serde(alias = "accountName", alias = "account")]
    name: String,
    display_name: Option<String>,
    cash_value: Option<Decimal>,
    #[serde(default)]
    net_liquidation: Option<Decimal>,
    #[serde(default)]
    initial_margin: Option<Decimal>,
}

impl NtAccount {
    fn into_snapshot(self) -> AccountSnapshot {
        let balance = self.cash_value.unwrap_or(Decimal::ZERO);
        AccountSnapshot {
            account_id: self.name,
            name: self.display_name,
            equity: self.net_liquidation.unwrap_or(balance),
            margin_used: self.initial_margin.unwrap_or(Decimal::ZERO),
            balance,
            positions: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NtExecution {
    #[serde(alias = "executionId")]
    id: Option<String>,
    order_id: Option<String>,
    instrument: Option<String>,
    #[serde(alias = "action")]
    side: Option<String>,
    quantity: Option<i32>,
    price: Option<Decimal>,
    #[serde(alias = "state")]
    status: Option<String>,
    time: Option<DateTime<Utc>>,
}

impl NtExecution {
    fn normalise(&self, account_number: &str) -> Option<TradeExecution> {
        let side = Side::from_api_str(self.side.as_deref()?)?;
        let status = self
            .status
            .as_deref()
            .and_then(TradeStatus::from_api_str)
            .unwrap_or(TradeStatus::Filled);

        Some(TradeExecution {
            account_id: account_number.to_string(),
            external_order_id: self.order_id.clone(),
            external_trade_id: self.id.clone(),
            symbol: self.instrument.clone()?,
            side,
            order_type: OrderType::Market,
            quantity: self.quantity.unwrap_or(0),
            price: self.price,
            stop_loss: None,
            take_profit: None,
            status,
            executed_at: self.time.unwrap_or_else(Utc::now),
        })
    }
}

/// Hub messages: `{"event": "execution", "data": {...}}`. Unknown events
/// are ignored.
fn parse_hub_message(text: &str, account_number: &str) -> Vec<StreamEvent> {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        return vec![StreamEvent::Ignored];
    };

    let Some(data) = frame.get("data") else {
        return vec![StreamEvent::Ignored];
    };

    match frame.get("event").and_then(|v| v.as_str()) {
        Some("execution") => match serde_json::from_value::<NtExecution>(data.clone()) {
            Ok(exec) => exec
                .normalise(account_number)
                .map(|e| vec![StreamEvent::Trade(e)])
                .unwrap_or_else(|| vec![StreamEvent::Ignored]),
            Err(_) => vec![StreamEvent::Ignored],
        },
        Some("position") => {
            let symbol = data
                .get("instrument")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if symbol.is_empty() {
                return vec![StreamEvent::Ignored];
            }
            vec![StreamEvent::Position(PositionUpdate {
                account_id: account_number.to_string(),
                symbol,
                net_quantity: data.get("quantity").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
                avg_price: data
                    .get("averagePrice")
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
    fn test_parse_execution_event() {
        let text = r#"{"event":"execution","data":
            {"executionId":"E-5","orderId":"O-2","instrument":"ES 06-25",
             "action":"Buy","quantity":2,"price":5002.75,"state":"Filled",
             "time":"2025-03-01T17:00:00Z"}}"#;
        let events = parse_hub_message(text, "NT-1");
        match &events[0] {
            StreamEvent::Trade(exec) => {
                assert_eq!(exec.symbol, "ES 06-25");
                assert_eq!(exec.quantity, 2);
                assert_eq!(exec.side, Side::Buy);
            }
            other => panic!("expected trade event, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_ignored() {
        let events = parse_hub_message(r#"{"event":"marketData","data":{}}"#, "NT-1");
        assert!(matches!(events[0], StreamEvent::Ignored));
    }
}
