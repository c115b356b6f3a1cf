//! Scriptable in-memory adapter.
//!
//! Serves every registry pair in mock mode and drives the integration
//! tests: executions are injected with `emit_trade`, order placement is
//! recorded, and both connect and place can be made to fail on demand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::models::{
    Firm, Platform, PositionUpdate, Side, TradeExecution, TradeStatus,
};

use super::{
    AccountSnapshot, AdapterError, AdapterIdentity, BrokerAdapter, ConnectConfig, OrderUpdate,
    TradeOrder,
};

const CHANNEL_CAPACITY: usize = 256;

pub struct MockAdapter {
    identity: AdapterIdentity,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_next_place: AtomicBool,
    order_seq: AtomicU64,
    placed: Mutex<Vec<TradeOrder>>,
    accounts: Mutex<Vec<AccountSnapshot>>,
    trade_tx: broadcast::Sender<TradeExecution>,
    position_tx: broadcast::Sender<PositionUpdate>,
}

impl MockAdapter {
    pub fn new() -> Self {
        let (trade_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (position_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            identity: AdapterIdentity {
                firm: Firm::Topstepx,
                platform: Platform::Rithmic,
            },
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_next_place: AtomicBool::new(false),
            order_seq: AtomicU64::new(1),
            placed: Mutex::new(Vec::new()),
            accounts: Mutex::new(Vec::new()),
            trade_tx,
            position_tx,
        }
    }

    /// Inject a master execution as if it arrived on the push stream.
    pub fn emit_trade(&self, exec: TradeExecution) {
        let _ = self.trade_tx.send(exec);
    }

    pub fn emit_position(&self, update: PositionUpdate) {
        let _ = self.position_tx.send(update);
    }

    /// The next `place_order` call fails with a transport error.
    pub fn fail_next_place(&self) {
        self.fail_next_place.store(true, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Orders recorded by `place_order`, oldest first.
    pub fn placed_orders(&self) -> Vec<TradeOrder> {
        self.placed.lock().unwrap().clone()
    }

    pub fn clear_placed_orders(&self) {
        self.placed.lock().unwrap().clear();
    }

    /// Accounts returned by `get_all_accounts`.
    pub fn set_accounts(&self, accounts: Vec<AccountSnapshot>) {
        *self.accounts.lock().unwrap() = accounts;
    }

    fn default_snapshot() -> AccountSnapshot {
        AccountSnapshot {
            account_id: "MOCK-1".into(),
            name: Some("Mock Account".into()),
            balance: Decimal::from(50_000),
            equity: Decimal::from(50_000),
            margin_used: Decimal::ZERO,
            positions: Vec::new(),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAdapter for MockAdapter {
    fn identity(&self) -> AdapterIdentity {
        self.identity
    }

    async fn connect(&self, cfg: &ConnectConfig) -> Result<(), AdapterError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(AdapterError::Auth("mock auth rejection".into()));
        }
        if !cfg.has_any_credentials() {
            return Err(AdapterError::Auth("no credentials supplied".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn place_order(&self, order: &TradeOrder) -> Result<TradeExecution, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        if self.fail_next_place.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::Transport("simulated broker outage".into()));
        }

        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        self.placed.lock().unwrap().push(order.clone());

        Ok(TradeExecution {
            account_id: order.account_id.clone(),
            external_order_id: Some(format!("MOCK-O-{seq}")),
            external_trade_id: Some(format!("MOCK-T-{seq}")),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.limit_price.or(Some(Decimal::from(5_000))),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            status: TradeStatus::Filled,
            executed_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, _external_order_id: &str) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        Ok(())
    }

    async fn modify_order(
        &self,
        _external_order_id: &str,
        _updates: &OrderUpdate,
    ) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        Ok(())
    }

    async fn close_position(&self, _symbol: &str, _side: Option<Side>) -> Result<(), AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountSnapshot, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts.first().cloned().unwrap_or_else(Self::default_snapshot))
    }

    async fn get_all_accounts(&self) -> Result<Vec<AccountSnapshot>, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        let accounts = self.accounts.lock().unwrap();
        if accounts.is_empty() {
            Ok(vec![Self::default_snapshot()])
        } else {
            Ok(accounts.clone())
        }
    }

    fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecution> {
        self.trade_tx.subscribe()
    }

    fn subscribe_positions(&self) -> broadcast::Receiver<PositionUpdate> {
        self.position_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;

    fn market_order(qty: i32) -> TradeOrder {
        TradeOrder {
            account_id: "MOCK-1".into(),
            symbol: "ES".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: qty,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[tokio::test]
    async fn test_place_requires_connection() {
        let mock = MockAdapter::new();
        let err = mock.place_order(&market_order(1)).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected));
    }

    #[tokio::test]
    async fn test_fail_next_place_is_one_shot() {
        let mock = MockAdapter::new();
        mock.connect(&ConnectConfig {
            api_key: Some("k".into()),
            api_secret: Some("s".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        mock.fail_next_place();
        assert!(matches!(
            mock.place_order(&market_order(1)).await,
            Err(AdapterError::Transport(_))
        ));
        // Second call succeeds and is recorded.
        assert!(mock.place_order(&market_order(2)).await.is_ok());
        assert_eq!(mock.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_emitted_trade_reaches_subscriber() {
        let mock = MockAdapter::new();
        let mut rx = mock.subscribe_trades();

        mock.emit_trade(TradeExecution {
            account_id: "MOCK-1".into(),
            external_order_id: None,
            external_trade_id: Some("T-1".into()),
            symbol: "NQ".into(),
            side: Side::Sell,
            order_type: OrderType::Market,
            quantity: 1,
            price: None,
            stop_loss: None,
            take_profit: None,
            status: TradeStatus::Filled,
            executed_at: Utc::now(),
        });

        let received = rx.try_recv().unwrap();
        assert_eq!(received.external_trade_id.as_deref(), Some("T-1"));
    }
}
