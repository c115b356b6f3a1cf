//! Push-stream and polling runtimes shared by the concrete adapters.
//!
//! An adapter that received a session token attaches a WebSocket stream;
//! one that did not falls back to polling its trade-fetch endpoint. Both
//! paths emit normalised events through the adapter's broadcast channels.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::models::{PositionUpdate, TradeExecution};

use super::transport::reconnect_delay;
use super::AdapterError;

const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Upper bound on remembered external ids in the polling dedup window.
const POLL_DEDUP_CAPACITY: usize = 10_000;

/// A normalised message decoded from the vendor stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Trade(TradeExecution),
    Position(PositionUpdate),
    /// Recognised but irrelevant frame (heartbeat, ack, unknown type).
    Ignored,
}

/// Decodes one vendor text frame into events. Unknown frames map to
/// `Ignored` — the stream never fails on unrecognised input.
pub type MessageParser = Arc<dyn Fn(&str) -> Vec<StreamEvent> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Spawn the WebSocket runtime: connect, send the subscribe frames, pump
/// messages into the broadcast channels, reconnect with exponential
/// backoff while the adapter stays connected. After the attempt budget is
/// exhausted the connected flag is lowered and the task ends; the engine's
/// heartbeat observes the drop.
pub fn spawn_stream(
    ws_url: String,
    subscribe_frames: Vec<String>,
    parser: MessageParser,
    trade_tx: broadcast::Sender<TradeExecution>,
    position_tx: broadcast::Sender<PositionUpdate>,
    connected: Arc<AtomicBool>,
    reconnect: ReconnectSettings,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;

        while connected.load(Ordering::SeqCst) {
            tracing::info!(url = %ws_url, "Connecting stream...");

            match connect_async(&ws_url).await {
                Ok((ws_stream, _response)) => {
                    tracing::info!("Stream connected");
                    attempt = 0;

                    let (mut write, mut read) = ws_stream.split();

                    for frame in &subscribe_frames {
                        if let Err(e) = write.send(Message::Text(frame.clone().into())).await {
                            tracing::error!(error = %e, "Failed to send subscribe frame");
                            break;
                        }
                    }

                    let mut ping_timer = interval(PING_INTERVAL);
                    ping_timer.tick().await; // consume the immediate tick

                    loop {
                        if !connected.load(Ordering::SeqCst) {
                            return;
                        }

                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        dispatch(&parser, text.as_ref(), &trade_tx, &position_tx);
                                    }
                                    Some(Ok(Message::Ping(data))) => {
                                        if let Err(e) = write.send(Message::Pong(data)).await {
                                            tracing::warn!(error = %e, "Failed to send pong");
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        tracing::warn!("Stream server sent close frame");
                                        break;
                                    }
                                    Some(Ok(_)) => {} // Binary, Pong, Frame
                                    Some(Err(e)) => {
                                        tracing::error!(error = %e, "Stream read error");
                                        break;
                                    }
                                    None => {
                                        tracing::warn!("Stream ended");
                                        break;
                                    }
                                }
                            }
                            _ = ping_timer.tick() => {
                                if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                                    tracing::warn!(error = %e, "Failed to send ping");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stream connection failed");
                }
            }

            if !connected.load(Ordering::SeqCst) {
                return;
            }

            if attempt >= reconnect.max_attempts {
                tracing::error!(
                    attempts = attempt,
                    "Stream reconnect attempts exhausted — marking adapter disconnected"
                );
                connected.store(false, Ordering::SeqCst);
                return;
            }

            let delay = reconnect_delay(attempt, reconnect.max_delay);
            attempt += 1;
            tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting stream...");
            sleep(delay).await;
        }
    })
}

fn dispatch(
    parser: &MessageParser,
    text: &str,
    trade_tx: &broadcast::Sender<TradeExecution>,
    position_tx: &broadcast::Sender<PositionUpdate>,
) {
    for event in parser(text) {
        match event {
            StreamEvent::Trade(exec) => {
                tracing::debug!(execution = %exec, "Stream execution");
                let _ = trade_tx.send(exec);
            }
            StreamEvent::Position(pos) => {
                let _ = position_tx.send(pos);
            }
            StreamEvent::Ignored => {}
        }
    }
}

/// Spawn the polling fallback: call the adapter's trade fetch on a fixed
/// interval, emit executions not seen before (keyed by broker-assigned
/// id), stop when the adapter disconnects.
pub fn spawn_poll<F, Fut>(
    poll_interval: Duration,
    connected: Arc<AtomicBool>,
    trade_tx: broadcast::Sender<TradeExecution>,
    fetch: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<TradeExecution>, AdapterError>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        let mut seen: HashSet<String> = HashSet::new();
        let mut seen_order: VecDeque<String> = VecDeque::new();

        tracing::info!(interval_ms = poll_interval.as_millis() as u64, "Polling fallback started");

        loop {
            ticker.tick().await;

            if !connected.load(Ordering::SeqCst) {
                tracing::debug!("Polling fallback stopped (disconnected)");
                return;
            }

            let executions = match fetch().await {
                Ok(execs) => execs,
                Err(e) => {
                    tracing::warn!(error = %e, "Trade poll failed");
                    continue;
                }
            };

            for exec in executions {
                let key = dedup_key(&exec);
                if !seen.insert(key.clone()) {
                    continue;
                }
                seen_order.push_back(key);
                if seen_order.len() > POLL_DEDUP_CAPACITY {
                    if let Some(old) = seen_order.pop_front() {
                        seen.remove(&old);
                    }
                }

                tracing::debug!(execution = %exec, "Polled execution");
                let _ = trade_tx.send(exec);
            }
        }
    })
}

fn dedup_key(exec: &TradeExecution) -> String {
    if let Some(id) = &exec.external_trade_id {
        return format!("t:{id}");
    }
    if let Some(id) = &exec.external_order_id {
        return format!("o:{id}");
    }
    format!(
        "s:{}:{}:{}:{}",
        exec.account_id,
        exec.symbol,
        exec.quantity,
        exec.executed_at.timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderType, Side, TradeStatus};
    use chrono::Utc;

    fn exec(trade_id: Option<&str>, order_id: Option<&str>) -> TradeExecution {
        TradeExecution {
            account_id: "ACC-1".into(),
            external_order_id: order_id.map(String::from),
            external_trade_id: trade_id.map(String::from),
            symbol: "ES".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: 1,
            price: None,
            stop_loss: None,
            take_profit: None,
            status: TradeStatus::Filled,
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_dedup_key_prefers_trade_id() {
        let key = dedup_key(&exec(Some("T1"), Some("O1")));
        assert_eq!(key, "t:T1");

        let key = dedup_key(&exec(None, Some("O1")));
        assert_eq!(key, "o:O1");

        let key = dedup_key(&exec(None, None));
        assert!(key.starts_with("s:ACC-1:ES:1:"));
    }
}
