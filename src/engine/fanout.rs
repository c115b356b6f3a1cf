//! Fan-out of one master execution to the copier's active followers.
//!
//! Every follower path owns its own try/record/log boundary: a failed
//! follower produces a failed mapping and an error audit entry without
//! touching its siblings. Replays are absorbed twice over — the master
//! trade insert dedups on the broker-assigned id, and the mapping
//! uniqueness on (master_trade_id, slave_account_id) makes a repeated
//! fan-out a no-op per follower.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use metrics::counter;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::adapters::{AdapterRegistry, ConnectConfig, TradeOrder};
use crate::db::log_repo::LogRefs;
use crate::db::{account_repo, copier_repo, log_repo, mapping_repo, trade_repo};
use crate::models::{
    Copier, CopierAccountConfig, CopierStatus, LogLevel, OrderType, Side, TradeExecution,
    TradingAccount,
};

use super::risk;
use super::scaling;

/// Classification of a master fill against the account's running net
/// position per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeIntent {
    Entry,
    Exit,
}

/// Signed per-symbol net positions for the master account, seeded from
/// persisted fills when the copier starts and advanced on every fill.
#[derive(Debug, Default)]
pub struct PositionBook {
    net: HashMap<String, i64>,
}

impl PositionBook {
    pub fn seed(positions: Vec<(String, i64)>) -> Self {
        Self {
            net: positions.into_iter().filter(|(_, n)| *n != 0).collect(),
        }
    }

    pub fn net(&self, symbol: &str) -> i64 {
        self.net.get(symbol).copied().unwrap_or(0)
    }

    /// Classify a fill and advance the book. A fill from flat, or one
    /// extending the current direction, is an entry; a fill against the
    /// open position is an exit.
    pub fn classify_and_apply(&mut self, symbol: &str, side: Side, quantity: i64) -> TradeIntent {
        let delta = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };

        let prev = self.net(symbol);
        let next = prev + delta;

        if next == 0 {
            self.net.remove(symbol);
        } else {
            self.net.insert(symbol.to_string(), next);
        }

        if prev == 0 || prev.signum() == delta.signum() {
            TradeIntent::Entry
        } else {
            TradeIntent::Exit
        }
    }
}

/// Process one execution received on the master subscription.
pub async fn handle_master_execution(
    pool: &PgPool,
    registry: &Arc<AdapterRegistry>,
    copier_id: uuid::Uuid,
    master_account: &TradingAccount,
    exec: &TradeExecution,
    book: &mut PositionBook,
) -> anyhow::Result<()> {
    // Reload for the authoritative status; a copier stopped after the
    // subscription was installed drops everything in flight.
    let Some(copier) = copier_repo::get_copier(pool, copier_id).await? else {
        return Ok(());
    };
    if copier.status != CopierStatus::Active {
        tracing::debug!(copier = %copier_id, status = %copier.status, "Copier not active — dropping execution");
        return Ok(());
    }

    // Non-fill events are order modifications/cancellations. The fan-out
    // places market orders only, so there is no resting follower order to
    // modify; when the copier opts in they are recorded for audit.
    if !exec.status.is_fill() {
        if copier.copy_modifications {
            log_repo::append(
                pool,
                copier.id,
                LogLevel::Info,
                &format!(
                    "Master order update on {}: {} ({:?})",
                    exec.symbol, exec.side, exec.status
                ),
                LogRefs::default(),
                Some(serde_json::json!({
                    "externalOrderId": exec.external_order_id,
                    "quantity": exec.quantity,
                })),
            )
            .await?;
        }
        return Ok(());
    }

    let intent = book.classify_and_apply(&exec.symbol, exec.side, exec.quantity as i64);
    match intent {
        TradeIntent::Entry if !copier.copy_entries => {
            tracing::debug!(copier = %copier.id, symbol = %exec.symbol, "Entry filtered (copyEntries=false)");
            return Ok(());
        }
        TradeIntent::Exit if !copier.copy_exits => {
            tracing::debug!(copier = %copier.id, symbol = %exec.symbol, "Exit filtered (copyExits=false)");
            return Ok(());
        }
        _ => {}
    }

    let (master_trade, inserted) =
        trade_repo::insert_master_trade(pool, master_account.id, copier.id, exec).await?;
    if inserted {
        counter!("master_fills_total").increment(1);
    } else {
        tracing::info!(
            copier = %copier.id,
            external_trade_id = ?exec.external_trade_id,
            "Replayed master execution — relying on mapping uniqueness"
        );
    }

    let configs = copier_repo::get_active_configs(pool, copier.id).await?;
    if configs.is_empty() {
        tracing::warn!(copier = %copier.id, "No active follower configs for execution");
        return Ok(());
    }

    // Followers run concurrently; completion order is undefined and one
    // failure never cancels a sibling.
    let results = join_all(configs.iter().map(|config| {
        copy_to_follower(pool, registry, &copier, master_trade.id, exec, intent, config)
    }))
    .await;

    let synced = results.iter().filter(|r| matches!(r, FollowerOutcome::Synced)).count();
    let failed = results.iter().filter(|r| matches!(r, FollowerOutcome::Failed)).count();

    log_repo::append(
        pool,
        copier.id,
        LogLevel::Info,
        &format!(
            "Copied {} {} x{} on {} to {} follower(s)",
            exec.side, exec.symbol, exec.quantity, master_account.account_number, synced
        ),
        LogRefs {
            master_trade_id: Some(master_trade.id),
            ..Default::default()
        },
        Some(serde_json::json!({
            "intent": format!("{intent:?}"),
            "synced": synced,
            "failed": failed,
            "skipped": results.len() - synced - failed,
        })),
    )
    .await?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowerOutcome {
    Synced,
    Skipped,
    Failed,
}

/// One follower path: risk gate → scaling → lazy connect → place →
/// record. Never returns an error; everything is absorbed into mappings,
/// audit entries, and logs.
async fn copy_to_follower(
    pool: &PgPool,
    registry: &Arc<AdapterRegistry>,
    copier: &Copier,
    master_trade_id: uuid::Uuid,
    exec: &TradeExecution,
    intent: TradeIntent,
    config: &CopierAccountConfig,
) -> FollowerOutcome {
    match try_copy_to_follower(pool, registry, copier, master_trade_id, exec, intent, config).await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            // Unexpected persistence failure inside the follower path.
            tracing::error!(
                error = %e,
                copier = %copier.id,
                slave_account = %config.slave_account_id,
                "Follower copy failed outside the placement boundary"
            );
            FollowerOutcome::Failed
        }
    }
}

async fn try_copy_to_follower(
    pool: &PgPool,
    registry: &Arc<AdapterRegistry>,
    copier: &Copier,
    master_trade_id: uuid::Uuid,
    exec: &TradeExecution,
    intent: TradeIntent,
    config: &CopierAccountConfig,
) -> anyhow::Result<FollowerOutcome> {
    // Idempotency: a mapping for this (master trade, follower) pair means
    // the fan-out already ran — success, nothing to place.
    if mapping_repo::exists(pool, master_trade_id, config.slave_account_id).await? {
        tracing::debug!(
            master_trade = %master_trade_id,
            slave_account = %config.slave_account_id,
            "Mapping already exists — treating replay as success"
        );
        return Ok(FollowerOutcome::Skipped);
    }

    let Some(follower) = account_repo::get_account(pool, config.slave_account_id).await? else {
        anyhow::bail!("follower account {} not found", config.slave_account_id);
    };

    // Risk gate. Exits are always allowed through: blocking a position
    // close on a loss limit would freeze the loss in place.
    if intent == TradeIntent::Entry {
        if let Err(violation) = risk::evaluate(pool, config).await? {
            counter!("risk_rejections_total").increment(1);
            let reason = violation.to_string();
            tracing::warn!(
                copier = %copier.id,
                slave_account = %follower.account_number,
                reason = %reason,
                "Risk gate rejected follower copy"
            );
            log_repo::append(
                pool,
                copier.id,
                LogLevel::Warn,
                &format!("Risk gate rejected copy to {}: {}", follower.account_number, reason),
                LogRefs {
                    master_trade_id: Some(master_trade_id),
                    slave_account_id: Some(config.slave_account_id),
                    ..Default::default()
                },
                None,
            )
            .await?;

            if config.auto_disable {
                copier_repo::disable_config(pool, config.id, &reason).await?;
                tracing::warn!(
                    copier = %copier.id,
                    slave_account = %follower.account_number,
                    "Follower auto-disabled after risk trip"
                );
            }
            return Ok(FollowerOutcome::Skipped);
        }
    }

    let balance = follower
        .current_balance
        .or(follower.nominal_size)
        .unwrap_or(Decimal::ZERO);
    let quantity = scaling::scaled_quantity(exec.quantity, config, balance);
    if quantity <= 0 {
        tracing::info!(
            copier = %copier.id,
            slave_account = %follower.account_number,
            master_qty = exec.quantity,
            "Scaled quantity is zero — skipping follower"
        );
        return Ok(FollowerOutcome::Skipped);
    }

    let order = TradeOrder {
        account_id: follower.account_number.clone(),
        symbol: exec.symbol.clone(),
        side: exec.side,
        // Fill-speed priority: followers always receive market orders.
        order_type: OrderType::Market,
        quantity,
        limit_price: None,
        stop_price: None,
        stop_loss: exec.stop_loss,
        take_profit: exec.take_profit,
    };

    let placed = place_on_follower(registry, &follower, &order).await;

    match placed {
        Ok(follower_exec) => {
            let follower_trade =
                trade_repo::insert_follower_trade(pool, follower.id, copier.id, &follower_exec)
                    .await?;

            let mapping = mapping_repo::insert_synced(
                pool,
                copier.id,
                master_trade_id,
                config.slave_account_id,
                follower_trade.id,
            )
            .await?;
            if mapping.is_none() {
                // Lost a race with a concurrent replay; the order stands
                // but the earlier mapping wins.
                tracing::warn!(
                    master_trade = %master_trade_id,
                    slave_account = %config.slave_account_id,
                    "Mapping conflict after placement — replay raced the fan-out"
                );
            }

            counter!("follower_orders_placed_total").increment(1);
            tracing::info!(
                copier = %copier.id,
                slave_account = %follower.account_number,
                quantity,
                "Follower order placed"
            );
            Ok(FollowerOutcome::Synced)
        }
        Err(e) => {
            let message = e.to_string();
            counter!("follower_orders_failed_total").increment(1);

            mapping_repo::insert_failed(
                pool,
                copier.id,
                master_trade_id,
                config.slave_account_id,
                &message,
            )
            .await?;

            log_repo::append(
                pool,
                copier.id,
                LogLevel::Error,
                &format!("Follower order failed on {}: {}", follower.account_number, message),
                LogRefs {
                    master_trade_id: Some(master_trade_id),
                    slave_account_id: Some(config.slave_account_id),
                    ..Default::default()
                },
                None,
            )
            .await?;

            tracing::error!(
                copier = %copier.id,
                slave_account = %follower.account_number,
                error = %message,
                "Follower order placement failed"
            );
            Ok(FollowerOutcome::Failed)
        }
    }
}

/// Resolve the follower's adapter, lazily connecting with the stored
/// credentials when the session is down, then place.
async fn place_on_follower(
    registry: &Arc<AdapterRegistry>,
    follower: &TradingAccount,
    order: &TradeOrder,
) -> Result<TradeExecution, crate::adapters::AdapterError> {
    let adapter = registry.get_adapter(follower.platform, follower.firm)?;

    if !adapter.is_connected() {
        adapter.connect(&ConnectConfig::from_account(follower)).await?;
    }

    adapter.place_order(order).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_buy_is_entry() {
        let mut book = PositionBook::default();
        assert_eq!(book.classify_and_apply("ES", Side::Buy, 2), TradeIntent::Entry);
        assert_eq!(book.net("ES"), 2);
    }

    #[test]
    fn test_adding_to_long_is_entry() {
        let mut book = PositionBook::seed(vec![("ES".into(), 2)]);
        assert_eq!(book.classify_and_apply("ES", Side::Buy, 1), TradeIntent::Entry);
        assert_eq!(book.net("ES"), 3);
    }

    #[test]
    fn test_selling_long_is_exit() {
        let mut book = PositionBook::seed(vec![("ES".into(), 2)]);
        assert_eq!(book.classify_and_apply("ES", Side::Sell, 2), TradeIntent::Exit);
        assert_eq!(book.net("ES"), 0);
    }

    #[test]
    fn test_buying_against_short_is_exit() {
        let mut book = PositionBook::seed(vec![("NQ".into(), -3)]);
        assert_eq!(book.classify_and_apply("NQ", Side::Buy, 1), TradeIntent::Exit);
        assert_eq!(book.net("NQ"), -2);
    }

    #[test]
    fn test_crossing_through_flat_is_exit() {
        let mut book = PositionBook::seed(vec![("ES".into(), 1)]);
        // Selling 3 against long 1 flips to short 2; the fill opposes the
        // open position, so it classifies as an exit.
        assert_eq!(book.classify_and_apply("ES", Side::Sell, 3), TradeIntent::Exit);
        assert_eq!(book.net("ES"), -2);
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut book = PositionBook::seed(vec![("ES".into(), 5)]);
        assert_eq!(book.classify_and_apply("NQ", Side::Sell, 1), TradeIntent::Entry);
        assert_eq!(book.net("ES"), 5);
        assert_eq!(book.net("NQ"), -1);
    }
}
