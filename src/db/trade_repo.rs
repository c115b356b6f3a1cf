use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Trade, TradeExecution};

/// Persist a master execution. The partial unique index on
/// (account_id, external_trade_id) makes replayed executions a no-op:
/// the existing row is returned and `inserted` is false.
pub async fn insert_master_trade(
    pool: &PgPool,
    account_id: Uuid,
    copier_id: Uuid,
    exec: &TradeExecution,
) -> anyhow::Result<(Trade, bool)> {
    let inserted = sqlx::query_as::<_, Trade>(
        r#"
        INSERT INTO trades
            (account_id, copier_id, symbol, side, order_type, quantity,
             entry_price, stop_loss, take_profit, status,
             external_order_id, external_trade_id, opened_at, filled_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                CASE WHEN $10 IN ('FILLED', 'PARTIALLY_FILLED') THEN $13 END)
        ON CONFLICT (account_id, external_trade_id) WHERE external_trade_id IS NOT NULL
        DO NOTHING
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(copier_id)
    .bind(&exec.symbol)
    .bind(exec.side)
    .bind(exec.order_type)
    .bind(exec.quantity)
    .bind(exec.price)
    .bind(exec.stop_loss)
    .bind(exec.take_profit)
    .bind(exec.status)
    .bind(&exec.external_order_id)
    .bind(&exec.external_trade_id)
    .bind(exec.executed_at)
    .fetch_optional(pool)
    .await?;

    if let Some(trade) = inserted {
        return Ok((trade, true));
    }

    // Replay: the broker-assigned id already exists for this account.
    let existing = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE account_id = $1 AND external_trade_id = $2",
    )
    .bind(account_id)
    .bind(&exec.external_trade_id)
    .fetch_one(pool)
    .await?;

    Ok((existing, false))
}

/// Persist a follower execution produced by fan-out.
pub async fn insert_follower_trade(
    pool: &PgPool,
    account_id: Uuid,
    copier_id: Uuid,
    exec: &TradeExecution,
) -> anyhow::Result<Trade> {
    let trade = sqlx::query_as::<_, Trade>(
        r#"
        INSERT INTO trades
            (account_id, copier_id, symbol, side, order_type, quantity,
             entry_price, stop_loss, take_profit, status,
             external_order_id, external_trade_id, opened_at, filled_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                CASE WHEN $10 IN ('FILLED', 'PARTIALLY_FILLED') THEN $13 END)
        RETURNING *
        "#,
    )
    .bind(account_id)
    .bind(copier_id)
    .bind(&exec.symbol)
    .bind(exec.side)
    .bind(exec.order_type)
    .bind(exec.quantity)
    .bind(exec.price)
    .bind(exec.stop_loss)
    .bind(exec.take_profit)
    .bind(exec.status)
    .bind(&exec.external_order_id)
    .bind(&exec.external_trade_id)
    .bind(exec.executed_at)
    .fetch_one(pool)
    .await?;

    Ok(trade)
}

pub async fn get_trade(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Trade>> {
    let trade = sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(trade)
}

/// Ownership-scoped read through the owning account.
pub async fn get_trade_for_user(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<Option<Trade>> {
    let trade = sqlx::query_as::<_, Trade>(
        r#"
        SELECT t.* FROM trades t
        JOIN trading_accounts a ON a.id = t.account_id
        WHERE t.id = $1 AND a.user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(trade)
}

/// Open (not yet closed) trades across the user's accounts.
pub async fn list_open_trades(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Trade>> {
    let trades = sqlx::query_as::<_, Trade>(
        r#"
        SELECT t.* FROM trades t
        JOIN trading_accounts a ON a.id = t.account_id
        WHERE a.user_id = $1 AND t.closed_at IS NULL
        ORDER BY t.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(trades)
}

pub async fn list_history(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> anyhow::Result<Vec<Trade>> {
    let trades = sqlx::query_as::<_, Trade>(
        r#"
        SELECT t.* FROM trades t
        JOIN trading_accounts a ON a.id = t.account_id
        WHERE a.user_id = $1
        ORDER BY t.created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(trades)
}

/// Realised P&L summed over FILLED trades for an account within the
/// current UTC day. Feeds the daily-loss risk gate.
pub async fn daily_realized_pnl(pool: &PgPool, account_id: Uuid) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(realized_pnl), 0) FROM trades
        WHERE account_id = $1
          AND status = 'FILLED'
          AND filled_at >= date_trunc('day', NOW() AT TIME ZONE 'UTC') AT TIME ZONE 'UTC'
        "#,
    )
    .bind(account_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(Decimal::ZERO))
}

/// Signed net position per symbol from FILLED trades — seeds the
/// entry/exit classifier when a copier starts.
pub async fn net_positions(
    pool: &PgPool,
    account_id: Uuid,
) -> anyhow::Result<Vec<(String, i64)>> {
    let rows: Vec<(String, Option<i64>)> = sqlx::query_as(
        r#"
        SELECT symbol,
               SUM(CASE WHEN side = 'BUY' THEN quantity ELSE -quantity END)::BIGINT
        FROM trades
        WHERE account_id = $1 AND status = 'FILLED'
        GROUP BY symbol
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(symbol, net)| (symbol, net.unwrap_or(0)))
        .collect())
}

/// Latest fill timestamp on an account — the bounded-replay watermark
/// handed to adapters on re-subscribe.
pub async fn latest_filled_at(
    pool: &PgPool,
    account_id: Uuid,
) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let row: (Option<chrono::DateTime<chrono::Utc>>,) = sqlx::query_as(
        "SELECT MAX(filled_at) FROM trades WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}
