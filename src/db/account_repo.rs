use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Firm, Platform, TradingAccount};

/// Fields for a new trading account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub display_name: Option<String>,
    pub nominal_size: Option<Decimal>,
    pub current_balance: Option<Decimal>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub max_drawdown: Option<Decimal>,
    pub daily_loss_limit: Option<Decimal>,
    pub additional_config: Option<serde_json::Value>,
}

/// Patchable fields; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    pub display_name: Option<String>,
    pub nominal_size: Option<Decimal>,
    pub current_balance: Option<Decimal>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub max_drawdown: Option<Decimal>,
    pub daily_loss_limit: Option<Decimal>,
    pub additional_config: Option<serde_json::Value>,
}

pub async fn insert_account(
    pool: &PgPool,
    user_id: Uuid,
    firm: Firm,
    platform: Platform,
    account_number: &str,
    fields: &NewAccount,
) -> Result<TradingAccount, sqlx::Error> {
    sqlx::query_as::<_, TradingAccount>(
        r#"
        INSERT INTO trading_accounts
            (user_id, firm, platform, account_number, display_name, nominal_size,
             current_balance, email, password, api_key, api_secret,
             max_drawdown, daily_loss_limit, additional_config)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(firm)
    .bind(platform)
    .bind(account_number)
    .bind(&fields.display_name)
    .bind(fields.nominal_size)
    .bind(fields.current_balance)
    .bind(&fields.email)
    .bind(&fields.password)
    .bind(&fields.api_key)
    .bind(&fields.api_secret)
    .bind(fields.max_drawdown)
    .bind(fields.daily_loss_limit)
    .bind(&fields.additional_config)
    .fetch_one(pool)
    .await
}

/// Upsert keyed by (user_id, firm, account_number) — used when importing
/// accounts discovered on a platform session.
pub async fn upsert_from_platform(
    pool: &PgPool,
    user_id: Uuid,
    firm: Firm,
    platform: Platform,
    account_number: &str,
    fields: &NewAccount,
) -> anyhow::Result<TradingAccount> {
    let account = sqlx::query_as::<_, TradingAccount>(
        r#"
        INSERT INTO trading_accounts
            (user_id, firm, platform, account_number, display_name, nominal_size,
             current_balance, email, password, api_key, api_secret,
             is_connected, last_sync_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, NOW())
        ON CONFLICT (user_id, firm, account_number) DO UPDATE SET
            display_name    = COALESCE(EXCLUDED.display_name, trading_accounts.display_name),
            current_balance = COALESCE(EXCLUDED.current_balance, trading_accounts.current_balance),
            email           = COALESCE(EXCLUDED.email, trading_accounts.email),
            password        = COALESCE(EXCLUDED.password, trading_accounts.password),
            api_key         = COALESCE(EXCLUDED.api_key, trading_accounts.api_key),
            api_secret      = COALESCE(EXCLUDED.api_secret, trading_accounts.api_secret),
            is_connected    = TRUE,
            last_sync_at    = NOW(),
            error_message   = NULL,
            updated_at      = NOW()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(firm)
    .bind(platform)
    .bind(account_number)
    .bind(&fields.display_name)
    .bind(fields.nominal_size)
    .bind(fields.current_balance)
    .bind(&fields.email)
    .bind(&fields.password)
    .bind(&fields.api_key)
    .bind(&fields.api_secret)
    .fetch_one(pool)
    .await?;

    Ok(account)
}

pub async fn get_account(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<TradingAccount>> {
    let account = sqlx::query_as::<_, TradingAccount>(
        "SELECT * FROM trading_accounts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

/// Ownership-scoped read: returns None when the account does not exist or
/// belongs to another user.
pub async fn get_account_for_user(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
) -> anyhow::Result<Option<TradingAccount>> {
    let account = sqlx::query_as::<_, TradingAccount>(
        "SELECT * FROM trading_accounts WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub async fn list_accounts(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<TradingAccount>> {
    let accounts = sqlx::query_as::<_, TradingAccount>(
        "SELECT * FROM trading_accounts WHERE user_id = $1 ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(accounts)
}

pub async fn update_account(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    patch: &AccountPatch,
) -> anyhow::Result<Option<TradingAccount>> {
    let account = sqlx::query_as::<_, TradingAccount>(
        r#"
        UPDATE trading_accounts SET
            display_name      = COALESCE($3, display_name),
            nominal_size      = COALESCE($4, nominal_size),
            current_balance   = COALESCE($5, current_balance),
            email             = COALESCE($6, email),
            password          = COALESCE($7, password),
            api_key           = COALESCE($8, api_key),
            api_secret        = COALESCE($9, api_secret),
            max_drawdown      = COALESCE($10, max_drawdown),
            daily_loss_limit  = COALESCE($11, daily_loss_limit),
            additional_config = COALESCE($12, additional_config),
            updated_at        = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(&patch.display_name)
    .bind(patch.nominal_size)
    .bind(patch.current_balance)
    .bind(&patch.email)
    .bind(&patch.password)
    .bind(&patch.api_key)
    .bind(&patch.api_secret)
    .bind(patch.max_drawdown)
    .bind(patch.daily_loss_limit)
    .bind(&patch.additional_config)
    .fetch_optional(pool)
    .await?;

    Ok(account)
}

pub async fn set_connection_state(
    pool: &PgPool,
    id: Uuid,
    is_connected: bool,
    error_message: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE trading_accounts SET
            is_connected  = $2,
            error_message = $3,
            last_sync_at  = CASE WHEN $2 THEN NOW() ELSE last_sync_at END,
            updated_at    = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(is_connected)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_balance(
    pool: &PgPool,
    id: Uuid,
    balance: Decimal,
    synced_at: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE trading_accounts SET current_balance = $2, last_sync_at = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(balance)
    .bind(synced_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Names of copiers that reference the account as master or follower.
/// A non-empty result blocks deletion.
pub async fn referencing_copier_names(
    pool: &PgPool,
    account_id: Uuid,
) -> anyhow::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT name FROM copiers WHERE master_account_id = $1
        UNION
        SELECT c.name FROM copiers c
        JOIN copier_account_configs cfg ON cfg.copier_id = c.id
        WHERE cfg.slave_account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn delete_account(pool: &PgPool, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM trading_accounts WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
