//! Account discovery and connection lifecycle.
//!
//! Platform connects are transient (connect, enumerate, disconnect) and
//! never persist on their own; importing the discovered accounts is a
//! separate, explicit step. Credential echoes expose presence booleans
//! only — credential material never leaves this module.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapters::{AccountSnapshot, AdapterRegistry, ConnectConfig};
use crate::db::account_repo::{self, NewAccount};
use crate::errors::AppError;
use crate::models::{Firm, Platform, TradingAccount};

/// Credentials as submitted by the caller for a platform-level connect.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCredentials {
    pub email: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub account_number: Option<String>,
    pub environment: Option<String>,
    pub base_url: Option<String>,
}

impl PlatformCredentials {
    fn to_connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            email: self.email.clone(),
            password: self.password.clone(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
            account_number: self.account_number.clone(),
            environment: self.environment.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

/// Secrets masked to presence flags.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEcho {
    pub has_email: bool,
    pub has_password: bool,
    pub has_api_key: bool,
    pub has_api_secret: bool,
}

impl CredentialEcho {
    fn from_credentials(creds: &PlatformCredentials) -> Self {
        Self {
            has_email: creds.email.is_some(),
            has_password: creds.password.is_some(),
            has_api_key: creds.api_key.is_some(),
            has_api_secret: creds.api_secret.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredAccount {
    pub account_number: String,
    pub name: Option<String>,
    pub balance: Decimal,
}

impl From<AccountSnapshot> for DiscoveredAccount {
    fn from(snap: AccountSnapshot) -> Self {
        Self {
            account_number: snap.account_id,
            name: snap.name,
            balance: snap.balance,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConnectSummary {
    pub firm: Firm,
    pub platform: Platform,
    pub accounts: Vec<DiscoveredAccount>,
    pub credentials: CredentialEcho,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResult {
    pub success: bool,
    pub message: String,
    pub account: Option<DiscoveredAccount>,
}

/// Connect to a platform, enumerate the reachable accounts, disconnect.
/// Nothing is persisted.
pub async fn connect_platform(
    registry: &AdapterRegistry,
    firm: Firm,
    platform: Platform,
    credentials: &PlatformCredentials,
) -> Result<PlatformConnectSummary, AppError> {
    let adapter = registry.get_adapter(platform, firm)?;
    let cfg = credentials.to_connect_config();

    adapter.connect(&cfg).await?;

    // Providers without enumeration fall back to the bound account.
    let snapshots = match adapter.get_all_accounts().await {
        Ok(accounts) => accounts,
        Err(e) => {
            tracing::debug!(error = %e, "Account enumeration failed — falling back to single snapshot");
            vec![adapter.get_account_info().await?]
        }
    };

    adapter.disconnect().await;

    Ok(PlatformConnectSummary {
        firm,
        platform,
        accounts: snapshots.into_iter().map(DiscoveredAccount::from).collect(),
        credentials: CredentialEcho::from_credentials(credentials),
    })
}

/// Import discovered accounts: upsert keyed by (user, firm, accountNumber)
/// with the supplied credentials, marked connected and synced now.
pub async fn create_accounts_from_platform(
    pool: &PgPool,
    user_id: Uuid,
    firm: Firm,
    platform: Platform,
    discovered: &[DiscoveredAccount],
    credentials: &PlatformCredentials,
) -> Result<Vec<TradingAccount>, AppError> {
    if discovered.is_empty() {
        return Err(AppError::Validation("no accounts to import".into()));
    }

    let mut imported = Vec::with_capacity(discovered.len());
    for account in discovered {
        let fields = NewAccount {
            display_name: account.name.clone(),
            current_balance: Some(account.balance),
            email: credentials.email.clone(),
            password: credentials.password.clone(),
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            ..Default::default()
        };

        let row = account_repo::upsert_from_platform(
            pool,
            user_id,
            firm,
            platform,
            &account.account_number,
            &fields,
        )
        .await
        .map_err(AppError::Internal)?;
        imported.push(row);
    }

    tracing::info!(user = %user_id, firm = %firm, count = imported.len(), "Accounts imported from platform");
    Ok(imported)
}

/// Open a session for a stored account and persist the connection flags.
/// The auth failure message lands in `error_message`; it is not retried.
pub async fn connect_account(
    pool: &PgPool,
    registry: &AdapterRegistry,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<TradingAccount, AppError> {
    let account = account_repo::get_account_for_user(pool, account_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    let adapter = registry.get_adapter(account.platform, account.firm)?;

    match adapter.connect(&ConnectConfig::from_account(&account)).await {
        Ok(()) => {
            account_repo::set_connection_state(pool, account.id, true, None).await?;

            // Refresh the live balance while the session is up.
            if let Ok(snapshot) = adapter.get_account_info().await {
                account_repo::update_balance(pool, account.id, snapshot.balance, Utc::now())
                    .await?;
            }

            let refreshed = account_repo::get_account(pool, account.id)
                .await?
                .ok_or_else(|| AppError::NotFound("account not found".into()))?;
            Ok(refreshed)
        }
        Err(e) => {
            let message = e.to_string();
            account_repo::set_connection_state(pool, account.id, false, Some(&message)).await?;
            Err(e.into())
        }
    }
}

pub async fn disconnect_account(
    pool: &PgPool,
    registry: &AdapterRegistry,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<TradingAccount, AppError> {
    let account = account_repo::get_account_for_user(pool, account_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    if let Ok(adapter) = registry.get_adapter(account.platform, account.firm) {
        adapter.disconnect().await;
    }
    account_repo::set_connection_state(pool, account.id, false, None).await?;

    let refreshed = account_repo::get_account(pool, account.id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;
    Ok(refreshed)
}

/// Transient connect → snapshot → disconnect. Returns the outcome instead
/// of failing, so the caller can render a diagnostic.
pub async fn test_connection(
    registry: &AdapterRegistry,
    firm: Firm,
    platform: Platform,
    credentials: &PlatformCredentials,
) -> TestConnectionResult {
    let adapter = match registry.get_adapter(platform, firm) {
        Ok(a) => a,
        Err(e) => {
            return TestConnectionResult {
                success: false,
                message: e.to_string(),
                account: None,
            }
        }
    };

    if let Err(e) = adapter.connect(&credentials.to_connect_config()).await {
        return TestConnectionResult {
            success: false,
            message: e.to_string(),
            account: None,
        };
    }

    let result = match adapter.get_account_info().await {
        Ok(snapshot) => TestConnectionResult {
            success: true,
            message: "connection established".into(),
            account: Some(snapshot.into()),
        },
        Err(e) => TestConnectionResult {
            success: false,
            message: e.to_string(),
            account: None,
        },
    };

    adapter.disconnect().await;
    result
}

/// Delete guard: an account referenced as master or follower cannot be
/// removed; the conflict names the referencing copiers.
pub async fn delete_account(
    pool: &PgPool,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    let account = account_repo::get_account_for_user(pool, account_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("account not found".into()))?;

    let referencing = account_repo::referencing_copier_names(pool, account.id).await?;
    if !referencing.is_empty() {
        return Err(AppError::Conflict(format!(
            "account is referenced by copier(s): {}",
            referencing.join(", ")
        )));
    }

    let deleted = account_repo::delete_account(pool, account.id, user_id).await?;
    if !deleted {
        return Err(AppError::NotFound("account not found".into()));
    }
    Ok(())
}
