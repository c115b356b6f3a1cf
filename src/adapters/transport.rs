//! Shared HTTP session plumbing: auth probing, endpoint discovery,
//! reconnect backoff, and the per-adapter session state every concrete
//! adapter embeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::models::{PositionUpdate, TradeExecution};

use super::{AdapterError, ConnectConfig};

/// Auth endpoint candidates, probed in order. OAuth-style platforms
/// prepend their vendor endpoints via `probe_auth`'s `vendor_endpoints`.
pub const AUTH_ENDPOINTS: &[&str] = &[
    "/auth/login",
    "/api/auth/login",
    "/v1/auth/login",
    "/login",
    "/api/login",
    "/authenticate",
    "/api/authenticate",
    "/oauth/token",
];

/// Account endpoint candidates used by endpoint discovery.
pub const ACCOUNT_ENDPOINTS: &[&str] = &[
    "/accounts",
    "/api/accounts",
    "/v1/accounts",
    "/account",
    "/api/account",
];

/// Trade-fetch endpoint candidates used by endpoint discovery and the
/// polling fallback.
pub const TRADES_ENDPOINTS: &[&str] = &[
    "/trades",
    "/api/trades",
    "/v1/trades",
    "/fills",
    "/api/fills",
    "/executions",
];

/// Stream broadcast capacity; slow subscribers lag rather than block.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialShape {
    EmailPassword,
    ApiKeySecret,
    UsernamePassword,
}

/// Credential shapes available in `cfg`, in probe order.
pub fn credential_shapes(cfg: &ConnectConfig) -> Vec<CredentialShape> {
    let mut shapes = Vec::new();
    if cfg.email.is_some() && cfg.password.is_some() {
        shapes.push(CredentialShape::EmailPassword);
    }
    if cfg.api_key.is_some() && cfg.api_secret.is_some() {
        shapes.push(CredentialShape::ApiKeySecret);
    }
    if cfg.account_number.is_some() && cfg.password.is_some() {
        shapes.push(CredentialShape::UsernamePassword);
    }
    shapes
}

pub fn auth_payload(shape: CredentialShape, cfg: &ConnectConfig) -> serde_json::Value {
    match shape {
        CredentialShape::EmailPassword => serde_json::json!({
            "email": cfg.email,
            "password": cfg.password,
        }),
        CredentialShape::ApiKeySecret => serde_json::json!({
            "apiKey": cfg.api_key,
            "apiSecret": cfg.api_secret,
        }),
        CredentialShape::UsernamePassword => serde_json::json!({
            "userName": cfg.account_number,
            "password": cfg.password,
        }),
    }
}

/// Pull a session token out of an auth response body. Vendors disagree on
/// the field name; absence is legal (the adapter falls back to polling).
pub fn extract_token(body: &serde_json::Value) -> Option<String> {
    const FIELDS: &[&str] = &["token", "accessToken", "access_token", "sessionToken", "jwt"];

    for field in FIELDS {
        if let Some(token) = body.get(field).and_then(|v| v.as_str()) {
            return Some(token.to_string());
        }
    }
    // Some platforms nest the payload under `data`.
    body.get("data")
        .and_then(|data| FIELDS.iter().find_map(|f| data.get(f).and_then(|v| v.as_str())))
        .map(String::from)
}

/// The resolved session: which base URL, endpoint, and credential shape
/// worked, plus the issued token (if any). Cached so later connects skip
/// the probe.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub base_url: String,
    pub auth_endpoint: String,
    pub shape: CredentialShape,
    pub token: Option<String>,
}

/// Probe candidate base URLs × auth endpoints × credential shapes in
/// order. 2xx wins; 4xx moves to the next endpoint once every available
/// shape was rejected; 5xx or a network failure abandons the base URL.
pub async fn probe_auth(
    http: &Client,
    base_urls: &[String],
    vendor_endpoints: &[&str],
    cfg: &ConnectConfig,
) -> Result<AuthSession, AdapterError> {
    let shapes = credential_shapes(cfg);
    if shapes.is_empty() {
        return Err(AdapterError::Auth("no credentials supplied".into()));
    }

    let mut last_transport: Option<reqwest::Error> = None;
    let mut saw_rejection = false;

    'base: for base_url in base_urls {
        let endpoints = vendor_endpoints.iter().chain(AUTH_ENDPOINTS.iter());

        for endpoint in endpoints {
            for &shape in &shapes {
                let url = format!("{base_url}{endpoint}");
                let resp = match http.post(&url).json(&auth_payload(shape, cfg)).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        // Unreachable host; abandon this base URL.
                        last_transport = Some(e);
                        continue 'base;
                    }
                };

                let status = resp.status();
                if status.is_success() {
                    let body: serde_json::Value = resp.json().await.unwrap_or_default();
                    let token = extract_token(&body);
                    tracing::debug!(
                        base_url = %base_url,
                        endpoint = %endpoint,
                        has_token = token.is_some(),
                        "Auth probe succeeded"
                    );
                    return Ok(AuthSession {
                        base_url: base_url.clone(),
                        auth_endpoint: endpoint.to_string(),
                        shape,
                        token,
                    });
                }

                if status.is_server_error() {
                    tracing::debug!(base_url = %base_url, status = %status, "Auth probe 5xx — next base URL");
                    continue 'base;
                }

                // 4xx: this combination rejected; keep probing.
                saw_rejection = true;
            }
            // All shapes rejected here; try the next endpoint.
        }
    }

    if saw_rejection {
        Err(AdapterError::Auth(
            "no credential combination accepted by any endpoint".into(),
        ))
    } else if let Some(e) = last_transport {
        Err(AdapterError::Transport(e.to_string()))
    } else {
        Err(AdapterError::Auth("no auth endpoint reachable".into()))
    }
}

/// A working endpoint tuple found by discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredEndpoints {
    pub auth: AuthSession,
    pub account_endpoint: String,
    pub trades_endpoint: String,
}

/// One-shot discovery: first base URL whose auth probe passes and whose
/// account endpoint answers 2xx with the issued credentials. Expensive;
/// callers cache the result alongside the account.
pub async fn discover_endpoints(
    http: &Client,
    base_urls: &[String],
    vendor_endpoints: &[&str],
    cfg: &ConnectConfig,
) -> Result<DiscoveredEndpoints, AdapterError> {
    let mut last_err: Option<AdapterError> = None;

    for base_url in base_urls {
        let single = std::slice::from_ref(base_url);
        let auth = match probe_auth(http, single, vendor_endpoints, cfg).await {
            Ok(a) => a,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        let account_endpoint = match probe_get(http, &auth, ACCOUNT_ENDPOINTS).await {
            Some(p) => p,
            None => {
                last_err = Some(AdapterError::Unexpected(format!(
                    "no account endpoint answered at {base_url}"
                )));
                continue;
            }
        };

        let trades_endpoint = probe_get(http, &auth, TRADES_ENDPOINTS)
            .await
            .unwrap_or_else(|| TRADES_ENDPOINTS[0].to_string());

        tracing::info!(
            base_url = %auth.base_url,
            account_endpoint = %account_endpoint,
            trades_endpoint = %trades_endpoint,
            "Endpoint discovery resolved"
        );

        return Ok(DiscoveredEndpoints {
            auth,
            account_endpoint,
            trades_endpoint,
        });
    }

    Err(last_err.unwrap_or_else(|| AdapterError::Auth("no base URL candidates".into())))
}

async fn probe_get(http: &Client, auth: &AuthSession, candidates: &[&str]) -> Option<String> {
    for path in candidates {
        let url = format!("{}{}", auth.base_url, path);
        let mut req = http.get(&url);
        if let Some(token) = &auth.token {
            req = req.bearer_auth(token);
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Some(path.to_string()),
            Ok(_) | Err(_) => continue,
        }
    }
    None
}

/// Reconnect delay: `min(1000 * 2^attempt, cap)` milliseconds.
pub fn reconnect_delay(attempt: u32, cap: Duration) -> Duration {
    let millis = 1000u64.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(millis).min(cap)
}

// ---------------------------------------------------------------------------
// SessionCore — state every concrete adapter embeds
// ---------------------------------------------------------------------------

/// Connection state shared by all concrete adapters: the HTTP client, the
/// resolved session, the live-connection flag (owned jointly with the
/// stream/poll tasks), the outbound broadcast channels, and the task
/// handles torn down on disconnect.
pub struct SessionCore {
    pub http: Client,
    session: RwLock<Option<AuthSession>>,
    connected: Arc<AtomicBool>,
    trade_tx: broadcast::Sender<TradeExecution>,
    position_tx: broadcast::Sender<PositionUpdate>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionCore {
    pub fn new(http_timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(http_timeout)
            .build()
            .unwrap_or_default();

        let (trade_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (position_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            http,
            session: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            trade_tx,
            position_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn install_session(&self, session: AuthSession) {
        *self.session.write().await = Some(session);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub async fn session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn require_session(&self) -> Result<AuthSession, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        self.session().await.ok_or(AdapterError::NotConnected)
    }

    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn trade_sender(&self) -> broadcast::Sender<TradeExecution> {
        self.trade_tx.clone()
    }

    pub fn position_sender(&self) -> broadcast::Sender<PositionUpdate> {
        self.position_tx.clone()
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecution> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_positions(&self) -> broadcast::Receiver<PositionUpdate> {
        self.position_tx.subscribe()
    }

    pub async fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Abort stream/poll tasks and drop the session. Safe to call twice.
    pub async fn teardown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        *self.session.write().await = None;
    }

    /// Bearer-authenticated GET against the resolved base URL.
    pub async fn authed_get(&self, path: &str) -> Result<RequestBuilder, AdapterError> {
        let session = self.require_session().await?;
        let mut req = self.http.get(format!("{}{}", session.base_url, path));
        if let Some(token) = &session.token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    /// Bearer-authenticated JSON POST against the resolved base URL.
    pub async fn authed_post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<RequestBuilder, AdapterError> {
        let session = self.require_session().await?;
        let mut req = self.http.post(format!("{}{}", session.base_url, path)).json(body);
        if let Some(token) = &session.token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }
}

/// Send a request, mapping non-2xx to the adapter error taxonomy and the
/// body to JSON (null when the vendor returns an empty body).
pub async fn send_json(req: RequestBuilder) -> Result<serde_json::Value, AdapterError> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(status_error(status, &resp.text().await.unwrap_or_default()));
    }
    Ok(resp.json().await.unwrap_or(serde_json::Value::Null))
}

/// Map a non-2xx order-call response to the adapter error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> AdapterError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AdapterError::Auth(format!("session rejected ({status})"))
    } else {
        AdapterError::Unexpected(format!("{status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_series() {
        let cap = Duration::from_millis(30_000);
        assert_eq!(reconnect_delay(0, cap), Duration::from_millis(1_000));
        assert_eq!(reconnect_delay(1, cap), Duration::from_millis(2_000));
        assert_eq!(reconnect_delay(2, cap), Duration::from_millis(4_000));
        assert_eq!(reconnect_delay(4, cap), Duration::from_millis(16_000));
        // Capped from attempt 5 on.
        assert_eq!(reconnect_delay(5, cap), Duration::from_millis(30_000));
        assert_eq!(reconnect_delay(20, cap), Duration::from_millis(30_000));
    }

    #[test]
    fn test_credential_shape_order() {
        let cfg = ConnectConfig {
            email: Some("a@b.c".into()),
            password: Some("pw".into()),
            api_key: Some("k".into()),
            api_secret: Some("s".into()),
            account_number: Some("ACC-1".into()),
            ..Default::default()
        };
        assert_eq!(
            credential_shapes(&cfg),
            vec![
                CredentialShape::EmailPassword,
                CredentialShape::ApiKeySecret,
                CredentialShape::UsernamePassword,
            ]
        );

        let key_only = ConnectConfig {
            api_key: Some("k".into()),
            api_secret: Some("s".into()),
            ..Default::default()
        };
        assert_eq!(credential_shapes(&key_only), vec![CredentialShape::ApiKeySecret]);

        assert!(credential_shapes(&ConnectConfig::default()).is_empty());
    }

    #[test]
    fn test_extract_token_variants() {
        let flat = serde_json::json!({"token": "t1"});
        assert_eq!(extract_token(&flat).as_deref(), Some("t1"));

        let camel = serde_json::json!({"accessToken": "t2"});
        assert_eq!(extract_token(&camel).as_deref(), Some("t2"));

        let nested = serde_json::json!({"data": {"sessionToken": "t3"}});
        assert_eq!(extract_token(&nested).as_deref(), Some("t3"));

        let none = serde_json::json!({"ok": true});
        assert_eq!(extract_token(&none), None);
    }
}
