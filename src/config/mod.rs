use std::collections::HashMap;
use std::env;

use crate::models::Platform;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    /// Real vendor adapters vs. the shared mock.
    pub use_real_adapters: bool,
    /// Probe base-URL candidates for working endpoint tuples at connect.
    pub enable_api_discovery: bool,

    pub http_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_max_delay_ms: u64,
    pub heartbeat_interval_secs: u64,

    /// Per-platform base/WS URL overrides, e.g. PROJECTX_BASE_URL.
    pub platform_base_urls: HashMap<Platform, String>,
    pub platform_ws_urls: HashMap<Platform, String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut platform_base_urls = HashMap::new();
        let mut platform_ws_urls = HashMap::new();
        for (platform, prefix) in [
            (Platform::Projectx, "PROJECTX"),
            (Platform::Rithmic, "RITHMIC"),
            (Platform::Tradovate, "TRADOVATE"),
            (Platform::Ninjatrader, "NINJATRADER"),
        ] {
            if let Ok(url) = env::var(format!("{prefix}_BASE_URL")) {
                platform_base_urls.insert(platform, url);
            }
            if let Ok(url) = env::var(format!("{prefix}_WS_URL")) {
                platform_ws_urls.insert(platform, url);
            }
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,

            use_real_adapters: env_bool("USE_REAL_ADAPTERS", false),
            enable_api_discovery: env_bool("ENABLE_API_DISCOVERY", false),

            http_timeout_secs: env_u64("HTTP_TIMEOUT_SECS", 30),
            poll_interval_ms: env_u64("POLL_INTERVAL_MS", 5_000),
            reconnect_max_attempts: env_u64("RECONNECT_MAX_ATTEMPTS", 5) as u32,
            reconnect_max_delay_ms: env_u64("RECONNECT_MAX_DELAY_MS", 30_000),
            heartbeat_interval_secs: env_u64("HEARTBEAT_INTERVAL_SECS", 30),

            platform_base_urls,
            platform_ws_urls,
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
