//! `(platform, firm)` → adapter resolution.
//!
//! Mock mode resolves every supported pair to one shared `MockAdapter`;
//! real mode builds and caches one adapter instance per pair. Instances
//! are shared across copiers pointing at the same firm, so adapters must
//! tolerate concurrent calls once connected.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::AppConfig;
use crate::models::{Firm, Platform};

use super::mock::MockAdapter;
use super::ninjatrader::NinjaTraderAdapter;
use super::projectx::ProjectXAdapter;
use super::rithmic::RithmicAdapter;
use super::stream::ReconnectSettings;
use super::tradovate::TradovateAdapter;
use super::{AdapterError, BrokerAdapter};

/// The supported platform/firm matrix. RITHMIC is the mock/fallback route
/// for TOPSTEPX; PROJECTX is its primary real route.
pub const SUPPORTED: &[(Platform, Firm)] = &[
    (Platform::Rithmic, Firm::Topstepx),
    (Platform::Rithmic, Firm::TakeprofitTrader),
    (Platform::Rithmic, Firm::MyfundedFutures),
    (Platform::Rithmic, Firm::AlphaFutures),
    (Platform::Rithmic, Firm::Tradefy),
    (Platform::Projectx, Firm::Topstepx),
    (Platform::Tradovate, Firm::TakeprofitTrader),
    (Platform::Tradovate, Firm::MyfundedFutures),
    (Platform::Ninjatrader, Firm::TakeprofitTrader),
    (Platform::Ninjatrader, Firm::MyfundedFutures),
];

/// Shared adapter tuning, derived from the environment once at startup.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub use_real: bool,
    pub enable_discovery: bool,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub reconnect: ReconnectSettings,
    pub base_urls: HashMap<Platform, String>,
    pub ws_urls: HashMap<Platform, String>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            use_real: false,
            enable_discovery: false,
            http_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(5_000),
            reconnect: ReconnectSettings::default(),
            base_urls: HashMap::new(),
            ws_urls: HashMap::new(),
        }
    }
}

impl AdapterSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            use_real: config.use_real_adapters,
            enable_discovery: config.enable_api_discovery,
            http_timeout: Duration::from_secs(config.http_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            reconnect: ReconnectSettings {
                max_attempts: config.reconnect_max_attempts,
                max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            },
            base_urls: config.platform_base_urls.clone(),
            ws_urls: config.platform_ws_urls.clone(),
        }
    }

    pub fn base_url_override(&self, platform: Platform) -> Option<String> {
        self.base_urls.get(&platform).cloned()
    }

    pub fn ws_url_override(&self, platform: Platform) -> Option<String> {
        self.ws_urls.get(&platform).cloned()
    }
}

pub struct AdapterRegistry {
    settings: Arc<AdapterSettings>,
    mock: Arc<MockAdapter>,
    real: RwLock<HashMap<(Platform, Firm), Arc<dyn BrokerAdapter>>>,
}

impl AdapterRegistry {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            mock: Arc::new(MockAdapter::new()),
            real: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_supported(platform: Platform, firm: Firm) -> bool {
        SUPPORTED.contains(&(platform, firm))
    }

    /// Resolve the adapter for a platform/firm pair. Unmapped pairs fail
    /// with `UnknownAdapter`.
    pub fn get_adapter(
        &self,
        platform: Platform,
        firm: Firm,
    ) -> Result<Arc<dyn BrokerAdapter>, AdapterError> {
        if !Self::is_supported(platform, firm) {
            return Err(AdapterError::UnknownAdapter { platform, firm });
        }

        if !self.settings.use_real {
            return Ok(Arc::clone(&self.mock) as Arc<dyn BrokerAdapter>);
        }

        if let Some(adapter) = self.real.read().unwrap().get(&(platform, firm)) {
            return Ok(Arc::clone(adapter));
        }

        let adapter: Arc<dyn BrokerAdapter> = match platform {
            Platform::Projectx => {
                Arc::new(ProjectXAdapter::new(firm, Arc::clone(&self.settings)))
            }
            Platform::Rithmic => Arc::new(RithmicAdapter::new(firm, Arc::clone(&self.settings))),
            Platform::Tradovate => {
                Arc::new(TradovateAdapter::new(firm, Arc::clone(&self.settings)))
            }
            Platform::Ninjatrader => {
                Arc::new(NinjaTraderAdapter::new(firm, Arc::clone(&self.settings)))
            }
            Platform::Other => return Err(AdapterError::UnknownAdapter { platform, firm }),
        };

        self.real
            .write()
            .unwrap()
            .insert((platform, firm), Arc::clone(&adapter));
        Ok(adapter)
    }

    /// The shared mock instance (mock mode only) — test hooks live on it.
    pub fn mock(&self) -> Arc<MockAdapter> {
        Arc::clone(&self.mock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_matrix() {
        assert!(AdapterRegistry::is_supported(Platform::Projectx, Firm::Topstepx));
        assert!(AdapterRegistry::is_supported(Platform::Rithmic, Firm::AlphaFutures));
        assert!(AdapterRegistry::is_supported(Platform::Tradovate, Firm::MyfundedFutures));
        assert!(!AdapterRegistry::is_supported(Platform::Projectx, Firm::AlphaFutures));
        assert!(!AdapterRegistry::is_supported(Platform::Ninjatrader, Firm::Topstepx));
    }

    #[test]
    fn test_unknown_pair_fails() {
        let registry = AdapterRegistry::new(AdapterSettings::default());
        match registry.get_adapter(Platform::Ninjatrader, Firm::Tradefy) {
            Err(err) => assert!(matches!(err, AdapterError::UnknownAdapter { .. })),
            Ok(_) => panic!("expected get_adapter to fail for unsupported platform/firm pair"),
        }
    }

    #[test]
    fn test_mock_mode_shares_one_instance() {
        let registry = AdapterRegistry::new(AdapterSettings::default());
        let a = registry.get_adapter(Platform::Projectx, Firm::Topstepx).unwrap();
        let b = registry
            .get_adapter(Platform::Tradovate, Firm::TakeprofitTrader)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_real_mode_caches_per_pair() {
        let settings = AdapterSettings {
            use_real: true,
            ..Default::default()
        };
        let registry = AdapterRegistry::new(settings);
        let a = registry.get_adapter(Platform::Projectx, Firm::Topstepx).unwrap();
        let b = registry.get_adapter(Platform::Projectx, Firm::Topstepx).unwrap();
        let c = registry
            .get_adapter(Platform::Tradovate, Firm::TakeprofitTrader)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
