pub mod adapters;
pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod services;

use std::sync::Arc;

use crate::adapters::AdapterRegistry;
use crate::config::AppConfig;
use crate::engine::CopierEngine;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: AppConfig,
    pub registry: Arc<AdapterRegistry>,
    pub engine: Arc<CopierEngine>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
