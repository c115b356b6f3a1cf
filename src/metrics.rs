use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Set up the Prometheus recorder and seed the copier metrics at zero so
/// every series exists from the first scrape, not from the first fill.
///
/// The global recorder can only be installed once per process; when a
/// second caller (typically a test binary) races it, fall back to a
/// detached recorder whose handle still renders.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle());

    counter!("master_fills_total").absolute(0);
    counter!("follower_orders_placed_total").absolute(0);
    counter!("follower_orders_failed_total").absolute(0);
    counter!("risk_rejections_total").absolute(0);

    gauge!("copiers_active").set(0.0);

    // Touch the fan-out histogram once so the buckets are present before
    // any copier starts.
    histogram!("fanout_latency_seconds").record(0.0);

    handle
}
