//! Prometheus metrics for server health.
//!
//! Exported on a side listener when `BERRYPOKER_METRICS_BIND` is set;
//! scrape at `http://<addr>/metrics`.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))
}

/// Set the current live room count.
pub fn rooms_active(count: usize) {
    metrics::gauge!("rooms_active").set(count as f64);
}

/// Count one accepted WebSocket connection.
pub fn websocket_connections_total() {
    metrics::counter!("websocket_connections_total").increment(1);
}

/// Set the current open WebSocket connection count.
pub fn websocket_connections_active(count: u64) {
    metrics::gauge!("websocket_connections_active").set(count as f64);
}

/// Count one inbound client message.
pub fn websocket_messages_received() {
    metrics::counter!("websocket_messages_received").increment(1);
}

/// Count one room created over the HTTP API.
pub fn rooms_created_total() {
    metrics::counter!("rooms_created_total").increment(1);
}
