//! Connection helpers for the live cluster under test.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use valkey_topology::{
    Controller, ReconcileConfig, TopologySource, ValkeyClientConfig, ValkeyConnector,
};

/// Default timeout for cluster operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Address of a live node, from `VALKEY_SEED`.
pub fn seed_address() -> String {
    std::env::var("VALKEY_SEED").expect("VALKEY_SEED must name a live cluster node")
}

/// Initialize tracing for test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,valkey_topology=debug")
        .with_test_writer()
        .try_init();
}

pub fn connector() -> ValkeyConnector {
    let mut config = ValkeyClientConfig::default()
        .with_connection_timeout(Duration::from_secs(5))
        .with_command_timeout(Duration::from_secs(10));
    if let Ok(password) = std::env::var("VALKEY_PASSWORD") {
        config = config.with_password(password);
    }
    ValkeyConnector::new(config)
}

/// Controller whose desired topology is the live one.
pub async fn live_controller() -> Controller<ValkeyConnector> {
    init_tracing();
    let controller = Controller::bootstrap(
        connector(),
        ReconcileConfig::default().with_retry_interval(Duration::from_millis(500)),
        TopologySource::Host(seed_address()),
        CancellationToken::new(),
    );
    tokio::time::timeout(DEFAULT_TIMEOUT, controller)
        .await
        .expect("bootstrap timed out")
        .expect("bootstrap failed")
}
