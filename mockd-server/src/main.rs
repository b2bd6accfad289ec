//! Thin binary standing up the mock server stack against a built-in
//! demo configuration and running until interrupted. Not a CLI —
//! there is no flag parsing here, just enough wiring to exercise the
//! stack manually or from an integration test that execs this binary.

use std::time::Duration;

use mockd_server::{MockdConfig, MockdStack};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = MockdConfig::default();
    let stack = match MockdStack::new(&config) {
        Ok(stack) => stack,
        Err(err) => {
            tracing::error!(%err, "failed to build mock server stack");
            std::process::exit(1);
        }
    };

    if let Err(err) = stack.start(0).await {
        tracing::error!(%err, "failed to start mock server stack");
        std::process::exit(1);
    }

    if let Some(addr) = stack.metrics_address() {
        tracing::info!(%addr, "metrics available at /metrics");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    stack.stop(Duration::from_secs(10)).await;
}
