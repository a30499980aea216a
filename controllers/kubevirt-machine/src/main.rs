//! KubevirtMachine Controller
//!
//! Cluster API infrastructure controller that backs every KubevirtMachine with
//! a KubeVirt virtual machine: it synthesizes the node's bootstrap secret,
//! creates the VM, waits for it to boot and bootstrap over SSH, and registers
//! the node's provider ID with the workload cluster.

mod api;
mod backoff;
mod bootstrap;
mod config;
mod controller;
mod error;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod server;
mod ssh_keys;
#[cfg(test)]
mod test_utils;
mod watcher;
mod workload;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls-tls needs a process-wide crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ControllerError::InvalidConfig("failed to install rustls crypto provider".to_string()))?;

    init_tracing();

    info!("Starting KubevirtMachine Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);
    info!(
        "  Error backoff: {}m to {}m",
        config.backoff_min_minutes, config.backoff_max_minutes
    );
    info!("  Metrics address: {}", config.metrics_bind_address);
    info!("  Inject SSH user into bootstrap data: {}", config.bootstrap.inject_ssh_user);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
