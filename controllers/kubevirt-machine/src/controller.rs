//! Main controller implementation.
//!
//! Builds the kube client and every collaborator of the reconciler, then runs
//! the KubevirtMachine watcher next to the metrics and probe server.

use crate::api::KubeManagementApi;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::server::{self, ServerState};
use crate::watcher::{Context, Watcher};
use crate::workload::KubeWorkloadClientFactory;
use kube::Client;
use kubevirt_client::KubevirtVmProvider;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for KubevirtMachine resources.
pub struct Controller {
    kubevirt_machine_watcher: JoinHandle<Result<(), ControllerError>>,
    server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing KubevirtMachine Controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new()?;

        let reconciler = Reconciler::new(
            Box::new(KubeManagementApi::new(client.clone())),
            Box::new(KubevirtVmProvider::new(client.clone())),
            Box::new(KubeWorkloadClientFactory),
            ReconcilerConfig::from(&config),
            metrics.clone(),
        );
        let context = Arc::new(Context::new(Arc::new(reconciler), metrics.clone(), &config));
        let watcher = Watcher::new(client, &config, context);

        let state = ServerState::new(metrics);
        let server = tokio::spawn(server::serve(config.metrics_bind_address, state.clone()));
        let kubevirt_machine_watcher = tokio::spawn(async move { watcher.watch_kubevirt_machines().await });
        state.set_ready();

        Ok(Self {
            kubevirt_machine_watcher,
            server,
        })
    }

    /// Runs until the watcher stops or a task fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("KubevirtMachine Controller running");

        tokio::select! {
            result = &mut self.kubevirt_machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("KubevirtMachine watcher panicked: {}", e)))??;
            }
            result = &mut self.server => {
                result.map_err(|e| ControllerError::Metrics(format!("metrics server panicked: {}", e)))??;
                return Err(ControllerError::Metrics("metrics server stopped".to_string()));
            }
        }

        self.server.abort();
        info!("KubevirtMachine Controller stopped");
        Ok(())
    }
}
