//! Kubernetes resource watchers.
//!
//! KubevirtMachines are reconciled through `kube_runtime::Controller`, which
//! serializes work per object and handles reconnects. Machines, Clusters and
//! KubevirtClusters are watched as secondary resources and mapped back to
//! KubevirtMachines; Clusters and Machines are additionally mirrored into
//! reflector caches that back the mappers.
//!
//! Errors returned by the reconciler are retried with a per-object Fibonacci
//! backoff kept here; the reconciler itself is stateless between calls.

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ErrorKind};
use crate::metrics::{Metrics, ReconcileResult};
use crate::reconciler::mapper::{
    cluster_to_kubevirt_machines, kubevirt_cluster_to_kubevirt_machines, machine_to_kubevirt_machine,
    StoreIndexSource,
};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crds::{Cluster, KubevirtCluster, KubevirtMachine, Machine};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::{self, reflector};
use kube_runtime::{watcher, Controller, WatchStreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }
}

/// State shared by the reconcile and error policy functions
pub struct Context {
    reconciler: Arc<Reconciler>,
    metrics: Metrics,
    backoff_min_minutes: u64,
    backoff_max_minutes: u64,
    /// Error backoff per `namespace/name`
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl Context {
    pub fn new(reconciler: Arc<Reconciler>, metrics: Metrics, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            metrics,
            backoff_min_minutes: config.backoff_min_minutes,
            backoff_max_minutes: config.backoff_max_minutes,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Next error backoff of a resource and its consecutive error count
    fn next_backoff(&self, key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(key.to_string())
                    .or_insert_with(|| BackoffState::new(self.backoff_min_minutes, self.backoff_max_minutes));
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                (Duration::from_secs(self.backoff_min_minutes * 60), 0)
            }
        }
    }

    /// Forget the error history of a resource
    fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.backoff.reset();
                state.error_count = 0;
            }
        }
    }
}

fn resource_key(machine: &KubevirtMachine) -> String {
    format!("{}/{}", machine.namespace().unwrap_or_default(), machine.name_any())
}

async fn reconcile(machine: Arc<KubevirtMachine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let started = Instant::now();
    let namespace = machine
        .namespace()
        .ok_or(ControllerError::MissingObjectKey("namespace"))?;
    let name = machine.name_any();
    let key = resource_key(&machine);
    debug!("Reconciling KubevirtMachine {}", key);

    let result = ctx.reconciler.reconcile(&namespace, &name).await;
    let observed = match &result {
        Ok(ReconcileOutcome::Done) => ReconcileResult::Success,
        Ok(ReconcileOutcome::RequeueAfter(_)) => ReconcileResult::Requeue,
        Err(_) => ReconcileResult::Error,
    };
    ctx.metrics.observe_reconcile(observed, started.elapsed());

    if result.is_ok() {
        ctx.reset_backoff(&key);
    }
    result.map(ReconcileOutcome::into_action)
}

fn error_policy(machine: Arc<KubevirtMachine>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = resource_key(&machine);
    let (delay, error_count) = ctx.next_backoff(&key);
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::Transient => warn!(
            "Reconciliation of KubevirtMachine {} failed (attempt {}), retrying in {}s: {}",
            key,
            error_count,
            delay.as_secs(),
            error
        ),
        ErrorKind::Fatal => error!(
            "Reconciliation of KubevirtMachine {} failed (attempt {}), retrying in {}s: {}",
            key,
            error_count,
            delay.as_secs(),
            error
        ),
    }
    Action::requeue(delay)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watches KubevirtMachines and the resources they depend on.
pub struct Watcher {
    context: Arc<Context>,
    kubevirt_machine_api: Api<KubevirtMachine>,
    machine_api: Api<Machine>,
    cluster_api: Api<Cluster>,
    kubevirt_cluster_api: Api<KubevirtCluster>,
    runtime_config: RuntimeConfig,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(client: Client, config: &ControllerConfig, context: Arc<Context>) -> Self {
        let namespace = config.namespace.as_deref();
        Self {
            context,
            kubevirt_machine_api: api(&client, namespace),
            machine_api: api(&client, namespace),
            cluster_api: api(&client, namespace),
            kubevirt_cluster_api: api(&client, namespace),
            runtime_config: RuntimeConfig::default()
                .debounce(config.debounce)
                .concurrency(config.concurrency),
        }
    }

    /// Run the KubevirtMachine controller until shutdown
    pub async fn watch_kubevirt_machines(&self) -> Result<(), ControllerError> {
        info!("Starting KubevirtMachine watcher");

        let (cluster_store, cluster_writer) = reflector::store::<Cluster>();
        let (machine_store, machine_writer) = reflector::store::<Machine>();
        let cluster_cache = reflector(
            cluster_writer,
            watcher(self.cluster_api.clone(), watcher::Config::default()).default_backoff(),
        )
        .touched_objects()
        .for_each(|event| async move {
            if let Err(e) = event {
                warn!("Cluster cache watch error: {}", e);
            }
        });
        let machine_cache = reflector(
            machine_writer,
            watcher(self.machine_api.clone(), watcher::Config::default()).default_backoff(),
        )
        .touched_objects()
        .for_each(|event| async move {
            if let Err(e) = event {
                warn!("Machine cache watch error: {}", e);
            }
        });

        let index = StoreIndexSource::new(cluster_store, machine_store);
        let cluster_index = index.clone();

        let controller = Controller::new(self.kubevirt_machine_api.clone(), watcher::Config::default())
            .with_config(self.runtime_config.clone())
            .watches(self.machine_api.clone(), watcher::Config::default(), |machine| {
                machine_to_kubevirt_machine(&machine)
            })
            .watches(
                self.kubevirt_cluster_api.clone(),
                watcher::Config::default(),
                move |kubevirt_cluster| kubevirt_cluster_to_kubevirt_machines(&index, &kubevirt_cluster),
            )
            .watches(self.cluster_api.clone(), watcher::Config::default(), move |cluster| {
                cluster_to_kubevirt_machines(&cluster_index, &cluster)
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.context.clone())
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => debug!("Reconciled KubevirtMachine {}: {:?}", object.name, action),
                    Err(e) => debug!("KubevirtMachine controller event: {}", e),
                }
            });

        // The caches only end with the process; the controller ends on shutdown
        tokio::select! {
            _ = controller => info!("KubevirtMachine controller shut down"),
            _ = cluster_cache => return Err(ControllerError::Watch("Cluster cache stream ended".to_string())),
            _ = machine_cache => return Err(ControllerError::Watch("Machine cache stream ended".to_string())),
        }
        Ok(())
    }
}
