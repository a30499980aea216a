//! Watch mappers
//!
//! Translate changes to Machines, Clusters and KubevirtClusters into the
//! KubevirtMachines that have to be reconciled again. Lookups go through
//! reflector caches, so mapping is synchronous and yields nothing on a miss.

use crds::{
    find_capi_owner, has_paused_annotation, Cluster, KubevirtCluster, KubevirtMachine, Machine, CLUSTER_NAME_LABEL,
};
use kube::ResourceExt;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;
use tracing::debug;

const KUBEVIRT_MACHINE_KIND: &str = "KubevirtMachine";
const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Cached Clusters and Machines consulted by the mappers
pub trait MachineIndexSource: Send + Sync {
    /// Cluster `namespace/name`
    fn cluster(&self, namespace: &str, name: &str) -> Option<Arc<Cluster>>;

    /// Machines labelled with the cluster name
    fn cluster_machines(&self, namespace: &str, cluster_name: &str) -> Vec<Arc<Machine>>;
}

/// `MachineIndexSource` over reflector stores
#[derive(Clone)]
pub struct StoreIndexSource {
    clusters: Store<Cluster>,
    machines: Store<Machine>,
}

impl StoreIndexSource {
    pub fn new(clusters: Store<Cluster>, machines: Store<Machine>) -> Self {
        Self { clusters, machines }
    }
}

impl MachineIndexSource for StoreIndexSource {
    fn cluster(&self, namespace: &str, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(&ObjectRef::new(name).within(namespace))
    }

    fn cluster_machines(&self, namespace: &str, cluster_name: &str) -> Vec<Arc<Machine>> {
        self.machines
            .state()
            .into_iter()
            .filter(|m| m.namespace().as_deref() == Some(namespace))
            .filter(|m| m.labels().get(CLUSTER_NAME_LABEL).map(String::as_str) == Some(cluster_name))
            .collect()
    }
}

/// KubevirtMachine referenced by a Machine's `infrastructureRef`
pub fn machine_to_kubevirt_machine(machine: &Machine) -> Option<ObjectRef<KubevirtMachine>> {
    if has_paused_annotation(&machine.metadata) {
        return None;
    }
    let reference = &machine.spec.infrastructure_ref;
    if !reference.is_kind(KUBEVIRT_MACHINE_KIND) || reference.group() != INFRASTRUCTURE_GROUP {
        return None;
    }
    if reference.name.is_empty() {
        return None;
    }
    let namespace = reference.namespace.clone().or_else(|| machine.namespace())?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

fn infrastructure_refs(machines: Vec<Arc<Machine>>, namespace: &str) -> Vec<ObjectRef<KubevirtMachine>> {
    machines
        .iter()
        .filter_map(|machine| {
            let name = &machine.spec.infrastructure_ref.name;
            if name.is_empty() {
                return None;
            }
            Some(ObjectRef::new(name).within(namespace))
        })
        .collect()
}

/// KubevirtMachines of the cluster owning a KubevirtCluster
pub fn kubevirt_cluster_to_kubevirt_machines(
    source: &dyn MachineIndexSource,
    kubevirt_cluster: &KubevirtCluster,
) -> Vec<ObjectRef<KubevirtMachine>> {
    if has_paused_annotation(&kubevirt_cluster.metadata) {
        return Vec::new();
    }
    let Some(namespace) = kubevirt_cluster.namespace() else {
        return Vec::new();
    };
    let Some(owner) = find_capi_owner(&kubevirt_cluster.metadata, "Cluster") else {
        debug!("KubevirtCluster {} has no owner Cluster yet", kubevirt_cluster.name_any());
        return Vec::new();
    };
    let Some(cluster) = source.cluster(&namespace, &owner.name) else {
        return Vec::new();
    };

    let cluster_name = cluster.name_any();
    infrastructure_refs(source.cluster_machines(&namespace, &cluster_name), &namespace)
}

/// KubevirtMachines of a Cluster that is unpaused with ready infrastructure
pub fn cluster_to_kubevirt_machines(
    source: &dyn MachineIndexSource,
    cluster: &Cluster,
) -> Vec<ObjectRef<KubevirtMachine>> {
    if cluster.is_paused() || !cluster.infrastructure_ready() {
        return Vec::new();
    }
    let Some(namespace) = cluster.namespace() else {
        return Vec::new();
    };
    let machines = source
        .cluster_machines(&namespace, &cluster.name_any())
        .into_iter()
        .filter(|m| m.spec.infrastructure_ref.is_kind(KUBEVIRT_MACHINE_KIND))
        .collect();
    infrastructure_refs(machines, &namespace)
}
