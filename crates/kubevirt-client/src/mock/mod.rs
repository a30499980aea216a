//! In-memory collaborators for unit testing
//!
//! Every mock shares its state behind `Arc<Mutex<..>>`, so a clone handed to
//! the code under test and the copy kept by the test observe the same calls.

use crate::client::set_node_provider_id;
use crate::error::KubevirtError;
use crate::kubevirt_trait::{
    CommandExecutor, VirtualMachineHandle, VmProvider, VmRequest, WorkloadCluster,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable state of a `MockVirtualMachine`
#[derive(Debug, Clone, Default)]
pub struct MockVmState {
    /// VM object exists
    pub exists: bool,
    /// Reported address
    pub address: String,
    /// Boot probe result
    pub booted: bool,
    /// Bootstrap probe result
    pub bootstrapped: bool,
    /// `create()` fails
    pub fail_create: bool,
    /// `delete()` fails
    pub fail_delete: bool,
    /// Number of upcoming `set_provider_id()` calls that fail
    pub provider_id_failures: u32,
    /// `create()` calls
    pub create_calls: u32,
    /// `delete()` calls
    pub delete_calls: u32,
    /// `is_booted()` calls
    pub boot_probes: u32,
    /// `is_bootstrapped()` calls
    pub bootstrap_probes: u32,
    /// `set_provider_id()` calls
    pub provider_id_calls: u32,
}

/// Scriptable VM handle
#[derive(Debug, Clone)]
pub struct MockVirtualMachine {
    name: String,
    state: Arc<Mutex<MockVmState>>,
}

impl MockVirtualMachine {
    /// A VM that does not exist yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockVmState::default())),
        }
    }

    /// An existing VM with an address
    #[must_use]
    pub fn existing(self, address: impl Into<String>) -> Self {
        {
            let mut state = lock(&self.state);
            state.exists = true;
            state.address = address.into();
        }
        self
    }

    /// Set the boot probe result
    pub fn set_booted(&self, booted: bool) {
        lock(&self.state).booted = booted;
    }

    /// Set the bootstrap probe result
    pub fn set_bootstrapped(&self, bootstrapped: bool) {
        lock(&self.state).bootstrapped = bootstrapped;
    }

    /// Make `create()` fail
    pub fn fail_create(&self) {
        lock(&self.state).fail_create = true;
    }

    /// Make `delete()` fail
    pub fn fail_delete(&self) {
        lock(&self.state).fail_delete = true;
    }

    /// Make the next `times` provider id registrations fail
    pub fn fail_provider_id(&self, times: u32) {
        lock(&self.state).provider_id_failures = times;
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> MockVmState {
        lock(&self.state).clone()
    }
}

#[async_trait::async_trait]
impl VirtualMachineHandle for MockVirtualMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        lock(&self.state).exists
    }

    async fn create(&self) -> Result<(), KubevirtError> {
        let mut state = lock(&self.state);
        state.create_calls += 1;
        if state.fail_create {
            return Err(KubevirtError::InvalidObject(format!("mock create failure for {}", self.name)));
        }
        state.exists = true;
        Ok(())
    }

    fn address(&self) -> String {
        lock(&self.state).address.clone()
    }

    async fn is_booted(&self, _executor: &dyn CommandExecutor) -> bool {
        let mut state = lock(&self.state);
        state.boot_probes += 1;
        state.booted
    }

    async fn is_bootstrapped(&self, _executor: &dyn CommandExecutor) -> bool {
        let mut state = lock(&self.state);
        state.bootstrap_probes += 1;
        state.bootstrapped
    }

    async fn set_provider_id(&self, workload: &dyn WorkloadCluster) -> Result<String, KubevirtError> {
        {
            let mut state = lock(&self.state);
            state.provider_id_calls += 1;
            if state.provider_id_failures > 0 {
                state.provider_id_failures -= 1;
                return Err(KubevirtError::NotFound(format!("node {}", self.name)));
            }
        }
        set_node_provider_id(&self.name, workload).await
    }

    async fn delete(&self) -> Result<(), KubevirtError> {
        let mut state = lock(&self.state);
        state.delete_calls += 1;
        if state.fail_delete {
            return Err(KubevirtError::InvalidObject(format!("mock delete failure for {}", self.name)));
        }
        state.exists = false;
        Ok(())
    }
}

/// Hands out one shared `MockVirtualMachine` and records every lookup
#[derive(Debug, Clone)]
pub struct MockVmProvider {
    vm: MockVirtualMachine,
    requests: Arc<Mutex<Vec<VmRequest>>>,
    fail_lookup: Arc<Mutex<bool>>,
}

impl MockVmProvider {
    /// Provider returning `vm`
    pub fn new(vm: MockVirtualMachine) -> Self {
        Self {
            vm,
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_lookup: Arc::new(Mutex::new(false)),
        }
    }

    /// The shared VM
    pub fn vm(&self) -> &MockVirtualMachine {
        &self.vm
    }

    /// Make lookups fail
    pub fn fail_lookup(&self) {
        *lock(&self.fail_lookup) = true;
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<VmRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait::async_trait]
impl VmProvider for MockVmProvider {
    async fn machine(&self, request: &VmRequest) -> Result<Box<dyn VirtualMachineHandle>, KubevirtError> {
        lock(&self.requests).push(request.clone());
        if *lock(&self.fail_lookup) {
            return Err(KubevirtError::InvalidObject(format!("mock lookup failure for {}", request.name)));
        }
        Ok(Box::new(self.vm.clone()))
    }
}

/// Workload cluster with in-memory nodes
#[derive(Debug, Clone, Default)]
pub struct MockWorkloadCluster {
    nodes: Arc<Mutex<HashMap<String, Option<String>>>>,
    patched: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockWorkloadCluster {
    /// Cluster without nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with an optional provider id
    #[must_use]
    pub fn with_node(self, name: &str, provider_id: Option<&str>) -> Self {
        lock(&self.nodes).insert(name.to_string(), provider_id.map(str::to_string));
        self
    }

    /// Current provider id of a node
    pub fn provider_id(&self, name: &str) -> Option<String> {
        lock(&self.nodes).get(name).cloned().flatten()
    }

    /// `(node, providerID)` patches issued so far
    pub fn patched(&self) -> Vec<(String, String)> {
        lock(&self.patched).clone()
    }
}

#[async_trait::async_trait]
impl WorkloadCluster for MockWorkloadCluster {
    async fn node_provider_id(&self, node_name: &str) -> Result<Option<String>, KubevirtError> {
        lock(&self.nodes)
            .get(node_name)
            .cloned()
            .ok_or_else(|| KubevirtError::NotFound(format!("node {node_name}")))
    }

    async fn set_node_provider_id(&self, node_name: &str, provider_id: &str) -> Result<(), KubevirtError> {
        let mut nodes = lock(&self.nodes);
        let Some(node) = nodes.get_mut(node_name) else {
            return Err(KubevirtError::NotFound(format!("node {node_name}")));
        };
        *node = Some(provider_id.to_string());
        lock(&self.patched).push((node_name.to_string(), provider_id.to_string()));
        Ok(())
    }
}

/// Command executor answering from a fixed table; unknown commands fail
#[derive(Debug, Clone, Default)]
pub struct MockCommandExecutor {
    responses: HashMap<String, String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockCommandExecutor {
    /// Executor with no known commands
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `output`
    #[must_use]
    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses.insert(command.to_string(), output.to_string());
        self
    }

    /// Commands executed so far
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for MockCommandExecutor {
    async fn execute(&self, command: &str) -> Result<String, KubevirtError> {
        lock(&self.calls).push(command.to_string());
        self.responses
            .get(command)
            .map(|out| out.trim().to_string())
            .ok_or_else(|| KubevirtError::Ssh(format!("connection refused running '{command}'")))
    }
}
