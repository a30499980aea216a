//! Prometheus metrics
//!
//! One registry per process, owned by `Metrics` and shared with the HTTP
//! server and the dispatcher.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Converged or waiting on a watch event
    Success,
    /// Timed requeue
    Requeue,
    /// Returned an error
    Error,
}

impl ReconcileResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Requeue => "requeue",
            Self::Error => "error",
        }
    }
}

/// Controller metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    vm_creations: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("capk".to_string()), None)?;

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "kubevirtmachine_reconciliations_total",
                "KubevirtMachine reconciliations grouped by result",
            ),
            &["result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "kubevirtmachine_reconcile_duration_seconds",
                "Duration of KubevirtMachine reconciliations",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["result"],
        )?;
        let vm_creations = IntCounter::with_opts(Opts::new(
            "kubevirtmachine_vm_creations_total",
            "VirtualMachines created for KubevirtMachines",
        ))?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(vm_creations.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            vm_creations,
        })
    }

    /// Record one finished reconciliation
    pub fn observe_reconcile(&self, result: ReconcileResult, elapsed: Duration) {
        let label = result.as_str();
        self.reconciliations.with_label_values(&[label]).inc();
        self.reconcile_duration
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a VM creation
    pub fn inc_vm_creations(&self) {
        self.vm_creations.inc();
    }

    /// Prometheus text exposition of all metrics
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
