//! Controller configuration
//!
//! Everything tunable is read once from environment variables at startup and
//! injected; the reconciler never reads the environment itself.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Requeue delays of the convergence stages that poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeueTimings {
    /// Cluster SSH key secret not persisted yet
    pub ssh_keys: Duration,
    /// VM not booted yet
    pub vm_boot: Duration,
    /// Bootstrap sentinel not present yet
    pub bootstrap: Duration,
    /// Workload cluster client not available
    pub workload_client: Duration,
    /// Provider ID registration failed
    pub provider_id: Duration,
}

impl Default for RequeueTimings {
    fn default() -> Self {
        Self {
            ssh_keys: Duration::from_secs(10),
            vm_boot: Duration::from_secs(20),
            bootstrap: Duration::from_secs(10),
            workload_client: Duration::from_secs(10),
            provider_id: Duration::from_secs(5),
        }
    }
}

/// SSH user injection into bootstrap payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Rewrite the payload so `ssh_user` carries the cluster public key
    pub inject_ssh_user: bool,
    /// User to create or extend
    pub ssh_user: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            inject_ssh_user: false,
            ssh_user: kubevirt_client::ssh::DEFAULT_SSH_USER.to_string(),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
    /// Event debounce
    pub debounce: Duration,
    /// Error backoff floor in minutes
    pub backoff_min_minutes: u64,
    /// Error backoff ceiling in minutes
    pub backoff_max_minutes: u64,
    /// Address of the metrics and probe server
    pub metrics_bind_address: SocketAddr,
    /// Bootstrap payload handling
    pub bootstrap: BootstrapOptions,
    /// Stage requeue delays
    pub requeue: RequeueTimings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 10,
            debounce: Duration::ZERO,
            backoff_min_minutes: 1,
            backoff_max_minutes: 10,
            metrics_bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            bootstrap: BootstrapOptions::default(),
            requeue: RequeueTimings::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            namespace: get("WATCH_NAMESPACE"),
            concurrency: parse_or(get("RECONCILE_CONCURRENCY"), "RECONCILE_CONCURRENCY", defaults.concurrency)?,
            debounce: Duration::from_secs(parse_or(get("RECONCILE_DEBOUNCE_SECS"), "RECONCILE_DEBOUNCE_SECS", 0)?),
            backoff_min_minutes: parse_or(
                get("ERROR_BACKOFF_MIN_MINUTES"),
                "ERROR_BACKOFF_MIN_MINUTES",
                defaults.backoff_min_minutes,
            )?,
            backoff_max_minutes: parse_or(
                get("ERROR_BACKOFF_MAX_MINUTES"),
                "ERROR_BACKOFF_MAX_MINUTES",
                defaults.backoff_max_minutes,
            )?,
            metrics_bind_address: parse_or(
                get("METRICS_BIND_ADDRESS"),
                "METRICS_BIND_ADDRESS",
                defaults.metrics_bind_address,
            )?,
            bootstrap: BootstrapOptions {
                inject_ssh_user: parse_or(
                    get("BOOTSTRAP_INJECT_SSH_USER"),
                    "BOOTSTRAP_INJECT_SSH_USER",
                    defaults.bootstrap.inject_ssh_user,
                )?,
                ssh_user: get("BOOTSTRAP_SSH_USER").unwrap_or(defaults.bootstrap.ssh_user),
            },
            requeue: RequeueTimings::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.backoff_min_minutes == 0 || self.backoff_min_minutes > self.backoff_max_minutes {
            return Err(ControllerError::InvalidConfig(format!(
                "error backoff bounds {}..{} minutes are invalid",
                self.backoff_min_minutes, self.backoff_max_minutes
            )));
        }
        let requeue = &self.requeue;
        let delays = [
            requeue.ssh_keys,
            requeue.vm_boot,
            requeue.bootstrap,
            requeue.workload_client,
            requeue.provider_id,
        ];
        if delays.iter().any(Duration::is_zero) {
            return Err(ControllerError::InvalidConfig("requeue delays must be positive".to_string()));
        }
        if self.bootstrap.ssh_user.is_empty() {
            return Err(ControllerError::InvalidConfig("BOOTSTRAP_SSH_USER must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}"))),
    }
}
