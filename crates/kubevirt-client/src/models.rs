//! KubeVirt API models
//!
//! Typed views of `kubevirt.io/v1` `VirtualMachine` and `VirtualMachineInstance`.
//! Only the parts the provider edits or reads are typed; everything else is
//! kept in flattened maps so a round trip never drops user supplied fields.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of the volume and disk carrying the cloud-init user data
pub const CLOUD_INIT_VOLUME_NAME: &str = "cloudinitvolume";
/// VMI phase of a running guest
pub const VMI_RUNNING_PHASE: &str = "Running";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Start the VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// Alternative to `running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,

    /// Template of the VMI
    #[serde(default)]
    pub template: VirtualMachineInstanceTemplate,

    /// Untyped remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// VM status (subset)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// The VMI is ready
    #[serde(default)]
    pub ready: bool,

    /// Human readable status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

/// Template of the VMI created by a VM
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceTemplate {
    /// Template metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// Template spec
    #[serde(default)]
    pub spec: VirtualMachineInstanceTemplateSpec,
}

/// VMI spec (subset)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceTemplateSpec {
    /// Domain (devices, resources, ...)
    #[serde(default)]
    pub domain: Domain,

    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Untyped remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Domain of a VMI
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    /// Devices
    #[serde(default)]
    pub devices: Devices,

    /// Untyped remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Devices of a domain
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    /// Disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    /// Untyped remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A disk attached to a volume
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Volume name
    pub name: String,

    /// Untyped remainder (disk target, boot order, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A volume
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,

    /// cloud-init NoCloud source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloud>,

    /// Untyped remainder (containerDisk, dataVolume, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// cloud-init NoCloud volume source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloud {
    /// Secret holding the user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret_ref: Option<LocalObjectReference>,

    /// Untyped remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Name-only reference
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Referenced name
    pub name: String,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    namespaced,
    status = "VirtualMachineInstanceStatus",
    schema = "disabled"
)]
pub struct VirtualMachineInstanceSpec {
    /// Untyped spec
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// VMI status (subset)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Lifecycle phase (Pending, Scheduling, Scheduled, Running, Succeeded, Failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Network interfaces reported by the guest agent / launcher
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VmiInterface>,
}

/// One VMI network interface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VmiInterface {
    /// Interface name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Primary IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl VirtualMachineSpec {
    /// Attach the cloud-init volume and disk unless the template already has one
    pub fn ensure_cloud_init_volume(&mut self, user_data_secret_name: &str) {
        let spec = &mut self.template.spec;
        let has_cloud_init = spec.volumes.iter().any(|v| v.cloud_init_no_cloud.is_some());
        if has_cloud_init {
            return;
        }

        spec.volumes.push(Volume {
            name: CLOUD_INIT_VOLUME_NAME.to_string(),
            cloud_init_no_cloud: Some(CloudInitNoCloud {
                user_data_secret_ref: Some(LocalObjectReference {
                    name: user_data_secret_name.to_string(),
                }),
                extra: BTreeMap::new(),
            }),
            extra: BTreeMap::new(),
        });

        if !spec.domain.devices.disks.iter().any(|d| d.name == CLOUD_INIT_VOLUME_NAME) {
            spec.domain.devices.disks.push(Disk {
                name: CLOUD_INIT_VOLUME_NAME.to_string(),
                extra: BTreeMap::from([("disk".to_string(), serde_json::json!({"bus": "virtio"}))]),
            });
        }
    }
}

impl VirtualMachineInstance {
    /// First interface address, if reported
    pub fn address(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .interfaces
            .iter()
            .find_map(|i| i.ip_address.as_deref())
    }

    /// Phase is Running
    pub fn is_running(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == VMI_RUNNING_PHASE)
    }
}
