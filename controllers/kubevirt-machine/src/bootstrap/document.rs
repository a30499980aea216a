//! Typed bootstrap payloads
//!
//! Bootstrap providers hand out either an Ignition config (JSON) or a
//! cloud-init `#cloud-config` document (YAML). Only the user list is typed;
//! every other field is carried through unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// First line of a cloud-config document
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";
/// Sudo rule granted to injected users
pub const INJECTED_USER_SUDO: &str = "ALL=(ALL) NOPASSWD:ALL";

/// Errors parsing or rendering a bootstrap payload
#[derive(Debug, Error)]
pub enum BootstrapDocumentError {
    /// Neither Ignition JSON nor `#cloud-config`
    #[error("unsupported bootstrap data format")]
    UnsupportedFormat,

    /// Malformed Ignition config
    #[error("invalid Ignition config: {0}")]
    Ignition(#[from] serde_json::Error),

    /// Malformed cloud-config
    #[error("invalid cloud-config: {0}")]
    CloudConfig(#[from] serde_yaml::Error),
}

/// Ignition config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnitionConfig {
    /// Users and groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd: Option<IgnitionPasswd>,

    /// Everything else (ignition, storage, systemd, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Ignition `passwd` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgnitionPasswd {
    /// Users
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<IgnitionUser>,

    /// Untyped remainder (groups)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Ignition user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnitionUser {
    /// Login name
    pub name: String,

    /// Authorized public keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,

    /// Untyped remainder
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// cloud-init cloud-config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Users; may contain the literal `default`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<CloudConfigUserEntry>,

    /// Everything else (runcmd, write_files, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Entry of the cloud-config `users` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudConfigUserEntry {
    /// Bare name such as `default`
    Named(String),
    /// Full user definition
    User(CloudConfigUser),
}

/// cloud-config user definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudConfigUser {
    /// Login name
    pub name: String,

    /// Authorized public keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_authorized_keys: Vec<String>,

    /// Untyped remainder (sudo, groups, shell, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Parsed bootstrap payload
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapDocument {
    /// Ignition JSON
    Ignition(IgnitionConfig),
    /// cloud-init YAML
    CloudConfig(CloudConfig),
}

impl BootstrapDocument {
    /// Detect the format and parse
    pub fn parse(data: &[u8]) -> Result<Self, BootstrapDocumentError> {
        let text = std::str::from_utf8(data).map_err(|_| BootstrapDocumentError::UnsupportedFormat)?;
        let trimmed = text.trim_start();

        if trimmed.starts_with('{') {
            return Ok(Self::Ignition(serde_json::from_str(trimmed)?));
        }
        if trimmed.starts_with(CLOUD_CONFIG_HEADER) {
            let config: Option<CloudConfig> = serde_yaml::from_str(trimmed)?;
            return Ok(Self::CloudConfig(config.unwrap_or_default()));
        }
        Err(BootstrapDocumentError::UnsupportedFormat)
    }

    /// Copy of the document in which `name` exists and authorizes `authorized_key`
    #[must_use]
    pub fn ensure_user(&self, name: &str, authorized_key: &str) -> Self {
        match self {
            Self::Ignition(config) => {
                let mut config = config.clone();
                let passwd = config.passwd.get_or_insert_with(IgnitionPasswd::default);
                match passwd.users.iter_mut().find(|u| u.name == name) {
                    Some(user) => add_key(&mut user.ssh_authorized_keys, authorized_key),
                    None => passwd.users.push(IgnitionUser {
                        name: name.to_string(),
                        ssh_authorized_keys: vec![authorized_key.to_string()],
                        extra: BTreeMap::new(),
                    }),
                }
                Self::Ignition(config)
            }
            Self::CloudConfig(config) => {
                let mut config = config.clone();
                let existing = config.users.iter_mut().find_map(|entry| match entry {
                    CloudConfigUserEntry::User(user) if user.name == name => Some(user),
                    _ => None,
                });
                match existing {
                    Some(user) => add_key(&mut user.ssh_authorized_keys, authorized_key),
                    None => config.users.push(CloudConfigUserEntry::User(CloudConfigUser {
                        name: name.to_string(),
                        ssh_authorized_keys: vec![authorized_key.to_string()],
                        extra: BTreeMap::from([(
                            "sudo".to_string(),
                            serde_yaml::Value::String(INJECTED_USER_SUDO.to_string()),
                        )]),
                    })),
                }
                Self::CloudConfig(config)
            }
        }
    }

    /// Render back to bytes; cloud-config keeps its header line
    pub fn to_bytes(&self) -> Result<Vec<u8>, BootstrapDocumentError> {
        match self {
            Self::Ignition(config) => Ok(serde_json::to_vec(config)?),
            Self::CloudConfig(config) => {
                let body = serde_yaml::to_string(config)?;
                Ok(format!("{CLOUD_CONFIG_HEADER}\n{body}").into_bytes())
            }
        }
    }
}

fn add_key(keys: &mut Vec<String>, key: &str) {
    if !keys.iter().any(|k| k.trim() == key.trim()) {
        keys.push(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJm capk";

    #[test]
    fn test_parse_detects_format() {
        assert!(matches!(
            BootstrapDocument::parse(br#"{"ignition": {"version": "3.2.0"}}"#),
            Ok(BootstrapDocument::Ignition(_))
        ));
        assert!(matches!(
            BootstrapDocument::parse(b"#cloud-config\nruncmd:\n  - kubeadm join\n"),
            Ok(BootstrapDocument::CloudConfig(_))
        ));
        assert!(matches!(
            BootstrapDocument::parse(b"#!/bin/bash\necho hi\n"),
            Err(BootstrapDocumentError::UnsupportedFormat)
        ));
        assert!(matches!(
            BootstrapDocument::parse(b"{not json"),
            Err(BootstrapDocumentError::Ignition(_))
        ));
    }

    #[test]
    fn test_ignition_ensure_user_preserves_fields() {
        let doc = BootstrapDocument::parse(
            br#"{"ignition":{"version":"3.2.0"},"passwd":{"users":[{"name":"core","groups":["wheel"]}]},"systemd":{"units":[{"name":"kubeadm.service","enabled":true}]}}"#,
        )
        .unwrap();

        let updated = doc.ensure_user("capk", KEY);
        let value: serde_json::Value = serde_json::from_slice(&updated.to_bytes().unwrap()).unwrap();

        assert_eq!(value["ignition"]["version"], "3.2.0");
        assert_eq!(value["systemd"]["units"][0]["name"], "kubeadm.service");
        assert_eq!(value["passwd"]["users"][0]["groups"][0], "wheel");
        assert_eq!(value["passwd"]["users"][1]["name"], "capk");
        assert_eq!(value["passwd"]["users"][1]["sshAuthorizedKeys"][0], KEY);
    }

    #[test]
    fn test_ignition_ensure_user_extends_existing_user_once() {
        let doc = BootstrapDocument::parse(br#"{"ignition":{"version":"3.2.0"},"passwd":{"users":[{"name":"capk"}]}}"#).unwrap();

        let once = doc.ensure_user("capk", KEY);
        let twice = once.ensure_user("capk", KEY);
        assert_eq!(once, twice);

        let BootstrapDocument::Ignition(config) = twice else {
            panic!("expected ignition");
        };
        let users = config.passwd.unwrap().users;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].ssh_authorized_keys, vec![KEY.to_string()]);
    }

    #[test]
    fn test_cloud_config_ensure_user() {
        let doc = BootstrapDocument::parse(
            b"#cloud-config\nusers:\n  - default\n  - name: admin\n    shell: /bin/sh\nruncmd:\n  - kubeadm join --config /run/kubeadm/kubeadm-join-config.yaml\n",
        )
        .unwrap();

        let updated = doc.ensure_user("capk", KEY).ensure_user("capk", KEY);
        let bytes = updated.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("#cloud-config\n"));

        let BootstrapDocument::CloudConfig(config) = BootstrapDocument::parse(text.as_bytes()).unwrap() else {
            panic!("expected cloud-config");
        };
        assert_eq!(config.users.len(), 3);
        assert_eq!(config.users[0], CloudConfigUserEntry::Named("default".to_string()));
        let CloudConfigUserEntry::User(capk) = &config.users[2] else {
            panic!("expected user definition");
        };
        assert_eq!(capk.name, "capk");
        assert_eq!(capk.ssh_authorized_keys, vec![KEY.to_string()]);
        assert!(config.extra.contains_key("runcmd"));
    }

    #[test]
    fn test_empty_cloud_config() {
        let doc = BootstrapDocument::parse(b"#cloud-config\n").unwrap();
        let BootstrapDocument::CloudConfig(config) = doc.ensure_user("capk", KEY) else {
            panic!("expected cloud-config");
        };
        assert_eq!(config.users.len(), 1);
    }
}
