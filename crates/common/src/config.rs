//! Engine configuration

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Container provisioning configuration
    pub container: ContainerConfig,

    /// Forwarder configuration
    pub forwarder: ForwarderConfig,

    /// Local shell configuration
    pub shell: ShellConfig,
}

/// Container-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Architecture used when a container does not declare one
    pub default_architecture: String,

    /// Distribution alias pulled when the image is not cached
    pub default_distribution: String,

    /// Remote image server (pull mode only)
    pub source_server: String,

    /// Protocol used to download images (lxd or simplestreams)
    pub source_protocol: String,

    /// Name of the management/monitoring interface inside containers
    pub management_device: String,

    /// Host bridge used when a node does not declare one
    pub default_bridge: String,

    /// Profile that exposes the forwarder's hardware inside a container
    pub forwarder_profile: String,

    /// Raw LXC configuration applied with the forwarder profile
    pub forwarder_raw_lxc: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            default_architecture: "x86_64".to_string(),
            default_distribution: "focal".to_string(),
            source_server: "https://cloud-images.ubuntu.com/releases/".to_string(),
            source_protocol: "simplestreams".to_string(),
            management_device: "eth0".to_string(),
            default_bridge: "lxdbr0".to_string(),
            forwarder_profile: "vpp".to_string(),
            forwarder_raw_lxc: "lxc.apparmor.profile=unconfined\n\
                lxc.mount.entry = hugetlbfs dev/hugepages hugetlbfs rw,relatime,create=dir 0 0\n"
                .to_string(),
        }
    }
}

/// Forwarder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Control binary accepting one textual command per invocation
    pub ctl: String,

    /// Prefix of forwarder-side names for host interfaces
    pub host_prefix: String,

    /// Service unit running the forwarder
    pub service: String,

    /// Userspace I/O driver loaded on forwarder hosts
    pub driver: String,

    /// Directory holding shared-memory interface sockets
    pub socket_dir: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            ctl: "vppctl_wrapper".to_string(),
            host_prefix: "host-".to_string(),
            service: "vpp".to_string(),
            driver: "uio_pci_generic".to_string(),
            socket_dir: "/run/vpp".to_string(),
        }
    }
}

/// Local shell configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell used to run external commands
    pub program: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "/bin/sh".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when missing
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
