//! Container hypervisor collaborator

use async_trait::async_trait;
use netbed_common::{CommandExecutor, CommandOutput, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How the container image is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Image already cached by the hypervisor
    Local,
    /// Downloaded from a remote registry
    Pull,
}

/// Image source of a container descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: SourceMode,
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ImageSource {
    pub fn local(alias: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            mode: SourceMode::Local,
            alias: alias.into(),
            server: None,
            protocol: None,
        }
    }

    pub fn pull(alias: impl Into<String>, server: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            mode: SourceMode::Pull,
            alias: alias.into(),
            server: Some(server.into()),
            protocol: Some(protocol.into()),
        }
    }
}

/// Device entry of a container descriptor (`nic`, `unix-char`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

impl DeviceDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Everything the hypervisor needs to create a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub name: String,
    pub architecture: String,
    pub ephemeral: bool,
    pub profiles: Vec<String>,
    pub config: BTreeMap<String, String>,
    pub devices: BTreeMap<String, DeviceDescriptor>,
    pub source: ImageSource,
}

/// Hypervisor view of an existing container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub status: String,
}

/// Cached image alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAlias {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

/// Request to turn a container into a reusable image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishDescriptor {
    pub public: bool,
    pub properties: BTreeMap<String, String>,
    pub source: PublishSource,
}

/// Container hypervisor API
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    /// Fails with `ResourceNotFound` when no such container exists
    async fn get(&self, name: &str) -> Result<ContainerInfo>;

    async fn create(&self, descriptor: &ContainerDescriptor, wait: bool) -> Result<ContainerInfo>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    async fn list_aliases(&self) -> Result<Vec<ImageAlias>>;

    /// Returns the image metadata reported by the hypervisor
    async fn publish_image(&self, descriptor: &PublishDescriptor) -> Result<serde_json::Value>;

    /// Run a command inside a container
    async fn execute(&self, name: &str, command: &str) -> Result<CommandOutput>;
}

/// Runs commands inside a container through the hypervisor
pub struct ContainerExecutor {
    client: Arc<dyn HypervisorClient>,
    name: String,
}

impl ContainerExecutor {
    pub fn new(client: Arc<dyn HypervisorClient>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

#[async_trait]
impl CommandExecutor for ContainerExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, command: &str, capture: bool) -> Result<CommandOutput> {
        let mut output = self.client.execute(&self.name, command).await?;
        if !capture {
            output.stdout = None;
            output.stderr = None;
        }
        Ok(output)
    }
}
