//! Shared fixtures for the provisioning tests

#![allow(dead_code)]

use async_trait::async_trait;
use netbed_common::{CommandExecutor, CommandOutput, EngineConfig, Error, LifecycleState, ResourceKey, Result, Value};
use netbed_engine::hypervisor::{ContainerDescriptor, ContainerInfo, ImageAlias, PublishDescriptor};
use netbed_engine::resources::{
    container, forwarder, forwarder_interface, net_device, node, Container, Forwarder, ForwarderInterface,
    NetDevice, Node, ParentDevice,
};
use netbed_engine::{Engine, HypervisorClient, LocalAddressAllocator, ResourceManager, Schemas};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Send engine logs to the captured test output
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Hypervisor keeping containers in memory
pub struct MockHypervisor {
    aliases: Vec<String>,
    pub containers: Mutex<HashSet<String>>,
    pub running: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<ContainerDescriptor>>,
    pub published: Mutex<Vec<PublishDescriptor>>,
}

impl MockHypervisor {
    pub fn new(aliases: &[&str]) -> Self {
        Self {
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            containers: Mutex::new(HashSet::new()),
            running: Mutex::new(HashSet::new()),
            created: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HypervisorClient for MockHypervisor {
    async fn get(&self, name: &str) -> Result<ContainerInfo> {
        if !self.containers.lock().contains(name) {
            return Err(Error::ResourceNotFound {
                key: name.to_string(),
            });
        }
        let status = if self.running.lock().contains(name) { "Running" } else { "Stopped" };
        Ok(ContainerInfo {
            name: name.to_string(),
            status: status.to_string(),
        })
    }

    async fn create(&self, descriptor: &ContainerDescriptor, _wait: bool) -> Result<ContainerInfo> {
        self.containers.lock().insert(descriptor.name.clone());
        self.created.lock().push(descriptor.clone());
        Ok(ContainerInfo {
            name: descriptor.name.clone(),
            status: "Stopped".to_string(),
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.running.lock().insert(name.to_string());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.running.lock().remove(name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.running.lock().remove(name);
        self.containers.lock().remove(name);
        Ok(())
    }

    async fn list_aliases(&self) -> Result<Vec<ImageAlias>> {
        Ok(self
            .aliases
            .iter()
            .map(|name| ImageAlias { name: name.clone() })
            .collect())
    }

    async fn publish_image(&self, descriptor: &PublishDescriptor) -> Result<serde_json::Value> {
        self.published.lock().push(descriptor.clone());
        Ok(serde_json::json!({ "fingerprint": "f00d", "public": descriptor.public }))
    }

    async fn execute(&self, _name: &str, _command: &str) -> Result<CommandOutput> {
        CommandOutput::from_parts(Some(0), Some(String::new()), Some(String::new()))
    }
}

/// Host executor answering by command prefix.
///
/// Each command takes `delay` to complete; commands that start while
/// another one is still running are counted as overlaps.
pub struct ScriptedExecutor {
    responses: Mutex<HashMap<String, (i32, String)>>,
    commands: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn respond(&self, prefix: &str, exit_code: i32, stdout: &str) {
        self.responses
            .lock()
            .insert(prefix.to_string(), (exit_code, stdout.to_string()));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, command: &str, _capture: bool) -> Result<CommandOutput> {
        let command = command.trim().to_string();
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.commands.lock().push(command.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let (code, stdout) = self
            .responses
            .lock()
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, r)| r.clone())
            .unwrap_or((0, String::new()));
        CommandOutput::from_parts(Some(code), Some(stdout), Some(String::new()))
    }
}

/// One node `n1` whose commands go to a [`ScriptedExecutor`]
pub struct Testbed {
    pub engine: Engine,
    pub schemas: Arc<Schemas>,
    pub hypervisor: Arc<MockHypervisor>,
    pub allocator: Arc<LocalAddressAllocator>,
    pub host: Arc<ScriptedExecutor>,
    pub node: ResourceKey,
}

impl Testbed {
    pub async fn new() -> Self {
        Self::with_delay(Duration::ZERO).await
    }

    pub async fn with_delay(delay: Duration) -> Self {
        init_tracing();
        let config = EngineConfig::default();
        let schemas = Schemas::new(&config).unwrap();
        let engine = Engine::new(Arc::new(ResourceManager::new(config)));

        let handle = engine
            .commit(node::declare(&schemas.node, "n1"), Arc::new(Node))
            .await
            .unwrap();
        let node = handle.key().clone();
        let host = Arc::new(ScriptedExecutor::new(delay));
        engine.manager().register_executor(&node, host.clone());
        assert_eq!(engine.converge(&node).await.unwrap(), LifecycleState::Present);

        Self {
            engine,
            schemas,
            hypervisor: Arc::new(MockHypervisor::new(&["base"])),
            allocator: Arc::new(LocalAddressAllocator::new()),
            host,
            node,
        }
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        self.engine.manager()
    }

    pub fn container_behavior(&self) -> Arc<Container> {
        Arc::new(Container::new(
            self.schemas.clone(),
            self.hypervisor.clone(),
            self.allocator.clone(),
        ))
    }

    pub async fn container(&self, name: &str, attributes: &[(&str, Value)]) -> ResourceKey {
        let mut resource = container::declare(&self.schemas.container, name, &self.node);
        for (attribute, value) in attributes {
            resource = resource.with(*attribute, value.clone());
        }
        let handle = self
            .engine
            .commit(resource, self.container_behavior())
            .await
            .unwrap();
        handle.key().clone()
    }

    /// Forwarder on `n1`, reported as already running
    pub async fn forwarder(&self) -> ResourceKey {
        let handle = self
            .engine
            .commit(
                forwarder::declare(&self.schemas.forwarder, &self.node),
                Arc::new(Forwarder::new(&self.node)),
            )
            .await
            .unwrap();
        let key = handle.key().clone();
        assert_eq!(self.engine.converge(&key).await.unwrap(), LifecycleState::Present);
        key
    }

    /// Present net device on `n1` with a fixed MAC
    pub async fn device(&self, name: &str, variant: ParentDevice) -> ResourceKey {
        let resource = net_device::declare(&self.schemas.net_device, &self.node, name, &variant)
            .unwrap()
            .with("mac_address", "02:00:00:00:00:01");
        let handle = self
            .engine
            .commit(resource, Arc::new(NetDevice::new(variant)))
            .await
            .unwrap();
        let key = handle.key().clone();
        assert_eq!(self.engine.converge(&key).await.unwrap(), LifecycleState::Present);
        key
    }

    pub async fn interface(&self, forwarder: &ResourceKey, name: &str, parent: &ResourceKey) -> ResourceKey {
        let behavior = ForwarderInterface::for_parent(self.manager(), parent).unwrap();
        let handle = self
            .engine
            .commit(
                forwarder_interface::declare(&self.schemas.forwarder_interface, forwarder, name, parent),
                Arc::new(behavior),
            )
            .await
            .unwrap();
        handle.key().clone()
    }
}
