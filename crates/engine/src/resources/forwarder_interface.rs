//! Forwarder interfaces
//!
//! An interface inside a forwarder, attached to a parent net device. How it
//! is created depends on the parent's [`ParentDevice`] variant, which is
//! fixed when the interface is declared. Address and state changes go
//! through independent setters so that changing one never re-runs creation.

use super::commands::*;
use super::{FORWARDER, FORWARDER_INTERFACE, NET_DEVICE};
use crate::attribute::{AttrType, Attribute, Multiplicity, Schema};
use crate::lifecycle::{Lifecycle, ResourceContext};
use crate::lock::ForwarderLock;
use crate::manager::{Resource, ResourceManager};
use crate::parse::{find_by_socket, parse_memif};
use crate::requirement::Requirement;
use crate::resources::net_device::ParentDevice;
use crate::task::{ExternalTask, Task, TaskOutput};
use crate::template::Bindings;
use async_trait::async_trait;
use netbed_common::{CommandExecutor, EngineConfig, Error, ResourceKey, Result, Value};
use std::sync::Arc;
use tracing::warn;

pub fn schema(_config: &EngineConfig) -> Result<Arc<Schema>> {
    Schema::builder(FORWARDER_INTERFACE)
        .attribute(
            Attribute::new("forwarder", AttrType::reference(FORWARDER))
                .mandatory()
                .multiplicity(Multiplicity::ManyToOne)
                .reverse("interfaces"),
        )
        .attribute(Attribute::new("name", AttrType::string()).mandatory())
        .attribute(
            Attribute::new("parent", AttrType::reference(NET_DEVICE))
                .mandatory()
                .reverse("forwarder_interface")
                .requires("node"),
        )
        .attribute(Attribute::new("ip4_address", AttrType::Address))
        .attribute(Attribute::new("ip6_address", AttrType::Address))
        .attribute(Attribute::new("up", AttrType::Bool).describe("Administrative state"))
        .attribute(Attribute::new("monitored", AttrType::Bool).default_value(true))
        .attribute(
            Attribute::new("device_name", AttrType::string())
                .describe("Identifier of the interface inside the forwarder"),
        )
        .key(&["forwarder", "name"])
        .build()
}

/// Interface descriptor; the forwarder and parent must be present first
pub fn declare(schema: &Arc<Schema>, forwarder: &ResourceKey, name: &str, parent: &ResourceKey) -> Resource {
    Resource::new(schema.clone())
        .with("forwarder", forwarder.clone())
        .with("name", name)
        .with("parent", parent.clone())
        .requirement(Requirement::on("forwarder"))
        .requirement(Requirement::on("parent"))
}

/// Updates binding the memif record matching `socket_path` to the interface
/// and its parent device
pub fn memif_updates(stdout: &str, socket_path: &str, parent: &ResourceKey) -> Result<TaskOutput> {
    let records = parse_memif(stdout)?;
    match find_by_socket(&records, socket_path) {
        Some(record) => Ok(TaskOutput::new()
            .set("device_name", record.interface.as_str())
            .set_on(parent, "device_name", record.interface.as_str())),
        None => {
            warn!("No memif record uses socket {}", socket_path);
            Err(Error::ParseMismatch(format!(
                "no memif record with socket {}",
                socket_path
            )))
        }
    }
}

/// Lifecycle of a forwarder interface
#[derive(Debug, Clone)]
pub struct ForwarderInterface {
    parent: ParentDevice,
}

impl ForwarderInterface {
    pub fn new(parent: ParentDevice) -> Self {
        Self { parent }
    }

    /// Select the variant from a committed parent device
    pub fn for_parent(manager: &ResourceManager, parent: &ResourceKey) -> Result<Self> {
        let device = manager.get(parent)?;
        Ok(Self::new(ParentDevice::of(&device)?))
    }

    pub fn parent(&self) -> &ParentDevice {
        &self.parent
    }

    fn channel(ctx: &ResourceContext) -> Result<(Arc<dyn CommandExecutor>, ForwarderLock)> {
        let forwarder = ctx.related("forwarder")?;
        let lock = forwarder
            .lock()
            .ok_or_else(|| Error::Integration(format!("{} owns no lock", forwarder.key())))?;
        Ok((ctx.executor_of(forwarder.key())?, lock))
    }

    /// Locked command on the forwarder's control channel
    fn control(ctx: &ResourceContext, template: &str, bindings: Bindings) -> Result<ExternalTask> {
        let (executor, _) = Self::channel(ctx)?;
        let bindings = bindings
            .value("ctl", ctx.config().forwarder.ctl.as_str())
            .resource("iface", ctx.key());
        ExternalTask::new(executor, template, bindings)
    }

    fn locked(ctx: &ResourceContext, template: &str, bindings: Bindings) -> Result<Task> {
        let (_, lock) = Self::channel(ctx)?;
        Ok(Self::control(ctx, template, bindings)?.locked(&lock))
    }

    /// Command on the host owning `device`
    fn host_command(ctx: &ResourceContext, device: &ResourceKey, template: &str, state: &str) -> Result<Task> {
        let bindings = Bindings::new().resource("device", device).value("state", state);
        Ok(ExternalTask::new(ctx.executor_of(device)?, template, bindings)?.into_task())
    }

    /// Copy the parent's addresses and name the forwarder-side device
    fn adopt(parent: ResourceKey, prefix: String) -> Task {
        Task::inline("adopt parent addresses", move |ctx| {
            let device = ctx.manager().get(&parent)?;
            let mut out = TaskOutput::new();
            for attr in ["ip4_address", "ip6_address"] {
                if let Some(addr) = device.get_opt(attr)? {
                    out = out.set(attr, addr);
                }
            }
            Ok(out.set("device_name", format!("{}{}", prefix, device.get_str("device_name")?)))
        })
    }

    fn create_memory_shared(ctx: &ResourceContext, key: u64, master: bool) -> Result<Task> {
        let create = Self::locked(
            ctx,
            CMD_FWD_CREATE_MEMIF,
            Bindings::new()
                .value("key", format!("0x{:x}", key))
                .value("role", if master { "master" } else { "slave" }),
        )?;

        let (_, lock) = Self::channel(ctx)?;
        let query = Self::control(ctx, CMD_FWD_SHOW_MEMIF, Bindings::new())?
            .with_parse(|ctx, out| {
                let parent = ctx.related("parent")?;
                let socket = parent.get_str("socket_path")?;
                memif_updates(out.stdout_str(), &socket, parent.key())
            })
            .locked(&lock);

        Ok(create.then(query))
    }

    fn create_virtual_link(ctx: &ResourceContext, parent: &ResourceKey, remote: Option<&ResourceKey>) -> Result<Task> {
        let prefix = ctx.config().forwarder.host_prefix.clone();
        let mut tasks = vec![
            Self::adopt(parent.clone(), prefix),
            Self::locked(ctx, CMD_FWD_CREATE_HOST_IFACE, Bindings::new())?,
            Self::host_command(ctx, parent, CMD_SET_OFFLOAD, "off")?,
        ];
        if let Some(remote) = remote {
            tasks.push(Self::host_command(ctx, remote, CMD_SET_OFFLOAD, "off")?);
        }

        let parent = parent.clone();
        let remote = remote.cloned();
        tasks.push(Task::inline("record offload", move |_| {
            let mut out = TaskOutput::new().set_on(&parent, "offload", false);
            if let Some(remote) = &remote {
                out = out.set_on(remote, "offload", false);
            }
            Ok(out)
        }));
        Ok(Task::seq(tasks))
    }

    fn create_generic_physical(ctx: &ResourceContext, parent: &ResourceKey) -> Result<Task> {
        let down = Self::host_command(ctx, parent, CMD_LINK_SET_STATE, "down")?;
        let prefix = ctx.config().forwarder.host_prefix.clone();
        let parent = parent.clone();
        let rename = Task::inline("take over device", move |ctx| {
            let device = ctx.manager().get(&parent)?;
            Ok(TaskOutput::new()
                .set("device_name", format!("{}{}", prefix, device.get_str("device_name")?))
                .set_on(&parent, "up", false))
        });
        Ok(down.then(rename))
    }
}

#[async_trait]
impl Lifecycle for ForwarderInterface {
    fn kind(&self) -> &str {
        FORWARDER_INTERFACE
    }

    /// Parent addresses are assigned centrally
    fn after(&self) -> Vec<String> {
        vec!["central_ip".to_string()]
    }

    fn get(&self, ctx: &ResourceContext) -> Result<Task> {
        if ctx.resource().get_opt("device_name")?.is_some() {
            return Ok(Self::control(ctx, CMD_FWD_SHOW_IFACE, Bindings::new())?
                .probe(ctx.key())
                .locked(&Self::channel(ctx)?.1));
        }
        let key = ctx.key().clone();
        Ok(Task::inline("unknown device", move |_| {
            Err(Error::ResourceNotFound {
                key: key.to_string(),
            })
        }))
    }

    fn create(&self, ctx: &ResourceContext) -> Result<Task> {
        let parent = ctx.get_ref("parent")?;
        let provision = match &self.parent {
            ParentDevice::MemoryShared { key, master } => Self::create_memory_shared(ctx, *key, *master)?,
            ParentDevice::VirtualLink { remote } => Self::create_virtual_link(ctx, &parent, remote.as_ref())?,
            ParentDevice::HardwareOffload { .. } => Self::adopt(parent.clone(), String::new()),
            ParentDevice::GenericPhysical => Self::create_generic_physical(ctx, &parent)?,
        };

        let attach = Task::inline("attach to parent", move |_| {
            Ok(TaskOutput::new()
                .set_on(&parent, "has_forwarder_child", true)
                .set("up", true))
        });
        Ok(provision.then(attach))
    }

    fn delete(&self, ctx: &ResourceContext) -> Result<Task> {
        let teardown = match &self.parent {
            ParentDevice::MemoryShared { .. } => Self::locked(ctx, CMD_FWD_DELETE_MEMIF, Bindings::new())?,
            ParentDevice::VirtualLink { .. } => Self::locked(ctx, CMD_FWD_DELETE_HOST_IFACE, Bindings::new())?,
            _ => Self::locked(ctx, CMD_FWD_SET_STATE, Bindings::new().value("state", "down"))?,
        };
        let parent = ctx.get_ref("parent")?;
        let detach = Task::inline("detach from parent", move |_| {
            Ok(TaskOutput::new().set_on(&parent, "has_forwarder_child", false))
        });
        Ok(teardown.then(detach))
    }

    fn setter(&self, ctx: &ResourceContext, attribute: &str) -> Result<Option<Task>> {
        match attribute {
            "ip4_address" | "ip6_address" => {
                let addr = match ctx.resource().get_opt(attribute)? {
                    Some(Value::Address(addr)) => addr,
                    _ => return Ok(None),
                };
                let bindings = Bindings::new()
                    .value("ip_address", addr.ip().to_string())
                    .value("prefix_len", i64::from(addr.prefix()));
                Ok(Some(Self::locked(ctx, CMD_FWD_SET_IP, bindings)?))
            }
            "up" => {
                let state = if ctx.resource().get_bool("up")? { "up" } else { "down" };
                let bindings = Bindings::new().value("state", state);
                Ok(Some(Self::locked(ctx, CMD_FWD_SET_STATE, bindings)?))
            }
            _ => Ok(None),
        }
    }
}
