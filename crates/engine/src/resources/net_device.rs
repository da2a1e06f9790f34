//! Network devices
//!
//! A device on a node or container. Its [`ParentDevice`] variant decides how
//! a forwarder attaches to it and whether the host has to create it.

use super::commands::*;
use super::{CONTAINER, FORWARDER_INTERFACE, NET_DEVICE};
use crate::address::MAX_DEVICE_NAME;
use crate::attribute::{AttrType, Attribute, Multiplicity, Schema};
use crate::lifecycle::{Lifecycle, ResourceContext};
use crate::manager::{Resource, ResourceEntry};
use crate::task::{ExternalTask, Task, TaskOutput};
use crate::template::Bindings;
use async_trait::async_trait;
use netbed_common::{EngineConfig, Error, ResourceKey, Result, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MEMORY_SHARED: &str = "memory-shared";
pub const VIRTUAL_LINK: &str = "virtual-link";
pub const HARDWARE_OFFLOAD: &str = "hardware-offload";
pub const GENERIC_PHYSICAL: &str = "generic-physical";

pub fn schema(config: &EngineConfig) -> Result<Arc<Schema>> {
    let socket_dir = config.forwarder.socket_dir.clone();
    Schema::builder(NET_DEVICE)
        .attribute(
            Attribute::new("node", AttrType::any_reference())
                .mandatory()
                .multiplicity(Multiplicity::ManyToOne)
                .reverse("interfaces"),
        )
        .attribute(Attribute::new("name", AttrType::string()).mandatory())
        .attribute(
            Attribute::new(
                "device_name",
                AttrType::constrained(MAX_DEVICE_NAME, true, &[' ']),
            )
            .default_from("name"),
        )
        .attribute(
            Attribute::new(
                "variant",
                AttrType::enumeration(&[MEMORY_SHARED, VIRTUAL_LINK, HARDWARE_OFFLOAD, GENERIC_PHYSICAL]),
            )
            .default_value(GENERIC_PHYSICAL),
        )
        .attribute(Attribute::new("mac_address", AttrType::string()))
        .attribute(Attribute::new("ip4_address", AttrType::Address))
        .attribute(Attribute::new("ip6_address", AttrType::Address))
        .attribute(Attribute::new("up", AttrType::Bool))
        .attribute(Attribute::new("offload", AttrType::Bool))
        .attribute(Attribute::new("monitored", AttrType::Bool).default_value(true))
        .attribute(Attribute::new("owner", AttrType::any_reference()))
        .attribute(Attribute::new("remote", AttrType::reference(NET_DEVICE)))
        .attribute(Attribute::new("memif_key", AttrType::Integer).default_value(0i64))
        .attribute(Attribute::new("master", AttrType::Bool).default_value(true))
        .attribute(
            Attribute::new("socket_path", AttrType::string()).computed(move |values| {
                let name = values.get("name").map(ToString::to_string).unwrap_or_default();
                Value::String(format!("{}/memif-{}.sock", socket_dir, name))
            }),
        )
        .attribute(Attribute::new("pci_address", AttrType::string()))
        .attribute(Attribute::new("has_forwarder_child", AttrType::Bool).default_value(false))
        .attribute(Attribute::new(
            "forwarder_interface",
            AttrType::reference(FORWARDER_INTERFACE),
        ))
        .key(&["node", "name"])
        .build()
}

/// What a forwarder interface attaches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentDevice {
    /// Shared ring buffer negotiated over a socket
    MemoryShared { key: u64, master: bool },
    /// Software device that needs a host-side interface in the forwarder
    VirtualLink { remote: Option<ResourceKey> },
    /// Already visible to the forwarder
    HardwareOffload { pci_address: Option<String> },
    /// NIC the forwarder takes over
    GenericPhysical,
}

impl ParentDevice {
    pub fn name(&self) -> &'static str {
        match self {
            ParentDevice::MemoryShared { .. } => MEMORY_SHARED,
            ParentDevice::VirtualLink { .. } => VIRTUAL_LINK,
            ParentDevice::HardwareOffload { .. } => HARDWARE_OFFLOAD,
            ParentDevice::GenericPhysical => GENERIC_PHYSICAL,
        }
    }

    /// Store the variant on a device descriptor
    pub fn describe(&self, resource: Resource) -> Result<Resource> {
        let resource = resource.with("variant", self.name());
        Ok(match self {
            ParentDevice::MemoryShared { key, master } => {
                let key = i64::try_from(*key)
                    .map_err(|_| Error::constraint("memif_key", format!("{} is out of range", key)))?;
                resource.with("memif_key", key).with("master", *master)
            }
            ParentDevice::VirtualLink { remote: Some(remote) } => resource.with("remote", remote.clone()),
            ParentDevice::HardwareOffload {
                pci_address: Some(pci),
            } => resource.with("pci_address", pci.as_str()),
            _ => resource,
        })
    }

    /// Read the variant back from a committed device
    pub fn of(device: &ResourceEntry) -> Result<Self> {
        let variant = device.get_str("variant")?;
        match variant.as_str() {
            MEMORY_SHARED => {
                let key = device.get("memif_key")?.as_i64().unwrap_or_default();
                Ok(ParentDevice::MemoryShared {
                    key: u64::try_from(key).map_err(|_| Error::constraint("memif_key", "negative key"))?,
                    master: device.get_bool("master")?,
                })
            }
            VIRTUAL_LINK => Ok(ParentDevice::VirtualLink {
                remote: device.get_opt("remote")?.and_then(|v| v.as_reference().cloned()),
            }),
            HARDWARE_OFFLOAD => Ok(ParentDevice::HardwareOffload {
                pci_address: device.get_opt("pci_address")?.map(|v| v.to_string()),
            }),
            _ => Ok(ParentDevice::GenericPhysical),
        }
    }
}

/// Device descriptor with its variant attributes filled in
pub fn declare(
    schema: &Arc<Schema>,
    node: &ResourceKey,
    name: &str,
    variant: &ParentDevice,
) -> Result<Resource> {
    variant.describe(
        Resource::new(schema.clone())
            .with("node", node.clone())
            .with("name", name),
    )
}

/// Lifecycle of a network device
#[derive(Debug, Clone)]
pub struct NetDevice {
    variant: ParentDevice,
}

impl NetDevice {
    pub fn new(variant: ParentDevice) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> &ParentDevice {
        &self.variant
    }

    fn device_command(ctx: &ResourceContext, template: &str, bindings: Bindings) -> Result<ExternalTask> {
        ExternalTask::new(ctx.executor()?, template, bindings.resource("device", ctx.key()))
    }

    /// Physical node hosting this device, looking through containers
    fn host_node(ctx: &ResourceContext) -> Result<ResourceKey> {
        let node = ctx.related("node")?;
        if node.kind() == CONTAINER {
            node.get_ref("node")
        } else {
            Ok(node.key().clone())
        }
    }
}

#[async_trait]
impl Lifecycle for NetDevice {
    fn kind(&self) -> &str {
        NET_DEVICE
    }

    /// Offloaded devices are handed to the forwarder host for binding
    async fn initialize(&self, ctx: &ResourceContext) -> Result<()> {
        let pci = match &self.variant {
            ParentDevice::HardwareOffload {
                pci_address: Some(pci),
            } => pci.clone(),
            _ => return Ok(()),
        };

        let host = ctx.manager().get(&Self::host_node(ctx)?)?;
        match host.get_opt("forwarder_host")? {
            Some(Value::Reference(fh)) => {
                let mut devices = ctx.manager().get(&fh)?.get_list("dpdk_devices")?;
                let pci = Value::from(pci);
                if !devices.contains(&pci) {
                    devices.push(pci);
                    ctx.manager().set(&fh, "dpdk_devices", Value::List(devices))?;
                    debug!("{}: registered with {}", ctx.key(), fh);
                }
            }
            _ => warn!("{}: {} has no forwarder host to bind {} to", ctx.key(), host.key(), pci),
        }
        Ok(())
    }

    fn get(&self, ctx: &ResourceContext) -> Result<Task> {
        match self.variant {
            // Created by the forwarder; nothing to look for on the host
            ParentDevice::MemoryShared { .. } | ParentDevice::HardwareOffload { .. } => {
                Ok(Task::inline("forwarder-managed device", |_| Ok(TaskOutput::new())))
            }
            _ => Ok(Self::device_command(ctx, CMD_LINK_SHOW, Bindings::new())?
                .probe(ctx.key())
                .into_task()),
        }
    }

    fn create(&self, ctx: &ResourceContext) -> Result<Task> {
        match self.variant {
            ParentDevice::VirtualLink { .. } => {
                Ok(Self::device_command(ctx, CMD_LINK_ADD_VETH, Bindings::new())?.into_task())
            }
            ParentDevice::GenericPhysical => Err(Error::Unsupported(format!(
                "physical device {} cannot be created",
                ctx.key()
            ))),
            _ => Ok(Task::empty()),
        }
    }

    fn delete(&self, ctx: &ResourceContext) -> Result<Task> {
        match self.variant {
            ParentDevice::VirtualLink { .. } => {
                Ok(Self::device_command(ctx, CMD_LINK_DELETE, Bindings::new())?.into_task())
            }
            _ => Ok(Task::empty()),
        }
    }

    fn setter(&self, ctx: &ResourceContext, attribute: &str) -> Result<Option<Task>> {
        if matches!(
            self.variant,
            ParentDevice::MemoryShared { .. } | ParentDevice::HardwareOffload { .. }
        ) {
            return Ok(None);
        }

        let (template, on) = match attribute {
            "up" => (CMD_LINK_SET_STATE, ("up", "down")),
            "offload" => (CMD_SET_OFFLOAD, ("on", "off")),
            _ => return Ok(None),
        };
        let state = match ctx.resource().get_opt(attribute)? {
            Some(Value::Bool(true)) => on.0,
            Some(_) => on.1,
            None => return Ok(None),
        };
        let bindings = Bindings::new().value("state", state);
        Ok(Some(Self::device_command(ctx, template, bindings)?.into_task()))
    }
}
