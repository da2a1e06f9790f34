//! Containers
//!
//! A container is itself a node: net devices and forwarders can live inside
//! it, and its commands run through the hypervisor. Creation builds a
//! descriptor from the instance attributes, the requested profiles and the
//! hypervisor's image cache.

use super::commands::CMD_CONTAINER_PID;
use super::net_device::{self, NetDevice, ParentDevice};
use super::{Schemas, CONTAINER, NET_DEVICE, NODE};
use crate::address::AddressAllocator;
use crate::attribute::{AttrType, Attribute, Multiplicity, Schema};
use crate::hypervisor::{
    ContainerDescriptor, ContainerExecutor, DeviceDescriptor, HypervisorClient, ImageSource,
    PublishDescriptor, PublishSource,
};
use crate::lifecycle::{Lifecycle, ResourceContext};
use crate::manager::Resource;
use crate::task::{ExternalTask, Task, TaskOutput};
use crate::template::Bindings;
use async_trait::async_trait;
use futures::FutureExt;
use netbed_common::{EngineConfig, Error, LifecycleState, ResourceKey, Result, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub fn schema(config: &EngineConfig) -> Result<Arc<Schema>> {
    Schema::builder(CONTAINER)
        .attribute(Attribute::new("name", AttrType::string()).mandatory())
        .attribute(
            Attribute::new("container_name", AttrType::constrained(64, true, &['/', ',', ':']))
                .default_from("name"),
        )
        .attribute(
            Attribute::new("architecture", AttrType::string())
                .default_value(config.container.default_architecture.as_str()),
        )
        .attribute(Attribute::new("ephemeral", AttrType::Bool).default_value(false))
        .attribute(
            Attribute::new("node", AttrType::reference(NODE))
                .mandatory()
                .describe("Node hosting the container"),
        )
        .attribute(
            Attribute::new("profiles", AttrType::string())
                .multiplicity(Multiplicity::OneToMany)
                .default_value(Value::List(vec!["default".into()])),
        )
        .attribute(Attribute::new("image", AttrType::string()))
        .attribute(Attribute::new("is_image", AttrType::Bool).default_value(false))
        .attribute(
            Attribute::new("dist", AttrType::string())
                .default_value(config.container.default_distribution.as_str())
                .describe("Distribution alias pulled when the image is not cached"),
        )
        .attribute(Attribute::new("pid", AttrType::Integer))
        .attribute(Attribute::new("host_interface", AttrType::reference(NET_DEVICE)))
        .attribute(
            Attribute::new("interfaces", AttrType::any_reference())
                .multiplicity(Multiplicity::OneToMany),
        )
        .attribute(Attribute::new("forwarder_host", AttrType::any_reference()))
        .key(&["name"])
        .build()
}

pub fn declare(schema: &Arc<Schema>, name: &str, node: &ResourceKey) -> Resource {
    Resource::new(schema.clone())
        .with("name", name)
        .with("node", node.clone())
}

/// Lifecycle of a container
#[derive(Clone)]
pub struct Container {
    schemas: Arc<Schemas>,
    hypervisor: Arc<dyn HypervisorClient>,
    allocator: Arc<dyn AddressAllocator>,
}

impl Container {
    pub fn new(
        schemas: Arc<Schemas>,
        hypervisor: Arc<dyn HypervisorClient>,
        allocator: Arc<dyn AddressAllocator>,
    ) -> Self {
        Self {
            schemas,
            hypervisor,
            allocator,
        }
    }

    /// Build the hypervisor descriptor for this container
    pub async fn descriptor(&self, ctx: &ResourceContext) -> Result<ContainerDescriptor> {
        let resource = ctx.resource();
        let config = &ctx.config().container;
        let container_name = resource.get_str("container_name")?;
        let node = ctx.related("node")?;

        let mut descriptor = ContainerDescriptor {
            name: container_name.clone(),
            architecture: resource.get_str("architecture")?,
            ephemeral: resource.get_bool("ephemeral")?,
            profiles: vec!["default".to_string()],
            config: BTreeMap::new(),
            devices: BTreeMap::new(),
            source: ImageSource::local(String::new()),
        };

        // Profile overlays
        for profile in resource.get_list("profiles")? {
            if profile.as_str() != Some(config.forwarder_profile.as_str()) {
                continue;
            }
            descriptor
                .config
                .insert("raw.lxc".to_string(), config.forwarder_raw_lxc.clone());
            descriptor
                .config
                .insert("security.privileged".to_string(), "true".to_string());

            if let Some(Value::Reference(host)) = node.get_opt("forwarder_host")? {
                for device in ctx.manager().get(&host)?.get_list("uio_devices")? {
                    let device = device.to_string();
                    descriptor.devices.insert(
                        device.clone(),
                        DeviceDescriptor::new("unix-char").with("path", format!("/dev/{}", device)),
                    );
                }
            }
        }

        // Management NIC, not for image templates
        if !resource.get_bool("is_image")? {
            descriptor
                .config
                .insert("user.network_mode".to_string(), "link-local".to_string());

            let iface = ctx.related("host_interface")?;
            let device_name = iface.get_str("device_name")?;
            let prefix = format!("veth-{}", container_name);
            let nic = DeviceDescriptor::new("nic")
                .with("name", device_name.as_str())
                .with("nictype", "bridged")
                .with("parent", node.get_str("bridge")?)
                .with("hwaddr", self.allocator.get_mac(ctx.key())?)
                .with(
                    "host_name",
                    self.allocator.get_name("device_name", ctx.key(), &prefix, &prefix)?,
                );
            descriptor.devices.insert(device_name, nic);
        }

        // Image source
        let aliases = self.hypervisor.list_aliases().await?;
        let image = resource.get_opt("image")?.map(|v| v.to_string());
        descriptor.source = match image {
            Some(image) if aliases.iter().any(|a| a.name == image) => ImageSource::local(image),
            image => match resource.get_opt("dist")? {
                Some(dist) => ImageSource::pull(
                    dist.to_string(),
                    config.source_server.as_str(),
                    config.source_protocol.as_str(),
                ),
                None => {
                    return Err(Error::ImageUnresolved {
                        image: image.unwrap_or_else(|| container_name.clone()),
                    })
                }
            },
        };

        debug!("Container description: {:?}", descriptor);
        Ok(descriptor)
    }

    fn publish_descriptor(container_name: &str, architecture: &str) -> PublishDescriptor {
        let mut properties = BTreeMap::new();
        properties.insert("os".to_string(), "Ubuntu".to_string());
        properties.insert("architecture".to_string(), architecture.to_string());
        properties.insert(
            "description".to_string(),
            format!("Image generated from container {}", container_name),
        );
        PublishDescriptor {
            public: true,
            properties,
            source: PublishSource {
                kind: "container".to_string(),
                name: format!("image-{}", container_name),
            },
        }
    }

    fn uses_forwarder(ctx: &ResourceContext) -> Result<bool> {
        let profile = ctx.config().container.forwarder_profile.as_str();
        Ok(ctx
            .resource()
            .get_list("profiles")?
            .iter()
            .any(|p| p.as_str() == Some(profile)))
    }

    /// Read the forwarder host's UIO devices back before they are exposed
    fn refresh_uio_task(host: &ResourceKey) -> Task {
        let host = host.clone();
        Task::call("refresh uio devices", move |ctx| {
            let host = host.clone();
            async move {
                let host_ctx = ctx.for_resource(&host)?;
                let getter = host_ctx.resource().behavior().getter(&host_ctx, "uio_devices")?;
                if let Some(task) = getter {
                    task.run(&host_ctx).await?;
                }
                Ok(TaskOutput::new())
            }
            .boxed()
        })
    }

    fn start_task(&self) -> Task {
        let hypervisor = self.hypervisor.clone();
        Task::call("start container", move |ctx| {
            let hypervisor = hypervisor.clone();
            async move {
                let name = ctx.get_str("container_name")?;
                hypervisor.start(&name).await?;
                Ok(TaskOutput::new())
            }
            .boxed()
        })
    }

    fn stop_task(&self) -> Task {
        let hypervisor = self.hypervisor.clone();
        Task::call("stop container", move |ctx| {
            let hypervisor = hypervisor.clone();
            async move {
                let name = ctx.get_str("container_name")?;
                hypervisor.stop(&name).await?;
                Ok(TaskOutput::new())
            }
            .boxed()
        })
    }
}

#[async_trait]
impl Lifecycle for Container {
    fn kind(&self) -> &str {
        CONTAINER
    }

    /// Adds the management interface and routes commands through the hypervisor
    async fn initialize(&self, ctx: &ResourceContext) -> Result<()> {
        let container_name = ctx.get_str("container_name")?;
        ctx.manager().register_executor(
            ctx.key(),
            Arc::new(ContainerExecutor::new(self.hypervisor.clone(), container_name)),
        );

        let management = ctx.config().container.management_device.clone();
        let device = net_device::declare(
            &self.schemas.net_device,
            ctx.key(),
            &management,
            &ParentDevice::GenericPhysical,
        )?
        .with("owner", ctx.key().clone())
        .with("monitored", false);
        let handle = ctx.manager().commit(
            device,
            Arc::new(NetDevice::new(ParentDevice::GenericPhysical)),
        )?;
        ctx.manager()
            .set(ctx.key(), "host_interface", Value::Reference(handle.key().clone()))?;
        Ok(())
    }

    fn get(&self, _ctx: &ResourceContext) -> Result<Task> {
        let hypervisor = self.hypervisor.clone();
        Ok(Task::call("lookup container", move |ctx| {
            let hypervisor = hypervisor.clone();
            async move {
                let name = ctx.get_str("container_name")?;
                hypervisor.get(&name).await?;
                Ok(TaskOutput::new())
            }
            .boxed()
        }))
    }

    /// Waits for the node's forwarder host, then creates and starts
    fn create(&self, ctx: &ResourceContext) -> Result<Task> {
        let prepare = match ctx.related("node")?.get_opt("forwarder_host")? {
            Some(Value::Reference(host)) if Self::uses_forwarder(ctx)? => {
                Task::wait(&host, LifecycleState::Present).then(Self::refresh_uio_task(&host))
            }
            Some(Value::Reference(host)) => Task::wait(&host, LifecycleState::Present),
            _ => Task::empty(),
        };

        let this = self.clone();
        let create = Task::call("create container", move |ctx| {
            let this = this.clone();
            async move {
                let descriptor = this.descriptor(&ctx).await?;
                info!("Creating container {}", descriptor.name);
                this.hypervisor.create(&descriptor, true).await?;
                Ok(TaskOutput::new())
            }
            .boxed()
        });

        Ok(Task::seq([prepare, create, self.start_task()]))
    }

    fn delete(&self, _ctx: &ResourceContext) -> Result<Task> {
        let hypervisor = self.hypervisor.clone();
        Ok(Task::call("remove container", move |ctx| {
            let hypervisor = hypervisor.clone();
            async move {
                let name = ctx.get_str("container_name")?;
                info!("Delete container {}", name);
                hypervisor.remove(&name).await?;

                // Devices derived on initialize go with the container
                if let Some(Value::Reference(iface)) = ctx.resource().get_opt("host_interface")? {
                    if ctx.manager().contains(&iface) {
                        ctx.manager().remove(&iface)?;
                    }
                }
                Ok(TaskOutput::new())
            }
            .boxed()
        }))
    }

    fn method(&self, ctx: &ResourceContext, name: &str) -> Result<Task> {
        match name {
            "start" => Ok(self.start_task()),
            "stop" => Ok(self.stop_task()),
            "publish-as-image" => {
                let hypervisor = self.hypervisor.clone();
                Ok(Task::call("publish image", move |ctx| {
                    let hypervisor = hypervisor.clone();
                    async move {
                        let descriptor = Self::publish_descriptor(
                            &ctx.get_str("container_name")?,
                            &ctx.get_str("architecture")?,
                        );
                        let metadata = hypervisor.publish_image(&descriptor).await?;
                        Ok(TaskOutput::new().with_value(metadata))
                    }
                    .boxed()
                }))
            }
            _ => Err(Error::UnknownMethod {
                kind: ctx.resource().kind().to_string(),
                method: name.to_string(),
            }),
        }
    }

    fn getter(&self, ctx: &ResourceContext, attribute: &str) -> Result<Option<Task>> {
        if attribute != "pid" {
            return Ok(None);
        }
        let node = ctx.get_ref("node")?;
        let pid = ExternalTask::new(
            ctx.executor_of(&node)?,
            CMD_CONTAINER_PID,
            Bindings::new().resource("container", ctx.key()),
        )?
        .with_parse(|_, out| Ok(TaskOutput::new().set("pid", out.stdout_str().trim())));
        Ok(Some(pid.into_task()))
    }
}
