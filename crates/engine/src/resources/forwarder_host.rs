//! Forwarder host
//!
//! Host-side preparation a forwarder needs: the userspace I/O driver and the
//! NICs bound to it. Containers running a forwarder get the resulting
//! `/dev/uio*` devices exposed.

use super::commands::*;
use super::{FORWARDER_HOST, NODE};
use crate::attribute::{AttrType, Attribute, Multiplicity, Schema};
use crate::lifecycle::{Lifecycle, ResourceContext};
use crate::manager::Resource;
use crate::task::{ExternalTask, Task, TaskOutput};
use crate::template::Bindings;
use async_trait::async_trait;
use netbed_common::{EngineConfig, ResourceKey, Result, Value};
use std::sync::Arc;

pub fn schema(config: &EngineConfig) -> Result<Arc<Schema>> {
    Schema::builder(FORWARDER_HOST)
        .attribute(
            Attribute::new("node", AttrType::reference(NODE))
                .mandatory()
                .reverse("forwarder_host"),
        )
        .attribute(
            Attribute::new("driver", AttrType::string())
                .default_value(config.forwarder.driver.as_str()),
        )
        .attribute(
            Attribute::new("uio_devices", AttrType::string())
                .multiplicity(Multiplicity::OneToMany)
                .describe("Userspace I/O device nodes, e.g. uio0"),
        )
        .attribute(
            Attribute::new("dpdk_devices", AttrType::string())
                .multiplicity(Multiplicity::OneToMany)
                .describe("PCI addresses handed over to the forwarder"),
        )
        .key(&["node"])
        .build()
}

pub fn declare(schema: &Arc<Schema>, node: &ResourceKey) -> Resource {
    Resource::new(schema.clone()).with("node", node.clone())
}

#[derive(Debug, Default)]
pub struct ForwarderHost;

impl ForwarderHost {
    fn host_command(ctx: &ResourceContext, template: &str, bindings: Bindings) -> Result<ExternalTask> {
        ExternalTask::new(ctx.executor()?, template, bindings.resource("host", ctx.key()))
    }
}

#[async_trait]
impl Lifecycle for ForwarderHost {
    fn kind(&self) -> &str {
        FORWARDER_HOST
    }

    fn get(&self, ctx: &ResourceContext) -> Result<Task> {
        Ok(Self::host_command(ctx, CMD_DRIVER_LOADED, Bindings::new())?
            .probe(ctx.key())
            .into_task())
    }

    fn create(&self, ctx: &ResourceContext) -> Result<Task> {
        Ok(Self::host_command(ctx, CMD_DRIVER_LOAD, Bindings::new())?.into_task())
    }

    fn delete(&self, _ctx: &ResourceContext) -> Result<Task> {
        Ok(Task::empty())
    }

    fn setter(&self, ctx: &ResourceContext, attribute: &str) -> Result<Option<Task>> {
        if attribute != "dpdk_devices" {
            return Ok(None);
        }
        let mut binds = Vec::new();
        for device in ctx.resource().get_list("dpdk_devices")? {
            let bindings = Bindings::new().value("pci_address", device);
            binds.push(Self::host_command(ctx, CMD_DRIVER_BIND, bindings)?.into_task());
        }
        Ok(Some(Task::seq(binds)))
    }

    fn getter(&self, ctx: &ResourceContext, attribute: &str) -> Result<Option<Task>> {
        if attribute != "uio_devices" {
            return Ok(None);
        }
        let list = Self::host_command(ctx, CMD_LIST_UIO, Bindings::new())?.with_parse(|_, out| {
            let devices: Vec<Value> = out
                .stdout_str()
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(Value::from)
                .collect();
            Ok(TaskOutput::new().set("uio_devices", Value::List(devices)))
        });
        Ok(Some(list.into_task()))
    }
}
