//! Forwarder
//!
//! The packet-processing service on a node. Every command sent to its
//! control channel or service unit runs under the forwarder's lock.

use super::commands::*;
use super::{FORWARDER, FORWARDER_INTERFACE};
use crate::attribute::{AttrType, Attribute, Multiplicity, Schema};
use crate::lifecycle::{Lifecycle, ResourceContext};
use crate::lock::ForwarderLock;
use crate::manager::Resource;
use crate::task::{ExternalTask, Task};
use crate::template::Bindings;
use async_trait::async_trait;
use netbed_common::{EngineConfig, Error, LifecycleState, ResourceKey, Result, Value};
use std::sync::Arc;

pub fn schema(_config: &EngineConfig) -> Result<Arc<Schema>> {
    Schema::builder(FORWARDER)
        .attribute(Attribute::new("node", AttrType::any_reference()).mandatory())
        .attribute(
            Attribute::new("interfaces", AttrType::reference(FORWARDER_INTERFACE))
                .multiplicity(Multiplicity::OneToMany),
        )
        .attribute(
            Attribute::new("plugins", AttrType::string())
                .multiplicity(Multiplicity::OneToMany)
                .describe("Plugins enabled through the control channel"),
        )
        .key(&["node"])
        .build()
}

pub fn declare(schema: &Arc<Schema>, node: &ResourceKey) -> Resource {
    Resource::new(schema.clone()).with("node", node.clone())
}

/// Lifecycle of a forwarder; owns the control-channel lock
#[derive(Debug, Clone)]
pub struct Forwarder {
    lock: ForwarderLock,
}

impl Forwarder {
    pub fn new(node: &ResourceKey) -> Self {
        Self {
            lock: ForwarderLock::new(format!("forwarder({})", node.parts.join(","))),
        }
    }

    fn service_command(&self, ctx: &ResourceContext, template: &str) -> Result<Task> {
        let bindings = Bindings::new().value("service", ctx.config().forwarder.service.as_str());
        Ok(ExternalTask::new(ctx.executor()?, template, bindings)?.locked(&self.lock))
    }

    fn enable_plugins(&self, ctx: &ResourceContext) -> Result<Task> {
        let mut tasks = Vec::new();
        for plugin in ctx.resource().get_list("plugins")? {
            let bindings = Bindings::new()
                .value("ctl", ctx.config().forwarder.ctl.as_str())
                .value("plugin", plugin);
            tasks.push(ExternalTask::new(ctx.executor()?, CMD_FWD_ENABLE_PLUGIN, bindings)?.locked(&self.lock));
        }
        Ok(Task::seq(tasks))
    }
}

#[async_trait]
impl Lifecycle for Forwarder {
    fn kind(&self) -> &str {
        FORWARDER
    }

    fn lock(&self) -> Option<ForwarderLock> {
        Some(self.lock.clone())
    }

    fn get(&self, ctx: &ResourceContext) -> Result<Task> {
        let bindings = Bindings::new().value("service", ctx.config().forwarder.service.as_str());
        Ok(ExternalTask::new(ctx.executor()?, CMD_SERVICE_ACTIVE, bindings)?
            .probe(ctx.key())
            .locked(&self.lock))
    }

    /// Starts the service once the node's forwarder host is prepared
    fn create(&self, ctx: &ResourceContext) -> Result<Task> {
        let node = ctx.related("node")?;
        let wait = match node.get_opt("forwarder_host")? {
            Some(Value::Reference(host)) => Task::wait(&host, LifecycleState::Present),
            _ => Task::empty(),
        };
        Ok(wait.then(self.service_command(ctx, CMD_SERVICE_START)?))
    }

    fn delete(&self, ctx: &ResourceContext) -> Result<Task> {
        self.service_command(ctx, CMD_SERVICE_STOP)
    }

    fn method(&self, ctx: &ResourceContext, name: &str) -> Result<Task> {
        match name {
            "start" => self.service_command(ctx, CMD_SERVICE_START),
            "stop" => self.service_command(ctx, CMD_SERVICE_STOP),
            "enable-plugins" => self.enable_plugins(ctx),
            _ => Err(Error::UnknownMethod {
                kind: FORWARDER.to_string(),
                method: name.to_string(),
            }),
        }
    }

    fn setter(&self, ctx: &ResourceContext, attribute: &str) -> Result<Option<Task>> {
        match attribute {
            "plugins" => Ok(Some(self.enable_plugins(ctx)?)),
            _ => Ok(None),
        }
    }
}
