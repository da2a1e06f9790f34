//! Physical node
//!
//! A host the engine reaches through a command executor. Nodes are assumed
//! to exist; the engine never creates one.

use super::{FORWARDER_HOST, NODE};
use crate::attribute::{AttrType, Attribute, Multiplicity, Schema};
use crate::lifecycle::{Lifecycle, ResourceContext};
use crate::manager::Resource;
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;
use netbed_common::{EngineConfig, Error, Result, ShellExecutor};
use std::sync::Arc;

pub fn schema(config: &EngineConfig) -> Result<Arc<Schema>> {
    Schema::builder(NODE)
        .attribute(Attribute::new("name", AttrType::string()).mandatory())
        .attribute(
            Attribute::new("bridge", AttrType::string())
                .default_value(config.container.default_bridge.as_str())
                .describe("Bridge containers attach their management NIC to"),
        )
        .attribute(Attribute::new("forwarder_host", AttrType::reference(FORWARDER_HOST)))
        .attribute(
            Attribute::new("interfaces", AttrType::any_reference())
                .multiplicity(Multiplicity::OneToMany),
        )
        .key(&["name"])
        .build()
}

pub fn declare(schema: &Arc<Schema>, name: &str) -> Resource {
    Resource::new(schema.clone()).with("name", name)
}

/// Lifecycle of a physical node
#[derive(Debug, Default)]
pub struct Node;

#[async_trait]
impl Lifecycle for Node {
    fn kind(&self) -> &str {
        NODE
    }

    /// Commands run through the local shell until another executor is registered
    async fn initialize(&self, ctx: &ResourceContext) -> Result<()> {
        let name = ctx.get_str("name")?;
        let shell = ShellExecutor::new(name, ctx.config().shell.program.as_str());
        ctx.manager().register_executor(ctx.key(), Arc::new(shell));
        Ok(())
    }

    fn get(&self, _ctx: &ResourceContext) -> Result<Task> {
        Ok(Task::inline("node exists", |_| Ok(TaskOutput::new())))
    }

    fn create(&self, ctx: &ResourceContext) -> Result<Task> {
        Err(Error::Unsupported(format!("cannot create physical node {}", ctx.key())))
    }

    fn delete(&self, _ctx: &ResourceContext) -> Result<Task> {
        Ok(Task::empty())
    }
}
