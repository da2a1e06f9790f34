//! Resource lifecycle protocol
//!
//! Every resource kind implements [`Lifecycle`]: it describes how to probe,
//! create and delete an instance, which named methods it accepts and which
//! attribute setters/getters it provides. Bodies return [`Task`] values; the
//! [`Engine`](crate::Engine) runs them and drives the state machine.

use crate::lock::ForwarderLock;
use crate::manager::{ResourceHandle, ResourceManager};
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netbed_common::{
    CommandExecutor, EngineConfig, Error, Operation, ResourceKey, Result, Value,
};
use serde::Serialize;
use std::sync::Arc;

/// Last failed operation of a resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub operation: Operation,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(operation: Operation, error: &Error) -> Self {
        Self {
            operation,
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Per-kind lifecycle bodies
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Resource kind this behavior applies to
    fn kind(&self) -> &str;

    /// Kinds whose instances must all be present before this one starts
    fn after(&self) -> Vec<String> {
        Vec::new()
    }

    /// Control-channel lock owned by instances of this kind
    fn lock(&self) -> Option<ForwarderLock> {
        None
    }

    /// Runs once, right after the resource is committed
    async fn initialize(&self, _ctx: &ResourceContext) -> Result<()> {
        Ok(())
    }

    /// Probe external state; fails with `ResourceNotFound` when absent
    fn get(&self, ctx: &ResourceContext) -> Result<Task>;

    fn create(&self, ctx: &ResourceContext) -> Result<Task>;

    fn delete(&self, ctx: &ResourceContext) -> Result<Task>;

    fn method(&self, ctx: &ResourceContext, name: &str) -> Result<Task> {
        Err(Error::UnknownMethod {
            kind: ctx.resource().kind().to_string(),
            method: name.to_string(),
        })
    }

    /// Task pushing a new attribute value out, if the attribute has a setter
    fn setter(&self, _ctx: &ResourceContext, _attribute: &str) -> Result<Option<Task>> {
        Ok(None)
    }

    /// Task reading an attribute's current value back, if it has a getter
    fn getter(&self, _ctx: &ResourceContext, _attribute: &str) -> Result<Option<Task>> {
        Ok(None)
    }
}

/// A resource together with the registry it lives in
#[derive(Clone)]
pub struct ResourceContext {
    manager: Arc<ResourceManager>,
    resource: ResourceHandle,
}

impl ResourceContext {
    pub fn new(manager: Arc<ResourceManager>, resource: ResourceHandle) -> Self {
        Self { manager, resource }
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    pub fn shared_manager(&self) -> Arc<ResourceManager> {
        self.manager.clone()
    }

    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    pub fn key(&self) -> &ResourceKey {
        self.resource.key()
    }

    pub fn config(&self) -> &EngineConfig {
        self.manager.config()
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.resource.get(name)
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        self.resource.get_str(name)
    }

    pub fn get_ref(&self, name: &str) -> Result<ResourceKey> {
        self.resource.get_ref(name)
    }

    /// Resource referenced by attribute `name`
    pub fn related(&self, name: &str) -> Result<ResourceHandle> {
        self.manager.get(&self.resource.get_ref(name)?)
    }

    /// Context for another resource of the same registry
    pub fn for_resource(&self, key: &ResourceKey) -> Result<ResourceContext> {
        Ok(Self::new(self.manager.clone(), self.manager.get(key)?))
    }

    /// Executor running this resource's external commands
    pub fn executor(&self) -> Result<Arc<dyn CommandExecutor>> {
        self.manager.executor_for(self.key())
    }

    pub fn executor_of(&self, key: &ResourceKey) -> Result<Arc<dyn CommandExecutor>> {
        self.manager.executor_for(key)
    }

    /// Write task updates into their target resources
    pub fn apply(&self, output: &TaskOutput) -> Result<()> {
        for update in &output.updates {
            let key = update.target.as_ref().unwrap_or(self.resource.key());
            self.manager.set(key, &update.attribute, update.value.clone())?;
        }
        Ok(())
    }
}
