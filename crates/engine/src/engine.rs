//! Lifecycle driver
//!
//! Moves resources through
//! `unresolved -> {present, absent} -> creating -> present | failed` and
//! `present -> deleting -> removed | failed`, running the task bodies each
//! kind provides. Failures are recorded on the resource and returned; nothing
//! is retried here.

use crate::lifecycle::{FailureReport, Lifecycle, ResourceContext};
use crate::manager::{Resource, ResourceHandle, ResourceManager};
use crate::task::TaskOutput;
use futures::future::join_all;
use netbed_common::{
    Error, LifecycleState, Operation, ResourceKey, Result, Value,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives resource lifecycles over a shared registry
#[derive(Clone)]
pub struct Engine {
    manager: Arc<ResourceManager>,
}

impl Engine {
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    fn context(&self, key: &ResourceKey) -> Result<ResourceContext> {
        Ok(ResourceContext::new(self.manager.clone(), self.manager.get(key)?))
    }

    /// Register a resource and run its one-time initialization
    pub async fn commit(&self, resource: Resource, behavior: Arc<dyn Lifecycle>) -> Result<ResourceHandle> {
        let handle = self.manager.commit(resource, behavior)?;
        let ctx = ResourceContext::new(self.manager.clone(), handle.clone());
        if let Err(e) = handle.behavior().initialize(&ctx).await {
            fail(&handle, Operation::Initialize, &e);
            return Err(e);
        }
        Ok(handle)
    }

    /// Probe external state, moving the resource to `present` or `absent`
    pub async fn resolve(&self, key: &ResourceKey) -> Result<LifecycleState> {
        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;
        self.resolve_locked(&ctx).await
    }

    async fn resolve_locked(&self, ctx: &ResourceContext) -> Result<LifecycleState> {
        let handle = ctx.resource();
        let state = handle.state();
        if !matches!(
            state,
            LifecycleState::Unresolved | LifecycleState::Absent | LifecycleState::Present
        ) {
            return Err(transition(handle, LifecycleState::Present));
        }

        let probe = handle.behavior().get(ctx);
        let result = match probe {
            Ok(task) => task.run(ctx).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                handle.set_state(LifecycleState::Present);
                debug!("{} is present", handle.key());
                Ok(LifecycleState::Present)
            }
            Err(e) if e.is_not_found() => {
                handle.set_state(LifecycleState::Absent);
                debug!("{} is absent", handle.key());
                Ok(LifecycleState::Absent)
            }
            Err(e) => {
                fail(handle, Operation::Get, &e);
                Err(e)
            }
        }
    }

    /// Run the provisioning task of an `absent` resource
    pub async fn create(&self, key: &ResourceKey) -> Result<()> {
        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;
        self.create_locked(&ctx).await
    }

    async fn create_locked(&self, ctx: &ResourceContext) -> Result<()> {
        let handle = ctx.resource();
        if handle.state() != LifecycleState::Absent {
            return Err(transition(handle, LifecycleState::Creating));
        }

        handle.set_state(LifecycleState::Creating);
        info!("Creating {}", handle.key());

        match self.run_create(ctx).await {
            Ok(()) => {
                handle.set_state(LifecycleState::Present);
                info!("Created {}", handle.key());
                Ok(())
            }
            Err(e) => {
                fail(handle, Operation::Create, &e);
                Err(e)
            }
        }
    }

    async fn run_create(&self, ctx: &ResourceContext) -> Result<()> {
        let behavior = ctx.resource().behavior().clone();
        behavior.create(ctx)?.run(ctx).await?;

        // Push out every value written before or during creation, once
        for attribute in ctx.resource().take_dirty() {
            if let Some(task) = behavior.setter(ctx, &attribute)? {
                debug!("{}: running setter for {}", ctx.key(), attribute);
                task.run(ctx).await?;
            }
        }
        Ok(())
    }

    /// Tear down a `present` resource and release its key
    pub async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;

        if handle.state() != LifecycleState::Present {
            return Err(transition(&handle, LifecycleState::Deleting));
        }

        handle.set_state(LifecycleState::Deleting);
        info!("Deleting {}", key);

        let result = match handle.behavior().delete(&ctx) {
            Ok(task) => task.run(&ctx).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                handle.set_state(LifecycleState::Removed);
                self.manager.remove(key)?;
                info!("Deleted {}", key);
                Ok(())
            }
            Err(e) => {
                fail(&handle, Operation::Delete, &e);
                Err(e)
            }
        }
    }

    /// Invoke a named method on a `present` resource.
    ///
    /// A failing method is recorded but leaves the lifecycle state unchanged.
    pub async fn invoke(&self, key: &ResourceKey, method: &str) -> Result<TaskOutput> {
        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;

        if handle.state() != LifecycleState::Present {
            return Err(Error::InvalidStateTransition {
                key: key.to_string(),
                from: handle.state().to_string(),
                to: format!("method:{}", method),
            });
        }

        info!("Invoking {} on {}", method, key);
        let result = match handle.behavior().method(&ctx, method) {
            Ok(task) => task.run(&ctx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Method {} on {} failed: {}", method, key, e);
            handle.record_failure(FailureReport::new(Operation::Method(method.to_string()), e));
        }
        result
    }

    /// Write an attribute; on a `present` resource its setter runs right away
    pub async fn set_attribute(&self, key: &ResourceKey, attribute: &str, value: Value) -> Result<()> {
        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;

        self.manager.set(key, attribute, value)?;
        if handle.state() != LifecycleState::Present {
            return Ok(());
        }

        let result = match handle.behavior().setter(&ctx, attribute) {
            Ok(Some(task)) => task.run(&ctx).await.map(|_| ()),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        handle.clear_dirty(attribute);
        if let Err(e) = &result {
            fail(&handle, Operation::Set(attribute.to_string()), e);
        }
        result
    }

    /// Read an attribute back through its getter, if the kind has one
    pub async fn refresh_attribute(&self, key: &ResourceKey, attribute: &str) -> Result<Value> {
        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;

        match handle.behavior().getter(&ctx, attribute)? {
            Some(task) => {
                if let Err(e) = task.run(&ctx).await {
                    warn!("Refreshing {} on {} failed: {}", attribute, key, e);
                    handle.record_failure(FailureReport::new(
                        Operation::Refresh(attribute.to_string()),
                        &e,
                    ));
                    return Err(e);
                }
                handle.get(attribute)
            }
            None => handle.get(attribute),
        }
    }

    /// Verify declared requirements and `after` kinds, one hop only
    pub fn check_requirements(&self, key: &ResourceKey) -> Result<()> {
        let handle = self.manager.get(key)?;
        for requirement in handle.requirements() {
            requirement.check(&self.manager, &handle)?;
        }
        for kind in handle.behavior().after() {
            for other in self.manager.handles_of_kind(&kind) {
                if other.state() != LifecycleState::Present {
                    return Err(Error::RequirementUnmet {
                        key: key.to_string(),
                        requirement: format!("after {} ({} is {})", kind, other.key(), other.state()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Bring one resource to `present`: check requirements, probe, create if absent
    pub async fn converge(&self, key: &ResourceKey) -> Result<LifecycleState> {
        self.check_requirements(key)?;

        let ctx = self.context(key)?;
        let handle = ctx.resource().clone();
        let _busy = handle.busy.lock().await;

        if handle.state() == LifecycleState::Present {
            return Ok(LifecycleState::Present);
        }
        if self.resolve_locked(&ctx).await? == LifecycleState::Absent {
            self.create_locked(&ctx).await?;
        }
        Ok(handle.state())
    }

    /// Converge several resources concurrently
    pub async fn converge_all(&self, keys: &[ResourceKey]) -> Vec<(ResourceKey, Result<LifecycleState>)> {
        let results = join_all(keys.iter().map(|key| self.converge(key))).await;
        keys.iter().cloned().zip(results).collect()
    }

    /// Forget a `failed` instance's outcome so the next pass probes it again
    pub fn reset(&self, key: &ResourceKey) -> Result<()> {
        let handle = self.manager.get(key)?;
        if handle.state() != LifecycleState::Failed {
            return Err(transition(&handle, LifecycleState::Unresolved));
        }
        handle.clear_failure();
        handle.set_state(LifecycleState::Unresolved);
        info!("Reset {}", key);
        Ok(())
    }
}

fn fail(handle: &ResourceHandle, operation: Operation, e: &Error) {
    error!("{} failed during {}: {}", handle.key(), operation, e);
    handle.record_failure(FailureReport::new(operation, e));
    handle.set_state(LifecycleState::Failed);
}

fn transition(handle: &ResourceHandle, to: LifecycleState) -> Error {
    Error::InvalidStateTransition {
        key: handle.key().to_string(),
        from: handle.state().to_string(),
        to: to.to_string(),
    }
}
