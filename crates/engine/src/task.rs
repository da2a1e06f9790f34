//! Task algebra
//!
//! Provisioning work is described as a [`Task`] value before anything runs.
//! Tasks compose with [`Task::seq`]/[`Task::then`], can be wrapped in a
//! forwarder lock and can wait on another resource's lifecycle state. The
//! composed value can be inspected with [`Task::steps`] without executing it.

use crate::lifecycle::ResourceContext;
use crate::lock::ForwarderLock;
use crate::manager::ResourceManager;
use crate::template::{Bindings, CommandTemplate};
use futures::future::BoxFuture;
use futures::FutureExt;
use netbed_common::{
    CommandExecutor, CommandOutput, Error, LifecycleState, ResourceKey, Result, Value,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Attribute write produced by a task
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Resource to write; `None` means the resource running the task
    pub target: Option<ResourceKey>,
    pub attribute: String,
    pub value: Value,
}

/// Result of running a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub updates: Vec<Update>,
    /// Free-form result, e.g. image metadata returned by a method
    pub value: Option<serde_json::Value>,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `attribute` on the running resource
    pub fn set(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates.push(Update {
            target: None,
            attribute: attribute.into(),
            value: value.into(),
        });
        self
    }

    /// Write `attribute` on another resource
    pub fn set_on(
        mut self,
        key: &ResourceKey,
        attribute: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.updates.push(Update {
            target: Some(key.clone()),
            attribute: attribute.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    fn merge(&mut self, other: TaskOutput) {
        self.updates.extend(other.updates);
        if other.value.is_some() {
            self.value = other.value;
        }
    }
}

type InlineFn = Arc<dyn Fn(&ResourceContext) -> Result<TaskOutput> + Send + Sync>;
type CallFn = Arc<dyn Fn(ResourceContext) -> BoxFuture<'static, Result<TaskOutput>> + Send + Sync>;
type ParseFn = Arc<dyn Fn(&ResourceContext, &CommandOutput) -> Result<TaskOutput> + Send + Sync>;

#[derive(Clone)]
enum InlineBody {
    Sync(InlineFn),
    Async(CallFn),
}

/// In-process computation against the running resource
#[derive(Clone)]
pub struct InlineTask {
    label: String,
    body: InlineBody,
}

impl InlineTask {
    pub fn label(&self) -> &str {
        &self.label
    }

    async fn execute(&self, ctx: &ResourceContext) -> Result<TaskOutput> {
        trace!("{}: inline {}", ctx.key(), self.label);
        match &self.body {
            InlineBody::Sync(f) => f(ctx),
            InlineBody::Async(f) => f(ctx.clone()).await,
        }
    }
}

/// Templated command run through an executor
#[derive(Clone)]
pub struct ExternalTask {
    executor: Arc<dyn CommandExecutor>,
    template: CommandTemplate,
    bindings: Bindings,
    parse: Option<ParseFn>,
    probe: Option<ResourceKey>,
}

impl ExternalTask {
    /// Build a command task; every placeholder must be bound
    pub fn new(executor: Arc<dyn CommandExecutor>, template: &str, bindings: Bindings) -> Result<Self> {
        let template = CommandTemplate::parse(template)?;
        template.check(&bindings)?;
        Ok(Self {
            executor,
            template,
            bindings,
            parse: None,
            probe: None,
        })
    }

    /// Turn captured output into attribute updates
    pub fn with_parse<F>(mut self, parse: F) -> Self
    where
        F: Fn(&ResourceContext, &CommandOutput) -> Result<TaskOutput> + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(parse));
        self
    }

    /// Treat a non-zero exit as "`key` not found" instead of a failure
    pub fn probe(mut self, key: &ResourceKey) -> Self {
        self.probe = Some(key.clone());
        self
    }

    pub fn template(&self) -> &str {
        self.template.source()
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Render the command without running it
    pub fn render(&self, manager: &ResourceManager) -> Result<String> {
        self.template.render(&self.bindings, manager)
    }

    pub fn locked(self, lock: &ForwarderLock) -> Task {
        Task::External(self).locked(lock)
    }

    pub fn into_task(self) -> Task {
        Task::External(self)
    }

    async fn execute(&self, ctx: &ResourceContext) -> Result<TaskOutput> {
        let command = self.render(ctx.manager())?;
        debug!("{}: [{}] {}", ctx.key(), self.executor.name(), command.trim());

        let output = self.executor.execute(&command, true).await?;
        if let Some(key) = &self.probe {
            if !output.success() {
                return Err(Error::ResourceNotFound {
                    key: key.to_string(),
                });
            }
        }
        let output = output.check(command.trim())?;

        match &self.parse {
            Some(parse) => parse(ctx, &output),
            None => Ok(TaskOutput::default()),
        }
    }
}

/// Suspends until another resource reaches a lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitTask {
    pub key: ResourceKey,
    pub target: LifecycleState,
    pub timeout: Option<Duration>,
}

impl WaitTask {
    async fn execute(&self, manager: &ResourceManager) -> Result<TaskOutput> {
        let handle = manager.get(&self.key)?;
        let mut rx = handle.subscribe();
        let target = self.target;
        let timeout_err = |state: LifecycleState| Error::DependencyTimeout {
            key: self.key.to_string(),
            state: state.to_string(),
            target: target.to_string(),
        };

        trace!("Waiting for {} to be {}", self.key, target);
        let wait = async {
            rx.wait_for(|s| *s == target || s.is_terminal())
                .await
                .map(|s| *s)
        };
        let reached = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| timeout_err(handle.state()))?,
            None => wait.await,
        };

        match reached {
            Ok(state) if state == target => Ok(TaskOutput::default()),
            Ok(state) => {
                warn!("{} reached {} while waiting for {}", self.key, state, target);
                Err(timeout_err(state))
            }
            Err(_) => Err(timeout_err(handle.state())),
        }
    }
}

/// A unit of work
#[derive(Clone, Default)]
pub enum Task {
    #[default]
    Empty,
    Inline(InlineTask),
    External(ExternalTask),
    Wait(WaitTask),
    /// Runs `task` while holding `lock`
    Locked {
        lock: ForwarderLock,
        task: Box<Task>,
    },
    /// Runs each task in order, stopping at the first failure
    Seq(Vec<Task>),
}

/// Flat view of a task for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Inline(String),
    External {
        template: String,
        lock: Option<String>,
    },
    Wait {
        key: ResourceKey,
        target: LifecycleState,
    },
}

impl Task {
    pub fn empty() -> Self {
        Task::Empty
    }

    /// Synchronous computation; returned updates are merged into resources
    pub fn inline<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ResourceContext) -> Result<TaskOutput> + Send + Sync + 'static,
    {
        Task::Inline(InlineTask {
            label: label.into(),
            body: InlineBody::Sync(Arc::new(f)),
        })
    }

    /// Asynchronous computation, e.g. a hypervisor call
    pub fn call<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(ResourceContext) -> BoxFuture<'static, Result<TaskOutput>> + Send + Sync + 'static,
    {
        Task::Inline(InlineTask {
            label: label.into(),
            body: InlineBody::Async(Arc::new(f)),
        })
    }

    pub fn wait(key: &ResourceKey, target: LifecycleState) -> Self {
        Task::Wait(WaitTask {
            key: key.clone(),
            target,
            timeout: None,
        })
    }

    pub fn wait_timeout(key: &ResourceKey, target: LifecycleState, timeout: Duration) -> Self {
        Task::Wait(WaitTask {
            key: key.clone(),
            target,
            timeout: Some(timeout),
        })
    }

    /// Sequential composition, flattening nested sequences and dropping no-ops
    pub fn seq(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut flat = Vec::new();
        for task in tasks {
            match task {
                Task::Empty => {}
                Task::Seq(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Task::Empty,
            1 => flat.pop().unwrap_or_default(),
            _ => Task::Seq(flat),
        }
    }

    pub fn then(self, next: Task) -> Self {
        Task::seq([self, next])
    }

    pub fn locked(self, lock: &ForwarderLock) -> Self {
        match self {
            Task::Empty => Task::Empty,
            task => Task::Locked {
                lock: lock.clone(),
                task: Box::new(task),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Task::Empty)
    }

    /// Flattened list of the steps this task would run
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = Vec::new();
        self.collect_steps(None, &mut steps);
        steps
    }

    fn collect_steps(&self, lock: Option<&str>, out: &mut Vec<Step>) {
        match self {
            Task::Empty => {}
            Task::Inline(t) => out.push(Step::Inline(t.label.clone())),
            Task::External(t) => out.push(Step::External {
                template: t.template().to_string(),
                lock: lock.map(str::to_string),
            }),
            Task::Wait(t) => out.push(Step::Wait {
                key: t.key.clone(),
                target: t.target,
            }),
            Task::Locked { lock, task } => task.collect_steps(Some(lock.name()), out),
            Task::Seq(tasks) => tasks.iter().for_each(|t| t.collect_steps(lock, out)),
        }
    }

    /// External command tasks in execution order
    pub fn externals(&self) -> Vec<&ExternalTask> {
        match self {
            Task::External(t) => vec![t],
            Task::Locked { task, .. } => task.externals(),
            Task::Seq(tasks) => tasks.iter().flat_map(Task::externals).collect(),
            _ => Vec::new(),
        }
    }

    pub fn count_external(&self) -> usize {
        self.externals().len()
    }

    /// Execute against `ctx`, applying updates as each step completes
    pub fn run<'a>(&'a self, ctx: &'a ResourceContext) -> BoxFuture<'a, Result<TaskOutput>> {
        async move {
            match self {
                Task::Empty => Ok(TaskOutput::default()),
                Task::Inline(t) => {
                    let out = t.execute(ctx).await?;
                    ctx.apply(&out)?;
                    Ok(out)
                }
                Task::External(t) => {
                    let out = t.execute(ctx).await?;
                    ctx.apply(&out)?;
                    Ok(out)
                }
                Task::Wait(t) => t.execute(ctx.manager()).await,
                Task::Locked { lock, task } => {
                    let _guard = lock.acquire().await;
                    task.run(ctx).await
                }
                Task::Seq(tasks) => {
                    let mut output = TaskOutput::default();
                    for task in tasks {
                        output.merge(task.run(ctx).await?);
                    }
                    Ok(output)
                }
            }
        }
        .boxed()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Empty => write!(f, "empty"),
            Task::Inline(t) => write!(f, "inline({})", t.label),
            Task::External(t) => write!(f, "external({})", t.template().trim()),
            Task::Wait(t) => write!(f, "wait({}, {})", t.key, t.target),
            Task::Locked { lock, task } => write!(f, "locked({}, {})", lock.name(), task),
            Task::Seq(tasks) => {
                let parts: Vec<String> = tasks.iter().map(ToString::to_string).collect();
                write!(f, "seq[{}]", parts.join(", "))
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::{context, RecordingExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_seq_flattens_and_drops_empty() {
        let a = Task::inline("a", |_| Ok(TaskOutput::new()));
        let b = Task::inline("b", |_| Ok(TaskOutput::new()));
        let c = Task::inline("c", |_| Ok(TaskOutput::new()));
        let task = a.then(Task::empty()).then(b.then(c));
        assert_eq!(
            task.steps(),
            vec![
                Step::Inline("a".into()),
                Step::Inline("b".into()),
                Step::Inline("c".into())
            ]
        );
        assert!(Task::seq([Task::empty(), Task::empty()]).is_empty());
    }

    #[tokio::test]
    async fn test_seq_short_circuits() {
        let (_manager, ctx) = context();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();

        let task = Task::inline("fail", |_| Err(Error::Unsupported("boom".into()))).then(
            Task::inline("count", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(TaskOutput::new())
            }),
        );

        assert!(task.run(&ctx).await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_effects_persist() {
        let (_manager, ctx) = context();
        let task = Task::inline("first", |_| Ok(TaskOutput::new().set("label", "set")))
            .then(Task::inline("fail", |_| Err(Error::Unsupported("boom".into()))));

        assert!(task.run(&ctx).await.is_err());
        assert_eq!(ctx.resource().get_str("label").unwrap(), "set");
    }

    #[tokio::test]
    async fn test_lock_released_on_failure() {
        let (_manager, ctx) = context();
        let lock = ForwarderLock::new("vpp1");
        let task = Task::inline("fail", |_| Err(Error::Unsupported("boom".into()))).locked(&lock);

        assert!(task.run(&ctx).await.is_err());
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_external_failure_and_parse() {
        let (_manager, ctx) = context();
        let exec = Arc::new(RecordingExecutor::new());
        exec.respond("show", 0, "42\n");
        exec.respond("broken", 1, "");

        let ok = ExternalTask::new(exec.clone(), "show {what}", Bindings::new().value("what", "x"))
            .unwrap()
            .with_parse(|_, out| Ok(TaskOutput::new().set("label", out.stdout_str().trim())));
        ok.into_task().run(&ctx).await.unwrap();
        assert_eq!(ctx.resource().get_str("label").unwrap(), "42");

        let bad = ExternalTask::new(exec.clone(), "broken", Bindings::new()).unwrap();
        let err = bad.into_task().run(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::CommandExecution { exit_code: 1, .. }));

        let probe = ExternalTask::new(exec.clone(), "broken", Bindings::new())
            .unwrap()
            .probe(ctx.key());
        let err = probe.into_task().run(&ctx).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(exec.commands(), vec!["show x", "broken", "broken"]);
    }

    #[test]
    fn test_missing_binding_rejected_at_construction() {
        let exec = Arc::new(RecordingExecutor::new());
        let err = ExternalTask::new(exec, "ip link set dev {dev} up", Bindings::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn test_steps_report_lock() {
        let exec = Arc::new(RecordingExecutor::new());
        let lock = ForwarderLock::new("vpp1");
        let task = ExternalTask::new(exec, "vppctl show memif", Bindings::new())
            .unwrap()
            .locked(&lock);
        assert_eq!(
            task.steps(),
            vec![Step::External {
                template: "vppctl show memif".into(),
                lock: Some("vpp1".into())
            }]
        );
        assert_eq!(task.count_external(), 1);
    }
}
