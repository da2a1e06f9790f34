//! Resource registry
//!
//! Holds every committed resource by key, keeps reverse relations in sync and
//! maps nodes to the executors that run their external commands.

use crate::attribute::{AttributeStore, Schema};
use crate::lifecycle::{FailureReport, Lifecycle};
use crate::lock::ForwarderLock;
use crate::requirement::Requirement;
use netbed_common::{
    CommandExecutor, EngineConfig, Error, LifecycleState, ResourceKey, Result, Value,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Shared handle to a committed resource
pub type ResourceHandle = Arc<ResourceEntry>;

/// Construction descriptor for a resource
#[derive(Debug, Clone)]
pub struct Resource {
    schema: Arc<Schema>,
    values: Vec<(String, Value)>,
    requirements: Vec<Requirement>,
    parent: Option<ResourceKey>,
}

impl Resource {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            values: Vec::new(),
            requirements: Vec::new(),
            parent: None,
        }
    }

    /// Supply an attribute value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Non-owning parent used for configuration inheritance
    pub fn parent(mut self, key: &ResourceKey) -> Self {
        self.parent = Some(key.clone());
        self
    }

    pub fn kind(&self) -> &str {
        self.schema.kind()
    }
}

/// A committed resource instance
pub struct ResourceEntry {
    key: ResourceKey,
    schema: Arc<Schema>,
    store: Mutex<AttributeStore>,
    requirements: Vec<Requirement>,
    parent: Option<ResourceKey>,
    state: watch::Sender<LifecycleState>,
    failure: Mutex<Option<FailureReport>>,
    behavior: Arc<dyn Lifecycle>,
    /// Serializes lifecycle operations on this resource
    pub(crate) busy: tokio::sync::Mutex<()>,
}

impl ResourceEntry {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn kind(&self) -> &str {
        &self.key.kind
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn behavior(&self) -> &Arc<dyn Lifecycle> {
        &self.behavior
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn parent(&self) -> Option<&ResourceKey> {
        self.parent.as_ref()
    }

    /// Read an attribute, resolving its default if needed
    pub fn get(&self, name: &str) -> Result<Value> {
        self.store.lock().resolve(&self.schema, &self.key, name)
    }

    /// Read an attribute, mapping unset and null to `None`
    pub fn get_opt(&self, name: &str) -> Result<Option<Value>> {
        match self.get(name) {
            Ok(Value::Null) => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(Error::AttributeUnset { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            Value::Null => Err(self.unset(name)),
            v => Ok(v.to_string()),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(Error::constraint(
                name,
                format!("expected bool, found {}", other.type_name()),
            )),
        }
    }

    pub fn get_ref(&self, name: &str) -> Result<ResourceKey> {
        match self.get(name)? {
            Value::Reference(key) => Ok(key),
            Value::Null => Err(self.unset(name)),
            other => Err(Error::constraint(
                name,
                format!("expected reference, found {}", other.type_name()),
            )),
        }
    }

    pub fn get_list(&self, name: &str) -> Result<Vec<Value>> {
        match self.get(name)? {
            Value::List(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            single => Ok(vec![single]),
        }
    }

    /// Explicit and memoized values, sorted by name
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.store
            .lock()
            .values()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) -> LifecycleState {
        let previous = self.state.send_replace(state);
        debug!("{}: {} -> {}", self.key, previous, state);
        previous
    }

    pub fn failure(&self) -> Option<FailureReport> {
        self.failure.lock().clone()
    }

    pub(crate) fn record_failure(&self, report: FailureReport) {
        *self.failure.lock() = Some(report);
    }

    pub(crate) fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Attributes written since their setter last ran
    pub fn take_dirty(&self) -> Vec<String> {
        self.store.lock().take_dirty()
    }

    pub(crate) fn clear_dirty(&self, name: &str) {
        self.store.lock().clear_dirty(name);
    }

    /// Control-channel lock owned by this resource, if any
    pub fn lock(&self) -> Option<ForwarderLock> {
        self.behavior.lock()
    }

    fn unset(&self, name: &str) -> Error {
        Error::AttributeUnset {
            resource: self.key.to_string(),
            attribute: name.to_string(),
        }
    }
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

/// Registry of committed resources
pub struct ResourceManager {
    config: Arc<EngineConfig>,
    resources: RwLock<HashMap<ResourceKey, ResourceHandle>>,
    executors: RwLock<HashMap<ResourceKey, Arc<dyn CommandExecutor>>>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ResourceManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            resources: RwLock::new(HashMap::new()),
            executors: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a descriptor and register the resulting instance
    pub fn commit(&self, resource: Resource, behavior: Arc<dyn Lifecycle>) -> Result<ResourceHandle> {
        let schema = resource.schema;
        if behavior.kind() != schema.kind() {
            return Err(Error::InvalidSchema {
                kind: schema.kind().to_string(),
                reason: format!("behavior is for kind {}", behavior.kind()),
            });
        }

        let mut store = AttributeStore::default();
        for (name, value) in resource.values {
            store.assign(&schema, &name, value)?;
        }

        // Key parts may be defaulted, so they resolve against a placeholder key
        let provisional = ResourceKey::new(schema.kind(), Vec::<String>::new());
        let mut parts = Vec::new();
        for name in schema.key_attributes() {
            let part = match store.resolve(&schema, &provisional, name)? {
                Value::Reference(key) => key.parts.join("/"),
                Value::Null => {
                    return Err(Error::AttributeUnset {
                        resource: schema.kind().to_string(),
                        attribute: name.clone(),
                    })
                }
                v => v.to_string(),
            };
            parts.push(part);
        }
        let key = ResourceKey::new(schema.kind(), parts);

        for attr in schema.attributes().filter(|a| a.mandatory) {
            match store.resolve(&schema, &key, &attr.name)? {
                Value::Null => {
                    return Err(Error::AttributeUnset {
                        resource: key.to_string(),
                        attribute: attr.name.clone(),
                    })
                }
                _ => continue,
            }
        }

        let mut requirements = resource.requirements;
        for attr in schema.attributes() {
            for name in &attr.requirements {
                requirements.push(Requirement::through(&attr.name, name));
            }
        }

        let (state, _) = watch::channel(LifecycleState::Unresolved);
        let entry = Arc::new(ResourceEntry {
            key: key.clone(),
            schema: schema.clone(),
            store: Mutex::new(store),
            requirements,
            parent: resource.parent,
            state,
            failure: Mutex::new(None),
            behavior,
            busy: tokio::sync::Mutex::new(()),
        });

        // Reverse targets must exist before the entry becomes visible
        let links: Vec<(String, ResourceKey)> = schema
            .attributes()
            .filter_map(|attr| {
                let reverse = attr.reverse.clone()?;
                let target = entry.store.lock().explicit(&attr.name)?.as_reference()?.clone();
                Some((reverse, target))
            })
            .collect();
        for (reverse, target) in &links {
            let target = self.get(target)?;
            target.schema().require(reverse)?;
        }

        {
            let mut resources = self.resources.write();
            if resources.contains_key(&key) {
                return Err(Error::AlreadyExists {
                    key: key.to_string(),
                });
            }
            resources.insert(key.clone(), entry.clone());
        }

        for (reverse, target) in links {
            self.link(&key, &reverse, &target, true)?;
        }

        info!("Committed resource {}", key);
        Ok(entry)
    }

    /// Look up a resource by key
    pub fn get(&self, key: &ResourceKey) -> Result<ResourceHandle> {
        self.resources
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownResource {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.resources.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn handles_of_kind(&self, kind: &str) -> Vec<ResourceHandle> {
        let mut handles: Vec<_> = self
            .resources
            .read()
            .values()
            .filter(|h| h.kind() == kind)
            .cloned()
            .collect();
        handles.sort_by(|a, b| a.key().cmp(b.key()));
        handles
    }

    /// Write an attribute, keeping reverse relations consistent
    pub fn set(&self, key: &ResourceKey, name: &str, value: Value) -> Result<()> {
        let entry = self.get(key)?;
        let attr = entry.schema().require(name)?;
        if entry.schema().key_attributes().iter().any(|k| k == name) {
            return Err(Error::constraint(name, format!("key attribute of {} is immutable", key)));
        }
        let reverse = attr.reverse.clone();

        let value = attr.validate(value)?;
        if let (Some(reverse), Some(target)) = (&reverse, value.as_reference()) {
            self.get(target)?.schema().require(reverse)?;
        }

        let previous = entry.store.lock().assign(entry.schema(), name, value.clone())?;

        if let Some(reverse) = reverse {
            if let Some(old) = previous.as_ref().and_then(Value::as_reference) {
                if Some(old) != value.as_reference() {
                    self.link(key, &reverse, old, false)?;
                }
            }
            if let Some(new) = value.as_reference() {
                if previous.as_ref().and_then(Value::as_reference) != Some(new) {
                    self.link(key, &reverse, new, true)?;
                }
            }
        }
        Ok(())
    }

    /// Drop a resource, releasing its key and unlinking reverse relations
    pub fn remove(&self, key: &ResourceKey) -> Result<ResourceHandle> {
        let entry = self
            .resources
            .write()
            .remove(key)
            .ok_or_else(|| Error::UnknownResource {
                key: key.to_string(),
            })?;

        let links: Vec<(String, ResourceKey)> = entry
            .schema()
            .attributes()
            .filter_map(|attr| {
                let reverse = attr.reverse.clone()?;
                let target = entry.store.lock().explicit(&attr.name)?.as_reference()?.clone();
                Some((reverse, target))
            })
            .collect();
        for (reverse, target) in links {
            if self.contains(&target) {
                self.link(key, &reverse, &target, false)?;
            }
        }
        self.executors.write().remove(key);

        info!("Removed resource {}", key);
        Ok(entry)
    }

    /// Add or remove `owner` in the reverse attribute of `target`
    fn link(&self, owner: &ResourceKey, reverse: &str, target: &ResourceKey, add: bool) -> Result<()> {
        let target = self.get(target)?;
        let attr = target.schema().require(reverse)?;
        let mut store = target.store.lock();

        let current = store.explicit(reverse).cloned().unwrap_or(Value::Null);
        let updated = match attr.multiplicity {
            crate::attribute::Multiplicity::OneToMany => {
                let mut items = current.as_list().map(<[Value]>::to_vec).unwrap_or_default();
                items.retain(|v| v.as_reference() != Some(owner));
                if add {
                    items.push(Value::Reference(owner.clone()));
                }
                Value::List(items)
            }
            _ if add => Value::Reference(owner.clone()),
            _ if current.as_reference() == Some(owner) => Value::Null,
            _ => current,
        };
        store.insert_quiet(reverse, updated);
        Ok(())
    }

    /// Register the executor running commands for `key`
    pub fn register_executor(&self, key: &ResourceKey, executor: Arc<dyn CommandExecutor>) {
        debug!("Registered executor {} for {}", executor.name(), key);
        self.executors.write().insert(key.clone(), executor);
    }

    /// Executor for a resource: its own, or the one of its `node`
    pub fn executor_for(&self, key: &ResourceKey) -> Result<Arc<dyn CommandExecutor>> {
        let mut current = key.clone();
        // Bounded by the number of resources, guarding against node cycles
        let hops = self.resources.read().len();
        for _ in 0..=hops {
            if let Some(executor) = self.executors.read().get(&current) {
                return Ok(executor.clone());
            }
            let entry = self.get(&current)?;
            match entry.schema().attribute("node") {
                Some(_) => current = entry.get_ref("node")?,
                None => break,
            }
        }
        Err(Error::Integration(format!("no executor reachable from {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttrType, Attribute, Multiplicity};
    use crate::lifecycle::tests::Noop;

    fn schemas() -> (Arc<Schema>, Arc<Schema>) {
        let forwarder = Schema::builder("forwarder")
            .attribute(Attribute::new("name", AttrType::string()).mandatory())
            .attribute(
                Attribute::new("interfaces", AttrType::reference("forwarder_interface"))
                    .multiplicity(Multiplicity::OneToMany),
            )
            .attribute(
                Attribute::new("bridged", AttrType::reference("forwarder_interface"))
                    .multiplicity(Multiplicity::OneToMany),
            )
            .key(&["name"])
            .build()
            .unwrap();
        let iface = Schema::builder("forwarder_interface")
            .attribute(Attribute::new("name", AttrType::string()).mandatory())
            .attribute(
                Attribute::new("forwarder", AttrType::reference("forwarder"))
                    .mandatory()
                    .multiplicity(Multiplicity::ManyToOne)
                    .reverse("interfaces"),
            )
            .attribute(Attribute::new("bridge", AttrType::reference("forwarder")).reverse("bridged"))
            .key(&["forwarder", "name"])
            .build()
            .unwrap();
        (forwarder, iface)
    }

    fn noop(kind: &str) -> Arc<dyn Lifecycle> {
        Arc::new(Noop::new(kind))
    }

    #[test]
    fn test_commit_links_reverse_collection() {
        let manager = ResourceManager::default();
        let (fs, is) = schemas();
        let fwd = manager
            .commit(Resource::new(fs).with("name", "vpp1"), noop("forwarder"))
            .unwrap();
        let iface = manager
            .commit(
                Resource::new(is)
                    .with("name", "memif0")
                    .with("forwarder", fwd.key().clone()),
                noop("forwarder_interface"),
            )
            .unwrap();

        assert_eq!(
            iface.key(),
            &ResourceKey::new("forwarder_interface", ["vpp1", "memif0"])
        );
        assert_eq!(
            fwd.get_list("interfaces").unwrap(),
            vec![Value::Reference(iface.key().clone())]
        );

        manager.remove(iface.key()).unwrap();
        assert!(fwd.get_list("interfaces").unwrap().is_empty());
        assert!(!manager.contains(iface.key()));
    }

    #[test]
    fn test_mandatory_missing_fails_before_registration() {
        let manager = ResourceManager::default();
        let (_, is) = schemas();
        let err = manager
            .commit(Resource::new(is).with("name", "memif0"), noop("forwarder_interface"))
            .unwrap_err();
        assert!(matches!(err, Error::AttributeUnset { .. }));
        assert!(manager.keys().is_empty());
    }

    #[test]
    fn test_duplicate_key() {
        let manager = ResourceManager::default();
        let (fs, _) = schemas();
        manager
            .commit(Resource::new(fs.clone()).with("name", "vpp1"), noop("forwarder"))
            .unwrap();
        let err = manager
            .commit(Resource::new(fs).with("name", "vpp1"), noop("forwarder"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_set_moves_reverse_relation() {
        let manager = ResourceManager::default();
        let (fs, is) = schemas();
        let a = manager
            .commit(Resource::new(fs.clone()).with("name", "a"), noop("forwarder"))
            .unwrap();
        let b = manager
            .commit(Resource::new(fs).with("name", "b"), noop("forwarder"))
            .unwrap();
        let iface = manager
            .commit(
                Resource::new(is)
                    .with("name", "i0")
                    .with("forwarder", a.key().clone())
                    .with("bridge", a.key().clone()),
                noop("forwarder_interface"),
            )
            .unwrap();
        assert_eq!(
            a.get_list("bridged").unwrap(),
            vec![Value::Reference(iface.key().clone())]
        );

        manager
            .set(iface.key(), "bridge", Value::Reference(b.key().clone()))
            .unwrap();
        assert!(a.get_list("bridged").unwrap().is_empty());
        assert_eq!(
            b.get_list("bridged").unwrap(),
            vec![Value::Reference(iface.key().clone())]
        );
        // The keyed relation is untouched
        assert_eq!(a.get_list("interfaces").unwrap().len(), 1);
    }

    #[test]
    fn test_set_rejects_key_reference() {
        let manager = ResourceManager::default();
        let (fs, is) = schemas();
        let a = manager
            .commit(Resource::new(fs.clone()).with("name", "a"), noop("forwarder"))
            .unwrap();
        let b = manager
            .commit(Resource::new(fs).with("name", "b"), noop("forwarder"))
            .unwrap();
        let iface = manager
            .commit(
                Resource::new(is)
                    .with("name", "i0")
                    .with("forwarder", a.key().clone()),
                noop("forwarder_interface"),
            )
            .unwrap();

        let err = manager
            .set(iface.key(), "forwarder", Value::Reference(b.key().clone()))
            .unwrap_err();
        assert!(matches!(err, Error::AttributeConstraintViolation { .. }));
        assert!(b.get_list("interfaces").unwrap().is_empty());
    }

    #[test]
    fn test_key_is_immutable() {
        let manager = ResourceManager::default();
        let (fs, _) = schemas();
        let fwd = manager
            .commit(Resource::new(fs).with("name", "vpp1"), noop("forwarder"))
            .unwrap();
        let err = manager.set(fwd.key(), "name", "vpp2".into()).unwrap_err();
        assert!(matches!(err, Error::AttributeConstraintViolation { .. }));
    }

    #[test]
    fn test_unknown_resource() {
        let manager = ResourceManager::default();
        let err = manager.get(&ResourceKey::named("node", "n1")).unwrap_err();
        assert!(matches!(err, Error::UnknownResource { .. }));
    }
}
