//! Attribute model
//!
//! Attributes are declared once per resource kind on a [`Schema`]. Instances
//! keep their values in an [`AttributeStore`]; defaults are resolved lazily
//! on first read and memoized.

use ipnetwork::IpNetwork;
use netbed_common::{Error, ResourceKey, Result, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Constraints on string attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringConstraint {
    pub max_len: Option<usize>,
    pub ascii: bool,
    pub forbidden: Vec<char>,
}

/// Semantic type of an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrType {
    String(StringConstraint),
    Integer,
    Bool,
    Address,
    /// One of a closed set of names
    Enum(Vec<String>),
    /// Reference to another resource, optionally restricted to one kind
    Reference(Option<String>),
}

impl AttrType {
    /// Unconstrained string
    pub fn string() -> Self {
        AttrType::String(StringConstraint::default())
    }

    /// String with charset/length constraints
    pub fn constrained(max_len: usize, ascii: bool, forbidden: &[char]) -> Self {
        AttrType::String(StringConstraint {
            max_len: Some(max_len),
            ascii,
            forbidden: forbidden.to_vec(),
        })
    }

    pub fn enumeration(choices: &[&str]) -> Self {
        AttrType::Enum(choices.iter().map(|c| c.to_string()).collect())
    }

    pub fn reference(kind: &str) -> Self {
        AttrType::Reference(Some(kind.to_string()))
    }

    pub fn any_reference() -> Self {
        AttrType::Reference(None)
    }

    fn coerce(&self, attribute: &str, value: Value) -> Result<Value> {
        match (self, value) {
            (AttrType::String(c), Value::String(s)) => {
                if let Some(max) = c.max_len {
                    if s.chars().count() > max {
                        return Err(Error::constraint(
                            attribute,
                            format!("'{}' is longer than {} characters", s, max),
                        ));
                    }
                }
                if c.ascii && !s.is_ascii() {
                    return Err(Error::constraint(
                        attribute,
                        format!("'{}' contains non-ASCII characters", s),
                    ));
                }
                if let Some(ch) = s.chars().find(|ch| c.forbidden.contains(ch)) {
                    return Err(Error::constraint(
                        attribute,
                        format!("'{}' contains forbidden character '{}'", s, ch),
                    ));
                }
                Ok(Value::String(s))
            }
            (AttrType::Integer, Value::Integer(n)) => Ok(Value::Integer(n)),
            (AttrType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| Error::constraint(attribute, format!("'{}' is not an integer", s))),
            (AttrType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (AttrType::Bool, Value::String(s)) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(Error::constraint(
                    attribute,
                    format!("'{}' is not a boolean", other),
                )),
            },
            (AttrType::Address, Value::Address(a)) => Ok(Value::Address(a)),
            (AttrType::Address, Value::String(s)) => s
                .trim()
                .parse::<IpNetwork>()
                .map(Value::Address)
                .map_err(|e| Error::constraint(attribute, format!("'{}': {}", s, e))),
            (AttrType::Enum(choices), Value::String(s)) => {
                if choices.contains(&s) {
                    Ok(Value::String(s))
                } else {
                    Err(Error::constraint(
                        attribute,
                        format!("'{}' is not one of {}", s, choices.join("|")),
                    ))
                }
            }
            (AttrType::Reference(kind), Value::Reference(key)) => match kind {
                Some(kind) if *kind != key.kind => Err(Error::constraint(
                    attribute,
                    format!("{} is not a {}", key, kind),
                )),
                _ => Ok(Value::Reference(key)),
            },
            (ty, other) => Err(Error::constraint(
                attribute,
                format!("{} value does not fit {:?}", other.type_name(), ty),
            )),
        }
    }
}

/// Cardinality of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplicity {
    #[default]
    One,
    /// Ordered sequence of values
    OneToMany,
    /// Single reference whose target keeps the reverse collection
    ManyToOne,
}

type ComputeFn = Arc<dyn Fn(&HashMap<String, Value>) -> Value + Send + Sync>;

/// How an unset attribute gets its value
#[derive(Clone, Default)]
pub enum DefaultRule {
    #[default]
    None,
    Literal(Value),
    /// Take the value of another attribute of the same resource
    Sibling(String),
    /// Zero-argument rule over the values already held by the resource
    Computed(ComputeFn),
}

impl fmt::Debug for DefaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultRule::None => write!(f, "None"),
            DefaultRule::Literal(v) => write!(f, "Literal({:?})", v),
            DefaultRule::Sibling(name) => write!(f, "Sibling({})", name),
            DefaultRule::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// Declaration of a named, typed field of a resource kind
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub ty: AttrType,
    pub default: DefaultRule,
    pub mandatory: bool,
    pub multiplicity: Multiplicity,
    /// Attribute on the referenced resource holding the reverse relation
    pub reverse: Option<String>,
    /// Names of resources, reached through this attribute, that must be
    /// present before the owner's lifecycle starts
    pub requirements: Vec<String>,
    pub description: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: AttrType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: DefaultRule::None,
            mandatory: false,
            multiplicity: Multiplicity::One,
            reverse: None,
            requirements: Vec::new(),
            description: None,
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultRule::Literal(value.into());
        self
    }

    pub fn default_from(mut self, sibling: impl Into<String>) -> Self {
        self.default = DefaultRule::Sibling(sibling.into());
        self
    }

    pub fn computed<F>(mut self, rule: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Value + Send + Sync + 'static,
    {
        self.default = DefaultRule::Computed(Arc::new(rule));
        self
    }

    pub fn multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn reverse(mut self, name: impl Into<String>) -> Self {
        self.reverse = Some(name.into());
        self
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.requirements.push(name.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check `value` against type, constraints and multiplicity.
    ///
    /// Returns the normalized value: strings coerced to the declared type and
    /// scalars wrapped into a singleton list for `OneToMany`.
    pub fn validate(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            if self.mandatory {
                return Err(Error::constraint(&self.name, "mandatory attribute cannot be null"));
            }
            return Ok(Value::Null);
        }

        match (self.multiplicity, value) {
            (Multiplicity::OneToMany, Value::List(items)) => items
                .into_iter()
                .map(|item| self.ty.coerce(&self.name, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            (Multiplicity::OneToMany, scalar) => {
                Ok(Value::List(vec![self.ty.coerce(&self.name, scalar)?]))
            }
            (_, Value::List(_)) => Err(Error::constraint(&self.name, "expected a single value")),
            (_, scalar) => self.ty.coerce(&self.name, scalar),
        }
    }
}

/// Attribute declarations of one resource kind
#[derive(Debug)]
pub struct Schema {
    kind: String,
    attributes: Vec<Attribute>,
    index: HashMap<String, usize>,
    key: Vec<String>,
}

impl Schema {
    pub fn builder(kind: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            kind: kind.into(),
            attributes: Vec::new(),
            key: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.index.get(name).map(|&i| &self.attributes[i])
    }

    /// Look up an attribute, failing with `UnknownAttribute`
    pub fn require(&self, name: &str) -> Result<&Attribute> {
        self.attribute(name).ok_or_else(|| Error::UnknownAttribute {
            kind: self.kind.clone(),
            attribute: name.to_string(),
        })
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Names of the attributes forming the resource key, in order
    pub fn key_attributes(&self) -> &[String] {
        &self.key
    }
}

/// Builder for [`Schema`]
pub struct SchemaBuilder {
    kind: String,
    attributes: Vec<Attribute>,
    key: Vec<String>,
}

impl SchemaBuilder {
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn key(mut self, names: &[&str]) -> Self {
        self.key = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn build(self) -> Result<Arc<Schema>> {
        let invalid = |reason: String| Error::InvalidSchema {
            kind: self.kind.clone(),
            reason,
        };

        let mut index = HashMap::new();
        for (i, attr) in self.attributes.iter().enumerate() {
            if index.insert(attr.name.clone(), i).is_some() {
                return Err(invalid(format!("attribute {} declared twice", attr.name)));
            }
        }

        if self.key.is_empty() {
            return Err(invalid("no key attributes".to_string()));
        }
        for name in &self.key {
            match index.get(name) {
                None => return Err(invalid(format!("key attribute {} is not declared", name))),
                Some(&i) if self.attributes[i].multiplicity == Multiplicity::OneToMany => {
                    return Err(invalid(format!("key attribute {} is multi-valued", name)))
                }
                Some(_) => {}
            }
        }

        for attr in &self.attributes {
            if attr.reverse.is_some() && !matches!(attr.ty, AttrType::Reference(_)) {
                return Err(invalid(format!(
                    "attribute {} declares a reverse relation but is not a reference",
                    attr.name
                )));
            }
            if let DefaultRule::Sibling(target) = &attr.default {
                if !index.contains_key(target) {
                    return Err(invalid(format!(
                        "default of {} refers to undeclared attribute {}",
                        attr.name, target
                    )));
                }
            }
        }

        // Sibling defaults must not loop back on themselves
        for attr in &self.attributes {
            let mut seen = HashSet::new();
            let mut current = attr;
            seen.insert(current.name.as_str());
            while let DefaultRule::Sibling(next) = &current.default {
                if !seen.insert(next.as_str()) {
                    return Err(invalid(format!(
                        "cyclic default starting at {}",
                        attr.name
                    )));
                }
                current = &self.attributes[index[next]];
            }
        }

        Ok(Arc::new(Schema {
            kind: self.kind,
            attributes: self.attributes,
            index,
            key: self.key,
        }))
    }
}

/// Per-instance attribute values
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    values: HashMap<String, Value>,
    /// Attributes written since their setter last ran
    dirty: BTreeSet<String>,
}

impl AttributeStore {
    /// Validate and store a value, marking the attribute dirty
    pub fn assign(&mut self, schema: &Schema, name: &str, value: Value) -> Result<Option<Value>> {
        let value = schema.require(name)?.validate(value)?;
        self.dirty.insert(name.to_string());
        Ok(self.values.insert(name.to_string(), value))
    }

    /// Store a value without marking it dirty (reverse relations)
    pub(crate) fn insert_quiet(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn explicit(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Read an attribute, resolving and memoizing its default if unset
    pub fn resolve(&mut self, schema: &Schema, owner: &ResourceKey, name: &str) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }

        let attr = schema.require(name)?;
        let value = match &attr.default {
            DefaultRule::Literal(v) => v.clone(),
            DefaultRule::Sibling(other) => self.resolve(schema, owner, other)?,
            DefaultRule::Computed(rule) => rule(&self.values),
            DefaultRule::None if attr.multiplicity == Multiplicity::OneToMany => {
                Value::List(Vec::new())
            }
            DefaultRule::None => {
                return Err(Error::AttributeUnset {
                    resource: owner.to_string(),
                    attribute: name.to_string(),
                })
            }
        };

        let value = attr.validate(value)?;
        self.values.insert(name.to_string(), value.clone());
        Ok(value)
    }

    pub fn take_dirty(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn clear_dirty(&mut self, name: &str) {
        self.dirty.remove(name);
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn container_schema() -> Arc<Schema> {
        Schema::builder("container")
            .attribute(Attribute::new("name", AttrType::string()).mandatory())
            .attribute(
                Attribute::new("container_name", AttrType::constrained(64, true, &['/', ',', ':']))
                    .default_from("name"),
            )
            .attribute(Attribute::new("ephemeral", AttrType::Bool).default_value(false))
            .attribute(
                Attribute::new("profiles", AttrType::string())
                    .multiplicity(Multiplicity::OneToMany)
                    .default_value(Value::List(vec!["default".into()])),
            )
            .attribute(Attribute::new("image", AttrType::string()))
            .key(&["name"])
            .build()
            .unwrap()
    }

    #[test_case("c1", true ; "plain name")]
    #[test_case("a/b", false ; "forbidden slash")]
    #[test_case("a:b", false ; "forbidden colon")]
    #[test_case("caf\u{e9}", false ; "non ascii")]
    fn test_container_name_constraint(name: &str, ok: bool) {
        let schema = container_schema();
        let attr = schema.attribute("container_name").unwrap();
        assert_eq!(attr.validate(Value::from(name)).is_ok(), ok);
    }

    #[test]
    fn test_length_constraint() {
        let schema = container_schema();
        let attr = schema.attribute("container_name").unwrap();
        let long = "x".repeat(65);
        let err = attr.validate(Value::from(long)).unwrap_err();
        assert!(matches!(err, Error::AttributeConstraintViolation { .. }));
    }

    #[test]
    fn test_sibling_default_is_memoized() {
        let schema = container_schema();
        let key = ResourceKey::named("container", "c1");
        let mut store = AttributeStore::default();
        store.assign(&schema, "name", "c1".into()).unwrap();

        assert!(store.explicit("container_name").is_none());
        let v = store.resolve(&schema, &key, "container_name").unwrap();
        assert_eq!(v, Value::from("c1"));
        assert_eq!(store.explicit("container_name"), Some(&Value::from("c1")));

        // Later writes to the source do not change the memoized default
        store.assign(&schema, "name", "c2".into()).unwrap();
        let v = store.resolve(&schema, &key, "container_name").unwrap();
        assert_eq!(v, Value::from("c1"));
    }

    #[test]
    fn test_unset_without_default() {
        let schema = container_schema();
        let key = ResourceKey::named("container", "c1");
        let mut store = AttributeStore::default();
        let err = store.resolve(&schema, &key, "image").unwrap_err();
        assert!(matches!(err, Error::AttributeUnset { .. }));
    }

    #[test]
    fn test_one_to_many_wraps_scalar() {
        let schema = container_schema();
        let attr = schema.attribute("profiles").unwrap();
        let v = attr.validate(Value::from("vpp")).unwrap();
        assert_eq!(v, Value::List(vec!["vpp".into()]));
    }

    #[test]
    fn test_single_rejects_list() {
        let schema = container_schema();
        let attr = schema.attribute("image").unwrap();
        assert!(attr.validate(Value::List(vec!["a".into()])).is_err());
    }

    #[test]
    fn test_coercions() {
        let pid = Attribute::new("pid", AttrType::Integer);
        assert_eq!(pid.validate("1234\n".into()).unwrap(), Value::Integer(1234));

        let addr = Attribute::new("ip4_address", AttrType::Address);
        let v = addr.validate("10.0.0.1/24".into()).unwrap();
        assert_eq!(v.as_address().unwrap().prefix(), 24);

        let ty = Attribute::new("role", AttrType::enumeration(&["master", "slave"]));
        assert!(ty.validate("slave".into()).is_ok());
        assert!(ty.validate("leader".into()).is_err());

        let r = Attribute::new("node", AttrType::reference("node"));
        assert!(r.validate(ResourceKey::named("node", "n1").into()).is_ok());
        assert!(r.validate(ResourceKey::named("container", "c1").into()).is_err());
    }

    #[test]
    fn test_cyclic_default_rejected() {
        let err = Schema::builder("loop")
            .attribute(Attribute::new("a", AttrType::string()).default_from("b"))
            .attribute(Attribute::new("b", AttrType::string()).default_from("a"))
            .key(&["a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_key_must_be_declared() {
        let err = Schema::builder("broken")
            .attribute(Attribute::new("name", AttrType::string()))
            .key(&["forwarder", "name"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_computed_default() {
        let schema = Schema::builder("net_device")
            .attribute(Attribute::new("device_name", AttrType::string()).mandatory())
            .attribute(Attribute::new("socket_path", AttrType::string()).computed(|values| {
                let name = values.get("device_name").map(ToString::to_string).unwrap_or_default();
                Value::String(format!("/run/vpp/{}.sock", name))
            }))
            .key(&["device_name"])
            .build()
            .unwrap();

        let key = ResourceKey::named("net_device", "memif0");
        let mut store = AttributeStore::default();
        store.assign(&schema, "device_name", "memif0".into()).unwrap();
        let v = store.resolve(&schema, &key, "socket_path").unwrap();
        assert_eq!(v, Value::from("/run/vpp/memif0.sock"));
    }

    #[test]
    fn test_dirty_tracking() {
        let schema = container_schema();
        let mut store = AttributeStore::default();
        store.assign(&schema, "name", "c1".into()).unwrap();
        store.assign(&schema, "image", "focal".into()).unwrap();
        assert!(store.is_dirty("image"));
        assert_eq!(store.take_dirty(), vec!["image".to_string(), "name".to_string()]);
        assert!(!store.is_dirty("image"));
    }
}
