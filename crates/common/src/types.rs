//! Core types for netbed

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a resource: its kind plus the ordered identifying values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: String,
    pub parts: Vec<String>,
}

impl ResourceKey {
    pub fn new<I, S>(kind: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Key made of a single identifying value
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, [name.into()])
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.parts.join(","))
    }
}

/// An attribute value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
    Address(IpNetwork),
    Reference(ResourceKey),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&IpNetwork> {
        match self {
            Value::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ResourceKey> {
        match self {
            Value::Reference(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, used in constraint messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Address(_) => "address",
            Value::Reference(_) => "reference",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Address(a) => write!(f, "{}", a),
            Value::Reference(k) => write!(f, "{}", k),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<IpNetwork> for Value {
    fn from(a: IpNetwork) -> Self {
        Value::Address(a)
    }
}

impl From<ResourceKey> for Value {
    fn from(k: ResourceKey) -> Self {
        Value::Reference(k)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Lifecycle state of a resource instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unresolved,
    Absent,
    Present,
    Creating,
    Deleting,
    Removed,
    Failed,
}

impl LifecycleState {
    /// `removed` and `failed` end the life of an instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unresolved => write!(f, "unresolved"),
            LifecycleState::Absent => write!(f, "absent"),
            LifecycleState::Present => write!(f, "present"),
            LifecycleState::Creating => write!(f, "creating"),
            LifecycleState::Deleting => write!(f, "deleting"),
            LifecycleState::Removed => write!(f, "removed"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

/// Operation attempted on a resource, recorded on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    Get,
    Create,
    Delete,
    Method(String),
    Set(String),
    Refresh(String),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Initialize => write!(f, "initialize"),
            Operation::Get => write!(f, "get"),
            Operation::Create => write!(f, "create"),
            Operation::Delete => write!(f, "delete"),
            Operation::Method(m) => write!(f, "method:{}", m),
            Operation::Set(a) => write!(f, "set:{}", a),
            Operation::Refresh(a) => write!(f, "refresh:{}", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ResourceKey::new("forwarder_interface", ["vpp1", "memif0"]);
        assert_eq!(key.to_string(), "forwarder_interface(vpp1,memif0)");
    }

    #[test]
    fn test_value_display() {
        let addr: IpNetwork = "10.0.0.1/24".parse().unwrap();
        assert_eq!(Value::from(addr).to_string(), "10.0.0.1/24");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::Null.to_string(), "");
        let list = Value::List(vec!["uio0".into(), "uio1".into()]);
        assert_eq!(list.to_string(), "uio0,uio1");
    }

    #[test]
    fn test_terminal_states() {
        assert!(LifecycleState::Failed.is_terminal());
        assert!(LifecycleState::Removed.is_terminal());
        assert!(!LifecycleState::Present.is_terminal());
        assert_eq!(LifecycleState::default(), LifecycleState::Unresolved);
    }
}
