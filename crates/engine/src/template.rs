//! Command templates
//!
//! A template is a command string with `{name.path}` placeholders. `name`
//! must be bound to a value or a resource; each following segment names an
//! attribute, and intermediate attributes must be references. Literal braces
//! are written `{{` and `}}`.

use crate::manager::ResourceManager;
use netbed_common::{Error, ResourceKey, Result, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { root: String, path: Vec<String> },
}

/// Parsed command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(Error::Template(format!("unclosed placeholder in '{}'", text)));
                    }
                    let mut parts = inner.trim().split('.').map(str::to_string);
                    let root = parts.next().unwrap_or_default();
                    let path: Vec<String> = parts.collect();
                    if root.is_empty() || path.iter().any(String::is_empty) {
                        return Err(Error::Template(format!("malformed placeholder '{{{}}}'", inner)));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder { root, path });
                }
                '}' => {
                    return Err(Error::Template(format!("unmatched '}}' in '{}'", text)));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root names used by the placeholders, in order of appearance
    pub fn roots(&self) -> Vec<&str> {
        let mut roots = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { root, .. } = segment {
                if !roots.contains(&root.as_str()) {
                    roots.push(root.as_str());
                }
            }
        }
        roots
    }

    /// Fail with a template error unless every placeholder root is bound
    pub fn check(&self, bindings: &Bindings) -> Result<()> {
        let missing: Vec<&str> = self
            .roots()
            .into_iter()
            .filter(|root| !bindings.contains(root))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Template(format!(
                "unbound placeholders {} in '{}'",
                missing.join(", "),
                self.source.trim()
            )))
        }
    }

    /// Substitute every placeholder, following references through `manager`
    pub fn render(&self, bindings: &Bindings, manager: &ResourceManager) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { root, path } => {
                    let value = resolve(root, path, bindings, manager)?;
                    out.push_str(&render_value(&value));
                }
            }
        }
        Ok(out)
    }
}

fn resolve(root: &str, path: &[String], bindings: &Bindings, manager: &ResourceManager) -> Result<Value> {
    let mut current = match bindings.get(root) {
        Some(Binding::Value(v)) => v.clone(),
        Some(Binding::Resource(key)) => Value::Reference(key.clone()),
        None => return Err(Error::Template(format!("unbound placeholder {}", root))),
    };

    for (i, attribute) in path.iter().enumerate() {
        let key = match &current {
            Value::Reference(key) => key.clone(),
            other => {
                return Err(Error::Template(format!(
                    "{}.{} follows a {} value",
                    root,
                    path[..i].join("."),
                    other.type_name()
                )))
            }
        };
        current = manager.get(&key)?.get(attribute)?;
        if current.is_null() {
            return Err(Error::AttributeUnset {
                resource: key.to_string(),
                attribute: attribute.clone(),
            });
        }
    }

    if current.is_null() {
        return Err(Error::Template(format!("placeholder {} is bound to null", root)));
    }
    Ok(current)
}

/// References render as their identifying value
fn render_value(value: &Value) -> String {
    match value {
        Value::Reference(key) => key.parts.last().cloned().unwrap_or_default(),
        other => other.to_string(),
    }
}

/// What a placeholder root is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Value(Value),
    Resource(ResourceKey),
}

/// Named parameters for a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: BTreeMap<String, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(name.into(), Binding::Value(value.into()));
        self
    }

    pub fn resource(mut self, name: impl Into<String>, key: &ResourceKey) -> Self {
        self.entries
            .insert(name.into(), Binding::Resource(key.clone()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
