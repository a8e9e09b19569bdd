//! The resource tree: one cloud resource's configuration as a nested tree of
//! [`Node`]s.
//!
//! A field that is absent from a [`Node`] is *unset*. A nested object field
//! additionally distinguishes [`Object::Empty`], the user's explicit request
//! for an empty object, from a populated object. [`Presence`] is the
//! three-way view used by the canonicalizer and the differ.

use std::{collections::BTreeMap, fmt::Display};

/// A field value.
///
/// Enum, string and reference fields are all `String`s here; the schema
/// decides how they are validated and compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Object),
}

/// A nested object value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// Explicitly empty. Only produced by [`Object::Empty`] itself or by
    /// flattening `{}`; a [`Node`] without fields is *not* this.
    Empty,
    Populated(Node),
}

/// How a nested object field is present in a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence<'a> {
    Unset,
    Empty,
    Populated(&'a Node),
}

/// One level of a resource tree. Field order is the map order; the schema
/// supplies the declaration order wherever order matters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    fields: BTreeMap<String, Value>,
}

impl Node {
    pub fn new() -> Self {
        Node::default()
    }

    /// Builder-style [`Node::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Set or unset a field.
    pub fn set_opt(&mut self, name: &str, value: Option<Value>) {
        match value {
            Some(v) => {
                self.fields.insert(name.to_string(), v);
            }
            None => {
                self.fields.remove(name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn presence(&self, name: &str) -> Presence<'_> {
        Presence::of(self.get(name))
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Look up a dotted path such as `policycontroller.policyControllerHubConfig.installSpec`.
    /// Only descends through populated objects.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            match current {
                Value::Object(Object::Populated(node)) => current = node.get(segment)?,
                Value::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// True when no field carries a meaningful value.
    pub fn is_empty_indirect(&self) -> bool {
        self.fields.values().all(Value::is_empty_indirect)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Value {
    pub fn empty_object() -> Value {
        Value::Object(Object::Empty)
    }

    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Zero values, empty collections, the explicit empty object and objects
    /// whose fields are all empty.
    pub fn is_empty_indirect(&self) -> bool {
        match self {
            Value::Bool(b) => !*b,
            Value::Int(i) => *i == 0,
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Object(Object::Empty) => true,
            Value::Object(Object::Populated(node)) => node.is_empty_indirect(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    /// Schema-less JSON rendering, for logs and diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Object(Object::Empty) => serde_json::json!({}),
            Value::Object(Object::Populated(node)) => node.to_json(),
        }
    }
}

pub(crate) fn is_empty_indirect_opt(v: Option<&Value>) -> bool {
    v.map_or(true, Value::is_empty_indirect)
}

impl<'a> Presence<'a> {
    pub fn of(value: Option<&'a Value>) -> Presence<'a> {
        match value {
            Some(Value::Object(Object::Populated(node))) => Presence::Populated(node),
            Some(Value::Object(Object::Empty)) => Presence::Empty,
            _ => Presence::Unset,
        }
    }

    pub fn node(&self) -> Option<&'a Node> {
        match self {
            Presence::Populated(node) => Some(node),
            _ => None,
        }
    }

    pub fn is_empty_indirect(&self) -> bool {
        match self {
            Presence::Unset | Presence::Empty => true,
            Presence::Populated(node) => node.is_empty_indirect(),
        }
    }

    pub fn to_value(&self) -> Option<Value> {
        match self {
            Presence::Unset => None,
            Presence::Empty => Some(Value::empty_object()),
            Presence::Populated(node) => Some(Value::Object(Object::Populated((*node).clone()))),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
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
impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Value::Object(Object::Populated(node))
    }
}
impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}
