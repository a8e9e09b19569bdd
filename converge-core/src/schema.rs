//! Declarative field descriptors.
//!
//! A resource type is described once, as static tables of [`FieldSchema`]s.
//! Every generic pass of the engine (validation, wire mapping,
//! canonicalization, diffing) walks these tables instead of per-type code.

use std::fmt::{Debug, Display};

use crate::{
    diff::FieldPath,
    error::{EnumInvalidError, ValidationError},
    identity::IdentityTemplate,
    value::{Object, Value},
    Node,
};

/// The closed set of in-place update operations a resource type supports.
pub trait OperationKind: Copy + Eq + Ord + Debug + Send + Sync + 'static {
    /// The operation name presented to the remote store.
    fn name(&self) -> &'static str;
}

/// What it takes to reconcile a change to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationSelector<K: 'static> {
    /// The field cannot change in place.
    RequiresRecreate,
    Triggers(&'static [K]),
}

impl<K: OperationKind> OperationSelector<K> {
    pub fn requires_recreate(&self) -> bool {
        matches!(self, OperationSelector::RequiresRecreate)
    }

    pub fn operations(&self) -> &'static [K] {
        match self {
            OperationSelector::RequiresRecreate => &[],
            OperationSelector::Triggers(ops) => ops,
        }
    }
}

impl<K: OperationKind> Display for OperationSelector<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationSelector::RequiresRecreate => write!(f, "Recreate"),
            OperationSelector::Triggers(ops) => {
                let names: Vec<&str> = ops.iter().map(OperationKind::name).collect();
                write!(f, "{}", names.join(", "))
            }
        }
    }
}

/// Reports two values of one field as equal even though the generic
/// comparison would not. Arguments are `(desired, actual)`.
pub type Equivalence = fn(Option<&Value>, Option<&Value>) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumSchema {
    pub name: &'static str,
    pub values: &'static [&'static str],
}

impl EnumSchema {
    /// The empty string means unset and is always accepted.
    pub fn validate(&self, value: &str) -> Result<(), EnumInvalidError> {
        if value.is_empty() || self.values.contains(&value) {
            Ok(())
        } else {
            Err(EnumInvalidError {
                enum_name: self.name,
                value: value.to_string(),
                valid: self.values,
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldType<K: 'static> {
    Bool,
    Int,
    String,
    /// A name or self link of another resource. Compared by last path segment.
    Reference,
    Enum(&'static EnumSchema),
    Object(&'static ObjectSchema<K>),
}

impl<K: 'static> FieldType<K> {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "integer",
            FieldType::String | FieldType::Reference | FieldType::Enum(_) => "string",
            FieldType::Object(_) => "object",
        }
    }

    pub fn is_stringly(&self) -> bool {
        matches!(
            self,
            FieldType::String | FieldType::Reference | FieldType::Enum(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    List,
    /// String-keyed map.
    Map,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSchema<K: 'static> {
    /// Wire name; also the key in a [`Node`].
    pub name: &'static str,
    pub field_type: FieldType<K>,
    pub cardinality: Cardinality,
    pub selector: OperationSelector<K>,
    pub required: bool,
    /// Part of the identity; not sent in request bodies.
    pub url_param: bool,
    /// Computed by the server. Never diffed, never sent.
    pub output_only: bool,
    /// An unset desired value accepts whatever the server chose.
    pub server_default: bool,
    /// Report differences of nested fields individually.
    pub merge_nested_diffs: bool,
    pub equivalence: Option<Equivalence>,
}

impl<K: 'static> FieldSchema<K> {
    pub const fn new(
        name: &'static str,
        field_type: FieldType<K>,
        selector: OperationSelector<K>,
    ) -> Self {
        FieldSchema {
            name,
            field_type,
            cardinality: Cardinality::Single,
            selector,
            required: false,
            url_param: false,
            output_only: false,
            server_default: false,
            merge_nested_diffs: false,
            equivalence: None,
        }
    }

    pub const fn list(mut self) -> Self {
        self.cardinality = Cardinality::List;
        self
    }

    pub const fn map(mut self) -> Self {
        self.cardinality = Cardinality::Map;
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// An identity field: required, and substituted into the URL template.
    pub const fn url_param(mut self) -> Self {
        self.required = true;
        self.url_param = true;
        self
    }

    pub const fn output_only(mut self) -> Self {
        self.output_only = true;
        self
    }

    pub const fn server_default(mut self) -> Self {
        self.server_default = true;
        self
    }

    pub const fn merge_nested_diffs(mut self) -> Self {
        self.merge_nested_diffs = true;
        self
    }

    pub const fn equivalence(mut self, equivalence: Equivalence) -> Self {
        self.equivalence = Some(equivalence);
        self
    }
}

#[derive(Debug)]
pub struct ObjectSchema<K: 'static> {
    pub name: &'static str,
    /// Declaration order. Diffs are reported in this order.
    pub fields: &'static [FieldSchema<K>],
}

impl<K: 'static> ObjectSchema<K> {
    pub fn field(&self, name: &str) -> Option<&FieldSchema<K>> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug)]
pub struct ResourceSchema<K: 'static> {
    pub service: &'static str,
    pub type_name: &'static str,
    pub version: &'static str,
    pub root: &'static ObjectSchema<K>,
    pub identity: IdentityTemplate,
    /// Addresses the collection that [`crate::Client::list`] enumerates.
    pub list_parent: IdentityTemplate,
}

impl<K: 'static> ResourceSchema<K> {
    /// The identity key of `node`.
    pub fn id(&self, node: &Node) -> Result<String, ValidationError> {
        self.identity.render(node)
    }
}

/// Check `node` against `schema`, recursively.
///
/// Returns the first problem in declaration order.
pub fn validate<K: 'static>(schema: &ObjectSchema<K>, node: &Node) -> Result<(), ValidationError> {
    validate_node(schema, node, &FieldPath::root())
}

fn validate_node<K: 'static>(
    schema: &ObjectSchema<K>,
    node: &Node,
    path: &FieldPath,
) -> Result<(), ValidationError> {
    for (name, _) in node.iter() {
        if schema.field(name).is_none() {
            return Err(ValidationError::UnknownField {
                path: path.field(name),
            });
        }
    }
    for field in schema.fields {
        let path = path.field(field.name);
        match node.get(field.name) {
            None => {
                if field.required {
                    return Err(ValidationError::MissingField { path });
                }
            }
            Some(value) => {
                if field.required && value.is_empty_indirect() {
                    return Err(ValidationError::MissingField { path });
                }
                validate_cardinality(field, value, &path)?;
            }
        }
    }
    Ok(())
}

fn validate_cardinality<K: 'static>(
    field: &FieldSchema<K>,
    value: &Value,
    path: &FieldPath,
) -> Result<(), ValidationError> {
    match (field.cardinality, value) {
        (Cardinality::Single, value) => validate_element(&field.field_type, value, path),
        (Cardinality::List, Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_element(&field.field_type, item, &path.index(i))?;
            }
            Ok(())
        }
        (Cardinality::Map, Value::Map(entries)) => {
            for (key, item) in entries {
                validate_element(&field.field_type, item, &path.key(key))?;
            }
            Ok(())
        }
        (Cardinality::List, other) => Err(ValidationError::TypeMismatch {
            path: path.clone(),
            expected: "list",
            found: other.kind(),
        }),
        (Cardinality::Map, other) => Err(ValidationError::TypeMismatch {
            path: path.clone(),
            expected: "map",
            found: other.kind(),
        }),
    }
}

fn validate_element<K: 'static>(
    field_type: &FieldType<K>,
    value: &Value,
    path: &FieldPath,
) -> Result<(), ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        path: path.clone(),
        expected: field_type.describe(),
        found: value.kind(),
    };
    match (field_type, value) {
        (FieldType::Bool, Value::Bool(_)) => Ok(()),
        (FieldType::Int, Value::Int(_)) => Ok(()),
        (FieldType::String | FieldType::Reference, Value::String(_)) => Ok(()),
        (FieldType::Enum(schema), Value::String(s)) => {
            schema
                .validate(s)
                .map_err(|source| ValidationError::InvalidEnum {
                    path: path.clone(),
                    source,
                })
        }
        (FieldType::Object(_), Value::Object(Object::Empty)) => Ok(()),
        (FieldType::Object(schema), Value::Object(Object::Populated(node))) => {
            validate_node(schema, node, path)
        }
        _ => Err(mismatch()),
    }
}
