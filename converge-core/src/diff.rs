//! Field-by-field comparison of a canonical desired tree against a canonical
//! actual tree.

use std::fmt::Display;

use crate::{
    identity::normalize,
    schema::{Cardinality, FieldSchema, FieldType, ObjectSchema, OperationKind, OperationSelector},
    value::{is_empty_indirect_opt, Presence, Value},
    Node,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
    Key(String),
}

/// A location in a resource tree, rendered as `a.b[0].c` or `a.b[key]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    pub fn parse(dotted: &str) -> Self {
        FieldPath(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(|s| PathSegment::Field(s.to_string()))
                .collect(),
        )
    }

    pub fn field(&self, name: &str) -> Self {
        self.push(PathSegment::Field(name.to_string()))
    }

    pub fn index(&self, i: usize) -> Self {
        self.push(PathSegment::Index(i))
    }

    pub fn key(&self, key: &str) -> Self {
        self.push(PathSegment::Key(key.to_string()))
    }

    fn push(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        FieldPath(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// The dotted field names up to the first list or map element, as used
    /// in update masks.
    pub fn wire_path(&self) -> String {
        let names: Vec<&str> = self
            .0
            .iter()
            .map_while(|s| match s {
                PathSegment::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        names.join(".")
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                PathSegment::Key(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

/// One field-level discrepancy, tagged with what it takes to resolve it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff<K: 'static> {
    pub path: FieldPath,
    pub desired: Option<Value>,
    pub actual: Option<Value>,
    pub resulting: OperationSelector<K>,
}

impl<K: OperationKind> FieldDiff<K> {
    pub fn requires_recreate(&self) -> bool {
        self.resulting.requires_recreate()
    }
}

fn show(value: &Option<Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "<unset>".to_string(),
    }
}

impl<K: OperationKind> Display for FieldDiff<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: desired {} != actual {} ({})",
            self.path,
            show(&self.desired),
            show(&self.actual),
            self.resulting
        )
    }
}

/// Compare two canonical trees. Diffs come back in field declaration order.
pub fn diff<K: OperationKind>(
    schema: &ObjectSchema<K>,
    desired: &Node,
    actual: &Node,
) -> Vec<FieldDiff<K>> {
    let mut out = Vec::new();
    diff_node(schema, desired, actual, &FieldPath::root(), &mut out);
    out
}

fn diff_node<K: OperationKind>(
    schema: &ObjectSchema<K>,
    desired: &Node,
    actual: &Node,
    path: &FieldPath,
    out: &mut Vec<FieldDiff<K>>,
) {
    for field in schema.fields {
        diff_field(field, desired.get(field.name), actual.get(field.name), path, out);
    }
}

fn diff_field<K: OperationKind>(
    field: &FieldSchema<K>,
    desired: Option<&Value>,
    actual: Option<&Value>,
    parent: &FieldPath,
    out: &mut Vec<FieldDiff<K>>,
) {
    if field.output_only {
        return;
    }
    if field.server_default && is_empty_indirect_opt(desired) {
        return;
    }
    if let Some(equivalent) = field.equivalence {
        if equivalent(desired, actual) {
            return;
        }
    }
    if is_empty_indirect_opt(desired) && is_empty_indirect_opt(actual) {
        return;
    }
    let path = parent.field(field.name);
    if let (FieldType::Object(object), Cardinality::Single, true) =
        (&field.field_type, field.cardinality, field.merge_nested_diffs)
    {
        let empty = Node::new();
        let d = Presence::of(desired).node().unwrap_or(&empty);
        let a = Presence::of(actual).node().unwrap_or(&empty);
        diff_node(object, d, a, &path, out);
        return;
    }
    if !field_equal(field, desired, actual) {
        tracing::debug!(field = %path, "field differs");
        out.push(FieldDiff {
            path,
            desired: desired.cloned(),
            actual: actual.cloned(),
            resulting: field.selector,
        });
    }
}

/// Equality of one field's values under the schema's comparison rules.
pub(crate) fn field_equal<K: OperationKind>(
    field: &FieldSchema<K>,
    desired: Option<&Value>,
    actual: Option<&Value>,
) -> bool {
    if is_empty_indirect_opt(desired) && is_empty_indirect_opt(actual) {
        return true;
    }
    match field.cardinality {
        Cardinality::Single => match field.field_type {
            FieldType::Object(_) => element_equal(&field.field_type, desired, actual),
            _ => match (desired, actual) {
                (Some(d), Some(a)) => element_equal(&field.field_type, Some(d), Some(a)),
                _ => false,
            },
        },
        Cardinality::List => match (desired, actual) {
            (Some(Value::List(d)), Some(Value::List(a))) => {
                d.len() == a.len()
                    && d.iter()
                        .zip(a)
                        .all(|(d, a)| element_equal(&field.field_type, Some(d), Some(a)))
            }
            _ => false,
        },
        Cardinality::Map => match (desired, actual) {
            (Some(Value::Map(d)), Some(Value::Map(a))) => {
                d.len() == a.len()
                    && d.iter().all(|(k, dv)| {
                        element_equal(&field.field_type, Some(dv), a.get(k))
                    })
            }
            _ => false,
        },
    }
}

fn element_equal<K: OperationKind>(
    field_type: &FieldType<K>,
    desired: Option<&Value>,
    actual: Option<&Value>,
) -> bool {
    match field_type {
        FieldType::Object(object) => {
            let empty = Node::new();
            let d = Presence::of(desired).node().unwrap_or(&empty);
            let a = Presence::of(actual).node().unwrap_or(&empty);
            let mut nested = Vec::new();
            diff_node(object, d, a, &FieldPath::root(), &mut nested);
            nested.is_empty()
        }
        _ => match (desired, actual) {
            (Some(d), Some(a)) => scalar_equal(field_type, d, a),
            (d, a) => is_empty_indirect_opt(d) && is_empty_indirect_opt(a),
        },
    }
}

/// Scalar equality after type-specific canonicalization: strings compare
/// trimmed, references compare by last path segment.
pub(crate) fn scalar_equal<K>(field_type: &FieldType<K>, desired: &Value, actual: &Value) -> bool {
    match (field_type, desired, actual) {
        (FieldType::String, Value::String(d), Value::String(a)) => d.trim() == a.trim(),
        (FieldType::Reference, Value::String(d), Value::String(a)) => normalize(d) == normalize(a),
        _ => desired == actual,
    }
}
