//! Mapping between resource trees and the JSON payloads of the remote store.
//!
//! [`to_wire`] expands a tree into a JSON object, [`from_wire`] flattens one
//! back. Both are driven entirely by the schema.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use crate::{
    diff::{FieldDiff, FieldPath},
    error::WireError,
    schema::{Cardinality, FieldSchema, FieldType, ObjectSchema, OperationKind, ResourceSchema},
    value::{Object, Value},
    Node,
};

pub type WireMap = Map<String, Json>;

/// Expand a tree into its wire form. Fields unknown to the schema are dropped.
pub fn to_wire<K: OperationKind>(schema: &ObjectSchema<K>, node: &Node) -> WireMap {
    expand_node(schema, node, false)
}

/// The body of a create or update request: the wire form without identity
/// and output-only fields.
pub fn request_body<K: OperationKind>(schema: &ResourceSchema<K>, node: &Node) -> WireMap {
    expand_node(schema.root, node, true)
}

fn expand_node<K: OperationKind>(schema: &ObjectSchema<K>, node: &Node, body: bool) -> WireMap {
    let mut out = Map::new();
    for field in schema.fields {
        if body && (field.url_param || field.output_only) {
            continue;
        }
        if let Some(value) = node.get(field.name) {
            out.insert(field.name.to_string(), expand_value(field, value, body));
        }
    }
    out
}

fn expand_value<K: OperationKind>(field: &FieldSchema<K>, value: &Value, body: bool) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| expand_value(field, item, body))
                .collect(),
        ),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), expand_value(field, v, body)))
                .collect(),
        ),
        Value::Object(Object::Empty) => Json::Object(Map::new()),
        Value::Object(Object::Populated(node)) => match field.field_type {
            FieldType::Object(object) => Json::Object(expand_node(object, node, body)),
            _ => node.to_json(),
        },
    }
}

/// Flatten a wire payload. Absent and `null` keys are unset, `{}` is an
/// explicitly empty object and keys unknown to the schema are ignored.
pub fn from_wire<K: OperationKind>(
    schema: &ObjectSchema<K>,
    map: &WireMap,
) -> Result<Node, WireError> {
    flatten_node(schema, map, &FieldPath::root())
}

fn flatten_node<K: OperationKind>(
    schema: &ObjectSchema<K>,
    map: &WireMap,
    path: &FieldPath,
) -> Result<Node, WireError> {
    let mut node = Node::new();
    for field in schema.fields {
        match map.get(field.name) {
            None | Some(Json::Null) => {}
            Some(json) => {
                let path = path.field(field.name);
                node.set(field.name, flatten_field(field, json, &path)?);
            }
        }
    }
    Ok(node)
}

fn flatten_field<K: OperationKind>(
    field: &FieldSchema<K>,
    json: &Json,
    path: &FieldPath,
) -> Result<Value, WireError> {
    match (field.cardinality, json) {
        (Cardinality::Single, json) => flatten_element(&field.field_type, json, path),
        (Cardinality::List, Json::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| flatten_element(&field.field_type, item, &path.index(i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        (Cardinality::Map, Json::Object(entries)) => entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), flatten_element(&field.field_type, v, &path.key(k))?)))
            .collect::<Result<BTreeMap<_, _>, WireError>>()
            .map(Value::Map),
        (Cardinality::List, other) => Err(mismatch(path, "list", other)),
        (Cardinality::Map, other) => Err(mismatch(path, "map", other)),
    }
}

fn flatten_element<K: OperationKind>(
    field_type: &FieldType<K>,
    json: &Json,
    path: &FieldPath,
) -> Result<Value, WireError> {
    match (field_type, json) {
        (FieldType::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldType::Int, Json::Number(n)) => n.as_i64().map(Value::Int).ok_or_else(|| {
            WireError::InvalidInteger {
                path: path.clone(),
                value: n.to_string(),
            }
        }),
        // int64 travels as a decimal string
        (FieldType::Int, Json::String(s)) => {
            s.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| WireError::InvalidInteger {
                    path: path.clone(),
                    value: s.clone(),
                })
        }
        (FieldType::String | FieldType::Reference | FieldType::Enum(_), Json::String(s)) => {
            Ok(Value::String(s.clone()))
        }
        (FieldType::Object(_), Json::Object(map)) if map.is_empty() => Ok(Value::empty_object()),
        (FieldType::Object(object), Json::Object(map)) => Ok(Value::Object(Object::Populated(
            flatten_node(object, map, path)?,
        ))),
        (field_type, other) => Err(mismatch(path, field_type.describe(), other)),
    }
}

fn mismatch(path: &FieldPath, expected: &'static str, found: &Json) -> WireError {
    WireError::TypeMismatch {
        path: path.clone(),
        expected,
        found: json_kind(found),
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Keys of `map` that `schema` does not declare, at any depth. [`from_wire`]
/// drops these silently; callers reading user input report them.
pub fn unknown_fields<K: OperationKind>(schema: &ObjectSchema<K>, map: &WireMap) -> Vec<FieldPath> {
    let mut out = Vec::new();
    unknown_in_node(schema, map, &FieldPath::root(), &mut out);
    out
}

fn unknown_in_node<K: OperationKind>(
    schema: &ObjectSchema<K>,
    map: &WireMap,
    path: &FieldPath,
    out: &mut Vec<FieldPath>,
) {
    for (key, json) in map {
        let path = path.field(key);
        let Some(field) = schema.field(key) else {
            out.push(path);
            continue;
        };
        let FieldType::Object(object) = field.field_type else {
            continue;
        };
        match (field.cardinality, json) {
            (Cardinality::Single, Json::Object(nested)) => unknown_in_node(object, nested, &path, out),
            (Cardinality::List, Json::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if let Json::Object(nested) = item {
                        unknown_in_node(object, nested, &path.index(i), out);
                    }
                }
            }
            (Cardinality::Map, Json::Object(entries)) => {
                for (k, item) in entries {
                    if let Json::Object(nested) = item {
                        unknown_in_node(object, nested, &path.key(k), out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// The update mask of one operation: the distinct wire paths of its diffs,
/// in diff order.
pub fn update_mask<K: OperationKind>(diffs: &[FieldDiff<K>]) -> String {
    let mut paths: Vec<String> = Vec::new();
    for diff in diffs {
        let path = diff.path.wire_path();
        if !path.is_empty() && !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths.join(",")
}

/// Apply a masked update the way the remote API does for PATCH: each masked
/// path is copied from `body`, or removed when `body` lacks it.
pub fn merge_masked(existing: &mut WireMap, body: &WireMap, mask: &str) {
    for path in mask.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let segments: Vec<&str> = path.split('.').collect();
        match lookup(body, &segments) {
            Some(value) => insert(existing, &segments, value.clone()),
            None => remove(existing, &segments),
        }
    }
}

fn lookup<'a>(map: &'a WireMap, segments: &[&str]) -> Option<&'a Json> {
    let (last, parents) = segments.split_last()?;
    let mut current = map;
    for segment in parents {
        current = current.get(*segment)?.as_object()?;
    }
    current.get(*last)
}

fn insert(map: &mut WireMap, segments: &[&str], value: Json) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = map;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Json::Object(Map::new()));
        if !entry.is_object() {
            *entry = Json::Object(Map::new());
        }
        let Json::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

fn remove(map: &mut WireMap, segments: &[&str]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = map;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(Json::Object(next)) => current = next,
            _ => return,
        }
    }
    current.remove(*last);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::{widget, TestOp, WIDGET, WIDGET_RESOURCE};
    use crate::schema::OperationSelector;
    use serde_json::json;

    fn map(json: Json) -> WireMap {
        match json {
            Json::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn expand_then_flatten() {
        let node = widget()
            .with("description", "d")
            .with(
                "spec",
                Node::new()
                    .with("color", "RED")
                    .with("inner", Value::empty_object()),
            )
            .with("tags", Value::list(["a"]))
            .with(
                "labels",
                Value::Map(BTreeMap::from([("env".to_string(), "prod".into())])),
            )
            .with("parts", Value::list([Node::new().with("count", 7)]));
        let wire = to_wire(&WIDGET, &node);
        assert_eq!(
            Json::Object(wire.clone()),
            json!({
                "name": "w1",
                "zone": "z1",
                "description": "d",
                "spec": {"color": "RED", "inner": {}},
                "tags": ["a"],
                "labels": {"env": "prod"},
                "parts": [{"count": 7}],
            })
        );
        assert_eq!(from_wire(&WIDGET, &wire).unwrap(), node);
    }

    #[test]
    fn flatten_is_lenient_about_server_extras() {
        let wire = map(json!({
            "name": "w1",
            "zone": "z1",
            "spec": {"size": "12", "unknownNested": true},
            "opaque": null,
            "serverOnly": 1,
        }));
        let node = from_wire(&WIDGET, &wire).unwrap();
        assert_eq!(
            node,
            widget().with("spec", Node::new().with("size", 12))
        );
    }

    #[test]
    fn flatten_reports_mismatches() {
        let wire = map(json!({"spec": {"size": "twelve"}}));
        assert_eq!(
            from_wire(&WIDGET, &wire).unwrap_err().to_string(),
            r#"field spec.size is not a valid int64: "twelve""#
        );
        let wire = map(json!({"tags": "a"}));
        assert_eq!(
            from_wire(&WIDGET, &wire).unwrap_err().to_string(),
            "field tags must be list, got JSON string"
        );
    }

    #[test]
    fn unknown_fields_are_found_at_any_depth() {
        let input = map(json!({
            "name": "w1",
            "colour": "RED",
            "spec": {"inner": {"flag": true, "flg": false}},
            "parts": [{"count": 1}, {"cnt": 2}],
        }));
        let unknown: Vec<String> = unknown_fields(&WIDGET, &input)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(unknown, vec!["colour", "parts[1].cnt", "spec.inner.flg"]);
    }

    #[test]
    fn request_body_omits_identity_and_output_only() {
        let node = widget().with("description", "d").with("state", "ACTIVE");
        assert_eq!(
            Json::Object(request_body(&WIDGET_RESOURCE, &node)),
            json!({"description": "d"})
        );
    }

    #[test]
    fn update_mask_dedups_in_order() {
        let selector = OperationSelector::Triggers(&[TestOp::UpdateSpec]);
        let diff = |path: FieldPath| FieldDiff {
            path,
            desired: None,
            actual: None,
            resulting: selector,
        };
        let diffs = vec![
            diff(FieldPath::parse("spec.color")),
            diff(FieldPath::root().field("parts").index(1)),
            diff(FieldPath::parse("spec.color")),
            diff(FieldPath::parse("description")),
        ];
        assert_eq!(update_mask(&diffs), "spec.color,parts,description");
    }

    #[test]
    fn merge_masked_copies_and_removes() {
        let mut existing = map(json!({
            "description": "old",
            "spec": {"color": "GREEN", "size": 1},
            "tags": ["x"],
        }));
        let body = map(json!({
            "description": "new",
            "spec": {"color": "RED", "size": 99},
            "labels": {"a": "b"},
        }));
        merge_masked(&mut existing, &body, "spec.color,tags,labels");
        assert_eq!(
            Json::Object(existing),
            json!({
                "description": "old",
                "spec": {"color": "RED", "size": 1},
                "labels": {"a": "b"},
            })
        );
    }
}
