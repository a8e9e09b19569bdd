//! Merging a user's desired tree with server-observed state.
//!
//! [`canonicalize_desired`] runs before diffing: fields the user left unset
//! keep the server's value, fields the user set win.
//! [`canonicalize_new_state`] runs on freshly fetched state: where the server
//! merely respells what the user asked for, the user's spelling is kept.

use crate::{
    diff::scalar_equal,
    schema::{Cardinality, FieldSchema, FieldType, ObjectSchema, OperationKind},
    value::{is_empty_indirect_opt, Object, Presence, Value},
    Node,
};

/// Canonicalize `desired` against `initial`. Without an initial state the
/// desired tree is returned as is.
pub fn canonicalize_desired<K: OperationKind>(
    schema: &ObjectSchema<K>,
    desired: &Node,
    initial: Option<&Node>,
) -> Node {
    match initial {
        None => desired.clone(),
        Some(initial) => desired_node(schema, desired, initial),
    }
}

fn desired_node<K: OperationKind>(schema: &ObjectSchema<K>, des: &Node, init: &Node) -> Node {
    let mut out = Node::new();
    for field in schema.fields {
        let value = desired_field(field, des.get(field.name), init.get(field.name));
        out.set_opt(field.name, value);
    }
    out
}

fn desired_field<K: OperationKind>(
    field: &FieldSchema<K>,
    des: Option<&Value>,
    init: Option<&Value>,
) -> Option<Value> {
    if des.is_none() {
        return init.cloned();
    }
    if let Some(equivalent) = field.equivalence {
        if equivalent(des, init) {
            return init.cloned();
        }
    }
    match (field.cardinality, &field.field_type) {
        (Cardinality::Single, FieldType::Object(object)) => desired_object(object, des, init),
        (Cardinality::Single, field_type) => {
            if is_empty_indirect_opt(des) && is_empty_indirect_opt(init) {
                return init.cloned();
            }
            match (des, init) {
                (Some(d), Some(i)) if field_type.is_stringly() && scalar_equal(field_type, d, i) => {
                    Some(i.clone())
                }
                _ => des.cloned(),
            }
        }
        (Cardinality::List, field_type) => {
            if is_empty_indirect_opt(des) && is_empty_indirect_opt(init) {
                return init.cloned();
            }
            match (des, init) {
                // Mismatched lengths are left for the differ.
                (Some(Value::List(d)), Some(Value::List(i))) if d.len() == i.len() => {
                    Some(desired_list(field_type, d, i))
                }
                _ => des.cloned(),
            }
        }
        (Cardinality::Map, _) => {
            if is_empty_indirect_opt(des) && is_empty_indirect_opt(init) {
                return init.cloned();
            }
            des.cloned()
        }
    }
}

fn desired_object<K: OperationKind>(
    object: &ObjectSchema<K>,
    des: Option<&Value>,
    init: Option<&Value>,
) -> Option<Value> {
    match (Presence::of(des), Presence::of(init)) {
        (Presence::Unset, _) => init.cloned(),
        // Clearing a field is explicit and durable.
        (Presence::Empty, _) => Some(Value::empty_object()),
        (Presence::Populated(_), Presence::Unset | Presence::Empty) => des.cloned(),
        (Presence::Populated(d), Presence::Populated(i)) => {
            Some(Value::Object(Object::Populated(desired_node(object, d, i))))
        }
    }
}

fn desired_list<K: OperationKind>(field_type: &FieldType<K>, des: &[Value], init: &[Value]) -> Value {
    match field_type {
        FieldType::Object(object) => Value::List(
            des.iter()
                .zip(init)
                .map(|(d, i)| {
                    desired_object(object, Some(d), Some(i)).unwrap_or_else(|| d.clone())
                })
                .collect(),
        ),
        _ => {
            let same = des.iter().zip(init).all(|(d, i)| scalar_equal(field_type, d, i));
            if same {
                Value::List(init.to_vec())
            } else {
                Value::List(des.to_vec())
            }
        }
    }
}

/// Canonicalize freshly fetched state against the raw desired tree. Identity
/// fields are taken from `desired`.
pub fn canonicalize_new_state<K: OperationKind>(
    schema: &ObjectSchema<K>,
    new: &Node,
    desired: &Node,
) -> Node {
    let mut out = Node::new();
    for field in schema.fields {
        let value = new_field(field, new.get(field.name), desired.get(field.name));
        out.set_opt(field.name, value);
    }
    out
}

fn new_field<K: OperationKind>(
    field: &FieldSchema<K>,
    new: Option<&Value>,
    des: Option<&Value>,
) -> Option<Value> {
    if field.url_param {
        return des.or(new).cloned();
    }
    if is_empty_indirect_opt(new) && is_empty_indirect_opt(des) {
        return des.cloned();
    }
    if let Some(equivalent) = field.equivalence {
        if equivalent(des, new) {
            return des.cloned();
        }
    }
    match (field.cardinality, &field.field_type) {
        (Cardinality::Single, FieldType::Object(object)) => new_object(object, new, des),
        (Cardinality::Single, field_type) => match (new, des) {
            (Some(n), Some(d)) if field_type.is_stringly() && scalar_equal(field_type, d, n) => {
                Some(d.clone())
            }
            _ => new.cloned(),
        },
        (Cardinality::List, field_type) => match (new, des) {
            (Some(Value::List(n)), Some(Value::List(d))) if n.len() == d.len() => {
                Some(new_list(field_type, n, d))
            }
            _ => new.cloned(),
        },
        (Cardinality::Map, _) => new.cloned(),
    }
}

fn new_object<K: OperationKind>(
    object: &ObjectSchema<K>,
    new: Option<&Value>,
    des: Option<&Value>,
) -> Option<Value> {
    match (Presence::of(new), Presence::of(des)) {
        (_, Presence::Unset) => new.cloned(),
        (Presence::Unset, d) if d.is_empty_indirect() => des.cloned(),
        (Presence::Unset, _) => None,
        (Presence::Empty, _) => new.cloned(),
        (Presence::Populated(n), Presence::Empty) => Some(Value::Object(Object::Populated(
            canonicalize_new_state(object, n, &Node::new()),
        ))),
        (Presence::Populated(n), Presence::Populated(d)) => Some(Value::Object(
            Object::Populated(canonicalize_new_state(object, n, d)),
        )),
    }
}

fn new_list<K: OperationKind>(field_type: &FieldType<K>, new: &[Value], des: &[Value]) -> Value {
    match field_type {
        FieldType::Object(object) => Value::List(
            new.iter()
                .zip(des)
                .map(|(n, d)| new_object(object, Some(n), Some(d)).unwrap_or_else(|| n.clone()))
                .collect(),
        ),
        _ => {
            let same = new.iter().zip(des).all(|(n, d)| scalar_equal(field_type, d, n));
            if same {
                Value::List(des.to_vec())
            } else {
                Value::List(new.to_vec())
            }
        }
    }
}

/// Fill what a re-fetch left out from the create response. A field the
/// fetched state has unset or empty takes the response's value; populated
/// objects on both sides merge field by field. Output-only fields come from
/// the fetch alone.
pub fn merge_create_response<K: OperationKind>(
    schema: &ObjectSchema<K>,
    fetched: &Node,
    response: &Node,
) -> Node {
    let mut out = fetched.clone();
    for field in schema.fields {
        if field.output_only {
            continue;
        }
        let value = merge_field(field, fetched.get(field.name), response.get(field.name));
        out.set_opt(field.name, value);
    }
    out
}

fn merge_field<K: OperationKind>(
    field: &FieldSchema<K>,
    fetched: Option<&Value>,
    response: Option<&Value>,
) -> Option<Value> {
    if is_empty_indirect_opt(fetched) {
        if is_empty_indirect_opt(response) {
            return fetched.cloned();
        }
        return response.cloned();
    }
    match (field.cardinality, &field.field_type) {
        (Cardinality::Single, FieldType::Object(object)) => {
            match (Presence::of(fetched), Presence::of(response)) {
                (Presence::Populated(f), Presence::Populated(r)) => Some(Value::Object(
                    Object::Populated(merge_create_response(object, f, r)),
                )),
                _ => fetched.cloned(),
            }
        }
        _ => fetched.cloned(),
    }
}
