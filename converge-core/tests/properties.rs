use converge_core::{
    canonicalize::canonicalize_desired,
    diff::diff,
    feature_membership::{
        FeatureMembershipOperation, CONFIGMANAGEMENT_MANAGEMENT,
        CONFIGMANAGEMENT_MONITORING_BACKENDS, FEATURE_MEMBERSHIP, INSTALL_SPEC,
        MESH_CONTROL_PLANE, MESH_MANAGEMENT,
    },
    wire::{from_wire, to_wire},
    FieldDiff, Node, Value,
};
use proptest::prelude::*;

fn identity() -> Node {
    Node::new()
        .with("project", "my-project")
        .with("location", "global")
        .with("feature", "policycontroller")
        .with("membership", "cluster-1")
}

fn enum_value(values: &'static [&'static str]) -> impl Strategy<Value = Option<Value>> {
    proptest::option::of(prop::sample::select(values).prop_map(Value::from))
}

fn flag() -> impl Strategy<Value = Option<Value>> {
    proptest::option::of(any::<bool>().prop_map(Value::Bool))
}

fn text() -> impl Strategy<Value = Option<Value>> {
    proptest::option::of("[a-c]{0,2}".prop_map(Value::String))
}

/// Unset, explicitly empty, or built by `node`.
fn object(node: impl Strategy<Value = Node>) -> impl Strategy<Value = Option<Value>> {
    proptest::option::of(prop_oneof![
        Just(Value::empty_object()),
        node.prop_map(Value::from),
    ])
}

fn fields<const N: usize>(names: [&'static str; N], values: [Option<Value>; N]) -> Node {
    let mut node = Node::new();
    for (name, value) in names.into_iter().zip(values) {
        node.set_opt(name, value);
    }
    node
}

fn mesh() -> impl Strategy<Value = Option<Value>> {
    object(
        (
            enum_value(MESH_MANAGEMENT.values),
            enum_value(MESH_CONTROL_PLANE.values),
        )
            .prop_map(|(m, c)| fields(["management", "controlPlane"], [m, c])),
    )
}

fn hub_config() -> impl Strategy<Value = Option<Value>> {
    let hub = object(
        (
            enum_value(INSTALL_SPEC.values),
            proptest::option::of(0i64..3),
            flag(),
            proptest::option::of(prop::collection::vec("[a-c]{1,2}", 0..3)),
        )
            .prop_map(|(install_spec, audit, log_denies, namespaces)| {
                let mut hub = Node::new();
                hub.set_opt("installSpec", install_spec);
                hub.set_opt("auditIntervalSeconds", audit.map(Value::Int));
                hub.set_opt("logDeniesEnabled", log_denies);
                hub.set_opt("exemptableNamespaces", namespaces.map(|ns| Value::list(ns)));
                hub
            }),
    );
    object(hub.prop_map(|hub| fields(["policyControllerHubConfig"], [hub])))
}

/// The `configmanagement` subtree. Server-default fields (`version`,
/// `preventDrift`) are only generated when `server_defaults` is set.
fn configmanagement(server_defaults: bool) -> impl Strategy<Value = Option<Value>> {
    let git = object(text().prop_map(|repo| fields(["syncRepo"], [repo])));
    let config_sync = object((git, flag(), text(), flag()).prop_map(
        move |(git, enabled, source_format, prevent_drift)| {
            let prevent_drift = prevent_drift.filter(|_| server_defaults);
            fields(
                ["git", "enabled", "sourceFormat", "preventDrift"],
                [git, enabled, source_format, prevent_drift],
            )
        },
    ));
    let backends = proptest::option::of(
        prop::collection::vec(
            prop::sample::select(CONFIGMANAGEMENT_MONITORING_BACKENDS.values),
            0..3,
        )
        .prop_map(|b| Value::list(b)),
    );
    let policy_controller = object(
        (flag(), object(backends.prop_map(|b| fields(["backends"], [b])))).prop_map(
            |(enabled, monitoring)| fields(["enabled", "monitoring"], [enabled, monitoring]),
        ),
    );
    let hierarchy_controller = object((flag(), flag(), flag()).prop_map(|(e, p, q)| {
        fields(
            ["enabled", "enablePodTreeLabels", "enableHierarchicalResourceQuota"],
            [e, p, q],
        )
    }));
    let version = proptest::option::of(
        prop::sample::select(&["1.17.0", "1.18.0"][..]).prop_map(Value::from),
    );
    object(
        (
            config_sync,
            policy_controller,
            hierarchy_controller,
            version,
            enum_value(CONFIGMANAGEMENT_MANAGEMENT.values),
        )
            .prop_map(move |(cs, pc, hnc, version, management)| {
                let version = version.filter(|_| server_defaults);
                fields(
                    [
                        "configSync",
                        "policyController",
                        "hierarchyController",
                        "version",
                        "management",
                    ],
                    [cs, pc, hnc, version, management],
                )
            }),
    )
}

fn membership_with(server_defaults: bool) -> impl Strategy<Value = Node> {
    (mesh(), configmanagement(server_defaults), hub_config()).prop_map(
        |(mesh, configmanagement, policycontroller)| {
            let mut node = identity();
            node.set_opt("mesh", mesh);
            node.set_opt("configmanagement", configmanagement);
            node.set_opt("policycontroller", policycontroller);
            node
        },
    )
}

fn membership() -> impl Strategy<Value = Node> {
    membership_with(true)
}

fn paths(diffs: &[FieldDiff<FeatureMembershipOperation>]) -> Vec<String> {
    let mut paths: Vec<String> = diffs.iter().map(|d| d.path.to_string()).collect();
    paths.sort();
    paths
}

proptest! {
    #[test]
    fn canonicalize_desired_is_idempotent(desired in membership(), actual in membership()) {
        let schema = FEATURE_MEMBERSHIP.root;
        let once = canonicalize_desired(schema, &desired, Some(&actual));
        let twice = canonicalize_desired(schema, &once, Some(&actual));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn canonical_tree_is_its_own_canonical_form(node in membership()) {
        let schema = FEATURE_MEMBERSHIP.root;
        prop_assert_eq!(canonicalize_desired(schema, &node, Some(&node)), node);
    }

    #[test]
    fn a_tree_never_differs_from_itself(node in membership()) {
        prop_assert!(diff(FEATURE_MEMBERSHIP.root, &node, &node).is_empty());
    }

    // Server-default fields are one-sided: unset on the desired side means
    // whatever the server chose.
    #[test]
    fn diff_is_symmetric(a in membership_with(false), b in membership_with(false)) {
        let schema = FEATURE_MEMBERSHIP.root;
        prop_assert_eq!(paths(&diff(schema, &a, &b)), paths(&diff(schema, &b, &a)));
    }

    #[test]
    fn unset_fields_defer_to_the_server(actual in membership()) {
        let schema = FEATURE_MEMBERSHIP.root;
        let desired = canonicalize_desired(schema, &identity(), Some(&actual));
        prop_assert!(diff(schema, &desired, &actual).is_empty());
    }

    #[test]
    fn wire_form_preserves_meaning(node in membership()) {
        let schema = FEATURE_MEMBERSHIP.root;
        let back = from_wire(schema, &to_wire(schema, &node)).unwrap();
        prop_assert!(diff(schema, &node, &back).is_empty());
    }
}
