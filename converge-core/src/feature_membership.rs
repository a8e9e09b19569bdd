//! The GKE Hub FeatureMembership resource: per-membership configuration of a
//! fleet feature (service mesh, Config Management, Policy Controller).

use crate::{
    schema::{
        EnumSchema, FieldSchema, FieldType, ObjectSchema, OperationKind, OperationSelector,
        ResourceSchema,
    },
    identity::IdentityTemplate,
    value::{Presence, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureMembershipOperation {
    /// Every mutable field is written through the parent feature's
    /// membership specs.
    UpdateFeatureMembership,
}

impl OperationKind for FeatureMembershipOperation {
    fn name(&self) -> &'static str {
        match self {
            FeatureMembershipOperation::UpdateFeatureMembership => {
                "updateFeatureMembershipUpdateFeatureMembershipOperation"
            }
        }
    }
}

type Op = FeatureMembershipOperation;
type Field = FieldSchema<Op>;

const UPDATE: OperationSelector<Op> = OperationSelector::Triggers(&[Op::UpdateFeatureMembership]);
const RECREATE: OperationSelector<Op> = OperationSelector::RequiresRecreate;

const fn boolean(name: &'static str) -> Field {
    FieldSchema::new(name, FieldType::Bool, UPDATE)
}
const fn int(name: &'static str) -> Field {
    FieldSchema::new(name, FieldType::Int, UPDATE)
}
const fn string(name: &'static str) -> Field {
    FieldSchema::new(name, FieldType::String, UPDATE)
}
const fn enumeration(name: &'static str, schema: &'static EnumSchema) -> Field {
    FieldSchema::new(name, FieldType::Enum(schema), UPDATE)
}
const fn object(name: &'static str, schema: &'static ObjectSchema<Op>) -> Field {
    FieldSchema::new(name, FieldType::Object(schema), UPDATE)
}
const fn identity(name: &'static str) -> Field {
    FieldSchema::new(name, FieldType::Reference, RECREATE).url_param()
}

pub static MESH_MANAGEMENT: EnumSchema = EnumSchema {
    name: "FeatureMembershipMeshManagementEnum",
    values: &["MANAGEMENT_UNSPECIFIED", "MANAGEMENT_AUTOMATIC", "MANAGEMENT_MANUAL"],
};

pub static MESH_CONTROL_PLANE: EnumSchema = EnumSchema {
    name: "FeatureMembershipMeshControlPlaneEnum",
    values: &["CONTROL_PLANE_MANAGEMENT_UNSPECIFIED", "AUTOMATIC", "MANUAL"],
};

pub static CONFIGMANAGEMENT_MONITORING_BACKENDS: EnumSchema = EnumSchema {
    name: "FeatureMembershipConfigmanagementPolicyControllerMonitoringBackendsEnum",
    values: &["MONITORING_BACKEND_UNSPECIFIED", "PROMETHEUS", "CLOUD_MONITORING"],
};

pub static CONFIGMANAGEMENT_MANAGEMENT: EnumSchema = EnumSchema {
    name: "FeatureMembershipConfigmanagementManagementEnum",
    values: &["MANAGEMENT_UNSPECIFIED", "MANAGEMENT_AUTOMATIC", "MANAGEMENT_MANUAL"],
};

pub static INSTALL_SPEC: EnumSchema = EnumSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigInstallSpecEnum",
    values: &[
        "INSTALL_SPEC_UNSPECIFIED",
        "INSTALL_SPEC_NOT_INSTALLED",
        "INSTALL_SPEC_ENABLED",
        "INSTALL_SPEC_SUSPENDED",
        "INSTALL_SPEC_DETACHED",
    ],
};

pub static HUB_MONITORING_BACKENDS: EnumSchema = EnumSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigMonitoringBackendsEnum",
    values: &["MONITORING_BACKEND_UNSPECIFIED", "PROMETHEUS", "CLOUD_MONITORING"],
};

pub static TEMPLATE_LIBRARY_INSTALLATION: EnumSchema = EnumSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigPolicyContentTemplateLibraryInstallationEnum",
    values: &["INSTALLATION_UNSPECIFIED", "NOT_INSTALLED", "ALL"],
};

pub static POD_AFFINITY: EnumSchema = EnumSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigDeploymentConfigsPodAffinityEnum",
    values: &["AFFINITY_UNSPECIFIED", "NO_AFFINITY", "ANTI_AFFINITY"],
};

static MESH: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipMesh",
    fields: &[
        enumeration("management", &MESH_MANAGEMENT),
        enumeration("controlPlane", &MESH_CONTROL_PLANE),
    ],
};

static CONFIG_SYNC_GIT: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementConfigSyncGit",
    fields: &[
        string("syncRepo"),
        string("syncBranch"),
        string("policyDir"),
        string("syncWaitSecs"),
        string("syncRev"),
        string("secretType"),
        string("httpsProxy"),
        string("gcpServiceAccountEmail"),
    ],
};

static CONFIG_SYNC_OCI: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementConfigSyncOci",
    fields: &[
        string("syncRepo"),
        string("policyDir"),
        string("syncWaitSecs"),
        string("secretType"),
        string("gcpServiceAccountEmail"),
    ],
};

static CONFIG_SYNC: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementConfigSync",
    fields: &[
        object("git", &CONFIG_SYNC_GIT),
        string("sourceFormat"),
        boolean("enabled"),
        boolean("preventDrift").server_default(),
        string("metricsGcpServiceAccountEmail"),
        object("oci", &CONFIG_SYNC_OCI),
    ],
};

static CONFIGMANAGEMENT_MONITORING: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementPolicyControllerMonitoring",
    fields: &[enumeration("backends", &CONFIGMANAGEMENT_MONITORING_BACKENDS).list()],
};

static CONFIGMANAGEMENT_POLICY_CONTROLLER: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementPolicyController",
    fields: &[
        boolean("enabled"),
        string("exemptableNamespaces").list(),
        boolean("referentialRulesEnabled"),
        boolean("logDeniesEnabled"),
        boolean("mutationEnabled"),
        object("monitoring", &CONFIGMANAGEMENT_MONITORING),
        boolean("templateLibraryInstalled"),
        string("auditIntervalSeconds"),
    ],
};

static BINAUTHZ: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementBinauthz",
    fields: &[boolean("enabled")],
};

static HIERARCHY_CONTROLLER: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagementHierarchyController",
    fields: &[
        boolean("enabled"),
        boolean("enablePodTreeLabels"),
        boolean("enableHierarchicalResourceQuota"),
    ],
};

static CONFIGMANAGEMENT: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipConfigmanagement",
    fields: &[
        object("configSync", &CONFIG_SYNC),
        object("policyController", &CONFIGMANAGEMENT_POLICY_CONTROLLER),
        object("binauthz", &BINAUTHZ),
        object("hierarchyController", &HIERARCHY_CONTROLLER)
            .equivalence(empty_hnc_same_as_all_false),
        string("version").server_default(),
        enumeration("management", &CONFIGMANAGEMENT_MANAGEMENT),
    ],
};

static HUB_MONITORING: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigMonitoring",
    fields: &[enumeration("backends", &HUB_MONITORING_BACKENDS).list()],
};

static TEMPLATE_LIBRARY: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigPolicyContentTemplateLibrary",
    fields: &[enumeration("installation", &TEMPLATE_LIBRARY_INSTALLATION)],
};

static BUNDLES: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigPolicyContentBundles",
    fields: &[string("exemptedNamespaces").list()],
};

static POLICY_CONTENT: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigPolicyContent",
    fields: &[
        object("templateLibrary", &TEMPLATE_LIBRARY),
        object("bundles", &BUNDLES).map(),
    ],
};

static RESOURCE_QUANTITIES: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigDeploymentConfigsContainerResourcesLimits",
    fields: &[string("memory"), string("cpu")],
};

static CONTAINER_RESOURCES: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigDeploymentConfigsContainerResources",
    fields: &[
        object("limits", &RESOURCE_QUANTITIES),
        object("requests", &RESOURCE_QUANTITIES),
    ],
};

static POD_TOLERATIONS: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigDeploymentConfigsPodTolerations",
    fields: &[
        string("key"),
        string("operator"),
        string("value"),
        string("effect"),
    ],
};

static DEPLOYMENT_CONFIGS: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfigDeploymentConfigs",
    fields: &[
        int("replicaCount"),
        object("containerResources", &CONTAINER_RESOURCES),
        enumeration("podAffinity", &POD_AFFINITY),
        object("podTolerations", &POD_TOLERATIONS).list(),
    ],
};

static HUB_CONFIG: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontrollerPolicyControllerHubConfig",
    fields: &[
        enumeration("installSpec", &INSTALL_SPEC),
        string("exemptableNamespaces").list(),
        boolean("referentialRulesEnabled"),
        boolean("logDeniesEnabled"),
        boolean("mutationEnabled"),
        object("monitoring", &HUB_MONITORING),
        int("auditIntervalSeconds"),
        int("constraintViolationLimit").server_default(),
        object("policyContent", &POLICY_CONTENT),
        object("deploymentConfigs", &DEPLOYMENT_CONFIGS).map(),
    ],
};

static POLICYCONTROLLER: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembershipPolicycontroller",
    fields: &[
        string("version").server_default(),
        object("policyControllerHubConfig", &HUB_CONFIG).merge_nested_diffs(),
    ],
};

static FEATURE_MEMBERSHIP_OBJECT: ObjectSchema<Op> = ObjectSchema {
    name: "FeatureMembership",
    fields: &[
        object("mesh", &MESH),
        object("configmanagement", &CONFIGMANAGEMENT).merge_nested_diffs(),
        object("policycontroller", &POLICYCONTROLLER).merge_nested_diffs(),
        identity("project"),
        identity("location"),
        identity("feature"),
        identity("membership"),
        FieldSchema::new("membershipLocation", FieldType::Reference, RECREATE),
    ],
};

pub static FEATURE_MEMBERSHIP: ResourceSchema<Op> = ResourceSchema {
    service: "gke_hub",
    type_name: "FeatureMembership",
    version: "gkehub",
    root: &FEATURE_MEMBERSHIP_OBJECT,
    identity: IdentityTemplate::new(
        "projects/{{project}}/locations/{{location}}/features/{{feature}}/memberships/{{membership}}",
    ),
    list_parent: IdentityTemplate::new(
        "projects/{{project}}/locations/{{location}}/features/{{feature}}",
    ),
};

/// The API answers an all-false hierarchy controller with no object at all.
fn empty_hnc_same_as_all_false(desired: Option<&Value>, actual: Option<&Value>) -> bool {
    fn all_false(value: Option<&Value>) -> bool {
        match Presence::of(value) {
            Presence::Unset | Presence::Empty => true,
            Presence::Populated(node) => node
                .iter()
                .all(|(_, v)| matches!(v, Value::Bool(false))),
        }
    }
    all_false(desired) && all_false(actual)
}
