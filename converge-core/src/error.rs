use std::time::Duration;

use thiserror::Error;

use crate::{diff::FieldPath, plan::LifecycleDirective, remote::RemoteError, value::Node};

/// An enum field holds a value outside its declared set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{enum_name} has invalid value {value:?}; valid values are {valid:?}")]
pub struct EnumInvalidError {
    pub enum_name: &'static str,
    pub value: String,
    pub valid: &'static [&'static str],
}

/// The desired resource is malformed. Raised before the remote store is
/// contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field {path} is not set")]
    MissingField { path: FieldPath },
    #[error("unknown field {path}")]
    UnknownField { path: FieldPath },
    #[error("field {path} must be {expected}, got {found}")]
    TypeMismatch {
        path: FieldPath,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field {path}: {source}")]
    InvalidEnum {
        path: FieldPath,
        #[source]
        source: EnumInvalidError,
    },
    #[error("state hint names {hint}, but the desired resource is {desired}")]
    StateHintMismatch { hint: String, desired: String },
    #[error("identity field {field} is not set; needed by {template}")]
    MissingIdentity {
        field: &'static str,
        template: &'static str,
    },
}

/// The caller's lifecycle policy does not permit the changes apply would make.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyInfeasibleError {
    #[error("creation blocked by lifecycle directive BlockCreation")]
    CreationBlocked,
    #[error("resource already exists; acquiring it is blocked by lifecycle directive BlockAcquire")]
    AcquireBlocked,
    #[error("modification blocked by lifecycle directive BlockModification; unresolvable diffs: {}", .diffs.join("; "))]
    ModificationBlocked { diffs: Vec<String> },
    #[error("infeasible update: {} would require recreation", .fields.join(", "))]
    RecreateRequired { fields: Vec<String> },
    #[error("recreating for {} is blocked by lifecycle directive {directive:?}", .fields.join(", "))]
    RecreateBlocked {
        fields: Vec<String>,
        directive: LifecycleDirective,
    },
}

/// The remote state still differs from the desired state after every planned
/// operation succeeded.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} diff(s) remain after apply: {}", .diffs.len(), .diffs.join("; "))]
pub struct DiffAfterApplyError {
    pub diffs: Vec<String>,
    /// The canonical state observed after apply.
    pub state: Node,
}

/// A wire payload does not fit the schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("field {path} must be {expected}, got JSON {found}")]
    TypeMismatch {
        path: FieldPath,
        expected: &'static str,
        found: &'static str,
    },
    #[error("field {path} is not a valid int64: {value:?}")]
    InvalidInteger { path: FieldPath, value: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Infeasible(#[from] ApplyInfeasibleError),
    #[error("operation {operation} failed (diffs: {fields})")]
    Operation {
        operation: &'static str,
        fields: String,
        #[source]
        source: RemoteError,
    },
    #[error(transparent)]
    DiffAfterApply(#[from] DiffAfterApplyError),
    #[error("{stage} {key} failed")]
    Remote {
        stage: &'static str,
        key: String,
        #[source]
        source: RemoteError,
    },
    #[error("decoding {key}")]
    Wire {
        key: String,
        #[source]
        source: WireError,
    },
    #[error("failed to delete {} of the selected resources: {}", .failures.len(), .failures.join("; "))]
    DeleteAll { failures: Vec<String> },
    #[error("cancelled")]
    Cancelled,
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl Error {
    /// Whether the whole apply cycle may be retried against fresh remote
    /// state.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Operation { source, .. } | Error::Remote { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Remote { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
