//! Declarative convergence of cloud resources.
//!
//! A resource is described by a static [`ResourceSchema`] and handled as a
//! tree of [`Node`]s. [`Client::apply`] drives one resource to a desired
//! tree: fetch the live object, canonicalize, diff, plan the operations the
//! diffs call for, execute them and verify that nothing is left to do.

pub mod apply;
pub mod canonicalize;
pub mod diff;
pub mod error;
pub mod feature_membership;
pub mod identity;
pub mod plan;
pub mod remote;
pub mod schema;
pub mod value;
pub mod wire;

pub use apply::{Client, ClientConfig, ResourceList, RetryPolicy};
pub use diff::{FieldDiff, FieldPath};
pub use error::{
    ApplyInfeasibleError, DiffAfterApplyError, EnumInvalidError, Error, ValidationError, WireError,
};
pub use plan::{ApplyOptions, LifecycleDirective, Operation, Plan};
pub use remote::{MemoryStore, RemoteError, RemoteStore};
pub use schema::{OperationKind, ResourceSchema};
pub use value::{Node, Object, Presence, Value};
