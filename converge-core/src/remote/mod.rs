//! The boundary to the system that actually holds resources.

mod memory;

pub use memory::{Call, Method, MemoryStore, WriteHook};

use async_trait::async_trait;
use thiserror::Error;

use crate::wire::WireMap;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("status {code}: {message}")]
    Status { code: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RemoteError {
    /// Optimistic-concurrency failures, which a fresh apply cycle may resolve.
    pub fn is_conflict(&self) -> bool {
        match self {
            RemoteError::Conflict => true,
            RemoteError::Status { code, .. } => *code == 409,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            RemoteError::NotFound => true,
            RemoteError::Status { code, .. } => *code == 404,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub key: String,
    pub body: WireMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub key: String,
    /// [`crate::OperationKind::name`] of the planned operation.
    pub operation: &'static str,
    /// Comma-separated dotted paths; see [`crate::wire::merge_masked`].
    pub update_mask: String,
    pub body: WireMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListedObject {
    pub key: String,
    pub body: WireMap,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListPage {
    pub items: Vec<ListedObject>,
    pub next_page_token: Option<String>,
}

/// A keyed store of JSON objects with create/update/delete semantics.
///
/// Every call is a blocking round trip from the engine's point of view; the
/// engine never issues two calls for one resource concurrently.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<WireMap, RemoteError>;

    /// Returns the object as created. Fails with [`RemoteError::Conflict`]
    /// when the key is taken.
    async fn create(&self, request: CreateRequest) -> Result<WireMap, RemoteError>;

    async fn update(&self, request: UpdateRequest) -> Result<WireMap, RemoteError>;

    async fn delete(&self, key: &str) -> Result<(), RemoteError>;

    /// Objects whose key is directly below `parent`.
    async fn list(&self, parent: &str, page_token: Option<&str>)
        -> Result<ListPage, RemoteError>;
}

/// Whether `key` names an object directly below `parent`, such as
/// `projects/p/features/f/memberships/m` below `projects/p/features/f`.
pub fn is_child_key(parent: &str, key: &str) -> bool {
    match key.strip_prefix(parent).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => {
            let segments: Vec<&str> = rest.split('/').collect();
            segments.len() == 2 && segments.iter().all(|s| !s.is_empty())
        }
        None => false,
    }
}
