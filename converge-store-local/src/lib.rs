//! A [`RemoteStore`] kept in a local state file.
//!
//! The file is an append-only log of JSON Patch events. Replaying it yields
//! `{"_type": "convergeState", "objects": {<key>: <wire object>}}`. Every
//! write appends one event, and is refused with [`RemoteError::Conflict`]
//! when another process appended since this store last looked, so that the
//! engine retries against the fresh state.

pub mod state;

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Context as _};
use async_trait::async_trait;
use converge_core::{
    remote::{is_child_key, CreateRequest, ListPage, ListedObject, UpdateRequest},
    wire::{merge_masked, WireMap},
    RemoteError, RemoteStore,
};
use serde_json::{json, Value as Json};
use tracing::debug;

use state::{ConcurrentWrite, StateEvent, StateEventMeta, StateHandle, StateSnapshot, STATE_TYPE};

pub struct LocalStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    handle: StateHandle,
    /// The state as of our last read or write, if still trustworthy.
    snapshot: Option<StateSnapshot>,
}

impl LocalStore {
    /// Open the state file at `path`, creating it if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<LocalStore> {
        let path = path.as_ref();
        let create_new = !path.exists();
        let mut handle = StateHandle::open(path, create_new)
            .with_context(|| format!("opening state file {}", path.display()))?;
        let snapshot = handle
            .read()
            .with_context(|| format!("reading state file {}", path.display()))?;
        match snapshot.state.get("_type").and_then(Json::as_str) {
            Some(STATE_TYPE) => {}
            other => bail!(
                "{} is not a converge state file (_type is {:?})",
                path.display(),
                other
            ),
        }
        Ok(LocalStore {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                handle,
                snapshot: Some(snapshot),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mutex poisoned")
    }

    /// Re-read the file and return the objects it holds.
    fn read_objects(&self) -> Result<WireMap, RemoteError> {
        let mut inner = self.lock();
        inner.snapshot = None;
        let snapshot = inner.handle.read()?;
        let objects = objects(&snapshot.state)?.clone();
        inner.snapshot = Some(snapshot);
        Ok(objects)
    }

    /// Compute one patch from the current objects and append it.
    fn mutate<T>(
        &self,
        action: &'static str,
        key: &str,
        change: impl FnOnce(&WireMap) -> Result<(json_patch::PatchOperation, T), RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut inner = self.lock();
        let mut snapshot = match inner.snapshot.take() {
            Some(snapshot) => snapshot,
            None => inner.handle.read()?,
        };
        let (operation, result) = change(objects(&snapshot.state)?)?;
        let event = StateEvent {
            index: snapshot.next_index,
            meta: StateEventMeta::now(json!({ "action": action, "key": key })),
            patch: json_patch::Patch(vec![operation]),
        };
        match inner.handle.append(&[&event]) {
            Ok(()) => {}
            Err(e) if e.downcast_ref::<ConcurrentWrite>().is_some() => {
                debug!(error = %e, "State file changed underneath us");
                return Err(RemoteError::Conflict);
            }
            Err(e) => return Err(e.into()),
        }
        debug!(index = event.index, action, key, "Appended state event");
        snapshot.apply(&event)?;
        inner.snapshot = Some(snapshot);
        Ok(result)
    }
}

fn objects(state: &Json) -> Result<&WireMap, RemoteError> {
    state
        .get("objects")
        .and_then(Json::as_object)
        .ok_or_else(|| anyhow!("state file has no objects map").into())
}

/// The JSON pointer of an object; keys contain slashes.
fn object_path(key: &str) -> String {
    format!("/objects/{}", key.replace('~', "~0").replace('/', "~1"))
}

fn add(key: &str, value: WireMap) -> anyhow::Result<json_patch::PatchOperation> {
    Ok(json_patch::PatchOperation::Add(json_patch::AddOperation {
        path: object_path(key)
            .parse()
            .map_err(|e| anyhow!("invalid object key {key:?}: {e}"))?,
        value: Json::Object(value),
    }))
}

fn remove(key: &str) -> anyhow::Result<json_patch::PatchOperation> {
    Ok(json_patch::PatchOperation::Remove(
        json_patch::RemoveOperation {
            path: object_path(key)
                .parse()
                .map_err(|e| anyhow!("invalid object key {key:?}: {e}"))?,
        },
    ))
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn get(&self, key: &str) -> Result<WireMap, RemoteError> {
        match self.read_objects()?.remove(key) {
            Some(Json::Object(object)) => Ok(object),
            Some(_) => Err(anyhow!("state file entry {key} is not an object").into()),
            None => Err(RemoteError::NotFound),
        }
    }

    async fn create(&self, request: CreateRequest) -> Result<WireMap, RemoteError> {
        self.mutate("create", &request.key, |objects| {
            if objects.contains_key(&request.key) {
                return Err(RemoteError::Conflict);
            }
            Ok((add(&request.key, request.body.clone())?, request.body.clone()))
        })
    }

    async fn update(&self, request: UpdateRequest) -> Result<WireMap, RemoteError> {
        self.mutate(request.operation, &request.key, |objects| {
            let Some(Json::Object(existing)) = objects.get(&request.key) else {
                return Err(RemoteError::NotFound);
            };
            let mut object = existing.clone();
            merge_masked(&mut object, &request.body, &request.update_mask);
            Ok((add(&request.key, object.clone())?, object))
        })
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.mutate("delete", key, |objects| {
            if !objects.contains_key(key) {
                return Err(RemoteError::NotFound);
            }
            Ok((remove(key)?, ()))
        })
    }

    async fn list(&self, parent: &str, page_token: Option<&str>) -> Result<ListPage, RemoteError> {
        if let Some(token) = page_token {
            return Err(RemoteError::Status {
                code: 400,
                message: format!("invalid page token {token:?}"),
            });
        }
        let items = self
            .read_objects()?
            .into_iter()
            .filter(|(key, _)| is_child_key(parent, key))
            .filter_map(|(key, body)| match body {
                Json::Object(body) => Some(ListedObject { key, body }),
                _ => None,
            })
            .collect();
        Ok(ListPage {
            items,
            next_page_token: None,
        })
    }
}
