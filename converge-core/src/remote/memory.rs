use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

use super::{
    is_child_key, CreateRequest, ListPage, ListedObject, RemoteError, RemoteStore, UpdateRequest,
};
use crate::wire::{merge_masked, WireMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Create,
    Update,
    Delete,
    List,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    pub key: String,
    /// The operation name and update mask of an update.
    pub detail: Option<String>,
}

/// Runs on every stored object after a create or update, standing in for
/// the server filling in defaults or drifting away from the request.
pub type WriteHook = Box<dyn Fn(&str, &mut WireMap) + Send + Sync>;

/// An in-process [`RemoteStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, WireMap>,
    hooks: Vec<WriteHook>,
    faults: HashMap<Method, VecDeque<RemoteError>>,
    calls: Vec<Call>,
    page_size: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Split list results into pages of `size`.
    pub fn with_page_size(self, size: usize) -> Self {
        self.lock().page_size = Some(size.max(1));
        self
    }

    pub fn on_write(&self, hook: impl Fn(&str, &mut WireMap) + Send + Sync + 'static) {
        self.lock().hooks.push(Box::new(hook));
    }

    /// Make the next call of `method` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn inject_failure(&self, method: Method, error: RemoteError) {
        self.lock()
            .faults
            .entry(method)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn object(&self, key: &str) -> Option<WireMap> {
        self.lock().objects.get(key).cloned()
    }

    /// Store an object directly, bypassing hooks and the call log.
    pub fn put_object(&self, key: &str, body: WireMap) {
        self.lock().objects.insert(key.to_string(), body);
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mutex poisoned")
    }
}

impl Inner {
    fn record(&mut self, method: Method, key: &str, detail: Option<String>) -> Result<(), RemoteError> {
        self.calls.push(Call {
            method,
            key: key.to_string(),
            detail,
        });
        match self.faults.get_mut(&method).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn run_hooks(&self, key: &str, object: &mut WireMap) {
        for hook in &self.hooks {
            hook(key, object);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<WireMap, RemoteError> {
        let mut inner = self.lock();
        inner.record(Method::Get, key, None)?;
        inner.objects.get(key).cloned().ok_or(RemoteError::NotFound)
    }

    async fn create(&self, request: CreateRequest) -> Result<WireMap, RemoteError> {
        let mut inner = self.lock();
        inner.record(Method::Create, &request.key, None)?;
        if inner.objects.contains_key(&request.key) {
            return Err(RemoteError::Conflict);
        }
        let mut object = request.body;
        inner.run_hooks(&request.key, &mut object);
        inner.objects.insert(request.key, object.clone());
        Ok(object)
    }

    async fn update(&self, request: UpdateRequest) -> Result<WireMap, RemoteError> {
        let mut inner = self.lock();
        inner.record(
            Method::Update,
            &request.key,
            Some(format!("{} [{}]", request.operation, request.update_mask)),
        )?;
        let mut object = inner
            .objects
            .get(&request.key)
            .cloned()
            .ok_or(RemoteError::NotFound)?;
        merge_masked(&mut object, &request.body, &request.update_mask);
        inner.run_hooks(&request.key, &mut object);
        inner.objects.insert(request.key, object.clone());
        Ok(object)
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.record(Method::Delete, key, None)?;
        inner
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }

    async fn list(&self, parent: &str, page_token: Option<&str>) -> Result<ListPage, RemoteError> {
        let mut inner = self.lock();
        inner.record(Method::List, parent, page_token.map(str::to_string))?;
        // The token is the last key already returned.
        let matching: Vec<ListedObject> = inner
            .objects
            .iter()
            .filter(|(key, _)| is_child_key(parent, key))
            .filter(|(key, _)| page_token.map_or(true, |after| key.as_str() > after))
            .map(|(key, body)| ListedObject {
                key: key.clone(),
                body: body.clone(),
            })
            .collect();
        let size = inner.page_size.unwrap_or(usize::MAX).min(matching.len());
        let next_page_token = (size < matching.len()).then(|| matching[size - 1].key.clone());
        Ok(ListPage {
            items: matching[..size].to_vec(),
            next_page_token,
        })
    }
}
