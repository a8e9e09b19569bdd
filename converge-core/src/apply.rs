//! The convergence loop: fetch, canonicalize, diff, plan, execute, verify.

use std::{future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument as _};

use crate::{
    canonicalize::{canonicalize_desired, canonicalize_new_state, merge_create_response},
    diff::diff,
    error::{DiffAfterApplyError, Error, ValidationError},
    plan::{plan, ApplyOptions, Operation, Plan},
    remote::{CreateRequest, RemoteError, RemoteStore, UpdateRequest},
    schema::{validate, OperationKind, ResourceSchema},
    value::Value,
    wire::{self, from_wire, request_body, WireMap},
    Node,
};

/// Backoff for conflict retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Give up retrying conflicts after this long.
    pub timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            timeout_secs: 60,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Deadline for a whole call, retries included. `None` waits forever.
    pub timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

pub struct Client {
    store: Arc<dyn RemoteStore>,
    config: ClientConfig,
}

/// One page of [`Client::list`] results.
pub struct ResourceList<'s, K: 'static> {
    pub items: Vec<Node>,
    schema: &'s ResourceSchema<K>,
    parent: Node,
    next_page_token: Option<String>,
}

impl<'s, K: OperationKind> ResourceList<'s, K> {
    pub fn has_next(&self) -> bool {
        self.next_page_token.is_some()
    }

    /// Replace `items` with the next page.
    pub async fn next(&mut self, client: &Client) -> Result<(), Error> {
        let Some(token) = self.next_page_token.take() else {
            self.items.clear();
            return Ok(());
        };
        let page = client
            .list_page(self.schema, &self.parent, Some(&token))
            .await?;
        self.items = page.items;
        self.next_page_token = page.next_page_token;
        Ok(())
    }
}

impl Client {
    pub fn new(store: Arc<dyn RemoteStore>, config: ClientConfig) -> Self {
        Client { store, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Converge the remote resource to `desired` and return the state
    /// observed afterwards.
    pub async fn apply<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        desired: &Node,
        options: &ApplyOptions,
    ) -> Result<Node, Error> {
        validate(schema.root, desired)?;
        let key = schema.id(desired)?;
        let span = info_span!("apply", resource = schema.type_name, key = key.as_str());
        self.bounded(
            options.cancel.as_ref(),
            self.retry_conflicts(|| self.apply_once(schema, &key, desired, options)),
        )
        .instrument(span)
        .await
    }

    /// Compute what [`Client::apply`] would do, without changing anything.
    pub async fn plan<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        desired: &Node,
        options: &ApplyOptions,
    ) -> Result<Plan<K>, Error> {
        validate(schema.root, desired)?;
        let key = schema.id(desired)?;
        let span = info_span!("plan", resource = schema.type_name, key = key.as_str());
        self.bounded(options.cancel.as_ref(), async {
            let (_, plan) = self.diff_stage(schema, desired, options).await?;
            Ok(plan)
        })
        .instrument(span)
        .await
    }

    /// Fetch the resource `node` identifies.
    pub async fn get<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        node: &Node,
    ) -> Result<Node, Error> {
        let key = schema.id(node)?;
        let span = info_span!("get", resource = schema.type_name, key = key.as_str());
        self.bounded(None, async {
            self.fetch(schema, &key, node)
                .await?
                .ok_or_else(|| Error::Remote {
                    stage: "fetching",
                    key: key.clone(),
                    source: RemoteError::NotFound,
                })
        })
        .instrument(span)
        .await
    }

    /// Delete the resource `node` identifies. Deleting a resource that does
    /// not exist succeeds.
    pub async fn delete<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        node: &Node,
    ) -> Result<(), Error> {
        let key = schema.id(node)?;
        let span = info_span!("delete", resource = schema.type_name, key = key.as_str());
        self.bounded(None, self.retry_conflicts(|| self.delete_key(&key)))
            .instrument(span)
            .await
    }

    /// List the resources below the collection `parent` identifies.
    pub async fn list<'s, K: OperationKind>(
        &self,
        schema: &'s ResourceSchema<K>,
        parent: &Node,
    ) -> Result<ResourceList<'s, K>, Error> {
        let parent_key = schema.list_parent.render(parent)?;
        let span = info_span!("list", resource = schema.type_name, parent = parent_key.as_str());
        self.bounded(None, self.list_page(schema, parent, None))
            .instrument(span)
            .await
    }

    /// Delete every listed resource `filter` accepts. Keeps going after a
    /// failed delete and reports all failures together.
    pub async fn delete_all<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        parent: &Node,
        filter: impl Fn(&Node) -> bool,
    ) -> Result<usize, Error> {
        let mut list = self.list(schema, parent).await?;
        let mut deleted = 0;
        let mut failures = Vec::new();
        loop {
            for item in &list.items {
                if !filter(item) {
                    continue;
                }
                match self.delete(schema, item).await {
                    Ok(()) => deleted += 1,
                    Err(e) => failures.push(format!("{}: {}", schema.id(item)?, error_chain(&e))),
                }
            }
            if !list.has_next() {
                break;
            }
            list.next(self).await?;
        }
        if failures.is_empty() {
            Ok(deleted)
        } else {
            Err(Error::DeleteAll { failures })
        }
    }

    async fn apply_once<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        key: &str,
        raw_desired: &Node,
        options: &ApplyOptions,
    ) -> Result<Node, Error> {
        info!("Beginning apply");
        let (desired, plan) = self.diff_stage(schema, raw_desired, options).await?;
        info!(plan = %plan, "Created plan");

        let mut create_response = None;
        for op in &plan.operations {
            info!(operation = %op, "Performing operation");
            let response = self
                .execute(schema, key, &desired, op)
                .await
                .map_err(|source| {
                    warn!(operation = %op, error = %source, "Failed operation");
                    Error::Operation {
                        operation: op.name(),
                        fields: operation_fields(op, &plan),
                        source,
                    }
                })?;
            if matches!(op, Operation::Create) {
                create_response = response;
            }
        }

        info!("Retrieving new state");
        let mut raw_new = self.fetch(schema, key, &desired).await?.ok_or_else(|| Error::Remote {
            stage: "re-fetching",
            key: key.to_string(),
            source: RemoteError::NotFound,
        })?;
        if let Some(response) = create_response {
            debug!("Merging create response into new state");
            let response = from_wire(schema.root, &response).map_err(|source| Error::Wire {
                key: key.to_string(),
                source,
            })?;
            raw_new = merge_create_response(schema.root, &raw_new, &response);
        }

        let new_state = canonicalize_new_state(schema.root, &raw_new, raw_desired);
        let new_desired = canonicalize_desired(schema.root, raw_desired, Some(&new_state));
        let residual = diff(schema.root, &new_desired, &new_state);
        if !residual.is_empty() {
            warn!(count = residual.len(), "Found diffs after apply");
            return Err(DiffAfterApplyError {
                diffs: residual.iter().map(ToString::to_string).collect(),
                state: new_state,
            }
            .into());
        }
        info!("Apply converged");
        Ok(new_state)
    }

    /// Fetch, canonicalize, diff and plan.
    async fn diff_stage<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        raw_desired: &Node,
        options: &ApplyOptions,
    ) -> Result<(Node, Plan<K>), Error> {
        let key = schema.id(raw_desired)?;
        let request = match &options.state_hint {
            Some(hint) => match schema.id(hint) {
                Ok(hint_key) if hint_key == key => hint,
                Ok(hint_key) => {
                    return Err(ValidationError::StateHintMismatch {
                        hint: hint_key,
                        desired: key,
                    }
                    .into())
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring state hint without identity");
                    raw_desired
                }
            },
            None => raw_desired,
        };
        let initial = self.fetch(schema, &key, request).await?;
        if initial.is_none() {
            info!("Resource does not exist");
        }
        let desired = canonicalize_desired(schema.root, raw_desired, initial.as_ref());
        let diffs = match &initial {
            Some(initial) => diff(schema.root, &desired, initial),
            None => Vec::new(),
        };
        for d in &diffs {
            debug!(diff = %d, "Found diff");
        }
        let plan = plan(initial.is_some(), diffs, options)?;
        Ok((desired, plan))
    }

    async fn execute<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        key: &str,
        desired: &Node,
        op: &Operation<K>,
    ) -> Result<Option<WireMap>, RemoteError> {
        match op {
            Operation::Create => {
                let response = self
                    .store
                    .create(CreateRequest {
                        key: key.to_string(),
                        body: request_body(schema, desired),
                    })
                    .await?;
                Ok(Some(response))
            }
            Operation::Delete => {
                self.store.delete(key).await?;
                Ok(None)
            }
            Operation::Update(update) => {
                self.store
                    .update(UpdateRequest {
                        key: key.to_string(),
                        operation: update.kind.name(),
                        update_mask: wire::update_mask(&update.diffs),
                        body: request_body(schema, desired),
                    })
                    .await?;
                Ok(None)
            }
        }
    }

    /// Get and flatten; `None` when the store has no such object. Identity
    /// fields of the result come from `request`.
    async fn fetch<K: OperationKind>(
        &self,
        schema: &ResourceSchema<K>,
        key: &str,
        request: &Node,
    ) -> Result<Option<Node>, Error> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(source) => {
                return Err(Error::Remote {
                    stage: "fetching",
                    key: key.to_string(),
                    source,
                })
            }
        };
        let node = from_wire(schema.root, &raw).map_err(|source| Error::Wire {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(canonicalize_new_state(schema.root, &node, request)))
    }

    async fn delete_key(&self, key: &str) -> Result<(), Error> {
        info!("Deleting");
        match self.store.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!("Already deleted");
                Ok(())
            }
            Err(source) => Err(Error::Remote {
                stage: "deleting",
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn list_page<'s, K: OperationKind>(
        &self,
        schema: &'s ResourceSchema<K>,
        parent: &Node,
        page_token: Option<&str>,
    ) -> Result<ResourceList<'s, K>, Error> {
        let parent_key = schema.list_parent.render(parent)?;
        let page = self
            .store
            .list(&parent_key, page_token)
            .await
            .map_err(|source| Error::Remote {
                stage: "listing",
                key: parent_key.clone(),
                source,
            })?;
        let mut items = Vec::with_capacity(page.items.len());
        for listed in page.items {
            let Some(identity) = schema.identity.extract(&listed.key) else {
                warn!(key = listed.key.as_str(), "Skipping listed object with foreign key");
                continue;
            };
            let mut node = from_wire(schema.root, &listed.body).map_err(|source| Error::Wire {
                key: listed.key.clone(),
                source,
            })?;
            for (param, value) in identity {
                let value = parent
                    .get(param)
                    .cloned()
                    .unwrap_or(Value::String(value));
                node.set(param, value);
            }
            items.push(node);
        }
        Ok(ResourceList {
            items,
            schema,
            parent: parent.clone(),
            next_page_token: page.next_page_token,
        })
    }

    /// Re-run `attempt` while it fails with a conflict, backing off
    /// exponentially, until the retry timeout elapses.
    async fn retry_conflicts<T, F, Fut>(&self, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let policy = &self.config.retry;
        // Too far out to represent means no deadline.
        let deadline = Instant::now().checked_add(policy.timeout());
        let mut backoff = policy.initial_backoff();
        loop {
            match attempt().await {
                Err(e)
                    if e.is_conflict()
                        && deadline.map_or(true, |d| {
                            Instant::now().checked_add(backoff).is_some_and(|t| t <= d)
                        }) =>
                {
                    warn!(error = %error_chain(&e), backoff = ?backoff, "Conflict; retrying against latest state");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(policy.max_backoff());
                }
                result => return result,
            }
        }
    }

    /// Abort `fut` on cancellation or when the configured deadline passes.
    async fn bounded<T>(
        &self,
        cancel: Option<&CancellationToken>,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        let timed = async {
            match self.config.timeout() {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::DeadlineExceeded(limit)),
                },
                None => fut.await,
            }
        };
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = timed => result,
                }
            }
            None => timed.await,
        }
    }
}

fn operation_fields<K: OperationKind>(op: &Operation<K>, plan: &Plan<K>) -> String {
    let paths: Vec<String> = match op {
        Operation::Update(update) => update.diffs.iter().map(|d| d.path.to_string()).collect(),
        _ => plan.diffs.iter().map(|d| d.path.to_string()).collect(),
    };
    if paths.is_empty() {
        "none".to_string()
    } else {
        paths.join(", ")
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
