//! Shared fixtures for the operation engine integration tests.
//!
//! The engine takes its collaborators through trait objects, so the fakes
//! here are plain structs handed in via `Arc` - no patching involved.
//! `FakeRuntime` and `RecordingStorage` share one call log so tests can
//! assert cross-collaborator ordering (e.g. a dependency's state commit
//! happening before its dependent's runtime call).

#![allow(dead_code)]

use async_trait::async_trait;
use intentrun::runtime::WatchEvent;
use intentrun::state::{MemoryStateStorage, State, StateQuery, StateStorage};
use intentrun::{Error, OperationRequest, Resource, Result, Runtime, Spec};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// =============================================================================
// Call Log
// =============================================================================

/// Shared ordered log of runtime and storage calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Index of the first log entry matching the predicate.
pub fn log_index(log: &CallLog, predicate: impl Fn(&str) -> bool) -> Option<usize> {
    log.lock().unwrap().iter().position(|e| predicate(e))
}

// =============================================================================
// Fake Runtime
// =============================================================================

/// Configurable in-memory runtime driver.
///
/// Live resources are held in a map; `apply` stores the planned resource
/// as the live one and returns it, `read` reports what the map holds,
/// `delete` removes. Failures and delays are opt-in per resource id.
pub struct FakeRuntime {
    live: Mutex<HashMap<String, Resource>>,
    fail_apply: HashSet<String>,
    fail_read: HashSet<String>,
    apply_delay: HashMap<String, Duration>,
    watch_scripts: Mutex<HashMap<String, Vec<WatchEvent>>>,
    apply_bases: Mutex<HashMap<String, Option<Resource>>>,
    log: CallLog,
}

impl FakeRuntime {
    pub fn new(log: CallLog) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            fail_apply: HashSet::new(),
            fail_read: HashSet::new(),
            apply_delay: HashMap::new(),
            watch_scripts: Mutex::new(HashMap::new()),
            apply_bases: Mutex::new(HashMap::new()),
            log,
        }
    }

    /// Seeds the live set, typically with the prior snapshot's resources.
    pub fn with_live(self, resources: &[Resource]) -> Self {
        {
            let mut live = self.live.lock().unwrap();
            for resource in resources {
                live.insert(resource.id.clone(), resource.clone());
            }
        }
        self
    }

    /// Makes `apply` fail for the given resource.
    pub fn failing_apply(mut self, id: &str) -> Self {
        self.fail_apply.insert(id.to_string());
        self
    }

    /// Makes `read` fail for the given resource.
    pub fn failing_read(mut self, id: &str) -> Self {
        self.fail_read.insert(id.to_string());
        self
    }

    /// Delays `apply` for the given resource.
    pub fn slow_apply(mut self, id: &str, delay: Duration) -> Self {
        self.apply_delay.insert(id.to_string(), delay);
        self
    }

    /// Scripts the readiness events `watch` reports for a resource.
    pub fn with_watch(self, id: &str, events: Vec<WatchEvent>) -> Self {
        self.watch_scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), events);
        self
    }

    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The `prior` argument the engine passed to `apply` for a resource,
    /// or `None` if `apply` was never called for it.
    pub fn apply_base(&self, id: &str) -> Option<Option<Resource>> {
        self.apply_bases.lock().unwrap().get(id).cloned()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn apply(&self, prior: Option<&Resource>, planned: &Resource) -> Result<Resource> {
        if let Some(delay) = self.apply_delay.get(&planned.id) {
            tokio::time::sleep(*delay).await;
        }
        self.record(format!("apply:{}", planned.id));
        self.apply_bases
            .lock()
            .unwrap()
            .insert(planned.id.clone(), prior.cloned());
        if self.fail_apply.contains(&planned.id) {
            return Err(Error::Runtime {
                resource: planned.id.clone(),
                reason: "induced apply failure".to_string(),
            });
        }
        self.live
            .lock()
            .unwrap()
            .insert(planned.id.clone(), planned.clone());
        Ok(planned.clone())
    }

    async fn read(&self, resource: &Resource) -> Result<Option<Resource>> {
        self.record(format!("read:{}", resource.id));
        if self.fail_read.contains(&resource.id) {
            return Err(Error::Runtime {
                resource: resource.id.clone(),
                reason: "induced read failure".to_string(),
            });
        }
        Ok(self.live.lock().unwrap().get(&resource.id).cloned())
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        self.record(format!("delete:{}", resource.id));
        self.live.lock().unwrap().remove(&resource.id);
        Ok(())
    }

    async fn watch(&self, resource: &Resource) -> Result<Option<mpsc::Receiver<WatchEvent>>> {
        let Some(events) = self.watch_scripts.lock().unwrap().remove(&resource.id) else {
            return Ok(None);
        };
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).expect("scripted watch channel is sized");
        }
        Ok(Some(rx))
    }
}

// =============================================================================
// Recording Storage
// =============================================================================

/// Memory-backed state storage that appends each commit to the shared
/// call log as `commit:<sorted-resource-ids>`.
pub struct RecordingStorage {
    inner: MemoryStateStorage,
    log: CallLog,
}

impl RecordingStorage {
    pub fn new(log: CallLog) -> Self {
        Self {
            inner: MemoryStateStorage::new(),
            log,
        }
    }

    /// Seeds the stored snapshot without logging, as if a previous run
    /// left it behind.
    pub async fn seed(&self, state: &State) {
        self.inner.apply(state).await.unwrap();
    }
}

#[async_trait]
impl StateStorage for RecordingStorage {
    async fn get_latest(&self, query: &StateQuery) -> Result<Option<State>> {
        self.inner.get_latest(query).await
    }

    async fn apply(&self, state: &State) -> Result<()> {
        let mut ids: Vec<&str> = state.resources.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        self.log
            .lock()
            .unwrap()
            .push(format!("commit:{}", ids.join("+")));
        self.inner.apply(state).await
    }
}

// =============================================================================
// Manifest Builders
// =============================================================================

pub fn resource(id: &str, attributes: Value, deps: &[&str]) -> Resource {
    let mut r = Resource::new(id, attributes);
    r.depends_on = deps.iter().map(|d| d.to_string()).collect();
    r
}

/// The jack/pony/eric chain: pony depends on jack, eric depends on pony
/// and references jack's nested attribute.
pub fn chain_spec() -> Spec {
    Spec::new(vec![
        resource("jack", json!({"a": {"b": "c"}}), &[]),
        resource("pony", json!({"c": "d"}), &["jack"]),
        resource("eric", json!({"a": "$kusion_path:jack.a.b"}), &["pony"]),
    ])
}

/// The chain's resources as they look live, with the reference resolved.
pub fn chain_live() -> Vec<Resource> {
    vec![
        resource("jack", json!({"a": {"b": "c"}}), &[]),
        resource("pony", json!({"c": "d"}), &["jack"]),
        resource("eric", json!({"a": "c"}), &["pony"]),
    ]
}

pub fn scope() -> StateQuery {
    StateQuery::new("tenant", "project", "stack", "cluster")
}

pub fn request(spec: Spec) -> OperationRequest {
    OperationRequest::new("tenant", "project", "stack", "cluster", "tester", spec)
}

/// A prior snapshot holding the given resources at the given serial.
pub fn prior_state(resources: Vec<Resource>, serial: u64) -> State {
    let mut state = State::new(&scope(), "previous-run");
    state.serial = serial;
    state.resources = resources;
    state
}
