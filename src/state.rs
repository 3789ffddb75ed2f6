//! State snapshots and the state storage interface.
//!
//! A [`State`] is the persisted record of the live resource set for one
//! `(tenant, project, stack, cluster)` scope. Snapshots are linked through
//! `prev_state_hash` and ordered by a monotonic `serial`; the engine bumps
//! the serial once per successful node commit so a partial run leaves a
//! snapshot describing exactly the nodes that finished.
//!
//! Two backends ship with the engine: an in-memory store for tests and
//! embedding, and a file store with crash-safe write-then-rename
//! persistence. Anything else (databases, object stores) implements
//! [`StateStorage`] externally.

use crate::constants::{STATE_FILE_NAME, STATE_FORMAT_VERSION, STATE_STORE_DIR};
use crate::error::{Error, Result};
use crate::resource::Resource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

// =============================================================================
// Snapshot
// =============================================================================

/// A persisted snapshot of the live resource set for one stack scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// Owning tenant.
    pub tenant: String,
    /// Project within the tenant.
    pub project: String,
    /// Stack within the project.
    pub stack: String,
    /// Target cluster.
    pub cluster: String,
    /// Snapshot schema version.
    pub version: u32,
    /// Monotonic revision number within the scope.
    pub serial: u64,
    /// Identity responsible for the run that wrote this snapshot.
    pub operator: String,
    /// When this snapshot was written (RFC 3339).
    pub created_at: DateTime<Utc>,
    /// Hex digest of the previous snapshot, empty for the first one.
    #[serde(default)]
    pub prev_state_hash: String,
    /// The live resource set. No tombstones: deleted resources are absent.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl State {
    /// Creates an empty snapshot for the given scope.
    pub fn new(query: &StateQuery, operator: impl Into<String>) -> Self {
        Self {
            tenant: query.tenant.clone(),
            project: query.project.clone(),
            stack: query.stack.clone(),
            cluster: query.cluster.clone(),
            version: STATE_FORMAT_VERSION,
            serial: 0,
            operator: operator.into(),
            created_at: Utc::now(),
            prev_state_hash: String::new(),
            resources: Vec::new(),
        }
    }

    /// Returns the SHA-256 hex digest of the canonical JSON encoding of
    /// this snapshot. Used to link snapshots via `prev_state_hash`.
    pub fn digest(&self) -> String {
        // serde_json maps are sorted, so the encoding is canonical.
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }

    /// Inserts or replaces a resource by id.
    pub fn upsert_resource(&mut self, resource: Resource) {
        match self.resources.iter_mut().find(|r| r.id == resource.id) {
            Some(slot) => *slot = resource,
            None => self.resources.push(resource),
        }
    }

    /// Removes a resource by id, if present.
    pub fn remove_resource(&mut self, id: &str) {
        self.resources.retain(|r| r.id != id);
    }
}

// =============================================================================
// Query
// =============================================================================

/// Identifies one state scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateQuery {
    pub tenant: String,
    pub project: String,
    pub stack: String,
    pub cluster: String,
}

impl StateQuery {
    /// Creates a query for the given scope.
    pub fn new(
        tenant: impl Into<String>,
        project: impl Into<String>,
        stack: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            project: project.into(),
            stack: stack.into(),
            cluster: cluster.into(),
        }
    }

    fn scope_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.tenant, self.project, self.stack, self.cluster
        )
    }
}

// =============================================================================
// Storage Interface
// =============================================================================

/// Persistence backend for state snapshots.
///
/// The engine acquires a backend from the caller and never closes it. The
/// backend serializes writers across processes; within one run the engine
/// already serializes its own commits, so `apply` only has to reject
/// snapshots whose serial does not advance the stored one.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Returns the latest snapshot for the scope, or `None` if the scope
    /// has never been written.
    async fn get_latest(&self, query: &StateQuery) -> Result<Option<State>>;

    /// Persists a snapshot. Backends that can compare-and-swap on `serial`
    /// must return [`Error::Conflict`] when the snapshot does not strictly
    /// advance the stored serial.
    async fn apply(&self, state: &State) -> Result<()>;
}

// =============================================================================
// Memory Backend
// =============================================================================

/// In-memory state backend.
///
/// Enforces strictly increasing serials per scope, so concurrent-writer
/// conflicts surface in tests the same way they would against a
/// CAS-capable production backend.
#[derive(Debug, Default)]
pub struct MemoryStateStorage {
    states: Mutex<HashMap<String, State>>,
}

impl MemoryStateStorage {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
    async fn get_latest(&self, query: &StateQuery) -> Result<Option<State>> {
        let states = self
            .states
            .lock()
            .map_err(|_| Error::Internal("state store lock poisoned".to_string()))?;
        Ok(states.get(&query.scope_key()).cloned())
    }

    async fn apply(&self, state: &State) -> Result<()> {
        let query = StateQuery::new(&state.tenant, &state.project, &state.stack, &state.cluster);
        let mut states = self
            .states
            .lock()
            .map_err(|_| Error::Internal("state store lock poisoned".to_string()))?;
        if let Some(stored) = states.get(&query.scope_key()) {
            if state.serial <= stored.serial {
                return Err(Error::Conflict(format!(
                    "serial {} does not advance stored serial {} for {}",
                    state.serial,
                    stored.serial,
                    query.scope_key()
                )));
            }
        }
        states.insert(query.scope_key(), state.clone());
        Ok(())
    }
}

// =============================================================================
// File Backend
// =============================================================================

/// File-backed state storage.
///
/// Snapshots live under `<base>/states/<tenant>/<project>/<stack>/<cluster>/
/// state.json`. Writes go to a uniquely named temp file in the same
/// directory and are renamed into place, so a crash never leaves a torn
/// snapshot behind.
pub struct FileStateStorage {
    base_dir: PathBuf,
}

impl FileStateStorage {
    /// Creates a file backend under the default base directory
    /// (`~/.intentrun`).
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Creates a file backend rooted at the given directory.
    pub fn with_path(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)
            .map_err(|e| Error::State(format!("init {}: {e}", base_dir.display())))?;
        info!("File state store initialized at: {}", base_dir.display());
        Ok(Self { base_dir })
    }

    fn default_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(".intentrun").join(STATE_STORE_DIR)
        } else {
            PathBuf::from(".intentrun").join(STATE_STORE_DIR)
        }
    }

    fn scope_dir(&self, query: &StateQuery) -> PathBuf {
        self.base_dir
            .join(&query.tenant)
            .join(&query.project)
            .join(&query.stack)
            .join(&query.cluster)
    }
}

#[async_trait]
impl StateStorage for FileStateStorage {
    async fn get_latest(&self, query: &StateQuery) -> Result<Option<State>> {
        let path = self.scope_dir(query).join(STATE_FILE_NAME);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::State(format!("read {}: {e}", path.display()))),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| Error::State(format!("decode {}: {e}", path.display())))?;
        Ok(Some(state))
    }

    async fn apply(&self, state: &State) -> Result<()> {
        let query = StateQuery::new(&state.tenant, &state.project, &state.stack, &state.cluster);
        if let Some(stored) = self.get_latest(&query).await? {
            if state.serial <= stored.serial {
                return Err(Error::Conflict(format!(
                    "serial {} does not advance stored serial {} for {}",
                    state.serial,
                    stored.serial,
                    query.scope_key()
                )));
            }
        }

        let dir = self.scope_dir(&query);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::State(format!("create {}: {e}", dir.display())))?;

        let encoded = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::State(format!("encode snapshot: {e}")))?;

        // Unique temp name so concurrent operators never share a temp file;
        // the final rename is atomic.
        let temp_path = dir.join(format!("state.{}.tmp", uuid::Uuid::now_v7()));
        let path = dir.join(STATE_FILE_NAME);
        fs::write(&temp_path, &encoded)
            .map_err(|e| Error::State(format!("write {}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::State(format!("rename into {}: {e}", path.display()))
        })?;

        debug!(
            scope = %query.scope_key(),
            serial = state.serial,
            "persisted state snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query() -> StateQuery {
        StateQuery::new("t", "p", "s", "c")
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryStateStorage::new();
        assert!(store.get_latest(&query()).await.unwrap().is_none());

        let mut state = State::new(&query(), "tester");
        state.serial = 1;
        state.upsert_resource(Resource::new("jack", json!({"a": 1})));
        store.apply(&state).await.unwrap();

        let loaded = store.get_latest(&query()).await.unwrap().unwrap();
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.resources.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_serial_conflict() {
        let store = MemoryStateStorage::new();
        let mut state = State::new(&query(), "tester");
        state.serial = 2;
        store.apply(&state).await.unwrap();

        // Equal serial is a conflict, not an overwrite.
        let err = store.apply(&state).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        state.serial = 3;
        store.apply(&state).await.unwrap();
    }

    #[test]
    fn test_digest_is_stable_and_linked() {
        let mut state = State::new(&query(), "tester");
        state.created_at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let first = state.digest();
        assert_eq!(first, state.digest());

        state.serial = 1;
        assert_ne!(first, state.digest());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut state = State::new(&query(), "tester");
        state.upsert_resource(Resource::new("a", json!(1)));
        state.upsert_resource(Resource::new("b", json!(2)));
        state.upsert_resource(Resource::new("a", json!(3)));
        assert_eq!(state.resources.len(), 2);
        assert_eq!(state.resources[0].attributes, json!(3));

        state.remove_resource("a");
        assert_eq!(state.resources.len(), 1);
    }
}
