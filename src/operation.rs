//! Operation kernel - preview and apply.
//!
//! An [`Operation`] binds the two external collaborators (a [`Runtime`]
//! driver and a [`StateStorage`] backend) to the planning pipeline:
//!
//! ```text
//! Spec + PriorState → resolve refs → build graph → walk
//!                                    preview: classify, record step
//!                                    apply:   classify, mutate runtime,
//!                                             commit state, emit events
//! ```
//!
//! Both modes share the resolver, the graph, the classifier and the
//! walker. Apply additionally owns the cumulative result state: one
//! serialized commit per successful node, so an interrupted run leaves a
//! snapshot describing exactly the nodes that finished.

use crate::bus::MessageSender;
use crate::diff;
use crate::error::{Error, Result};
use crate::graph::{OperationGraph, ResourceNode};
use crate::ledger::{Action, ChangeOrder, ChangeStep};
use crate::resolver;
use crate::resource::{index_by_id, Resource};
use crate::runtime::{Runtime, WatchEvent};
use crate::spec::Spec;
use crate::state::{State, StateQuery, StateStorage};
use crate::walker::{self, NodeExecutor, WalkOptions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// =============================================================================
// Requests and Outcomes
// =============================================================================

/// One preview or apply request.
#[derive(Debug)]
pub struct OperationRequest {
    /// Owning tenant of the target stack.
    pub tenant: String,
    /// Project within the tenant.
    pub project: String,
    /// Stack within the project.
    pub stack: String,
    /// Target cluster; a cluster tag in the manifest overrides this.
    pub cluster: String,
    /// Identity responsible for the run, recorded in the snapshot.
    pub operator: String,
    /// The desired resource set.
    pub spec: Spec,
    /// Dot-paths suppressed during diff classification.
    pub ignore_fields: Vec<String>,
    /// Progress bus producer. Consumed by apply; preview stays silent.
    pub events: Option<MessageSender>,
}

impl OperationRequest {
    /// Creates a request with no ignore mask and no progress bus.
    pub fn new(
        tenant: impl Into<String>,
        project: impl Into<String>,
        stack: impl Into<String>,
        cluster: impl Into<String>,
        operator: impl Into<String>,
        spec: Spec,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            project: project.into(),
            stack: stack.into(),
            cluster: cluster.into(),
            operator: operator.into(),
            spec,
            ignore_fields: Vec::new(),
            events: None,
        }
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The final persisted snapshot.
    pub state: State,
    /// The ledger of executed steps, in plan order.
    pub order: ChangeOrder,
}

// =============================================================================
// Operation
// =============================================================================

/// The operation engine for one pair of collaborators.
///
/// Collaborators are acquired by the caller and outlive the operation; the
/// engine never closes them. One `Operation` value can serve many
/// sequential runs.
pub struct Operation {
    runtime: Arc<dyn Runtime>,
    state_storage: Arc<dyn StateStorage>,
    parallelism: usize,
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Duration>,
}

impl Operation {
    /// Creates an operation with default parallelism (available cores),
    /// no cancel signal and no deadline.
    pub fn new(runtime: Arc<dyn Runtime>, state_storage: Arc<dyn StateStorage>) -> Self {
        Self {
            runtime,
            state_storage,
            parallelism: walker::default_parallelism(),
            cancel: None,
            deadline: None,
        }
    }

    /// Caps how many sibling nodes execute concurrently.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Attaches an external cancel signal; flipping it to `true` stops
    /// scheduling and interrupts in-flight nodes.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Bounds total wall-clock of one run.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    // =========================================================================
    // Modes
    // =========================================================================

    /// Plans the request and returns the change ledger without touching
    /// the runtime beyond read-through classification.
    ///
    /// Identical inputs produce an identical ledger: step order is the
    /// deterministic plan order, not the walk's completion order.
    pub async fn preview(&self, request: OperationRequest) -> Result<ChangeOrder> {
        let plan = self.plan(&request).await?;
        info!(
            stack = %plan.query.stack,
            resources = plan.graph.resource_count(),
            "previewing operation"
        );

        let run = Arc::new(OperationRun {
            mode: Mode::Preview,
            runtime: Arc::clone(&self.runtime),
            state_storage: Arc::clone(&self.state_storage),
            ignore_fields: request.ignore_fields.clone(),
            resolved: RwLock::new(plan.prior_index.clone()),
            order: Mutex::new(ChangeOrder::with_keys(plan.graph.sorted_keys().to_vec())),
            result: tokio::sync::Mutex::new(State::new(&plan.query, request.operator.as_str())),
            events: None,
        });

        self.run_walk(&plan.graph, run.clone()).await?;
        run.take_order()
    }

    /// Plans the request, executes every step against the runtime and
    /// persists the snapshot after each successful node.
    ///
    /// On failure the storage backend holds the snapshot of the nodes that
    /// finished; the next run reconciles through `Runtime::read`.
    pub async fn apply(&self, request: OperationRequest) -> Result<ApplyOutcome> {
        let plan = self.plan(&request).await?;
        info!(
            stack = %plan.query.stack,
            resources = plan.graph.resource_count(),
            prior_serial = plan.prior_state.as_ref().map(|s| s.serial),
            "applying operation"
        );

        let mut result = State::new(&plan.query, request.operator.as_str());
        if let Some(prior) = &plan.prior_state {
            result.serial = prior.serial;
            result.prev_state_hash = prior.digest();
        }

        let run = Arc::new(OperationRun {
            mode: Mode::Apply,
            runtime: Arc::clone(&self.runtime),
            state_storage: Arc::clone(&self.state_storage),
            ignore_fields: request.ignore_fields.clone(),
            resolved: RwLock::new(plan.prior_index.clone()),
            order: Mutex::new(ChangeOrder::with_keys(plan.graph.sorted_keys().to_vec())),
            result: tokio::sync::Mutex::new(result),
            events: request.events,
        });

        self.run_walk(&plan.graph, run.clone()).await?;

        let order = run.take_order()?;
        let state = run.result.lock().await.clone();
        Ok(ApplyOutcome { state, order })
    }

    // =========================================================================
    // Plan Phase
    // =========================================================================

    async fn plan(&self, request: &OperationRequest) -> Result<PlannedRun> {
        if request.tenant.is_empty() || request.project.is_empty() || request.stack.is_empty() {
            return Err(Error::Config(
                "tenant, project and stack must be set".to_string(),
            ));
        }

        let cluster = request
            .spec
            .cluster
            .clone()
            .unwrap_or_else(|| request.cluster.clone());
        let query = StateQuery::new(&request.tenant, &request.project, &request.stack, cluster);

        let prior_state = self.state_storage.get_latest(&query).await?;
        let prior_resources = prior_state
            .as_ref()
            .map(|state| state.resources.clone())
            .unwrap_or_default();

        let graph = OperationGraph::build(&request.spec, &prior_resources)?;
        let prior_index = index_by_id(&prior_resources);

        Ok(PlannedRun {
            graph,
            prior_index,
            prior_state,
            query,
        })
    }

    async fn run_walk(&self, graph: &OperationGraph, run: Arc<OperationRun>) -> Result<()> {
        let options = WalkOptions {
            parallelism: self.parallelism,
            cancel: self.cancel.clone(),
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, walker::walk(graph, run, options))
                .await
                .map_err(|_| {
                    Error::Cancelled(format!("run deadline of {deadline:?} exceeded"))
                })?,
            None => walker::walk(graph, run, options).await,
        }
    }
}

struct PlannedRun {
    graph: OperationGraph,
    prior_index: HashMap<String, Resource>,
    prior_state: Option<State>,
    query: StateQuery,
}

// =============================================================================
// Per-Node Execution
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Preview,
    Apply,
}

/// Mutable context of one run. The walker's happens-before makes the
/// resolved index safe to read from downstream nodes without per-entry
/// locks; the ledger and result state each sit behind one coarse lock with
/// O(1) critical sections (the state lock is held across the storage call
/// so commits serialize in serial order).
struct OperationRun {
    mode: Mode,
    runtime: Arc<dyn Runtime>,
    state_storage: Arc<dyn StateStorage>,
    ignore_fields: Vec<String>,
    /// In-run index of already-final resources, seeded with the prior set.
    resolved: RwLock<HashMap<String, Resource>>,
    order: Mutex<ChangeOrder>,
    /// Cumulative result snapshot; meaningful in apply mode only.
    result: tokio::sync::Mutex<State>,
    events: Option<MessageSender>,
}

#[async_trait]
impl NodeExecutor for OperationRun {
    async fn execute(&self, node: &ResourceNode) -> Result<()> {
        match self.mode {
            Mode::Preview => self.preview_node(node).await,
            Mode::Apply => self.apply_node(node).await,
        }
    }
}

impl OperationRun {
    // =========================================================================
    // Preview
    // =========================================================================

    async fn preview_node(&self, node: &ResourceNode) -> Result<()> {
        let (action, old, new) = self.classify(node).await?;
        debug!(resource = %node.id, %action, "classified");

        match &new {
            Some(planned) => self.store_resolved(planned.clone())?,
            None => self.forget_resolved(&node.id)?,
        }
        self.record_step(ChangeStep::new(&node.id, action, old, new))
    }

    // =========================================================================
    // Apply
    // =========================================================================

    async fn apply_node(&self, node: &ResourceNode) -> Result<()> {
        if let Some(events) = &self.events {
            events.start(&node.id).await;
        }

        let outcome = self.apply_node_inner(node).await;

        if let Some(events) = &self.events {
            match &outcome {
                Ok(action) => events.success(&node.id, *action).await,
                Err(err) => events.fail(&node.id, &err.to_string()).await,
            }
        }
        outcome.map(|_| ())
    }

    async fn apply_node_inner(&self, node: &ResourceNode) -> Result<Action> {
        let (action, old, new) = self.classify(node).await?;
        self.record_step(ChangeStep::new(&node.id, action, old.clone(), new.clone()))?;

        let committed = match action {
            Action::Create | Action::Update => {
                let planned = new.ok_or_else(|| {
                    Error::Internal(format!("{action} step without planned entry"))
                })?;
                // The merge base for an update is the prior-snapshot entry;
                // the live read only feeds the change step.
                let base = if action == Action::Update {
                    node.prior.as_ref()
                } else {
                    None
                };
                let live = self.runtime.apply(base, &planned).await?;
                self.await_ready(&live).await?;
                Some(live)
            }
            Action::Delete => {
                let prior = old.ok_or_else(|| {
                    Error::Internal("delete step without prior entry".to_string())
                })?;
                self.runtime.delete(&prior).await?;
                None
            }
            // The prior entry is carried forward unchanged; the live read
            // may differ in masked fields and must not churn the snapshot.
            Action::Unchanged => node.prior.clone(),
        };

        match &committed {
            Some(live) => self.store_resolved(live.clone())?,
            None => self.forget_resolved(&node.id)?,
        }
        self.commit(&node.id, committed).await?;

        debug!(resource = %node.id, %action, "node committed");
        Ok(action)
    }

    /// Drains the runtime's readiness stream, when it provides one.
    async fn await_ready(&self, live: &Resource) -> Result<()> {
        let Some(mut events) = self.runtime.watch(live).await? else {
            return Ok(());
        };
        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Progressing { message } => {
                    debug!(resource = %live.id, %message, "converging");
                }
                WatchEvent::Ready => return Ok(()),
                WatchEvent::Failed { message } => {
                    return Err(Error::Runtime {
                        resource: live.id.clone(),
                        reason: message,
                    });
                }
            }
        }
        warn!(resource = %live.id, "watch stream ended without readiness");
        Ok(())
    }

    /// Appends the node's entry to the cumulative snapshot and persists
    /// it. Holding the state lock across the storage call serializes
    /// commits, so `serial` advances exactly once per successful node.
    async fn commit(&self, id: &str, live: Option<Resource>) -> Result<()> {
        let mut state = self.result.lock().await;
        match live {
            Some(resource) => state.upsert_resource(resource),
            None => state.remove_resource(id),
        }
        state.serial += 1;
        state.created_at = chrono::Utc::now();
        let snapshot = state.clone();
        self.state_storage.apply(&snapshot).await
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Resolves the node's references and finalizes its action:
    /// `(action, old = live/prior, new = resolved planned)`.
    async fn classify(
        &self,
        node: &ResourceNode,
    ) -> Result<(Action, Option<Resource>, Option<Resource>)> {
        match node.action {
            Action::Create => {
                let planned = self.resolve_planned(node)?;
                Ok((Action::Create, None, Some(planned)))
            }
            Action::Delete => Ok((Action::Delete, node.prior.clone(), None)),
            Action::Update => {
                let planned = self.resolve_planned(node)?;
                let prior = node.prior.as_ref().ok_or_else(|| {
                    Error::Internal(format!("update candidate {} without prior entry", node.id))
                })?;

                match self.runtime.read(prior).await? {
                    // The runtime no longer knows the resource: the prior
                    // entry is stale and the node becomes a create.
                    None => Ok((Action::Create, None, Some(planned))),
                    Some(live) => {
                        if diff::unchanged(&live.attributes, &planned.attributes, &self.ignore_fields)
                        {
                            Ok((Action::Unchanged, Some(live), Some(planned)))
                        } else {
                            Ok((Action::Update, Some(live), Some(planned)))
                        }
                    }
                }
            }
            Action::Unchanged => Err(Error::Internal(format!(
                "graph produced pre-classified node {}",
                node.id
            ))),
        }
    }

    fn resolve_planned(&self, node: &ResourceNode) -> Result<Resource> {
        let planned = node.planned.as_ref().ok_or_else(|| {
            Error::Internal(format!("node {} scheduled without planned entry", node.id))
        })?;
        let resolved = self
            .resolved
            .read()
            .map_err(|_| Error::Internal("resolved index lock poisoned".to_string()))?;
        let attributes = resolver::resolve_refs(&planned.attributes, &resolved)?;
        Ok(Resource {
            attributes,
            ..planned.clone()
        })
    }

    // =========================================================================
    // Shared Bookkeeping
    // =========================================================================

    fn store_resolved(&self, resource: Resource) -> Result<()> {
        self.resolved
            .write()
            .map_err(|_| Error::Internal("resolved index lock poisoned".to_string()))?
            .insert(resource.id.clone(), resource);
        Ok(())
    }

    fn forget_resolved(&self, id: &str) -> Result<()> {
        self.resolved
            .write()
            .map_err(|_| Error::Internal("resolved index lock poisoned".to_string()))?
            .remove(id);
        Ok(())
    }

    fn record_step(&self, step: ChangeStep) -> Result<()> {
        self.order
            .lock()
            .map_err(|_| Error::Internal("change order lock poisoned".to_string()))?
            .record(step)
    }

    fn take_order(&self) -> Result<ChangeOrder> {
        Ok(self
            .order
            .lock()
            .map_err(|_| Error::Internal("change order lock poisoned".to_string()))?
            .clone())
    }
}
