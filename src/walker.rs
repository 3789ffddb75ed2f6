//! Parallel topological graph walk.
//!
//! The walker drives every node of an [`OperationGraph`] to a terminal
//! state while holding the engine's scheduling contracts:
//!
//! - **Happens-before**: a node starts only after every predecessor
//!   finished successfully.
//! - **At-most-once**: each node's executor runs exactly once per walk.
//! - **Bounded parallelism**: siblings run concurrently up to the
//!   configured limit (default: available cores).
//! - **Fail-fast**: the first fatal failure stops scheduling; in-flight
//!   nodes drain to terminal and every failure is reported together.
//! - **Cancellation**: a watch signal stops scheduling and drops in-flight
//!   node futures, which abandons their pending runtime I/O.
//!
//! Node lifecycle: `Pending → Running → Done | Failed | Skipped`.

use crate::constants::FALLBACK_PARALLELISM;
use crate::error::{Error, Result, Severity};
use crate::graph::{OperationGraph, ResourceNode};
use async_trait::async_trait;
use petgraph::graph::NodeIndex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

// =============================================================================
// Executor Interface
// =============================================================================

/// Per-node work invoked by the walker. Implemented by the operation
/// kernel for preview and apply.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Drives one node to completion. An error fails the node.
    async fn execute(&self, node: &ResourceNode) -> Result<()>;
}

// =============================================================================
// Options
// =============================================================================

/// Run-level walk parameters.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Maximum number of concurrently executing nodes (min 1).
    pub parallelism: usize,
    /// External cancel signal; flipping it to `true` stops the walk.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            cancel: None,
        }
    }
}

/// Number of available cores, with a fixed fallback when it cannot be
/// determined.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_PARALLELISM)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

// =============================================================================
// Walk
// =============================================================================

/// Walks the graph, executing every node through `executor`.
///
/// Returns `Ok(())` when all nodes reached `Done`. Otherwise returns the
/// single failure, or an aggregate when several nodes failed before the
/// walk drained.
pub async fn walk(
    graph: &OperationGraph,
    executor: Arc<dyn NodeExecutor>,
    options: WalkOptions,
) -> Result<()> {
    let parallelism = options.parallelism.max(1);

    let mut states: HashMap<NodeIndex, NodeState> = graph
        .node_indices()
        .map(|idx| (idx, NodeState::Pending))
        .collect();
    let mut remaining: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.in_degree(idx)))
        .collect();

    // Ready nodes keyed by id: deterministic dispatch order under a
    // single-threaded walk.
    let mut ready: BTreeMap<String, NodeIndex> = BTreeMap::new();

    // The root is the unique source; it completes without work.
    let root = graph.root_index();
    states.insert(root, NodeState::Done);
    release(graph, root, &mut remaining, &mut ready);

    let (done_tx, mut done_rx) =
        mpsc::channel::<(NodeIndex, Result<()>)>(graph.resource_count().max(1));
    let mut in_flight = 0usize;
    let mut failures: Vec<Error> = Vec::new();
    let mut halted = false;

    loop {
        if !halted {
            if let Some(cancel) = &options.cancel {
                if *cancel.borrow() {
                    halted = true;
                    failures.push(Error::Cancelled("cancel requested".to_string()));
                }
            }
        }

        while !halted && in_flight < parallelism {
            let Some((id, idx)) = ready.pop_first() else {
                break;
            };
            states.insert(idx, NodeState::Running);
            in_flight += 1;
            debug!(resource = %id, "dispatching node");

            let node = graph
                .resource_at(idx)
                .expect("ready nodes are resource nodes")
                .clone();
            let executor = Arc::clone(&executor);
            let cancel = options.cancel.clone();
            let done_tx = done_tx.clone();

            let work = tokio::spawn(async move { run_node(executor, node, cancel).await });
            // A second task forwards the join result so a panicking
            // executor still reports a terminal state.
            tokio::spawn(async move {
                let result = match work.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        Err(Error::Internal(format!("node execution panicked: {join_err}")))
                    }
                };
                let _ = done_tx.send((idx, result)).await;
            });
        }

        if in_flight == 0 {
            break;
        }

        let (idx, result) = match done_rx.recv().await {
            Some(done) => done,
            None => break,
        };
        in_flight -= 1;

        match result {
            Ok(()) => {
                states.insert(idx, NodeState::Done);
                release(graph, idx, &mut remaining, &mut ready);
            }
            Err(err) => {
                states.insert(idx, NodeState::Failed);
                if err.severity() >= Severity::Error {
                    halted = true;
                }
                failures.push(err);
            }
        }
    }

    let skipped = states
        .values()
        .filter(|state| **state == NodeState::Pending)
        .count();
    if skipped > 0 {
        debug!(skipped, "nodes skipped after failure or cancellation");
    }
    for state in states.values_mut() {
        if *state == NodeState::Pending {
            *state = NodeState::Skipped;
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::from_failures(failures))
    }
}

/// Marks `idx` complete towards its successors; a successor whose last
/// predecessor just finished becomes ready.
fn release(
    graph: &OperationGraph,
    idx: NodeIndex,
    remaining: &mut HashMap<NodeIndex, usize>,
    ready: &mut BTreeMap<String, NodeIndex>,
) {
    for succ in graph.successors(idx) {
        let count = remaining.get_mut(&succ).expect("known node");
        *count -= 1;
        if *count == 0 {
            if let Some(node) = graph.resource_at(succ) {
                ready.insert(node.id.clone(), succ);
            }
        }
    }
}

/// Executes one node, racing it against the cancel signal. Cancellation
/// drops the execute future, abandoning any runtime call it was awaiting.
async fn run_node(
    executor: Arc<dyn NodeExecutor>,
    node: ResourceNode,
    cancel: Option<watch::Receiver<bool>>,
) -> Result<()> {
    match cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = cancelled(cancel) => Err(Error::Cancelled(format!(
                    "resource {} interrupted",
                    node.id
                ))),
                result = executor.execute(&node) => result,
            }
        }
        None => executor.execute(&node).await,
    }
}

/// Resolves once the cancel signal flips to `true`. A dropped sender is
/// not a cancel: the future then pends forever.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}
