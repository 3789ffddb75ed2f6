//! Runtime interface - the pluggable driver the engine executes against.
//!
//! The engine never talks to a control plane directly. Every mutation and
//! read goes through the [`Runtime`] trait, so Kubernetes, Terraform, a
//! cloud SDK or a test fake all plug in the same way. Implementations are
//! acquired by the caller, shared across a run and never closed by the
//! engine.
//!
//! # Cancellation
//!
//! The engine cancels pending runtime I/O by dropping the node future it is
//! part of. Implementations should avoid detached background work so that
//! dropping the returned future promptly abandons the call.

use crate::error::Result;
use crate::resource::Resource;
use async_trait::async_trait;
use tokio::sync::mpsc;

// =============================================================================
// Watch Events
// =============================================================================

/// Readiness events emitted by runtimes that expose asynchronous
/// convergence (e.g. a control plane reconciling a resource after the
/// initial write was accepted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The resource is still converging.
    Progressing { message: String },
    /// The resource reached its desired state.
    Ready,
    /// The resource can no longer converge.
    Failed { message: String },
}

// =============================================================================
// Runtime Trait
// =============================================================================

/// Driver for one kind of infrastructure control plane.
///
/// # Contract
///
/// - `apply` and `delete` are idempotent: re-running a converged change or
///   deleting an absent resource must succeed.
/// - `read` reports absence as `Ok(None)`, never as an error.
/// - Retries are the runtime's responsibility; the engine fails a node on
///   the first error it sees.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Creates or updates a resource and returns its live representation,
    /// including any server-assigned attributes.
    ///
    /// `prior` is `None` for a create. For an update it carries the entry
    /// from the prior snapshot so drivers can three-way merge.
    async fn apply(&self, prior: Option<&Resource>, planned: &Resource) -> Result<Resource>;

    /// Reads the live representation of a resource.
    ///
    /// Returns `Ok(None)` when the resource does not exist.
    async fn read(&self, resource: &Resource) -> Result<Option<Resource>>;

    /// Deletes a resource. Deleting an already-absent resource succeeds.
    async fn delete(&self, resource: &Resource) -> Result<()>;

    /// Subscribes to readiness events for a resource that was just applied.
    ///
    /// Runtimes without asynchronous readiness keep the default, which
    /// reports "no watch available" and lets the engine treat the apply
    /// result as final.
    async fn watch(&self, resource: &Resource) -> Result<Option<mpsc::Receiver<WatchEvent>>> {
        let _ = resource;
        Ok(None)
    }
}
