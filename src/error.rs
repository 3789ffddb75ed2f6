//! Error types for the operation engine.

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Manifest-level problem: missing reference target, dependency cycle,
    /// bad placeholder path, duplicate resource id.
    IllegalManifest,
    /// Runtime or state backend misconfiguration.
    Config,
    /// Failure reported by a `Runtime` call during preview or apply.
    Runtime,
    /// Failure reported by a `StateStorage` call.
    State,
    /// Snapshot serial conflict (another writer advanced the state).
    Conflict,
    /// Context cancellation or run deadline.
    Cancelled,
    /// Invariant violation inside the engine; should be unreachable.
    Internal,
}

/// How serious a failure is. The walker stops scheduling new nodes on the
/// first failure at [`Severity::Error`] or above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable anomaly; the run continues.
    Warning,
    /// Fatal for the node that produced it, and fail-fast for the run.
    Error,
}

/// Errors that can occur while planning or executing an operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Plan-Time Errors
    // =========================================================================
    /// The intent manifest is invalid: unresolvable reference, unknown
    /// dependency target, cycle, duplicate id.
    #[error("illegal manifest: {0}")]
    IllegalManifest(String),

    /// The operation was assembled incorrectly (bad parallelism, missing
    /// collaborator, malformed request).
    #[error("misconfigured operation: {0}")]
    Config(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// A `Runtime` call failed for a specific resource.
    #[error("runtime failure on resource '{resource}': {reason}")]
    Runtime { resource: String, reason: String },

    /// A `StateStorage` call failed.
    #[error("state backend failure: {0}")]
    State(String),

    /// The state backend rejected a snapshot whose serial does not advance
    /// the stored one.
    #[error("state serial conflict: {0}")]
    Conflict(String),

    /// The run was cancelled or exceeded its deadline.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Invariant violation; a bug in the engine rather than in the input.
    #[error("internal error: {0}")]
    Internal(String),

    /// Several node failures collected by one walk. A walk with a single
    /// failure returns that error directly instead.
    #[error("{} resource operations failed: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<Error>),
}

impl Error {
    /// Returns the broad kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IllegalManifest(_) => ErrorKind::IllegalManifest,
            Error::Config(_) => ErrorKind::Config,
            Error::Runtime { .. } => ErrorKind::Runtime,
            Error::State(_) => ErrorKind::State,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Internal(_) => ErrorKind::Internal,
            // An aggregate is as severe as its worst member; kind follows the
            // first entry since members are recorded in failure order.
            Error::Aggregate(errs) => errs
                .first()
                .map(Error::kind)
                .unwrap_or(ErrorKind::Internal),
        }
    }

    /// Returns the severity of this error. Every in-core failure is
    /// currently fatal; `Warning` is reserved for advisory statuses
    /// surfaced by collaborators.
    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    /// Returns the id of the resource this error is attributed to, when the
    /// failure is specific to one resource.
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Error::Runtime { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Collapses a list of node failures into a single error: one failure is
    /// returned as-is, several become [`Error::Aggregate`].
    ///
    /// Panics on an empty list in debug builds; callers only invoke this
    /// once at least one failure was observed.
    pub(crate) fn from_failures(mut failures: Vec<Error>) -> Error {
        debug_assert!(!failures.is_empty());
        if failures.len() == 1 {
            failures.remove(0)
        } else {
            Error::Aggregate(failures)
        }
    }

    /// Returns the individual failures of an aggregate, or a single-element
    /// slice view of any other error.
    pub fn failures(&self) -> std::slice::Iter<'_, Error> {
        match self {
            Error::Aggregate(errs) => errs.iter(),
            _ => std::slice::from_ref(self).iter(),
        }
    }
}

fn summarize(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
