//! Change ledger - the ordered record of per-resource plan steps.
//!
//! A [`ChangeOrder`] is both the output of a preview and the progress
//! record of an apply. Step keys are fixed in deterministic plan order
//! before the walk starts, so two previews over identical inputs render
//! identical ledgers regardless of how much parallelism the walk used.

use crate::diff;
use crate::resource::Resource;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Actions
// =============================================================================

/// The operation a plan step performs on its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The resource exists in the plan but not in the prior state.
    Create,
    /// The resource exists in both and its attributes differ.
    Update,
    /// The resource exists only in the prior state.
    Delete,
    /// The resource exists in both with equal attributes; no runtime
    /// mutation will occur.
    Unchanged,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "Create"),
            Action::Update => write!(f, "Update"),
            Action::Delete => write!(f, "Delete"),
            Action::Unchanged => write!(f, "Unchanged"),
        }
    }
}

// =============================================================================
// Change Steps
// =============================================================================

/// One immutable plan step: what happens to one resource.
///
/// `old` is the live/prior representation (`None` for creates), `new` the
/// planned one (`None` for deletes).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeStep {
    pub id: String,
    pub action: Action,
    pub old: Option<Resource>,
    pub new: Option<Resource>,
}

impl ChangeStep {
    /// Creates a step.
    pub fn new(
        id: impl Into<String>,
        action: Action,
        old: Option<Resource>,
        new: Option<Resource>,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            old,
            new,
        }
    }

    /// Renders this step as a structured diff report:
    ///
    /// ```text
    /// ID: jack
    /// Plan: Update
    /// Diff:
    /// ~ a.b: "c" -> "d"
    /// ```
    ///
    /// A step without divergences renders `Diff: <EMPTY>`.
    pub fn diff(&self) -> String {
        let empty = Value::Object(serde_json::Map::new());
        let old = self
            .old
            .as_ref()
            .map(|r| r.attributes.clone())
            .unwrap_or_else(|| empty.clone());
        let new = self
            .new
            .as_ref()
            .map(|r| r.attributes.clone())
            .unwrap_or_else(|| empty.clone());

        let report = diff::render(&diff::entries(&old, &new));

        let mut out = String::new();
        out.push_str(&format!("ID: {}\n", self.id));
        out.push_str(&format!("Plan: {}\n", self.action));
        if report.trim().is_empty() {
            out.push_str("Diff: <EMPTY>\n");
        } else {
            out.push_str("Diff:\n");
            out.push_str(&report);
        }
        out
    }
}

// =============================================================================
// Step Filters
// =============================================================================

/// Predicate over change steps; several filters compose conjunctively in
/// [`ChangeOrder::values`].
pub type StepFilter = fn(&ChangeStep) -> bool;

/// Keeps only create steps.
pub const CREATE_STEPS: StepFilter = |s| s.action == Action::Create;
/// Keeps only update steps.
pub const UPDATE_STEPS: StepFilter = |s| s.action == Action::Update;
/// Keeps only delete steps.
pub const DELETE_STEPS: StepFilter = |s| s.action == Action::Delete;
/// Keeps only unchanged steps.
pub const UNCHANGED_STEPS: StepFilter = |s| s.action == Action::Unchanged;

// =============================================================================
// Change Order
// =============================================================================

/// Insertion-ordered ledger of plan steps, keyed by resource id.
///
/// The key sequence is fixed at plan time; steps fill in as nodes execute.
/// On a completed run every key has a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeOrder {
    step_keys: Vec<String>,
    steps: HashMap<String, ChangeStep>,
}

impl ChangeOrder {
    /// Creates a ledger whose step order is the given key sequence.
    pub fn with_keys(step_keys: Vec<String>) -> Self {
        Self {
            step_keys,
            steps: HashMap::new(),
        }
    }

    /// Records the step for its key. The key must be one of the ledger's
    /// plan keys and must not have been recorded before.
    pub fn record(&mut self, step: ChangeStep) -> crate::error::Result<()> {
        if !self.step_keys.iter().any(|k| k == &step.id) {
            return Err(crate::error::Error::Internal(format!(
                "change step for unplanned resource {}",
                step.id
            )));
        }
        if self.steps.insert(step.id.clone(), step).is_some() {
            return Err(crate::error::Error::Internal(
                "change step recorded twice".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the step for a key, if recorded.
    pub fn get(&self, key: &str) -> Option<&ChangeStep> {
        self.steps.get(key)
    }

    /// Returns the planned key sequence.
    pub fn step_keys(&self) -> &[String] {
        &self.step_keys
    }

    /// Returns recorded steps in ledger order, keeping only those matching
    /// every filter.
    pub fn values(&self, filters: &[StepFilter]) -> Vec<&ChangeStep> {
        self.step_keys
            .iter()
            .filter_map(|key| self.steps.get(key))
            .filter(|step| filters.iter().all(|f| f(step)))
            .collect()
    }

    /// Renders every recorded step's diff report in ledger order.
    pub fn diffs(&self) -> String {
        let mut out = String::new();
        for step in self.values(&[]) {
            out.push_str(&step.diff());
        }
        out
    }

    /// Returns true when every recorded step leaves its resource untouched.
    pub fn all_unchanged(&self) -> bool {
        self.values(&[]).iter().all(|s| s.action == Action::Unchanged)
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when no step has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
