//! # intentrun
//!
//! **Declarative Intent Operation Engine**
//!
//! This crate is the core of an infrastructure-as-code system: it takes a
//! declarative intent [`Spec`], compares it against the persisted prior
//! [`State`], and produces and executes a plan of per-resource actions
//! against a pluggable [`Runtime`]. Compiling manifests from source files,
//! rendering UIs and implementing concrete providers are the caller's
//! concern - the engine only consumes the interfaces defined here.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            intentrun                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Spec + PriorState                                                  │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ┌──────────┐    ┌───────────────┐    ┌──────────────────────────┐  │
//! │  │ Resolver │───►│ Graph Builder │───►│          Walker          │  │
//! │  │ $ refs   │    │ deps + refs   │    │ parallel topological walk│  │
//! │  └──────────┘    │ delete rev.   │    │ classify → act → commit  │  │
//! │                  └───────────────┘    └────────────┬─────────────┘  │
//! │                                                    │                │
//! │          ┌─────────────────┬───────────────────────┤                │
//! │          ▼                 ▼                       ▼                │
//! │   ┌─────────────┐   ┌─────────────┐        ┌───────────────┐       │
//! │   │ ChangeOrder │   │ Message Bus │        │ Result State  │       │
//! │   │  (ledger)   │   │ Start/Done  │        │ serial commits│       │
//! │   └─────────────┘   └─────────────┘        └───────────────┘       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                     External Collaborators                          │
//! │     ┌─────────────────────────┐   ┌─────────────────────────┐       │
//! │     │        Runtime          │   │      StateStorage       │       │
//! │     │ apply / read / delete / │   │ get_latest / apply      │       │
//! │     │         watch           │   │ (serial CAS → Conflict) │       │
//! │     └─────────────────────────┘   └─────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modes
//!
//! - [`Operation::preview`] plans only: every resource is classified to
//!   `Create`, `Update`, `Delete` or `Unchanged` and recorded in a
//!   [`ChangeOrder`] with structured diffs. No mutation happens; the only
//!   runtime contact is read-through classification.
//! - [`Operation::apply`] executes the same plan: each node mutates the
//!   runtime, the snapshot serial advances once per successful node, and
//!   typed progress events flow over a bounded bus.
//!
//! # Guarantees
//!
//! - The plan is deterministic: identical inputs yield byte-identical
//!   ledgers, with sibling order pinned lexicographically.
//! - The dependency graph (declared `dependsOn` plus discovered reference
//!   edges, with reversed edges for deletes) is verified acyclic before
//!   any runtime contact.
//! - For every edge `u → v`, `u`'s effect is committed to state before
//!   `v` starts; each node executes at most once; the first fatal failure
//!   stops scheduling and drains in-flight work.
//!
//! # Example
//!
//! ```rust,ignore
//! use intentrun::{MemoryStateStorage, Operation, OperationRequest, Spec};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> intentrun::Result<()> {
//!     let runtime = Arc::new(MyKubernetesRuntime::connect()?);
//!     let storage = Arc::new(MemoryStateStorage::new());
//!
//!     let spec = Spec::from_yaml(&std::fs::read("intent.yaml")?)?;
//!     let op = Operation::new(runtime, storage);
//!
//!     let order = op
//!         .preview(OperationRequest::new("t", "p", "s", "c", "me", spec))
//!         .await?;
//!     print!("{}", order.diffs());
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod constants;
pub mod diff;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod operation;
pub mod resolver;
pub mod resource;
pub mod runtime;
pub mod spec;
pub mod state;
pub mod walker;

pub use bus::{Event, EventKind, MessageSender};
pub use error::{Error, ErrorKind, Result, Severity};
pub use graph::{OperationGraph, ResourceNode};
pub use ledger::{Action, ChangeOrder, ChangeStep};
pub use operation::{ApplyOutcome, Operation, OperationRequest};
pub use resource::Resource;
pub use runtime::{Runtime, WatchEvent};
pub use spec::Spec;
pub use state::{FileStateStorage, MemoryStateStorage, State, StateQuery, StateStorage};
