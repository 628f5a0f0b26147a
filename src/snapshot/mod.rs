// src/snapshot/mod.rs

//! Live run state and its persistence model.
//!
//! - [`model`] is the serde data model: [`model::Snapshot`] and everything
//!   inside it. This is the on-wire shape callers persist and feed back to
//!   `resume_topology`.
//! - [`store`] owns every snapshot transition: readiness, dispatch,
//!   completion, branching skips, suspension propagation and finalization.
//! - [`resume`] converts a finalized snapshot back into a runnable one.

pub mod model;
pub mod resume;
pub(crate) mod store;

pub use model::{ErrorRecord, NodeData, NodeStatus, RunStatus, Selected, Snapshot, SnapshotRef};
pub use resume::reset_uncompleted;
