// src/snapshot/resume.rs

//! Resume transformer: turn a finalized snapshot back into a runnable one.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::snapshot::model::{NodeStatus, RunStatus, Snapshot};

/// Produce a runnable snapshot from a persisted one.
///
/// Completed and skipped nodes are kept verbatim (including `output`,
/// `selected` and `reason`). Every other node is reset to pending,
/// preserving `input`, `state`, `deps` and `type` so the node can pick up
/// where it left off; `output`, `error`, `selected`, `reason` and both
/// timestamps are dropped.
///
/// Idempotent: resetting an already-reset snapshot changes nothing.
pub fn reset_uncompleted(snapshot: &Snapshot, now: DateTime<Utc>) -> Snapshot {
    let mut reset = snapshot.clone();
    reset.status = RunStatus::Running;
    reset.started = now;
    reset.finished = None;

    for (name, entry) in reset.data.iter_mut() {
        match entry.status {
            NodeStatus::Completed | NodeStatus::Skipped => {}
            _ => {
                debug!(node = %name, status = ?entry.status, "resetting node to pending");
                entry.status = NodeStatus::Pending;
                entry.started = None;
                entry.finished = None;
                entry.output = None;
                entry.error = None;
                entry.selected = None;
                entry.reason = None;
            }
        }
    }

    reset
}
