// src/engine/events.rs

//! Multi-listener event bus with three channels: `data`, `error`, `done`.
//!
//! Every emission carries the *live* snapshot reference — subscribers must
//! treat it as read-only and deep-copy before persisting asynchronously.
//! Emission is synchronous with respect to the snapshot mutation that caused
//! it: the scheduler mutates, then sends, before making its next decision.

use tokio::sync::broadcast;

use crate::snapshot::model::SnapshotRef;

const CHANNEL_CAPACITY: usize = 64;

/// Subscription surface of a run.
///
/// - `data` fires after every snapshot mutation.
/// - `error` fires once, at terminal failure.
/// - `done` fires once, at terminal success or suspension.
///
/// Channels are broadcast: a slow subscriber can lag and miss intermediate
/// `data` emissions, but `get_snapshot()` always exposes the current state.
#[derive(Debug)]
pub struct EventBus {
    data: broadcast::Sender<SnapshotRef>,
    error: broadcast::Sender<SnapshotRef>,
    done: broadcast::Sender<SnapshotRef>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (data, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (error, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (done, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { data, error, done }
    }

    /// Subscribe to snapshot mutations.
    pub fn subscribe_data(&self) -> broadcast::Receiver<SnapshotRef> {
        self.data.subscribe()
    }

    /// Subscribe to the terminal failure notification.
    pub fn subscribe_error(&self) -> broadcast::Receiver<SnapshotRef> {
        self.error.subscribe()
    }

    /// Subscribe to the terminal success/suspension notification.
    pub fn subscribe_done(&self) -> broadcast::Receiver<SnapshotRef> {
        self.done.subscribe()
    }

    // Sends fail only when there are no subscribers, which is fine: the
    // snapshot itself remains available through the run handle.

    pub(crate) fn emit_data(&self, snapshot: &SnapshotRef) {
        let _ = self.data.send(snapshot.clone());
    }

    pub(crate) fn emit_error(&self, snapshot: &SnapshotRef) {
        let _ = self.error.send(snapshot.clone());
    }

    pub(crate) fn emit_done(&self, snapshot: &SnapshotRef) {
        let _ = self.done.send(snapshot.clone());
    }
}
