// src/engine/mod.rs

//! Execution engine for a single topology run.
//!
//! This module ties together:
//! - the node runner (spawning actions, running selectors inline)
//! - the scheduler loop that dispatches ready nodes and applies every
//!   snapshot transition on its own thread of control
//! - the event bus publishing `data` / `error` / `done` notifications
//!
//! The shape follows a channel-driven event loop: node actions run as
//! spawned tasks and report back over a single [`RunnerEvent`] channel; the
//! scheduler is the only writer of the snapshot.

use serde_json::Value;

/// Canonical node name type used throughout the engine.
pub type NodeName = String;

/// How a node action settled.
#[derive(Debug)]
pub(crate) enum ActionOutcome {
    /// Work action returned a value; it becomes the node's `output`.
    Output(Value),
    /// Suspension action finished (no output).
    Done,
    /// The action returned an error.
    Failed(anyhow::Error),
}

/// Events flowing from node tasks into the scheduler loop.
#[derive(Debug)]
pub(crate) enum RunnerEvent {
    /// An action checkpointed progress via its state updater.
    StateUpdated { node: NodeName, state: Value },
    /// An in-flight action settled.
    Settled {
        node: NodeName,
        outcome: ActionOutcome,
    },
}

/// Options for `run_topology`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict the DAG to these nodes. Ignored when `exclude_nodes` is also
    /// set (exclusion wins).
    pub include_nodes: Option<Vec<NodeName>>,
    /// Remove these nodes from the DAG, rewriting surviving deps.
    pub exclude_nodes: Option<Vec<NodeName>>,
    /// Initial value fed (as a single-element input sequence) to every node
    /// with no dependencies.
    pub data: Option<Value>,
    /// Arbitrary value passed unchanged to every node's callback. Not
    /// persisted in the snapshot.
    pub context: Option<Value>,
}

/// Options for `resume_topology`.
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    /// Arbitrary value passed unchanged to every node's callback.
    pub context: Option<Value>,
}

pub mod events;
pub(crate) mod runner;
pub(crate) mod scheduler;

pub use events::EventBus;
