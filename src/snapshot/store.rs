// src/snapshot/store.rs

//! Per-run snapshot transitions.
//!
//! [`StateManager`] is the only place node and run statuses change. The
//! scheduler constructs one around the DAG and a mutable snapshot borrow for
//! each transition, keeping every mutation on its own thread of control.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dag::Dag;
use crate::engine::NodeName;
use crate::snapshot::model::{ErrorRecord, NodeStatus, RunStatus, Selected, Snapshot};
use crate::spec::NodeType;

/// The readiness oracle: nodes that are pending and whose every dependency
/// is completed.
///
/// Dependencies in `suspended`, `skipped`, `errored` or `running` state do
/// not unblock a node; propagation rules give the dependents of
/// suspended/branch-skipped nodes their own terminal status instead.
pub(crate) fn ready_to_run(dag: &Dag, snapshot: &Snapshot) -> Vec<NodeName> {
    dag.nodes()
        .filter(|name| {
            let pending = snapshot
                .data
                .get(*name)
                .map(|d| d.status == NodeStatus::Pending)
                // Absent entry is treated as pending.
                .unwrap_or(true);

            pending
                && dag.deps_of(name).iter().all(|dep| {
                    snapshot
                        .data
                        .get(dep)
                        .map(|d| d.status == NodeStatus::Completed)
                        .unwrap_or(false)
                })
        })
        .map(|s| s.to_string())
        .collect()
}

pub(crate) struct StateManager<'a> {
    dag: &'a Dag,
    snapshot: &'a mut Snapshot,
}

impl<'a> StateManager<'a> {
    pub fn new(dag: &'a Dag, snapshot: &'a mut Snapshot) -> Self {
        Self { dag, snapshot }
    }

    /// Read-only view of the readiness oracle; see [`ready_to_run`].
    pub fn ready_to_run(&self) -> Vec<NodeName> {
        ready_to_run(self.dag, self.snapshot)
    }

    /// Transition a node to running: stamp `started`, materialize and cache
    /// its input. Returns the input and the node's current checkpoint for
    /// the action invocation.
    pub fn mark_running(
        &mut self,
        node: &str,
        initial_data: Option<&Value>,
        now: DateTime<Utc>,
    ) -> (Vec<Value>, Option<Value>) {
        let input = self.materialize_input(node, initial_data);

        let Some(entry) = self.snapshot.data.get_mut(node) else {
            warn!(node = %node, "mark_running for node missing from snapshot");
            return (input, None);
        };

        debug!(node = %node, "dispatching; marking running");
        entry.status = NodeStatus::Running;
        entry.started = Some(now);
        if entry.input.is_none() {
            entry.input = Some(input.clone());
        }

        (input, entry.state.clone())
    }

    /// Compute the input sequence for a node, honouring a previously cached
    /// value (from a prior run or resume).
    ///
    /// Walking deps in declared order: a work dep contributes its `output`;
    /// a branching or suspension dep contributes the elements of its own
    /// materialized input, spread inline, so values flow *through*
    /// control-flow nodes that produce no output of their own.
    fn materialize_input(&self, node: &str, initial_data: Option<&Value>) -> Vec<Value> {
        if let Some(cached) = self.snapshot.data.get(node).and_then(|d| d.input.clone()) {
            return cached;
        }

        let deps = self.dag.deps_of(node);
        if deps.is_empty() {
            return match initial_data {
                Some(value) => vec![value.clone()],
                None => Vec::new(),
            };
        }

        let mut input = Vec::with_capacity(deps.len());
        for dep in deps {
            let Some(dep_data) = self.snapshot.data.get(dep) else {
                warn!(node = %node, dep = %dep, "dependency missing from snapshot data");
                continue;
            };

            match dep_data.node_type {
                NodeType::Work => {
                    input.push(dep_data.output.clone().unwrap_or(Value::Null));
                }
                NodeType::Branching | NodeType::Suspension => {
                    input.extend(dep_data.input.clone().unwrap_or_default());
                }
            }
        }

        input
    }

    /// Record an `updateState` checkpoint. Only applies while the node is
    /// running; returns whether anything changed.
    pub fn record_state(&mut self, node: &str, state: Value) -> bool {
        match self.snapshot.data.get_mut(node) {
            Some(entry) if entry.status == NodeStatus::Running => {
                debug!(node = %node, "recording state checkpoint");
                entry.state = Some(state);
                true
            }
            Some(entry) => {
                debug!(
                    node = %node,
                    status = ?entry.status,
                    "ignoring state update for settled node"
                );
                false
            }
            None => {
                warn!(node = %node, "state update for unknown node; ignoring");
                false
            }
        }
    }

    /// Work action returned successfully.
    pub fn complete_work(&mut self, node: &str, output: Value, now: DateTime<Utc>) {
        if let Some(entry) = self.snapshot.data.get_mut(node) {
            debug!(node = %node, "work node completed");
            entry.status = NodeStatus::Completed;
            entry.finished = Some(now);
            entry.output = Some(output);
        }
    }

    /// Suspension node finished its (possibly absent) action: the node
    /// completes and every direct dependent is transitioned to suspended.
    pub fn complete_suspension(&mut self, node: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.snapshot.data.get_mut(node) {
            entry.status = NodeStatus::Completed;
            entry.finished = Some(now);
        }

        for dependent in self.dag.dependents_of(node) {
            if let Some(entry) = self.snapshot.data.get_mut(dependent) {
                debug!(node = %node, dependent = %dependent, "suspending dependent");
                entry.status = NodeStatus::Suspended;
                entry.finished = Some(now);
            }
        }
    }

    /// Branching selector chose a dependent (or none): the branching node
    /// completes with its selection, and every non-selected *direct*
    /// dependent is skipped.
    ///
    /// Skipping is shallow by design: deeper descendants stay pending (their
    /// deps will never complete) and are skipped en masse at finalization.
    /// Callers inspecting the snapshot mid-run will observe this.
    pub fn complete_branch(
        &mut self,
        node: &str,
        selected: Selected,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(entry) = self.snapshot.data.get_mut(node) {
            debug!(node = %node, selected = ?selected, "branching node completed");
            entry.status = NodeStatus::Completed;
            entry.finished = Some(now);
            entry.selected = Some(selected.clone());
            entry.reason = reason;
        }

        let chosen = match &selected {
            Selected::Node(name) => Some(name.as_str()),
            Selected::None => None,
        };

        for dependent in self.dag.dependents_of(node) {
            if Some(dependent.as_str()) == chosen {
                continue;
            }
            if let Some(entry) = self.snapshot.data.get_mut(dependent) {
                debug!(node = %node, dependent = %dependent, "skipping non-selected dependent");
                entry.status = NodeStatus::Skipped;
            }
        }
    }

    /// Record an action failure on the node.
    pub fn fail_node(&mut self, node: &str, error: ErrorRecord, now: DateTime<Utc>) {
        if let Some(entry) = self.snapshot.data.get_mut(node) {
            warn!(node = %node, error = %error.message, "node errored");
            entry.status = NodeStatus::Errored;
            entry.finished = Some(now);
            entry.error = Some(error);
        }
    }

    /// Terminal detection and finalization.
    ///
    /// Terminal precedence: errored > suspended > completed. Nodes still
    /// pending are suspended (suspended terminal), skipped (completed
    /// terminal), or left pending (errored terminal — recording that they
    /// never ran, which resume relies on).
    ///
    /// Returns the terminal status and the names of errored nodes.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> (RunStatus, Vec<NodeName>) {
        let errored: Vec<NodeName> = self
            .snapshot
            .data
            .iter()
            .filter(|(_, d)| d.status == NodeStatus::Errored)
            .map(|(name, _)| name.clone())
            .collect();

        let any_suspended = self
            .snapshot
            .data
            .values()
            .any(|d| d.status == NodeStatus::Suspended);

        let terminal = if !errored.is_empty() {
            RunStatus::Errored
        } else if any_suspended {
            RunStatus::Suspended
        } else {
            RunStatus::Completed
        };

        for (name, entry) in self.snapshot.data.iter_mut() {
            if entry.status != NodeStatus::Pending {
                continue;
            }
            match terminal {
                RunStatus::Suspended => {
                    debug!(node = %name, "suspending pending node at finalize");
                    entry.status = NodeStatus::Suspended;
                    entry.finished = Some(now);
                }
                RunStatus::Completed => {
                    debug!(node = %name, "skipping unreachable pending node at finalize");
                    entry.status = NodeStatus::Skipped;
                }
                RunStatus::Errored | RunStatus::Running => {}
            }
        }

        self.snapshot.status = terminal;
        self.snapshot.finished = Some(now);

        (terminal, errored)
    }
}
