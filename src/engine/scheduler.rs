// src/engine/scheduler.rs

//! The run loop.
//!
//! The scheduler is the single writer of the snapshot. Each iteration
//! dispatches every ready node, then awaits the next [`RunnerEvent`] and
//! translates it into a snapshot transition. When the ready set and the
//! in-flight registry are both empty the run is finalized.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dag::Dag;
use crate::engine::events::EventBus;
use crate::engine::runner::NodeRunner;
use crate::engine::{ActionOutcome, NodeName, RunnerEvent};
use crate::errors::{BranchNotFoundError, Result, TopologyError};
use crate::snapshot::model::{ErrorRecord, RunStatus, Selected, SnapshotRef};
use crate::snapshot::store::{ready_to_run, StateManager};
use crate::spec::{BranchDecision, NodeAction};

pub(crate) struct Scheduler {
    dag: Dag,
    actions: BTreeMap<NodeName, NodeAction>,
    snapshot: SnapshotRef,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    runner: NodeRunner,
    event_rx: UnboundedReceiver<RunnerEvent>,
    initial_data: Option<Value>,
    /// Nodes with an outstanding spawned action, keyed by name so terminal
    /// detection can tell "nothing more to do" from "still waiting".
    in_flight: HashSet<NodeName>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dag: Dag,
        actions: BTreeMap<NodeName, NodeAction>,
        snapshot: SnapshotRef,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
        runner: NodeRunner,
        event_rx: UnboundedReceiver<RunnerEvent>,
        initial_data: Option<Value>,
    ) -> Self {
        Self {
            dag,
            actions,
            snapshot,
            bus,
            cancel,
            runner,
            event_rx,
            initial_data,
            in_flight: HashSet::new(),
        }
    }

    /// Drive the run to a terminal state.
    pub async fn run(mut self) -> Result<()> {
        info!(nodes = self.dag.len(), "topology run started");
        self.bus.emit_data(&self.snapshot);

        loop {
            // After stop() no new nodes are dispatched; in-flight actions
            // still settle normally below.
            let ready = if self.cancel.is_cancelled() {
                Vec::new()
            } else {
                ready_to_run(&self.dag, &self.snapshot.read())
            };

            if !ready.is_empty() {
                for node in ready {
                    self.dispatch(node);
                }
                // Branching settles inline, so dispatching may have made
                // more nodes ready; recompute before waiting.
                continue;
            }

            if self.in_flight.is_empty() {
                return self.finalize();
            }

            let Some(event) = self.event_rx.recv().await else {
                // Unreachable while the runner holds a sender; settle
                // whatever state we have.
                warn!("runner event channel closed mid-run");
                return self.finalize();
            };
            self.apply(event);
        }
    }

    fn dispatch(&mut self, node: NodeName) {
        let Some(action) = self.actions.get(&node).cloned() else {
            // Coverage validation makes this unreachable; record it as a
            // node failure rather than wedging the run.
            let err = anyhow::anyhow!("no action registered for node '{node}'");
            self.fail(&node, &err);
            return;
        };

        let now = Utc::now();
        let (input, state) = {
            let mut snapshot = self.snapshot.write();
            StateManager::new(&self.dag, &mut snapshot).mark_running(
                &node,
                self.initial_data.as_ref(),
                now,
            )
        };
        self.bus.emit_data(&self.snapshot);

        match action {
            NodeAction::Work(f) => {
                self.in_flight.insert(node.clone());
                self.runner.spawn_work(&node, &f, input, state);
            }
            NodeAction::Suspension(Some(f)) => {
                self.in_flight.insert(node.clone());
                self.runner.spawn_suspension(&node, &f, input, state);
            }
            NodeAction::Suspension(None) => {
                // No action: an immediately-completing suspension point.
                let mut snapshot = self.snapshot.write();
                StateManager::new(&self.dag, &mut snapshot)
                    .complete_suspension(&node, Utc::now());
                drop(snapshot);
                self.bus.emit_data(&self.snapshot);
            }
            NodeAction::Branching(selector) => {
                match self.runner.run_selector(&node, &selector, input, state) {
                    Ok(decision) => self.apply_branch(&node, decision),
                    Err(err) => self.fail(&node, &err),
                }
            }
        }
    }

    fn apply_branch(&mut self, node: &NodeName, decision: BranchDecision) {
        let (selected, reason) = match decision {
            BranchDecision::Branch { name, reason } => {
                let is_dependent = self.dag.dependents_of(node).iter().any(|d| d == &name);
                if !is_dependent {
                    let err = anyhow::Error::new(BranchNotFoundError {
                        node: node.clone(),
                        target: name,
                    });
                    self.fail(node, &err);
                    return;
                }
                (Selected::Node(name), reason)
            }
            BranchDecision::None { reason } => (Selected::None, reason),
        };

        let mut snapshot = self.snapshot.write();
        StateManager::new(&self.dag, &mut snapshot).complete_branch(
            node,
            selected,
            reason,
            Utc::now(),
        );
        drop(snapshot);
        self.bus.emit_data(&self.snapshot);
    }

    fn fail(&mut self, node: &NodeName, err: &anyhow::Error) {
        let mut snapshot = self.snapshot.write();
        StateManager::new(&self.dag, &mut snapshot).fail_node(
            node,
            ErrorRecord::from_anyhow(err),
            Utc::now(),
        );
        drop(snapshot);
        self.bus.emit_data(&self.snapshot);
    }

    fn apply(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::StateUpdated { node, state } => {
                let changed = {
                    let mut snapshot = self.snapshot.write();
                    StateManager::new(&self.dag, &mut snapshot).record_state(&node, state)
                };
                if changed {
                    self.bus.emit_data(&self.snapshot);
                }
            }
            RunnerEvent::Settled { node, outcome } => {
                if !self.in_flight.remove(&node) {
                    warn!(node = %node, "settlement for node not in flight");
                }

                let now = Utc::now();
                {
                    let mut snapshot = self.snapshot.write();
                    let mut manager = StateManager::new(&self.dag, &mut snapshot);
                    match outcome {
                        ActionOutcome::Output(output) => {
                            manager.complete_work(&node, output, now)
                        }
                        ActionOutcome::Done => manager.complete_suspension(&node, now),
                        ActionOutcome::Failed(err) => {
                            manager.fail_node(&node, ErrorRecord::from_anyhow(&err), now)
                        }
                    }
                }
                self.bus.emit_data(&self.snapshot);
            }
        }
    }

    fn finalize(&mut self) -> Result<()> {
        let (terminal, errored) = {
            let mut snapshot = self.snapshot.write();
            StateManager::new(&self.dag, &mut snapshot).finalize(Utc::now())
        };
        self.bus.emit_data(&self.snapshot);

        match terminal {
            RunStatus::Errored => {
                info!(?errored, "topology run finished with errors");
                self.bus.emit_error(&self.snapshot);
                Err(TopologyError::ErroredNodes(errored))
            }
            terminal => {
                info!(?terminal, "topology run finished");
                self.bus.emit_done(&self.snapshot);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::model::Snapshot;
    use crate::spec::{NodeDef, TopologySpec};
    use tokio::sync::mpsc;

    fn build(spec: &TopologySpec, data: Option<Value>) -> Scheduler {
        let dag = Dag::from_spec(spec);
        let snapshot = SnapshotRef::new(Snapshot::initial(&dag, Utc::now()));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = NodeRunner::new(tx, cancel.clone(), None);
        let actions = spec
            .iter()
            .map(|(name, def)| (name.clone(), def.action.clone()))
            .collect();
        Scheduler::new(
            dag,
            actions,
            snapshot,
            Arc::new(EventBus::new()),
            cancel,
            runner,
            rx,
            data,
        )
    }

    #[tokio::test]
    async fn empty_dag_completes_immediately() {
        let scheduler = build(&TopologySpec::new(), None);
        let snapshot = scheduler.snapshot.clone();

        scheduler.run().await.unwrap();

        let snap = snapshot.read();
        assert_eq!(snap.status, RunStatus::Completed);
        assert!(snap.finished.is_some());
    }

    #[tokio::test]
    async fn root_without_data_gets_empty_input() {
        let spec = TopologySpec::new().node(
            "root",
            NodeDef::work(|args| async move {
                assert!(args.data.is_empty());
                Ok(Value::Null)
            }),
        );
        let scheduler = build(&spec, None);
        let snapshot = scheduler.snapshot.clone();

        scheduler.run().await.unwrap();

        assert_eq!(
            snapshot.read().data["root"].input,
            Some(Vec::new())
        );
    }

    #[tokio::test]
    async fn root_receives_initial_data_wrapped() {
        let spec = TopologySpec::new().node(
            "root",
            NodeDef::work(|args| async move { Ok(args.data[0].clone()) }),
        );
        let scheduler = build(&spec, Some(serde_json::json!({"seed": 7})));
        let snapshot = scheduler.snapshot.clone();

        scheduler.run().await.unwrap();

        let snap = snapshot.read();
        assert_eq!(
            snap.data["root"].input,
            Some(vec![serde_json::json!({"seed": 7})])
        );
        assert_eq!(snap.data["root"].output, Some(serde_json::json!({"seed": 7})));
    }
}
