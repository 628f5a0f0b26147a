// src/engine/runner.rs

//! Node action invocation.
//!
//! Work and suspension actions run as spawned Tokio tasks that report their
//! settlement back over the runner event channel; branching selectors are
//! synchronous by contract and run inline on the scheduler's thread of
//! control. The runner never touches the snapshot — translating outcomes
//! into transitions is the scheduler's job.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{ActionOutcome, NodeName, RunnerEvent};
use crate::spec::{BranchArgs, BranchDecision, BranchFn, NodeArgs, StateUpdater, SuspendFn, WorkFn};

/// Per-run invoker for node actions.
pub(crate) struct NodeRunner {
    tx: UnboundedSender<RunnerEvent>,
    cancel: CancellationToken,
    context: Option<Arc<Value>>,
}

impl NodeRunner {
    pub fn new(
        tx: UnboundedSender<RunnerEvent>,
        cancel: CancellationToken,
        context: Option<Arc<Value>>,
    ) -> Self {
        Self {
            tx,
            cancel,
            context,
        }
    }

    fn node_args(&self, node: &str, data: Vec<Value>, state: Option<Value>) -> NodeArgs {
        NodeArgs {
            data,
            state,
            updater: StateUpdater::new(node.to_string(), self.tx.clone()),
            signal: self.cancel.clone(),
            node: node.to_string(),
            context: self.context.clone(),
        }
    }

    /// Spawn a work action; its settlement arrives as a `RunnerEvent`.
    pub fn spawn_work(&self, node: &NodeName, action: &WorkFn, data: Vec<Value>, state: Option<Value>) {
        debug!(node = %node, "spawning work action");
        let fut = action(self.node_args(node, data, state));
        let tx = self.tx.clone();
        let node = node.clone();

        tokio::spawn(async move {
            let outcome = match fut.await {
                Ok(output) => ActionOutcome::Output(output),
                Err(err) => ActionOutcome::Failed(err),
            };
            // The receiver only drops once the run is over.
            let _ = tx.send(RunnerEvent::Settled { node, outcome });
        });
    }

    /// Spawn a suspension action; its settlement arrives as a `RunnerEvent`.
    pub fn spawn_suspension(
        &self,
        node: &NodeName,
        action: &SuspendFn,
        data: Vec<Value>,
        state: Option<Value>,
    ) {
        debug!(node = %node, "spawning suspension action");
        let fut = action(self.node_args(node, data, state));
        let tx = self.tx.clone();
        let node = node.clone();

        tokio::spawn(async move {
            let outcome = match fut.await {
                Ok(()) => ActionOutcome::Done,
                Err(err) => ActionOutcome::Failed(err),
            };
            let _ = tx.send(RunnerEvent::Settled { node, outcome });
        });
    }

    /// Run a branching selector inline.
    pub fn run_selector(
        &self,
        node: &NodeName,
        selector: &BranchFn,
        data: Vec<Value>,
        state: Option<Value>,
    ) -> anyhow::Result<BranchDecision> {
        debug!(node = %node, "running branching selector");
        selector(BranchArgs {
            data,
            state,
            node: node.clone(),
            context: self.context.clone(),
        })
    }
}
