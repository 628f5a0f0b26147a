// src/spec.rs

//! Topology spec: node definitions, action callback contracts and the
//! builder-style construction API.
//!
//! A [`TopologySpec`] maps node names to [`NodeDef`]s. A node definition is
//! its ordered dependency list plus a [`NodeAction`], a sum type with one
//! case per node kind:
//!
//! - **work**: an asynchronous action whose return value becomes the node's
//!   `output`;
//! - **branching**: a synchronous selector that picks at most one dependent
//!   subgraph to activate;
//! - **suspension**: an optional side-effect action; completing it suspends
//!   every direct dependent.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::engine::{NodeName, RunnerEvent};

/// Node kind tag, as persisted in snapshots under the `type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Work,
    Branching,
    Suspension,
}

/// Arguments passed to work and suspension actions.
pub struct NodeArgs {
    /// Materialized input, one element per dependency in declared order
    /// (control-flow dependencies contribute their own input, spread inline).
    pub data: Vec<Value>,
    /// The node's last checkpoint, as recorded by [`StateUpdater::update`].
    pub state: Option<Value>,
    /// Hook for checkpointing progress mid-action.
    pub updater: StateUpdater,
    /// Cooperative cancellation signal; actions should observe it and return
    /// a [`CancelledError`](crate::errors::CancelledError) to exit promptly.
    pub signal: CancellationToken,
    /// This node's name.
    pub node: NodeName,
    /// Caller-supplied context, passed verbatim to every action.
    pub context: Option<Arc<Value>>,
}

/// Arguments passed to branching selectors (synchronous, no signal or
/// checkpoint hook).
pub struct BranchArgs {
    pub data: Vec<Value>,
    pub state: Option<Value>,
    pub node: NodeName,
    pub context: Option<Arc<Value>>,
}

/// Decision returned by a branching selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchDecision {
    /// Activate the named dependent; every other dependent is skipped.
    Branch {
        name: NodeName,
        reason: Option<String>,
    },
    /// Activate nothing; every dependent is skipped.
    None { reason: Option<String> },
}

impl BranchDecision {
    pub fn branch(name: impl Into<NodeName>) -> Self {
        BranchDecision::Branch {
            name: name.into(),
            reason: None,
        }
    }

    pub fn none() -> Self {
        BranchDecision::None { reason: None }
    }

    pub fn with_reason(self, reason: impl Into<String>) -> Self {
        match self {
            BranchDecision::Branch { name, .. } => BranchDecision::Branch {
                name,
                reason: Some(reason.into()),
            },
            BranchDecision::None { .. } => BranchDecision::None {
                reason: Some(reason.into()),
            },
        }
    }
}

/// Cloneable handle an action uses to overwrite its node's checkpoint.
///
/// Each call records the value as the node's `state` and emits a `data`
/// event. Calls made after the node has settled are ignored.
#[derive(Clone)]
pub struct StateUpdater {
    node: NodeName,
    tx: UnboundedSender<RunnerEvent>,
}

impl StateUpdater {
    pub(crate) fn new(node: NodeName, tx: UnboundedSender<RunnerEvent>) -> Self {
        Self { node, tx }
    }

    pub fn update(&self, state: Value) {
        // The receiver only drops once the run is over; a failed send just
        // means there is no scheduler left to record the checkpoint.
        let _ = self.tx.send(RunnerEvent::StateUpdated {
            node: self.node.clone(),
            state,
        });
    }
}

impl fmt::Debug for StateUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateUpdater")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// Asynchronous work action: consumes its inputs, returns the node output.
pub type WorkFn = Arc<dyn Fn(NodeArgs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Synchronous branching selector.
pub type BranchFn = Arc<dyn Fn(BranchArgs) -> anyhow::Result<BranchDecision> + Send + Sync>;

/// Asynchronous suspension action (side effects only, no output).
pub type SuspendFn = Arc<dyn Fn(NodeArgs) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The programmable action of a node, one case per node kind.
#[derive(Clone)]
pub enum NodeAction {
    Work(WorkFn),
    Branching(BranchFn),
    Suspension(Option<SuspendFn>),
}

impl NodeAction {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeAction::Work(_) => NodeType::Work,
            NodeAction::Branching(_) => NodeType::Branching,
            NodeAction::Suspension(_) => NodeType::Suspension,
        }
    }
}

impl fmt::Debug for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAction::Work(_) => f.write_str("Work(..)"),
            NodeAction::Branching(_) => f.write_str("Branching(..)"),
            NodeAction::Suspension(Some(_)) => f.write_str("Suspension(Some(..))"),
            NodeAction::Suspension(None) => f.write_str("Suspension(None)"),
        }
    }
}

/// A single node definition: ordered dependencies plus its action.
#[derive(Debug, Clone)]
pub struct NodeDef {
    /// Dependency names in declared order. Order is preserved because it
    /// determines the positional order of the node's inputs.
    pub deps: Vec<NodeName>,
    pub action: NodeAction,
}

impl NodeDef {
    /// A work node with the given asynchronous action.
    pub fn work<F, Fut>(f: F) -> Self
    where
        F: Fn(NodeArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            deps: Vec::new(),
            action: NodeAction::Work(Arc::new(move |args| f(args).boxed())),
        }
    }

    /// A branching node with the given synchronous selector.
    pub fn branching<F>(f: F) -> Self
    where
        F: Fn(BranchArgs) -> anyhow::Result<BranchDecision> + Send + Sync + 'static,
    {
        Self {
            deps: Vec::new(),
            action: NodeAction::Branching(Arc::new(f)),
        }
    }

    /// A suspension node with no action: it completes immediately and
    /// suspends its dependents.
    pub fn suspension() -> Self {
        Self {
            deps: Vec::new(),
            action: NodeAction::Suspension(None),
        }
    }

    /// Attach a side-effect action to a suspension node.
    ///
    /// Has no effect on work or branching nodes.
    pub fn with_action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(NodeArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if let NodeAction::Suspension(ref mut action) = self.action {
            *action = Some(Arc::new(move |args| f(args).boxed()));
        }
        self
    }

    /// Append a dependency. Declaration order is the input order.
    pub fn after(mut self, dep: impl Into<NodeName>) -> Self {
        self.deps.push(dep.into());
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.action.node_type()
    }
}

/// A topology spec: a named collection of node definitions.
#[derive(Debug, Clone, Default)]
pub struct TopologySpec {
    nodes: std::collections::BTreeMap<NodeName, NodeDef>,
}

impl TopologySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a node definition.
    pub fn node(mut self, name: impl Into<NodeName>, def: NodeDef) -> Self {
        self.nodes.insert(name.into(), def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeName, &NodeDef)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
