// src/lib.rs

//! `toporun` executes a user-defined topology: a DAG of computation nodes
//! whose data flow is expressed solely through dependency edges.
//!
//! The engine schedules nodes for parallel execution once their
//! dependencies complete, maintains a live [`Snapshot`] of every node's
//! progress, and supports:
//!
//! - **resumption** from a persisted snapshot ([`resume_topology`]);
//! - **branching** nodes that dynamically select which dependent subgraph
//!   to activate;
//! - **suspension** nodes that halt downstream progress until an external
//!   event resumes the run;
//! - cooperative **cancellation** via [`TopologyRun::stop`].
//!
//! Snapshot persistence, retries and any outer transport are the caller's
//! concern; the engine only emits snapshots and defines the action
//! contract.
//!
//! Events carry the *live* snapshot reference (zero-copy). Subscribers must
//! treat it as read-only and deep-copy (`snapshot.read().clone()`) before
//! persisting asynchronously.
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use toporun::{run_topology, NodeDef, RunOptions, TopologySpec};
//!
//! # async fn demo() -> toporun::Result<()> {
//! let spec = TopologySpec::new()
//!     .node("fetch", NodeDef::work(|_| async { Ok(json!([1, 2, 3])) }))
//!     .node(
//!         "count",
//!         NodeDef::work(|args| async move {
//!             let items = args.data[0].as_array().map(Vec::len).unwrap_or(0);
//!             Ok(Value::from(items))
//!         })
//!         .after("fetch"),
//!     );
//!
//! let run = run_topology(&spec, RunOptions::default())?;
//! run.start().await?;
//! assert_eq!(run.get_snapshot().read().data["count"].output, Some(json!(3)));
//! # Ok(())
//! # }
//! ```

pub mod dag;
pub mod engine;
pub mod errors;
pub mod snapshot;
pub mod spec;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dag::{filter_dag, validate_spec_coverage, validate_structure, Dag};
use crate::engine::runner::NodeRunner;
use crate::engine::scheduler::Scheduler;
pub use crate::engine::{EventBus, NodeName, ResumeOptions, RunOptions};
pub use crate::errors::{BranchNotFoundError, CancelledError, Result, TopologyError};
pub use crate::snapshot::model::{
    ErrorRecord, NodeData, NodeStatus, RunStatus, Selected, Snapshot, SnapshotRef,
};
pub use crate::snapshot::resume::reset_uncompleted;
pub use crate::spec::{
    BranchArgs, BranchDecision, NodeArgs, NodeDef, NodeType, StateUpdater, TopologySpec,
};

/// Handle on a single run, returned by [`run_topology`] and
/// [`resume_topology`].
///
/// Every run owns its own snapshot, event bus, cancellation source and
/// in-flight registry; two runs are fully independent.
pub struct TopologyRun {
    snapshot: SnapshotRef,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    driver: Mutex<Option<Scheduler>>,
    /// Resuming an already-completed snapshot yields an inert handle whose
    /// `start()` succeeds immediately with no effect.
    inert: bool,
}

impl std::fmt::Debug for TopologyRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyRun")
            .field("inert", &self.inert)
            .finish_non_exhaustive()
    }
}

impl TopologyRun {
    /// Drive the run to a terminal state.
    ///
    /// Completes when the run reaches `completed`, `suspended` or `errored`;
    /// in the errored case it fails with
    /// [`TopologyError::ErroredNodes`] naming the failed nodes. A handle can
    /// only be started once ([`TopologyError::AlreadyStarted`] afterwards).
    pub async fn start(&self) -> Result<()> {
        if self.inert {
            debug!("start() on completed snapshot; nothing to do");
            return Ok(());
        }

        let scheduler = {
            let mut slot = self.driver.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };

        match scheduler {
            Some(scheduler) => scheduler.run().await,
            None => Err(TopologyError::AlreadyStarted),
        }
    }

    /// Request cancellation. Idempotent; returns immediately.
    ///
    /// No new nodes are dispatched afterwards; in-flight actions observe the
    /// signal cooperatively and may still complete normally.
    pub fn stop(&self) {
        debug!("stop requested; cancelling run");
        self.cancel.cancel();
    }

    /// The live snapshot reference — valid before, during and after the run.
    pub fn get_snapshot(&self) -> SnapshotRef {
        self.snapshot.clone()
    }

    /// The run's `data` / `error` / `done` subscription surface.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }
}

/// Build a run from a spec.
///
/// Derives the runtime DAG from the spec, applies the include/exclude
/// filters (`exclude_nodes` wins when both are supplied), and validates the
/// result: dangling dependency references and cycles are rejected here,
/// synchronously, before anything executes.
pub fn run_topology(spec: &TopologySpec, options: RunOptions) -> Result<TopologyRun> {
    let dag = filter_dag(
        Dag::from_spec(spec),
        options.include_nodes.as_deref(),
        options.exclude_nodes.as_deref(),
    );
    validate_structure(&dag)?;
    validate_spec_coverage(spec, dag.nodes())?;

    info!(nodes = dag.len(), "topology prepared");
    let snapshot = SnapshotRef::new(Snapshot::initial(&dag, Utc::now()));
    Ok(assemble(spec, dag, snapshot, options.data, options.context))
}

/// Build a run that continues from a persisted snapshot.
///
/// The snapshot is authoritative for topology: the DAG is rebuilt from its
/// per-node `deps` and `type`, so a resumed run tolerates spec changes that
/// alter dependencies. The spec only has to supply actions for the nodes
/// that will actually run (anything not already completed or skipped).
///
/// Resuming a `completed` snapshot returns an inert handle: `start()`
/// succeeds immediately and the snapshot is untouched.
pub fn resume_topology(
    spec: &TopologySpec,
    snapshot: Option<Snapshot>,
    options: ResumeOptions,
) -> Result<TopologyRun> {
    let Some(snapshot) = snapshot else {
        return Err(TopologyError::MissingSnapshot);
    };

    if snapshot.status == RunStatus::Completed {
        debug!("resume of completed snapshot; returning inert handle");
        return Ok(TopologyRun {
            snapshot: SnapshotRef::new(snapshot),
            bus: Arc::new(EventBus::new()),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            inert: true,
        });
    }

    let reset = reset_uncompleted(&snapshot, Utc::now());
    let dag = Dag::from_snapshot(&reset);

    let needed = reset
        .data
        .iter()
        .filter(|(_, d)| d.status == NodeStatus::Pending)
        .map(|(name, _)| name.as_str());
    validate_spec_coverage(spec, needed)?;

    info!(nodes = dag.len(), "topology resumed from snapshot");
    let snapshot = SnapshotRef::new(reset);
    Ok(assemble(spec, dag, snapshot, None, options.context))
}

fn assemble(
    spec: &TopologySpec,
    dag: Dag,
    snapshot: SnapshotRef,
    data: Option<Value>,
    context: Option<Value>,
) -> TopologyRun {
    let bus = Arc::new(EventBus::new());
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let runner = NodeRunner::new(event_tx, cancel.clone(), context.map(Arc::new));

    let actions = dag
        .nodes()
        .filter_map(|name| {
            spec.get(name)
                .map(|def| (name.to_string(), def.action.clone()))
        })
        .collect();

    let scheduler = Scheduler::new(
        dag,
        actions,
        snapshot.clone(),
        Arc::clone(&bus),
        cancel.clone(),
        runner,
        event_rx,
        data,
    );

    TopologyRun {
        snapshot,
        bus,
        cancel,
        driver: Mutex::new(Some(scheduler)),
        inert: false,
    }
}
