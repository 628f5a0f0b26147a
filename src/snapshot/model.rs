// src/snapshot/model.rs

//! Serde data model for run snapshots.
//!
//! The wire shape is JSON with ISO-8601 timestamps. Unknown fields on any of
//! [`Snapshot`], [`NodeData`] and [`ErrorRecord`] are retained through a
//! deserialize/serialize round trip rather than rejected, so snapshots
//! produced by newer engines survive re-ingestion.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dag::Dag;
use crate::engine::NodeName;
use crate::spec::NodeType;

/// Terminal-or-running status of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Errored,
    Suspended,
}

/// Status of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Errored,
    Suspended,
    Skipped,
}

/// Structured error captured when a node action fails.
///
/// `message` is the error's display form; `stack` is the full chain (the
/// anyhow debug rendering, including context and backtrace when captured).
/// Extra fields attached by an earlier producer are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub stack: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorRecord {
    pub(crate) fn from_anyhow(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            stack: format!("{err:?}"),
            extra: Map::new(),
        }
    }
}

/// A branching node's choice: either a dependent name or an explicit "none".
///
/// Serialized as a plain string; "none" uses the `__none__` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected {
    Node(NodeName),
    None,
}

const NONE_SENTINEL: &str = "__none__";

impl Serialize for Selected {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Selected::Node(name) => serializer.serialize_str(name),
            Selected::None => serializer.serialize_str(NONE_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for Selected {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == NONE_SENTINEL {
            Ok(Selected::None)
        } else if s.is_empty() {
            Err(de::Error::custom("selected node name cannot be empty"))
        } else {
            Ok(Selected::Node(s))
        }
    }
}

/// Progress record for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Declared dependencies, copied from the spec so that resume can
    /// reconstruct the DAG without consulting the spec's shape.
    pub deps: Vec<NodeName>,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// Materialized input, cached on first dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<Value>>,
    /// Work node output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// The node's own checkpoint: last value passed to the state updater.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Branching nodes: the chosen dependent, or the "none" sentinel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<Selected>,
    /// Optional free-text reason stamped by a branching selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeData {
    /// A fresh pending entry for a node of the given shape.
    pub(crate) fn pending(node_type: NodeType, deps: Vec<NodeName>) -> Self {
        Self {
            node_type,
            deps,
            status: NodeStatus::Pending,
            started: None,
            finished: None,
            input: None,
            output: None,
            state: None,
            error: None,
            selected: None,
            reason: None,
            extra: Map::new(),
        }
    }
}

/// The complete observable state of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: RunStatus,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    pub data: BTreeMap<NodeName, NodeData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    /// A running snapshot with one pending entry per DAG node.
    pub(crate) fn initial(dag: &Dag, started: DateTime<Utc>) -> Self {
        let data = dag
            .nodes()
            .map(|name| {
                let entry = NodeData::pending(
                    dag.node_type_of(name).unwrap_or(NodeType::Work),
                    dag.deps_of(name).to_vec(),
                );
                (name.to_string(), entry)
            })
            .collect();

        Self {
            status: RunStatus::Running,
            started,
            finished: None,
            data,
            extra: Map::new(),
        }
    }
}

/// Shared reference to the live snapshot of a run.
///
/// Every emitted event carries a clone of this reference; it aliases the
/// live snapshot rather than copying it. Subscribers must treat the guard
/// as read-only and deep-copy (e.g. `read().clone()`) before persisting
/// asynchronously.
#[derive(Clone)]
pub struct SnapshotRef {
    inner: Arc<RwLock<Snapshot>>,
}

impl SnapshotRef {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Acquire a read guard on the live snapshot.
    pub fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether two references alias the same live snapshot.
    pub fn same_as(&self, other: &SnapshotRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotRef")
            .field("status", &self.read().status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_round_trips_through_sentinel() {
        let none = serde_json::to_string(&Selected::None).unwrap();
        assert_eq!(none, "\"__none__\"");
        assert_eq!(
            serde_json::from_str::<Selected>(&none).unwrap(),
            Selected::None
        );

        let node = serde_json::to_string(&Selected::Node("qualified".into())).unwrap();
        assert_eq!(
            serde_json::from_str::<Selected>(&node).unwrap(),
            Selected::Node("qualified".into())
        );
    }

    #[test]
    fn snapshot_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "status": "completed",
            "started": "2024-01-01T00:00:00Z",
            "finished": "2024-01-01T00:00:05Z",
            "futureTopLevel": {"a": 1},
            "data": {
                "api": {
                    "type": "work",
                    "deps": [],
                    "status": "completed",
                    "output": [1, 2, 3],
                    "futureNodeField": "kept",
                    "error": null
                }
            }
        });

        // `error: null` deserializes to None and is dropped on output, but
        // genuinely unknown fields must survive the round trip.
        let snapshot: Snapshot = serde_json::from_value(raw).unwrap();
        let back = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(back["futureTopLevel"]["a"], 1);
        assert_eq!(back["data"]["api"]["futureNodeField"], "kept");
        assert_eq!(back["data"]["api"]["type"], "work");
    }

    #[test]
    fn error_record_keeps_attached_fields() {
        let raw = serde_json::json!({
            "message": "boom",
            "stack": "boom\n  at line 1",
            "code": "E_BOOM"
        });

        let record: ErrorRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.message, "boom");
        assert_eq!(record.extra["code"], "E_BOOM");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["code"], "E_BOOM");
    }
}
