// src/dag/graph.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::engine::NodeName;
use crate::errors::{Result, TopologyError};
use crate::snapshot::model::Snapshot;
use crate::spec::{NodeType, TopologySpec};

/// Internal node structure: shape only (deps, kind, dependents).
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies in declared order.
    deps: Vec<NodeName>,
    node_type: NodeType,
    /// Direct dependents: nodes that list this one in their `deps`.
    dependents: Vec<NodeName>,
}

/// Lightweight in-memory DAG keyed by node name.
///
/// Holds only the shape of the topology; actions stay in the spec and
/// progress stays in the snapshot. Nodes are kept in a sorted map so that
/// iteration (and therefore dispatch order among equally-ready nodes) is
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: BTreeMap<NodeName, DagNode>,
}

impl Dag {
    /// Project a spec to its runtime DAG: `{deps, type}` per node.
    pub fn from_spec(spec: &TopologySpec) -> Self {
        Self::build(
            spec.iter()
                .map(|(name, def)| (name.clone(), def.deps.clone(), def.node_type())),
        )
    }

    /// Rebuild the DAG from a snapshot's persisted per-node `deps` + `type`.
    ///
    /// The snapshot is authoritative for topology on resume; the spec's DAG
    /// shape is never consulted.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::build(
            snapshot
                .data
                .iter()
                .map(|(name, data)| (name.clone(), data.deps.clone(), data.node_type)),
        )
    }

    fn build(entries: impl Iterator<Item = (NodeName, Vec<NodeName>, NodeType)>) -> Self {
        let mut nodes: BTreeMap<NodeName, DagNode> = entries
            .map(|(name, deps, node_type)| {
                (
                    name,
                    DagNode {
                        deps,
                        node_type,
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        // Second pass: populate dependents based on deps.
        let names: Vec<NodeName> = nodes.keys().cloned().collect();
        for name in names {
            let deps = nodes
                .get(&name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        Self { nodes }
    }

    /// All node names, in sorted order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of a node, in declared order.
    pub fn deps_of(&self, name: &str) -> &[NodeName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Direct dependents of a node.
    pub fn dependents_of(&self, name: &str) -> &[NodeName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn node_type_of(&self, name: &str) -> Option<NodeType> {
        self.nodes.get(name).map(|n| n.node_type)
    }

    pub(crate) fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    pub(crate) fn retain_deps(&mut self, keep: impl Fn(&str) -> bool) {
        for node in self.nodes.values_mut() {
            node.deps.retain(|d| keep(d));
        }
    }

    /// Rebuild the dependents index after deps have been rewritten.
    pub(crate) fn reindex(self) -> Self {
        Self::build(
            self.nodes
                .into_iter()
                .map(|(name, n)| (name, n.deps, n.node_type)),
        )
    }
}

/// Fail with `MissingSpecNodes` if any of the given DAG nodes lacks a spec
/// entry.
pub fn validate_spec_coverage<'a>(
    spec: &TopologySpec,
    required: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let missing: Vec<NodeName> = required
        .filter(|name| !spec.contains(name))
        .map(|s| s.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TopologyError::MissingSpecNodes(missing))
    }
}

/// Reject structurally impossible topologies: dangling dependency
/// references and cycles.
///
/// Runs after filtering, so a dangling reference here means the spec itself
/// named a node that was never defined (filtering rewrites deps for nodes it
/// removes).
pub fn validate_structure(dag: &Dag) -> Result<()> {
    for name in dag.nodes() {
        for dep in dag.deps_of(name) {
            if !dag.contains(dep) {
                return Err(TopologyError::UnknownDependency {
                    node: name.to_string(),
                    dep: dep.clone(),
                });
            }
        }
    }

    // Edge direction: dep -> node. A topological sort fails iff there is a
    // cycle.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in dag.nodes() {
        graph.add_node(name);
    }

    for name in dag.nodes() {
        for dep in dag.deps_of(name) {
            graph.add_edge(dep.as_str(), name, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TopologyError::CyclicTopology(cycle.node_id().to_string())),
    }
}
