// src/dag/filter.rs

//! Include/exclude sub-DAG filtering.

use tracing::debug;

use crate::dag::graph::Dag;
use crate::engine::NodeName;

/// Restrict a DAG to a sub-DAG.
///
/// - With `exclude`: the named nodes are removed, and every surviving node's
///   deps are rewritten to drop the excluded names. A node whose only deps
///   were excluded becomes a root.
/// - With `include`: only the named nodes are kept, and deps are rewritten
///   to the surviving subset.
/// - Exactly one of the two is honoured; `exclude` wins when both are
///   supplied.
///
/// Filtering is deliberately lenient: it does not check that the resulting
/// sub-DAG is semantically meaningful, only that dependency references
/// within it stay well-formed.
pub fn filter_dag(
    mut dag: Dag,
    include: Option<&[NodeName]>,
    exclude: Option<&[NodeName]>,
) -> Dag {
    if let Some(exclude) = exclude {
        debug!(?exclude, "filtering DAG by exclusion");
        for name in exclude {
            dag.remove(name);
        }
        dag.retain_deps(|dep| !exclude.iter().any(|e| e == dep));
        return dag.reindex();
    }

    if let Some(include) = include {
        debug!(?include, "filtering DAG by inclusion");
        let keep: Vec<NodeName> = dag
            .nodes()
            .filter(|n| include.iter().any(|i| i == n))
            .map(|s| s.to_string())
            .collect();
        let drop: Vec<NodeName> = dag
            .nodes()
            .filter(|n| !include.iter().any(|i| i == n))
            .map(|s| s.to_string())
            .collect();
        for name in &drop {
            dag.remove(name);
        }
        dag.retain_deps(|dep| keep.iter().any(|k| k == dep));
        return dag.reindex();
    }

    dag
}
