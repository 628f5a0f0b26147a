// src/errors.rs

//! Crate-wide error types and helpers.

use thiserror::Error;

use crate::engine::NodeName;

#[derive(Error, Debug)]
pub enum TopologyError {
    /// The spec lacks a definition for one or more nodes the run needs.
    #[error("spec is missing node definitions for: {}", .0.join(", "))]
    MissingSpecNodes(Vec<NodeName>),

    /// `resume_topology` was called without a snapshot.
    #[error("cannot resume: no snapshot provided")]
    MissingSnapshot,

    /// The topology contains a dependency cycle.
    #[error("cycle detected in topology involving node '{0}'")]
    CyclicTopology(NodeName),

    /// A node's `deps` references a name that is not part of the DAG.
    #[error("node '{node}' has unknown dependency '{dep}'")]
    UnknownDependency { node: NodeName, dep: NodeName },

    /// Terminal failure: one or more nodes finished in the errored state.
    #[error("one or more nodes errored: {}", .0.join(", "))]
    ErroredNodes(Vec<NodeName>),

    /// `start()` was called on a run handle that has already been driven.
    #[error("run has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// Error recorded on a branching node whose selector returned a name that is
/// not one of its dependents.
#[derive(Error, Debug)]
#[error("branch target '{target}' is not a dependent of '{node}'")]
pub struct BranchNotFoundError {
    pub node: NodeName,
    pub target: NodeName,
}

/// Error a node action should return when it observes the cancellation
/// signal and exits early.
#[derive(Error, Debug, Default, Clone, Copy)]
#[error("action cancelled by stop()")]
pub struct CancelledError;
