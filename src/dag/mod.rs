// src/dag/mod.rs

//! Runtime DAG derivation and filtering.
//!
//! - [`graph`] holds the directed acyclic graph of nodes derived from a spec
//!   (or, on resume, from a persisted snapshot), plus startup validation.
//! - [`filter`] applies include/exclude sub-DAG filtering.

pub mod filter;
pub mod graph;

pub use filter::filter_dag;
pub use graph::{validate_spec_coverage, validate_structure, Dag};
