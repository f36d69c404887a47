//! Error type for construction and API misuse.
//!
//! Edits inside an update pass never return errors: a stale handle or a
//! missing owner skips the single operation and is reported through
//! `tracing`. These variants cover input validation and node lookups.

use crate::mesh::VertId;
use crate::tree::NodeId;

/// Errors that can occur when building or querying a dyntopo tree
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DyntopoError {
    #[error("Triangle {triangle} references vertex {vertex} but the mesh has {count} vertices")]
    VertexOutOfRange {
        triangle: usize,
        vertex: u32,
        count: usize,
    },
    #[error("Triangle {triangle} is degenerate (repeated vertex)")]
    DegenerateTriangle { triangle: usize },
    #[error("Triangle {triangle} duplicates an existing face")]
    DuplicateTriangle { triangle: usize },
    #[error("Vertex {0:?} has a non-finite position")]
    NonFinitePosition(VertId),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("Node {0:?} is not a leaf")]
    NotALeaf(NodeId),
    #[error("{count} invariant violation(s), first: {first}")]
    InvariantViolation { count: usize, first: String },
}
