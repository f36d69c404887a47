//! Dynamic-topology remeshing for brush-driven sculpting.
//!
//! This crate keeps the density of a triangle mesh adapted to a deforming
//! surface with:
//! - A bounding-volume tree whose leaves own disjoint sets of faces
//! - Brush-local edge split, edge collapse and valence 3/4 cleanup
//! - Per-vertex and per-face ownership that survives tree mutation
//! - Leaf split on overflow and subtree join after a stroke
//!
//! # Architecture
//!
//! Edits are localized: a [`TopologyUpdate`] names a brush sphere (or a view
//! projected circle) and a mode mask. Leaves flagged dirty collect candidate
//! edges in parallel, then the calling thread drains the queue under a step
//! budget and an optional wall-clock limit. Attribute data and undo history
//! live outside the engine and are reached through the [`AttributeStore`] and
//! [`ChangeLog`] traits.
//!
//! ## Key Components
//!
//! - **Mesh**: Arena-backed vertices, edges and triangles with adjacency
//! - **Tree**: Build, ownership index, maintenance, raycasts and verification
//! - **Queue**: Long/short edge candidates gathered per dirty leaf
//! - **Editor**: Split, collapse and cleanup driven by `update_topology`
//! - **Attributes**: Column storage for vertex, face and corner layers
//! - **Log**: Change notifications for an external undo system

pub mod attributes;
pub mod error;
pub mod log;
pub mod mesh;
pub mod spatial;
pub mod tree;
pub mod types;

mod editor;
mod queue;

pub use attributes::{corner_index, AttrDomain, AttributeLayer, AttributeLayers, AttributeStore, LayerData};
pub use error::DyntopoError;
pub use log::{ChangeLog, LogEntry, NullLog, RecordingLog};
pub use mesh::{Edge, EdgeId, ElemFlags, Face, FaceId, Mesh, VertId, Vertex};
pub use spatial::Aabb;
pub use tree::{
    ray_triangle_intersection, DyntopoTree, NearestHit, Node, NodeFlags, NodeId, NodeKind, RayHit,
    TriangleHit,
};
pub use types::{DyntopoConfig, TopologyUpdate, UpdateMode, UpdateStats};
