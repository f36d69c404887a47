//! Core dyntopo types: configuration, update requests and pass statistics.

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::DyntopoError;

bitflags! {
    /// Which topology passes an update call runs.
    ///
    /// Passes always execute in the order collapse, subdivide, cleanup,
    /// regardless of the order the bits were set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct UpdateMode: u8 {
        /// Collapse edges shorter than the minimum edge length
        const COLLAPSE = 1 << 0;
        /// Split edges longer than the maximum edge length
        const SUBDIVIDE = 1 << 1;
        /// Dissolve valence 3/4 vertices inside the brush
        const CLEANUP = 1 << 2;
    }
}

impl Default for UpdateMode {
    fn default() -> Self {
        UpdateMode::COLLAPSE | UpdateMode::SUBDIVIDE
    }
}

/// Configuration for the dyntopo engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DyntopoConfig {
    /// Maximum faces a leaf may hold before it is split
    pub leaf_limit: usize,
    /// Target maximum edge length (world units)
    pub detail_size: f32,
    /// Minimum edge length as a fraction of `detail_size`
    pub detail_range: f32,
    /// Base step budget for a collapse or subdivide pass
    pub max_iterations: usize,
    /// Depth cap when re-splitting an overflowing leaf (relative to that leaf)
    pub max_split_depth: u32,
    /// Depth cap for the initial build
    pub max_build_depth: u32,
    /// How much longer a neighbor edge must be to join a subdivision ring
    pub even_edge_len_threshold: f32,
    /// Growth of the acceptance limit per ring generation
    pub even_generation_scale: f32,
    /// Ring depth after which back-facing faces stop the expansion
    pub frontface_depth_start: u32,
    /// Tangential relaxation applied to vertices feeding the long-edge queue
    pub smooth_factor: f32,
    /// Penalize high-valence vertices when measuring edges
    pub valence_weighted_edges: bool,
    /// Cleanup reaches this multiple of the brush radius
    pub cleanup_radius_scale: f32,
    /// Wall-clock bailout per pass, in milliseconds
    pub time_limit_ms: Option<u64>,
    /// Clamp band for the collapse step budget ratio
    pub collapse_ratio_band: (f32, f32),
    /// Clamp band for the subdivide step budget ratio
    pub subdivide_ratio_band: (f32, f32),
}

impl Default for DyntopoConfig {
    fn default() -> Self {
        Self {
            leaf_limit: 1000,
            detail_size: 0.75,
            detail_range: 0.4,
            max_iterations: 4096,
            max_split_depth: 6,
            max_build_depth: 32,
            even_edge_len_threshold: 1.2,
            even_generation_scale: 1.1,
            frontface_depth_start: 5,
            smooth_factor: 0.05,
            valence_weighted_edges: false,
            cleanup_radius_scale: 1.25,
            time_limit_ms: None,
            collapse_ratio_band: (0.25, 5.0),
            subdivide_ratio_band: (0.05, 1.0),
        }
    }
}

impl DyntopoConfig {
    /// Edges longer than this are split.
    pub fn max_edge_len(&self) -> f32 {
        self.detail_size
    }

    /// Edges shorter than this are collapsed.
    pub fn min_edge_len(&self) -> f32 {
        self.detail_size * self.detail_range
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), DyntopoError> {
        if self.leaf_limit == 0 {
            return Err(DyntopoError::InvalidConfig("leaf_limit must be positive".into()));
        }
        if !(self.detail_size.is_finite() && self.detail_size > 0.0) {
            return Err(DyntopoError::InvalidConfig(format!(
                "detail_size must be positive, got {}",
                self.detail_size
            )));
        }
        if !(0.0..1.0).contains(&self.detail_range) {
            return Err(DyntopoError::InvalidConfig(format!(
                "detail_range must be in [0, 1), got {}",
                self.detail_range
            )));
        }
        if self.collapse_ratio_band.0 > self.collapse_ratio_band.1
            || self.subdivide_ratio_band.0 > self.subdivide_ratio_band.1
        {
            return Err(DyntopoError::InvalidConfig("ratio band min exceeds max".into()));
        }
        Ok(())
    }
}

/// One brush-driven topology update request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopologyUpdate {
    pub mode: UpdateMode,
    /// Brush center (world space)
    pub center: Vec3,
    /// View direction, required for front-face and projected tests
    pub view_normal: Option<Vec3>,
    pub radius: f32,
    /// Skip faces whose normal points away from `view_normal`
    pub use_frontface: bool,
    /// Test the brush as a circle in the plane orthogonal to `view_normal`
    pub use_projected: bool,
    /// Re-split overflowing leaves and refresh bounds after the edits
    pub update_bounding_volumes: bool,
}

impl TopologyUpdate {
    /// A sphere-region request with no view-dependent tests.
    pub fn sphere(mode: UpdateMode, center: Vec3, radius: f32) -> Self {
        Self {
            mode,
            center,
            view_normal: None,
            radius,
            use_frontface: false,
            use_projected: false,
            update_bounding_volumes: true,
        }
    }
}

/// Counters for one `update_topology` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub edges_split: usize,
    pub edges_collapsed: usize,
    pub vertices_dissolved: usize,
    /// A pass stopped on its step budget or time limit with work left
    pub budget_exhausted: bool,
}

impl UpdateStats {
    pub fn modified(&self) -> bool {
        self.edges_split > 0 || self.edges_collapsed > 0 || self.vertices_dissolved > 0
    }
}
