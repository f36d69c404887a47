//! Candidate edge queues for one topology pass.
//!
//! Candidates are stored as vertex pairs rather than edge ids: edits during
//! the pass kill and recreate edges, so a popped pair is re-validated against
//! the current mesh before it is used.

mod collect;
mod region;

pub(crate) use region::BrushRegion;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::mesh::{EdgeId, Mesh, VertId};

/// Queue entry. Lower priority pops first.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub priority: f32,
    pub v: [VertId; 2],
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the lowest priority is on top
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.v.cmp(&self.v))
    }
}

/// Running edge length statistics of every inserted candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct LengthStats {
    pub total: f32,
    pub count: usize,
    pub min: f32,
    pub max: f32,
}

impl LengthStats {
    fn add(&mut self, len: f32) {
        if self.count == 0 {
            self.min = len;
            self.max = len;
        } else {
            self.min = self.min.min(len);
            self.max = self.max.max(len);
        }
        self.total += len;
        self.count += 1;
    }

    pub fn avg(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f32
        }
    }
}

fn pair_key(a: VertId, b: VertId) -> (VertId, VertId) {
    if a < b { (a, b) } else { (b, a) }
}

/// Min-priority queue of vertex pairs with duplicate suppression.
#[derive(Debug, Default)]
pub(crate) struct EdgeQueue {
    heap: BinaryHeap<Candidate>,
    queued: HashSet<(VertId, VertId)>,
    stats: LengthStats,
}

impl EdgeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the pair is waiting in the queue.
    pub fn contains(&self, a: VertId, b: VertId) -> bool {
        self.queued.contains(&pair_key(a, b))
    }

    /// Queue the edge if it may be edited: at least one endpoint not fully
    /// masked and neither endpoint hidden. Returns whether it was queued.
    pub fn insert(&mut self, mesh: &Mesh, e: EdgeId, priority: f32) -> bool {
        let Some(edge) = mesh.edge(e) else {
            return false;
        };
        let [a, b] = edge.v;
        if !edge_is_editable(mesh, a, b) || !self.queued.insert(pair_key(a, b)) {
            return false;
        }
        self.stats.add(mesh.co(a).distance(mesh.co(b)));
        self.heap.push(Candidate { priority, v: [a, b] });
        true
    }

    pub fn pop(&mut self) -> Option<Candidate> {
        let candidate = self.heap.pop()?;
        self.queued.remove(&pair_key(candidate.v[0], candidate.v[1]));
        Some(candidate)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn stats(&self) -> LengthStats {
        self.stats
    }
}

fn edge_is_editable(mesh: &Mesh, a: VertId, b: VertId) -> bool {
    let (Some(va), Some(vb)) = (mesh.vertex(a), mesh.vertex(b)) else {
        return false;
    };
    (va.mask < 1.0 || vb.mask < 1.0) && !va.is_hidden() && !vb.is_hidden()
}

/// Squared length of `a`-`b` used to rank collapses. With `weighted`,
/// edges between high-valence vertices look shorter.
pub(crate) fn collapse_len_sq(mesh: &Mesh, a: VertId, b: VertId, weighted: bool) -> f32 {
    let len_sq = mesh.co(a).distance_squared(mesh.co(b));
    if !weighted {
        return len_sq;
    }
    let val = (mesh.valence(a) + mesh.valence(b)) as f32;
    len_sq / (val * 0.5 - 6.0).max(1.0).sqrt()
}

/// Squared length of `a`-`b` used to rank splits. With `weighted`,
/// edges between high-valence vertices look longer.
pub(crate) fn split_len_sq(mesh: &Mesh, a: VertId, b: VertId, weighted: bool) -> f32 {
    let len_sq = mesh.co(a).distance_squared(mesh.co(b));
    if !weighted {
        return len_sq;
    }
    let val = (mesh.valence(a) + mesh.valence(b)) as f32;
    len_sq * (val * 0.5 - 6.0).max(1.0).sqrt()
}
