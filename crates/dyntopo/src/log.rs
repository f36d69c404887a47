//! Change log hooks for undo.
//!
//! Every element the engine creates, deletes or moves is reported to a
//! [`ChangeLog`] before the change becomes visible to later edits:
//!
//! - [`NullLog`] - discards everything (no undo)
//! - [`RecordingLog`] - append-only record, useful for undo stacks and tests
//!
//! Removal hooks fire while the element is still live so the log can copy
//! whatever it needs.

use glam::Vec3;

use crate::mesh::{FaceId, Mesh, VertId};

/// Receiver for topology and position changes.
pub trait ChangeLog {
    fn vertex_added(&mut self, mesh: &Mesh, v: VertId);

    fn vertex_removed(&mut self, mesh: &Mesh, v: VertId);

    /// Called before a vertex position or mask is changed.
    fn vertex_before_modify(&mut self, mesh: &Mesh, v: VertId);

    fn face_added(&mut self, mesh: &Mesh, f: FaceId);

    fn face_removed(&mut self, mesh: &Mesh, f: FaceId);
}

/// Log that ignores all changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl ChangeLog for NullLog {
    fn vertex_added(&mut self, _mesh: &Mesh, _v: VertId) {}
    fn vertex_removed(&mut self, _mesh: &Mesh, _v: VertId) {}
    fn vertex_before_modify(&mut self, _mesh: &Mesh, _v: VertId) {}
    fn face_added(&mut self, _mesh: &Mesh, _f: FaceId) {}
    fn face_removed(&mut self, _mesh: &Mesh, _f: FaceId) {}
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    VertexAdded { v: VertId, co: Vec3 },
    VertexRemoved { v: VertId, co: Vec3, mask: f32 },
    VertexModified { v: VertId, co: Vec3, mask: f32 },
    FaceAdded { f: FaceId, verts: [VertId; 3] },
    FaceRemoved { f: FaceId, verts: [VertId; 3] },
}

/// Append-only change record.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    entries: Vec<LogEntry>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Take all entries, leaving the log empty (one undo step).
    pub fn drain(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_where(&self, pred: impl Fn(&LogEntry) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(e)).count()
    }
}

impl ChangeLog for RecordingLog {
    fn vertex_added(&mut self, mesh: &Mesh, v: VertId) {
        self.entries.push(LogEntry::VertexAdded { v, co: mesh.co(v) });
    }

    fn vertex_removed(&mut self, mesh: &Mesh, v: VertId) {
        let mask = mesh.vertex(v).map_or(0.0, |vert| vert.mask);
        self.entries.push(LogEntry::VertexRemoved {
            v,
            co: mesh.co(v),
            mask,
        });
    }

    fn vertex_before_modify(&mut self, mesh: &Mesh, v: VertId) {
        let mask = mesh.vertex(v).map_or(0.0, |vert| vert.mask);
        self.entries.push(LogEntry::VertexModified {
            v,
            co: mesh.co(v),
            mask,
        });
    }

    fn face_added(&mut self, mesh: &Mesh, f: FaceId) {
        if let Some(face) = mesh.face(f) {
            self.entries.push(LogEntry::FaceAdded { f, verts: face.v });
        }
    }

    fn face_removed(&mut self, mesh: &Mesh, f: FaceId) {
        if let Some(face) = mesh.face(f) {
            self.entries.push(LogEntry::FaceRemoved { f, verts: face.v });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::quad;

    #[test]
    fn test_recording_log_captures_live_state() {
        let mesh = quad();
        let mut log = RecordingLog::new();
        log.vertex_before_modify(&mesh, VertId(2));
        let f = mesh.face_exists([VertId(0), VertId(1), VertId(2)]).unwrap();
        log.face_removed(&mesh, f);

        assert_eq!(log.len(), 2);
        assert_eq!(
            log.entries()[0],
            LogEntry::VertexModified {
                v: VertId(2),
                co: Vec3::new(1.0, 1.0, 0.0),
                mask: 0.0
            }
        );
        assert!(matches!(log.entries()[1], LogEntry::FaceRemoved { .. }));
    }

    #[test]
    fn test_drain_empties_log() {
        let mesh = quad();
        let mut log = RecordingLog::new();
        log.vertex_added(&mesh, VertId(0));
        let step = log.drain();
        assert_eq!(step.len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_stale_face_is_not_recorded() {
        let mesh = quad();
        let mut log = RecordingLog::new();
        log.face_added(&mesh, FaceId(99));
        assert!(log.is_empty());
    }
}
