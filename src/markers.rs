use crate::host::{MarkerHandle, MarkerId, MarkerPlacement};
use crate::spatial::{BlockPos, CellKey};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Distance a marker is nudged from the anchor cell center toward the viewer.
pub const FACING_OFFSET: f64 = 0.2;

/// Distance a lock marker sits in front of its sign, away from the container.
pub const LOCK_MARKER_OFFSET: f64 = 0.3;

/// A marker pulled out of the registry: its durable identity plus the live
/// handle when this process spawned it. After a restart the handle is gone
/// and the host's durable lookup is the fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TakenMarker {
    pub id: MarkerId,
    pub live: Option<MarkerHandle>,
}

/// Tracks floating-text markers by owning cell.
///
/// Two tables back the registry: the persisted `CellKey -> Vec<MarkerId>`
/// map (insertion order is display order, top line first) and an in-memory
/// `MarkerId -> MarkerHandle` table for fast despawn while the process that
/// spawned the marker is still alive. After a restart the live table starts
/// empty and identities resolve through the host instead. The live table is
/// owned by the registry instance, never process-global.
#[derive(Debug, Default)]
pub struct MarkerRegistry {
    by_location: RwLock<HashMap<String, Vec<MarkerId>>>,
    live: RwLock<HashMap<MarkerId, MarkerHandle>>,
    dirty: AtomicBool,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly spawned marker line at `key`.
    pub fn record(&self, key: &CellKey, id: MarkerId, handle: MarkerHandle) {
        self.by_location
            .write()
            .expect("marker registry poisoned")
            .entry(key.location_key())
            .or_default()
            .push(id);
        self.live
            .write()
            .expect("marker registry poisoned")
            .insert(id, handle);
        self.dirty.store(true, Ordering::Release);
        debug!("registered marker {} at {}", id, key);
    }

    /// Removes and returns every persisted identity at `key`, pairing each
    /// with its live handle and dropping both table entries. Idempotent: a
    /// second call returns empty. The caller is responsible for despawning
    /// the returned markers; a failed despawn must not re-insert them.
    pub fn take_all(&self, key: &CellKey) -> Vec<TakenMarker> {
        let removed = self
            .by_location
            .write()
            .expect("marker registry poisoned")
            .remove(&key.location_key())
            .unwrap_or_default();
        if removed.is_empty() {
            return Vec::new();
        }
        let taken = {
            let mut live = self.live.write().expect("marker registry poisoned");
            removed
                .into_iter()
                .map(|id| TakenMarker {
                    id,
                    live: live.remove(&id),
                })
                .collect::<Vec<_>>()
        };
        self.dirty.store(true, Ordering::Release);
        debug!("removed {} markers at {}", taken.len(), key);
        taken
    }

    pub fn has_markers(&self, key: &CellKey) -> bool {
        self.by_location
            .read()
            .expect("marker registry poisoned")
            .contains_key(&key.location_key())
    }

    /// Persisted identities at `key` in display order.
    pub fn ids_at(&self, key: &CellKey) -> Vec<MarkerId> {
        self.by_location
            .read()
            .expect("marker registry poisoned")
            .get(&key.location_key())
            .cloned()
            .unwrap_or_default()
    }

    /// Fast-path lookup; misses after a restart, when the host's durable
    /// lookup takes over.
    pub fn resolve_live(&self, id: MarkerId) -> Option<MarkerHandle> {
        self.live
            .read()
            .expect("marker registry poisoned")
            .get(&id)
            .copied()
    }

    /// Number of cells that currently have markers.
    pub fn location_count(&self) -> usize {
        self.by_location
            .read()
            .expect("marker registry poisoned")
            .len()
    }

    /// Sorted `(location key, ids)` pairs for the durable store.
    pub fn snapshot(&self) -> Vec<(String, Vec<MarkerId>)> {
        let map = self.by_location.read().expect("marker registry poisoned");
        let mut out: Vec<(String, Vec<MarkerId>)> = map
            .iter()
            .map(|(location, ids)| (location.clone(), ids.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Bulk insert at load time; does not touch the dirty flag and leaves
    /// the live table empty (handles from the previous process are gone).
    pub fn restore(&self, associations: Vec<(CellKey, Vec<MarkerId>)>) {
        let mut map = self.by_location.write().expect("marker registry poisoned");
        for (key, ids) in associations {
            map.insert(key.location_key(), ids);
        }
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn rearm_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

/// Placement for one line of a marker stack: the cell center nudged toward
/// the viewer on the dominant horizontal axis (ties go to Z), at the line's
/// height within a stack centered on `anchor_y`.
pub fn line_placement(
    key: &CellKey,
    anchor_y: f64,
    viewer_x: f64,
    viewer_z: f64,
    line_index: usize,
    line_count: usize,
    line_spacing: f64,
) -> MarkerPlacement {
    let center_x = key.pos.x as f64 + 0.5;
    let center_z = key.pos.z as f64 + 0.5;
    let (offset_x, offset_z) = facing_offset(viewer_x - center_x, viewer_z - center_z);
    MarkerPlacement {
        world: key.world.clone(),
        x: center_x + offset_x,
        y: anchor_y + line_y_offset(line_index, line_count, line_spacing),
        z: center_z + offset_z,
    }
}

/// Horizontal nudge toward the viewer: whichever axis has the larger
/// absolute delta wins; on a tie the Z axis does.
pub fn facing_offset(delta_x: f64, delta_z: f64) -> (f64, f64) {
    if delta_x.abs() > delta_z.abs() {
        (if delta_x > 0.0 { FACING_OFFSET } else { -FACING_OFFSET }, 0.0)
    } else {
        (0.0, if delta_z > 0.0 { FACING_OFFSET } else { -FACING_OFFSET })
    }
}

/// Vertical offset of line `index` in a stack of `count` lines, centered on
/// the anchor: `((count-1-index) - (count-1)/2) * spacing`. One line sits at
/// 0; three lines land at `+spacing, 0, -spacing` in creation order.
pub fn line_y_offset(index: usize, count: usize, spacing: f64) -> f64 {
    let last = count.saturating_sub(1) as f64;
    ((last - index as f64) - last / 2.0) * spacing
}

/// Placement for a lock marker: in front of the sign at `sign`, nudged away
/// from the container it locks so the text floats on the player-facing side.
pub fn lock_marker_placement(world: &str, sign: BlockPos, container: BlockPos) -> MarkerPlacement {
    let dx = container.x - sign.x;
    let dz = container.z - sign.z;
    let offset_x = if dx != 0 {
        -(dx.signum() as f64) * LOCK_MARKER_OFFSET
    } else {
        0.0
    };
    let offset_z = if dz != 0 {
        -(dz.signum() as f64) * LOCK_MARKER_OFFSET
    } else {
        0.0
    };
    MarkerPlacement {
        world: world.to_string(),
        x: sign.x as f64 + 0.5 + offset_x,
        y: sign.y as f64,
        z: sign.z as f64 + 0.5 + offset_z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(n: u128) -> MarkerId {
        MarkerId(Uuid::from_u128(n))
    }

    fn key() -> CellKey {
        CellKey::new("Alpha", 0, 64, 0)
    }

    #[test]
    fn record_keeps_insertion_order() {
        let registry = MarkerRegistry::new();
        registry.record(&key(), id(1), MarkerHandle(100));
        registry.record(&key(), id(2), MarkerHandle(101));

        assert_eq!(registry.ids_at(&key()), vec![id(1), id(2)]);
        assert!(registry.has_markers(&key()));
    }

    #[test]
    fn take_all_is_idempotent() {
        let registry = MarkerRegistry::new();
        registry.record(&key(), id(1), MarkerHandle(100));
        registry.record(&key(), id(2), MarkerHandle(101));

        let first = registry.take_all(&key());
        assert_eq!(
            first,
            vec![
                TakenMarker {
                    id: id(1),
                    live: Some(MarkerHandle(100)),
                },
                TakenMarker {
                    id: id(2),
                    live: Some(MarkerHandle(101)),
                },
            ]
        );
        assert!(!registry.has_markers(&key()));
        assert_eq!(registry.resolve_live(id(1)), None);

        let second = registry.take_all(&key());
        assert!(second.is_empty());
    }

    #[test]
    fn take_all_after_restore_has_no_live_handles() {
        let registry = MarkerRegistry::new();
        registry.restore(vec![(key(), vec![id(1)])]);

        let taken = registry.take_all(&key());
        assert_eq!(taken, vec![TakenMarker { id: id(1), live: None }]);
    }

    #[test]
    fn take_all_on_empty_does_not_mark_dirty() {
        let registry = MarkerRegistry::new();
        assert!(registry.take_all(&key()).is_empty());
        assert!(!registry.is_dirty());
    }

    #[test]
    fn restore_leaves_live_table_empty() {
        let registry = MarkerRegistry::new();
        registry.restore(vec![(key(), vec![id(1)])]);

        assert!(registry.has_markers(&key()));
        assert_eq!(registry.resolve_live(id(1)), None);
        assert!(!registry.is_dirty());
    }

    #[test]
    fn single_line_sits_on_anchor() {
        assert_eq!(line_y_offset(0, 1, 0.25), 0.0);
    }

    #[test]
    fn three_line_stack_is_centered() {
        let spacing = 0.25;
        let offsets: Vec<f64> = (0..3).map(|i| line_y_offset(i, 3, spacing)).collect();
        assert_eq!(offsets, vec![spacing, 0.0, -spacing]);
    }

    #[test]
    fn two_line_stack_straddles_anchor() {
        let offsets: Vec<f64> = (0..2).map(|i| line_y_offset(i, 2, 0.25)).collect();
        assert_eq!(offsets, vec![0.125, -0.125]);
    }

    #[test]
    fn facing_offset_prefers_dominant_axis() {
        assert_eq!(facing_offset(2.0, 0.5), (FACING_OFFSET, 0.0));
        assert_eq!(facing_offset(-2.0, 0.5), (-FACING_OFFSET, 0.0));
        assert_eq!(facing_offset(0.5, -2.0), (0.0, -FACING_OFFSET));
        // Tie breaks toward Z.
        assert_eq!(facing_offset(1.0, 1.0), (0.0, FACING_OFFSET));
    }

    #[test]
    fn lock_marker_sits_opposite_the_container() {
        // Container to the east of the sign: marker goes west of the sign.
        let placement =
            lock_marker_placement("Alpha", BlockPos::new(0, 64, 0), BlockPos::new(1, 64, 0));
        assert_eq!(placement.x, 0.5 - LOCK_MARKER_OFFSET);
        assert_eq!(placement.z, 0.5);
        assert_eq!(placement.y, 64.0);

        // Container directly above: no horizontal nudge.
        let above =
            lock_marker_placement("Alpha", BlockPos::new(0, 64, 0), BlockPos::new(0, 65, 0));
        assert_eq!((above.x, above.z), (0.5, 0.5));
    }

    #[test]
    fn line_placement_offsets_from_cell_center() {
        let placement = line_placement(&key(), 64.0, 5.0, 0.5, 0, 1, 0.25);
        assert_eq!(placement.world, "Alpha");
        assert_eq!(placement.x, 0.5 + FACING_OFFSET);
        assert_eq!(placement.y, 64.0);
        assert_eq!(placement.z, 0.5);
    }
}
