use crate::host::MarkerId;
use crate::spatial::{BlockPos, CellKey};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// One protected container unit: a single cell, or two merged cells.
///
/// The position set is fixed at creation; re-locking with a different set
/// means unlock followed by lock. Records are shared immutably between every
/// index entry they occupy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockedResource {
    pub owner_id: Uuid,
    pub owner_name: String,
    pub world: String,
    positions: Vec<BlockPos>,
    pub marker_id: Option<MarkerId>,
}

impl LockedResource {
    pub fn new(
        owner_id: Uuid,
        owner_name: impl Into<String>,
        world: impl Into<String>,
        mut positions: Vec<BlockPos>,
    ) -> Self {
        debug_assert!(!positions.is_empty(), "lock unit needs at least one cell");
        positions.sort_unstable();
        positions.dedup();
        Self {
            owner_id,
            owner_name: owner_name.into(),
            world: world.into(),
            positions,
            marker_id: None,
        }
    }

    pub fn with_marker(mut self, marker_id: Option<MarkerId>) -> Self {
        self.marker_id = marker_id;
        self
    }

    /// Sorted cells of the unit.
    pub fn positions(&self) -> &[BlockPos] {
        &self.positions
    }

    pub fn primary_position(&self) -> BlockPos {
        self.positions[0]
    }

    pub fn is_owned_by(&self, player: Uuid) -> bool {
        self.owner_id == player
    }

    pub fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.positions
            .iter()
            .map(|&pos| CellKey::from_pos(self.world.clone(), pos))
    }

    /// Logical identity of the unit: world plus every position, sorted.
    /// Two index entries pointing at the same unit share this key.
    pub fn location_key(&self) -> String {
        let positions = self
            .positions
            .iter()
            .map(|pos| pos.to_string())
            .collect::<Vec<_>>()
            .join(";");
        format!("{}:{}", self.world, positions)
    }
}

/// Position-indexed map of locked units.
///
/// Every position of a unit maps to the same shared record, so membership
/// tests are O(1) from any cell of a double container. Safe to query and
/// mutate from any thread; mutations that race on the same position resolve
/// last-writer-wins (callers gate with `is_locked` first).
#[derive(Debug, Default)]
pub struct LockIndex {
    entries: RwLock<HashMap<CellKey, Arc<LockedResource>>>,
    dirty: AtomicBool,
}

impl LockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &CellKey) -> bool {
        self.entries.read().expect("lock index poisoned").contains_key(key)
    }

    pub fn get(&self, key: &CellKey) -> Option<Arc<LockedResource>> {
        self.entries.read().expect("lock index poisoned").get(key).cloned()
    }

    /// Inserts every position of the unit. The caller must have verified that
    /// none of the positions is currently locked; the index itself does not
    /// guard against a racing caller.
    pub fn lock(&self, resource: LockedResource) -> Arc<LockedResource> {
        let record = Arc::new(resource);
        {
            let mut entries = self.entries.write().expect("lock index poisoned");
            for key in record.keys() {
                entries.insert(key, record.clone());
            }
        }
        self.dirty.store(true, Ordering::Release);
        info!(
            "locked {} for {}",
            record.location_key(),
            record.owner_name
        );
        record
    }

    /// Removes the whole unit owning `key` in one step; no-op when the
    /// position is not locked. Returns the removed record.
    pub fn unlock(&self, key: &CellKey) -> Option<Arc<LockedResource>> {
        let removed = {
            let mut entries = self.entries.write().expect("lock index poisoned");
            let record = entries.get(key).cloned()?;
            for unit_key in record.keys() {
                entries.remove(&unit_key);
            }
            record
        };
        self.dirty.store(true, Ordering::Release);
        info!("unlocked {}", removed.location_key());
        Some(removed)
    }

    /// Replaces the unit's marker reference, keeping every index entry
    /// pointing at the updated record.
    pub fn set_marker(&self, key: &CellKey, marker_id: Option<MarkerId>) -> bool {
        {
            let mut entries = self.entries.write().expect("lock index poisoned");
            let Some(record) = entries.get(key).cloned() else {
                return false;
            };
            let updated = Arc::new(record.as_ref().clone().with_marker(marker_id));
            for unit_key in updated.keys() {
                entries.insert(unit_key, updated.clone());
            }
        }
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Units owned by `owner`, each logical unit reported once.
    pub fn list_by_owner(&self, owner: Uuid) -> Vec<Arc<LockedResource>> {
        let entries = self.entries.read().expect("lock index poisoned");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in entries.values() {
            if record.is_owned_by(owner) && seen.insert(record.location_key()) {
                out.push(record.clone());
            }
        }
        out.sort_by_key(|record| record.location_key());
        out
    }

    /// Number of distinct locked units (not positions).
    pub fn count(&self) -> usize {
        let entries = self.entries.read().expect("lock index poisoned");
        entries
            .values()
            .map(|record| record.location_key())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Every distinct unit, sorted by location key for deterministic output.
    pub fn snapshot(&self) -> Vec<Arc<LockedResource>> {
        let entries = self.entries.read().expect("lock index poisoned");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in entries.values() {
            if seen.insert(record.location_key()) {
                out.push(record.clone());
            }
        }
        out.sort_by_key(|record| record.location_key());
        out
    }

    /// Bulk insert at load time; does not touch the dirty flag.
    pub fn restore(&self, records: Vec<LockedResource>) {
        let mut entries = self.entries.write().expect("lock index poisoned");
        for resource in records {
            let record = Arc::new(resource);
            for key in record.keys() {
                entries.insert(key, record.clone());
            }
        }
    }

    /// Swaps the dirty flag off, returning whether a flush is needed.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Re-arms the dirty flag after a failed flush so the next tick retries.
    pub fn rearm_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Uuid {
        Uuid::from_u128(0xA11CE)
    }

    fn single(world: &str, x: i32, y: i32, z: i32) -> LockedResource {
        LockedResource::new(owner(), "Alice", world, vec![BlockPos::new(x, y, z)])
    }

    #[test]
    fn lock_then_query_single_cell() {
        let index = LockIndex::new();
        index.lock(single("Alpha", 10, 5, 3));

        assert!(index.is_locked(&CellKey::new("Alpha", 10, 5, 3)));
        assert!(!index.is_locked(&CellKey::new("Alpha", 10, 6, 3)));
        assert!(!index.is_locked(&CellKey::new("Beta", 10, 5, 3)));
        assert_eq!(index.count(), 1);

        index.unlock(&CellKey::new("Alpha", 10, 5, 3));
        assert!(!index.is_locked(&CellKey::new("Alpha", 10, 5, 3)));
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn double_unit_shares_one_record() {
        let index = LockIndex::new();
        index.lock(LockedResource::new(
            owner(),
            "Alice",
            "Alpha",
            vec![BlockPos::new(10, 5, 3), BlockPos::new(11, 5, 3)],
        ));

        let left = index.get(&CellKey::new("Alpha", 10, 5, 3)).unwrap();
        let right = index.get(&CellKey::new("Alpha", 11, 5, 3)).unwrap();
        assert!(Arc::ptr_eq(&left, &right));
        assert_eq!(left.owner_name, "Alice");
        assert_eq!(index.count(), 1);
    }

    #[test]
    fn unlock_from_either_cell_removes_both() {
        let index = LockIndex::new();
        index.lock(LockedResource::new(
            owner(),
            "Alice",
            "Alpha",
            vec![BlockPos::new(10, 5, 3), BlockPos::new(11, 5, 3)],
        ));

        index.unlock(&CellKey::new("Alpha", 11, 5, 3));
        assert!(!index.is_locked(&CellKey::new("Alpha", 10, 5, 3)));
        assert!(!index.is_locked(&CellKey::new("Alpha", 11, 5, 3)));
    }

    #[test]
    fn unlock_unlocked_position_is_noop() {
        let index = LockIndex::new();
        assert!(index.unlock(&CellKey::new("Alpha", 0, 0, 0)).is_none());
        assert!(!index.is_dirty());
    }

    #[test]
    fn list_by_owner_dedupes_units() {
        let index = LockIndex::new();
        index.lock(LockedResource::new(
            owner(),
            "Alice",
            "Alpha",
            vec![BlockPos::new(0, 0, 0), BlockPos::new(1, 0, 0)],
        ));
        index.lock(single("Alpha", 5, 5, 5));
        index.lock(LockedResource::new(
            Uuid::from_u128(0xB0B),
            "Bob",
            "Alpha",
            vec![BlockPos::new(9, 9, 9)],
        ));

        let owned = index.list_by_owner(owner());
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|record| record.is_owned_by(owner())));
    }

    #[test]
    fn set_marker_updates_every_entry() {
        let index = LockIndex::new();
        index.lock(LockedResource::new(
            owner(),
            "Alice",
            "Alpha",
            vec![BlockPos::new(0, 0, 0), BlockPos::new(1, 0, 0)],
        ));
        let marker = MarkerId(Uuid::from_u128(7));

        assert!(index.set_marker(&CellKey::new("Alpha", 0, 0, 0), Some(marker)));
        let other = index.get(&CellKey::new("Alpha", 1, 0, 0)).unwrap();
        assert_eq!(other.marker_id, Some(marker));
    }

    #[test]
    fn dirty_flag_tracks_mutations() {
        let index = LockIndex::new();
        assert!(!index.take_dirty());

        index.lock(single("Alpha", 1, 2, 3));
        assert!(index.take_dirty());
        assert!(!index.take_dirty());

        index.rearm_dirty();
        assert!(index.is_dirty());
    }

    #[test]
    fn restore_does_not_mark_dirty() {
        let index = LockIndex::new();
        index.restore(vec![single("Alpha", 1, 2, 3)]);
        assert!(index.is_locked(&CellKey::new("Alpha", 1, 2, 3)));
        assert!(!index.is_dirty());
    }
}
