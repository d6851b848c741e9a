use crate::spatial::{CellKey, Orientation};
use uuid::Uuid;

/// Transient reference to a live marker entity. Assigned by the host at
/// spawn, valid only for the current process; revalidate before use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarkerHandle(pub u64);

/// Durable marker identity, persisted across restarts. The host can map it
/// back to a live handle with `MarkerWorld::resolve_marker`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub Uuid);

impl MarkerId {
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(MarkerId)
    }
}

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Both identities handed back by the host when a marker entity spawns.
#[derive(Clone, Copy, Debug)]
pub struct SpawnedMarker {
    pub handle: MarkerHandle,
    pub id: MarkerId,
}

/// Where a marker line should appear: the anchor cell center nudged toward
/// the viewer, at the line's height within the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerPlacement {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Read-only block state queries. The host guarantees these are safe to call
/// from any thread; an unloaded chunk answers `is_chunk_loaded` false and the
/// other queries may return nothing for it.
pub trait BlockQuery {
    fn is_container_cell(&self, key: &CellKey) -> bool;

    fn is_sign_cell(&self, key: &CellKey) -> bool;

    /// Facing of the block at `key`, if the block carries one and its chunk
    /// is loaded.
    fn orientation(&self, key: &CellKey) -> Option<Orientation>;

    fn is_chunk_loaded(&self, key: &CellKey) -> bool;
}

/// Live entity mutation. Implementations are only ever touched from the
/// world's processing thread (see `WorldContext`).
pub trait MarkerWorld: Send {
    /// Spawns a floating-text entity and returns both its identities, or
    /// `None` if the host could not create it.
    fn spawn_marker(&mut self, placement: &MarkerPlacement, text: &str) -> Option<SpawnedMarker>;

    /// Removes a live marker. Returns false if the handle no longer refers
    /// to a live entity.
    fn despawn_marker(&mut self, handle: MarkerHandle) -> bool;

    /// Looks a durable identity back up in the live world, e.g. after a
    /// restart discarded every handle.
    fn resolve_marker(&mut self, id: MarkerId) -> Option<MarkerHandle>;
}
