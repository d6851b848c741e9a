//! In-memory host implementations for tests and prototyping.

use crate::host::{BlockQuery, MarkerHandle, MarkerId, MarkerPlacement, MarkerWorld, SpawnedMarker};
use crate::spatial::{CellKey, Orientation};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// `BlockQuery` over an explicit grid of containers and signs. Mutators take
/// `&self` so a test can change the world while a service holds a shared
/// reference.
#[derive(Default)]
pub struct GridWorld {
    containers: RwLock<HashMap<CellKey, Orientation>>,
    signs: RwLock<HashSet<CellKey>>,
    unloaded: RwLock<HashSet<CellKey>>,
}

impl GridWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, key: CellKey, facing: u8) {
        self.containers
            .write()
            .unwrap()
            .insert(key, Orientation(facing));
    }

    pub fn add_sign(&self, key: CellKey) {
        self.signs.write().unwrap().insert(key);
    }

    pub fn remove_sign(&self, key: &CellKey) {
        self.signs.write().unwrap().remove(key);
    }

    pub fn mark_unloaded(&self, key: CellKey) {
        self.unloaded.write().unwrap().insert(key);
    }
}

impl BlockQuery for GridWorld {
    fn is_container_cell(&self, key: &CellKey) -> bool {
        self.containers.read().unwrap().contains_key(key)
    }

    fn is_sign_cell(&self, key: &CellKey) -> bool {
        self.signs.read().unwrap().contains(key)
    }

    fn orientation(&self, key: &CellKey) -> Option<Orientation> {
        self.containers.read().unwrap().get(key).copied()
    }

    fn is_chunk_loaded(&self, key: &CellKey) -> bool {
        !self.unloaded.read().unwrap().contains(key)
    }
}

/// One live marker entity in the fake world.
#[derive(Clone, Debug)]
pub struct SpawnedText {
    pub id: MarkerId,
    pub placement: MarkerPlacement,
    pub text: String,
}

/// Observable state of a `FakeMarkerWorld`, shared with the test that
/// spawned it.
#[derive(Default)]
pub struct MarkerWorldState {
    next_handle: u64,
    pub live: HashMap<MarkerHandle, SpawnedText>,
    by_id: HashMap<MarkerId, MarkerHandle>,
    pub despawned: Vec<MarkerId>,
    pub fail_spawns: bool,
}

impl MarkerWorldState {
    /// Live marker texts sorted by handle (spawn order).
    pub fn live_texts(&self) -> Vec<String> {
        let mut entries: Vec<(&MarkerHandle, &SpawnedText)> = self.live.iter().collect();
        entries.sort_by_key(|(handle, _)| handle.0);
        entries
            .into_iter()
            .map(|(_, spawned)| spawned.text.clone())
            .collect()
    }

    /// Removes a live entity out-of-band, as unrelated game logic might.
    pub fn destroy_externally(&mut self, id: MarkerId) {
        if let Some(handle) = self.by_id.remove(&id) {
            self.live.remove(&handle);
        }
    }
}

/// `MarkerWorld` backed by shared in-memory state. Handles are monotonic per
/// instance; identities are fresh UUIDs, so a second instance over the same
/// state models a process restart with stale handles discarded.
pub struct FakeMarkerWorld {
    state: Arc<Mutex<MarkerWorldState>>,
}

impl FakeMarkerWorld {
    pub fn new() -> (Self, Arc<Mutex<MarkerWorldState>>) {
        let state = Arc::new(Mutex::new(MarkerWorldState::default()));
        (Self { state: state.clone() }, state)
    }

    pub fn with_state(state: Arc<Mutex<MarkerWorldState>>) -> Self {
        Self { state }
    }
}

impl MarkerWorld for FakeMarkerWorld {
    fn spawn_marker(&mut self, placement: &MarkerPlacement, text: &str) -> Option<SpawnedMarker> {
        let mut state = self.state.lock().unwrap();
        if state.fail_spawns {
            return None;
        }
        state.next_handle += 1;
        let handle = MarkerHandle(state.next_handle);
        let id = MarkerId(Uuid::new_v4());
        state.live.insert(
            handle,
            SpawnedText {
                id,
                placement: placement.clone(),
                text: text.to_string(),
            },
        );
        state.by_id.insert(id, handle);
        Some(SpawnedMarker { handle, id })
    }

    fn despawn_marker(&mut self, handle: MarkerHandle) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.live.remove(&handle) {
            Some(spawned) => {
                state.by_id.remove(&spawned.id);
                state.despawned.push(spawned.id);
                true
            }
            None => false,
        }
    }

    fn resolve_marker(&mut self, id: MarkerId) -> Option<MarkerHandle> {
        self.state.lock().unwrap().by_id.get(&id).copied()
    }
}
