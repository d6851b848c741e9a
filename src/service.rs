use crate::config::LockConfig;
use crate::host::{BlockQuery, MarkerId, MarkerWorld};
use crate::lock_index::{LockIndex, LockedResource};
use crate::markers::{self, MarkerRegistry, TakenMarker};
use crate::resolver;
use crate::spatial::{BlockPos, CellKey};
use crate::store::DurableStore;
use crate::world_exec::WorldContext;
use log::{info, warn};
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Wall-sign sweep probes the four horizontal neighbors of a broken cell.
const SWEEP_OFFSETS: [[i32; 3]; 4] = [[1, 0, 0], [-1, 0, 0], [0, 0, 1], [0, 0, -1]];

/// Answer to "may this player open or break this container cell".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    /// Denied; carries the owner's display name for the host's message.
    Denied { owner_name: String },
}

#[derive(Clone, Debug)]
pub enum LockOutcome {
    Locked(Arc<LockedResource>),
    /// Some cell of the unit is already locked; nothing changed.
    AlreadyLocked,
    EmptyUnit,
}

#[derive(Clone, Debug)]
pub enum SignBreakOutcome {
    /// The sign guarded nothing locked; its markers were cleared.
    NoLock,
    /// The owner (or a bypasser) broke the sign: the unit is unlocked and
    /// every associated marker cleared.
    Unlocked(Arc<LockedResource>),
    /// Someone else's lock; the break should be cancelled.
    Denied { owner_name: String },
}

/// What placing a sign next to this cell should offer.
#[derive(Clone, Debug)]
pub enum SignPlacement {
    NoContainer,
    /// An unlocked unit is adjacent; the host may offer to lock it.
    LockOffer { unit: Vec<BlockPos> },
    AlreadyLocked(Arc<LockedResource>),
}

struct Autosave {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// The lock core: spatial index, marker registry, durable store, and the
/// autosave timer, behind the operations the host's event and UI layers
/// call. Queries are safe from any thread; anything touching live entities
/// goes through the supplied `WorldContext`.
pub struct LockService {
    config: LockConfig,
    index: Arc<LockIndex>,
    registry: Arc<MarkerRegistry>,
    store: Arc<DurableStore>,
    autosave: Mutex<Option<Autosave>>,
}

impl LockService {
    /// Opens the data directory, loads both stores (skipping unreadable
    /// records), and starts the autosave timer.
    pub fn open(config: LockConfig) -> io::Result<Self> {
        let store = Arc::new(DurableStore::open(&config.data_dir)?);

        let index = Arc::new(LockIndex::new());
        index.restore(store.load_locks());

        let registry = Arc::new(MarkerRegistry::new());
        registry.restore(store.load_markers());

        info!(
            "lock service ready: {} locked units, {} marker cells",
            index.count(),
            registry.location_count()
        );

        let autosave = spawn_autosave(
            config.autosave_interval(),
            index.clone(),
            registry.clone(),
            store.clone(),
        );

        Ok(Self {
            config,
            index,
            registry,
            store,
            autosave: Mutex::new(Some(autosave)),
        })
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    // Side-effect-free queries for the host's UI and command layers.

    pub fn is_locked(&self, key: &CellKey) -> bool {
        self.index.is_locked(key)
    }

    pub fn get_lock(&self, key: &CellKey) -> Option<Arc<LockedResource>> {
        self.index.get(key)
    }

    pub fn list_by_owner(&self, owner: Uuid) -> Vec<Arc<LockedResource>> {
        self.index.list_by_owner(owner)
    }

    pub fn count(&self) -> usize {
        self.index.count()
    }

    pub fn has_markers(&self, key: &CellKey) -> bool {
        self.registry.has_markers(key)
    }

    pub fn marker_ids(&self, key: &CellKey) -> Vec<MarkerId> {
        self.registry.ids_at(key)
    }

    /// May `player` open or break the container cell at `key`? Owner and
    /// bypass always may; an unlocked cell always may.
    pub fn check_access(&self, key: &CellKey, player: Uuid, has_bypass: bool) -> AccessDecision {
        match self.index.get(key) {
            None => AccessDecision::Allowed,
            Some(record) if record.is_owned_by(player) || has_bypass => AccessDecision::Allowed,
            Some(record) => AccessDecision::Denied {
                owner_name: record.owner_name.clone(),
            },
        }
    }

    /// Classifies a sign placement next to `sign_key`: is there a container
    /// to offer locking, and is it already locked?
    pub fn survey_sign_placement(
        &self,
        query: &dyn BlockQuery,
        sign_key: &CellKey,
    ) -> SignPlacement {
        let unit = resolver::find_adjacent_container(query, sign_key);
        if unit.is_empty() {
            return SignPlacement::NoContainer;
        }
        for pos in &unit {
            if let Some(record) = self.index.get(&sign_key.with_pos(*pos)) {
                return SignPlacement::AlreadyLocked(record);
            }
        }
        SignPlacement::LockOffer { unit }
    }

    /// Locks a resolved unit for `owner` and spawns the lock marker in front
    /// of the sign at `sign_pos`. The caller resolves the unit first (see
    /// `resolver::resolve_unit`); if any cell got locked in the meantime the
    /// call is a no-op reporting `AlreadyLocked`.
    pub fn lock_unit(
        &self,
        ctx: &WorldContext,
        owner_id: Uuid,
        owner_name: &str,
        world_id: &str,
        unit: Vec<BlockPos>,
        sign_pos: BlockPos,
    ) -> LockOutcome {
        if unit.is_empty() {
            return LockOutcome::EmptyUnit;
        }
        for pos in &unit {
            if self.index.is_locked(&CellKey::from_pos(world_id, *pos)) {
                return LockOutcome::AlreadyLocked;
            }
        }

        let record = self
            .index
            .lock(LockedResource::new(owner_id, owner_name, world_id, unit));

        let placement =
            markers::lock_marker_placement(world_id, sign_pos, record.primary_position());
        let text = format!("{}'s chest", owner_name);
        let primary = CellKey::from_pos(world_id, record.primary_position());
        let registry = self.registry.clone();
        let index = self.index.clone();
        ctx.submit(move |world| match world.spawn_marker(&placement, &text) {
            Some(spawned) => {
                registry.record(&primary, spawned.id, spawned.handle);
                index.set_marker(&primary, Some(spawned.id));
            }
            None => warn!("host failed to spawn lock marker at {}", primary),
        });

        LockOutcome::Locked(record)
    }

    /// Unlocks the unit owning `key`, clearing every marker attached to any
    /// of its cells. No-op returning `None` when the position is not locked.
    pub fn unlock_at(
        &self,
        ctx: &WorldContext,
        key: &CellKey,
    ) -> Option<Arc<LockedResource>> {
        let record = self.index.unlock(key)?;
        for unit_key in record.keys() {
            self.clear_markers(ctx, &unit_key);
        }
        Some(record)
    }

    /// Handles a sign being broken: unlocks the guarded unit when the owner
    /// (or a bypasser) did it, denies otherwise, and clears the sign's own
    /// markers whenever the break proceeds.
    pub fn handle_sign_break(
        &self,
        query: &dyn BlockQuery,
        ctx: &WorldContext,
        sign_key: &CellKey,
        player: Uuid,
        has_bypass: bool,
    ) -> SignBreakOutcome {
        let unit = resolver::find_adjacent_container(query, sign_key);
        let locked = unit
            .iter()
            .find_map(|pos| self.index.get(&sign_key.with_pos(*pos)));

        match locked {
            None => {
                self.clear_markers(ctx, sign_key);
                SignBreakOutcome::NoLock
            }
            Some(record) if record.is_owned_by(player) || has_bypass => {
                self.clear_markers(ctx, sign_key);
                let primary = CellKey::from_pos(record.world.clone(), record.primary_position());
                self.unlock_at(ctx, &primary);
                SignBreakOutcome::Unlocked(record)
            }
            Some(record) => SignBreakOutcome::Denied {
                owner_name: record.owner_name.clone(),
            },
        }
    }

    /// Replaces the marker stack at `key` with `lines`. Lines are trimmed
    /// and truncated to the configured length; trailing empty lines are
    /// dropped (interior empties keep their slot in the stack); all-empty
    /// input falls back to a single `"<owner>'s sign"` line. The old stack
    /// is despawned and the new one spawned in a single world task.
    pub fn place_marker_lines(
        &self,
        ctx: &WorldContext,
        key: &CellKey,
        anchor_y: f64,
        viewer_x: f64,
        viewer_z: f64,
        lines: &[String],
        owner_name: &str,
    ) {
        let texts = prepare_lines(
            lines,
            owner_name,
            self.config.max_line_length,
            self.config.max_lines,
        );
        let placements: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(line_index, text)| {
                (
                    markers::line_placement(
                        key,
                        anchor_y,
                        viewer_x,
                        viewer_z,
                        line_index,
                        texts.len(),
                        self.config.line_spacing,
                    ),
                    text.clone(),
                )
            })
            .collect();

        let registry = self.registry.clone();
        let key = key.clone();
        ctx.submit(move |world| {
            let taken = registry.take_all(&key);
            despawn_taken(world, &taken);
            for (placement, text) in placements {
                match world.spawn_marker(&placement, &text) {
                    Some(spawned) => registry.record(&key, spawned.id, spawned.handle),
                    None => warn!("host failed to spawn marker line at {}", key),
                }
            }
        });
    }

    /// Drops every persisted marker at `key` and schedules their despawn.
    /// Returns the identities that were on record. Idempotent: the persisted
    /// entries are gone after the first call even if a despawn fails.
    pub fn clear_markers(&self, ctx: &WorldContext, key: &CellKey) -> Vec<MarkerId> {
        let taken = self.registry.take_all(key);
        if taken.is_empty() {
            return Vec::new();
        }
        let ids: Vec<MarkerId> = taken.iter().map(|marker| marker.id).collect();
        ctx.submit(move |world| despawn_taken(world, &taken));
        ids
    }

    /// After a block break, re-checks the horizontal neighbors that carry
    /// markers: wall signs can pop off when their support goes. The check
    /// runs on the world thread after physics settles; markers of cells that
    /// are no longer signs are cleared.
    pub fn sweep_detached_markers(
        &self,
        query: Arc<dyn BlockQuery + Send + Sync>,
        ctx: &WorldContext,
        broken: &CellKey,
    ) {
        for [dx, dy, dz] in SWEEP_OFFSETS {
            let neighbor = broken.with_pos(broken.pos.offset(dx, dy, dz));
            if !self.registry.has_markers(&neighbor) {
                continue;
            }
            let query = query.clone();
            let registry = self.registry.clone();
            ctx.submit(move |world| {
                if query.is_sign_cell(&neighbor) {
                    return;
                }
                let taken = registry.take_all(&neighbor);
                if taken.is_empty() {
                    return;
                }
                info!(
                    "clearing {} markers from detached sign at {}",
                    taken.len(),
                    neighbor
                );
                despawn_taken(world, &taken);
            });
        }
    }

    /// Forces a flush of both stores now, dirty or not.
    pub fn flush_now(&self) -> io::Result<()> {
        self.store.flush(&self.index, &self.registry, true)
    }

    /// Stops the autosave timer (bounded: the timer thread wakes on the stop
    /// signal) and performs one final forced flush so an orderly shutdown
    /// never loses data. Idempotent.
    pub fn shutdown(&self) {
        let autosave = self.autosave.lock().expect("autosave handle poisoned").take();
        if let Some(autosave) = autosave {
            let _ = autosave.stop.send(());
            if autosave.thread.join().is_err() {
                warn!("autosave thread panicked during shutdown");
            }
            if self.flush_now().is_ok() {
                info!("final flush complete");
            }
        }
    }
}

impl Drop for LockService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_autosave(
    interval: Duration,
    index: Arc<LockIndex>,
    registry: Arc<MarkerRegistry>,
    store: Arc<DurableStore>,
) -> Autosave {
    let (stop, stop_rx) = mpsc::channel::<()>();
    let thread = thread::Builder::new()
        .name("neolocks-autosave".to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    // Flush errors re-arm the dirty flags; retried next tick.
                    let _ = store.flush(&index, &registry, false);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .expect("failed to spawn autosave thread");
    Autosave { stop, thread }
}

/// Despawns taken markers: live handle first, the host's durable lookup as
/// the fallback. Stale identities are warnings, never errors.
fn despawn_taken(world: &mut dyn MarkerWorld, taken: &[TakenMarker]) {
    for marker in taken {
        let handle = marker.live.or_else(|| world.resolve_marker(marker.id));
        match handle {
            Some(handle) => {
                if !world.despawn_marker(handle) {
                    warn!("marker {} was already gone from the world", marker.id);
                }
            }
            None => warn!(
                "marker {} no longer resolves, treating as already removed",
                marker.id
            ),
        }
    }
}

fn prepare_lines(
    lines: &[String],
    owner_name: &str,
    max_line_length: usize,
    max_lines: usize,
) -> Vec<String> {
    let mut prepared: Vec<String> = lines
        .iter()
        .take(max_lines)
        .map(|line| line.trim().chars().take(max_line_length).collect())
        .collect();
    while prepared.last().is_some_and(|line| line.is_empty()) {
        prepared.pop();
    }
    if prepared.is_empty() {
        prepared.push(format!("{}'s sign", owner_name));
    }
    prepared
}
