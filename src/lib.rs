//! Container locking and floating-text markers for a voxel game server.
//!
//! The core is a spatial lock index (single and merged double containers), a
//! marker registry whose durable identities survive restarts, flat-file
//! persistence with a background autosave, and a thread-confinement gateway
//! that keeps live entity mutation on each world's single processing thread.
//! The host engine plugs in through the traits in [`host`].

pub mod config;
pub mod host;
pub mod lock_index;
pub mod markers;
pub mod resolver;
pub mod service;
pub mod spatial;
pub mod store;
pub mod testkit;
pub mod world_exec;

pub use config::LockConfig;
pub use host::{BlockQuery, MarkerHandle, MarkerId, MarkerPlacement, MarkerWorld, SpawnedMarker};
pub use lock_index::{LockIndex, LockedResource};
pub use markers::MarkerRegistry;
pub use resolver::{find_adjacent_container, resolve_unit};
pub use service::{AccessDecision, LockOutcome, LockService, SignBreakOutcome, SignPlacement};
pub use spatial::{BlockPos, CellKey, Orientation};
pub use store::DurableStore;
pub use world_exec::{WorldContext, WorldWorker};
