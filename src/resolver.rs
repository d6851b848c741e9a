use crate::host::BlockQuery;
use crate::spatial::{BlockPos, CellKey};

/// Horizontal probe order for the merge partner. Fixed so resolution is
/// deterministic: first match wins.
const MERGE_NEIGHBOR_OFFSETS: [[i32; 3]; 4] = [
    [1, 0, 0],  // +X
    [-1, 0, 0], // -X
    [0, 0, 1],  // +Z
    [0, 0, -1], // -Z
];

/// Probe order when searching for a container next to a sign. Vertical
/// neighbors first, then the horizontal ring.
const ADJACENT_SEARCH_OFFSETS: [[i32; 3]; 6] = [
    [0, 1, 0],
    [0, -1, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 0, 1],
    [0, 0, -1],
];

/// Resolves the full set of cells forming one lockable unit from a seed cell.
///
/// Returns an empty vec when the seed is not a container (or its chunk is
/// unloaded). Otherwise returns the seed plus at most one horizontal partner:
/// a neighbor merges iff it is also a container and its stored orientation
/// exactly matches the seed's. Units never grow past two cells; chains are
/// not followed. Neighbors in unloaded chunks are skipped, never retried
/// within the same call.
pub fn resolve_unit(query: &dyn BlockQuery, seed: &CellKey) -> Vec<BlockPos> {
    if !query.is_chunk_loaded(seed) || !query.is_container_cell(seed) {
        return Vec::new();
    }

    let Some(seed_orientation) = query.orientation(seed) else {
        // No facing info on the seed: treat as a single-cell unit.
        return vec![seed.pos];
    };

    for [dx, dy, dz] in MERGE_NEIGHBOR_OFFSETS {
        let neighbor = seed.with_pos(seed.pos.offset(dx, dy, dz));
        if !query.is_chunk_loaded(&neighbor) {
            continue;
        }
        if !query.is_container_cell(&neighbor) {
            continue;
        }
        let Some(neighbor_orientation) = query.orientation(&neighbor) else {
            continue;
        };
        if neighbor_orientation == seed_orientation {
            return vec![seed.pos, neighbor.pos];
        }
    }

    vec![seed.pos]
}

/// Finds the container unit adjacent to `pos`, if any: probes the six axis
/// neighbors in a fixed order and resolves the first that seeds a unit.
pub fn find_adjacent_container(query: &dyn BlockQuery, pos: &CellKey) -> Vec<BlockPos> {
    for [dx, dy, dz] in ADJACENT_SEARCH_OFFSETS {
        let candidate = pos.with_pos(pos.pos.offset(dx, dy, dz));
        let unit = resolve_unit(query, &candidate);
        if !unit.is_empty() {
            return unit;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::GridWorld;
    use std::collections::HashSet;

    fn key(x: i32, y: i32, z: i32) -> CellKey {
        CellKey::new("w", x, y, z)
    }

    #[test]
    fn single_container_resolves_to_singleton() {
        let world = GridWorld::new();
        world.add_container(key(10, 5, 3), 0);
        assert_eq!(resolve_unit(&world, &key(10, 5, 3)), vec![BlockPos::new(10, 5, 3)]);
    }

    #[test]
    fn non_container_seed_resolves_to_empty() {
        let world = GridWorld::new();
        assert!(resolve_unit(&world, &key(0, 0, 0)).is_empty());
    }

    #[test]
    fn matching_orientation_merges_symmetrically() {
        let world = GridWorld::new();
        world.add_container(key(10, 5, 3), 2);
        world.add_container(key(11, 5, 3), 2);

        let from_left: HashSet<BlockPos> =
            resolve_unit(&world, &key(10, 5, 3)).into_iter().collect();
        let from_right: HashSet<BlockPos> =
            resolve_unit(&world, &key(11, 5, 3)).into_iter().collect();

        let expected: HashSet<BlockPos> =
            [BlockPos::new(10, 5, 3), BlockPos::new(11, 5, 3)].into();
        assert_eq!(from_left, expected);
        assert_eq!(from_right, expected);
    }

    #[test]
    fn mismatched_orientation_stays_single() {
        let world = GridWorld::new();
        world.add_container(key(10, 5, 3), 0);
        world.add_container(key(11, 5, 3), 1);
        assert_eq!(resolve_unit(&world, &key(10, 5, 3)), vec![BlockPos::new(10, 5, 3)]);
    }

    #[test]
    fn vertical_neighbors_never_merge() {
        let world = GridWorld::new();
        world.add_container(key(0, 0, 0), 0);
        world.add_container(key(0, 1, 0), 0);
        assert_eq!(resolve_unit(&world, &key(0, 0, 0)), vec![BlockPos::new(0, 0, 0)]);
    }

    #[test]
    fn first_match_wins_in_probe_order() {
        // Partners on both +X and +Z; +X is probed first.
        let world = GridWorld::new();
        world.add_container(key(0, 0, 0), 0);
        world.add_container(key(1, 0, 0), 0);
        world.add_container(key(0, 0, 1), 0);
        assert_eq!(
            resolve_unit(&world, &key(0, 0, 0)),
            vec![BlockPos::new(0, 0, 0), BlockPos::new(1, 0, 0)]
        );
    }

    #[test]
    fn unloaded_neighbor_degrades_to_no_merge() {
        let world = GridWorld::new();
        world.add_container(key(0, 0, 0), 0);
        world.add_container(key(1, 0, 0), 0);
        world.mark_unloaded(key(1, 0, 0));
        assert_eq!(resolve_unit(&world, &key(0, 0, 0)), vec![BlockPos::new(0, 0, 0)]);
    }

    #[test]
    fn adjacent_search_finds_unit_below() {
        let world = GridWorld::new();
        world.add_container(key(4, 9, 4), 3);
        world.add_container(key(5, 9, 4), 3);
        // Sign sits on top of the left half.
        let unit = find_adjacent_container(&world, &key(4, 10, 4));
        assert_eq!(unit.len(), 2);
        assert!(unit.contains(&BlockPos::new(4, 9, 4)));
    }

    #[test]
    fn adjacent_search_with_no_container_is_empty() {
        let world = GridWorld::new();
        assert!(find_adjacent_container(&world, &key(0, 0, 0)).is_empty());
    }
}
