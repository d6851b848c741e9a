use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer block coordinate within one world.
///
/// Ordering is lexicographic (x, then y, then z) so position sets serialize
/// deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Parses the `x,y,z` form produced by `Display`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut coords = text.split(',');
        let x = coords.next()?.trim().parse().ok()?;
        let y = coords.next()?.trim().parse().ok()?;
        let z = coords.next()?.trim().parse().ok()?;
        if coords.next().is_some() {
            return None;
        }
        Some(Self { x, y, z })
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// A block position qualified by its world.
///
/// This is the key type for both the lock index and the marker registry. The
/// canonical string form is `world:x:y:z`; `parse_location_key` is its exact
/// inverse, splitting from the right so world identifiers containing `:`
/// survive the round trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub world: String,
    pub pos: BlockPos,
}

impl CellKey {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            pos: BlockPos::new(x, y, z),
        }
    }

    pub fn from_pos(world: impl Into<String>, pos: BlockPos) -> Self {
        Self {
            world: world.into(),
            pos,
        }
    }

    pub fn with_pos(&self, pos: BlockPos) -> Self {
        Self {
            world: self.world.clone(),
            pos,
        }
    }

    pub fn location_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.world, self.pos.x, self.pos.y, self.pos.z
        )
    }

    pub fn parse_location_key(text: &str) -> Option<Self> {
        let (rest, z) = split_coord(text)?;
        let (rest, y) = split_coord(rest)?;
        let (world, x) = split_coord(rest)?;
        if world.is_empty() {
            return None;
        }
        Some(Self::new(world, x, y, z))
    }
}

fn split_coord(text: &str) -> Option<(&str, i32)> {
    let (rest, coord) = text.rsplit_once(':')?;
    Some((rest, coord.parse().ok()?))
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location_key())
    }
}

/// Facing index read from block state; merge eligibility compares it for
/// exact equality only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_pos_orders_lexicographically() {
        let mut positions = vec![
            BlockPos::new(1, 0, 5),
            BlockPos::new(0, 9, 9),
            BlockPos::new(1, 0, 4),
            BlockPos::new(0, 9, 8),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                BlockPos::new(0, 9, 8),
                BlockPos::new(0, 9, 9),
                BlockPos::new(1, 0, 4),
                BlockPos::new(1, 0, 5),
            ]
        );
    }

    #[test]
    fn block_pos_parse_round_trip() {
        let pos = BlockPos::new(-3, 64, 1200);
        assert_eq!(BlockPos::parse(&pos.to_string()), Some(pos));
        assert_eq!(BlockPos::parse("1,2"), None);
        assert_eq!(BlockPos::parse("1,2,3,4"), None);
        assert_eq!(BlockPos::parse("a,b,c"), None);
    }

    #[test]
    fn location_key_round_trip() {
        let key = CellKey::new("Alpha", 10, 5, 3);
        assert_eq!(key.location_key(), "Alpha:10:5:3");
        assert_eq!(CellKey::parse_location_key(&key.location_key()), Some(key));
    }

    #[test]
    fn location_key_world_with_colons() {
        let key = CellKey::new("hub:east:overworld", -7, 0, 12);
        assert_eq!(CellKey::parse_location_key(&key.location_key()), Some(key));
    }

    #[test]
    fn location_key_rejects_malformed() {
        assert_eq!(CellKey::parse_location_key(""), None);
        assert_eq!(CellKey::parse_location_key("world:1:2"), None);
        assert_eq!(CellKey::parse_location_key(":1:2:3"), None);
        assert_eq!(CellKey::parse_location_key("world:1:2:z"), None);
    }
}
