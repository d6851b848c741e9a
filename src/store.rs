use crate::host::MarkerId;
use crate::lock_index::{LockIndex, LockedResource};
use crate::markers::MarkerRegistry;
use crate::spatial::{BlockPos, CellKey};
use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const LOCKS_FILE: &str = "locked_chests.txt";
pub const MARKERS_FILE: &str = "sign_holograms.txt";

const LOCKS_HEADER: &[&str] = &[
    "# NeoLocks - locked containers",
    "# Format: ownerId|ownerName|worldId|markerId|positions",
    "# positions = x,y,z;x,y,z (semicolon-separated for double containers)",
    "# markerId = durable id of the lock marker entity (or empty if none)",
];

const MARKERS_HEADER: &[&str] = &[
    "# NeoLocks - marker associations",
    "# Format: worldId:x:y:z|markerId,markerId,...",
    "# ids are listed top line first",
];

#[derive(Debug, Error)]
pub enum ParseLineError {
    #[error("expected 4 or 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid owner id {0:?}")]
    OwnerId(String),
    #[error("invalid marker id {0:?}")]
    MarkerId(String),
    #[error("invalid position {0:?}")]
    Position(String),
    #[error("empty position list")]
    EmptyPositions,
    #[error("invalid location key {0:?}")]
    LocationKey(String),
    #[error("empty identity list")]
    EmptyIdentities,
}

/// The two on-disk lock-record schemas. Decoding tries the current
/// five-field form first and falls back to the legacy four-field form that
/// predates the marker column.
enum LockLineSchema<'a> {
    WithMarker {
        marker: &'a str,
        positions: &'a str,
    },
    Legacy {
        positions: &'a str,
    },
}

/// Decodes one lock record. `ownerId|ownerName|worldId|markerId|positions`,
/// or the legacy variant without the marker column.
pub fn parse_lock_line(line: &str) -> Result<LockedResource, ParseLineError> {
    let fields: Vec<&str> = line.split('|').collect();
    let schema = match fields.len() {
        5 => LockLineSchema::WithMarker {
            marker: fields[3],
            positions: fields[4],
        },
        4 => LockLineSchema::Legacy {
            positions: fields[3],
        },
        count => return Err(ParseLineError::FieldCount(count)),
    };

    let owner_id = Uuid::parse_str(fields[0])
        .map_err(|_| ParseLineError::OwnerId(fields[0].to_string()))?;
    let owner_name = fields[1];
    let world = fields[2];

    let (marker_id, positions_field) = match schema {
        LockLineSchema::WithMarker { marker, positions } => {
            let marker_id = match marker {
                "" | "null" => None,
                text => Some(
                    MarkerId::parse(text)
                        .ok_or_else(|| ParseLineError::MarkerId(text.to_string()))?,
                ),
            };
            (marker_id, positions)
        }
        LockLineSchema::Legacy { positions } => (None, positions),
    };

    let mut positions = Vec::new();
    for part in positions_field.split(';') {
        let pos = BlockPos::parse(part)
            .ok_or_else(|| ParseLineError::Position(part.to_string()))?;
        positions.push(pos);
    }
    if positions.is_empty() {
        return Err(ParseLineError::EmptyPositions);
    }

    Ok(LockedResource::new(owner_id, owner_name, world, positions).with_marker(marker_id))
}

/// Encodes one lock record in the current five-field schema; positions come
/// out sorted because `LockedResource` keeps them sorted.
pub fn format_lock_line(resource: &LockedResource) -> String {
    let positions = resource
        .positions()
        .iter()
        .map(|pos| pos.to_string())
        .collect::<Vec<_>>()
        .join(";");
    let marker = resource
        .marker_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    format!(
        "{}|{}|{}|{}|{}",
        resource.owner_id, resource.owner_name, resource.world, marker, positions
    )
}

/// Decodes one marker-association record: `worldId:x:y:z|id,id,...`.
pub fn parse_marker_line(line: &str) -> Result<(CellKey, Vec<MarkerId>), ParseLineError> {
    let (location, ids_field) = line
        .split_once('|')
        .ok_or(ParseLineError::FieldCount(1))?;
    let key = CellKey::parse_location_key(location)
        .ok_or_else(|| ParseLineError::LocationKey(location.to_string()))?;

    let mut ids = Vec::new();
    for part in ids_field.split(',') {
        let id = MarkerId::parse(part)
            .ok_or_else(|| ParseLineError::MarkerId(part.to_string()))?;
        ids.push(id);
    }
    if ids.is_empty() {
        return Err(ParseLineError::EmptyIdentities);
    }
    Ok((key, ids))
}

pub fn format_marker_line(location: &str, ids: &[MarkerId]) -> String {
    let ids = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}|{}", location, ids)
}

/// Flat-file persistence for the lock index and the marker registry.
///
/// Each store is one line-oriented text file, rewritten wholesale on flush.
/// Flushes are gated on the owning structure's dirty flag: a clean store is
/// a no-op, a failed write re-arms the flag so the next tick retries, and
/// `force` bypasses the gate for shutdown.
#[derive(Debug)]
pub struct DurableStore {
    locks_path: PathBuf,
    markers_path: PathBuf,
}

impl DurableStore {
    pub fn open(data_dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            locks_path: data_dir.join(LOCKS_FILE),
            markers_path: data_dir.join(MARKERS_FILE),
        })
    }

    /// Loads every parseable lock record. Malformed lines are logged and
    /// skipped; a missing file is an empty store.
    pub fn load_locks(&self) -> Vec<LockedResource> {
        let mut records = Vec::new();
        let (total, skipped) = read_records(&self.locks_path, |line| match parse_lock_line(line) {
            Ok(record) => {
                records.push(record);
                true
            }
            Err(err) => {
                warn!("skipping bad lock record {:?}: {}", line, err);
                false
            }
        });
        if skipped > 0 {
            warn!(
                "loaded {} of {} lock records from {}",
                records.len(),
                total,
                self.locks_path.display()
            );
        } else {
            info!("loaded {} lock records", records.len());
        }
        records
    }

    /// Loads every parseable marker association.
    pub fn load_markers(&self) -> Vec<(CellKey, Vec<MarkerId>)> {
        let mut associations = Vec::new();
        let (total, skipped) =
            read_records(&self.markers_path, |line| match parse_marker_line(line) {
                Ok(association) => {
                    associations.push(association);
                    true
                }
                Err(err) => {
                    warn!("skipping bad marker record {:?}: {}", line, err);
                    false
                }
            });
        if skipped > 0 {
            warn!(
                "loaded {} of {} marker records from {}",
                associations.len(),
                total,
                self.markers_path.display()
            );
        } else {
            info!("loaded {} marker associations", associations.len());
        }
        associations
    }

    /// Writes the lock file if the index is dirty (always when `force`).
    pub fn save_locks(&self, index: &LockIndex, force: bool) -> io::Result<()> {
        let was_dirty = index.take_dirty();
        if !was_dirty && !force {
            return Ok(());
        }
        let records = index.snapshot();
        let lines: Vec<String> = records.iter().map(|r| format_lock_line(r)).collect();
        match write_records(&self.locks_path, LOCKS_HEADER, &lines) {
            Ok(()) => {
                info!("saved {} lock records", lines.len());
                Ok(())
            }
            Err(err) => {
                index.rearm_dirty();
                error!("failed to save {}: {}", self.locks_path.display(), err);
                Err(err)
            }
        }
    }

    /// Writes the marker file if the registry is dirty (always when `force`).
    pub fn save_markers(&self, registry: &MarkerRegistry, force: bool) -> io::Result<()> {
        let was_dirty = registry.take_dirty();
        if !was_dirty && !force {
            return Ok(());
        }
        let lines: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|(location, ids)| format_marker_line(location, ids))
            .collect();
        match write_records(&self.markers_path, MARKERS_HEADER, &lines) {
            Ok(()) => {
                info!("saved {} marker associations", lines.len());
                Ok(())
            }
            Err(err) => {
                registry.rearm_dirty();
                error!("failed to save {}: {}", self.markers_path.display(), err);
                Err(err)
            }
        }
    }

    /// Flushes both files; the second flush still runs when the first fails.
    pub fn flush(&self, index: &LockIndex, registry: &MarkerRegistry, force: bool) -> io::Result<()> {
        let locks = self.save_locks(index, force);
        let markers = self.save_markers(registry, force);
        locks.and(markers)
    }

    pub fn locks_path(&self) -> &Path {
        &self.locks_path
    }

    pub fn markers_path(&self) -> &Path {
        &self.markers_path
    }
}

/// Feeds every non-comment, non-blank line to `accept`; returns
/// `(total, skipped)` record counts. A missing file yields `(0, 0)`.
fn read_records(path: &Path, mut accept: impl FnMut(&str) -> bool) -> (usize, usize) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return (0, 0),
        Err(err) => {
            error!("failed to read {}: {}", path.display(), err);
            return (0, 0);
        }
    };

    let mut total = 0usize;
    let mut skipped = 0usize;
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                error!("failed to read {}: {}", path.display(), err);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        total += 1;
        if !accept(line) {
            skipped += 1;
        }
    }
    (total, skipped)
}

fn write_records(path: &Path, header: &[&str], lines: &[String]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for comment in header {
        writeln!(writer, "{}", comment)?;
    }
    writeln!(writer)?;
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}
