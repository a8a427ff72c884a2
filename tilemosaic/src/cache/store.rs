//! Tile record storage backends.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::record::TileRecord;
use crate::error::RasterError;
use crate::source::{TileAddress, TileGrid};

/// On-disk layout version. Bump when [`TileRecord`] changes shape.
pub const STORE_FORMAT: u32 = 1;

const HEADER_FILE: &str = "store.header";
const RECORD_EXTENSION: &str = "tile";

/// Keyed persistence for tile records.
///
/// Implementations only need to be safe for concurrent calls; the
/// read-modify-write of a record is serialized by the tile cache.
pub trait TileStore: Send + Sync {
    fn load(&self, address: TileAddress) -> Result<Option<TileRecord>, RasterError>;

    fn save(&self, address: TileAddress, record: &TileRecord) -> Result<(), RasterError>;

    /// Drops every record.
    fn clear(&self) -> Result<(), RasterError>;
}

/// Records held in a map, lost when dropped.
#[derive(Default)]
pub struct MemoryTileStore {
    records: RwLock<HashMap<TileAddress, TileRecord>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TileStore for MemoryTileStore {
    fn load(&self, address: TileAddress) -> Result<Option<TileRecord>, RasterError> {
        Ok(self.records.read().get(&address).cloned())
    }

    fn save(&self, address: TileAddress, record: &TileRecord) -> Result<(), RasterError> {
        self.records.write().insert(address, record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), RasterError> {
        self.records.write().clear();
        Ok(())
    }
}

/// Identifies what a store directory was built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoreHeader {
    format: u32,
    source_uri: String,
    grid: TileGrid,
}

/// Records kept as one bincode file per tile under
/// `root/{level}/{row}_{column}.tile`.
///
/// A header file pins the format and the source grid. Opening a directory
/// whose header is missing, unreadable or different wipes and rebuilds it.
pub struct DiskTileStore {
    root: PathBuf,
    header: StoreHeader,
}

impl DiskTileStore {
    pub fn open(root: impl Into<PathBuf>, source_uri: &str, grid: TileGrid) -> Result<Self, RasterError> {
        let store = Self {
            root: root.into(),
            header: StoreHeader {
                format: STORE_FORMAT,
                source_uri: source_uri.to_string(),
                grid,
            },
        };

        match store.check_header() {
            Ok(()) => {
                debug!(root = %store.root.display(), "Opened tile store");
            }
            Err(e) => {
                warn!(root = %store.root.display(), error = %e, "Rebuilding tile store");
                store.rebuild()?;
            }
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn header_path(&self) -> PathBuf {
        self.root.join(HEADER_FILE)
    }

    pub fn record_path(&self, address: TileAddress) -> PathBuf {
        self.root
            .join(address.level.to_string())
            .join(format!("{}_{}.{}", address.row, address.column, RECORD_EXTENSION))
    }

    fn check_header(&self) -> Result<(), RasterError> {
        let file = fs::File::open(self.header_path())
            .map_err(|e| RasterError::CacheCorrupt(format!("header unreadable: {}", e)))?;
        let found: StoreHeader = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| RasterError::CacheCorrupt(format!("header undecodable: {}", e)))?;

        if found != self.header {
            return Err(RasterError::CacheCorrupt(format!(
                "header mismatch: format {} for {}, expected format {} for {}",
                found.format, found.source_uri, self.header.format, self.header.source_uri
            )));
        }
        Ok(())
    }

    fn rebuild(&self) -> Result<(), RasterError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        write_atomic(&self.header_path(), &self.header)?;
        Ok(())
    }
}

impl TileStore for DiskTileStore {
    fn load(&self, address: TileAddress) -> Result<Option<TileRecord>, RasterError> {
        let path = self.record_path(address);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match bincode::deserialize_from(BufReader::new(file)) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Overwritten by the next save of this tile
                warn!(tile = %address, error = %e, "Ignoring undecodable tile record");
                Ok(None)
            }
        }
    }

    fn save(&self, address: TileAddress, record: &TileRecord) -> Result<(), RasterError> {
        write_atomic(&self.record_path(address), record)
    }

    fn clear(&self) -> Result<(), RasterError> {
        self.rebuild()
    }
}

/// Serializes to a uniquely named temp file beside `path`, then renames it
/// over `path`.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RasterError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        bincode::serialize_into(&mut writer, value)
            .map_err(|e| io::Error::other(format!("Failed to serialize {}: {}", path.display(), e)))?;
        writer.flush()?;
    }
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
