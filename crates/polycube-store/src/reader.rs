//! Validating reader for cache files.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use polycube_core::POINT_DISK_BYTES;

use crate::format::{Header, ShapeEntry, HEADER_BYTES, SHAPE_ENTRY_BYTES};
use crate::storage::RecordScan;
use crate::StoreError;

/// An open, validated cache file.
///
/// Opening checks the magic, the record alignment of every shape entry
/// and the exact file size; any violation surfaces as a [`StoreError`]
/// so callers can fall back to computing the level. Cubes are served by
/// streaming reads, never by loading the payload whole.
pub struct CacheReader {
    file: Arc<File>,
    path: PathBuf,
    header: Header,
    entries: Vec<ShapeEntry>,
    payload_start: u64,
}

impl CacheReader {
    /// Opens and validates the cache file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;

        let mut header_bytes = [0u8; HEADER_BYTES];
        file.read_exact_at(&mut header_bytes, 0)?;
        let header = Header::decode(&header_bytes)?;
        if header.n == 0 || header.n > 127 {
            return Err(StoreError::Corrupt(format!(
                "implausible cube size {}",
                header.n
            )));
        }

        let table_bytes = header.num_shapes as usize * SHAPE_ENTRY_BYTES;
        let mut table = vec![0u8; table_bytes];
        file.read_exact_at(&mut table, HEADER_BYTES as u64)?;
        let entries: Vec<ShapeEntry> = table
            .chunks_exact(SHAPE_ENTRY_BYTES)
            .map(ShapeEntry::decode)
            .collect::<Result<_, _>>()?;

        let record = header.n as u64 * POINT_DISK_BYTES as u64;
        let mut payload_bytes = 0u64;
        for entry in &entries {
            if entry.size % record != 0 {
                return Err(StoreError::Corrupt(format!(
                    "payload for shape {} is not a whole number of records",
                    entry.shape
                )));
            }
            payload_bytes += entry.size;
        }
        if payload_bytes / record != header.num_polycubes {
            return Err(StoreError::Corrupt(format!(
                "shape table holds {} cubes, header claims {}",
                payload_bytes / record,
                header.num_polycubes
            )));
        }

        let payload_start = (HEADER_BYTES + table_bytes) as u64;
        let expected_size = payload_start + payload_bytes;
        let actual_size = file.metadata()?.len();
        if actual_size != expected_size {
            return Err(StoreError::Corrupt(format!(
                "file is {actual_size} bytes, header implies {expected_size}"
            )));
        }

        debug!(
            path = %path.display(),
            n = header.n,
            shapes = header.num_shapes,
            cubes = header.num_polycubes,
            "opened cache file"
        );
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            header,
            entries,
            payload_start,
        })
    }

    /// The cube size of the stored level.
    pub fn n(&self) -> usize {
        self.header.n as usize
    }

    /// Number of shapes in the file.
    pub fn num_shapes(&self) -> usize {
        self.entries.len()
    }

    /// Total number of cubes in the file.
    pub fn total(&self) -> u64 {
        self.header.num_polycubes
    }

    /// The shape table.
    pub fn entries(&self) -> &[ShapeEntry] {
        &self.entries
    }

    /// The file path this reader serves.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams the cubes of the shape at `index` in the table.
    ///
    /// Payload positions are recomputed cumulatively from the sizes;
    /// stored offsets are not trusted, since writers may leave stale
    /// offsets on entries for empty shapes.
    pub fn shape_cubes(&self, index: usize) -> RecordScan {
        let record = self.header.n as usize * POINT_DISK_BYTES;
        let mut start = self.payload_start;
        for entry in &self.entries[..index] {
            start += entry.size;
        }
        let end = start + self.entries[index].size;
        RecordScan::new(Some(Arc::clone(&self.file)), record, start, end)
    }
}
