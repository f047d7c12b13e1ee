//! Append-only cube record storage with a thread-local read cache.
//!
//! A `CubeStorage` backs one set bucket with a file of fixed-width point
//! records. The file is created lazily on the first commit and removed on
//! discard or drop. Reads resolve through a per-thread LRU cache of owned
//! cubes, so a resolved cube never aliases a buffer another thread can
//! touch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use polycube_core::{Cube, POINT_DISK_BYTES};

use crate::StoreError;

/// Capacity of the per-thread read cache, in cubes.
pub const READ_CACHE_CAPACITY: usize = 1024;

/// Records fetched per positioned read while scanning.
const SCAN_RECORDS_PER_READ: usize = 1024;

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Offset of one committed cube record inside a `CubeStorage` file.
///
/// The record width is implicit; a ref is only meaningful together with
/// the storage that issued it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CubeRef(pub u64);

struct Inner {
    file: Option<Arc<File>>,
    cursor: u64,
}

/// Append-only file of fixed-width cube records.
pub struct CubeStorage {
    path: PathBuf,
    id: u64,
    n: usize,
    /// Bumped by `discard` so stale read-cache entries stop matching.
    version: AtomicU32,
    /// Guards the cursor and the file handle.
    inner: Mutex<Inner>,
}

impl CubeStorage {
    /// Creates storage for cubes of `n` points, backed by a uniquely
    /// named file under `dir`. No file is created until the first commit.
    pub fn new(dir: &Path, n: usize) -> Self {
        let id = NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            path: dir.join(format!("storage_{id}.bin")),
            id,
            n,
            version: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                file: None,
                cursor: 0,
            }),
        }
    }

    /// Number of points per record.
    pub fn cube_len(&self) -> usize {
        self.n
    }

    /// Record width in bytes.
    pub fn record_bytes(&self) -> usize {
        self.n * POINT_DISK_BYTES
    }

    /// Number of committed records.
    pub fn len(&self) -> u64 {
        self.inner.lock().cursor / self.record_bytes() as u64
    }

    /// Whether nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one cube and returns its offset.
    ///
    /// Commits are serialised under the storage mutex; the file appears
    /// on the first commit.
    pub fn commit(&self, cube: &Cube) -> Result<CubeRef, StoreError> {
        assert_eq!(
            cube.len(),
            self.n,
            "cube size differs from storage record size"
        );
        let mut record = Vec::with_capacity(self.record_bytes());
        cube.write_disk(&mut record);

        let mut inner = self.inner.lock();
        let file = match &inner.file {
            Some(file) => Arc::clone(file),
            None => {
                let file = Arc::new(
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&self.path)?,
                );
                inner.file = Some(Arc::clone(&file));
                file
            }
        };
        let offset = inner.cursor;
        file.write_all_at(&record, offset)?;
        inner.cursor = offset + self.record_bytes() as u64;
        Ok(CubeRef(offset))
    }

    /// Resolves a ref through the calling thread's read cache.
    ///
    /// The returned cube is an owned copy and may be kept or sent
    /// anywhere.
    pub fn read(&self, at: CubeRef) -> Result<Cube, StoreError> {
        let key = CacheKey {
            storage: self.id,
            offset: at.0,
            version: self.version.load(Ordering::Acquire),
        };
        if let Some(cube) = READ_CACHE.with(|cache| cache.borrow_mut().get(&key)) {
            return Ok(cube);
        }
        let cube = self.read_raw(at)?;
        READ_CACHE.with(|cache| cache.borrow_mut().insert(key, cube.clone()));
        Ok(cube)
    }

    /// Reads a record directly from the file, bypassing the read cache.
    pub fn read_raw(&self, at: CubeRef) -> Result<Cube, StoreError> {
        let file = {
            let inner = self.inner.lock();
            match &inner.file {
                Some(file) => Arc::clone(file),
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "read at offset {} from storage with no backing file",
                        at.0
                    )))
                }
            }
        };
        let mut buf = vec![0u8; self.record_bytes()];
        file.read_exact_at(&mut buf, at.0)?;
        Ok(Cube::from_disk(&buf))
    }

    /// Streams every committed record in file order.
    pub fn scan(&self) -> RecordScan {
        let inner = self.inner.lock();
        RecordScan::new(inner.file.clone(), self.record_bytes(), 0, inner.cursor)
    }

    /// The open backing file and its path, if anything was committed.
    pub fn file_handle(&self) -> Option<(Arc<File>, PathBuf)> {
        let inner = self.inner.lock();
        inner
            .file
            .as_ref()
            .map(|file| (Arc::clone(file), self.path.clone()))
    }

    /// Drops all stored data and removes the backing file.
    ///
    /// Read-cache entries from the old incarnation stop matching (the
    /// version changes) and age out lazily.
    pub fn discard(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        let mut inner = self.inner.lock();
        if inner.file.take().is_some() {
            inner.cursor = 0;
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                // The cache writer unlinks source files after copying.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove storage file"
                ),
            }
        }
    }
}

impl Drop for CubeStorage {
    fn drop(&mut self) {
        self.discard();
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    storage: u64,
    offset: u64,
    version: u32,
}

struct CacheEntry {
    cube: Cube,
    last_access: u64,
}

/// LRU cache of resolved cubes, one instance per thread.
struct ReadCache {
    capacity: usize,
    entries: HashMap<CacheKey, CacheEntry>,
    access_counter: u64,
}

impl ReadCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Cube> {
        self.access_counter += 1;
        let access = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = access;
            entry.cube.clone()
        })
    }

    fn insert(&mut self, key: CacheKey, cube: Cube) {
        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.access_counter += 1;
        self.entries.insert(
            key,
            CacheEntry {
                cube,
                last_access: self.access_counter,
            },
        );
    }

    fn evict_one(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| *key);
        if let Some(key) = lru {
            self.entries.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

thread_local! {
    static READ_CACHE: RefCell<ReadCache> = RefCell::new(ReadCache::new(READ_CACHE_CAPACITY));
}

/// Drops every entry in the calling thread's read cache.
pub fn reset_read_cache() {
    READ_CACHE.with(|cache| cache.borrow_mut().clear());
}

/// Streaming iterator over fixed-width cube records in a file range.
///
/// Reads ahead in chunks; yields owned cubes. An IO error ends the
/// iteration after being yielded once.
pub struct RecordScan {
    file: Option<Arc<File>>,
    record_bytes: usize,
    next: u64,
    end: u64,
    buf: Vec<u8>,
    buf_start: u64,
}

impl RecordScan {
    pub(crate) fn new(file: Option<Arc<File>>, record_bytes: usize, start: u64, end: u64) -> Self {
        Self {
            file,
            record_bytes,
            next: start,
            end,
            buf: Vec::new(),
            buf_start: start,
        }
    }

    /// Number of records not yet yielded.
    pub fn remaining(&self) -> u64 {
        (self.end - self.next) / self.record_bytes as u64
    }
}

impl Iterator for RecordScan {
    type Item = Result<Cube, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let file = match &self.file {
            Some(file) => Arc::clone(file),
            None => return None,
        };
        let record = self.record_bytes as u64;
        let buffered_end = self.buf_start + self.buf.len() as u64;
        if self.next < self.buf_start || self.next + record > buffered_end {
            let want = (self.end - self.next).min((SCAN_RECORDS_PER_READ * self.record_bytes) as u64);
            self.buf.resize(want as usize, 0);
            if let Err(e) = file.read_exact_at(&mut self.buf, self.next) {
                self.end = self.next;
                return Some(Err(StoreError::Io(e)));
            }
            self.buf_start = self.next;
        }
        let at = (self.next - self.buf_start) as usize;
        let cube = Cube::from_disk(&self.buf[at..at + self.record_bytes]);
        self.next += record;
        Some(Ok(cube))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (remaining, Some(remaining))
    }
}
