//! Disk-backed cube sets.
//!
//! `DiskSet` keeps only file offsets in memory; the cube payloads live in
//! the bucket's `CubeStorage`. Equality between a candidate and a stored
//! member is decided by resolving the member through storage, so the set
//! can grow far beyond RAM. `ShardedSet` spreads one shape bucket over a
//! fixed number of `DiskSet`s to cut lock contention.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use smallvec::SmallVec;

use polycube_core::Cube;

use crate::storage::{CubeRef, CubeStorage, RecordScan};
use crate::StoreError;

/// Hash fanout inside one shape bucket.
pub const SHARD_COUNT: usize = 32;

type RefChain = SmallVec<[CubeRef; 1]>;

/// A set of cubes whose payloads live in an append-only file.
///
/// The in-memory index maps the full sequence hash to a short chain of
/// refs; distinct cubes share a chain only on a 64-bit hash collision.
/// Candidates are probed by value before any storage is allocated, so a
/// fresh insert touches the file once, on commit.
pub struct DiskSet {
    index: RwLock<HashMap<u64, RefChain>>,
    storage: CubeStorage,
}

impl DiskSet {
    /// Creates an empty set whose storage file will live under `dir`.
    pub fn new(dir: &Path, n: usize) -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
            storage: CubeStorage::new(dir, n),
        }
    }

    /// Inserts a cube, returning `true` if it was not present.
    pub fn insert(&self, cube: &Cube) -> Result<bool, StoreError> {
        self.insert_hashed(cube.sequence_hash(), cube)
    }

    pub(crate) fn insert_hashed(&self, hash: u64, cube: &Cube) -> Result<bool, StoreError> {
        {
            let index = self.index.read();
            if let Some(chain) = index.get(&hash) {
                if self.chain_contains(chain, cube)? {
                    return Ok(false);
                }
            }
        }
        let mut index = self.index.write();
        // Another thread may have inserted it between the locks.
        if let Some(chain) = index.get(&hash) {
            if self.chain_contains(chain, cube)? {
                return Ok(false);
            }
        }
        let committed = self.storage.commit(cube)?;
        index.entry(hash).or_default().push(committed);
        Ok(true)
    }

    fn chain_contains(&self, chain: &RefChain, cube: &Cube) -> Result<bool, StoreError> {
        for &member in chain {
            if self.storage.read(member)? == *cube {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the set holds this cube.
    pub fn contains(&self, cube: &Cube) -> Result<bool, StoreError> {
        let index = self.index.read();
        match index.get(&cube.sequence_hash()) {
            Some(chain) => self.chain_contains(chain, cube),
            None => Ok(false),
        }
    }

    /// Number of members. Survives [`DiskSet::clear_index`].
    pub fn len(&self) -> u64 {
        self.storage.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drops the in-memory index, keeping the storage file and count.
    ///
    /// Call once a bucket is complete; members stay readable through
    /// [`DiskSet::cubes`], but further inserts would re-admit duplicates.
    pub fn clear_index(&self) {
        let mut index = self.index.write();
        *index = HashMap::new();
    }

    /// The backing storage.
    pub fn storage(&self) -> &CubeStorage {
        &self.storage
    }

    /// Streams every member in commit order.
    pub fn cubes(&self) -> RecordScan {
        self.storage.scan()
    }
}

/// One shape bucket: a fixed-width array of `DiskSet`s indexed by
/// sequence hash modulo [`SHARD_COUNT`].
pub struct ShardedSet {
    shards: Vec<DiskSet>,
}

impl ShardedSet {
    /// Creates the bucket with all its shards.
    pub fn new(dir: &Path, n: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| DiskSet::new(dir, n)).collect(),
        }
    }

    fn shard_for(&self, hash: u64) -> &DiskSet {
        &self.shards[(hash % SHARD_COUNT as u64) as usize]
    }

    /// Inserts a cube, returning `true` if it was not present.
    pub fn insert(&self, cube: &Cube) -> Result<bool, StoreError> {
        let hash = cube.sequence_hash();
        self.shard_for(hash).insert_hashed(hash, cube)
    }

    /// Whether the bucket holds this cube.
    pub fn contains(&self, cube: &Cube) -> Result<bool, StoreError> {
        self.shard_for(cube.sequence_hash()).contains(cube)
    }

    /// Total number of members across shards.
    pub fn len(&self) -> u64 {
        self.shards.iter().map(DiskSet::len).sum()
    }

    /// Whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(DiskSet::is_empty)
    }

    /// The shards, for iteration and persistence.
    pub fn shards(&self) -> &[DiskSet] {
        &self.shards
    }

    /// Drops every shard's in-memory index.
    pub fn clear_index(&self) {
        for shard in &self.shards {
            shard.clear_index();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polycube_core::Point;
    use tempfile::TempDir;

    fn cube(pts: &[(i8, i8, i8)]) -> Cube {
        let mut c = Cube::from_points(pts.iter().map(|&(x, y, z)| Point::new(x, y, z)));
        c.sort();
        c
    }

    #[test]
    fn test_insert_deduplicates() {
        let dir = TempDir::new().unwrap();
        let set = DiskSet::new(dir.path(), 3);
        let c = cube(&[(0, 0, 0), (0, 0, 1), (0, 1, 1)]);

        assert!(set.insert(&c).unwrap());
        assert!(!set.insert(&c).unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&c).unwrap());
    }

    #[test]
    fn test_distinct_cubes_accumulate() {
        let dir = TempDir::new().unwrap();
        let set = ShardedSet::new(dir.path(), 1);
        for i in 0..50 {
            assert!(set.insert(&cube(&[(i, 0, 0)])).unwrap());
        }
        for i in 0..50 {
            assert!(!set.insert(&cube(&[(i, 0, 0)])).unwrap());
        }
        assert_eq!(set.len(), 50);
    }

    #[test]
    fn test_contains_on_missing() {
        let dir = TempDir::new().unwrap();
        let set = DiskSet::new(dir.path(), 1);
        assert!(!set.contains(&cube(&[(0, 0, 0)])).unwrap());
    }

    #[test]
    fn test_clear_index_keeps_members_readable() {
        let dir = TempDir::new().unwrap();
        let set = ShardedSet::new(dir.path(), 2);
        let cubes = [
            cube(&[(0, 0, 0), (0, 0, 1)]),
            cube(&[(0, 0, 0), (0, 1, 0)]),
            cube(&[(0, 0, 0), (1, 0, 0)]),
        ];
        for c in &cubes {
            set.insert(c).unwrap();
        }
        set.clear_index();

        assert_eq!(set.len(), 3);
        let mut scanned: Vec<Cube> = set
            .shards()
            .iter()
            .flat_map(|shard| shard.cubes())
            .map(|r| r.unwrap())
            .collect();
        scanned.sort();
        let mut expected = cubes.to_vec();
        expected.sort();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_concurrent_inserts_of_same_set() {
        let dir = TempDir::new().unwrap();
        let set = ShardedSet::new(dir.path(), 1);
        let cubes: Vec<Cube> = (0..40).map(|i| cube(&[(i, 0, 0)])).collect();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for c in &cubes {
                        set.insert(c).unwrap();
                    }
                });
            }
        });

        assert_eq!(set.len(), cubes.len() as u64);
    }
}
