//! The shape-partitioned working set of one enumeration level.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polycube_core::{enumerate_shapes, Cube, Shape};

use crate::set::ShardedSet;
use crate::StoreError;

/// Maps every canonical shape of a level to its sharded cube set.
///
/// The map is built once and never changes; all mutation happens inside
/// the buckets under their own locks, so the table is shared by reference
/// across worker threads.
pub struct ShapeTable {
    n: usize,
    dir: PathBuf,
    buckets: BTreeMap<Shape, ShardedSet>,
}

impl ShapeTable {
    /// Builds the table for level `n` with one bucket per canonical
    /// shape, creating `dir` (where storage files live) if needed.
    pub fn new(n: usize, dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let buckets = enumerate_shapes(n)
            .into_iter()
            .map(|shape| (shape, ShardedSet::new(dir, n)))
            .collect();
        Ok(Self {
            n,
            dir: dir.to_path_buf(),
            buckets,
        })
    }

    /// The level this table holds.
    pub fn n(&self) -> usize {
        self.n
    }

    /// The directory holding the bucket storage files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of shape buckets.
    pub fn num_shapes(&self) -> usize {
        self.buckets.len()
    }

    /// Total number of cubes across all buckets.
    pub fn len(&self) -> u64 {
        self.buckets.values().map(ShardedSet::len).sum()
    }

    /// Whether the table holds no cubes.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(ShardedSet::is_empty)
    }

    /// Inserts a canonical cube under its canonical shape.
    ///
    /// A shape outside the level's enumeration is a caller bug and comes
    /// back as [`StoreError::UnknownShape`].
    pub fn insert(&self, cube: &Cube, shape: Shape) -> Result<bool, StoreError> {
        self.buckets
            .get(&shape)
            .ok_or(StoreError::UnknownShape(shape))?
            .insert(cube)
    }

    /// The bucket for a shape.
    pub fn bucket(&self, shape: Shape) -> Option<&ShardedSet> {
        self.buckets.get(&shape)
    }

    /// The shapes of this level, in canonical enumeration order.
    pub fn shapes(&self) -> impl Iterator<Item = Shape> + '_ {
        self.buckets.keys().copied()
    }

    /// Iterates buckets in shape order.
    pub fn iter(&self) -> impl Iterator<Item = (Shape, &ShardedSet)> + '_ {
        self.buckets.iter().map(|(shape, set)| (*shape, set))
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
    fn test_buckets_cover_level_shapes() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(4, dir.path()).unwrap();
        assert_eq!(table.num_shapes(), 4);
        let shapes: Vec<Shape> = table.shapes().collect();
        assert_eq!(shapes, enumerate_shapes(4));
    }

    #[test]
    fn test_insert_routes_by_shape() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(3, dir.path()).unwrap();
        let straight = cube(&[(0, 0, 0), (0, 0, 1), (0, 0, 2)]);
        let bent = cube(&[(0, 0, 0), (0, 0, 1), (0, 1, 1)]);

        assert!(table.insert(&straight, Shape::new(0, 0, 2)).unwrap());
        assert!(table.insert(&bent, Shape::new(0, 1, 1)).unwrap());
        assert!(!table.insert(&bent, Shape::new(0, 1, 1)).unwrap());

        assert_eq!(table.len(), 2);
        assert_eq!(table.bucket(Shape::new(0, 0, 2)).unwrap().len(), 1);
        assert_eq!(table.bucket(Shape::new(0, 1, 1)).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_shape_is_an_error() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(3, dir.path()).unwrap();
        let c = cube(&[(0, 0, 0), (0, 0, 1), (0, 0, 2)]);
        let result = table.insert(&c, Shape::new(5, 5, 5));
        assert!(matches!(result, Err(StoreError::UnknownShape(_))));
    }
}
