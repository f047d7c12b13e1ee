//! Shared harness for end-to-end enumeration tests.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

use std::collections::BTreeMap;
use std::path::Path;

use tempfile::TempDir;

use polycube_core::{Cube, Shape};
use polycube_gen::GenConfig;
use polycube_store::ShapeTable;

/// A scratch cache directory with a config pointing at it.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    /// Creates a fresh scratch directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create scratch dir"),
        }
    }

    /// A default config whose cache directory is the scratch directory.
    pub fn config(&self) -> GenConfig {
        GenConfig {
            cache_dir: self.dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    /// The scratch directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize tracing for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("polycube_gen=info,polycube_store=debug")
        .with_test_writer()
        .try_init();
}

/// Per-shape cube counts of the non-empty buckets.
pub fn shape_counts(table: &ShapeTable) -> BTreeMap<Shape, u64> {
    table
        .iter()
        .filter(|(_, bucket)| !bucket.is_empty())
        .map(|(shape, bucket)| (shape, bucket.len()))
        .collect()
}

/// Every cube in the table, sorted.
pub fn all_cubes(table: &ShapeTable) -> Vec<Cube> {
    let mut cubes: Vec<Cube> = table
        .iter()
        .flat_map(|(_, bucket)| bucket.shards())
        .flat_map(|shard| shard.cubes())
        .map(|cube| cube.expect("readable storage"))
        .collect();
    cubes.sort();
    cubes
}
