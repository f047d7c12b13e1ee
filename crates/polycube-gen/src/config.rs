//! Run configuration.

use std::path::PathBuf;

use polycube_core::Shape;

/// Settings for one enumeration run.
#[derive(Debug, Clone)]
pub struct GenConfig {
    /// Worker threads per output shape.
    pub threads: usize,
    /// Attempt to load a single cache file per level.
    pub use_cache: bool,
    /// Persist finished levels.
    pub write_cache: bool,
    /// Persist one file per output shape instead of one per level.
    pub split_cache: bool,
    /// Load per-shape cache files instead of a single file.
    pub use_split_cache: bool,
    /// Directory for cache files and transient bucket storage.
    pub cache_dir: PathBuf,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            use_cache: false,
            write_cache: false,
            split_cache: false,
            use_split_cache: false,
            cache_dir: PathBuf::from("./cache/"),
        }
    }
}

impl GenConfig {
    /// Path of the single cache file for level `n`.
    pub fn cache_file(&self, n: usize) -> PathBuf {
        self.cache_dir.join(format!("cubes_{n}.bin"))
    }

    /// Path of the split cache file for one shape of level `n`.
    pub fn split_cache_file(&self, n: usize, shape: Shape) -> PathBuf {
        self.cache_dir.join(format!(
            "cubes_{n}_{}-{}-{}.bin",
            shape.x, shape.y, shape.z
        ))
    }
}
