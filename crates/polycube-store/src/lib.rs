//! Disk-backed cube sets and the polycube cache file format.
//!
//! This crate provides:
//! - `CubeStorage`: append-only per-bucket record files with a
//!   thread-local LRU read cache
//! - `DiskSet` / `ShardedSet`: hash sets of file offsets whose equality
//!   resolves through storage
//! - `ShapeTable`: the shape-partitioned working set of one level
//! - The cache file format, a validating `CacheReader` and an
//!   asynchronous `CacheWriter`

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod format;
pub mod reader;
pub mod set;
pub mod storage;
pub mod table;
pub mod writer;

pub use format::{Header, ShapeEntry, HEADER_BYTES, MAGIC, SHAPE_ENTRY_BYTES};
pub use reader::CacheReader;
pub use set::{DiskSet, ShardedSet, SHARD_COUNT};
pub use storage::{reset_read_cache, CubeRef, CubeStorage, RecordScan, READ_CACHE_CAPACITY};
pub use table::ShapeTable;
pub use writer::{CacheWriter, DEFAULT_WRITER_THREADS};

use polycube_core::Shape;
use thiserror::Error;

/// Errors from storage and cache file operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error on a storage or cache file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache file does not start with the expected magic
    #[error("cache file is not recognized")]
    BadMagic,

    /// Cache file contents are inconsistent with its header
    #[error("cache file is corrupt: {0}")]
    Corrupt(String),

    /// Insert routed to a shape outside the level's enumeration
    #[error("no bucket for shape {0}")]
    UnknownShape(Shape),
}
