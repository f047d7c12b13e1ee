//! Enumeration driver for free polycubes.
//!
//! Builds each level from the one below by expansion and canonical
//! insertion, loads and persists cache files, and checks totals against
//! the known counts.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod driver;
pub mod expand;
pub mod results;

pub use config::GenConfig;
pub use driver::{gen, run, PARALLEL_THRESHOLD, PERF_STEP};
pub use expand::expand_into;
pub use results::{check_result, known_count, KNOWN_COUNTS};

use polycube_store::StoreError;
use thiserror::Error;

/// Errors from the enumeration driver.
#[derive(Debug, Error)]
pub enum GenError {
    /// Storage or cache file failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The computed total disagrees with the known count for the level
    #[error("computed {computed} cubes for N={n}, the known count is {expected}")]
    ResultMismatch {
        /// The level that was computed
        n: usize,
        /// The total the enumeration produced
        computed: u64,
        /// The published count it should have matched
        expected: u64,
    },
}
