//! Known free-polycube counts used as a self-check.

use crate::GenError;

/// Free polycube counts for N = 1 and up (OEIS A000162).
pub const KNOWN_COUNTS: [u64; 16] = [
    1,
    1,
    2,
    8,
    29,
    166,
    1023,
    6922,
    48311,
    346543,
    2522522,
    18598427,
    138462649,
    1039496297,
    7859514470,
    59795121480,
];

/// The published count for level `n`, when the table covers it.
pub fn known_count(n: usize) -> Option<u64> {
    if (1..=KNOWN_COUNTS.len()).contains(&n) {
        Some(KNOWN_COUNTS[n - 1])
    } else {
        None
    }
}

/// Fails with [`GenError::ResultMismatch`] when a computed total
/// contradicts the published count. Levels beyond the table pass.
pub fn check_result(n: usize, computed: u64) -> Result<(), GenError> {
    match known_count(n) {
        Some(expected) if expected != computed => Err(GenError::ResultMismatch {
            n,
            computed,
            expected,
        }),
        _ => Ok(()),
    }
}
