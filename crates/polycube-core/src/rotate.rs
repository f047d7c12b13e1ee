//! The 24 proper rotations of the cube and canonicalisation.
//!
//! A rotation is stored as an axis permutation plus per-axis flips with
//! positive determinant. Applying one to an origin-translated cube
//! re-translates flipped axes, so the output stays origin-translated.

use crate::cube::Cube;
use crate::point::Point;
use crate::shape::Shape;

/// Number of proper rotations in three dimensions.
pub const NUM_ROTATIONS: usize = 24;

/// One orientation: output axis `k` takes input axis `perm[k]`, negated
/// when `flip[k]` is set.
struct Rotation {
    perm: [usize; 3],
    flip: [bool; 3],
}

/// All 24 proper rotations. Even permutations carry an even number of
/// flips, odd permutations an odd number, keeping the determinant +1.
const ROTATIONS: [Rotation; NUM_ROTATIONS] = [
    // identity permutation
    Rotation { perm: [0, 1, 2], flip: [false, false, false] },
    Rotation { perm: [0, 1, 2], flip: [true, true, false] },
    Rotation { perm: [0, 1, 2], flip: [true, false, true] },
    Rotation { perm: [0, 1, 2], flip: [false, true, true] },
    // cyclic permutations
    Rotation { perm: [1, 2, 0], flip: [false, false, false] },
    Rotation { perm: [1, 2, 0], flip: [true, true, false] },
    Rotation { perm: [1, 2, 0], flip: [true, false, true] },
    Rotation { perm: [1, 2, 0], flip: [false, true, true] },
    Rotation { perm: [2, 0, 1], flip: [false, false, false] },
    Rotation { perm: [2, 0, 1], flip: [true, true, false] },
    Rotation { perm: [2, 0, 1], flip: [true, false, true] },
    Rotation { perm: [2, 0, 1], flip: [false, true, true] },
    // transpositions
    Rotation { perm: [0, 2, 1], flip: [true, false, false] },
    Rotation { perm: [0, 2, 1], flip: [false, true, false] },
    Rotation { perm: [0, 2, 1], flip: [false, false, true] },
    Rotation { perm: [0, 2, 1], flip: [true, true, true] },
    Rotation { perm: [1, 0, 2], flip: [true, false, false] },
    Rotation { perm: [1, 0, 2], flip: [false, true, false] },
    Rotation { perm: [1, 0, 2], flip: [false, false, true] },
    Rotation { perm: [1, 0, 2], flip: [true, true, true] },
    Rotation { perm: [2, 1, 0], flip: [true, false, false] },
    Rotation { perm: [2, 1, 0], flip: [false, true, false] },
    Rotation { perm: [2, 1, 0], flip: [false, false, true] },
    Rotation { perm: [2, 1, 0], flip: [true, true, true] },
];

/// Applies rotation `index` to an origin-translated cube and its shape.
///
/// Returns `None` when the rotated shape would not be in canonical axis
/// order; such rotations cannot contribute a canonical form and are
/// discarded as normal control flow. The returned point sequence is not
/// sorted.
pub fn rotate(index: usize, shape: Shape, cube: &Cube) -> Option<(Shape, Cube)> {
    let rot = &ROTATIONS[index];
    let dims = shape.dims();

    let out_shape = Shape::new(dims[rot.perm[0]], dims[rot.perm[1]], dims[rot.perm[2]]);
    if !out_shape.is_canonical() {
        return None;
    }

    let points = cube
        .iter()
        .map(|p| {
            let c = [p.x(), p.y(), p.z()];
            let mut out = [0i8; 3];
            for k in 0..3 {
                let v = c[rot.perm[k]];
                out[k] = if rot.flip[k] {
                    dims[rot.perm[k]] as i8 - v
                } else {
                    v
                };
            }
            Point::new(out[0], out[1], out[2])
        })
        .collect();

    Some((out_shape, Cube::new(points)))
}

/// Computes the canonical form of an origin-translated cube.
///
/// Tries all 24 rotations, keeps those whose shape comes out canonical,
/// sorts each survivor and returns the lexicographically smallest sorted
/// sequence with its shape. Two cubes are equivalent under rotation
/// exactly when their canonical forms are identical.
pub fn canonicalize(shape: Shape, cube: &Cube) -> (Shape, Cube) {
    let mut best: Option<(Shape, Cube)> = None;
    for index in 0..NUM_ROTATIONS {
        if let Some((s, mut c)) = rotate(index, shape, cube) {
            c.sort();
            match &best {
                Some((_, b)) if *b <= c => {}
                _ => best = Some((s, c)),
            }
        }
    }
    match best {
        Some(found) => found,
        // Some permutation always sorts the extents.
        None => unreachable!("no rotation produced a canonical shape"),
    }
}
