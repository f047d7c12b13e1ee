//! Expansion of a parent cube into its children of one target shape.

use std::collections::HashSet;

use polycube_core::{canonicalize, Cube, Point, Shape, NUM_DIRECTIONS};
use polycube_store::ShapeTable;

use crate::GenError;

/// Expands `parent` by one unit cube and inserts every child whose
/// canonical shape is `target`.
///
/// Candidate positions are the face neighbours of the parent's points
/// minus the parent itself. Children of other shapes are skipped before
/// canonicalising: a rotation only permutes the bounding extents, so the
/// canonical shape is the sorted extents. Those children are produced by
/// the same parent when their own shape is the target.
///
/// Returns the number of children that were new to the set.
pub fn expand_into(parent: &Cube, target: Shape, out: &ShapeTable) -> Result<u64, GenError> {
    let mut candidates: HashSet<Point> = HashSet::with_capacity(parent.len() * NUM_DIRECTIONS);
    for p in parent.iter() {
        for dir in 0..NUM_DIRECTIONS {
            candidates.insert(p.step(dir));
        }
    }
    for p in parent.iter() {
        candidates.remove(p);
    }

    let mut inserted = 0;
    for &candidate in &candidates {
        let mut child =
            Cube::from_points(parent.iter().copied().chain(std::iter::once(candidate)));
        child.translate_to_origin();
        let shape = child.shape();
        if shape.sorted() != target {
            continue;
        }
        let (canonical_shape, canonical) = canonicalize(shape, &child);
        if out.insert(&canonical, canonical_shape)? {
            inserted += 1;
        }
    }
    Ok(inserted)
}
