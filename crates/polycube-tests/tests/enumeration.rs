//! End-to-end enumeration tests.
//!
//! Covers the known counts for small levels, uniqueness of the result
//! under rotation, and the compressed codec round-trip over a whole
//! level.

use polycube_core::{canonicalize, rotate, CompressedCube, Shape, NUM_ROTATIONS};
use polycube_gen::gen;
use polycube_store::CacheWriter;
use polycube_tests::{all_cubes, init_tracing, shape_counts, TestEnv};

#[test]
fn test_known_counts_through_level_six() {
    init_tracing();
    let env = TestEnv::new();
    let writer = CacheWriter::new(1);

    for (n, expected) in [(1usize, 1u64), (2, 1), (3, 2), (4, 8), (5, 29), (6, 166)] {
        let table = gen(n, &env.config(), &writer).unwrap();
        assert_eq!(table.len(), expected, "wrong count for N={n}");
    }
}

#[test]
fn test_level_three_exact_cubes() {
    init_tracing();
    let env = TestEnv::new();
    let writer = CacheWriter::new(1);
    let table = gen(3, &env.config(), &writer).unwrap();

    let counts = shape_counts(&table);
    assert_eq!(counts.get(&Shape::new(0, 0, 2)), Some(&1));
    assert_eq!(counts.get(&Shape::new(0, 1, 1)), Some(&1));

    let cubes = all_cubes(&table);
    assert_eq!(cubes.len(), 2);
    // The straight and bent triominoes in canonical form. The bent one
    // is planar, so flipping it over is a proper 3D rotation and the
    // smallest orientation puts the corner at the origin.
    let as_coords: Vec<Vec<(i8, i8, i8)>> = cubes
        .iter()
        .map(|c| c.iter().map(|p| (p.x(), p.y(), p.z())).collect())
        .collect();
    assert!(as_coords.contains(&vec![(0, 0, 0), (0, 0, 1), (0, 0, 2)]));
    assert!(as_coords.contains(&vec![(0, 0, 0), (0, 0, 1), (0, 1, 0)]));
}

#[test]
fn test_no_two_results_are_rotations_of_each_other() {
    init_tracing();
    let env = TestEnv::new();
    let writer = CacheWriter::new(1);
    let table = gen(4, &env.config(), &writer).unwrap();
    let cubes = all_cubes(&table);
    assert_eq!(cubes.len(), 8);

    for (i, a) in cubes.iter().enumerate() {
        let shape = a.shape();
        for index in 0..NUM_ROTATIONS {
            let Some((_, mut rotated)) = rotate(index, shape, a) else {
                continue;
            };
            rotated.sort();
            for (j, b) in cubes.iter().enumerate() {
                if i != j {
                    assert_ne!(&rotated, b, "cube {i} rotates into cube {j}");
                }
            }
        }
    }
}

#[test]
fn test_every_result_is_its_own_canonical_form() {
    init_tracing();
    let env = TestEnv::new();
    let writer = CacheWriter::new(1);
    let table = gen(5, &env.config(), &writer).unwrap();

    for (shape, bucket) in table.iter() {
        for shard in bucket.shards() {
            for cube in shard.cubes() {
                let cube = cube.unwrap();
                assert!(shape.is_canonical());
                let (canonical_shape, canonical) = canonicalize(cube.shape(), &cube);
                assert_eq!(canonical_shape, shape);
                assert_eq!(canonical, cube);
            }
        }
    }
}

#[test]
fn test_codec_roundtrips_every_level_five_cube() {
    init_tracing();
    let env = TestEnv::new();
    let writer = CacheWriter::new(1);
    let table = gen(5, &env.config(), &writer).unwrap();
    let cubes = all_cubes(&table);
    assert_eq!(cubes.len(), 29);

    for cube in &cubes {
        let encoded = CompressedCube::encode(cube).expect("every result is connected");
        let decoded = encoded.decode(cube.len(), cube.points()[0]);
        assert_eq!(&decoded, cube, "codec round-trip changed {cube:?}");
    }
}
