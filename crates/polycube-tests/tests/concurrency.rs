//! Concurrent insertion properties of the disk-backed sets.

use polycube_core::{Cube, Point};
use polycube_store::ShardedSet;
use polycube_tests::{init_tracing, TestEnv};

fn synthetic_cubes(count: usize) -> Vec<Cube> {
    (0..count)
        .map(|i| {
            let x = (i % 16) as i8;
            let y = (i / 16) as i8;
            let mut cube = Cube::from_points([
                Point::new(x, y, 0),
                Point::new(x, y, 1),
                Point::new(x, y, 2),
            ]);
            cube.sort();
            cube
        })
        .collect()
}

#[test]
fn test_concurrent_inserters_of_the_same_set_agree() {
    init_tracing();
    let env = TestEnv::new();
    let set = ShardedSet::new(env.path(), 3);
    let cubes = synthetic_cubes(200);

    // Every thread inserts the full set, each starting at a different
    // position so the interleavings collide.
    std::thread::scope(|scope| {
        for thread in 0..8 {
            let set = &set;
            let cubes = &cubes;
            scope.spawn(move || {
                for i in 0..cubes.len() {
                    let cube = &cubes[(i + thread * 25) % cubes.len()];
                    set.insert(cube).unwrap();
                }
            });
        }
    });

    assert_eq!(set.len(), cubes.len() as u64);
    for cube in &cubes {
        assert!(set.contains(cube).unwrap());
    }
}

#[test]
fn test_concurrent_distinct_inserters_union() {
    init_tracing();
    let env = TestEnv::new();
    let set = ShardedSet::new(env.path(), 3);
    let cubes = synthetic_cubes(240);

    // Threads insert overlapping halves; the union must come out exact.
    std::thread::scope(|scope| {
        for thread in 0..4 {
            let set = &set;
            let slice = &cubes[thread * 40..thread * 40 + 120];
            scope.spawn(move || {
                for cube in slice {
                    set.insert(cube).unwrap();
                }
            });
        }
    });

    assert_eq!(set.len(), 240);
}
