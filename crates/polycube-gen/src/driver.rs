//! Level-by-level enumeration driver.

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{info, warn};

use polycube_core::{reachable, Cube, Point, Shape};
use polycube_store::{CacheReader, CacheWriter, DiskSet, ShapeTable, DEFAULT_WRITER_THREADS};

use crate::config::GenConfig;
use crate::expand::expand_into;
use crate::results::check_result;
use crate::GenError;

/// Progress is reported every this many expanded parents.
pub const PERF_STEP: u64 = 500;

/// Minimum parent count before a shape is expanded on worker threads.
pub const PARALLEL_THRESHOLD: u64 = 100;

/// Enumerates level `n` and returns its shape table.
///
/// Levels below 3 are built directly. Otherwise the level is loaded from
/// cache when configured and present, or computed by expanding every
/// cube of level `n - 1`. With `write_cache` set, finished levels are
/// handed to `writer` for background persistence.
pub fn gen(n: usize, config: &GenConfig, writer: &CacheWriter) -> Result<ShapeTable, GenError> {
    let table = ShapeTable::new(n, &config.cache_dir)?;
    if n < 1 {
        return Ok(table);
    }
    if n == 1 {
        let single = Cube::from_points([Point::new(0, 0, 0)]);
        table.insert(&single, Shape::new(0, 0, 0))?;
        info!(n, cubes = table.len(), "level complete");
        return Ok(table);
    }
    if n == 2 {
        let domino = Cube::from_points([Point::new(0, 0, 0), Point::new(0, 0, 1)]);
        table.insert(&domino, Shape::new(0, 0, 1))?;
        info!(n, cubes = table.len(), "level complete");
        return Ok(table);
    }

    if config.use_split_cache {
        if load_split_cache(n, config, &table) && !table.is_empty() {
            info!(n, cubes = table.len(), "loaded level from split cache");
            return Ok(table);
        }
    } else if config.use_cache
        && load_cache(&config.cache_file(n), n, &table)
        && !table.is_empty()
    {
        info!(n, cubes = table.len(), "loaded level from cache");
        return Ok(table);
    }

    let parents = gen(n - 1, config, writer)?;
    info!(
        n,
        parents = parents.len(),
        "generating new cubes from parent cubes"
    );
    let level_start = Instant::now();

    let targets: Vec<Shape> = table.shapes().collect();
    let total_targets = targets.len();
    for (index, &target) in targets.iter().enumerate() {
        info!(
            shape = %target,
            number = index + 1,
            of = total_targets,
            "processing output shape"
        );

        let sources: Vec<&DiskSet> = parents
            .iter()
            .filter(|&(shape, _)| reachable(shape, target))
            .flat_map(|(_, bucket)| bucket.shards().iter())
            .filter(|shard| !shard.is_empty())
            .collect();
        let parent_count: u64 = sources.iter().map(|shard| shard.len()).sum();

        expand_shape(&sources, parent_count, target, &table, config.threads)?;

        let count = table.bucket(target).map_or(0, |bucket| bucket.len());
        info!(shape = %target, cubes = count, "output shape complete");

        if config.write_cache && config.split_cache {
            writer.save_shape(&config.split_cache_file(n, target), &table, target)?;
        }
        if let Some(bucket) = table.bucket(target) {
            bucket.clear_index();
        }
    }

    let total = table.len();
    info!(
        n,
        cubes = total,
        took = ?level_start.elapsed(),
        "level complete"
    );
    check_result(n, total)?;

    if config.write_cache && !config.split_cache {
        writer.save(&config.cache_file(n), &table)?;
    }
    Ok(table)
}

/// Enumerates level `n` with its own cache writer and returns the total
/// count, draining all background persistence before returning.
pub fn run(n: usize, config: &GenConfig) -> Result<u64, GenError> {
    let writer = CacheWriter::new(DEFAULT_WRITER_THREADS);
    let table = gen(n, config, &writer)?;
    let total = table.len();
    writer.flush();
    Ok(total)
}

/// Expands every parent in `sources` into `target`, on worker threads
/// when the parent set is worth it.
fn expand_shape(
    sources: &[&DiskSet],
    parent_count: u64,
    target: Shape,
    table: &ShapeTable,
    threads: usize,
) -> Result<(), GenError> {
    if parent_count == 0 {
        return Ok(());
    }
    let progress = Progress::new(parent_count);

    if threads < 2 || parent_count < PARALLEL_THRESHOLD {
        for shard in sources {
            for parent in shard.cubes() {
                expand_into(&parent?, target, table)?;
                progress.tick();
            }
        }
        return Ok(());
    }

    let next_source = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| -> Result<(), GenError> {
                    loop {
                        let at = next_source.fetch_add(1, Ordering::Relaxed);
                        let Some(shard) = sources.get(at) else {
                            return Ok(());
                        };
                        for parent in shard.cubes() {
                            expand_into(&parent?, target, table)?;
                            progress.tick();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(())
    })
}

/// Throughput reporting shared across the workers of one shape.
struct Progress {
    total: u64,
    done: AtomicU64,
    start: Instant,
}

impl Progress {
    fn new(total: u64) -> Self {
        Self {
            total,
            done: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PERF_STEP != 0 {
            return;
        }
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let rate = done as f64 / elapsed;
        let remaining = (self.total.saturating_sub(done)) as f64 / rate;
        info!(
            percent = 100 * done / self.total,
            parents_per_sec = rate as u64,
            eta_secs = remaining as u64,
            "expanding"
        );
    }
}

/// Fills `table` from a single cache file. Any problem with the file is
/// logged and reported as "no cache"; partially inserted cubes are
/// harmless because recomputation deduplicates against them.
fn load_cache(path: &Path, n: usize, table: &ShapeTable) -> bool {
    let reader = match CacheReader::open(path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache not usable, computing instead");
            return false;
        }
    };
    if reader.n() != n {
        warn!(
            path = %path.display(),
            file_n = reader.n(),
            "cache file holds a different level, computing instead"
        );
        return false;
    }
    info!(path = %path.display(), cubes = reader.total(), "loading cache file");
    match fill_from_reader(&reader, table) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache load failed, computing instead");
            false
        }
    }
}

/// Fills `table` from one cache file per shape. All shape files must be
/// present and consistent; otherwise the level is recomputed.
fn load_split_cache(n: usize, config: &GenConfig, table: &ShapeTable) -> bool {
    for shape in table.shapes() {
        let path = config.split_cache_file(n, shape);
        let reader = match CacheReader::open(&path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "split cache not usable, computing instead");
                return false;
            }
        };
        if reader.n() != n
            || reader.num_shapes() != 1
            || reader.entries()[0].shape != shape
        {
            warn!(path = %path.display(), "split cache file does not match its shape, computing instead");
            return false;
        }
        if let Err(e) = fill_from_reader(&reader, table) {
            warn!(path = %path.display(), error = %e, "split cache load failed, computing instead");
            return false;
        }
    }
    true
}

fn fill_from_reader(reader: &CacheReader, table: &ShapeTable) -> Result<(), GenError> {
    for index in 0..reader.num_shapes() {
        let shape = reader.entries()[index].shape;
        for cube in reader.shape_cubes(index) {
            table.insert(&cube?, shape)?;
        }
    }
    Ok(())
}
