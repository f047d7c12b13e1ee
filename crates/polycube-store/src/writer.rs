//! Asynchronous cache file writer.
//!
//! `save` lays out the header and shape table, then hands the payload to
//! a pool of worker threads as whole-file copy jobs, one per non-empty
//! storage shard. Storage files are exactly concatenations of records in
//! the on-disk format, so no per-record work happens at save time and the
//! in-memory set is never walked. Each copy job unlinks its source file
//! afterwards; open handles keep the data readable for anyone still
//! iterating the level.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use polycube_core::{Shape, POINT_DISK_BYTES};

use crate::format::{Header, ShapeEntry, HEADER_BYTES, SHAPE_ENTRY_BYTES};
use crate::table::ShapeTable;
use crate::StoreError;

/// Default size of the copy/flush worker pool.
pub const DEFAULT_WRITER_THREADS: usize = 8;

/// Bytes moved per positioned read/write while copying.
const COPY_CHUNK: usize = 1 << 20;

struct CopyJob {
    src: Arc<File>,
    src_path: PathBuf,
    len: u64,
    dest_offset: u64,
    target: Arc<File>,
}

struct FlushJob {
    target: Arc<File>,
    end: u64,
    path: PathBuf,
}

struct State {
    active: bool,
    copies: VecDeque<CopyJob>,
    flushes: VecDeque<FlushJob>,
    /// Copy jobs queued or running.
    num_copies: usize,
    /// Flush jobs queued or running.
    num_flushes: usize,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled when work is queued or the pool shuts down.
    work: Condvar,
    /// Signalled when a job finishes.
    done: Condvar,
}

/// Worker pool that materialises cache files in the background.
///
/// Dropping the writer drains all outstanding work before joining the
/// pool.
pub struct CacheWriter {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl CacheWriter {
    /// Starts a writer with `threads` pool workers.
    pub fn new(threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                active: true,
                copies: VecDeque::new(),
                flushes: VecDeque::new(),
                num_copies: 0,
                num_flushes: 0,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
        });
        let workers = (0..threads.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();
        Self { shared, workers }
    }

    /// Writes a whole level to a single cache file.
    ///
    /// Returns once the header and shape table are on disk and the
    /// payload copies are scheduled; [`CacheWriter::flush`] waits for
    /// completion. An empty table writes nothing.
    pub fn save(&self, path: &Path, table: &ShapeTable) -> Result<(), StoreError> {
        let shapes: Vec<Shape> = table.shapes().collect();
        if table.is_empty() {
            return Ok(());
        }
        self.save_impl(path, table, &shapes)
    }

    /// Writes one shape bucket as its own cache file with a one-entry
    /// shape table. Used by split-cache mode after a bucket completes.
    pub fn save_shape(&self, path: &Path, table: &ShapeTable, shape: Shape) -> Result<(), StoreError> {
        self.save_impl(path, table, &[shape])
    }

    fn save_impl(&self, path: &Path, table: &ShapeTable, shapes: &[Shape]) -> Result<(), StoreError> {
        let n = table.n();
        let record = (n * POINT_DISK_BYTES) as u64;
        let counts: Vec<u64> = shapes
            .iter()
            .map(|&shape| table.bucket(shape).map_or(0, |bucket| bucket.len()))
            .collect();
        let total: u64 = counts.iter().sum();

        let target = Arc::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        );

        // Header and shape table, with cumulative payload offsets.
        let table_end = (HEADER_BYTES + shapes.len() * SHAPE_ENTRY_BYTES) as u64;
        let mut buf = BytesMut::with_capacity(table_end as usize);
        Header {
            n: n as u32,
            num_shapes: shapes.len() as u32,
            num_polycubes: total,
        }
        .encode(&mut buf);
        let mut offset = table_end;
        for (&shape, &count) in shapes.iter().zip(&counts) {
            let size = count * record;
            ShapeEntry {
                shape,
                offset,
                size,
            }
            .encode(&mut buf);
            offset += size;
        }
        target.write_all_at(&buf, 0)?;
        let file_end = offset;

        // Payload: one whole-file copy job per non-empty shard.
        let mut jobs = Vec::new();
        let mut put = table_end;
        for &shape in shapes {
            let Some(bucket) = table.bucket(shape) else {
                continue;
            };
            for shard in bucket.shards() {
                let members = shard.len();
                if members == 0 {
                    continue;
                }
                if let Some((src, src_path)) = shard.storage().file_handle() {
                    jobs.push(CopyJob {
                        src,
                        src_path,
                        len: members * record,
                        dest_offset: put,
                        target: Arc::clone(&target),
                    });
                }
                put += members * record;
            }
        }

        let scheduled = jobs.len();
        {
            let mut state = self.shared.state.lock();
            for job in jobs {
                state.copies.push_back(job);
                state.num_copies += 1;
            }
            self.shared.work.notify_all();

            // Bounded backpressure: do not let the queue outrun the pool.
            while state.num_copies > self.workers.len() {
                self.shared.done.wait(&mut state);
            }

            state.flushes.push_back(FlushJob {
                target,
                end: file_end,
                path: path.to_path_buf(),
            });
            state.num_flushes += 1;
            self.shared.work.notify_all();
        }

        info!(
            path = %path.display(),
            cubes = total,
            copy_jobs = scheduled,
            "scheduled cache save"
        );
        Ok(())
    }

    /// Blocks until every scheduled copy and flush has completed.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock();
        while state.num_copies > 0 || state.num_flushes > 0 {
            self.shared.done.wait(&mut state);
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        self.flush();
        {
            let mut state = self.shared.state.lock();
            state.active = false;
        }
        self.shared.work.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.copies.pop_front() {
            drop(state);
            run_copy(job);
            state = shared.state.lock();
            state.num_copies -= 1;
            shared.done.notify_all();
            continue;
        }
        // Flushes finalise the target file; hold them back until no copy
        // into it can still be queued or running.
        if state.num_copies == 0 {
            if let Some(job) = state.flushes.pop_front() {
                drop(state);
                run_flush(job);
                state = shared.state.lock();
                state.num_flushes -= 1;
                shared.done.notify_all();
                continue;
            }
        }
        if !state.active {
            break;
        }
        shared.work.wait(&mut state);
    }
}

fn run_copy(job: CopyJob) {
    if let Err(e) = copy_payload(&job) {
        error!(
            src = %job.src_path.display(),
            error = %e,
            "cache copy failed"
        );
        // Partial cache output is unusable; batch runs stop here.
        std::process::exit(1);
    }
    match std::fs::remove_file(&job.src_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(
            path = %job.src_path.display(),
            error = %e,
            "failed to remove copied storage file"
        ),
    }
}

fn copy_payload(job: &CopyJob) -> io::Result<()> {
    let mut buf = vec![0u8; COPY_CHUNK.min(job.len as usize)];
    let mut moved = 0u64;
    while moved < job.len {
        let take = buf.len().min((job.len - moved) as usize);
        job.src.read_exact_at(&mut buf[..take], moved)?;
        job.target.write_all_at(&buf[..take], job.dest_offset + moved)?;
        moved += take as u64;
    }
    Ok(())
}

fn run_flush(job: FlushJob) {
    let finalize = || -> io::Result<()> {
        job.target.set_len(job.end)?;
        job.target.sync_all()
    };
    if let Err(e) = finalize() {
        error!(path = %job.path.display(), error = %e, "cache flush failed");
        std::process::exit(1);
    }
    debug!(path = %job.path.display(), bytes = job.end, "cache file finalised");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::CacheReader;
    use polycube_core::{Cube, Point};
    use tempfile::TempDir;

    fn cube(pts: &[(i8, i8, i8)]) -> Cube {
        let mut c = Cube::from_points(pts.iter().map(|&(x, y, z)| Point::new(x, y, z)));
        c.sort();
        c
    }

    #[test]
    fn test_save_then_read_back() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(3, dir.path()).unwrap();
        let straight = cube(&[(0, 0, 0), (0, 0, 1), (0, 0, 2)]);
        let bent = cube(&[(0, 0, 0), (0, 0, 1), (0, 1, 1)]);
        table.insert(&straight, Shape::new(0, 0, 2)).unwrap();
        table.insert(&bent, Shape::new(0, 1, 1)).unwrap();

        let path = dir.path().join("cubes_3.bin");
        let writer = CacheWriter::new(2);
        writer.save(&path, &table).unwrap();
        writer.flush();

        let reader = CacheReader::open(&path).unwrap();
        assert_eq!(reader.n(), 3);
        assert_eq!(reader.total(), 2);
        assert_eq!(reader.num_shapes(), 2);

        let mut all = Vec::new();
        for i in 0..reader.num_shapes() {
            for c in reader.shape_cubes(i) {
                all.push(c.unwrap());
            }
        }
        all.sort();
        let mut expected = vec![straight, bent];
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_save_deletes_source_storage_files() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(2, dir.path()).unwrap();
        table
            .insert(&cube(&[(0, 0, 0), (0, 0, 1)]), Shape::new(0, 0, 1))
            .unwrap();
        let storage_path = table
            .bucket(Shape::new(0, 0, 1))
            .unwrap()
            .shards()
            .iter()
            .find_map(|shard| shard.storage().file_handle())
            .map(|(_, path)| path)
            .unwrap();
        assert!(storage_path.exists());

        let writer = CacheWriter::new(1);
        writer.save(&dir.path().join("cubes_2.bin"), &table).unwrap();
        writer.flush();
        assert!(!storage_path.exists());

        // Open handles keep the bucket readable after the unlink.
        let members: Vec<Cube> = table
            .bucket(Shape::new(0, 0, 1))
            .unwrap()
            .shards()
            .iter()
            .flat_map(|shard| shard.cubes())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(members, vec![cube(&[(0, 0, 0), (0, 0, 1)])]);
    }

    #[test]
    fn test_empty_table_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(3, dir.path()).unwrap();
        let path = dir.path().join("cubes_3.bin");
        let writer = CacheWriter::new(1);
        writer.save(&path, &table).unwrap();
        writer.flush();
        assert!(!path.exists());
    }

    #[test]
    fn test_save_shape_writes_single_entry_file() {
        let dir = TempDir::new().unwrap();
        let table = ShapeTable::new(3, dir.path()).unwrap();
        let bent = cube(&[(0, 0, 0), (0, 0, 1), (0, 1, 1)]);
        table.insert(&bent, Shape::new(0, 1, 1)).unwrap();

        let path = dir.path().join("cubes_3_0-1-1.bin");
        let writer = CacheWriter::new(1);
        writer.save_shape(&path, &table, Shape::new(0, 1, 1)).unwrap();
        writer.flush();

        let reader = CacheReader::open(&path).unwrap();
        assert_eq!(reader.num_shapes(), 1);
        assert_eq!(reader.total(), 1);
        assert_eq!(reader.entries()[0].shape, Shape::new(0, 1, 1));
        let members: Vec<Cube> = reader.shape_cubes(0).map(|r| r.unwrap()).collect();
        assert_eq!(members, vec![bent]);
    }
}
