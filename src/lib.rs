//! An embedded, persistent key-value store built on the Bitcask
//! log-structured design: an append-only segmented log, an in-memory key
//! directory that points at each key's latest value, and a background
//! merger that reclaims space from obsolete records without blocking
//! readers or writers.
//!
//! A database directory is owned by exactly one [`Database`] instance for
//! the lifetime of that instance. There is no cross-process coordination
//! and no concurrent access from more than one [`Database`].

mod error;
mod hint;
mod ioutil;
mod keydir;
mod merger;
mod record;
mod segment;
mod warmup;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;

pub use error::{
    CloseError, DeleteError, FoldError, GetError, HintError, MergeError, OpenError, PutError,
    SegmentError, WarmUpError,
};
pub use merger::MergeOption;

use error::PutError as InternalPutError;
use keydir::KeyDir;
use merger::MergeHandle;
use segment::{Segment, SegmentId};

const DEFAULT_SEGMENT_SIZE: u64 = 128 * 1024 * 1024;

/// Configuration accepted by [`open`]. A plain struct with named fields and
/// defaults, in place of the functional-options builder the source used
/// (§9 "pattern re-architecture").
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory the database lives in. Must already exist; creating and
    /// listing directories is filesystem plumbing out of this crate's
    /// scope (§1).
    pub dir_name: PathBuf,
    /// Maximum size, in bytes, the active segment is allowed to reach
    /// before it's sealed and a successor is created (§4.6, invariant 4).
    pub segment_size: u64,
    /// Background compaction settings. `None` disables the merger entirely
    /// — useful for tests that want full control over on-disk layout.
    pub merge: Option<MergeOption>,
}

impl Options {
    pub fn new(dir_name: impl Into<PathBuf>) -> Options {
        Options {
            dir_name: dir_name.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            merge: None,
        }
    }
}

pub(crate) struct ActiveSegment {
    id: SegmentId,
    segment: Segment,
}

impl ActiveSegment {
    pub(crate) fn id(&self) -> SegmentId {
        self.id
    }
}

/// State shared between the [`Database`] handle and the background merger
/// task. Cloned (as an `Arc`) into the merger thread at spawn time.
pub(crate) struct SharedInner {
    pub(crate) dir: PathBuf,
    segment_size: u64,
    pub(crate) keydir: KeyDir,
    pub(crate) active: Mutex<ActiveSegment>,
    next_id: AtomicU64,
    /// Cache of opened read-only segment handles, keyed by segment id.
    /// Opening is lazy; entries are evicted when the merger retires a
    /// segment and dropped wholesale on close (§4.6).
    pub(crate) read_cache: DashMap<SegmentId, Arc<Segment>>,
}

pub(crate) type Shared = Arc<SharedInner>;

/// A live handle onto one Bitcask database directory.
pub struct Database {
    shared: Shared,
    merge_handle: Mutex<Option<MergeHandle>>,
}

/// Opens (or recovers) the database directory named by `options.dir_name`.
pub fn open(options: Options) -> Result<Database, OpenError> {
    let warm = warmup::warm_up(&options.dir_name)?;
    let active_segment = Segment::open_writable(&options.dir_name, warm.next_id)?;
    tracing::info!(next_id = %warm.next_id, live_keys = warm.keydir.len(), "database opened");

    let shared: Shared = Arc::new(SharedInner {
        dir: options.dir_name,
        segment_size: options.segment_size,
        keydir: warm.keydir,
        active: Mutex::new(ActiveSegment {
            id: warm.next_id,
            segment: active_segment,
        }),
        next_id: AtomicU64::new(warm.next_id.0 + 1),
        read_cache: DashMap::new(),
    });

    let merge_handle = options
        .merge
        .map(|opt| MergeHandle::spawn(shared.clone(), opt));

    Ok(Database {
        shared,
        merge_handle: Mutex::new(merge_handle),
    })
}

impl Database {
    /// Appends `(key, value)` as the current value of `key`, rolling the
    /// active segment over first if it has no room (§4.6 `put`).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), PutError> {
        self.put_internal(key, value)
    }

    fn put_internal(&self, key: &[u8], value: &[u8]) -> Result<(), InternalPutError> {
        let timestamp = now_truncated();
        let encoded = record::encode(timestamp, key, value);

        let mut active = self.shared.active.lock();
        let mut offset = active.segment.current_size()?;

        if offset + encoded.len() as u64 > self.shared.segment_size {
            self.roll_over(&mut active)?;
            offset = 0;
        }

        active.segment.write(offset, &encoded)?;
        let value_pos = record::value_pos(offset, key.len());
        self.shared.keydir.set(
            key.to_vec(),
            keydir::KeyDirEntry {
                file_id: active.id(),
                value_size: value.len() as u64,
                value_pos,
                timestamp,
            },
        );
        Ok(())
    }

    /// Seals the active segment and opens its successor. Called with the
    /// active-segment lock already held.
    fn roll_over(&self, active: &mut ActiveSegment) -> Result<(), InternalPutError> {
        active.segment.close()?;
        let next_id = SegmentId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(sealed = %active.id(), next = %next_id, "segment rolled over");
        active.segment = Segment::open_writable(&self.shared.dir, next_id)?;
        active.id = next_id;
        Ok(())
    }

    /// Looks up `key`'s current value.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, GetError> {
        let entry = self.shared.keydir.get(key).ok_or(GetError::KeyNotFound)?;
        let segment = self
            .segment_for_read(entry.file_id)
            .map_err(GetError::OpenSegmentFailed)?;
        Ok(segment.read(entry.value_pos, entry.value_size)?)
    }

    /// Returns the cached read-only handle for `id`, opening (and caching)
    /// one if absent. Per the merge-output naming rule in `DESIGN.md`, a
    /// segment id can be shadowed by a `.merge` file of the same id once a
    /// compaction round has published it — that path is tried first.
    fn segment_for_read(&self, id: SegmentId) -> Result<Arc<Segment>, SegmentError> {
        if let Some(segment) = self.shared.read_cache.get(&id) {
            return Ok(segment.clone());
        }

        let merge_path = id.merge_path(&self.shared.dir);
        let segment = if merge_path.exists() {
            Segment::open_readonly_at(merge_path, id)?
        } else {
            Segment::open_readonly_at(id.data_path(&self.shared.dir), id)?
        };
        let segment = Arc::new(segment);
        self.shared.read_cache.insert(id, segment.clone());
        Ok(segment)
    }

    /// Logically deletes `key`: appends a tombstone record, then removes it
    /// from the key directory (§4.6 `delete`).
    pub fn delete(&self, key: &[u8]) -> Result<(), DeleteError> {
        if self.shared.keydir.get(key).is_none() {
            return Err(DeleteError::KeyNotFound);
        }
        self.put_internal(key, record::TOMBSTONE)?;
        self.shared.keydir.delete(key);
        Ok(())
    }

    /// Snapshot of every live key, in no particular order.
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        self.shared.keydir.snapshot_keys()
    }

    /// Snapshots the current `(key, entry)` set and invokes `f` on each
    /// pair, stopping at the first error `f` returns (§4.6 `fold`). Each
    /// value is read through the `(file_id, value_pos, value_size)` pinned
    /// at snapshot time, not re-resolved against the live key directory —
    /// a concurrent `delete`/`put` of `k` after the snapshot is taken must
    /// not turn a completed snapshot member into a `KeyNotFound` partway
    /// through the fold.
    pub fn fold<E>(
        &self,
        mut f: impl FnMut(&[u8], &[u8]) -> Result<(), E>,
    ) -> Result<(), FoldError<E>>
    where
        E: std::fmt::Debug + std::fmt::Display,
    {
        for (key, entry) in self.shared.keydir.snapshot_entries() {
            let segment = self
                .segment_for_read(entry.file_id)
                .map_err(GetError::OpenSegmentFailed)?;
            let value = segment
                .read(entry.value_pos, entry.value_size)
                .map_err(GetError::from)?;
            f(&key, &value).map_err(FoldError::Callback)?;
        }
        Ok(())
    }

    /// Stops the merger (if running), drops cached read handles, and
    /// fsyncs the active segment. No further operations are valid on this
    /// handle afterward — enforced by consuming `self`.
    pub fn close(self) -> Result<(), CloseError> {
        if let Some(mut handle) = self.merge_handle.lock().take() {
            handle.stop();
        }
        self.shared.read_cache.clear();
        self.shared.active.lock().segment.close()?;
        Ok(())
    }
}

impl Drop for Database {
    /// Best-effort safety net: stops the merger thread so it doesn't
    /// outlive the handle if a caller forgets to call [`Database::close`].
    /// Does not fsync — that's what an explicit `close()` is for.
    fn drop(&mut self) {
        if let Some(mut handle) = self.merge_handle.lock().take() {
            handle.stop();
        }
    }
}

/// Wall-clock nanoseconds truncated to `u32` (§4.1, §9). Wraps roughly every
/// 4.29 seconds, so this is not a total order across restarts; warm-up
/// relies on file-id order instead (§9 "Open question — endianness").
fn now_truncated() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64;
    nanos as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let db = open(Options::new(dir.path())).unwrap();
        db.put(b"key1", b"val1").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), b"val1");
    }

    #[test]
    fn last_write_wins() {
        let dir = tempdir().unwrap();
        let db = open(Options::new(dir.path())).unwrap();
        db.put(b"key1", b"val1").unwrap();
        db.put(b"key1", b"val2").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), b"val2");
    }

    #[test]
    fn delete_hides_key() {
        let dir = tempdir().unwrap();
        let db = open(Options::new(dir.path())).unwrap();
        db.put(b"key1", b"val1").unwrap();
        db.delete(b"key1").unwrap();
        assert!(matches!(db.get(b"key1"), Err(GetError::KeyNotFound)));
        assert!(db.list_keys().is_empty());
    }

    #[test]
    fn delete_on_absent_key_fails() {
        let dir = tempdir().unwrap();
        let db = open(Options::new(dir.path())).unwrap();
        assert!(matches!(db.delete(b"nope"), Err(DeleteError::KeyNotFound)));
    }

    #[test]
    fn list_keys_reflects_puts_and_deletes() {
        let dir = tempdir().unwrap();
        let db = open(Options::new(dir.path())).unwrap();
        db.put(b"key1", b"val1").unwrap();
        db.put(b"key2", b"val2").unwrap();
        let mut keys = db.list_keys();
        keys.sort();
        assert_eq!(keys, vec![b"key1".to_vec(), b"key2".to_vec()]);
    }

    #[test]
    fn rollover_creates_multiple_segments_and_keeps_all_keys_readable() {
        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.segment_size = 64; // force frequent rollovers
        let db = open(options).unwrap();

        for i in 0..50 {
            db.put(format!("key{i}").as_bytes(), format!("val{i}").as_bytes())
                .unwrap();
        }
        for i in 0..50 {
            assert_eq!(
                db.get(format!("key{i}").as_bytes()).unwrap(),
                format!("val{i}").as_bytes()
            );
        }

        let data_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "data").unwrap_or(false))
            .collect();
        assert!(data_files.len() > 1);
    }

    #[test]
    fn reopen_after_close_recovers_all_values() {
        let dir = tempdir().unwrap();
        {
            let db = open(Options::new(dir.path())).unwrap();
            for i in 0..20 {
                db.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())
                    .unwrap();
            }
            db.close().unwrap();
        }

        let db = open(Options::new(dir.path())).unwrap();
        for i in 0..20 {
            assert_eq!(
                db.get(format!("k{i}").as_bytes()).unwrap(),
                format!("v{i}").as_bytes()
            );
        }
    }

    #[test]
    fn fold_visits_every_live_pair() {
        let dir = tempdir().unwrap();
        let db = open(Options::new(dir.path())).unwrap();
        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.delete(b"a").unwrap();

        let mut seen = Vec::new();
        db.fold::<std::convert::Infallible>(|k, v| {
            seen.push((k.to_vec(), v.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(b"b".to_vec(), b"2".to_vec())]);
    }
}
