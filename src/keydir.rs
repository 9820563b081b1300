//! The key directory (§4.4): an in-memory, concurrently-accessible index
//! from key to the location of its latest value on disk.

use dashmap::DashMap;

use crate::segment::SegmentId;

/// `(file_id, value_size, value_pos, timestamp)` — the location of one
/// key's latest value (§3 "Key directory entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeyDirEntry {
    pub file_id: SegmentId,
    pub value_size: u64,
    pub value_pos: u64,
    pub timestamp: u32,
}

/// Maps opaque byte keys to their latest [`KeyDirEntry`]. Backed by
/// [`DashMap`], which gives `get` the semantics of a read lock and
/// `set`/`delete`/`merge_from` the semantics of a write lock, sharded
/// internally so unrelated keys rarely contend.
#[derive(Default)]
pub(crate) struct KeyDir {
    entries: DashMap<Vec<u8>, KeyDirEntry>,
}

impl KeyDir {
    pub fn new() -> KeyDir {
        KeyDir::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.entries.get(key).map(|e| *e.value())
    }

    /// Last-writer-wins: no timestamp comparison here. Callers (the active
    /// writer and the merger) are responsible for never calling `set` with
    /// a regressing timestamp for the same key (§4.4).
    pub fn set(&self, key: Vec<u8>, entry: KeyDirEntry) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn snapshot_keys(&self) -> Vec<Vec<u8>> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn snapshot_entries(&self) -> Vec<(Vec<u8>, KeyDirEntry)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Unconditionally overwrites every `(key, entry)` from `other` into
    /// `self`. The caller guarantees `other` only holds entries whose
    /// pointed-at storage is already durable (§4.4).
    pub fn merge_from(&self, other: &KeyDir) {
        for e in other.entries.iter() {
            self.entries.insert(e.key().clone(), *e.value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file_id: u64, pos: u64, ts: u32) -> KeyDirEntry {
        KeyDirEntry {
            file_id: SegmentId(file_id),
            value_size: 4,
            value_pos: pos,
            timestamp: ts,
        }
    }

    #[test]
    fn set_then_get() {
        let kd = KeyDir::new();
        kd.set(b"k".to_vec(), entry(0, 20, 1));
        assert_eq!(kd.get(b"k"), Some(entry(0, 20, 1)));
    }

    #[test]
    fn set_overwrites_without_comparing_timestamps() {
        let kd = KeyDir::new();
        kd.set(b"k".to_vec(), entry(0, 20, 100));
        kd.set(b"k".to_vec(), entry(0, 40, 1)); // "older" timestamp, still wins
        assert_eq!(kd.get(b"k"), Some(entry(0, 40, 1)));
    }

    #[test]
    fn delete_removes_and_returns_previous_entry() {
        let kd = KeyDir::new();
        kd.set(b"k".to_vec(), entry(0, 20, 1));
        assert_eq!(kd.delete(b"k"), Some(entry(0, 20, 1)));
        assert_eq!(kd.get(b"k"), None);
        assert_eq!(kd.delete(b"k"), None);
    }

    #[test]
    fn merge_from_overwrites_unconditionally() {
        let live = KeyDir::new();
        live.set(b"k".to_vec(), entry(0, 20, 1));

        let merged = KeyDir::new();
        merged.set(b"k".to_vec(), entry(3, 0, 1));

        live.merge_from(&merged);
        assert_eq!(live.get(b"k"), Some(entry(3, 0, 1)));
    }

    #[test]
    fn snapshot_keys_reflects_current_membership() {
        let kd = KeyDir::new();
        kd.set(b"a".to_vec(), entry(0, 0, 1));
        kd.set(b"b".to_vec(), entry(0, 10, 2));
        kd.delete(b"a");
        assert_eq!(kd.snapshot_keys(), vec![b"b".to_vec()]);
    }
}
