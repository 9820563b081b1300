//! Warm-up (§4.5): rebuilding the key directory from whatever a directory
//! holds when the database is opened — hint files first (fast path), then
//! any data file that has no sibling hint (slow path).

use std::collections::BTreeSet;
use std::fs::{read_dir, File};
use std::io::BufReader;
use std::path::Path;

use crate::error::WarmUpError;
use crate::hint;
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::record;
use crate::segment::SegmentId;

pub(crate) struct WarmUpResult {
    pub keydir: KeyDir,
    /// One past the highest segment id found on disk (0 if the directory
    /// was empty) — the id the caller should open as the fresh active
    /// segment.
    pub next_id: SegmentId,
}

pub(crate) fn warm_up(dir: &Path) -> Result<WarmUpResult, WarmUpError> {
    let mut data_ids = BTreeSet::new();
    let mut hint_ids = BTreeSet::new();

    for entry in read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = SegmentId::parse_with_suffix(name, ".data") {
            data_ids.insert(id);
        } else if let Some(id) = SegmentId::parse_with_suffix(name, ".hint") {
            hint_ids.insert(id);
        }
    }

    let highest_id = data_ids.iter().chain(hint_ids.iter()).max().copied();
    let next_id = highest_id.map_or(SegmentId(0), SegmentId::next);

    let keydir = KeyDir::new();

    // Ascending id order for both passes preserves last-writer-wins.
    for id in &hint_ids {
        warm_up_from_hint(dir, *id, &keydir)?;
    }
    for id in data_ids.iter().filter(|id| !hint_ids.contains(id)) {
        warm_up_from_data_file(dir, *id, &keydir)?;
    }

    Ok(WarmUpResult { keydir, next_id })
}

fn warm_up_from_hint(dir: &Path, id: SegmentId, keydir: &KeyDir) -> Result<(), WarmUpError> {
    let path = id.hint_path(dir);
    let entries = hint::read(&path)?;

    let from_hint = KeyDir::new();
    for e in entries {
        from_hint.set(
            e.key,
            KeyDirEntry {
                file_id: id,
                value_size: e.value_size,
                value_pos: e.value_pos,
                timestamp: e.timestamp,
            },
        );
    }
    keydir.merge_from(&from_hint);
    Ok(())
}

fn warm_up_from_data_file(dir: &Path, id: SegmentId, keydir: &KeyDir) -> Result<(), WarmUpError> {
    let path = id.data_path(dir);
    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);
    let mut offset = 0u64;

    while let Some(decoded) = record::decode_from_reader(&mut reader)? {
        if !decoded.checksum_valid() {
            let (expected, found) = decoded.checksums();
            return Err(WarmUpError::ChecksumMismatch {
                path,
                expected,
                found,
            });
        }

        if record::is_tombstone(&decoded.value) {
            keydir.delete(&decoded.key);
        } else {
            let value_pos = record::value_pos(offset, decoded.key.len());
            keydir.set(
                decoded.key.clone(),
                KeyDirEntry {
                    file_id: id,
                    value_size: decoded.value.len() as u64,
                    value_pos,
                    timestamp: decoded.timestamp,
                },
            );
        }
        offset += decoded.record_len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_records(path: &std::path::Path, records: &[(u32, &[u8], &[u8])]) {
        use std::io::Write;
        let mut file = std::fs::File::create(path).unwrap();
        for (ts, k, v) in records {
            file.write_all(&record::encode(*ts, k, v)).unwrap();
        }
    }

    #[test]
    fn warms_up_from_unhinted_data_file() {
        let dir = tempdir().unwrap();
        write_records(
            &SegmentId(0).data_path(dir.path()),
            &[(1, b"a", b"1"), (2, b"b", b"2"), (3, b"a", b"1updated")],
        );

        let result = warm_up(dir.path()).unwrap();
        assert_eq!(result.next_id, SegmentId(1));
        let a = result.keydir.get(b"a").unwrap();
        assert_eq!(a.value_size, 8);
        assert_eq!(a.timestamp, 3);
        assert!(result.keydir.get(b"b").is_some());
    }

    #[test]
    fn tombstone_removes_key_during_warm_up() {
        let dir = tempdir().unwrap();
        write_records(
            &SegmentId(0).data_path(dir.path()),
            &[(1, b"a", b"1"), (2, b"a", record::TOMBSTONE)],
        );

        let result = warm_up(dir.path()).unwrap();
        assert!(result.keydir.get(b"a").is_none());
    }

    #[test]
    fn hinted_data_file_is_skipped_in_favor_of_hint() {
        let dir = tempdir().unwrap();
        let id = SegmentId(0);
        write_records(&id.data_path(dir.path()), &[(1, b"a", b"should-not-be-read")]);
        hint::write(
            &id.hint_path(dir.path()),
            std::iter::once((b"a".to_vec(), 1u32, 3u64, 20u64)),
        )
        .unwrap();

        let result = warm_up(dir.path()).unwrap();
        let a = result.keydir.get(b"a").unwrap();
        assert_eq!(a.value_size, 3);
        assert_eq!(a.value_pos, 20);
    }

    #[test]
    fn next_id_is_one_past_highest_segment() {
        let dir = tempdir().unwrap();
        write_records(&SegmentId(0).data_path(dir.path()), &[(1, b"a", b"1")]);
        write_records(&SegmentId(1).data_path(dir.path()), &[(2, b"b", b"2")]);
        let result = warm_up(dir.path()).unwrap();
        assert_eq!(result.next_id, SegmentId(2));
    }

    #[test]
    fn empty_directory_starts_at_segment_zero() {
        let dir = tempdir().unwrap();
        let result = warm_up(dir.path()).unwrap();
        assert_eq!(result.next_id, SegmentId(0));
        assert_eq!(result.keydir.len(), 0);
    }
}
