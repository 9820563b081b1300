//! Hint files (§4.3): a compact per-segment index with no values and no
//! checksums, written once at the end of a merge cycle and streamed back in
//! during warm-up.

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::HintError;
use crate::ioutil::read_exact_or_eof;

const HEADER_LEN: usize = 4 + 4 + 8 + 8; // timestamp, key_size, value_size, value_pos

/// One entry read back out of a hint file. `file_id` isn't stored here — the
/// caller supplies it from the hint's own filename (§4.3).
pub(crate) struct HintEntry {
    pub timestamp: u32,
    pub value_size: u64,
    pub value_pos: u64,
    pub key: Vec<u8>,
}

/// Writes a hint file at `path` from an iterator of `(key, timestamp,
/// value_size, value_pos)` tuples.
pub(crate) fn write(
    path: &Path,
    entries: impl Iterator<Item = (Vec<u8>, u32, u64, u64)>,
) -> Result<(), HintError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);

    for (key, timestamp, value_size, value_pos) in entries {
        writer.write_all(&timestamp.to_le_bytes())?;
        writer.write_all(&(key.len() as u32).to_le_bytes())?;
        writer.write_all(&value_size.to_le_bytes())?;
        writer.write_all(&value_pos.to_le_bytes())?;
        writer.write_all(&key)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Streams every entry out of the hint file at `path`. EOF is implicit:
/// reading stops cleanly when no more bytes remain.
pub(crate) fn read(path: &Path) -> Result<Vec<HintEntry>, HintError> {
    let file = OpenOptions::new().read(true).open(path)?;
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();

    loop {
        let mut header = [0u8; HEADER_LEN];
        if !read_exact_or_eof(&mut reader, &mut header)? {
            break;
        }
        let timestamp = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let key_size = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let value_size = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let value_pos = u64::from_le_bytes(header[16..24].try_into().unwrap());

        let mut key = vec![0u8; key_size as usize];
        reader.read_exact(&mut key)?;

        entries.push(HintEntry {
            timestamp,
            value_size,
            value_pos,
            key,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.hint");
        let entries = vec![
            (b"k1".to_vec(), 10u32, 3u64, 20u64),
            (b"k2".to_vec(), 11u32, 5u64, 30u64),
        ];
        write(&path, entries.into_iter()).unwrap();

        let read_back = read(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].key, b"k1");
        assert_eq!(read_back[0].timestamp, 10);
        assert_eq!(read_back[0].value_size, 3);
        assert_eq!(read_back[0].value_pos, 20);
        assert_eq!(read_back[1].key, b"k2");
    }

    #[test]
    fn empty_hint_file_yields_no_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.hint");
        write(&path, std::iter::empty()).unwrap();
        assert!(read(&path).unwrap().is_empty());
    }
}
