//! The on-disk record layout (§4.1): a fixed 20-byte header followed by
//! the key and value payload, little-endian throughout, checksummed with
//! CRC-32/IEEE over everything past the checksum field itself.

use std::io::{self, Read};

use crate::ioutil::read_exact_or_eof;

pub(crate) const HEADER_LEN: usize = 20;

/// Sentinel value marking a logical deletion (§6). A user value that happens
/// to equal this string is indistinguishable from a tombstone — a documented
/// limitation, not a bug.
pub(crate) const TOMBSTONE: &[u8] = b"bItcA5k_49c266f9-1d18-41da-ab36-092da88e982a";

pub(crate) fn is_tombstone(value: &[u8]) -> bool {
    value == TOMBSTONE
}

/// A record read back from a data file, together with the checksum the
/// reader computed for it. Callers decide what to do about a mismatch —
/// warm-up treats it as fatal, the merger treats it the same way since it
/// reads through the same data files.
pub(crate) struct Decoded {
    pub timestamp: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Total length of the record on disk, `20 + key.len() + value.len()`.
    pub record_len: u64,
    stored_checksum: u32,
    computed_checksum: u32,
}

impl Decoded {
    pub fn checksum_valid(&self) -> bool {
        self.stored_checksum == self.computed_checksum
    }

    /// `(stored, computed)` — for building a `ChecksumMismatch` error.
    pub fn checksums(&self) -> (u32, u32) {
        (self.stored_checksum, self.computed_checksum)
    }
}

/// Encodes `(timestamp, key, value)` as a complete record, checksum included.
pub(crate) fn encode(timestamp: u32, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + key.len() + value.len());
    buf.extend_from_slice(&0u32.to_le_bytes()); // checksum placeholder
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let checksum = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// Reads one record from `reader`. Returns `Ok(None)` at a clean end of
/// stream (no bytes read for the next header) — the normal way a segment
/// scan terminates.
pub(crate) fn decode_from_reader<R: Read>(reader: &mut R) -> io::Result<Option<Decoded>> {
    let mut header = [0u8; HEADER_LEN];
    if !read_exact_or_eof(reader, &mut header)? {
        return Ok(None);
    }

    let stored_checksum = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let timestamp = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let key_size = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let value_size = u64::from_le_bytes(header[12..20].try_into().unwrap());

    let mut key = vec![0u8; key_size as usize];
    reader.read_exact(&mut key)?;
    let mut value = vec![0u8; value_size as usize];
    reader.read_exact(&mut value)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[4..]);
    hasher.update(&key);
    hasher.update(&value);
    let computed_checksum = hasher.finalize();

    let record_len = HEADER_LEN as u64 + key_size as u64 + value_size;
    Ok(Some(Decoded {
        timestamp,
        key,
        value,
        record_len,
        stored_checksum,
        computed_checksum,
    }))
}

/// Byte offset of the value within a record, given the offset of the
/// record's start and the key's length (§4.1 "value_pos derivation").
pub(crate) fn value_pos(record_start: u64, key_len: usize) -> u64 {
    record_start + HEADER_LEN as u64 + key_len as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_key_and_value() {
        let encoded = encode(123, b"key1", b"val1");
        let decoded = decode_from_reader(&mut &encoded[..]).unwrap().unwrap();
        assert_eq!(decoded.timestamp, 123);
        assert_eq!(decoded.key, b"key1");
        assert_eq!(decoded.value, b"val1");
        assert!(decoded.checksum_valid());
    }

    #[test]
    fn nonzero_checksum() {
        let encoded = encode(1, b"k", b"v");
        assert_ne!(u32::from_le_bytes(encoded[0..4].try_into().unwrap()), 0);
    }

    #[test]
    fn detects_bitflip() {
        let mut encoded = encode(1, b"k", b"v");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let decoded = decode_from_reader(&mut &encoded[..]).unwrap().unwrap();
        assert!(!decoded.checksum_valid());
    }

    #[test]
    fn empty_stream_is_clean_eof() {
        let empty: [u8; 0] = [];
        assert!(decode_from_reader(&mut &empty[..]).unwrap().is_none());
    }

    #[test]
    fn value_pos_accounts_for_header_and_key() {
        assert_eq!(value_pos(100, 4), 124);
    }

    #[test]
    fn tombstone_recognized() {
        assert!(is_tombstone(TOMBSTONE));
        assert!(!is_tombstone(b"regular value"));
    }
}
