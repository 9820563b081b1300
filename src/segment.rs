//! Segment files (§4.2): one append-only data file per id, opened either
//! writable (the single active segment) or read-only (everything else, plus
//! the merger's `.merge` output while it's being built).

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::SegmentError;

const ID_WIDTH: usize = 6;

/// A segment's numeric id, encoded as a zero-padded 6-digit filename prefix.
/// Ids increase monotonically; lexicographic sort of the padded names
/// matches numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = ID_WIDTH)
    }
}

impl SegmentId {
    pub fn data_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{self}.data"))
    }

    pub fn hint_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{self}.hint"))
    }

    pub fn merge_path(self, dir: &Path) -> PathBuf {
        dir.join(format!("{self}.merge"))
    }

    pub fn next(self) -> SegmentId {
        SegmentId(self.0 + 1)
    }

    /// Parses a `NNNNNN.data` filename back into its id. Returns `None` for
    /// anything that isn't a plain base-10 integer stem — such names are
    /// skipped during warm-up and merge scanning rather than treated as a
    /// hard error.
    pub fn parse_with_suffix(name: &str, suffix: &str) -> Option<SegmentId> {
        name.strip_suffix(suffix)
            .and_then(|stem| stem.parse().ok())
            .map(SegmentId)
    }
}

/// A single segment file, either the writable active segment or a read-only
/// handle onto a closed one (or a merge-in-progress output).
pub(crate) struct Segment {
    id: SegmentId,
    path: PathBuf,
    file: File,
    writable: bool,
}

impl Segment {
    /// Opens (creating if absent) the active data file for `id`, writable.
    pub fn open_writable(dir: &Path, id: SegmentId) -> Result<Segment, SegmentError> {
        let path = id.data_path(dir);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SegmentError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Segment {
            id,
            path,
            file,
            writable: true,
        })
    }

    /// Opens an arbitrary path read-only. Used both for closed `.data`
    /// segments and for hint-building reads of an in-progress `.merge` file.
    pub fn open_readonly_at(path: PathBuf, id: SegmentId) -> Result<Segment, SegmentError> {
        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|source| SegmentError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Segment {
            id,
            path,
            file,
            writable: false,
        })
    }

    /// Creates a brand-new file for writing, truncating if one already
    /// exists. Used for `.merge` output files.
    pub fn create(path: PathBuf, id: SegmentId) -> Result<Segment, SegmentError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SegmentError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Segment {
            id,
            path,
            file,
            writable: true,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Positional read of exactly `len` bytes at `offset`.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, SegmentError> {
        let mut buf = vec![0u8; len as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|source| SegmentError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(buf)
    }

    /// Positional write of the full buffer. Never interleaved with another
    /// writer for the same segment — callers serialize active-segment
    /// appends (see [`crate::Database`]).
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<(), SegmentError> {
        if !self.writable {
            return Err(SegmentError::ReadOnly);
        }
        self.file
            .write_all_at(bytes, offset)
            .map_err(|source| SegmentError::Io {
                path: self.path.clone(),
                source,
            })
    }

    pub fn current_size(&self) -> Result<u64, SegmentError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|source| SegmentError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Flushes OS buffers and closes the handle.
    pub fn close(&self) -> Result<(), SegmentError> {
        self.file.sync_all().map_err(|source| SegmentError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
