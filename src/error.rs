use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that can happen while opening a database directory.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),

    #[error("hint error")]
    Hint(#[from] HintError),

    #[error("warm-up error")]
    WarmUp(#[from] WarmUpError),
}

/// Failures from appending a record to the active segment.
#[derive(Error, Debug)]
pub enum PutError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),
}

/// Failures from looking up a key.
#[derive(Error, Debug)]
pub enum GetError {
    #[error("key not found")]
    KeyNotFound,

    #[error("failed to open segment for read")]
    OpenSegmentFailed(#[source] SegmentError),

    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),
}

/// Failures from deleting a key.
#[derive(Error, Debug)]
pub enum DeleteError {
    #[error("key not found")]
    KeyNotFound,

    #[error("put error")]
    Put(#[from] PutError),
}

/// Failures from folding over every live key/value pair. Carries either an
/// error surfaced while reading a value back, or whatever error the
/// caller's own callback produced.
#[derive(Error, Debug)]
pub enum FoldError<E: std::fmt::Debug + std::fmt::Display> {
    #[error("get error: {0}")]
    Get(#[from] GetError),

    #[error("callback error: {0}")]
    Callback(E),
}

/// Failures from closing a database.
#[derive(Error, Debug)]
pub enum CloseError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),
}

/// Failures from opening, reading, or writing a single segment file.
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("IO error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("can't write to a read-only segment")]
    ReadOnly,
}

/// Failures from reading or writing a hint file.
#[derive(Error, Debug)]
pub enum HintError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),
}

/// Failures from rebuilding the key directory from data and hint files.
#[derive(Error, Debug)]
pub enum WarmUpError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),

    #[error("hint error")]
    Hint(#[from] HintError),

    #[error("checksum mismatch in {path}: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
}

/// Failures from a single merge (compaction) cycle. The merger logs these
/// and retries on the next tick; they never propagate to callers of
/// [`crate::Database`].
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("IO error")]
    Io(#[from] io::Error),

    #[error("segment error")]
    Segment(#[from] SegmentError),

    #[error("hint error")]
    Hint(#[from] HintError),

    #[error("warm-up error")]
    WarmUp(#[from] WarmUpError),

    /// Soft signal: fewer eligible closed segments than `MergeOption::min_files`.
    /// Not a real failure — the merger logs it at debug and waits for the
    /// next tick.
    #[error("not enough data files to merge")]
    NotEnoughDataFiles,
}
