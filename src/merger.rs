//! The background merger (§4.7): periodically compacts closed segments into
//! one merged segment plus hint file, publishes the new locations into the
//! live key directory, and retires the inputs.

use std::collections::{BTreeSet, HashMap};
use std::fs::{read_dir, remove_file, File};
use std::io::BufReader;
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

use crate::error::MergeError;
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::record;
use crate::segment::{Segment, SegmentId};
use crate::Shared;

/// `MergeOption` (§6): how often the merger wakes, and the minimum number of
/// eligible closed segments it requires before it bothers running a cycle.
#[derive(Debug, Clone, Copy)]
pub struct MergeOption {
    pub interval: Duration,
    /// `0` means unlimited (always run, even for a single eligible file).
    pub min_files: u32,
}

impl Default for MergeOption {
    fn default() -> MergeOption {
        MergeOption {
            interval: Duration::from_secs(60),
            min_files: 0,
        }
    }
}

/// A join handle plus stop channel for the background merge task (§5
/// "cancellation/shutdown", §9 "background goroutine + channel shutdown").
pub(crate) struct MergeHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MergeHandle {
    pub fn spawn(shared: Shared, option: MergeOption) -> MergeHandle {
        let (stop_tx, stop_rx) = bounded(0);
        let thread = thread::spawn(move || run(shared, option, stop_rx));
        MergeHandle {
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Closes the stop channel and waits for the current cycle to finish.
    /// Cycles are not interruptible mid-step (§4.7 state machine).
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Shared, option: MergeOption, stop_rx: Receiver<()>) {
    let ticker = tick(option.interval);
    loop {
        select! {
            recv(stop_rx) -> _ => {
                tracing::debug!("merger stopped");
                return;
            }
            recv(ticker) -> _ => {
                match run_cycle(&shared, option.min_files) {
                    Ok(summary) => tracing::info!(
                        merged_id = %summary.merged_id,
                        inputs = summary.input_count,
                        live_keys = summary.live_keys,
                        "merge cycle completed"
                    ),
                    Err(MergeError::NotEnoughDataFiles) => {
                        tracing::debug!("merge cycle skipped: not enough data files");
                    }
                    Err(e) => tracing::error!(error = %e, "merge cycle failed"),
                }
            }
        }
    }
}

struct MergeSummary {
    merged_id: SegmentId,
    input_count: usize,
    live_keys: usize,
}

/// Runs one merge cycle to completion. Returns `Err(NotEnoughDataFiles)` as
/// a soft "nothing to do" signal; any other error is a genuine I/O failure
/// and the cycle is abandoned for this tick (§7 hardened policy — log and
/// retry next interval, rather than the source prototype's process abort).
fn run_cycle(shared: &Shared, min_files: u32) -> Result<MergeSummary, MergeError> {
    let active_id = shared.active.lock().id();
    let inputs = select_inputs(&shared.dir, active_id)?;

    if min_files > 0 && (inputs.len() as u32) < min_files {
        return Err(MergeError::NotEnoughDataFiles);
    }
    if inputs.is_empty() {
        return Err(MergeError::NotEnoughDataFiles);
    }

    let coalesced = coalesce(&shared.dir, &inputs)?;
    let highest_input = *inputs.iter().max().unwrap();

    let mut ordered: Vec<_> = coalesced.into_iter().collect();
    ordered.sort_by_key(|(_, entry)| entry.0);

    let merge_path = highest_input.merge_path(&shared.dir);
    write_merged_segment(&merge_path, highest_input, &ordered)?;

    let fresh = rebuild_keydir_from_merge(&merge_path, highest_input)?;

    let hint_path = highest_input.hint_path(&shared.dir);
    hint::write_from_keydir(&hint_path, &fresh)?;

    let live_keys = fresh.len();
    shared.keydir.merge_from(&fresh);

    for id in &inputs {
        let path = id.data_path(&shared.dir);
        if let Err(e) = remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        shared.read_cache.remove(id);
    }

    Ok(MergeSummary {
        merged_id: highest_input,
        input_count: inputs.len(),
        live_keys,
    })
}

/// Lists the directory, drops the active segment and anything already
/// hinted, and returns the remaining `.data` ids — the eligible inputs for
/// this cycle (§4.7 step 1).
fn select_inputs(dir: &Path, active_id: SegmentId) -> Result<Vec<SegmentId>, MergeError> {
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

    Ok(data_ids
        .into_iter()
        .filter(|id| *id != active_id && !hint_ids.contains(id))
        .collect())
}

/// Streams every input file in ascending id order, keeping only the last
/// record seen per key and dropping tombstones (§4.7 step 2).
fn coalesce(
    dir: &Path,
    inputs: &[SegmentId],
) -> Result<HashMap<Vec<u8>, (u32, Vec<u8>)>, MergeError> {
    let mut coalesced: HashMap<Vec<u8>, (u32, Vec<u8>)> = HashMap::new();

    for id in inputs {
        let path = id.data_path(dir);
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        while let Some(decoded) = record::decode_from_reader(&mut reader)? {
            if !decoded.checksum_valid() {
                let (expected, found) = decoded.checksums();
                return Err(crate::error::WarmUpError::ChecksumMismatch {
                    path: path.clone(),
                    expected,
                    found,
                }
                .into());
            }
            if record::is_tombstone(&decoded.value) {
                coalesced.remove(&decoded.key);
            } else {
                coalesced.insert(decoded.key, (decoded.timestamp, decoded.value));
            }
        }
    }
    Ok(coalesced)
}

/// Appends every surviving record, ordered by ascending timestamp, to a
/// fresh `.merge` file (§4.7 steps 3-4). Written through the same
/// [`Segment`] type the active writer and cached readers use, in its
/// merge-output mode (§4.2, `Segment::create`).
fn write_merged_segment(
    path: &Path,
    id: SegmentId,
    ordered: &[(Vec<u8>, (u32, Vec<u8>))],
) -> Result<(), MergeError> {
    let segment = Segment::create(path.to_path_buf(), id)?;
    let mut offset = 0u64;
    for (key, (timestamp, value)) in ordered {
        let encoded = record::encode(*timestamp, key, value);
        segment.write(offset, &encoded)?;
        offset += encoded.len() as u64;
    }
    segment.close()?;
    Ok(())
}

/// Re-scans the just-written merge file to recover each surviving record's
/// byte offset, then builds the key directory that both the hint file and
/// the live publish step need (§4.7 step 5).
fn rebuild_keydir_from_merge(
    merge_path: &Path,
    merged_id: SegmentId,
) -> Result<KeyDir, MergeError> {
    let file = File::open(merge_path)?;
    let mut reader = BufReader::new(file);
    let fresh = KeyDir::new();
    let mut offset = 0u64;

    while let Some(decoded) = record::decode_from_reader(&mut reader)? {
        let value_pos = record::value_pos(offset, decoded.key.len());
        fresh.set(
            decoded.key.clone(),
            KeyDirEntry {
                file_id: merged_id,
                value_size: decoded.value.len() as u64,
                value_pos,
                timestamp: decoded.timestamp,
            },
        );
        offset += decoded.record_len;
    }
    Ok(fresh)
}

mod hint {
    use super::*;

    /// Writes a hint file from a live key directory's current entries for
    /// `merged_id`.
    pub(super) fn write_from_keydir(path: &Path, keydir: &KeyDir) -> Result<(), MergeError> {
        let entries = keydir
            .snapshot_entries()
            .into_iter()
            .map(|(key, entry)| (key, entry.timestamp, entry.value_size, entry.value_pos));
        crate::hint::write(path, entries)?;
        Ok(())
    }
}
