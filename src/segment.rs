//! Segment file I/O: naming, sequential load, and ack scatter.
//!
//! A segment file is an append-only stream of the records in
//! [`crate::records`], covering one fixed range of sequence ids. The
//! tri-state of an entry (published / delivered / acked) is realised by
//! writing deliver-only records twice: the first occurrence for a relative
//! sequence marks delivery, the second marks acknowledgment. Acks must
//! therefore be appended to the segment before the segment can be said to
//! contain them; that append is the journal "scatter" step.

use crate::error::IndexResult;
use crate::formats::{SEGMENT_ENTRY_COUNT, SEGMENT_EXTENSION};
use crate::records::{decode_segment_record, encode_deliver, SegmentDecode, SegmentRecord};
use crate::storage::Directory;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// File name of segment `seg_num` (`<segnum>.idx`).
pub fn segment_file_name(seg_num: u64) -> String {
    format!("{seg_num}{SEGMENT_EXTENSION}")
}

/// Parse a directory entry back into a segment number.
///
/// Returns `None` for anything that is not a well-formed segment file name
/// (the ack journal lives in the same directory).
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(SEGMENT_EXTENSION)?.parse::<u64>().ok()
}

/// Path of segment `seg_num` within `queue_dir`.
pub fn segment_path(queue_dir: &str, seg_num: u64) -> String {
    format!("{queue_dir}/{}", segment_file_name(seg_num))
}

/// One live entry in a loaded segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Opaque 16-byte message id.
    pub msg_id: [u8; crate::formats::MSG_ID_BYTES],
    /// Whether the message must survive a broker restart.
    pub persistent: bool,
    /// Whether the message has been handed to a consumer.
    pub delivered: bool,
}

/// The in-memory materialisation of one segment file.
///
/// Transient by design: built on demand, dropped on return. Entries are
/// keyed by relative sequence, so iteration is ascending.
#[derive(Debug, Default)]
pub struct LoadedSegment {
    /// Live (un-acked) entries by relative sequence.
    pub entries: BTreeMap<u16, SegmentEntry>,
    /// Number of acks recorded in the file (plus any applied journal acks).
    pub ack_count: u64,
    /// Highest relative sequence seen in a publish record, acked or not.
    pub high_rel_seq: Option<u16>,
    /// Byte offset where valid records end, if the file has a torn tail.
    ///
    /// Recovery truncates the file here before appending to it; appends
    /// after torn bytes would be unreachable to every later scan.
    pub torn_at: Option<u64>,
}

/// Read and interpret one segment file.
///
/// A missing file is an empty segment (recovery-safe: fully-acked segments
/// are deleted eagerly). A torn record at the tail ends the scan at the
/// truncation point. `journal_acks`, when given, is applied after the scan:
/// every listed relative sequence still live in the map is removed and
/// counted as acked; sequences already gone are skipped, which is the
/// dedup the flush and recovery paths rely on.
pub fn load_segment(
    dir: &dyn Directory,
    seg_num: u64,
    path: &str,
    journal_acks: Option<&BTreeSet<u16>>,
) -> IndexResult<LoadedSegment> {
    let mut loaded = LoadedSegment::default();
    if !dir.exists(path) {
        return Ok(loaded);
    }

    let mut reader = dir.open_file(path)?;
    let mut offset = 0u64;
    loop {
        let record = match decode_segment_record(&mut reader)? {
            SegmentDecode::Record(record) => record,
            SegmentDecode::Eof => break,
            SegmentDecode::Torn => {
                loaded.torn_at = Some(offset);
                break;
            }
        };
        offset += record.encoded_len();
        match record {
            SegmentRecord::Publish {
                rel_seq,
                msg_id,
                persistent,
            } => {
                loaded.entries.insert(
                    rel_seq,
                    SegmentEntry {
                        msg_id,
                        persistent,
                        delivered: false,
                    },
                );
                loaded.high_rel_seq = Some(loaded.high_rel_seq.map_or(rel_seq, |h| h.max(rel_seq)));
            }
            SegmentRecord::Deliver { rel_seq } => match loaded.entries.get_mut(&rel_seq) {
                Some(entry) if !entry.delivered => entry.delivered = true,
                Some(_) => {
                    loaded.entries.remove(&rel_seq);
                    loaded.ack_count += 1;
                }
                None => {
                    tracing::warn!(
                        segment = seg_num,
                        rel_seq,
                        "skipping deliver record with no matching publish"
                    );
                }
            },
        }
    }

    if let Some(acks) = journal_acks {
        for rel_seq in acks {
            if loaded.entries.remove(rel_seq).is_some() {
                loaded.ack_count += 1;
            }
        }
    }

    Ok(loaded)
}

/// Scatter a batch of acks into a segment file.
///
/// If the batch completes the segment (`prior_ack_count + |acks|` covers the
/// whole range), the file is deleted instead, and a missing file counts as a
/// successful delete. Otherwise one deliver-only record per ack is appended
/// and the file is fsync'd. Returns the segment's new ack count.
pub fn append_acks_to_segment(
    dir: &dyn Directory,
    path: &str,
    prior_ack_count: u64,
    acks: &BTreeSet<u16>,
) -> IndexResult<u64> {
    if acks.is_empty() {
        return Ok(prior_ack_count);
    }
    if prior_ack_count + acks.len() as u64 == SEGMENT_ENTRY_COUNT {
        dir.delete(path)?;
        return Ok(SEGMENT_ENTRY_COUNT);
    }

    let mut writer = dir.append_file(path)?;
    for &rel_seq in acks {
        writer.write_all(&encode_deliver(rel_seq))?;
    }
    writer.flush()?;
    drop(writer);
    dir.sync_file(path)?;
    Ok(prior_ack_count + acks.len() as u64)
}
