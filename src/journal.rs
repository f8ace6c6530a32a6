//! Ack journal bookkeeping.
//!
//! The journal file itself is a bare concatenation of 8-byte big-endian
//! sequence ids (see [`crate::records`]). This module owns the in-memory
//! side: journaled-but-not-yet-scattered acks grouped by segment number,
//! plus the recovery-time scan of the file.

use crate::error::IndexResult;
use crate::formats::{relative_sequence, segment_number};
use crate::records::decode_journal_ack;
use crate::storage::Directory;
use std::collections::{BTreeMap, BTreeSet};

/// Journaled acks grouped by segment number.
///
/// The per-segment sets directly encode the dedup the scatter path relies
/// on: acking the same sequence id twice before a flush collapses into one
/// pending ack, so `total()` counts distinct pending acks.
#[derive(Debug, Default)]
pub struct AckGroups {
    by_segment: BTreeMap<u64, BTreeSet<u16>>,
    total: usize,
}

impl AckGroups {
    /// Create an empty grouping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one journaled ack. Duplicates are absorbed.
    pub fn insert(&mut self, seq_id: u64) {
        let newly = self
            .by_segment
            .entry(segment_number(seq_id))
            .or_default()
            .insert(relative_sequence(seq_id));
        if newly {
            self.total += 1;
        }
    }

    /// Remove and return the acks of one segment (lowest segment number
    /// first), or `None` if nothing is pending.
    pub fn pop_segment(&mut self) -> Option<(u64, BTreeSet<u16>)> {
        let (&seg_num, _) = self.by_segment.iter().next()?;
        let acks = self.by_segment.remove(&seg_num)?;
        self.total -= acks.len();
        Some((seg_num, acks))
    }

    /// Pending acks for one segment, if any.
    pub fn acks_for(&self, seg_num: u64) -> Option<&BTreeSet<u16>> {
        self.by_segment.get(&seg_num)
    }

    /// Number of distinct pending acks across all segments.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Scan a journal file into the sequence ids it holds, in append order.
///
/// A missing file is an empty journal. A short read at the tail (the
/// journal is never fsync'd, so a crash can tear it) ends the scan; the
/// torn bytes are dropped.
pub fn read_journal(dir: &dyn Directory, path: &str) -> IndexResult<Vec<u64>> {
    if !dir.exists(path) {
        return Ok(Vec::new());
    }
    let mut reader = dir.open_file(path)?;
    let mut out = Vec::new();
    while let Some(seq_id) = decode_journal_ack(&mut reader)? {
        out.push(seq_id);
    }
    Ok(out)
}
