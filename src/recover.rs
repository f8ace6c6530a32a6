//! Startup recovery for one queue directory.
//!
//! The pipeline reconstructs the live-message count, repairs the effects of
//! an unclean shutdown, and scatters the ack journal, in this order:
//!
//! 1. consume the clean-shutdown marker, if present,
//! 2. enumerate segment files and load each one,
//! 3. transient remediation (unclean shutdown only): every
//!    still-undelivered entry gets a deliver-only record appended; the
//!    non-persistent ones are additionally scheduled for a self-ack (a
//!    crashed transient message must not be replayed to consumers),
//! 4. replay the ack journal into a combined per-segment ack map seeded
//!    with those self-acks,
//! 5. scatter the combined map: per segment, intersect with the entries
//!    still live on disk (deduplicating and dropping already-acked ids) and
//!    append the intersection as acks,
//! 6. delete the journal file, which has been fully scattered.
//!
//! After a clean shutdown the marker skips remediation, which makes
//! terminate-then-recover observably a no-op: undelivered transient
//! messages keep their state instead of being discarded. A marker lost to a
//! crash degrades to the unclean path, which is always safe.
//!
//! Count bookkeeping: step 2 counts every live entry, transient ones
//! included; the self-acks then flow through step 5's intersection path
//! where the count is decremented. `append_acks_to_segment` is the only
//! writer of acks, and the intersection filters against the current live
//! set, so no entry is ever acked twice.

use crate::error::IndexResult;
use crate::formats::{
    relative_sequence, segment_number, ACK_JOURNAL_FILENAME, CLEAN_SHUTDOWN_FILENAME,
    SEGMENT_ENTRY_COUNT,
};
use crate::journal::read_journal;
use crate::records::encode_deliver;
use crate::segment::{append_acks_to_segment, load_segment, parse_segment_file_name, segment_path};
use crate::storage::Directory;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// What recovery hands back to the index state.
#[derive(Debug)]
pub struct RecoveredQueue {
    /// Number of live (un-acked) entries across all segments.
    pub live_count: u64,
    /// Ack counts of segments holding at least one ack.
    pub segment_ack_counts: BTreeMap<u64, u64>,
}

/// Run the recovery pipeline over `queue_dir`, creating it if missing.
///
/// On return the directory's segments are self-consistent, the journal file
/// is gone, and every previously-undelivered transient message has been
/// delivered and acked away. The caller opens a fresh journal.
pub fn recover_queue_dir(dir: &dyn Directory, queue_dir: &str) -> IndexResult<RecoveredQueue> {
    dir.create_dir_all(queue_dir)?;

    let marker_path = format!("{queue_dir}/{CLEAN_SHUTDOWN_FILENAME}");
    let clean_shutdown = dir.exists(&marker_path);
    if clean_shutdown {
        dir.delete(&marker_path)?;
    } else {
        tracing::debug!(queue_dir, "no clean-shutdown marker, running remediation");
    }

    let mut seg_nums: Vec<u64> = dir
        .list_dir(queue_dir)?
        .iter()
        .filter_map(|name| parse_segment_file_name(name))
        .collect();
    seg_nums.sort_unstable();

    let mut live_count = 0u64;
    let mut segment_ack_counts = BTreeMap::new();
    let mut combined_acks: BTreeMap<u64, BTreeSet<u16>> = BTreeMap::new();

    for &seg_num in &seg_nums {
        let path = segment_path(queue_dir, seg_num);
        let loaded = load_segment(dir, seg_num, &path, None)?;
        live_count += loaded.entries.len() as u64;
        if loaded.ack_count > 0 {
            segment_ack_counts.insert(seg_num, loaded.ack_count);
        }
        if let Some(offset) = loaded.torn_at {
            // Repair before any append: records written after torn bytes
            // would be unreachable to every later scan.
            tracing::warn!(segment = seg_num, offset, "truncating torn segment tail");
            dir.truncate_file(&path, offset)?;
        }

        if clean_shutdown {
            continue;
        }
        let undelivered: Vec<u16> = loaded
            .entries
            .iter()
            .filter(|(_, e)| !e.delivered)
            .map(|(&rel_seq, _)| rel_seq)
            .collect();
        if undelivered.is_empty() {
            continue;
        }

        let mut writer = dir.append_file(&path)?;
        for &rel_seq in &undelivered {
            writer.write_all(&encode_deliver(rel_seq))?;
            if !loaded.entries[&rel_seq].persistent {
                combined_acks.entry(seg_num).or_default().insert(rel_seq);
            }
        }
        writer.flush()?;
        drop(writer);
        dir.sync_file(&path)?;
        tracing::debug!(
            segment = seg_num,
            delivered = undelivered.len(),
            "marked undelivered entries as delivered"
        );
    }

    let journal_path = format!("{queue_dir}/{ACK_JOURNAL_FILENAME}");
    let journaled = read_journal(dir, &journal_path)?;
    for &seq_id in &journaled {
        combined_acks
            .entry(segment_number(seq_id))
            .or_default()
            .insert(relative_sequence(seq_id));
    }
    if !journaled.is_empty() {
        tracing::debug!(acks = journaled.len(), "replaying ack journal");
    }

    for (seg_num, rel_seqs) in combined_acks {
        let path = segment_path(queue_dir, seg_num);
        let loaded = load_segment(dir, seg_num, &path, None)?;
        let intersection: BTreeSet<u16> = rel_seqs
            .into_iter()
            .filter(|rel_seq| loaded.entries.contains_key(rel_seq))
            .collect();
        if intersection.is_empty() {
            continue;
        }
        live_count -= intersection.len() as u64;
        let new_count =
            append_acks_to_segment(dir, &path, loaded.ack_count, &intersection)?;
        if new_count == SEGMENT_ENTRY_COUNT {
            segment_ack_counts.remove(&seg_num);
        } else {
            segment_ack_counts.insert(seg_num, new_count);
        }
    }

    dir.delete(&journal_path)?;

    Ok(RecoveredQueue {
        live_count,
        segment_ack_counts,
    })
}
