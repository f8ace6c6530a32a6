//! On-disk format constants.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! - A segment file covers the sequence-id range
//!   `[segnum * SEGMENT_ENTRY_COUNT, (segnum + 1) * SEGMENT_ENTRY_COUNT)`.
//! - Segment records are self-delimiting by their first byte
//!   (see [`crate::records`]); there is no file header, footer or checksum.
//! - The ack journal is a bare concatenation of 8-byte big-endian
//!   sequence ids.

/// Number of sequence ids covered by one segment file.
///
/// The relative sequence (`seq_id mod SEGMENT_ENTRY_COUNT`) must fit in the
/// 14-bit field of the segment record layouts.
pub const SEGMENT_ENTRY_COUNT: u64 = 16384;

/// Number of journaled acks above which `write_acks` keeps flushing until
/// the journal is back at or below this mark.
pub const JOURNAL_HIGH_WATER_MARK: usize = 32768;

/// Size of a message id, in bytes.
pub const MSG_ID_BYTES: usize = 16;

/// Size of a journal ack record (one full sequence id), in bytes.
pub const SEQ_ID_BYTES: usize = 8;

/// Size of an encoded publish record, in bytes.
pub const PUBLISH_RECORD_BYTES: usize = 2 + MSG_ID_BYTES;

/// Size of an encoded deliver-only record, in bytes.
pub const DELIVER_RECORD_BYTES: usize = 2;

/// File extension of segment files (`<segnum>.idx`).
pub const SEGMENT_EXTENSION: &str = ".idx";

/// File name of the per-queue ack journal.
pub const ACK_JOURNAL_FILENAME: &str = "ack_journal.jif";

/// Top-level directory holding one subdirectory per queue.
pub const QUEUES_DIR: &str = "queues";

/// Clean-shutdown marker, written by `terminate` and consumed by the next
/// recovery. Its absence means the previous shutdown was unclean.
pub const CLEAN_SHUTDOWN_FILENAME: &str = "clean.dot";

/// Segment number covering `seq_id`.
pub const fn segment_number(seq_id: u64) -> u64 {
    seq_id / SEGMENT_ENTRY_COUNT
}

/// Intra-segment offset of `seq_id` (fits in 14 bits).
pub const fn relative_sequence(seq_id: u64) -> u16 {
    (seq_id % SEGMENT_ENTRY_COUNT) as u16
}

/// Reassemble a full sequence id from its segment number and offset.
pub const fn sequence_id(seg_num: u64, rel_seq: u16) -> u64 {
    seg_num * SEGMENT_ENTRY_COUNT + rel_seq as u64
}
