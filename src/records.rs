//! Bit-packed record codec for segment files and the ack journal.
//!
//! ## Public invariants (must not change without a format bump)
//!
//! Three record kinds, distinguished by the first byte (big-endian,
//! byte-aligned):
//!
//! - **Deliver-only / ack** (2 bytes, segment files):
//!   `[00rr rrrr] [rrrr rrrr]`: a 14-bit relative sequence.
//! - **Publish** (18 bytes, segment files):
//!   `[1prr rrrr] [rrrr rrrr] [16-byte msg_id]`: prefix bit, persistence
//!   bit, 14-bit relative sequence, message id.
//! - **Journal ack** (8 bytes, journal file only): one full big-endian
//!   sequence id.
//!
//! No header, no footer, no checksum. A trailing partial record (short read
//! at EOF) is a torn tail: decoding stops cleanly at the truncation point.

use crate::error::{IndexError, IndexResult};
use crate::formats::{DELIVER_RECORD_BYTES, MSG_ID_BYTES, PUBLISH_RECORD_BYTES, SEQ_ID_BYTES};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

/// First-byte flag marking a publish record.
const PUBLISH_FLAG: u8 = 0x80;
/// First-byte flag carrying the persistence bit of a publish record.
const PERSISTENT_FLAG: u8 = 0x40;
/// Mask extracting the high 6 bits of the 14-bit relative sequence.
const REL_SEQ_HIGH_MASK: u8 = 0x3F;

/// One decoded segment-file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRecord {
    /// A message was published into this segment.
    Publish {
        /// Intra-segment offset (14 bits).
        rel_seq: u16,
        /// Opaque 16-byte message id.
        msg_id: [u8; MSG_ID_BYTES],
        /// Whether the message must survive a broker restart.
        persistent: bool,
    },
    /// A message was delivered (or, on its second occurrence for the same
    /// relative sequence, acknowledged).
    Deliver {
        /// Intra-segment offset (14 bits).
        rel_seq: u16,
    },
}

/// Encode a publish record.
///
/// Fails with [`IndexError::InvalidMessageId`] if `msg_id` is not exactly
/// 16 bytes; nothing is written in that case.
pub fn encode_publish(
    rel_seq: u16,
    msg_id: &[u8],
    persistent: bool,
) -> IndexResult<[u8; PUBLISH_RECORD_BYTES]> {
    if msg_id.len() != MSG_ID_BYTES {
        return Err(IndexError::InvalidMessageId {
            length: msg_id.len(),
        });
    }
    let mut buf = [0u8; PUBLISH_RECORD_BYTES];
    buf[0] = PUBLISH_FLAG | ((rel_seq >> 8) as u8 & REL_SEQ_HIGH_MASK);
    if persistent {
        buf[0] |= PERSISTENT_FLAG;
    }
    buf[1] = rel_seq as u8;
    buf[2..].copy_from_slice(msg_id);
    Ok(buf)
}

/// Encode a deliver-only record.
pub fn encode_deliver(rel_seq: u16) -> [u8; DELIVER_RECORD_BYTES] {
    [(rel_seq >> 8) as u8 & REL_SEQ_HIGH_MASK, rel_seq as u8]
}

/// Encode a journal ack record (one full sequence id).
pub fn encode_journal_ack(seq_id: u64) -> [u8; SEQ_ID_BYTES] {
    seq_id.to_be_bytes()
}

impl SegmentRecord {
    /// Encoded size of this record, in bytes.
    pub fn encoded_len(&self) -> u64 {
        match self {
            SegmentRecord::Publish { .. } => PUBLISH_RECORD_BYTES as u64,
            SegmentRecord::Deliver { .. } => DELIVER_RECORD_BYTES as u64,
        }
    }
}

/// Outcome of decoding one segment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDecode {
    /// A complete record.
    Record(SegmentRecord),
    /// Clean end of stream at a record boundary.
    Eof,
    /// The stream ended mid-record: a torn tail. Every record decoded so
    /// far is valid; recovery may truncate the file back to the boundary.
    Torn,
}

/// Decode the next segment record.
///
/// Tail-aware: an `UnexpectedEof` on the first byte is a clean end of
/// stream, mid-record it is a torn tail left by a crash. Either way the
/// stream ends; the distinction only matters to recovery, which repairs
/// torn files before appending to them.
pub fn decode_segment_record<R: Read>(reader: &mut R) -> IndexResult<SegmentDecode> {
    let mut first = [0u8; 1];
    match reader.read_exact(&mut first) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(SegmentDecode::Eof),
        Err(e) => return Err(e.into()),
    }

    if first[0] & PUBLISH_FLAG != 0 {
        let mut rest = [0u8; PUBLISH_RECORD_BYTES - 1];
        if let Err(e) = reader.read_exact(&mut rest) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(SegmentDecode::Torn);
            }
            return Err(e.into());
        }
        let mut msg_id = [0u8; MSG_ID_BYTES];
        msg_id.copy_from_slice(&rest[1..]);
        Ok(SegmentDecode::Record(SegmentRecord::Publish {
            rel_seq: u16::from(first[0] & REL_SEQ_HIGH_MASK) << 8 | u16::from(rest[0]),
            msg_id,
            persistent: first[0] & PERSISTENT_FLAG != 0,
        }))
    } else {
        let mut second = [0u8; 1];
        if let Err(e) = reader.read_exact(&mut second) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(SegmentDecode::Torn);
            }
            return Err(e.into());
        }
        Ok(SegmentDecode::Record(SegmentRecord::Deliver {
            rel_seq: u16::from(first[0] & REL_SEQ_HIGH_MASK) << 8 | u16::from(second[0]),
        }))
    }
}

/// Decode the next journal ack record, returning `Ok(None)` at EOF.
///
/// A short read (fewer than 8 bytes left) is a lost journal tail and ends
/// the stream, consistent with the journal's no-fsync durability posture.
pub fn decode_journal_ack<R: Read>(reader: &mut R) -> IndexResult<Option<u64>> {
    match reader.read_u64::<BigEndian>() {
        Ok(seq_id) => Ok(Some(seq_id)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
