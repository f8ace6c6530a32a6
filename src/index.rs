//! The per-queue index state and its public operations.
//!
//! One `QueueIndex` exclusively owns one queue directory: its segment
//! files, its ack journal, and the single open segment handle. All
//! operations are single-threaded with respect to one instance; cross-queue
//! parallelism comes from independent instances.
//!
//! ## Durability contract
//!
//! - Publishes and deliveries are buffered write-behind; they reach stable
//!   storage when the segment handle is synced (handle switch, journal
//!   scatter into the same segment, or `terminate`).
//! - The ack journal is flushed to the OS per batch but never fsync'd: a
//!   crash may lose the journal tail, and those acks re-surface after
//!   restart as delivered-but-unacked entries. The consumer protocol must
//!   re-ack idempotently.
//! - Ack scatter (`flush_journal`) fsyncs each segment it touches.

use crate::broker::queue_directory;
use crate::error::{IndexError, IndexResult};
use crate::formats::{
    relative_sequence, segment_number, sequence_id, ACK_JOURNAL_FILENAME,
    CLEAN_SHUTDOWN_FILENAME, JOURNAL_HIGH_WATER_MARK, SEGMENT_ENTRY_COUNT,
};
use crate::journal::AckGroups;
use crate::records::{encode_deliver, encode_journal_ack, encode_publish};
use crate::recover::recover_queue_dir;
use crate::segment::{append_acks_to_segment, load_segment, parse_segment_file_name, segment_path};
use crate::storage::Directory;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::sync::Arc;

/// Write-behind buffer size for the open segment and journal handles.
const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Number of sequence ids covered by one segment.
pub const fn segment_size() -> u64 {
    SEGMENT_ENTRY_COUNT
}

/// The smallest segment boundary strictly greater than `seq_id`.
pub const fn next_segment_boundary(seq_id: u64) -> u64 {
    (segment_number(seq_id) + 1) * SEGMENT_ENTRY_COUNT
}

/// One live entry returned by [`QueueIndex::read_segment_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveEntry {
    /// Opaque 16-byte message id.
    pub msg_id: [u8; crate::formats::MSG_ID_BYTES],
    /// Full sequence id.
    pub seq_id: u64,
    /// Whether the message must survive a broker restart.
    pub persistent: bool,
    /// Whether the message has been handed to a consumer.
    pub delivered: bool,
}

struct OpenSegment {
    seg_num: u64,
    writer: BufWriter<Box<dyn Write>>,
}

/// Persistent index of one durable queue.
pub struct QueueIndex {
    dir: Arc<dyn Directory>,
    queue_dir: String,
    current_segment: Option<OpenSegment>,
    journal_writer: Option<BufWriter<Box<dyn Write>>>,
    pending_acks: AckGroups,
    segment_ack_counts: BTreeMap<u64, u64>,
    terminated: bool,
}

impl QueueIndex {
    /// Open a queue's index, running crash recovery first.
    ///
    /// Returns the number of live (un-acked) messages together with the
    /// ready index state. See [`crate::recover`] for the pipeline.
    pub fn init(
        dir: impl Into<Arc<dyn Directory>>,
        queue_name: &str,
    ) -> IndexResult<(u64, Self)> {
        let dir: Arc<dyn Directory> = dir.into();
        let queue_dir = queue_directory(queue_name);
        let recovered = recover_queue_dir(&*dir, &queue_dir)?;

        let journal_path = format!("{queue_dir}/{ACK_JOURNAL_FILENAME}");
        let journal_writer = BufWriter::with_capacity(
            WRITE_BUFFER_BYTES,
            dir.append_file(&journal_path)?,
        );

        Ok((
            recovered.live_count,
            Self {
                dir,
                queue_dir,
                current_segment: None,
                journal_writer: Some(journal_writer),
                pending_acks: AckGroups::new(),
                segment_ack_counts: recovered.segment_ack_counts,
                terminated: false,
            },
        ))
    }

    /// The queue's directory path, relative to the broker data root.
    pub fn queue_dir(&self) -> &str {
        &self.queue_dir
    }

    /// Number of journaled acks not yet scattered into their segments.
    ///
    /// The owning actor can use this to decide when to spend idle time on
    /// [`QueueIndex::flush_journal`].
    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.total()
    }

    fn ensure_active(&self) -> IndexResult<()> {
        if self.terminated {
            return Err(IndexError::InvalidState(
                "queue index has been terminated".into(),
            ));
        }
        Ok(())
    }

    fn journal_path(&self) -> String {
        format!("{}/{ACK_JOURNAL_FILENAME}", self.queue_dir)
    }

    /// Sync-on-switch handle cache: at most one segment file is open for
    /// writing at any moment.
    fn segment_writer(&mut self, seg_num: u64) -> IndexResult<&mut BufWriter<Box<dyn Write>>> {
        let cached = self
            .current_segment
            .as_ref()
            .is_some_and(|open| open.seg_num == seg_num);
        if !cached {
            self.close_current_segment()?;
            let writer = BufWriter::with_capacity(
                WRITE_BUFFER_BYTES,
                self.dir
                    .append_file(&segment_path(&self.queue_dir, seg_num))?,
            );
            self.current_segment = Some(OpenSegment { seg_num, writer });
        }
        Ok(&mut self
            .current_segment
            .as_mut()
            .ok_or_else(|| IndexError::InvalidState("segment handle vanished".into()))?
            .writer)
    }

    fn close_current_segment(&mut self) -> IndexResult<()> {
        if let Some(mut open) = self.current_segment.take() {
            open.writer.flush()?;
            drop(open.writer);
            self.dir
                .sync_file(&segment_path(&self.queue_dir, open.seg_num))?;
        }
        Ok(())
    }

    /// Make buffered writes to `seg_num` visible to a reader, keeping the
    /// handle open.
    fn flush_segment_writer(&mut self, seg_num: u64) -> IndexResult<()> {
        if let Some(open) = self.current_segment.as_mut() {
            if open.seg_num == seg_num {
                open.writer.flush()?;
            }
        }
        Ok(())
    }

    /// Record that `msg_id` was published at `seq_id`.
    ///
    /// Fails with [`IndexError::InvalidMessageId`] (no state mutation) if
    /// the id is not 16 bytes. The caller guarantees strictly increasing
    /// sequence ids per queue.
    pub fn write_published(
        &mut self,
        msg_id: &[u8],
        seq_id: u64,
        persistent: bool,
    ) -> IndexResult<()> {
        self.ensure_active()?;
        let record = encode_publish(relative_sequence(seq_id), msg_id, persistent)?;
        let writer = self.segment_writer(segment_number(seq_id))?;
        writer.write_all(&record)?;
        Ok(())
    }

    /// Record that the message at `seq_id` was delivered to a consumer.
    pub fn write_delivered(&mut self, seq_id: u64) -> IndexResult<()> {
        self.ensure_active()?;
        let record = encode_deliver(relative_sequence(seq_id));
        let writer = self.segment_writer(segment_number(seq_id))?;
        writer.write_all(&record)?;
        Ok(())
    }

    /// Journal a batch of acknowledgements.
    ///
    /// Each sequence id is appended to the ack journal (flushed to the OS,
    /// not fsync'd) and grouped in memory for a later scatter. If the
    /// pending total exceeds the high-water mark, a flush cycle runs
    /// immediately and drains it back under the mark.
    pub fn write_acks(&mut self, seq_ids: &[u64]) -> IndexResult<()> {
        self.ensure_active()?;
        let writer = self
            .journal_writer
            .as_mut()
            .ok_or_else(|| IndexError::InvalidState("journal handle missing".into()))?;
        for &seq_id in seq_ids {
            writer.write_all(&encode_journal_ack(seq_id))?;
            self.pending_acks.insert(seq_id);
        }
        writer.flush()?;

        if self.pending_acks.total() > JOURNAL_HIGH_WATER_MARK {
            self.flush_journal()?;
        }
        Ok(())
    }

    /// Scatter journaled acks into segment files, bounded-effort.
    ///
    /// One call flushes the acks of one segment and returns whether more
    /// remain, unless the pending total is above the high-water mark, in
    /// which case it keeps draining until back at or below it. When the
    /// last pending ack is scattered the journal file is truncated to zero.
    pub fn flush_journal(&mut self) -> IndexResult<bool> {
        self.ensure_active()?;
        loop {
            let Some((seg_num, acks)) = self.pending_acks.pop_segment() else {
                return Ok(false);
            };

            if self
                .current_segment
                .as_ref()
                .is_some_and(|open| open.seg_num == seg_num)
            {
                self.close_current_segment()?;
            }

            let path = segment_path(&self.queue_dir, seg_num);
            let prior = self.segment_ack_counts.get(&seg_num).copied().unwrap_or(0);
            let new_count = append_acks_to_segment(&*self.dir, &path, prior, &acks)?;
            if new_count == SEGMENT_ENTRY_COUNT {
                self.segment_ack_counts.remove(&seg_num);
                tracing::debug!(segment = seg_num, "deleted fully-acked segment");
            } else {
                self.segment_ack_counts.insert(seg_num, new_count);
            }

            if self.pending_acks.is_empty() {
                // Buffered journal bytes must not land after the truncate.
                if let Some(writer) = self.journal_writer.as_mut() {
                    writer.flush()?;
                }
                self.dir.truncate_file(&self.journal_path(), 0)?;
                return Ok(false);
            }
            if self.pending_acks.total() <= JOURNAL_HIGH_WATER_MARK {
                return Ok(true);
            }
        }
    }

    /// Read the live entries of the segment starting at `init_seq_id`.
    ///
    /// `init_seq_id` must be a segment boundary. Entries come back in
    /// ascending sequence order with journaled acks already applied.
    pub fn read_segment_entries(&mut self, init_seq_id: u64) -> IndexResult<Vec<LiveEntry>> {
        self.ensure_active()?;
        if relative_sequence(init_seq_id) != 0 {
            return Err(IndexError::NotOnBoundary {
                seq_id: init_seq_id,
            });
        }
        let seg_num = segment_number(init_seq_id);
        self.flush_segment_writer(seg_num)?;

        let path = segment_path(&self.queue_dir, seg_num);
        let loaded = load_segment(
            &*self.dir,
            seg_num,
            &path,
            self.pending_acks.acks_for(seg_num),
        )?;
        Ok(loaded
            .entries
            .iter()
            .map(|(&rel_seq, entry)| LiveEntry {
                msg_id: entry.msg_id,
                seq_id: sequence_id(seg_num, rel_seq),
                persistent: entry.persistent,
                delivered: entry.delivered,
            })
            .collect())
    }

    /// Boundary of the lowest on-disk segment, and the sequence id one past
    /// the highest published entry.
    ///
    /// Both are 0 when the queue has no segment files. If the highest
    /// segment holds no complete publish record (possible only after a torn
    /// first write), the next id falls back to that segment's base
    /// boundary.
    pub fn find_lowest_seq_id_seg_and_next_seq_id(&mut self) -> IndexResult<(u64, u64)> {
        self.ensure_active()?;
        let mut seg_nums: Vec<u64> = self
            .dir
            .list_dir(&self.queue_dir)?
            .iter()
            .filter_map(|name| parse_segment_file_name(name))
            .collect();
        seg_nums.sort_unstable();

        let (Some(&lowest), Some(&highest)) = (seg_nums.first(), seg_nums.last()) else {
            return Ok((0, 0));
        };

        self.flush_segment_writer(highest)?;
        let path = segment_path(&self.queue_dir, highest);
        let loaded = load_segment(&*self.dir, highest, &path, None)?;
        let next_seq_id = match loaded.high_rel_seq {
            Some(high) => sequence_id(highest, high) + 1,
            None => sequence_id(highest, 0),
        };
        Ok((lowest * SEGMENT_ENTRY_COUNT, next_seq_id))
    }

    /// Drain the journal completely, then sync and close both handles and
    /// leave a clean-shutdown marker for the next recovery.
    ///
    /// Further writes fail with [`IndexError::InvalidState`].
    pub fn terminate(&mut self) -> IndexResult<()> {
        self.ensure_active()?;
        while self.flush_journal()? {}
        self.close_current_segment()?;
        if let Some(mut writer) = self.journal_writer.take() {
            writer.flush()?;
            drop(writer);
            self.dir.sync_file(&self.journal_path())?;
        }

        let marker = format!("{}/{CLEAN_SHUTDOWN_FILENAME}", self.queue_dir);
        let mut writer = self.dir.append_file(&marker)?;
        writer.flush()?;
        drop(writer);
        self.dir.sync_file(&marker)?;

        self.terminated = true;
        Ok(())
    }

    /// Terminate, then recursively delete the queue directory.
    pub fn terminate_and_erase(&mut self) -> IndexResult<()> {
        self.terminate()?;
        self.dir.delete(&self.queue_dir)
    }
}
