//! Broker-start integration: queue directory naming, the startup hook that
//! reconciles on-disk queue directories against the durable-queue set, and
//! the walker the message-body store uses to rebuild its reference counts.

use crate::error::IndexResult;
use crate::formats::QUEUES_DIR;
use crate::index::{segment_size, LiveEntry, QueueIndex};
use crate::storage::Directory;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Filesystem-safe, reversible encoding of a queue's identity.
pub fn encode_queue_name(queue_name: &str) -> String {
    URL_SAFE.encode(queue_name.as_bytes())
}

/// Invert [`encode_queue_name`]. `None` for directory names that are not a
/// valid encoding (stray directories are treated as transient and purged).
pub fn decode_queue_name(dir_name: &str) -> Option<String> {
    let bytes = URL_SAFE.decode(dir_name).ok()?;
    String::from_utf8(bytes).ok()
}

/// Directory of a queue's index, relative to the broker data root.
pub fn queue_directory(queue_name: &str) -> String {
    format!("{QUEUES_DIR}/{}", encode_queue_name(queue_name))
}

/// Broker-start hook.
///
/// Partitions the on-disk queue directories against `durable_queues`,
/// starts the message-body store by handing it a [`LiveMessageWalker`] over
/// the durable queues, then deletes every transient directory. Store start
/// comes first: the walker must see the durable directories untouched, and
/// a crash between store start and the purge only leaves transient
/// directories behind for the next start to delete.
pub fn start_broker_index<F>(
    dir: Arc<dyn Directory>,
    durable_queues: &BTreeSet<String>,
    start_store: F,
) -> IndexResult<()>
where
    F: FnOnce(LiveMessageWalker) -> IndexResult<()>,
{
    dir.create_dir_all(QUEUES_DIR)?;

    // A directory is durable iff its name decodes back to a queue in the
    // durable set; names that decode to nothing are stray and purged too.
    let transient: Vec<String> = dir
        .list_dir(QUEUES_DIR)?
        .into_iter()
        .filter(|entry| {
            !decode_queue_name(entry).is_some_and(|name| durable_queues.contains(&name))
        })
        .collect();

    start_store(LiveMessageWalker::new(dir.clone(), durable_queues))?;

    for entry in transient {
        tracing::debug!(directory = %entry, "purging transient queue directory");
        dir.delete(&format!("{QUEUES_DIR}/{entry}"))?;
    }
    Ok(())
}

/// One live message yielded by the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerEntry {
    /// Opaque 16-byte message id.
    pub msg_id: [u8; crate::formats::MSG_ID_BYTES],
    /// Whether the message must survive a broker restart.
    pub persistent: bool,
}

struct WalkerQueue {
    index: QueueIndex,
    remaining: u64,
    next_boundary: u64,
    end_boundary: u64,
    entries: std::vec::IntoIter<LiveEntry>,
}

/// Lazy traversal of every surviving live message across the durable
/// queues: queues, then segments by ascending boundary, then entries in
/// ascending sequence order.
///
/// Each queue is `init`-ed only when the walk reaches it and `terminate`-d
/// as soon as its live count is exhausted, so at most one queue index is
/// open at a time. The iterator is the traversal's continuation: callers
/// may interleave `next` with arbitrary other work.
pub struct LiveMessageWalker {
    dir: Arc<dyn Directory>,
    queues: VecDeque<String>,
    current: Option<WalkerQueue>,
}

impl LiveMessageWalker {
    fn new(dir: Arc<dyn Directory>, durable_queues: &BTreeSet<String>) -> Self {
        Self {
            dir,
            queues: durable_queues.iter().cloned().collect(),
            current: None,
        }
    }

    fn open_next_queue(&mut self) -> IndexResult<bool> {
        let Some(queue_name) = self.queues.pop_front() else {
            return Ok(false);
        };
        let (count, mut index) = QueueIndex::init(self.dir.clone(), &queue_name)?;
        if count == 0 {
            index.terminate()?;
            return Ok(true);
        }
        let (lowest, next_seq_id) = index.find_lowest_seq_id_seg_and_next_seq_id()?;
        self.current = Some(WalkerQueue {
            index,
            remaining: count,
            next_boundary: lowest,
            end_boundary: next_seq_id,
            entries: Vec::new().into_iter(),
        });
        Ok(true)
    }

    fn advance(&mut self) -> IndexResult<Option<WalkerEntry>> {
        loop {
            if let Some(mut queue) = self.current.take() {
                if let Some(entry) = queue.entries.next() {
                    queue.remaining -= 1;
                    if queue.remaining == 0 {
                        queue.index.terminate()?;
                    } else {
                        self.current = Some(queue);
                    }
                    return Ok(Some(WalkerEntry {
                        msg_id: entry.msg_id,
                        persistent: entry.persistent,
                    }));
                }

                if queue.next_boundary >= queue.end_boundary {
                    // Exhausted the segment range with entries still
                    // unaccounted for: the queue is done regardless.
                    queue.index.terminate()?;
                    continue;
                }

                let boundary = queue.next_boundary;
                queue.next_boundary += segment_size();
                queue.entries = queue.index.read_segment_entries(boundary)?.into_iter();
                self.current = Some(queue);
                continue;
            }

            if !self.open_next_queue()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for LiveMessageWalker {
    type Item = IndexResult<WalkerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                // A failed queue poisons the walk for that queue only.
                self.current = None;
                Some(Err(e))
            }
        }
    }
}
