//! `queue-index`: the persistent per-queue index of a message broker.
//!
//! For each durable queue, the index records the fate of every message
//! reference (published, delivered, acknowledged) without storing message
//! bodies (those live in a separate message store, addressed by 16-byte
//! ids). On disk a queue is a directory of fixed-range segment files plus
//! one ack journal:
//!
//! - segment `<segnum>.idx` covers sequence ids
//!   `[segnum * 16384, (segnum + 1) * 16384)` as an append-only stream of
//!   bit-packed publish and deliver-only records (`formats`, `records`),
//! - `ack_journal.jif` batches unordered acknowledgements as raw 8-byte
//!   sequence ids until they are scattered into their segments (`journal`),
//! - fully-acked segments are deleted eagerly (`segment`).
//!
//! ## Contract (what you can rely on)
//!
//! - **Append-ordered writes**: publishes and deliveries for a queue are
//!   persisted in call order within their segment; acks are ordered with
//!   respect to same-segment writes by the sync-on-switch handle cache.
//! - **Crash posture**: no checksums by design. A torn record at a segment
//!   tail is discarded on load; a lost journal tail replays as "ack not yet
//!   received", which the consumer protocol absorbs by re-acking. Recovery
//!   (`recover`) additionally marks crashed-undelivered messages as
//!   delivered and discards the non-persistent ones.
//! - **Bounded flush**: `flush_journal` does one segment's worth of work
//!   per call unless the journal is over its high-water mark, so the owning
//!   actor can interleave it with foreground work.
//!
//! Scope boundary: the message-body store, the queue-metadata catalogue and
//! the per-queue actor are external; `broker` is the only module that talks
//! across it (start hook + live-message walker).

pub mod broker;
pub mod error;
pub mod formats;
pub mod index;
pub mod journal;
pub mod records;
pub mod recover;
pub mod segment;
pub mod storage;

pub use broker::{start_broker_index, LiveMessageWalker, WalkerEntry};
pub use error::{IndexError, IndexResult};
pub use index::{next_segment_boundary, segment_size, LiveEntry, QueueIndex};
pub use storage::{Directory, FsDirectory, MemoryDirectory};
