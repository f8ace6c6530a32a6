//! Minimal walk-through of one queue's index lifecycle:
//! publish → deliver → ack → crash → recover.
//!
//! Run:
//! `cargo run --example queue_lifecycle`

use queue_index::storage::Directory;
use queue_index::{FsDirectory, QueueIndex};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path())?);

    let (count, mut index) = QueueIndex::init(dir.clone(), "demo")?;
    println!("opened fresh queue, {count} live messages");

    // Publish three messages, deliver two, ack one.
    for (tag, persistent) in [(1u8, true), (2, true), (3, false)] {
        let mut msg_id = [0u8; 16];
        msg_id[15] = tag;
        index.write_published(&msg_id, (tag - 1) as u64, persistent)?;
    }
    index.write_delivered(0)?;
    index.write_delivered(1)?;
    index.write_acks(&[0])?;
    while index.flush_journal()? {}

    for entry in index.read_segment_entries(0)? {
        println!(
            "live: seq={} persistent={} delivered={}",
            entry.seq_id, entry.persistent, entry.delivered
        );
    }

    // Crash without terminating: the journal and the clean-shutdown marker
    // are both missing, so the next init runs the full recovery pipeline.
    drop(index);

    let (count, mut index) = QueueIndex::init(dir, "demo")?;
    println!("recovered after crash, {count} live messages");
    for entry in index.read_segment_entries(0)? {
        println!(
            "live: seq={} persistent={} delivered={}",
            entry.seq_id, entry.persistent, entry.delivered
        );
    }
    index.terminate()?;
    Ok(())
}
