//! The journal high-water mark: a large ack batch drains eagerly.

use queue_index::storage::Directory;
use queue_index::{segment_size, MemoryDirectory, QueueIndex};
use std::io::Read;
use std::sync::Arc;

#[test]
fn oversized_ack_batch_flushes_during_write_acks() {
    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let (_, mut index) = QueueIndex::init(dir.clone(), "firehose").unwrap();

    // Two full segments plus one message: one past the high-water mark.
    let total = 2 * segment_size() + 1;
    let msg_id = [0x5Au8; 16];
    for seq_id in 0..total {
        index.write_published(&msg_id, seq_id, true).unwrap();
        index.write_delivered(seq_id).unwrap();
    }
    let all: Vec<u64> = (0..total).collect();
    index.write_acks(&all).unwrap();

    // write_acks drained at least one segment to get back under the mark.
    let queue_dir = index.queue_dir().to_string();
    assert!(!dir.exists(&format!("{queue_dir}/0.idx")));
    assert!(index.pending_ack_count() <= 32768);
    assert!(index.pending_ack_count() > 0);

    while index.flush_journal().unwrap() {}

    // Both full segments are gone; the third still holds its lone ack.
    assert!(!dir.exists(&format!("{queue_dir}/1.idx")));
    assert!(dir.exists(&format!("{queue_dir}/2.idx")));
    assert!(index.read_segment_entries(2 * segment_size()).unwrap().is_empty());

    // Journal fully scattered means a zero-length journal file.
    let mut journal = Vec::new();
    dir.open_file(&format!("{queue_dir}/ack_journal.jif"))
        .unwrap()
        .read_to_end(&mut journal)
        .unwrap();
    assert!(journal.is_empty());

    index.terminate().unwrap();
    let (count, _) = QueueIndex::init(dir, "firehose").unwrap();
    assert_eq!(count, 0);
}
