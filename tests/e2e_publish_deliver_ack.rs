//! End-to-end publish/deliver/ack lifecycle against both backends.

use queue_index::storage::Directory;
use queue_index::{
    next_segment_boundary, segment_size, FsDirectory, MemoryDirectory, QueueIndex,
};
use std::sync::Arc;

fn msg_id(tag: u8) -> [u8; 16] {
    let mut id = [0u8; 16];
    id[15] = tag;
    id
}

#[test]
fn publish_deliver_ack_then_restart_keeps_the_survivor() {
    let tmp = tempfile::tempdir().unwrap();
    let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path()).unwrap());

    let (count, mut index) = QueueIndex::init(dir.clone(), "orders").unwrap();
    assert_eq!(count, 0);

    index.write_published(&msg_id(1), 0, true).unwrap();
    index.write_published(&msg_id(2), 1, false).unwrap();
    index.write_delivered(0).unwrap();
    index.write_acks(&[0]).unwrap();
    while index.flush_journal().unwrap() {}
    index.terminate().unwrap();

    // A clean restart is observably a no-op: the undelivered transient
    // message keeps its state rather than being discarded.
    let (count, mut index) = QueueIndex::init(dir, "orders").unwrap();
    assert_eq!(count, 1);
    let entries = index.read_segment_entries(0).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].msg_id, msg_id(2));
    assert_eq!(entries[0].seq_id, 1);
    assert!(!entries[0].persistent);
    assert!(!entries[0].delivered);
    index.terminate().unwrap();
}

#[test]
fn write_read_roundtrip_per_state_transition() {
    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let (_, mut index) = QueueIndex::init(dir, "roundtrip").unwrap();

    index.write_published(&msg_id(9), 4, true).unwrap();
    let entries = index.read_segment_entries(0).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].msg_id, msg_id(9));
    assert_eq!(entries[0].seq_id, 4);
    assert!(entries[0].persistent);
    assert!(!entries[0].delivered);

    index.write_delivered(4).unwrap();
    let entries = index.read_segment_entries(0).unwrap();
    assert!(entries[0].delivered);

    index.write_acks(&[4]).unwrap();
    while index.flush_journal().unwrap() {}
    assert!(index.read_segment_entries(0).unwrap().is_empty());
}

#[test]
fn publishing_across_the_boundary_creates_two_segments() {
    let tmp = tempfile::tempdir().unwrap();
    let fs = FsDirectory::new(tmp.path()).unwrap();
    let dir: Arc<dyn Directory> = Arc::new(fs);

    let (_, mut index) = QueueIndex::init(dir.clone(), "orders").unwrap();
    let boundary = segment_size();
    index.write_published(&msg_id(1), boundary - 1, true).unwrap();
    index.write_published(&msg_id(2), boundary, true).unwrap();

    let queue_dir = index.queue_dir().to_string();
    assert!(dir.exists(&format!("{queue_dir}/0.idx")));
    assert!(dir.exists(&format!("{queue_dir}/1.idx")));

    let (lowest, next) = index.find_lowest_seq_id_seg_and_next_seq_id().unwrap();
    assert_eq!(lowest, 0);
    assert_eq!(next, boundary + 1);

    // Each segment reports its own slice, in ascending order.
    let first = index.read_segment_entries(0).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].seq_id, boundary - 1);
    let second = index.read_segment_entries(next_segment_boundary(0)).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].seq_id, boundary);
}

#[test]
fn fully_acked_segment_disappears() {
    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let (_, mut index) = QueueIndex::init(dir.clone(), "orders").unwrap();

    let full_range: Vec<u64> = (0..segment_size()).collect();
    for &seq_id in &full_range {
        index.write_published(&msg_id(1), seq_id, true).unwrap();
        index.write_delivered(seq_id).unwrap();
    }
    index.write_acks(&full_range).unwrap();
    while index.flush_journal().unwrap() {}

    let queue_dir = index.queue_dir().to_string();
    assert!(!dir.exists(&format!("{queue_dir}/0.idx")));
    assert_eq!(index.find_lowest_seq_id_seg_and_next_seq_id().unwrap(), (0, 0));

    index.terminate().unwrap();
    let (count, _) = QueueIndex::init(dir, "orders").unwrap();
    assert_eq!(count, 0);
}
