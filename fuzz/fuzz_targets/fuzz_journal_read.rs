#![no_main]

use libfuzzer_sys::fuzz_target;
use queue_index::journal::read_journal;
use queue_index::storage::{Directory, MemoryDirectory};
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    let dir = MemoryDirectory::new();
    // Put arbitrary bytes under the expected journal path.
    if let Ok(mut w) = dir.append_file("q/ack_journal.jif") {
        let _ = w.write_all(data);
    }
    let _ = read_journal(&dir, "q/ack_journal.jif");
});
