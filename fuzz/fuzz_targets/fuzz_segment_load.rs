#![no_main]

use libfuzzer_sys::fuzz_target;
use queue_index::segment::load_segment;
use queue_index::storage::{Directory, MemoryDirectory};
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    let dir = MemoryDirectory::new();
    // Put arbitrary bytes under the expected segment path.
    if let Ok(mut w) = dir.append_file("q/0.idx") {
        let _ = w.write_all(data);
    }
    let _ = load_segment(&dir, 0, "q/0.idx", None);
});
