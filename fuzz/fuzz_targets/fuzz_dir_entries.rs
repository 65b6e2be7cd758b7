//! Fuzz target for the serialized directory-entry decoder
//!
//! The decoder consumes buffers handed back by the proxy; arbitrary bytes
//! must decode or fail cleanly, and every entry that decodes must fit in the
//! bytes it claims.

#![no_main]

use libfuzzer_sys::fuzz_target;
use umfsp_core::{DirEntry, decode_entries};

fuzz_target!(|data: &[u8]| {
    let mut consumed = 0usize;
    for entry in decode_entries(data) {
        let Ok(entry) = entry else { break };
        consumed += entry.encoded_len();
        assert!(consumed <= data.len() + 8);
    }

    if let Ok((entry, size)) = DirEntry::decode(data) {
        assert!(size <= data.len());
        assert!(entry.name.len() + 64 <= size);
    }
});
