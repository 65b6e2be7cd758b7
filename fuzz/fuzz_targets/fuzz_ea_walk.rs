//! Fuzz target for the extended-attribute list walker
//!
//! Raw mode feeds arbitrary driver payloads to the walker; it must either
//! yield records that lie inside the buffer or fail, never panic or loop.
//! Build mode encodes fuzzer-chosen attributes and checks that the walker
//! reads back exactly what was written.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use umfsp_core::{EaListBuilder, walk_ea};

#[derive(Arbitrary, Debug)]
struct Attr {
    flags: u8,
    name: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Arbitrary, Debug)]
enum FuzzInput {
    Raw(Vec<u8>),
    Build(Vec<Attr>),
}

fuzz_target!(|input: FuzzInput| {
    match input {
        FuzzInput::Raw(data) => {
            if let Ok(records) = walk_ea(&data) {
                let total: usize = records.iter().map(|r| r.encoded_len()).sum();
                assert!(total <= data.len());
            }
        }
        FuzzInput::Build(attrs) => {
            let mut builder = EaListBuilder::new();
            let mut pushed = Vec::new();
            for a in &attrs {
                if a.name.is_empty() || a.name.contains(&0) {
                    continue;
                }
                if builder.push(&a.name, &a.value, a.flags).is_ok() {
                    pushed.push(a);
                }
            }
            let buf = builder.finish();
            let records = walk_ea(&buf).expect("builder output must walk");
            assert_eq!(records.len(), pushed.len());
            for (r, a) in records.iter().zip(pushed) {
                assert_eq!(r.name, a.name.as_slice());
                assert_eq!(r.value, a.value.as_slice());
            }
        }
    }
});
