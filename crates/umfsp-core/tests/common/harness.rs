//! Test harness driving a `DispatchCore` over an in-memory provider.
//!
//! `TestVolume` wraps request construction so tests read as a sequence of
//! driver operations.

// Not all tests use all TestVolume methods
#![allow(dead_code)]

use std::sync::{Arc, Once};
use umfsp_core::testing::{MemFs, populated_memfs};
use umfsp_core::{
    DispatchConfig, DispatchCore, Operation, OpenOptions, Request, RequestTokenGenerator,
    Response, ResponsePayload, Status, decode_entries,
};

static TRACING: Once = Once::new();

/// Install a test subscriber once per process (`RUST_LOG` controls output).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A dispatch core plus token source.
pub struct TestVolume {
    pub core: Arc<DispatchCore<MemFs>>,
    tokens: RequestTokenGenerator,
}

impl TestVolume {
    pub fn new(fs: MemFs, config: DispatchConfig) -> Self {
        init_tracing();
        Self {
            core: Arc::new(DispatchCore::new(fs, config)),
            tokens: RequestTokenGenerator::new(),
        }
    }

    /// Empty volume with default configuration.
    pub fn empty() -> Self {
        Self::new(MemFs::new(), DispatchConfig::default())
    }

    /// Volume whose `dir` holds `n` files `f0000..`.
    pub fn with_files(dir: &str, n: usize) -> Self {
        let fs = populated_memfs(dir, "f", n).expect("populate memfs");
        Self::new(fs, DispatchConfig::default())
    }

    pub fn fs(&self) -> &MemFs {
        self.core.provider()
    }

    /// Send one request and assert the reply carries its token.
    pub fn send(&self, handle: u64, op: Operation) -> Response {
        let token = self.tokens.next();
        let reply = self.core.dispatch(Request::new(token, handle, op));
        assert_eq!(reply.token, token, "reply token mismatch");
        reply
    }

    /// Open `path`, panicking on failure.
    pub fn open(&self, path: &str) -> u64 {
        let reply = self.send(
            0,
            Operation::Open {
                path: path.into(),
                options: OpenOptions::default(),
            },
        );
        match reply.payload {
            ResponsePayload::Opened { handle, .. } => handle,
            _ => panic!("open {path} failed: {}", reply.status),
        }
    }

    pub fn close(&self, handle: u64) {
        assert_eq!(self.send(handle, Operation::Close).status, Status::Success);
    }

    /// One query-directory call.
    pub fn query(&self, handle: u64, pattern: Option<&str>, marker: Option<&str>, max_bytes: usize) -> Response {
        self.send(
            handle,
            Operation::QueryDirectory {
                pattern: pattern.map(str::to_owned),
                marker: marker.map(str::to_owned),
                restart: false,
                max_bytes,
            },
        )
    }

    /// Enumerate `handle` to the end in chunks of `max_bytes`.
    pub fn list_all(&self, handle: u64, pattern: Option<&str>, max_bytes: usize) -> Vec<String> {
        let mut names = Vec::new();
        loop {
            let reply = self.query(handle, pattern, None, max_bytes);
            match (reply.status, reply.payload) {
                (Status::Success, ResponsePayload::Directory { data, .. }) => {
                    names.extend(decode_entries(&data).map(|e| e.expect("decode").name));
                }
                (Status::NoMoreEntries, _) => return names,
                (status, _) => panic!("query failed: {status}"),
            }
        }
    }
}
