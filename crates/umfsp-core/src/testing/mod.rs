//! Testing utilities: an in-memory provider plus fixture helpers shared by
//! unit tests, integration tests, benches and the CLI.

pub mod memfs;

pub use memfs::{MemFile, MemFs, wildcard_match};

use crate::error::ProxyResult;

/// Zero-padded file names `prefix0000 .. prefix{n-1}`, in ascending order.
pub fn sorted_names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i:04}")).collect()
}

/// A `MemFs` whose `dir` holds `n` empty files named by [`sorted_names`].
pub fn populated_memfs(dir: &str, prefix: &str, n: usize) -> ProxyResult<MemFs> {
    let fs = MemFs::new();
    if dir != "\\" {
        fs.add_dir(dir)?;
    }
    let base = dir.trim_end_matches('\\');
    for name in sorted_names(prefix, n) {
        fs.add_file(&format!("{base}\\{name}"), b"")?;
    }
    Ok(fs)
}
