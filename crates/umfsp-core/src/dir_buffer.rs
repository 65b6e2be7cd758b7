//! Per-handle directory enumeration cache.
//!
//! Listing a directory can be expensive for a provider (network round trips,
//! decryption, etc.), while the driver reads directories in small chunks. A
//! [`DirBuffer`] asks the provider once, stores the serialized entries, and
//! then answers successive read-directory requests from memory, resuming at
//! its cursor.
//!
//! # Lifecycle
//!
//! 1. **Fill**: [`DirBuffer::ensure_filled`] runs the provider's single-step
//!    enumeration until it is exhausted or the buffer reaches its size bound
//! 2. **Copy**: [`DirBuffer::copy_out`] hands out whole entries from the cursor
//! 3. **Invalidate**: rewind or a new pattern discards the contents
//! 4. **Destroy**: dropping the buffer (on handle close) releases the region
//!
//! The buffer performs no locking; the owning handle serializes access.
//!
//! # Entry format
//!
//! Entries are little endian and padded to 8 bytes:
//!
//! ```text
//! +0  u16 size (including padding)
//! +2  u16 name_length
//! +4  u32 attributes
//! +8  u64 file_size, allocation_size, creation_time, last_access_time,
//!         last_write_time, change_time, index_number
//! +64 name (UTF-8)
//! ```

use crate::error::{ProxyError, ProxyResult};
use crate::provider::FileInfo;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Size of the fixed part of a serialized entry.
pub const DIR_ENTRY_HEADER_LEN: usize = 64;

/// Serialized entries start on 8-byte boundaries.
const DIR_ENTRY_ALIGN: usize = 8;

/// One directory entry as produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (single path component).
    pub name: String,
    /// Entry metadata.
    pub info: FileInfo,
}

impl DirEntry {
    /// Create a new entry.
    pub fn new(name: impl Into<String>, info: FileInfo) -> Self {
        Self {
            name: name.into(),
            info,
        }
    }

    /// Serialized size including padding.
    pub fn encoded_len(&self) -> usize {
        (DIR_ENTRY_HEADER_LEN + self.name.len()).next_multiple_of(DIR_ENTRY_ALIGN)
    }

    /// Append the serialized entry to `out`.
    pub fn encode_into(&self, out: &mut BytesMut) -> ProxyResult<()> {
        let size = u16::try_from(self.encoded_len())
            .map_err(|_| ProxyError::invalid(format!("entry name of {} bytes", self.name.len())))?;
        // size fits in u16, so the name length does too
        #[allow(clippy::cast_possible_truncation)]
        let name_len = self.name.len() as u16;

        let start = out.len();
        out.put_u16_le(size);
        out.put_u16_le(name_len);
        out.put_u32_le(self.info.attributes);
        out.put_u64_le(self.info.file_size);
        out.put_u64_le(self.info.allocation_size);
        out.put_u64_le(self.info.creation_time);
        out.put_u64_le(self.info.last_access_time);
        out.put_u64_le(self.info.last_write_time);
        out.put_u64_le(self.info.change_time);
        out.put_u64_le(self.info.index_number);
        out.put_slice(self.name.as_bytes());
        out.put_bytes(0, start + usize::from(size) - out.len());
        Ok(())
    }

    /// Decode the entry at the start of `buf`.
    ///
    /// Returns the entry and the number of bytes it occupies.
    pub fn decode(buf: &[u8]) -> ProxyResult<(DirEntry, usize)> {
        if buf.len() < DIR_ENTRY_HEADER_LEN {
            return Err(ProxyError::invalid(format!(
                "directory entry header needs {DIR_ENTRY_HEADER_LEN} bytes, have {}",
                buf.len()
            )));
        }
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(raw)
        };

        let size = usize::from(u16_at(0));
        let name_len = usize::from(u16_at(2));
        if size < DIR_ENTRY_HEADER_LEN + name_len || size > buf.len() {
            return Err(ProxyError::invalid(format!(
                "directory entry size {size} inconsistent (name {name_len}, available {})",
                buf.len()
            )));
        }

        let name = std::str::from_utf8(&buf[DIR_ENTRY_HEADER_LEN..DIR_ENTRY_HEADER_LEN + name_len])
            .map_err(|e| ProxyError::invalid(format!("directory entry name: {e}")))?
            .to_owned();
        let info = FileInfo {
            attributes: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            file_size: u64_at(8),
            allocation_size: u64_at(16),
            creation_time: u64_at(24),
            last_access_time: u64_at(32),
            last_write_time: u64_at(40),
            change_time: u64_at(48),
            index_number: u64_at(56),
        };
        Ok((DirEntry { name, info }, size))
    }
}

/// Iterator decoding consecutive serialized entries.
#[derive(Debug, Clone)]
pub struct DirEntryIter<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl Iterator for DirEntryIter<'_> {
    type Item = ProxyResult<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        match DirEntry::decode(self.buf) {
            Ok((entry, len)) => {
                self.buf = &self.buf[len..];
                Some(Ok(entry))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a run of serialized entries, such as the output of
/// [`DirBuffer::copy_out`].
pub fn decode_entries(buf: &[u8]) -> DirEntryIter<'_> {
    DirEntryIter { buf, failed: false }
}

/// Cached, serialized enumeration results for one open directory handle.
#[derive(Debug)]
pub struct DirBuffer {
    /// Handle that owns this buffer (for diagnostics and errors).
    handle: u64,
    /// Serialized entries in enumeration order.
    region: BytesMut,
    /// Start offset of each entry in `region`.
    index: Vec<u32>,
    /// Number of entries already handed out.
    cursor: usize,
    /// Bumped on every invalidation.
    generation: u64,
    /// Whether the contents reflect a completed fill.
    filled: bool,
    /// Fill stopped at the size bound, not at provider exhaustion.
    truncated: bool,
    /// Pattern the contents were filled for.
    pattern: Option<String>,
    /// Upper bound on `region`.
    max_bytes: usize,
}

/// Read-only view over a directory buffer.
///
/// Obtained from [`DirBuffer::peek`]; borrowing the buffer guarantees the
/// view cannot outlive or alias a mutation.
#[derive(Debug, Clone, Copy)]
pub struct DirBufferView<'a> {
    /// Raw serialized region.
    pub region: &'a [u8],
    /// Start offset of each entry in `region`.
    pub index: &'a [u32],
    /// Entries already handed out.
    pub cursor: usize,
    /// Valid entries in the buffer.
    pub count: usize,
    /// Fill/invalidate generation.
    pub generation: u64,
}

impl<'a> DirBufferView<'a> {
    /// Bytes of the entries not yet handed out.
    pub fn remaining(&self) -> &'a [u8] {
        match self.index.get(self.cursor) {
            Some(&start) => &self.region[start as usize..],
            None => &[],
        }
    }

    /// Decode the entries not yet handed out.
    pub fn remaining_entries(&self) -> DirEntryIter<'a> {
        decode_entries(self.remaining())
    }
}

impl DirBuffer {
    /// Create an empty, unfilled buffer for `handle`.
    pub fn new(handle: u64, max_bytes: usize) -> Self {
        Self {
            handle,
            region: BytesMut::new(),
            index: Vec::new(),
            cursor: 0,
            generation: 0,
            filled: false,
            truncated: false,
            pattern: None,
            max_bytes,
        }
    }

    /// Owning handle.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Number of valid entries.
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Entries already handed out.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the buffer holds a completed fill.
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// Whether the last fill stopped at the size bound.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Pattern the buffer was last filled for.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Point the buffer at `pattern`, invalidating it when the pattern
    /// differs from the one it was filled for.
    ///
    /// Returns `true` when this invalidated the contents.
    pub fn retarget(&mut self, pattern: Option<&str>) -> bool {
        if self.pattern.as_deref() == pattern {
            return false;
        }
        self.pattern = pattern.map(str::to_owned);
        if self.filled {
            self.invalidate();
            true
        } else {
            false
        }
    }

    /// Fill the buffer from `fill` unless it already holds a valid fill.
    ///
    /// `fill(position)` is one provider enumeration step and returns `None`
    /// once exhausted. Entries are kept in the order produced. Filling stops
    /// early when the next entry would push the region past its bound.
    ///
    /// Returns `true` if the provider was queried. On a provider error the
    /// partial contents are discarded and the error is returned.
    pub fn ensure_filled<F>(&mut self, mut fill: F) -> ProxyResult<bool>
    where
        F: FnMut(u64) -> ProxyResult<Option<DirEntry>>,
    {
        if self.filled {
            return Ok(false);
        }

        self.region.clear();
        self.index.clear();
        self.cursor = 0;
        self.truncated = false;

        let mut position = 0u64;
        loop {
            let entry = match fill(position) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if self.region.len() + entry.encoded_len() > self.max_bytes {
                warn!(
                    handle = self.handle,
                    entries = self.index.len(),
                    max_bytes = self.max_bytes,
                    "directory buffer full, enumeration truncated"
                );
                self.truncated = true;
                break;
            }
            let offset = u32::try_from(self.region.len())
                .map_err(|_| ProxyError::Internal("directory buffer offset overflow".into()))?;
            if let Err(e) = entry.encode_into(&mut self.region) {
                self.invalidate();
                return Err(e);
            }
            self.index.push(offset);
            position += 1;
        }

        self.filled = true;
        debug!(
            handle = self.handle,
            entries = self.index.len(),
            bytes = self.region.len(),
            generation = self.generation,
            "directory buffer filled"
        );
        Ok(true)
    }

    /// Discard the contents so the next [`ensure_filled`](Self::ensure_filled)
    /// queries the provider again.
    pub fn invalidate(&mut self) {
        self.region.clear();
        self.index.clear();
        self.cursor = 0;
        self.filled = false;
        self.truncated = false;
        self.generation += 1;
        trace!(handle = self.handle, generation = self.generation, "directory buffer invalidated");
    }

    /// Byte length of entry `i`.
    fn entry_len(&self, i: usize) -> usize {
        let start = self.index[i] as usize;
        let end = self
            .index
            .get(i + 1)
            .map_or(self.region.len(), |&next| next as usize);
        end - start
    }

    /// Name of the entry that begins at byte `start` of the region.
    fn name_at(&self, start: usize) -> &str {
        let name_len = usize::from(u16::from_le_bytes([self.region[start + 2], self.region[start + 3]]));
        let name_start = start + DIR_ENTRY_HEADER_LEN;
        std::str::from_utf8(&self.region[name_start..name_start + name_len]).unwrap_or_default()
    }

    /// Move the cursor to the first entry whose name sorts after `marker`.
    ///
    /// Assumes entries are in ascending name order, which providers are
    /// required to produce.
    pub fn seek_after(&mut self, marker: &str) {
        self.cursor = self
            .index
            .partition_point(|&start| self.name_at(start as usize) <= marker);
    }

    /// Copy as many whole entries as fit in `max_bytes` into `dest`,
    /// starting at the cursor, and advance the cursor past them.
    ///
    /// Returns the number of entries copied. Fails with
    /// [`ProxyError::NoMoreEntries`] when the cursor is already at the end,
    /// and with [`ProxyError::BufferTooSmall`] when not even the next entry
    /// fits (the cursor is left unchanged).
    pub fn copy_out(&mut self, dest: &mut Vec<u8>, max_bytes: usize) -> ProxyResult<usize> {
        if self.cursor >= self.index.len() {
            return Err(ProxyError::NoMoreEntries);
        }

        let mut used = 0usize;
        let mut end = self.cursor;
        while end < self.index.len() {
            let len = self.entry_len(end);
            if used + len > max_bytes {
                break;
            }
            used += len;
            end += 1;
        }

        if end == self.cursor {
            return Err(ProxyError::BufferTooSmall {
                available: max_bytes,
                required: self.entry_len(self.cursor),
            });
        }

        let start = self.index[self.cursor] as usize;
        dest.extend_from_slice(&self.region[start..start + used]);
        let copied = end - self.cursor;
        self.cursor = end;
        Ok(copied)
    }

    /// Expose the buffer contents without copying or moving the cursor.
    ///
    /// Fails with [`ProxyError::InvalidHandle`] if the buffer was never
    /// filled.
    pub fn peek(&self) -> ProxyResult<DirBufferView<'_>> {
        if !self.filled {
            return Err(ProxyError::InvalidHandle(self.handle));
        }
        Ok(DirBufferView {
            region: &self.region,
            index: &self.index,
            cursor: self.cursor,
            count: self.index.len(),
            generation: self.generation,
        })
    }
}

impl Drop for DirBuffer {
    fn drop(&mut self) {
        trace!(handle = self.handle, bytes = self.region.len(), "directory buffer released");
    }
}
