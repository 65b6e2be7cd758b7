//! Extended-attribute lists.
//!
//! Extended attributes travel as a chain of variable-length records. Each
//! record starts with the byte offset of the next record, relative to its own
//! start; zero marks the last record.
//!
//! ```text
//! +0  u32 next_entry_offset
//! +4  u8  flags
//! +5  u8  name_length
//! +6  u16 value_length
//! +8  name[name_length] NUL value[value_length]
//! ```
//!
//! [`EaIter`] walks such a chain strictly forward and never reads past the
//! slice it was given: a link that lands at or beyond the end, a link that
//! overlaps its own record, or a record whose name/value overruns the end all
//! yield [`ProxyError::InvalidParameter`].

use crate::error::{ProxyError, ProxyResult};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of the fixed record header.
pub const EA_HEADER_LEN: usize = 8;

/// Records are chained on 4-byte boundaries.
const EA_ALIGN: usize = 4;

/// Flag bit: the attribute must be understood by the consumer.
pub const EA_NEED_EA: u8 = 0x80;

/// One borrowed record of an extended-attribute list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EaRecord<'a> {
    /// Record flags.
    pub flags: u8,
    /// Attribute name (without the NUL terminator).
    pub name: &'a [u8],
    /// Attribute value. Empty means "remove" in a set request.
    pub value: &'a [u8],
}

impl EaRecord<'_> {
    /// Unpadded encoded length of this record.
    pub fn encoded_len(&self) -> usize {
        EA_HEADER_LEN + self.name.len() + 1 + self.value.len()
    }

    /// Name as text, replacing invalid UTF-8.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name).into_owned()
    }

    /// Owned copy of this record.
    pub fn to_owned_attribute(&self) -> ExtendedAttribute {
        ExtendedAttribute {
            flags: self.flags,
            name: self.name_lossy(),
            value: self.value.to_vec(),
        }
    }
}

/// Owned extended attribute, as carried in replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedAttribute {
    /// Record flags.
    pub flags: u8,
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: Vec<u8>,
}

/// Forward-only walker over an extended-attribute list.
#[derive(Debug, Clone)]
pub struct EaIter<'a> {
    buf: &'a [u8],
    /// Offset of the next record to parse; `None` once the chain ended or a
    /// malformed record was reported.
    pos: Option<usize>,
}

impl<'a> EaIter<'a> {
    /// Walk the list in `buf`. An empty slice is an empty list.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: if buf.is_empty() { None } else { Some(0) },
        }
    }

    fn parse_at(&self, pos: usize) -> ProxyResult<(EaRecord<'a>, Option<usize>)> {
        let end = self.buf.len();
        let header = self
            .buf
            .get(pos..pos + EA_HEADER_LEN)
            .ok_or_else(|| ProxyError::invalid(format!("EA header at {pos} overruns {end}")))?;

        let next = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let flags = header[4];
        let name_len = header[5] as usize;
        let value_len = u16::from_le_bytes([header[6], header[7]]) as usize;

        let name_start = pos + EA_HEADER_LEN;
        let value_start = name_start + name_len + 1;
        let record_end = value_start + value_len;
        if record_end > end {
            return Err(ProxyError::invalid(format!(
                "EA record at {pos} needs {record_end} bytes, list has {end}"
            )));
        }

        let record = EaRecord {
            flags,
            name: &self.buf[name_start..name_start + name_len],
            value: &self.buf[value_start..record_end],
        };

        if next == 0 {
            return Ok((record, None));
        }
        if next < record_end - pos {
            return Err(ProxyError::invalid(format!(
                "EA next offset {next} at {pos} overlaps its own record"
            )));
        }
        match pos.checked_add(next) {
            Some(next_pos) if next_pos < end => Ok((record, Some(next_pos))),
            _ => Err(ProxyError::invalid(format!(
                "EA next offset {next} at {pos} points past list end {end}"
            ))),
        }
    }
}

impl<'a> Iterator for EaIter<'a> {
    type Item = ProxyResult<EaRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.pos.take()?;
        match self.parse_at(pos) {
            Ok((record, next)) => {
                self.pos = next;
                Some(Ok(record))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Walk an entire list, failing on the first malformed record.
pub fn walk_ea(buf: &[u8]) -> ProxyResult<Vec<EaRecord<'_>>> {
    EaIter::new(buf).collect()
}

/// Builds a well-formed extended-attribute list.
#[derive(Debug, Default)]
pub struct EaListBuilder {
    buf: BytesMut,
    /// Start offset of the last record, whose link is patched on push.
    last: Option<usize>,
}

impl EaListBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one attribute.
    pub fn push(&mut self, name: &[u8], value: &[u8], flags: u8) -> ProxyResult<&mut Self> {
        let name_len = u8::try_from(name.len())
            .map_err(|_| ProxyError::invalid(format!("EA name of {} bytes", name.len())))?;
        let value_len = u16::try_from(value.len())
            .map_err(|_| ProxyError::invalid(format!("EA value of {} bytes", value.len())))?;

        if let Some(last) = self.last {
            while self.buf.len() % EA_ALIGN != 0 {
                self.buf.put_u8(0);
            }
            let link = u32::try_from(self.buf.len() - last)
                .map_err(|_| ProxyError::invalid("EA list too large"))?;
            self.buf[last..last + 4].copy_from_slice(&link.to_le_bytes());
        }

        self.last = Some(self.buf.len());
        self.buf.put_u32_le(0);
        self.buf.put_u8(flags);
        self.buf.put_u8(name_len);
        self.buf.put_u16_le(value_len);
        self.buf.put_slice(name);
        self.buf.put_u8(0);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Finish the list.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Encode owned attributes into a list.
pub fn encode_ea(attrs: &[ExtendedAttribute]) -> ProxyResult<Bytes> {
    let mut builder = EaListBuilder::new();
    for attr in attrs {
        builder.push(attr.name.as_bytes(), &attr.value, attr.flags)?;
    }
    Ok(builder.finish())
}
