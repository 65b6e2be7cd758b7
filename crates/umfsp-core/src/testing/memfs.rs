//! In-memory provider.
//!
//! `MemFs` keeps the whole tree in one ordered map keyed by full path
//! (`\`, `\dir`, `\dir\file`). Ordered keys make directory enumeration yield
//! children in ascending name order, which is what the directory buffer's
//! resume marker relies on.

use crate::dir_buffer::DirEntry;
use crate::ea::{EaRecord, ExtendedAttribute, encode_ea};
use crate::error::{ProxyError, ProxyResult};
use crate::provider::{
    BasicInfo, ByteRange, CreateOptions, FileInfo, FileSystemProvider, OpenOptions, VolumeInfo,
    WriteMode, WriteResult, attributes, filetime_now,
};
use crate::status::Status;
use crate::wksid::{self, WellKnownSid};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Default reported capacity.
const DEFAULT_CAPACITY: u64 = 1 << 30;

/// Allocation granularity.
const ALLOCATION_UNIT: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeLock {
    range: ByteRange,
    exclusive: bool,
    owner: u64,
}

#[derive(Debug, Clone, Default)]
struct Node {
    info: FileInfo,
    data: Vec<u8>,
    ea: BTreeMap<String, (u8, Vec<u8>)>,
    security: Vec<u8>,
    reparse: Option<Vec<u8>>,
    locks: Vec<RangeLock>,
}

impl Node {
    fn sync_size(&mut self) {
        self.info.file_size = self.data.len() as u64;
        self.info.allocation_size = self
            .info
            .allocation_size
            .max(self.info.file_size.next_multiple_of(ALLOCATION_UNIT));
    }

    fn touch_write(&mut self) {
        let now = filetime_now();
        self.info.last_write_time = now;
        self.info.change_time = now;
    }
}

/// Per-handle context: the path the handle was opened at.
#[derive(Debug)]
pub struct MemFile {
    path: RwLock<String>,
}

impl MemFile {
    pub fn path(&self) -> String {
        self.path.read().clone()
    }
}

/// Provider holding everything in memory.
#[derive(Debug)]
pub struct MemFs {
    nodes: RwLock<BTreeMap<String, Node>>,
    next_index: AtomicU64,
    label: String,
    capacity: u64,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    /// Empty volume containing only the root directory.
    pub fn new() -> Self {
        Self::with_label("memfs")
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        let fs = Self {
            nodes: RwLock::new(BTreeMap::new()),
            next_index: AtomicU64::new(1),
            label: label.into(),
            capacity: DEFAULT_CAPACITY,
        };
        let root = fs.new_node(attributes::DIRECTORY, None);
        fs.nodes.write().insert(String::from("\\"), root);
        fs
    }

    fn new_node(&self, attrs: u32, security: Option<Vec<u8>>) -> Node {
        let now = filetime_now();
        Node {
            info: FileInfo {
                attributes: attrs,
                creation_time: now,
                last_access_time: now,
                last_write_time: now,
                change_time: now,
                index_number: self.next_index.fetch_add(1, Ordering::Relaxed),
                ..FileInfo::default()
            },
            security: security.unwrap_or_else(|| wksid::get(WellKnownSid::LocalSystem).to_bytes()),
            ..Node::default()
        }
    }

    /// Create a file with `contents`, for test setup.
    pub fn add_file(&self, path: &str, contents: &[u8]) -> ProxyResult<()> {
        let (file, _) = self.create(path, &CreateOptions::default())?;
        self.write(&file, WriteMode::At(0), contents)?;
        Ok(())
    }

    /// Create a directory, for test setup.
    pub fn add_dir(&self, path: &str) -> ProxyResult<()> {
        self.create(
            path,
            &CreateOptions {
                directory: true,
                ..CreateOptions::default()
            },
        )
        .map(|_| ())
    }

    /// Whether `path` exists.
    pub fn exists(&self, path: &str) -> bool {
        self.nodes.read().contains_key(&normalize(path))
    }

    /// Number of nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    fn with_node<T>(&self, file: &MemFile, f: impl FnOnce(&Node) -> ProxyResult<T>) -> ProxyResult<T> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(&*file.path.read())
            .ok_or(ProxyError::Provider(Status::ObjectNameNotFound))?;
        f(node)
    }

    fn with_node_mut<T>(
        &self,
        file: &MemFile,
        f: impl FnOnce(&mut Node) -> ProxyResult<T>,
    ) -> ProxyResult<T> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&*file.path.read())
            .ok_or(ProxyError::Provider(Status::ObjectNameNotFound))?;
        f(node)
    }
}

/// Strip a trailing separator (except on the root).
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('\\');
    if trimmed.is_empty() {
        String::from("\\")
    } else if trimmed.starts_with('\\') {
        trimmed.to_owned()
    } else {
        format!("\\{trimmed}")
    }
}

/// Parent directory of a normalized path.
fn parent_of(path: &str) -> &str {
    match path.rfind('\\') {
        Some(0) | None => "\\",
        Some(i) => &path[..i],
    }
}

/// Prefix shared by the children of `dir`.
fn child_prefix(dir: &str) -> String {
    if dir == "\\" {
        String::from("\\")
    } else {
        format!("{dir}\\")
    }
}

/// Case-insensitive `*` / `?` matching.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let n: Vec<char> = name.chars().flat_map(char::to_lowercase).collect();
    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ni < n.len() {
        match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ni));
                pi += 1;
            }
            Some(&c) if c == '?' || c == n[ni] => {
                pi += 1;
                ni += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    pi = star + 1;
                    ni = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

fn conflicts(existing: &RangeLock, range: &ByteRange, exclusive: bool, owner: u64) -> bool {
    existing.range.overlaps(range) && (existing.exclusive || exclusive) && existing.owner != owner
}

impl FileSystemProvider for MemFs {
    type FileContext = MemFile;

    fn get_volume_info(&self) -> ProxyResult<VolumeInfo> {
        let used: u64 = self.nodes.read().values().map(|n| n.info.allocation_size).sum();
        Ok(VolumeInfo {
            total_size: self.capacity,
            free_size: self.capacity.saturating_sub(used),
            label: self.label.clone(),
        })
    }

    fn create(&self, path: &str, options: &CreateOptions) -> ProxyResult<(MemFile, FileInfo)> {
        let path = normalize(path);
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Err(Status::ObjectNameCollision.into());
        }
        match nodes.get(parent_of(&path)) {
            Some(parent) if parent.info.is_directory() => {}
            Some(_) => return Err(Status::NotADirectory.into()),
            None => return Err(Status::ObjectPathNotFound.into()),
        }

        let attrs = if options.directory {
            attributes::DIRECTORY | (options.attributes & !attributes::NORMAL)
        } else if options.attributes == 0 {
            attributes::ARCHIVE
        } else {
            options.attributes & !attributes::DIRECTORY
        };
        let mut node = self.new_node(attrs, options.security_descriptor.clone());
        node.info.allocation_size = options.allocation_size.next_multiple_of(ALLOCATION_UNIT);
        let info = node.info;
        trace!(%path, directory = options.directory, "memfs create");
        nodes.insert(path.clone(), node);
        Ok((
            MemFile {
                path: RwLock::new(path),
            },
            info,
        ))
    }

    fn open(&self, path: &str, _options: &OpenOptions) -> ProxyResult<(MemFile, FileInfo)> {
        let path = normalize(path);
        let nodes = self.nodes.read();
        let Some(node) = nodes.get(&path) else {
            let status = if nodes.contains_key(parent_of(&path)) {
                Status::ObjectNameNotFound
            } else {
                Status::ObjectPathNotFound
            };
            return Err(status.into());
        };
        let info = node.info;
        drop(nodes);
        Ok((
            MemFile {
                path: RwLock::new(path),
            },
            info,
        ))
    }

    fn cleanup(&self, file: &MemFile, _path: &str, delete: bool) {
        let path = file.path();
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(&path) {
            node.locks.clear();
        }
        if delete && path != "\\" {
            trace!(%path, "memfs delete on cleanup");
            nodes.remove(&path);
        }
    }

    fn read(&self, file: &MemFile, offset: u64, length: u32) -> ProxyResult<Bytes> {
        self.with_node(file, |node| {
            if node.info.is_directory() {
                return Err(Status::FileIsADirectory.into());
            }
            let len = node.data.len() as u64;
            if offset >= len {
                return Err(Status::EndOfFile.into());
            }
            // offset < len, which fits in usize
            #[allow(clippy::cast_possible_truncation)]
            let start = offset as usize;
            let end = (start + length as usize).min(node.data.len());
            Ok(Bytes::copy_from_slice(&node.data[start..end]))
        })
    }

    fn write(&self, file: &MemFile, mode: WriteMode, data: &[u8]) -> ProxyResult<WriteResult> {
        if u32::try_from(data.len()).is_err() {
            return Err(ProxyError::invalid("write too large"));
        }
        self.with_node_mut(file, |node| {
            if node.info.is_directory() {
                return Err(Status::FileIsADirectory.into());
            }
            let current = node.data.len();
            let (start, count) = match mode {
                WriteMode::At(offset) => {
                    let start = usize::try_from(offset).map_err(|_| Status::DiskFull)?;
                    (start, data.len())
                }
                WriteMode::Append => (current, data.len()),
                WriteMode::Constrained(offset) => {
                    let start = usize::try_from(offset).unwrap_or(usize::MAX);
                    (start, current.saturating_sub(start).min(data.len()))
                }
            };
            if count > 0 {
                let end = start.checked_add(count).ok_or(Status::DiskFull)?;
                if end > node.data.len() {
                    node.data.resize(end, 0);
                }
                node.data[start..end].copy_from_slice(&data[..count]);
                node.sync_size();
                node.touch_write();
            }
            // count <= data.len(), checked above
            #[allow(clippy::cast_possible_truncation)]
            let bytes_written = count as u32;
            Ok(WriteResult {
                bytes_written,
                info: node.info,
            })
        })
    }

    fn flush(&self, file: &MemFile) -> ProxyResult<FileInfo> {
        self.with_node(file, |node| Ok(node.info))
    }

    fn get_file_info(&self, file: &MemFile) -> ProxyResult<FileInfo> {
        self.with_node(file, |node| Ok(node.info))
    }

    fn set_basic_info(&self, file: &MemFile, info: &BasicInfo) -> ProxyResult<FileInfo> {
        self.with_node_mut(file, |node| {
            if let Some(attrs) = info.attributes {
                let dir = node.info.attributes & attributes::DIRECTORY;
                node.info.attributes = (attrs & !attributes::DIRECTORY) | dir;
            }
            if let Some(t) = info.creation_time {
                node.info.creation_time = t;
            }
            if let Some(t) = info.last_access_time {
                node.info.last_access_time = t;
            }
            if let Some(t) = info.last_write_time {
                node.info.last_write_time = t;
            }
            if let Some(t) = info.change_time {
                node.info.change_time = t;
            }
            Ok(node.info)
        })
    }

    fn set_file_size(&self, file: &MemFile, new_size: u64, allocation_only: bool) -> ProxyResult<FileInfo> {
        let size = usize::try_from(new_size).map_err(|_| Status::DiskFull)?;
        self.with_node_mut(file, |node| {
            if node.info.is_directory() {
                return Err(Status::FileIsADirectory.into());
            }
            if allocation_only {
                node.info.allocation_size = new_size.next_multiple_of(ALLOCATION_UNIT);
                if node.data.len() > size {
                    node.data.truncate(size);
                }
                node.info.file_size = node.data.len() as u64;
            } else {
                node.data.resize(size, 0);
                node.sync_size();
            }
            node.touch_write();
            Ok(node.info)
        })
    }

    fn can_delete(&self, file: &MemFile, _path: &str) -> ProxyResult<()> {
        let path = file.path();
        if path == "\\" {
            return Err(Status::AccessDenied.into());
        }
        let nodes = self.nodes.read();
        let node = nodes.get(&path).ok_or(Status::ObjectNameNotFound)?;
        if node.info.attributes & attributes::READONLY != 0 {
            return Err(Status::AccessDenied.into());
        }
        let prefix = child_prefix(&path);
        if node.info.is_directory()
            && nodes
                .range(prefix.clone()..)
                .next()
                .is_some_and(|(k, _)| k.starts_with(&prefix))
        {
            return Err(Status::DirectoryNotEmpty.into());
        }
        Ok(())
    }

    fn rename(
        &self,
        file: &MemFile,
        _path: &str,
        new_path: &str,
        replace_if_exists: bool,
    ) -> ProxyResult<()> {
        let old = file.path();
        let new = normalize(new_path);
        if old == new {
            return Ok(());
        }
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&old) {
            return Err(Status::ObjectNameNotFound.into());
        }
        if !nodes.get(parent_of(&new)).is_some_and(|p| p.info.is_directory()) {
            return Err(Status::ObjectPathNotFound.into());
        }
        if let Some(target) = nodes.get(&new) {
            if !replace_if_exists {
                return Err(Status::ObjectNameCollision.into());
            }
            if target.info.is_directory() {
                return Err(Status::AccessDenied.into());
            }
        }
        let old_prefix = child_prefix(&old);
        if new.starts_with(&old_prefix) {
            return Err(Status::InvalidParameter.into());
        }

        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| **k == old || k.starts_with(&old_prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(mut node) = nodes.remove(&key) {
                node.info.change_time = filetime_now();
                let renamed = format!("{new}{}", &key[old.len()..]);
                nodes.insert(renamed, node);
            }
        }
        *file.path.write() = new;
        Ok(())
    }

    fn read_directory(
        &self,
        file: &MemFile,
        pattern: Option<&str>,
        position: u64,
    ) -> ProxyResult<Option<DirEntry>> {
        let dir = file.path();
        let nodes = self.nodes.read();
        match nodes.get(&dir) {
            Some(node) if node.info.is_directory() => {}
            Some(_) => return Err(Status::NotADirectory.into()),
            None => return Err(Status::ObjectNameNotFound.into()),
        }
        let prefix = child_prefix(&dir);
        let skip = usize::try_from(position).unwrap_or(usize::MAX);
        let entry = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, node)| {
                let name = &k[prefix.len()..];
                (!name.is_empty() && !name.contains('\\')).then_some((name, node))
            })
            .filter(|(name, _)| pattern.is_none_or(|p| wildcard_match(p, name)))
            .nth(skip)
            .map(|(name, node)| DirEntry::new(name, node.info));
        Ok(entry)
    }

    fn get_security(&self, file: &MemFile) -> ProxyResult<Bytes> {
        self.with_node(file, |node| Ok(Bytes::copy_from_slice(&node.security)))
    }

    fn set_security(&self, file: &MemFile, _security_information: u32, descriptor: &[u8]) -> ProxyResult<()> {
        self.with_node_mut(file, |node| {
            node.security = descriptor.to_vec();
            node.info.change_time = filetime_now();
            Ok(())
        })
    }

    fn get_ea(&self, file: &MemFile) -> ProxyResult<Bytes> {
        self.with_node(file, |node| {
            let attrs: Vec<ExtendedAttribute> = node
                .ea
                .iter()
                .map(|(name, (flags, value))| ExtendedAttribute {
                    flags: *flags,
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect();
            encode_ea(&attrs)
        })
    }

    fn set_ea(&self, file: &MemFile, records: &[EaRecord<'_>]) -> ProxyResult<FileInfo> {
        self.with_node_mut(file, |node| {
            for record in records {
                let name = record.name_lossy().to_uppercase();
                if record.value.is_empty() {
                    node.ea.remove(&name);
                } else {
                    node.ea.insert(name, (record.flags, record.value.to_vec()));
                }
            }
            node.info.change_time = filetime_now();
            Ok(node.info)
        })
    }

    fn lock(&self, file: &MemFile, range: ByteRange, exclusive: bool, owner: u64) -> ProxyResult<()> {
        self.with_node_mut(file, |node| {
            if node.locks.iter().any(|l| conflicts(l, &range, exclusive, owner)) {
                return Err(Status::LockNotGranted.into());
            }
            node.locks.push(RangeLock {
                range,
                exclusive,
                owner,
            });
            Ok(())
        })
    }

    fn unlock(&self, file: &MemFile, range: ByteRange, owner: u64) -> ProxyResult<()> {
        self.with_node_mut(file, |node| {
            let idx = node
                .locks
                .iter()
                .position(|l| l.range == range && l.owner == owner)
                .ok_or(Status::RangeNotLocked)?;
            node.locks.remove(idx);
            Ok(())
        })
    }

    fn get_reparse_point(&self, file: &MemFile, _path: &str) -> ProxyResult<Bytes> {
        self.with_node(file, |node| {
            node.reparse
                .as_deref()
                .map(Bytes::copy_from_slice)
                .ok_or_else(|| Status::NotAReparsePoint.into())
        })
    }

    fn set_reparse_point(&self, file: &MemFile, _path: &str, data: &[u8]) -> ProxyResult<()> {
        if data.is_empty() {
            return Err(Status::InvalidParameter.into());
        }
        self.with_node_mut(file, |node| {
            node.reparse = Some(data.to_vec());
            node.info.attributes |= attributes::REPARSE_POINT;
            Ok(())
        })
    }

    fn delete_reparse_point(&self, file: &MemFile, _path: &str, _data: &[u8]) -> ProxyResult<()> {
        self.with_node_mut(file, |node| {
            if node.reparse.take().is_none() {
                return Err(Status::NotAReparsePoint.into());
            }
            node.info.attributes &= !attributes::REPARSE_POINT;
            Ok(())
        })
    }
}
