//! Mount-target classification.
//!
//! A mount target is one of:
//!
//! - a drive specifier, `X:`;
//! - a raw mount-manager drive, `\\?\X:` or `\\.\X:`;
//! - a drive-rooted mount-manager directory, `\\?\X:\dir`;
//! - any other path, taken as a plain directory mount point.
//!
//! The predicates work on ASCII bytes and never allocate.

use crate::error::{MountError, MountResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const MOUNTMGR_PREFIX_LEN: usize = 6;

/// `X:` and nothing else.
pub fn is_drive(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() == 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// Starts with `\\?\X:` or `\\.\X:`.
pub fn is_mountmgr_mount_point(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= MOUNTMGR_PREFIX_LEN
        && b[0] == b'\\'
        && b[1] == b'\\'
        && (b[2] == b'?' || b[2] == b'.')
        && b[3] == b'\\'
        && b[4].is_ascii_alphabetic()
        && b[5] == b':'
}

/// A mount-manager mount point with nothing after the colon.
pub fn is_mountmgr_drive(path: &str) -> bool {
    is_mountmgr_mount_point(path) && path.len() == MOUNTMGR_PREFIX_LEN
}

/// Split `path` at its last separator into `(parent, last)`.
///
/// Trailing separators are ignored. A path without a separator has an empty
/// parent.
pub fn path_suffix(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('\\');
    match trimmed.rfind('\\') {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    }
}

/// Where a volume is exposed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum MountEndpoint {
    /// `X:`
    DriveLetter(char),
    /// `\\?\X:`
    MountmgrDrive(char),
    /// `\\?\X:\dir`
    MountmgrDirectory { path: String },
    /// Any other path.
    Directory { path: String },
}

impl MountEndpoint {
    /// True for endpoints registered through `create_drive`.
    pub fn is_drive(&self) -> bool {
        matches!(self, Self::DriveLetter(_) | Self::MountmgrDrive(_))
    }

    /// Upper-case drive letter, for drive endpoints.
    pub fn drive_letter(&self) -> Option<char> {
        match self {
            Self::DriveLetter(c) | Self::MountmgrDrive(c) => Some(*c),
            _ => None,
        }
    }

    /// Name handed to the mount manager.
    ///
    /// Drives become `\DosDevices\X:`; mount-manager directories become
    /// `\??\X:\dir`. Plain directories are passed through.
    pub fn mount_point(&self) -> String {
        match self {
            Self::DriveLetter(c) | Self::MountmgrDrive(c) => format!("\\DosDevices\\{c}:"),
            Self::MountmgrDirectory { path } => format!("\\??\\{}", &path[4..]),
            Self::Directory { path } => path.clone(),
        }
    }

    /// `(parent, leaf)` of a directory endpoint; `None` for drives.
    pub fn directory_parts(&self) -> Option<(&str, &str)> {
        match self {
            Self::MountmgrDirectory { path } | Self::Directory { path } => Some(path_suffix(path)),
            _ => None,
        }
    }
}

impl fmt::Display for MountEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriveLetter(c) => write!(f, "drive letter {c}:"),
            Self::MountmgrDrive(c) => write!(f, "mount-manager drive {c}:"),
            Self::MountmgrDirectory { path } => write!(f, "mount-manager directory {path}"),
            Self::Directory { path } => write!(f, "directory {path}"),
        }
    }
}

/// Classify a mount target.
///
/// Empty targets, targets containing NUL and mount-manager paths with junk
/// after the colon (`\\?\E:foo`) are rejected with
/// [`MountError::InvalidParameter`].
pub fn classify(target: &str) -> MountResult<MountEndpoint> {
    if target.is_empty() || target.contains('\0') {
        return Err(MountError::InvalidParameter(format!("{target:?}")));
    }
    if is_drive(target) {
        return Ok(MountEndpoint::DriveLetter(letter_at(target, 0)));
    }
    if is_mountmgr_drive(target) {
        return Ok(MountEndpoint::MountmgrDrive(letter_at(target, 4)));
    }
    if is_mountmgr_mount_point(target) {
        let rest = &target[MOUNTMGR_PREFIX_LEN..];
        if !rest.starts_with('\\') || rest.trim_matches('\\').is_empty() {
            return Err(MountError::InvalidParameter(format!("{target:?}")));
        }
        return Ok(MountEndpoint::MountmgrDirectory {
            path: target.to_string(),
        });
    }
    Ok(MountEndpoint::Directory {
        path: target.to_string(),
    })
}

fn letter_at(s: &str, i: usize) -> char {
    char::from(s.as_bytes()[i].to_ascii_uppercase())
}
