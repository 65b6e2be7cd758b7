//! Volume mount lifecycle.
//!
//! A volume served by the proxy becomes visible to the OS either as a drive
//! letter or as a directory mount point. This crate classifies mount targets
//! ([`path`]), talks to the OS mount manager through the [`MountManager`]
//! trait ([`mountmgr`]) and drives each [`Volume`] through
//! `Unmounted -> Mounting -> Mounted -> Unmounting -> Unmounted`
//! ([`lifecycle`]).
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use umfsp_mount::testing::RecordingMountManager;
//! use umfsp_mount::{MountLifecycle, MountState, Volume};
//!
//! let lifecycle = MountLifecycle::new(Arc::new(RecordingMountManager::new()));
//! let volume = Volume::new("memfs", ());
//! lifecycle.mount(&volume, "E:").unwrap();
//! assert_eq!(volume.state(), MountState::Mounted);
//! lifecycle.unmount(&volume).unwrap();
//! assert_eq!(volume.state(), MountState::Unmounted);
//! ```

pub mod error;
pub mod lifecycle;
pub mod mountmgr;
pub mod path;
pub mod testing;

pub use error::{MountError, MountResult};
pub use lifecycle::{MountInfo, MountLifecycle, MountState, Volume};
pub use mountmgr::{LoggingMountManager, MountManager};
pub use path::{
    MountEndpoint, classify, is_drive, is_mountmgr_drive, is_mountmgr_mount_point, path_suffix,
};
