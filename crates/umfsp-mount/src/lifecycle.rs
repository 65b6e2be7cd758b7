//! Volume mount state machine.
//!
//! ```text
//! Unmounted --mount--> Mounting --ok--> Mounted --unmount--> Unmounting --> Unmounted
//!                          \--err--> Unmounted
//! ```
//!
//! The volume lock is held only while a transition is checked and applied.
//! Mount-manager calls run without it, so a slow OS call never blocks
//! [`Volume::state`] readers.

use crate::error::{MountError, MountResult};
use crate::mountmgr::MountManager;
use crate::path::{self, MountEndpoint};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use umfsp_core::Status;
use uuid::Uuid;

/// Lifecycle state of a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    #[default]
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MountState::Unmounted => "unmounted",
            MountState::Mounting => "mounting",
            MountState::Mounted => "mounted",
            MountState::Unmounting => "unmounting",
        })
    }
}

/// Where a mounted volume is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    /// Classified target.
    pub endpoint: MountEndpoint,
    /// Normalized name passed to the mount manager.
    pub mount_point: String,
    /// Identifier passed to the mount manager for this mount.
    pub unique_id: Uuid,
}

#[derive(Debug, Default)]
struct VolumeInner {
    state: MountState,
    mount: Option<MountInfo>,
}

/// One mountable volume and the provider serving it.
pub struct Volume<P> {
    id: Uuid,
    name: String,
    provider: Arc<P>,
    inner: Mutex<VolumeInner>,
}

impl<P> Volume<P> {
    /// New unmounted volume with a random identifier.
    pub fn new(name: impl Into<String>, provider: P) -> Self {
        Self::with_shared_provider(name, Arc::new(provider))
    }

    pub fn with_shared_provider(name: impl Into<String>, provider: Arc<P>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            provider,
            inner: Mutex::new(VolumeInner::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn state(&self) -> MountState {
        self.inner.lock().state
    }

    /// Registration of the current mount, if mounted.
    pub fn mount_info(&self) -> Option<MountInfo> {
        self.inner.lock().mount.clone()
    }
}

impl<P> fmt::Debug for Volume<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("mount", &inner.mount)
            .finish_non_exhaustive()
    }
}

/// Drives volumes through mount and unmount against a [`MountManager`].
#[derive(Debug)]
pub struct MountLifecycle<M> {
    manager: M,
}

impl<M: MountManager> MountLifecycle<M> {
    pub fn new(manager: M) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Register `volume` at `target`.
    ///
    /// On a mount-manager failure the volume returns to
    /// [`MountState::Unmounted`] and the manager's status is surfaced.
    pub fn mount<P>(&self, volume: &Volume<P>, target: &str) -> MountResult<MountInfo> {
        let info = {
            let mut inner = volume.inner.lock();
            if inner.state != MountState::Unmounted {
                return Err(MountError::InvalidState {
                    operation: "mount",
                    state: inner.state,
                });
            }
            let endpoint = path::classify(target)?;
            let info = MountInfo {
                mount_point: endpoint.mount_point(),
                endpoint,
                unique_id: Uuid::new_v4(),
            };
            inner.state = MountState::Mounting;
            info
        };
        debug!(volume = volume.name(), target, endpoint = %info.endpoint, "mounting");

        let result = if info.endpoint.is_drive() {
            self.manager
                .create_drive(volume.name(), &info.unique_id, &info.mount_point)
                .map_err(|status| manager_error("create_drive", status))
        } else {
            self.manager
                .notify_create_directory(volume.name(), &info.unique_id, &info.mount_point)
                .map_err(|status| manager_error("notify_create_directory", status))
        };

        let mut inner = volume.inner.lock();
        match result {
            Ok(()) => {
                inner.state = MountState::Mounted;
                inner.mount = Some(info.clone());
                info!(volume = volume.name(), mount_point = %info.mount_point, "mounted");
                Ok(info)
            }
            Err(e) => {
                inner.state = MountState::Unmounted;
                warn!(volume = volume.name(), target, error = %e, "mount failed");
                Err(e)
            }
        }
    }

    /// Withdraw the registration made by [`mount`](Self::mount).
    ///
    /// The volume ends [`MountState::Unmounted`] whether or not the mount
    /// manager call succeeds.
    pub fn unmount<P>(&self, volume: &Volume<P>) -> MountResult<()> {
        let info = {
            let mut inner = volume.inner.lock();
            let invalid = MountError::InvalidState {
                operation: "unmount",
                state: inner.state,
            };
            if inner.state != MountState::Mounted {
                return Err(invalid);
            }
            let Some(info) = inner.mount.take() else {
                return Err(invalid);
            };
            inner.state = MountState::Unmounting;
            info
        };
        debug!(volume = volume.name(), mount_point = %info.mount_point, "unmounting");

        let result = if info.endpoint.is_drive() {
            self.manager
                .delete_drive(&info.mount_point)
                .map_err(|status| manager_error("delete_drive", status))
        } else {
            self.manager
                .notify_delete_directory(volume.name(), &info.mount_point)
                .map_err(|status| manager_error("notify_delete_directory", status))
        };

        volume.inner.lock().state = MountState::Unmounted;
        match result {
            Ok(()) => {
                info!(volume = volume.name(), "unmounted");
                Ok(())
            }
            Err(e) => {
                warn!(volume = volume.name(), error = %e, "unmount failed; volume left unmounted");
                Err(e)
            }
        }
    }
}

fn manager_error(operation: &'static str, status: Status) -> MountError {
    MountError::MountManager { operation, status }
}
