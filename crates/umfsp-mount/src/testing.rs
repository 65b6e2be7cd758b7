//! Mount-manager double for tests.

use crate::mountmgr::MountManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use umfsp_core::Status;
use uuid::Uuid;

/// One call made to a [`RecordingMountManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    CreateDrive {
        volume_name: String,
        unique_id: Uuid,
        mount_point: String,
    },
    DeleteDrive {
        mount_point: String,
    },
    CreateDirectory {
        volume_name: String,
        unique_id: Uuid,
        directory: String,
    },
    DeleteDirectory {
        volume_name: String,
        directory: String,
    },
}

impl MountCall {
    /// Entry-point name, as used by [`RecordingMountManager::fail`].
    pub fn operation(&self) -> &'static str {
        match self {
            MountCall::CreateDrive { .. } => "create_drive",
            MountCall::DeleteDrive { .. } => "delete_drive",
            MountCall::CreateDirectory { .. } => "notify_create_directory",
            MountCall::DeleteDirectory { .. } => "notify_delete_directory",
        }
    }
}

type CallHook = Box<dyn Fn(&MountCall) + Send + Sync>;

/// Records every call and fails the ones it is told to.
#[derive(Default)]
pub struct RecordingMountManager {
    calls: Mutex<Vec<MountCall>>,
    failures: Mutex<HashMap<&'static str, Status>>,
    hook: Option<CallHook>,
}

impl RecordingMountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` inside every call, before it is recorded.
    #[must_use]
    pub fn with_hook(mut self, hook: impl Fn(&MountCall) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Make `operation` return `status` from now on.
    pub fn fail(&self, operation: &'static str, status: Status) {
        self.failures.lock().insert(operation, status);
    }

    /// Stop failing `operation`.
    pub fn heal(&self, operation: &'static str) {
        self.failures.lock().remove(operation);
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: MountCall) -> Result<(), Status> {
        if let Some(hook) = &self.hook {
            hook(&call);
        }
        let outcome = self.failures.lock().get(call.operation()).copied();
        self.calls.lock().push(call);
        outcome.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for RecordingMountManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingMountManager")
            .field("calls", &self.calls.lock().len())
            .field("failures", &*self.failures.lock())
            .finish_non_exhaustive()
    }
}

impl MountManager for RecordingMountManager {
    fn create_drive(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        mount_point: &str,
    ) -> Result<(), Status> {
        self.record(MountCall::CreateDrive {
            volume_name: volume_name.to_string(),
            unique_id: *unique_id,
            mount_point: mount_point.to_string(),
        })
    }

    fn delete_drive(&self, mount_point: &str) -> Result<(), Status> {
        self.record(MountCall::DeleteDrive {
            mount_point: mount_point.to_string(),
        })
    }

    fn notify_create_directory(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        directory: &str,
    ) -> Result<(), Status> {
        self.record(MountCall::CreateDirectory {
            volume_name: volume_name.to_string(),
            unique_id: *unique_id,
            directory: directory.to_string(),
        })
    }

    fn notify_delete_directory(&self, volume_name: &str, directory: &str) -> Result<(), Status> {
        self.record(MountCall::DeleteDirectory {
            volume_name: volume_name.to_string(),
            directory: directory.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_injection() {
        let m = RecordingMountManager::new();
        m.fail("delete_drive", Status::AccessDenied);
        assert_eq!(m.delete_drive("\\DosDevices\\E:"), Err(Status::AccessDenied));
        m.heal("delete_drive");
        assert_eq!(m.delete_drive("\\DosDevices\\E:"), Ok(()));
        assert_eq!(m.calls().len(), 2);
    }
}
