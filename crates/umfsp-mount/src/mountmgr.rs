//! OS mount-manager seam.

use tracing::info;
use umfsp_core::Status;
use uuid::Uuid;

/// Registration entry points of the OS mount manager.
///
/// Each call returns the status the OS reported. Implementations must be
/// callable from any thread; the lifecycle never holds a volume lock across
/// them.
pub trait MountManager: Send + Sync {
    /// Assign drive `mount_point` (`\DosDevices\X:`) to the volume.
    fn create_drive(&self, volume_name: &str, unique_id: &Uuid, mount_point: &str)
    -> Result<(), Status>;

    /// Remove a drive assignment.
    fn delete_drive(&self, mount_point: &str) -> Result<(), Status>;

    /// Announce a directory mount point for the volume.
    fn notify_create_directory(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        directory: &str,
    ) -> Result<(), Status>;

    /// Withdraw a directory mount point.
    fn notify_delete_directory(&self, volume_name: &str, directory: &str) -> Result<(), Status>;
}

/// Mount manager that accepts every call and logs it.
///
/// Used by hosts that have no OS mount manager (tests, replay).
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMountManager;

impl MountManager for LoggingMountManager {
    fn create_drive(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        mount_point: &str,
    ) -> Result<(), Status> {
        info!(volume = volume_name, %unique_id, mount_point, "create drive");
        Ok(())
    }

    fn delete_drive(&self, mount_point: &str) -> Result<(), Status> {
        info!(mount_point, "delete drive");
        Ok(())
    }

    fn notify_create_directory(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        directory: &str,
    ) -> Result<(), Status> {
        info!(volume = volume_name, %unique_id, directory, "create directory mount point");
        Ok(())
    }

    fn notify_delete_directory(&self, volume_name: &str, directory: &str) -> Result<(), Status> {
        info!(volume = volume_name, directory, "delete directory mount point");
        Ok(())
    }
}

impl<M: MountManager + ?Sized> MountManager for std::sync::Arc<M> {
    fn create_drive(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        mount_point: &str,
    ) -> Result<(), Status> {
        (**self).create_drive(volume_name, unique_id, mount_point)
    }

    fn delete_drive(&self, mount_point: &str) -> Result<(), Status> {
        (**self).delete_drive(mount_point)
    }

    fn notify_create_directory(
        &self,
        volume_name: &str,
        unique_id: &Uuid,
        directory: &str,
    ) -> Result<(), Status> {
        (**self).notify_create_directory(volume_name, unique_id, directory)
    }

    fn notify_delete_directory(&self, volume_name: &str, directory: &str) -> Result<(), Status> {
        (**self).notify_delete_directory(volume_name, directory)
    }
}
