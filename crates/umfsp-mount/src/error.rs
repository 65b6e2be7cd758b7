//! Mount error types.

use crate::lifecycle::MountState;
use thiserror::Error;
use umfsp_core::Status;

/// Errors from mount-target classification and lifecycle transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MountError {
    /// The operation is not allowed in the volume's current state.
    #[error("cannot {operation} a volume that is {state}")]
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State the volume was in.
        state: MountState,
    },

    /// Empty or unclassifiable mount target.
    #[error("invalid mount target: {0}")]
    InvalidParameter(String),

    /// The OS mount manager rejected a registration call.
    #[error("mount manager {operation} failed: {status}")]
    MountManager {
        /// Mount-manager entry point that failed.
        operation: &'static str,
        /// Status it returned.
        status: Status,
    },
}

impl MountError {
    /// Status reported to callers of the volume start/stop entry points.
    pub fn to_status(&self) -> Status {
        match self {
            MountError::InvalidState { .. } => Status::InvalidDeviceState,
            MountError::InvalidParameter(_) => Status::InvalidParameter,
            MountError::MountManager { status, .. } => *status,
        }
    }
}

/// Result type for mount operations.
pub type MountResult<T> = Result<T, MountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let e = MountError::InvalidState {
            operation: "mount",
            state: MountState::Mounted,
        };
        assert_eq!(e.to_status(), Status::InvalidDeviceState);
        assert_eq!(e.to_string(), "cannot mount a volume that is mounted");

        assert_eq!(
            MountError::InvalidParameter(String::new()).to_status(),
            Status::InvalidParameter
        );
        let e = MountError::MountManager {
            operation: "create_drive",
            status: Status::ObjectNameCollision,
        };
        assert_eq!(e.to_status(), Status::ObjectNameCollision);
    }
}
