//! Process exit codes.

pub const SUCCESS: u8 = 0;
pub const FAILURE: u8 = 1;
/// Bad mount target, malformed script or config.
pub const INVALID_INPUT: u8 = 2;
/// Mount-manager or lifecycle failure.
pub const MOUNT_FAILED: u8 = 3;
/// Stopped by the console-control handler (128 + SIGINT).
pub const INTERRUPTED: u8 = 130;
