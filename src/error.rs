use crate::hid::identity::DeviceId;

/// Failures surfaced by the device layer.
///
/// Every public operation returns these instead of panicking; callers match
/// on the variant when they care why a device is unusable.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Enumeration never produced the requested device.
    #[error("device {id} not found after {attempts} enumeration attempts")]
    NotFound { id: DeviceId, attempts: u32 },

    /// The OS refused to open the HID interface.
    #[error("failed to open device {id}: {reason}")]
    OpenFailed { id: DeviceId, reason: String },

    /// A write kept failing after the reconnect-and-retry budget.
    #[error("write to {id} failed after {attempts} attempts: {reason}")]
    WriteFailed {
        id: DeviceId,
        attempts: u32,
        reason: String,
    },

    /// Operation against a device with no live session.
    #[error("device {id} is not connected")]
    NotConnected { id: DeviceId },

    /// The session was replaced while the operation was in flight, typically
    /// after a reconnect raced it. The result would apply to a dead handle.
    #[error("connection to {id} was superseded mid-operation")]
    Stale { id: DeviceId },

    /// Driver-level failure outside any one device's lifecycle.
    #[error("hid backend error: {0}")]
    Backend(String),
}

impl From<hidapi::HidError> for DeviceError {
    fn from(err: hidapi::HidError) -> Self {
        DeviceError::Backend(err.to_string())
    }
}

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;
