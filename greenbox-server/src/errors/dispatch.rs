use std::time::Duration;

use greenbox_api::models::DeviceId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to reach device {device_id}: {reason}")]
    DispatchFailure { device_id: DeviceId, reason: String },

    #[error("Command to device {device_id} timed out after {timeout:?}")]
    Timeout { device_id: DeviceId, timeout: Duration },
}
