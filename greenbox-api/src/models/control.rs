use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DeviceId, GreenhouseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "UPPERCASE")]
pub enum Command {
    /// Run the actuator at a power level percentage
    On { level: u8 },
    /// Stop the actuator
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    /// Command identifier
    pub id: Uuid,
    /// Greenhouse the actuator belongs to
    pub greenhouse_id: GreenhouseId,
    /// Target device identifier
    pub device_id: DeviceId,
    /// Actuator role
    pub role: String,
    /// Requested state
    #[serde(flatten)]
    pub command: Command,
    /// Issue time
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

impl ActuatorCommand {
    pub fn new(
        greenhouse_id: &str,
        device_id: &str,
        role: &str,
        command: Command,
        issued_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            greenhouse_id: greenhouse_id.to_string(),
            device_id: device_id.to_string(),
            role: role.to_string(),
            command,
            issued_at,
        }
    }
}
