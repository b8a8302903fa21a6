use serde::{Deserialize, Serialize};

use super::{DeviceId, GreenhouseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Environmental sensor
    Sensor,
    /// Actuator driven by the control loop
    Actuator,
    /// Edge controller bridging several devices
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDocument {
    /// Device identifier
    pub device_id: DeviceId,
    /// Parent greenhouse identifier
    pub greenhouse_id: GreenhouseId,
    /// Device category
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Logical role, e.g. `ventilation_system` or a metric name for sensors
    pub role: String,
    /// Connectivity status
    #[serde(default)]
    pub status: DeviceStatus,
}
