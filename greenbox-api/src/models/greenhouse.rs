use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{DeviceId, GreenhouseId, MetricName, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Lower bound of the acceptable range
    pub lower: f64,
    /// Upper bound of the acceptable range
    pub upper: f64,
    /// Hysteresis margin inside the range, same unit as the bounds
    #[serde(default)]
    pub deadband: f64,
    /// Actuator roles allowed to correct this metric, empty for catalog lookup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actuators: Vec<String>,
}

impl Threshold {
    pub fn new(lower: f64, upper: f64, deadband: f64) -> Self {
        Self {
            lower,
            upper,
            deadband,
            actuators: Vec::new(),
        }
    }

    pub fn center(&self) -> f64 {
        0.5 * (self.lower + self.upper)
    }

    /// The narrowed band a corrected value has to re-enter.
    pub fn comfort_band(&self) -> (f64, f64) {
        (self.lower + self.deadband, self.upper - self.deadband)
    }

    pub fn in_band(&self, value: f64) -> bool {
        let (low, high) = self.comfort_band();
        value >= low && value <= high
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenhouseDocument {
    /// Greenhouse identifier
    pub greenhouse_id: GreenhouseId,
    /// Owning tenant identifier
    pub tenant_id: TenantId,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
    /// Geolocation
    #[serde(default)]
    pub location: Option<Location>,
    /// Actuator role to device identifier
    #[serde(default)]
    pub device_map: BTreeMap<String, DeviceId>,
    /// Metric to sensor device identifier
    #[serde(default)]
    pub sensor_map: BTreeMap<MetricName, DeviceId>,
    /// Metric to threshold configuration
    #[serde(default)]
    pub thresholds: BTreeMap<MetricName, Threshold>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_document_shape() {
        let document: GreenhouseDocument = serde_json::from_str(
            r#"{
                "greenhouse_id": "gh_001",
                "tenant_id": "tnt_001",
                "label": "Serra Demo",
                "location": { "lat": 41.9, "lon": 12.5 },
                "device_map": { "ventilation_system": "fan_001" },
                "thresholds": {
                    "temperature": { "lower": 20, "upper": 25, "deadband": 0.5 }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(document.device_map["ventilation_system"], "fan_001");
        assert!(document.sensor_map.is_empty());

        let threshold = &document.thresholds["temperature"];
        assert_eq!(threshold.comfort_band(), (20.5, 24.5));
        assert_eq!(threshold.center(), 22.5);
        assert!(threshold.in_band(24.5));
        assert!(!threshold.in_band(24.6));
        assert!(threshold.actuators.is_empty());
    }
}
