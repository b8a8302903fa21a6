use serde::{Deserialize, Serialize};

pub type MetricName = String;

pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";
pub const SOIL_HUMIDITY: &str = "soil_humidity";
pub const LIGHT: &str = "light";

/// Physically valid range of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    /// Lowest observable value
    pub min: f64,
    /// Highest observable value
    pub max: f64,
}

impl MetricRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}
