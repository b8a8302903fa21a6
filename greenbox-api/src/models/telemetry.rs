use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{DeviceId, MetricName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Reporting device identifier
    pub device_id: DeviceId,
    /// Metric name
    pub metric: MetricName,
    /// Measurement time
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Measured value
    pub value: f64,
}

impl TelemetrySample {
    pub fn new(
        device_id: impl Into<DeviceId>,
        metric: impl Into<MetricName>,
        timestamp: OffsetDateTime,
        value: f64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            metric: metric.into(),
            timestamp,
            value,
        }
    }
}
