use greenbox_api::models::{DeviceId, MetricName};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TelemetryError {
    #[error("Sample for {device_id}/{metric} at {timestamp} precedes latest stored sample at {latest}")]
    OutOfOrderSample {
        device_id: DeviceId,
        metric: MetricName,
        timestamp: OffsetDateTime,
        latest: OffsetDateTime,
    },

    #[error("No telemetry for {device_id}/{metric}")]
    NotFound { device_id: DeviceId, metric: MetricName },

    #[error("Unknown resolution tier {0}")]
    UnknownTier(String),

    #[error("Invalid resolution tiers: {0}")]
    InvalidTiers(String),

    #[error("Non-finite value for {device_id}/{metric}")]
    NonFiniteValue { device_id: DeviceId, metric: MetricName },

    #[error("Telemetry store unavailable: {0}")]
    StoreUnavailable(String),
}
