use greenbox_api::models::MetricName;

use crate::catalog::Level;
use crate::threshold::Direction;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("No threshold configured for metric {metric}")]
    MissingThreshold { metric: MetricName },

    #[error("Invalid threshold for metric {metric}: {reason}")]
    InvalidThreshold {
        metric: MetricName,
        reason: &'static str,
    },

    #[error("Unknown metric {metric}")]
    UnknownMetric { metric: MetricName },

    #[error("No effect entry for {role} at {level}")]
    MissingEffect { role: String, level: Level },

    #[error("Actuator role {role} is not mapped to a device")]
    UnmappedActuator { role: String },

    #[error("No actuator level can {direction} {metric}")]
    NoCorrectiveLevel {
        role: String,
        metric: MetricName,
        direction: Direction,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("Invalid catalog: entry with empty system name")]
    EmptySystem,

    #[error("Invalid catalog: {system} references unknown metric {metric}")]
    UnknownMetric { system: String, metric: String },

    #[error("Invalid catalog: level {level} of {system} is not a percentage")]
    InvalidLevel { system: String, level: String },

    #[error("Invalid catalog: duplicate entry {system} at {level}")]
    DuplicateEntry { system: String, level: Level },

    #[error("Invalid catalog: non-finite value for {field} in {system}")]
    NonFiniteValue { system: String, field: String },
}
