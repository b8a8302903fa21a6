use std::collections::HashMap;
use std::fmt;

use greenbox_api::models::{MetricName, Threshold};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which way a corrective actuator moves a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Warming, humidifying, lighting
    Raise,
    /// Cooling, venting, drying
    Lower,
}

impl Direction {
    pub fn of_delta(delta: f64) -> Option<Self> {
        if delta > 0.0 {
            Some(Direction::Raise)
        } else if delta < 0.0 {
            Some(Direction::Lower)
        } else {
            None
        }
    }

    /// Correction needed for `value`, if it lies outside `[lower, upper]`.
    pub fn required(threshold: &Threshold, value: f64) -> Option<Self> {
        if value < threshold.lower {
            Some(Direction::Raise)
        } else if value > threshold.upper {
            Some(Direction::Lower)
        } else {
            None
        }
    }

    /// Edge of the comfort band a correction in this direction aims for.
    pub fn target(self, threshold: &Threshold) -> f64 {
        let (low, high) = threshold.comfort_band();
        match self {
            Direction::Raise => low,
            Direction::Lower => high,
        }
    }

    fn has_recovered(self, threshold: &Threshold, value: f64) -> bool {
        match self {
            Direction::Raise => value >= self.target(threshold),
            Direction::Lower => value <= self.target(threshold),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Raise => write!(f, "raise"),
            Direction::Lower => write!(f, "lower"),
        }
    }
}

/// Where a value sits against `[lower, upper]`, deadband aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandState {
    Low,
    #[default]
    Ok,
    High,
}

impl BandState {
    pub fn of(threshold: &Threshold, value: f64) -> Self {
        match Direction::required(threshold, value) {
            Some(Direction::Raise) => BandState::Low,
            Some(Direction::Lower) => BandState::High,
            None => BandState::Ok,
        }
    }
}

impl fmt::Display for BandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandState::Low => write!(f, "low"),
            BandState::Ok => write!(f, "ok"),
            BandState::High => write!(f, "high"),
        }
    }
}

pub fn validate_threshold(metric: &str, threshold: &Threshold) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidThreshold {
        metric: metric.to_string(),
        reason,
    };

    if !(threshold.lower.is_finite() && threshold.upper.is_finite() && threshold.deadband.is_finite()) {
        return Err(invalid("bounds must be finite"));
    }
    if threshold.lower >= threshold.upper {
        return Err(invalid("lower must be below upper"));
    }
    if threshold.deadband < 0.0 {
        return Err(invalid("deadband must not be negative"));
    }
    if threshold.deadband >= (threshold.upper - threshold.lower) / 2.0 {
        return Err(invalid("deadband must be smaller than half the band"));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HysteresisState {
    #[default]
    Inactive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub state: HysteresisState,
    pub changed: bool,
}

/// Hysteresis state of every (metric, actuator) pair of one greenhouse.
#[derive(Debug, Default)]
pub struct ThresholdEvaluator {
    states: HashMap<(MetricName, String), HysteresisState>,
}

impl ThresholdEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engages once `value` leaves `[lower, upper]` on the side `corrects`
    /// handles; releases only after it re-enters the deadband-narrowed band.
    pub fn evaluate(
        &mut self,
        metric: &str,
        role: &str,
        corrects: Direction,
        value: f64,
        threshold: &Threshold,
    ) -> Result<Evaluation, ConfigError> {
        validate_threshold(metric, threshold)?;

        let state = self
            .states
            .entry((metric.to_string(), role.to_string()))
            .or_default();
        let previous = *state;

        *state = match previous {
            HysteresisState::Inactive if Direction::required(threshold, value) == Some(corrects) => {
                HysteresisState::Active
            }
            HysteresisState::Active if corrects.has_recovered(threshold, value) => {
                HysteresisState::Inactive
            }
            unchanged => unchanged,
        };

        if *state != previous {
            tracing::debug!(metric, role, value, ?previous, current = ?*state, "hysteresis transition");
        }

        Ok(Evaluation {
            state: *state,
            changed: *state != previous,
        })
    }

    pub fn state(&self, metric: &str, role: &str) -> HysteresisState {
        self.states
            .get(&(metric.to_string(), role.to_string()))
            .copied()
            .unwrap_or_default()
    }
}
