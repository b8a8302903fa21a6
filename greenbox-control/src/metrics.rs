use std::collections::BTreeMap;

use greenbox_api::models::{HUMIDITY, LIGHT, MetricName, MetricRange, SOIL_HUMIDITY, TEMPERATURE};
use serde::{Deserialize, Serialize};

/// Known metrics and their physically valid ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricRegistry {
    ranges: BTreeMap<MetricName, MetricRange>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranges for the metrics a greenhouse usually reports.
    pub fn greenhouse_defaults() -> Self {
        Self::new()
            .with(TEMPERATURE, MetricRange::new(-40.0, 60.0))
            .with(HUMIDITY, MetricRange::new(0.0, 100.0))
            .with(SOIL_HUMIDITY, MetricRange::new(0.0, 100.0))
            .with(LIGHT, MetricRange::new(0.0, 200_000.0))
    }

    pub fn with(mut self, metric: &str, range: MetricRange) -> Self {
        self.ranges.insert(metric.to_string(), range);
        self
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.ranges.contains_key(metric)
    }

    pub fn range(&self, metric: &str) -> Option<MetricRange> {
        self.ranges.get(metric).copied()
    }

    /// Clamps `value` into the metric's range, reporting whether it moved.
    pub fn clamp(&self, metric: &str, value: f64) -> (f64, bool) {
        match self.ranges.get(metric) {
            Some(range) => {
                let clamped = range.clamp(value);
                (clamped, clamped != value)
            }
            None => (value, false),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricRange)> {
        self.ranges.iter().map(|(metric, range)| (metric.as_str(), *range))
    }
}
