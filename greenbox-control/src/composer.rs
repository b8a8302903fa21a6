use std::collections::{BTreeMap, BTreeSet};

use greenbox_api::models::MetricName;

use crate::catalog::{EffectCatalog, Level};
use crate::metrics::MetricRegistry;

/// Net per-tick change from every active actuator, before clamping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedDelta {
    pub net: BTreeMap<MetricName, f64>,
    pub energy_rate: f64,
    pub water_rate: f64,
    pub contributors: Vec<(String, Level)>,
    /// Active actuators without a catalog entry, left out of the sum.
    pub skipped: Vec<(String, Level)>,
}

impl ComposedDelta {
    pub fn delta(&self, metric: &str) -> f64 {
        self.net.get(metric).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub values: BTreeMap<MetricName, f64>,
    pub clamped: BTreeSet<MetricName>,
}

pub struct EffectComposer<'a> {
    catalog: &'a EffectCatalog,
    metrics: &'a MetricRegistry,
}

impl<'a> EffectComposer<'a> {
    pub fn new(catalog: &'a EffectCatalog, metrics: &'a MetricRegistry) -> Self {
        Self { catalog, metrics }
    }

    /// Plain algebraic sum; opposing actuators partially or fully cancel.
    pub fn compose<'r>(&self, active: impl IntoIterator<Item = (&'r str, Level)>) -> ComposedDelta {
        let mut composed = ComposedDelta::default();

        for (role, level) in active {
            match self.catalog.lookup(role, level) {
                Ok(entry) => {
                    for (metric, delta) in &entry.deltas {
                        *composed.net.entry(metric.clone()).or_insert(0.0) += delta;
                    }
                    composed.energy_rate += entry.energy_rate;
                    composed.water_rate += entry.water_rate;
                    composed.contributors.push((role.to_string(), level));
                }
                Err(e) => {
                    tracing::warn!(role, %level, "skipping actuator in composition: {}", e);
                    composed.skipped.push((role.to_string(), level));
                }
            }
        }

        composed
    }

    /// Applies `delta` to `current` and clamps into each metric's range.
    /// Clamping only affects the projected values.
    pub fn project(&self, current: &BTreeMap<MetricName, f64>, delta: &ComposedDelta) -> Projection {
        let mut projection = Projection::default();

        for (metric, value) in current {
            let (projected, clamped) = self.metrics.clamp(metric, value + delta.delta(metric));
            if clamped {
                projection.clamped.insert(metric.clone());
            }
            projection.values.insert(metric.clone(), projected);
        }

        projection
    }
}

#[cfg(test)]
mod tests {
    use greenbox_api::models::{EffectRecord, HUMIDITY, LevelValue, SOIL_HUMIDITY, TEMPERATURE};

    use super::*;

    fn record(system: &str, fields: &[(&str, f64)]) -> EffectRecord {
        EffectRecord {
            system: system.to_string(),
            level: LevelValue::Text("100%".to_string()),
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), Some(*value)))
                .collect(),
        }
    }

    fn catalog() -> EffectCatalog {
        EffectCatalog::from_records(
            &[
                record("ventilation_system", &[(TEMPERATURE, -0.0167), ("energy_consumption", 0.4)]),
                record(
                    "heating_system",
                    &[(TEMPERATURE, 0.0167), (SOIL_HUMIDITY, -0.005), ("energy_consumption", 2.0)],
                ),
                record("dehumidifier", &[(HUMIDITY, -10.0), ("water_consumption", 0.1)]),
            ],
            &MetricRegistry::greenhouse_defaults(),
        )
        .unwrap()
    }

    #[test]
    fn test_opposing_actuators_cancel() {
        let catalog = catalog();
        let metrics = MetricRegistry::greenhouse_defaults();
        let composer = EffectComposer::new(&catalog, &metrics);

        let composed = composer.compose([
            ("ventilation_system", Level::MAX),
            ("heating_system", Level::MAX),
        ]);

        assert!(composed.delta(TEMPERATURE).abs() < 1e-12);
        assert_eq!(composed.delta(SOIL_HUMIDITY), -0.005);
        assert!((composed.energy_rate - 2.4).abs() < 1e-12);
        assert_eq!(composed.contributors.len(), 2);
    }

    #[test]
    fn test_partial_offset() {
        let metrics = MetricRegistry::greenhouse_defaults();
        let catalog = EffectCatalog::from_records(
            &[
                record("ventilation_system", &[(TEMPERATURE, -0.0167)]),
                EffectRecord {
                    level: LevelValue::Text("50%".to_string()),
                    ..record("heating_system", &[(TEMPERATURE, 0.008)])
                },
            ],
            &metrics,
        )
        .unwrap();
        let composer = EffectComposer::new(&catalog, &metrics);

        let composed = composer.compose([
            ("ventilation_system", Level::MAX),
            ("heating_system", Level::new(50).unwrap()),
        ]);

        assert!((composed.delta(TEMPERATURE) - (-0.0087)).abs() < 1e-12);
    }

    #[test]
    fn test_clamping_leaves_delta_untouched() {
        let catalog = catalog();
        let metrics = MetricRegistry::greenhouse_defaults();
        let composer = EffectComposer::new(&catalog, &metrics);

        let composed = composer.compose([("dehumidifier", Level::MAX)]);
        let current = BTreeMap::from([(HUMIDITY.to_string(), 5.0), (TEMPERATURE.to_string(), 22.0)]);
        let projection = composer.project(&current, &composed);

        assert_eq!(projection.values[HUMIDITY], 0.0);
        assert_eq!(projection.values[TEMPERATURE], 22.0);
        assert!(projection.clamped.contains(HUMIDITY));
        assert!(!projection.clamped.contains(TEMPERATURE));
        assert_eq!(composed.delta(HUMIDITY), -10.0);
    }

    #[test]
    fn test_missing_entry_is_skipped() {
        let catalog = catalog();
        let metrics = MetricRegistry::greenhouse_defaults();
        let composer = EffectComposer::new(&catalog, &metrics);

        let composed = composer.compose([
            ("ventilation_system", Level::new(30).unwrap()),
            ("heating_system", Level::MAX),
        ]);

        assert_eq!(composed.delta(TEMPERATURE), 0.0167);
        assert_eq!(composed.skipped, vec![("ventilation_system".to_string(), Level::new(30).unwrap())]);
    }
}
