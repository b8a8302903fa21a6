use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use greenbox_api::models::{
    ENERGY_CONSUMPTION, EffectDocument, EffectRecord, GreenhouseId, LevelValue, MetricName,
    WATER_CONSUMPTION,
};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, ConfigError};
use crate::metrics::MetricRegistry;
use crate::threshold::Direction;

/// Actuator power level as a whole percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Level(u8);

impl Level {
    pub const MAX: Level = Level(100);

    pub fn new(percent: u8) -> Option<Self> {
        (percent <= 100).then_some(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Parses `"100%"`, `"100"` or a bare number.
    pub fn parse(value: &LevelValue) -> Option<Self> {
        let number = match value {
            LevelValue::Number(number) => *number,
            LevelValue::Text(text) => {
                let text = text.trim();
                let text = text.strip_suffix('%').unwrap_or(text).trim();
                text.parse::<f64>().ok()?
            }
        };

        if !number.is_finite() || number < 0.0 || number > 100.0 || number.fract() != 0.0 {
            return None;
        }

        Self::new(number as u8)
    }
}

impl TryFrom<u8> for Level {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Level::new(value).ok_or_else(|| format!("level {value} is above 100%"))
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectEntry {
    pub role: String,
    pub level: Level,
    /// Sparse per-tick delta of every metric the entry touches.
    pub deltas: BTreeMap<MetricName, f64>,
    pub energy_rate: f64,
    pub water_rate: f64,
}

impl EffectEntry {
    pub fn delta(&self, metric: &str) -> f64 {
        self.deltas.get(metric).copied().unwrap_or(0.0)
    }

    pub fn affects(&self, metric: &str) -> bool {
        self.deltas.contains_key(metric)
    }

    fn from_record(record: &EffectRecord, metrics: &MetricRegistry) -> Result<Self, CatalogError> {
        let role = record.system.trim();
        if role.is_empty() {
            return Err(CatalogError::EmptySystem);
        }

        let level = Level::parse(&record.level).ok_or_else(|| CatalogError::InvalidLevel {
            system: role.to_string(),
            level: record.level.to_string(),
        })?;

        let mut entry = EffectEntry {
            role: role.to_string(),
            level,
            deltas: BTreeMap::new(),
            energy_rate: 0.0,
            water_rate: 0.0,
        };

        for (field, value) in &record.fields {
            let Some(value) = *value else { continue };

            if !value.is_finite() {
                return Err(CatalogError::NonFiniteValue {
                    system: entry.role,
                    field: field.clone(),
                });
            }

            match field.as_str() {
                ENERGY_CONSUMPTION => entry.energy_rate = value,
                WATER_CONSUMPTION => entry.water_rate = value,
                metric if metrics.contains(metric) => {
                    entry.deltas.insert(metric.to_string(), value);
                }
                metric => {
                    return Err(CatalogError::UnknownMetric {
                        system: entry.role,
                        metric: metric.to_string(),
                    });
                }
            }
        }

        Ok(entry)
    }
}

/// One `(role, level)` pair touching a given metric.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectImpact {
    pub role: String,
    pub level: Level,
    pub delta: f64,
}

/// Immutable lookup of actuator role and level to per-metric effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectCatalog {
    entries: BTreeMap<(String, Level), EffectEntry>,
}

impl EffectCatalog {
    pub fn from_records(
        records: &[EffectRecord],
        metrics: &MetricRegistry,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        catalog.extend(records, metrics)?;
        Ok(catalog)
    }

    fn extend(&mut self, records: &[EffectRecord], metrics: &MetricRegistry) -> Result<(), CatalogError> {
        for record in records {
            let entry = EffectEntry::from_record(record, metrics)?;
            let key = (entry.role.clone(), entry.level);

            if self.entries.contains_key(&key) {
                return Err(CatalogError::DuplicateEntry {
                    system: entry.role,
                    level: entry.level,
                });
            }

            self.entries.insert(key, entry);
        }

        Ok(())
    }

    /// Entries of `other` replace entries of `self` with the same role and level.
    fn overlay(&self, other: &EffectCatalog) -> EffectCatalog {
        let mut entries = self.entries.clone();
        for (key, entry) in &other.entries {
            entries.insert(key.clone(), entry.clone());
        }
        EffectCatalog { entries }
    }

    pub fn lookup(&self, role: &str, level: Level) -> Result<&EffectEntry, ConfigError> {
        self.entries
            .get(&(role.to_string(), level))
            .ok_or_else(|| ConfigError::MissingEffect {
                role: role.to_string(),
                level,
            })
    }

    pub fn effects_affecting(&self, metric: &str) -> Vec<EffectImpact> {
        self.entries
            .values()
            .filter_map(|entry| {
                entry.deltas.get(metric).map(|delta| EffectImpact {
                    role: entry.role.clone(),
                    level: entry.level,
                    delta: *delta,
                })
            })
            .collect()
    }

    /// Levels known for a role, ascending.
    pub fn levels(&self, role: &str) -> Vec<Level> {
        self.entries
            .keys()
            .filter(|(entry_role, _)| entry_role == role)
            .map(|(_, level)| *level)
            .collect()
    }

    /// Which way a role pushes a metric, judged at its highest level touching it.
    pub fn direction_of(&self, role: &str, metric: &str) -> Option<Direction> {
        self.entries
            .range((role.to_string(), Level(0))..=(role.to_string(), Level::MAX))
            .rev()
            .find_map(|(_, entry)| entry.deltas.get(metric))
            .and_then(|delta| Direction::of_delta(*delta))
    }

    /// Lowest level of `role` that moves `metric` from `value` to `target`
    /// within `horizon_ticks`, else the highest level pushing the right way.
    pub fn select_level(
        &self,
        role: &str,
        metric: &str,
        value: f64,
        target: f64,
        horizon_ticks: u32,
    ) -> Result<Level, ConfigError> {
        let direction = if target >= value {
            Direction::Raise
        } else {
            Direction::Lower
        };
        let distance = (target - value).abs();

        let corrective: Vec<(Level, f64)> = self
            .levels(role)
            .into_iter()
            .filter_map(|level| {
                let delta = self.entries[&(role.to_string(), level)].delta(metric);
                (Direction::of_delta(delta) == Some(direction)).then_some((level, delta))
            })
            .collect();

        corrective
            .iter()
            .find(|(_, delta)| delta.abs() * f64::from(horizon_ticks) >= distance)
            .or_else(|| corrective.last())
            .map(|(level, _)| *level)
            .ok_or_else(|| ConfigError::NoCorrectiveLevel {
                role: role.to_string(),
                metric: metric.to_string(),
                direction,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Global catalog plus greenhouse-scoped overrides, resolved once at load.
#[derive(Debug, Clone, Default)]
pub struct CatalogSet {
    global: Arc<EffectCatalog>,
    scoped: HashMap<GreenhouseId, Arc<EffectCatalog>>,
}

impl CatalogSet {
    pub fn load(documents: &[EffectDocument], metrics: &MetricRegistry) -> Result<Self, CatalogError> {
        let mut global = EffectCatalog::default();
        let mut scoped: HashMap<GreenhouseId, EffectCatalog> = HashMap::new();

        for document in documents {
            match &document.greenhouse_id {
                None => global.extend(&document.effects, metrics)?,
                Some(greenhouse_id) => scoped
                    .entry(greenhouse_id.clone())
                    .or_default()
                    .extend(&document.effects, metrics)?,
            }
        }

        let scoped = scoped
            .into_iter()
            .map(|(greenhouse_id, catalog)| (greenhouse_id, Arc::new(global.overlay(&catalog))))
            .collect();

        Ok(Self {
            global: Arc::new(global),
            scoped,
        })
    }

    pub fn for_greenhouse(&self, greenhouse_id: &str) -> Arc<EffectCatalog> {
        self.scoped
            .get(greenhouse_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.global))
    }
}

#[cfg(test)]
mod tests {
    use greenbox_api::models::{HUMIDITY, SOIL_HUMIDITY, TEMPERATURE};

    use super::*;

    fn record(system: &str, level: &str, fields: &[(&str, f64)]) -> EffectRecord {
        EffectRecord {
            system: system.to_string(),
            level: LevelValue::Text(level.to_string()),
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), Some(*value)))
                .collect(),
        }
    }

    fn sample_catalog() -> EffectCatalog {
        EffectCatalog::from_records(
            &[
                record("ventilation_system", "50%", &[(TEMPERATURE, -0.008), (HUMIDITY, -0.01)]),
                record("ventilation_system", "100%", &[(TEMPERATURE, -0.0167), (HUMIDITY, -0.02)]),
                record(
                    "heating_system",
                    "100%",
                    &[(TEMPERATURE, 0.0167), (SOIL_HUMIDITY, -0.005), (ENERGY_CONSUMPTION, 2.5)],
                ),
            ],
            &MetricRegistry::greenhouse_defaults(),
        )
        .unwrap()
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(Level::parse(&LevelValue::Text("100%".into())), Level::new(100));
        assert_eq!(Level::parse(&LevelValue::Text(" 50 ".into())), Level::new(50));
        assert_eq!(Level::parse(&LevelValue::Number(0.0)), Level::new(0));
        assert_eq!(Level::parse(&LevelValue::Text("-10%".into())), None);
        assert_eq!(Level::parse(&LevelValue::Text("120%".into())), None);
        assert_eq!(Level::parse(&LevelValue::Text("12.5%".into())), None);
        assert_eq!(Level::parse(&LevelValue::Text("high".into())), None);
    }

    #[test]
    fn test_lookup_and_resource_columns() {
        let catalog = sample_catalog();

        let heating = catalog.lookup("heating_system", Level::MAX).unwrap();
        assert_eq!(heating.delta(TEMPERATURE), 0.0167);
        assert_eq!(heating.delta(SOIL_HUMIDITY), -0.005);
        assert_eq!(heating.energy_rate, 2.5);
        assert!(!heating.affects(ENERGY_CONSUMPTION));

        let missing = catalog.lookup("heating_system", Level::new(50).unwrap());
        assert!(matches!(missing, Err(ConfigError::MissingEffect { .. })));
    }

    #[test]
    fn test_effects_affecting() {
        let catalog = sample_catalog();

        let temperature = catalog.effects_affecting(TEMPERATURE);
        assert_eq!(temperature.len(), 3);

        let soil = catalog.effects_affecting(SOIL_HUMIDITY);
        assert_eq!(soil.len(), 1);
        assert_eq!(soil[0].role, "heating_system");
        assert_eq!(soil[0].delta, -0.005);
    }

    #[test]
    fn test_direction_of() {
        let catalog = sample_catalog();

        assert_eq!(catalog.direction_of("ventilation_system", TEMPERATURE), Some(Direction::Lower));
        assert_eq!(catalog.direction_of("heating_system", TEMPERATURE), Some(Direction::Raise));
        assert_eq!(catalog.direction_of("heating_system", HUMIDITY), None);
    }

    #[test]
    fn test_select_level() {
        let catalog = sample_catalog();

        // 0.3 degrees within 60 ticks: 50% moves 0.48, enough
        let level = catalog
            .select_level("ventilation_system", TEMPERATURE, 25.2, 24.9, 60)
            .unwrap();
        assert_eq!(level, Level::new(50).unwrap());

        // 1.5 degrees within 60 ticks: nothing is enough, fall back to the maximum
        let level = catalog
            .select_level("ventilation_system", TEMPERATURE, 26.0, 24.5, 60)
            .unwrap();
        assert_eq!(level, Level::MAX);

        // Ventilation never warms
        let result = catalog.select_level("ventilation_system", TEMPERATURE, 18.0, 20.5, 60);
        assert!(matches!(result, Err(ConfigError::NoCorrectiveLevel { .. })));
    }

    #[test]
    fn test_invalid_catalog() {
        let metrics = MetricRegistry::greenhouse_defaults();

        let unknown = EffectCatalog::from_records(&[record("fan", "100%", &[("co2", 1.0)])], &metrics);
        assert!(matches!(unknown, Err(CatalogError::UnknownMetric { .. })));

        let negative = EffectCatalog::from_records(&[record("fan", "-5%", &[])], &metrics);
        assert!(matches!(negative, Err(CatalogError::InvalidLevel { .. })));

        let duplicate = EffectCatalog::from_records(
            &[record("fan", "100%", &[]), record("fan", "100", &[])],
            &metrics,
        );
        assert!(matches!(duplicate, Err(CatalogError::DuplicateEntry { .. })));
    }

    #[test]
    fn test_scoped_override() {
        let metrics = MetricRegistry::greenhouse_defaults();
        let documents = vec![
            EffectDocument {
                greenhouse_id: None,
                effects: vec![
                    record("ventilation_system", "100%", &[(TEMPERATURE, -0.0167)]),
                    record("heating_system", "100%", &[(TEMPERATURE, 0.0167)]),
                ],
            },
            EffectDocument {
                greenhouse_id: Some("gh_002".to_string()),
                effects: vec![record("ventilation_system", "100%", &[(TEMPERATURE, -0.03)])],
            },
        ];

        let set = CatalogSet::load(&documents, &metrics).unwrap();

        let global = set.for_greenhouse("gh_001");
        assert_eq!(global.lookup("ventilation_system", Level::MAX).unwrap().delta(TEMPERATURE), -0.0167);

        let scoped = set.for_greenhouse("gh_002");
        assert_eq!(scoped.lookup("ventilation_system", Level::MAX).unwrap().delta(TEMPERATURE), -0.03);
        assert_eq!(scoped.lookup("heating_system", Level::MAX).unwrap().delta(TEMPERATURE), 0.0167);
    }
}
