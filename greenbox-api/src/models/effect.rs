use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::GreenhouseId;

pub const ENERGY_CONSUMPTION: &str = "energy_consumption";
pub const WATER_CONSUMPTION: &str = "water_consumption";

/// Level as it appears in catalog documents: `"100%"`, `"100"` or `100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for LevelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelValue::Number(value) => write!(f, "{value}"),
            LevelValue::Text(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    /// Actuator role the row describes
    pub system: String,
    /// Power level of the actuator
    pub level: LevelValue,
    /// Metric deltas per tick plus optional resource columns; absent or null cells are skipped
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDocument {
    /// Scope of the rows, `None` for the global catalog
    #[serde(default)]
    pub greenhouse_id: Option<GreenhouseId>,
    /// Catalog rows
    pub effects: Vec<EffectRecord>,
}
