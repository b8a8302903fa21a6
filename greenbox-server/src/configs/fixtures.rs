use std::path::Path;

use greenbox_api::models::{DeviceDocument, EffectDocument, GreenhouseDocument, TelemetrySample};
use serde::de::DeserializeOwned;

use crate::configs::Fixtures;
use crate::errors::ServerError;

/// Configuration documents handed over by the platform's storage.
#[derive(Debug, Clone, Default)]
pub struct FixtureSet {
    pub greenhouses: Vec<GreenhouseDocument>,
    pub devices: Vec<DeviceDocument>,
    pub effects: Vec<EffectDocument>,
    pub telemetry: Vec<TelemetrySample>,
}

impl FixtureSet {
    pub fn load(fixtures: &Fixtures) -> Result<Self, ServerError> {
        let set = Self {
            greenhouses: read_json(Path::new(&fixtures.greenhouses))?,
            devices: read_json(Path::new(&fixtures.devices))?,
            effects: read_json(Path::new(&fixtures.effects))?,
            telemetry: match &fixtures.telemetry {
                Some(path) => read_json(Path::new(path))?,
                None => Vec::new(),
            },
        };

        for device in &set.devices {
            if set.greenhouse(&device.greenhouse_id).is_none() {
                tracing::warn!(
                    device_id = %device.device_id,
                    greenhouse_id = %device.greenhouse_id,
                    "device references an unknown greenhouse"
                );
            }
        }

        tracing::info!(
            greenhouses = set.greenhouses.len(),
            devices = set.devices.len(),
            effect_documents = set.effects.len(),
            samples = set.telemetry.len(),
            "fixtures loaded"
        );

        Ok(set)
    }

    pub fn greenhouse(&self, greenhouse_id: &str) -> Option<&GreenhouseDocument> {
        self.greenhouses
            .iter()
            .find(|greenhouse| greenhouse.greenhouse_id == greenhouse_id)
    }

    pub fn devices_of(&self, greenhouse_id: &str) -> Vec<DeviceDocument> {
        self.devices
            .iter()
            .filter(|device| device.greenhouse_id == greenhouse_id)
            .cloned()
            .collect()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ServerError> {
    let text = std::fs::read_to_string(path).map_err(|source| ServerError::FixtureError {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fixture() {
        let fixtures = Fixtures {
            greenhouses: "does/not/exist.json".to_string(),
            devices: "does/not/exist.json".to_string(),
            effects: "does/not/exist.json".to_string(),
            telemetry: None,
        };

        assert!(matches!(
            FixtureSet::load(&fixtures),
            Err(ServerError::FixtureError { .. })
        ));
    }

    #[test]
    fn test_load_workspace_fixtures() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../configs/fixtures");
        let fixtures = Fixtures {
            greenhouses: format!("{dir}/greenhouses.json"),
            devices: format!("{dir}/devices.json"),
            effects: format!("{dir}/effects.json"),
            telemetry: Some(format!("{dir}/telemetry.json")),
        };

        let set = FixtureSet::load(&fixtures).unwrap();

        let greenhouse = set.greenhouse("gh_001").unwrap();
        assert_eq!(greenhouse.device_map["ventilation_system"], "fan_001");
        assert!(!set.devices_of("gh_001").is_empty());
        assert!(!set.effects.is_empty());
        assert!(!set.telemetry.is_empty());
    }
}
