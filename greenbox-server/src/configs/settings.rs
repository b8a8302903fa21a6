use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use greenbox_control::{ActuatorTiming, MetricRegistry, Reducer, ResourceWeights};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::errors::SettingsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

/// Final side effect of a control tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Write projected values back to the telemetry store
    #[default]
    Simulation,
    /// Send commands to the physical actuators
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    #[serde(default)]
    pub mode: OutputMode,
    /// Simulated time between two ticks
    pub tick_seconds: u64,
    /// Wall-clock pause between two ticks
    pub pace_ms: u64,
    /// First simulated tick, defaults to the current time
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    pub ramp_seconds: u64,
    pub min_dwell_seconds: u64,
    pub correction_horizon_ticks: u32,
    pub dispatch_timeout_ms: u64,
    pub max_dispatch_failures: u32,
    /// Per-role ramp duration in seconds
    #[serde(default)]
    pub ramp_overrides: BTreeMap<String, u64>,
    /// Cost of energy and water when several actuators can correct a metric
    #[serde(default)]
    pub resource_weights: ResourceWeights,
}

impl Control {
    pub fn tick(&self) -> time::Duration {
        seconds(self.tick_seconds)
    }

    pub fn pace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.pace_ms)
    }

    pub fn dispatch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn timing_for(&self, role: &str) -> ActuatorTiming {
        let ramp_seconds = self.ramp_overrides.get(role).copied().unwrap_or(self.ramp_seconds);

        ActuatorTiming {
            ramp: seconds(ramp_seconds),
            min_dwell: seconds(self.min_dwell_seconds),
        }
    }
}

/// One resolution tier of every telemetry series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    /// Bucket width in seconds, zero for the raw tier
    #[serde(default)]
    pub bucket_seconds: u64,
    pub retention_seconds: u64,
    #[serde(default)]
    pub reducer: Reducer,
}

impl Tier {
    pub fn is_raw(&self) -> bool {
        self.bucket_seconds == 0
    }

    pub fn bucket(&self) -> time::Duration {
        seconds(self.bucket_seconds)
    }

    pub fn retention(&self) -> time::Duration {
        seconds(self.retention_seconds)
    }

    /// One raw tier first, then strictly coarser tiers each a whole multiple
    /// of the previous bucket width. A tier keeps its samples for at least
    /// one bucket of the next coarser tier, so a bucket is always reduced
    /// over all of its samples.
    pub fn validate_all(tiers: &[Tier]) -> Result<(), String> {
        let Some((raw, derived)) = tiers.split_first() else {
            return Err("at least the raw tier is required".to_string());
        };
        if !raw.is_raw() {
            return Err(format!("first tier {} must be raw", raw.name));
        }
        for tier in tiers {
            check_seconds(&format!("tier {} bucket_seconds", tier.name), tier.bucket_seconds)?;
            check_seconds(&format!("tier {} retention_seconds", tier.name), tier.retention_seconds)?;
        }

        let mut finer = raw;
        for tier in derived {
            if tier.is_raw() {
                return Err(format!("tier {} is a second raw tier", tier.name));
            }
            if tier.bucket_seconds <= finer.bucket_seconds {
                return Err(format!("tier {} is not coarser than {}", tier.name, finer.name));
            }
            if !finer.is_raw() && tier.bucket_seconds % finer.bucket_seconds != 0 {
                return Err(format!(
                    "bucket of {} is not a multiple of the bucket of {}",
                    tier.name, finer.name
                ));
            }
            if finer.retention_seconds < tier.bucket_seconds {
                return Err(format!(
                    "retention of {} is shorter than the bucket of {}",
                    finer.name, tier.name
                ));
            }
            finer = tier;
        }

        let mut names: Vec<&str> = tiers.iter().map(|tier| tier.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != tiers.len() {
            return Err("tier names must be unique".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    /// Period of the downsampling and retention task
    pub maintenance_ms: u64,
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixtures {
    pub greenhouses: String,
    pub devices: String,
    pub effects: String,
    #[serde(default)]
    pub telemetry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub control: Control,
    pub telemetry: Telemetry,
    #[serde(default = "MetricRegistry::greenhouse_defaults")]
    pub metrics: MetricRegistry,
    pub fixtures: Fixtures,
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());
        let config_dir = env::var("CONFIG_DIR").unwrap_or("configs".into());

        Self::load(Path::new(&config_dir), &run_mode)
    }

    /// Layers `default`, the optional `{run_mode}` file and `GREENBOX__*`
    /// variables, then resolves fixture paths against the parent of
    /// `config_dir`.
    pub fn load(config_dir: &Path, run_mode: &str) -> Result<Self, SettingsError> {
        let default = config_dir.join("default");
        let overlay = config_dir.join(run_mode);

        let mut settings: Settings = Config::builder()
            .add_source(File::with_name(&default.to_string_lossy()))
            .add_source(File::with_name(&overlay.to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("GREENBOX").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        let base = config_dir.parent().unwrap_or(Path::new("."));
        let fixtures = &mut settings.fixtures;
        fixtures.greenhouses = normalize_path(base, &fixtures.greenhouses);
        fixtures.devices = normalize_path(base, &fixtures.devices);
        fixtures.effects = normalize_path(base, &fixtures.effects);
        fixtures.telemetry = fixtures.telemetry.as_deref().map(|path| normalize_path(base, path));

        settings.validate()?;

        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let control = &self.control;
        if control.tick_seconds == 0 {
            return Err(SettingsError::Invalid("control.tick_seconds must be positive".into()));
        }
        check_seconds("control.tick_seconds", control.tick_seconds).map_err(SettingsError::Invalid)?;
        check_seconds("control.ramp_seconds", control.ramp_seconds).map_err(SettingsError::Invalid)?;
        check_seconds("control.min_dwell_seconds", control.min_dwell_seconds).map_err(SettingsError::Invalid)?;
        for (role, ramp_seconds) in &control.ramp_overrides {
            check_seconds(&format!("control.ramp_overrides.{role}"), *ramp_seconds)
                .map_err(SettingsError::Invalid)?;
        }
        if control.correction_horizon_ticks == 0 {
            return Err(SettingsError::Invalid(
                "control.correction_horizon_ticks must be positive".into(),
            ));
        }
        if control.max_dispatch_failures == 0 {
            return Err(SettingsError::Invalid(
                "control.max_dispatch_failures must be positive".into(),
            ));
        }
        let weights = control.resource_weights;
        if !(weights.energy.is_finite() && weights.water.is_finite() && weights.energy >= 0.0 && weights.water >= 0.0) {
            return Err(SettingsError::Invalid(
                "control.resource_weights must be finite and not negative".into(),
            ));
        }
        for (metric, range) in self.metrics.iter() {
            if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
                return Err(SettingsError::Invalid(format!("metric {metric} has an empty range")));
            }
        }

        Tier::validate_all(&self.telemetry.tiers).map_err(SettingsError::Invalid)
    }
}

/// Durations are configured as unsigned seconds and computed as `i64` seconds.
fn check_seconds(field: &str, value: u64) -> Result<(), String> {
    i64::try_from(value)
        .map(|_| ())
        .map_err(|_| format!("{field} is out of range"))
}

fn seconds(value: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

fn normalize_path(base: &Path, path: &str) -> String {
    let path_buf = PathBuf::from(path);

    if path_buf.is_absolute() {
        path.to_string()
    } else {
        base.join(path_buf).to_string_lossy().to_string()
    }
}
