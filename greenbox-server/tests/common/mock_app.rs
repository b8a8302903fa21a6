#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use greenbox_api::models::{
    ActuatorCommand, DeviceDocument, DeviceStatus, DeviceType, EffectRecord, GreenhouseDocument, LevelValue,
    TelemetrySample, Threshold,
};
use greenbox_control::{EffectCatalog, MetricRegistry, Reducer, ResourceWeights};
use greenbox_server::configs::{Control, OutputMode, Tier};
use greenbox_server::errors::{DispatchError, TelemetryError};
use greenbox_server::services::handlers::CommandDispatcher;
use greenbox_server::services::{ControlLoop, EventBus, GreenhouseContext, TelemetryBackend, TelemetryStore};
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::Mutex;

pub const START: OffsetDateTime = datetime!(2024-06-01 11:00 UTC);

pub fn minutes(n: i64) -> OffsetDateTime {
    START + time::Duration::minutes(n)
}

/// Records every command; fails or stalls on demand.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<ActuatorCommand>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl RecordingDispatcher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<ActuatorCommand> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn send(&self, command: &ActuatorCommand) -> Result<(), DispatchError> {
        self.sent.lock().await.push(command.clone());

        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::DispatchFailure {
                device_id: command.device_id.clone(),
                reason: "broker unreachable".to_string(),
            });
        }

        Ok(())
    }
}

/// Store wrapper whose availability can be switched off.
pub struct FlakyStore {
    pub inner: Arc<TelemetryStore>,
    available: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<TelemetryStore>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), TelemetryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TelemetryError::StoreUnavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl TelemetryBackend for FlakyStore {
    async fn append(&self, sample: TelemetrySample) -> Result<(), TelemetryError> {
        self.check()?;
        self.inner.ingest(sample).await
    }

    async fn latest_before(
        &self,
        device_id: &str,
        metric: &str,
        before: OffsetDateTime,
    ) -> Result<TelemetrySample, TelemetryError> {
        self.check()?;
        self.inner.latest_before(device_id, metric, before).await
    }
}

pub struct MockApp {
    pub store: Arc<TelemetryStore>,
    pub events: Arc<EventBus>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub metrics: Arc<MetricRegistry>,
}

impl MockApp {
    pub fn new() -> Self {
        Self {
            store: Arc::new(TelemetryStore::new(&Self::tiers()).unwrap()),
            events: Arc::new(EventBus::new()),
            dispatcher: Arc::new(RecordingDispatcher::default()),
            metrics: Arc::new(MetricRegistry::greenhouse_defaults()),
        }
    }

    pub fn tiers() -> Vec<Tier> {
        vec![
            Tier {
                name: "raw".to_string(),
                bucket_seconds: 0,
                retention_seconds: 86_400,
                reducer: Reducer::Mean,
            },
            Tier {
                name: "1h".to_string(),
                bucket_seconds: 3_600,
                retention_seconds: 7 * 86_400,
                reducer: Reducer::Mean,
            },
            Tier {
                name: "1d".to_string(),
                bucket_seconds: 86_400,
                retention_seconds: 365 * 86_400,
                reducer: Reducer::Mean,
            },
        ]
    }

    pub fn control_settings(mode: OutputMode) -> Control {
        Control {
            mode,
            tick_seconds: 60,
            pace_ms: 1,
            start: Some(START),
            ramp_seconds: 120,
            min_dwell_seconds: 300,
            correction_horizon_ticks: 60,
            dispatch_timeout_ms: 50,
            max_dispatch_failures: 3,
            ramp_overrides: BTreeMap::new(),
            resource_weights: ResourceWeights::default(),
        }
    }

    /// `gh_001`: ventilation and heating, temperature {20, 25, 0.5}.
    pub fn greenhouse() -> GreenhouseDocument {
        GreenhouseDocument {
            greenhouse_id: "gh_001".to_string(),
            tenant_id: "tnt_001".to_string(),
            label: None,
            location: None,
            device_map: BTreeMap::from([
                ("ventilation_system".to_string(), "fan_001".to_string()),
                ("heating_system".to_string(), "heater_001".to_string()),
            ]),
            sensor_map: BTreeMap::from([
                ("temperature".to_string(), "dev_001".to_string()),
                ("humidity".to_string(), "dev_001".to_string()),
            ]),
            thresholds: BTreeMap::from([("temperature".to_string(), Threshold::new(20.0, 25.0, 0.5))]),
        }
    }

    pub fn devices() -> Vec<DeviceDocument> {
        [
            ("dev_001", DeviceType::Sensor, "temperature_sensor"),
            ("fan_001", DeviceType::Actuator, "ventilation_system"),
            ("heater_001", DeviceType::Actuator, "heating_system"),
        ]
        .into_iter()
        .map(|(device_id, device_type, role)| DeviceDocument {
            device_id: device_id.to_string(),
            greenhouse_id: "gh_001".to_string(),
            device_type,
            role: role.to_string(),
            status: DeviceStatus::Online,
        })
        .collect()
    }

    pub fn effect(system: &str, level: &str, fields: &[(&str, f64)]) -> EffectRecord {
        EffectRecord {
            system: system.to_string(),
            level: LevelValue::Text(level.to_string()),
            fields: fields
                .iter()
                .map(|(name, value)| (name.to_string(), Some(*value)))
                .collect(),
        }
    }

    pub fn catalog(&self) -> Arc<EffectCatalog> {
        let records = vec![
            Self::effect("ventilation_system", "50%", &[("temperature", -0.0083), ("humidity", -0.0833)]),
            Self::effect("ventilation_system", "100%", &[("temperature", -0.0167), ("humidity", -0.1667)]),
            Self::effect(
                "heating_system",
                "100%",
                &[("temperature", 0.0167), ("humidity", 0.0833), ("soil_humidity", -0.00333)],
            ),
        ];

        Arc::new(EffectCatalog::from_records(&records, &self.metrics).unwrap())
    }

    pub fn context(&self, greenhouse: GreenhouseDocument) -> GreenhouseContext {
        let devices = Self::devices()
            .into_iter()
            .map(|device| DeviceDocument {
                greenhouse_id: greenhouse.greenhouse_id.clone(),
                ..device
            })
            .collect();

        GreenhouseContext {
            greenhouse,
            devices,
            catalog: self.catalog(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn control_loop(&self, greenhouse: GreenhouseDocument, mode: OutputMode) -> ControlLoop {
        self.control_loop_with(greenhouse, mode, self.store.clone())
    }

    pub fn control_loop_with(
        &self,
        greenhouse: GreenhouseDocument,
        mode: OutputMode,
        telemetry: Arc<dyn TelemetryBackend>,
    ) -> ControlLoop {
        ControlLoop::new(
            self.context(greenhouse),
            Self::control_settings(mode),
            telemetry,
            self.dispatcher.clone(),
            self.events.clone(),
        )
    }

    pub fn control_loop_from(&self, context: GreenhouseContext, settings: Control) -> ControlLoop {
        ControlLoop::new(
            context,
            settings,
            self.store.clone(),
            self.dispatcher.clone(),
            self.events.clone(),
        )
    }

    /// Stores a reading one minute before the first tick.
    pub async fn seed(&self, device_id: &str, metric: &str, value: f64) {
        self.store
            .append(device_id, metric, minutes(-1), value)
            .await
            .unwrap();
    }

    pub async fn temperature(&self) -> f64 {
        self.store.latest("dev_001", "temperature").await.unwrap().value
    }
}
