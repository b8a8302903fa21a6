use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use greenbox_api::models::{
    ActuatorCommand, DeviceDocument, DeviceId, DeviceStatus, DeviceType, GreenhouseDocument, MetricName,
    TelemetrySample, Threshold,
};
use greenbox_control::{
    ActuatorController, ActuatorState, BandState, Candidate, ComposedDelta, ConfigError, EffectCatalog,
    EffectComposer, HysteresisState, Intent, IntentSet, Level, MetricRegistry, Projection, ThresholdEvaluator,
    Transition, validate_threshold,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::configs::{Control, OutputMode};
use crate::errors::{TelemetryError, TickError};
use crate::services::event_bus::{ControlEvent, EventBus};
use crate::services::handlers::{CommandDispatcher, DeviceLink, DeviceStatusHandler, LinkChange, send_with_timeout};
use crate::services::telemetry_service::TelemetryBackend;

/// Configuration a greenhouse's loop runs against.
#[derive(Debug, Clone)]
pub struct GreenhouseContext {
    pub greenhouse: GreenhouseDocument,
    pub devices: Vec<DeviceDocument>,
    pub catalog: Arc<EffectCatalog>,
    pub metrics: Arc<MetricRegistry>,
}

impl GreenhouseContext {
    pub fn greenhouse_id(&self) -> &str {
        &self.greenhouse.greenhouse_id
    }

    /// Series a metric is read from and written to: the mapped sensor, else a
    /// sensor whose role is the metric, else the greenhouse itself.
    pub fn sensor_for(&self, metric: &str) -> DeviceId {
        if let Some(device_id) = self.greenhouse.sensor_map.get(metric) {
            return device_id.clone();
        }

        self.devices
            .iter()
            .find(|device| device.device_type == DeviceType::Sensor && device.role == metric)
            .map(|device| device.device_id.clone())
            .unwrap_or_else(|| self.greenhouse.greenhouse_id.clone())
    }

    /// Thresholded metrics plus every metric a mapped actuator can move.
    fn observed_metrics(&self) -> BTreeSet<MetricName> {
        let mut metrics: BTreeSet<MetricName> = self.greenhouse.thresholds.keys().cloned().collect();

        for role in self.greenhouse.device_map.keys() {
            for level in self.catalog.levels(role) {
                if let Ok(entry) = self.catalog.lookup(role, level) {
                    metrics.extend(entry.deltas.keys().cloned());
                }
            }
        }

        metrics
    }

    /// Roles allowed to correct `metric`: the threshold's own list, else every
    /// mapped role with a catalog entry touching it.
    fn candidate_roles(&self, metric: &str, threshold: &Threshold) -> Vec<String> {
        if !threshold.actuators.is_empty() {
            return threshold.actuators.clone();
        }

        let mut roles: Vec<String> = self
            .catalog
            .effects_affecting(metric)
            .into_iter()
            .map(|impact| impact.role)
            .filter(|role| self.greenhouse.device_map.contains_key(role))
            .collect();
        roles.dedup();
        roles
    }
}

/// A thresholded metric that moved between low, ok and high.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandChange {
    pub previous: BandState,
    pub state: BandState,
    pub value: f64,
    /// Whether any actuator can correct the metric
    pub actuated: bool,
}

/// What one (metric, role) pair asks for this tick.
enum Need {
    Release,
    Correct(Candidate),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub timestamp: Option<OffsetDateTime>,
    /// Values the tick decided on, read strictly before the tick instant
    pub readings: BTreeMap<MetricName, f64>,
    pub intents: IntentSet,
    pub transitions: Vec<(String, Transition)>,
    pub composed: ComposedDelta,
    pub projection: Projection,
    /// Thresholded metrics left out of this tick
    pub skipped_metrics: Vec<MetricName>,
    pub alerts: BTreeMap<MetricName, BandChange>,
}

/// Point-in-time view of a loop, for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSnapshot {
    pub greenhouse_id: String,
    pub actuators: BTreeMap<String, ActuatorState>,
    pub devices: BTreeMap<DeviceId, DeviceLink>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_tick: Option<OffsetDateTime>,
}

/// Orchestrates one greenhouse: read, evaluate, debounce, compose, output.
/// Owns every piece of mutable control state of that greenhouse.
pub struct ControlLoop {
    context: GreenhouseContext,
    settings: Control,
    telemetry: Arc<dyn TelemetryBackend>,
    dispatcher: Arc<dyn CommandDispatcher>,
    events: Arc<EventBus>,
    sensors: BTreeMap<MetricName, DeviceId>,
    evaluator: ThresholdEvaluator,
    controllers: BTreeMap<String, ActuatorController>,
    bands: BTreeMap<MetricName, BandState>,
    devices: DeviceStatusHandler,
    last_tick: Option<OffsetDateTime>,
}

impl ControlLoop {
    pub fn new(
        context: GreenhouseContext,
        settings: Control,
        telemetry: Arc<dyn TelemetryBackend>,
        dispatcher: Arc<dyn CommandDispatcher>,
        events: Arc<EventBus>,
    ) -> Self {
        let sensors = context
            .observed_metrics()
            .into_iter()
            .map(|metric| {
                let device_id = context.sensor_for(&metric);
                (metric, device_id)
            })
            .collect();
        let devices = DeviceStatusHandler::new(&context.devices, settings.max_dispatch_failures);

        Self {
            context,
            settings,
            telemetry,
            dispatcher,
            events,
            sensors,
            evaluator: ThresholdEvaluator::new(),
            controllers: BTreeMap::new(),
            bands: BTreeMap::new(),
            devices,
            last_tick: None,
        }
    }

    pub fn greenhouse_id(&self) -> &str {
        self.context.greenhouse_id()
    }

    pub fn actuator(&self, role: &str) -> Option<&ActuatorState> {
        self.controllers.get(role).map(ActuatorController::state)
    }

    pub fn hysteresis(&self, metric: &str, role: &str) -> HysteresisState {
        self.evaluator.state(metric, role)
    }

    pub fn band(&self, metric: &str) -> BandState {
        self.bands.get(metric).copied().unwrap_or_default()
    }

    pub fn device_link(&self, device_id: &str) -> DeviceLink {
        self.devices.link(device_id)
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            greenhouse_id: self.greenhouse_id().to_string(),
            actuators: self
                .controllers
                .iter()
                .map(|(role, controller)| (role.clone(), *controller.state()))
                .collect(),
            devices: self.devices.links().clone(),
            last_tick: self.last_tick,
        }
    }

    pub async fn set_device_status(&mut self, device_id: &str, status: DeviceStatus, now: OffsetDateTime) {
        let change = self.devices.set_status(device_id, status);
        self.publish_link_change(device_id, change, now).await;
    }

    /// Runs one tick at `now`. Replaying the same instant without new
    /// telemetry leaves every state unchanged and writes nothing new.
    pub async fn tick(&mut self, now: OffsetDateTime) -> Result<TickReport, TickError> {
        if let Some(last) = self.last_tick {
            if now < last {
                return Err(TickError::Stale { at: now, last });
            }
        }

        let mut report = TickReport {
            timestamp: Some(now),
            ..TickReport::default()
        };

        let current = match self.read_metrics(now).await {
            Ok(current) => current,
            Err(error) => {
                tracing::warn!(greenhouse_id = %self.greenhouse_id(), %error, "tick aborted");
                self.events
                    .emit(ControlEvent::TickSkipped {
                        greenhouse_id: self.greenhouse_id().to_string(),
                        reason: error.to_string(),
                        timestamp: now,
                    })
                    .await;
                return Err(error);
            }
        };

        for metric in self.context.greenhouse.thresholds.keys() {
            match current.get(metric) {
                Some(value) => {
                    report.readings.insert(metric.clone(), *value);
                }
                None => report.skipped_metrics.push(metric.clone()),
            }
        }

        self.evaluate(&mut report);
        self.publish_alerts(&report.alerts, now).await;
        report.transitions = self.step_controllers(&report.intents, now).await;

        let active: Vec<(String, Level)> = self
            .controllers
            .iter()
            .filter_map(|(role, controller)| {
                controller
                    .phase()
                    .effective_level()
                    .map(|level| (role.clone(), level))
            })
            .collect();

        let composer = EffectComposer::new(&self.context.catalog, &self.context.metrics);
        report.composed = composer.compose(active.iter().map(|(role, level)| (role.as_str(), *level)));
        report.projection = composer.project(&current, &report.composed);

        match self.settings.mode {
            OutputMode::Simulation => self.write_back(&report.projection, now).await,
            OutputMode::Live => self.dispatch(&report.transitions, now).await,
        }

        self.last_tick = Some(now);

        tracing::debug!(
            greenhouse_id = %self.greenhouse_id(),
            %now,
            intents = report.intents.len(),
            transitions = report.transitions.len(),
            active = active.len(),
            energy_rate = report.composed.energy_rate,
            "tick completed"
        );

        Ok(report)
    }

    /// Latest value of every observed metric strictly before `now`. Only a
    /// store failure is fatal for the tick; a metric without data is left out.
    async fn read_metrics(&self, now: OffsetDateTime) -> Result<BTreeMap<MetricName, f64>, TickError> {
        let mut current = BTreeMap::new();

        for (metric, device_id) in &self.sensors {
            match self.telemetry.latest_before(device_id, metric, now).await {
                Ok(sample) => {
                    current.insert(metric.clone(), sample.value);
                }
                Err(TelemetryError::NotFound { .. }) => {
                    tracing::debug!(greenhouse_id = %self.greenhouse_id(), %metric, %device_id, "no reading yet");
                }
                Err(TelemetryError::StoreUnavailable(reason)) => {
                    return Err(TickError::StoreUnavailable(reason));
                }
                Err(error) => {
                    tracing::warn!(greenhouse_id = %self.greenhouse_id(), %metric, %error, "reading skipped");
                }
            }
        }

        Ok(current)
    }

    fn evaluate(&mut self, report: &mut TickReport) {
        let thresholds = self.context.greenhouse.thresholds.clone();

        for (metric, threshold) in &thresholds {
            let Some(&value) = report.readings.get(metric) else {
                continue;
            };

            let valid = if self.context.metrics.contains(metric) {
                validate_threshold(metric, threshold)
            } else {
                Err(ConfigError::UnknownMetric { metric: metric.clone() })
            };
            if let Err(error) = valid {
                tracing::warn!(greenhouse_id = %self.greenhouse_id(), %metric, %error, "metric skipped");
                report.skipped_metrics.push(metric.clone());
                continue;
            }

            let roles = self.context.candidate_roles(metric, threshold);
            if let Some(change) = self.track_band(metric, threshold, value, !roles.is_empty()) {
                report.alerts.insert(metric.clone(), change);
            }

            let mut candidates = Vec::new();
            for role in roles {
                match self.assess(metric, &role, value, threshold) {
                    Ok(Some(Need::Correct(candidate))) => candidates.push(candidate),
                    Ok(Some(Need::Release)) => report.intents.push(&role, Intent::Disengage),
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(
                            greenhouse_id = %self.greenhouse_id(),
                            %metric,
                            %role,
                            %error,
                            "actuator skipped"
                        );
                    }
                }
            }

            let chosen = self
                .context
                .catalog
                .choose(
                    &candidates,
                    metric,
                    value,
                    self.settings.correction_horizon_ticks,
                    self.settings.resource_weights,
                )
                .map(|candidate| candidate.role.clone());
            if candidates.len() > 1 {
                tracing::debug!(greenhouse_id = %self.greenhouse_id(), %metric, ?chosen, candidates = candidates.len(), "corrective actuator chosen");
            }

            for candidate in candidates {
                let intent = if chosen.as_deref() == Some(candidate.role.as_str()) {
                    Intent::Engage { level: candidate.level }
                } else {
                    Intent::Disengage
                };
                report.intents.push(&candidate.role, intent);
            }
        }
    }

    fn assess(&mut self, metric: &str, role: &str, value: f64, threshold: &Threshold) -> Result<Option<Need>, ConfigError> {
        if !self.context.greenhouse.device_map.contains_key(role) {
            return Err(ConfigError::UnmappedActuator { role: role.to_string() });
        }
        let Some(direction) = self.context.catalog.direction_of(role, metric) else {
            return Ok(None);
        };

        let evaluation = self.evaluator.evaluate(metric, role, direction, value, threshold)?;
        if evaluation.state == HysteresisState::Inactive {
            return Ok(Some(Need::Release));
        }

        let target = direction.target(threshold);
        let selected = self.context.catalog.select_level(
            role,
            metric,
            value,
            target,
            self.settings.correction_horizon_ticks,
        )?;

        // Steps up as the violation grows, never down while it lasts
        let intended = self
            .controllers
            .get(role)
            .and_then(|controller| controller.state().intended_level());
        let level = intended.map_or(selected, |current| current.max(selected));

        Ok(Some(Need::Correct(Candidate {
            role: role.to_string(),
            level,
            target,
            engaged: intended.is_some(),
        })))
    }

    /// Records which side of its band `metric` is on; returns the change, if any.
    fn track_band(&mut self, metric: &str, threshold: &Threshold, value: f64, actuated: bool) -> Option<BandChange> {
        let state = BandState::of(threshold, value);
        let previous = self.bands.insert(metric.to_string(), state).unwrap_or_default();
        if state == previous {
            return None;
        }

        match state {
            BandState::Ok => {
                tracing::info!(greenhouse_id = %self.greenhouse_id(), %metric, value, %previous, "metric back in band")
            }
            _ => {
                tracing::warn!(greenhouse_id = %self.greenhouse_id(), %metric, value, %state, actuated, "metric out of band")
            }
        }

        Some(BandChange {
            previous,
            state,
            value,
            actuated,
        })
    }

    async fn publish_alerts(&self, alerts: &BTreeMap<MetricName, BandChange>, now: OffsetDateTime) {
        for (metric, change) in alerts {
            self.events
                .emit(ControlEvent::ThresholdAlert {
                    greenhouse_id: self.greenhouse_id().to_string(),
                    metric: metric.clone(),
                    value: change.value,
                    previous: change.previous,
                    state: change.state,
                    actuated: change.actuated,
                    timestamp: now,
                })
                .await;
        }
    }

    async fn step_controllers(&mut self, intents: &IntentSet, now: OffsetDateTime) -> Vec<(String, Transition)> {
        for (role, _) in intents.iter() {
            self.controllers
                .entry(role.to_string())
                .or_insert_with(|| ActuatorController::new(role, self.settings.timing_for(role)));
        }

        let mut transitions = Vec::new();
        for (role, controller) in self.controllers.iter_mut() {
            let mut intent = intents.get(role);
            let offline = self
                .context
                .greenhouse
                .device_map
                .get(role)
                .is_some_and(|device_id| self.devices.is_offline(device_id));
            if offline && intent.is_some() {
                tracing::debug!(greenhouse_id = %self.context.greenhouse.greenhouse_id, %role, ?intent, "intent suppressed, device offline");
                intent = None;
            }

            for transition in controller.step(intent, now) {
                transitions.push((role.clone(), transition));
            }
        }

        for (role, transition) in &transitions {
            tracing::info!(greenhouse_id = %self.greenhouse_id(), %role, ?transition, "actuator transition");
            self.events
                .emit(ControlEvent::ActuatorTransition {
                    greenhouse_id: self.greenhouse_id().to_string(),
                    role: role.clone(),
                    transition: *transition,
                    timestamp: now,
                })
                .await;
        }

        transitions
    }

    async fn write_back(&self, projection: &Projection, now: OffsetDateTime) {
        for (metric, value) in &projection.values {
            let Some(device_id) = self.sensors.get(metric) else {
                continue;
            };

            let sample = TelemetrySample::new(device_id.clone(), metric.clone(), now, *value);
            match self.telemetry.append(sample).await {
                Ok(()) => {
                    self.events
                        .emit(ControlEvent::TelemetryProjected {
                            greenhouse_id: self.greenhouse_id().to_string(),
                            device_id: device_id.clone(),
                            metric: metric.clone(),
                            value: *value,
                            clamped: projection.clamped.contains(metric),
                            timestamp: now,
                        })
                        .await;
                }
                Err(error) => {
                    tracing::warn!(greenhouse_id = %self.greenhouse_id(), %metric, %error, "projected sample not stored");
                }
            }
        }
    }

    /// Sends the intended state of every actuator that changed this tick or
    /// still awaits confirmation from an earlier failed send.
    async fn dispatch(&mut self, transitions: &[(String, Transition)], now: OffsetDateTime) {
        let changed: BTreeSet<&str> = transitions
            .iter()
            .filter(|(_, transition)| !matches!(transition, Transition::RampCompleted { .. }))
            .map(|(role, _)| role.as_str())
            .collect();

        let commands: Vec<ActuatorCommand> = self
            .controllers
            .iter()
            .filter_map(|(role, controller)| {
                let device_id = self.context.greenhouse.device_map.get(role)?;
                (changed.contains(role.as_str()) || self.devices.needs_resend(device_id)).then(|| {
                    ActuatorCommand::new(
                        self.greenhouse_id(),
                        device_id,
                        role,
                        controller.intended_command(),
                        now,
                    )
                })
            })
            .collect();

        let timeout = self.settings.dispatch_timeout();
        let results = join_all(
            commands
                .iter()
                .map(|command| send_with_timeout(self.dispatcher.as_ref(), command, timeout)),
        )
        .await;

        for (command, result) in commands.iter().zip(results) {
            let change = match result {
                Ok(()) => self.devices.record_success(&command.device_id),
                Err(error) => {
                    let change = self.devices.record_failure(&command.device_id);
                    let failures = self.devices.link(&command.device_id).consecutive_failures;
                    tracing::warn!(
                        greenhouse_id = %command.greenhouse_id,
                        device_id = %command.device_id,
                        failures,
                        %error,
                        "dispatch failed, retrying next tick"
                    );
                    self.events
                        .emit(ControlEvent::DispatchFailed {
                            greenhouse_id: command.greenhouse_id.clone(),
                            device_id: command.device_id.clone(),
                            error: error.to_string(),
                            consecutive_failures: failures,
                            timestamp: now,
                        })
                        .await;
                    change
                }
            };

            self.publish_link_change(&command.device_id, change, now).await;
        }
    }

    async fn publish_link_change(&self, device_id: &str, change: LinkChange, now: OffsetDateTime) {
        let greenhouse_id = self.greenhouse_id().to_string();
        let device_id = device_id.to_string();

        let event = match change {
            LinkChange::Unchanged => return,
            LinkChange::WentOffline => ControlEvent::DeviceOffline {
                greenhouse_id,
                device_id,
                timestamp: now,
            },
            LinkChange::Recovered => ControlEvent::DeviceRecovered {
                greenhouse_id,
                device_id,
                timestamp: now,
            },
        };

        self.events.emit(event).await;
    }
}
