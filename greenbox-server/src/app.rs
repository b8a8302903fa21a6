use std::sync::Arc;
use std::time::Duration;

use greenbox_control::{CatalogSet, validate_threshold};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::configs::{FixtureSet, Settings};
use crate::errors::ServerError;
use crate::services::handlers::{CommandDispatcher, EventDispatcher};
use crate::services::{
    ControlLoop, ControlScheduler, EventBus, GreenhouseContext, SchedulerHandle, TelemetryBackend, TelemetryStore,
    TickClock,
};

pub struct App {
    pub store: Arc<TelemetryStore>,
    pub events: Arc<EventBus>,
    pub scheduler: SchedulerHandle,
    maintenance: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl App {
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;

        let _ = self.shutdown.send(true);
        if let Err(e) = self.maintenance.await {
            tracing::error!("telemetry maintenance task failed: {}", e);
        }

        tracing::info!("greenbox stopped");
    }
}

pub async fn create_app(settings: &Arc<Settings>) -> Result<App, ServerError> {
    let fixtures = FixtureSet::load(&settings.fixtures)?;

    build_app(settings, fixtures, None).await
}

/// Wires store, catalogs and one control loop per greenhouse. Without a
/// `dispatcher`, live commands go out on the event bus.
pub async fn build_app(
    settings: &Settings,
    fixtures: FixtureSet,
    dispatcher: Option<Arc<dyn CommandDispatcher>>,
) -> Result<App, ServerError> {
    let metrics = Arc::new(settings.metrics.clone());
    let catalogs = CatalogSet::load(&fixtures.effects, &metrics)?;

    let store = Arc::new(TelemetryStore::new(&settings.telemetry.tiers)?);
    for sample in &fixtures.telemetry {
        if let Err(e) = store.ingest(sample.clone()).await {
            tracing::warn!("seed sample rejected: {}", e);
        }
    }

    let events = Arc::new(EventBus::new());
    let dispatcher: Arc<dyn CommandDispatcher> = match dispatcher {
        Some(dispatcher) => dispatcher,
        None => Arc::new(EventDispatcher::new(events.clone())),
    };
    let telemetry: Arc<dyn TelemetryBackend> = store.clone();

    let mut loops = Vec::with_capacity(fixtures.greenhouses.len());
    for greenhouse in &fixtures.greenhouses {
        for (metric, threshold) in &greenhouse.thresholds {
            if let Err(e) = validate_threshold(metric, threshold) {
                tracing::warn!(greenhouse_id = %greenhouse.greenhouse_id, "{}", e);
            }
        }

        let context = GreenhouseContext {
            greenhouse: greenhouse.clone(),
            devices: fixtures.devices_of(&greenhouse.greenhouse_id),
            catalog: catalogs.for_greenhouse(&greenhouse.greenhouse_id),
            metrics: metrics.clone(),
        };
        let control = ControlLoop::new(
            context,
            settings.control.clone(),
            telemetry.clone(),
            dispatcher.clone(),
            events.clone(),
        );

        loops.push((control, TickClock::from_settings(&settings.control)));
    }

    let scheduler = ControlScheduler::new(settings.control.pace()).spawn(loops);

    let (shutdown, shutdown_receiver) = watch::channel(false);
    let maintenance = store.start_maintenance_task(
        Duration::from_millis(settings.telemetry.maintenance_ms),
        shutdown_receiver,
    );

    Ok(App {
        store,
        events,
        scheduler,
        maintenance,
        shutdown,
    })
}
