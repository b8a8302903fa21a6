use std::collections::BTreeMap;
use std::time::Duration;

use greenbox_api::models::{DeviceId, DeviceStatus, GreenhouseId};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::configs::{Control, OutputMode};
use crate::errors::ServerError;
use crate::services::control_service::{ControlLoop, LoopSnapshot};

/// Source of tick instants for one loop.
#[derive(Debug, Clone)]
pub enum TickClock {
    /// `start`, `start + step`, `start + 2 * step`, ...
    Simulated { next: OffsetDateTime, step: time::Duration },
    System,
}

impl TickClock {
    pub fn simulated(start: OffsetDateTime, step: time::Duration) -> Self {
        TickClock::Simulated { next: start, step }
    }

    pub fn from_settings(control: &Control) -> Self {
        match control.mode {
            OutputMode::Simulation => Self::simulated(
                control.start.unwrap_or_else(OffsetDateTime::now_utc),
                control.tick(),
            ),
            OutputMode::Live => TickClock::System,
        }
    }

    /// Instant of the upcoming tick without consuming it.
    pub fn peek(&self) -> OffsetDateTime {
        match self {
            TickClock::Simulated { next, .. } => *next,
            TickClock::System => OffsetDateTime::now_utc(),
        }
    }

    pub fn advance(&mut self) -> OffsetDateTime {
        match self {
            TickClock::Simulated { next, step } => {
                let now = *next;
                *next += *step;
                now
            }
            TickClock::System => OffsetDateTime::now_utc(),
        }
    }
}

/// Requests served by a running loop between two ticks.
#[derive(Debug)]
pub enum LoopCommand {
    SetDeviceStatus { device_id: DeviceId, status: DeviceStatus },
    Snapshot(oneshot::Sender<LoopSnapshot>),
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    loops: BTreeMap<GreenhouseId, mpsc::Sender<LoopCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn greenhouses(&self) -> impl Iterator<Item = &str> {
        self.loops.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    async fn send(&self, greenhouse_id: &str, command: LoopCommand) -> Result<(), ServerError> {
        let sender = self
            .loops
            .get(greenhouse_id)
            .ok_or_else(|| ServerError::UnknownGreenhouse(greenhouse_id.to_string()))?;

        sender
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("control loop of {greenhouse_id} has stopped").into())
    }

    pub async fn set_device_status(
        &self,
        greenhouse_id: &str,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), ServerError> {
        self.send(
            greenhouse_id,
            LoopCommand::SetDeviceStatus {
                device_id: device_id.to_string(),
                status,
            },
        )
        .await
    }

    pub async fn snapshot(&self, greenhouse_id: &str) -> Result<LoopSnapshot, ServerError> {
        let (sender, receiver) = oneshot::channel();
        self.send(greenhouse_id, LoopCommand::Snapshot(sender)).await?;

        receiver
            .await
            .map_err(|_| anyhow::anyhow!("control loop of {greenhouse_id} dropped the request").into())
    }

    /// Stops every loop at its next tick boundary and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("control loop task failed: {}", e);
            }
        }
    }
}

/// Spawns one independent task per greenhouse.
pub struct ControlScheduler {
    pace: Duration,
}

impl ControlScheduler {
    pub fn new(pace: Duration) -> Self {
        Self {
            pace: pace.max(Duration::from_millis(1)),
        }
    }

    pub fn spawn(&self, loops: Vec<(ControlLoop, TickClock)>) -> SchedulerHandle {
        let (shutdown, shutdown_receiver) = watch::channel(false);
        let mut senders = BTreeMap::new();
        let mut tasks = Vec::with_capacity(loops.len());

        for (control, clock) in loops {
            let (sender, receiver) = mpsc::channel(16);
            senders.insert(control.greenhouse_id().to_string(), sender);
            tasks.push(tokio::spawn(run_loop(
                control,
                clock,
                self.pace,
                shutdown_receiver.clone(),
                receiver,
            )));
        }

        tracing::info!(greenhouses = tasks.len(), pace = ?self.pace, "control loops started");

        SchedulerHandle {
            shutdown,
            loops: senders,
            tasks,
        }
    }
}

/// A tick is awaited outside of `select!`, so shutdown and commands only
/// ever land between two ticks.
async fn run_loop(
    mut control: ControlLoop,
    mut clock: TickClock,
    pace: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut commands: mpsc::Receiver<LoopCommand>,
) {
    let greenhouse_id = control.greenhouse_id().to_string();
    let mut interval = tokio::time::interval(pace);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            Some(command) = commands.recv() => {
                handle_command(&mut control, command, clock.peek()).await;
                continue;
            }
            _ = interval.tick() => {}
        }

        let now = clock.advance();
        match control.tick(now).await {
            Ok(report) => {
                tracing::trace!(%greenhouse_id, %now, readings = ?report.readings, "tick");
            }
            Err(error) => {
                tracing::warn!(%greenhouse_id, %now, %error, "tick failed, retrying next tick");
            }
        }
    }

    tracing::info!(%greenhouse_id, "control loop stopped");
}

async fn handle_command(control: &mut ControlLoop, command: LoopCommand, now: OffsetDateTime) {
    match command {
        LoopCommand::SetDeviceStatus { device_id, status } => {
            tracing::info!(greenhouse_id = %control.greenhouse_id(), %device_id, ?status, "device status set");
            control.set_device_status(&device_id, status, now).await;
        }
        LoopCommand::Snapshot(reply) => {
            let _ = reply.send(control.snapshot());
        }
    }
}
