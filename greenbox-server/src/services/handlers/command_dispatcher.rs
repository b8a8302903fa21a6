use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use greenbox_api::models::ActuatorCommand;

use crate::errors::DispatchError;
use crate::services::event_bus::{ControlEvent, EventBus};

/// Device transport used in live mode.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn send(&self, command: &ActuatorCommand) -> Result<(), DispatchError>;
}

/// Sends `command`, giving up after `timeout`.
pub async fn send_with_timeout(
    dispatcher: &dyn CommandDispatcher,
    command: &ActuatorCommand,
    timeout: Duration,
) -> Result<(), DispatchError> {
    match tokio::time::timeout(timeout, dispatcher.send(command)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout {
            device_id: command.device_id.clone(),
            timeout,
        }),
    }
}

/// Hands commands to whatever transport adapter listens on the event bus.
pub struct EventDispatcher {
    events: Arc<EventBus>,
}

impl EventDispatcher {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl CommandDispatcher for EventDispatcher {
    async fn send(&self, command: &ActuatorCommand) -> Result<(), DispatchError> {
        tracing::info!(
            greenhouse_id = %command.greenhouse_id,
            device_id = %command.device_id,
            role = %command.role,
            command = ?command.command,
            "dispatching actuator command"
        );

        self.events
            .emit(ControlEvent::CommandDispatched(command.clone()))
            .await;

        Ok(())
    }
}
