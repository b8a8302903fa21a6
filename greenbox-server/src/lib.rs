use std::sync::Arc;

use crate::app::create_app;
use crate::configs::Settings;
use crate::errors::ServerError;

pub mod app;
pub mod configs;
pub mod errors;
pub mod services;

pub async fn run(settings: &Arc<Settings>) -> Result<(), ServerError> {
    let app = create_app(settings).await?;

    tracing::info!(
        greenhouses = app.scheduler.len(),
        mode = ?settings.control.mode,
        "greenbox running"
    );

    tokio::signal::ctrl_c().await.map_err(anyhow::Error::from)?;

    tracing::info!("shutting down");
    app.shutdown().await;

    Ok(())
}
