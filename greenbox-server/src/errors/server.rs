use std::path::PathBuf;

use greenbox_control::CatalogError;

use super::{DispatchError, SettingsError, TelemetryError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Settings error: {0}")]
    SettingsError(#[from] SettingsError),

    #[error("Failed to read fixture {path}: {source}")]
    FixtureError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document: {0}")]
    DocumentError(#[from] serde_json::Error),

    #[error("{0}")]
    CatalogError(#[from] CatalogError),

    #[error("Telemetry error: {0}")]
    TelemetryError(#[from] TelemetryError),

    #[error("Dispatch error: {0}")]
    DispatchError(#[from] DispatchError),

    #[error("Unknown greenhouse {0}")]
    UnknownGreenhouse(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}
