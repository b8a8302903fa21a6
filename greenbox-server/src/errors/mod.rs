pub mod dispatch;
pub mod server;
pub mod settings;
pub mod telemetry;
pub mod tick;

pub use dispatch::DispatchError;
pub use server::ServerError;
pub use settings::SettingsError;
pub use telemetry::TelemetryError;
pub use tick::TickError;
