pub mod control_service;
pub mod event_bus;
pub mod handlers;
pub mod scheduler_service;
pub mod telemetry_service;

pub use control_service::*;
pub use event_bus::*;
pub use scheduler_service::*;
pub use telemetry_service::*;
