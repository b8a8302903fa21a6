mod control;
mod device;
mod effect;
mod greenhouse;
mod metric;
mod telemetry;

pub use control::*;
pub use device::*;
pub use effect::*;
pub use greenhouse::*;
pub use metric::*;
pub use telemetry::*;

pub type GreenhouseId = String;
pub type DeviceId = String;
pub type TenantId = String;
