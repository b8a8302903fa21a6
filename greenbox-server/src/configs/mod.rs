pub mod fixtures;
pub mod settings;

pub use fixtures::FixtureSet;
pub use settings::{Control, Fixtures, Logger, OutputMode, Settings, Telemetry, Tier};
