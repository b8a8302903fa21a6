pub mod actuator;
pub mod catalog;
pub mod composer;
pub mod error;
pub mod metrics;
pub mod reducer;
pub mod selection;
pub mod threshold;

pub use actuator::*;
pub use catalog::*;
pub use composer::*;
pub use error::*;
pub use metrics::*;
pub use reducer::*;
pub use selection::*;
pub use threshold::*;
