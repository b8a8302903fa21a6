pub mod command_dispatcher;
pub mod device_status_handler;

pub use command_dispatcher::*;
pub use device_status_handler::*;
