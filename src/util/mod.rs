//! Utility modules

mod autostart;
mod instance;
mod tracing_setup;

pub use autostart::Autostart;
pub use instance::InstanceLock;
pub use tracing_setup::init_tracing;
