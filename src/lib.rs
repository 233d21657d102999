pub mod board;
pub mod clock;
pub mod config;
pub mod device_config;
pub mod host;
pub mod pipeline;
pub mod provisioning;
pub mod runtime;
pub mod state;
pub mod transport;
