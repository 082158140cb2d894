pub mod client;
pub mod config;
pub mod event;
pub mod render;
pub mod room;
pub mod store;
pub mod telemetry;
pub mod transport;
