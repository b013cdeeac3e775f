pub mod codec;
pub mod commands;
pub mod device;
pub mod models;
pub mod mqtt;
pub mod server;
pub mod store;
pub mod telemetry;
