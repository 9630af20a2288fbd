pub mod command;
pub mod decoder;
pub mod frame;
pub mod payload;
pub mod registry;
pub mod registry_client;
pub mod telemetry;
pub mod value;
