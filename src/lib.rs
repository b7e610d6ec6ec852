pub mod accountant;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod intensity;
pub mod output;
pub mod power;
pub mod status;
pub mod store;
pub mod sysfs;
pub mod telemetry;
