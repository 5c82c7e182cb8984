//! Simulated heart-rate sensor publishing JSON telemetry to an MQTT broker.

pub mod config;
pub mod errors;
pub mod generator;
pub mod mqtt;
pub mod publisher;
pub mod runner;
pub mod telemetry;
