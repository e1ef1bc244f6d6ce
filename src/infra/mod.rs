//! Runtime bootstrap: telemetry and cache wiring.

pub mod error;
pub mod stack;
pub mod telemetry;
