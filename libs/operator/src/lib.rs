pub mod controller;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod status;
pub mod telemetry;
