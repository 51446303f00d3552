pub mod api;
pub mod cluster;
pub mod config;
pub mod crds;
pub mod date_time;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod resources;
pub mod single_flight;
pub mod store;
pub mod telemetry;
