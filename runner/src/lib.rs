pub mod config;
pub mod database;
pub mod loader;
pub mod orchestrator;
pub mod scoring;
pub mod target;
