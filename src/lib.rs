pub mod analyzer;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod supervisor;
pub mod vcs;
pub mod workspace;
