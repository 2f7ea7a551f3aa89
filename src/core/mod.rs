pub mod collaborators;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod maintenance;
pub mod orchestrator;
pub mod store;
pub mod stream;
pub mod terminal;
pub mod workflow;
