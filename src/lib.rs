// ABOUTME: Library root for the environment clone orchestrator
// ABOUTME: Wires the safety gate, operation tracking, and clone strategies

pub mod backup;
pub mod cli;
pub mod clone;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod operation;
pub mod orchestrator;
pub mod validator;

pub use environment::{CloneOptions, CloneRequest, Environment, EnvironmentCredentials};
pub use error::CloneError;
pub use operation::{CloneProgress, OperationRegistry, OperationStatus};
pub use orchestrator::Orchestrator;
