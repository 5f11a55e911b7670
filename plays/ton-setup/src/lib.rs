//! Provisioning of a TON full node or DHT server instance on one host.

pub mod backup;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod keys;
pub mod mode;
pub mod net;
pub mod orchestrator;
pub mod paths;
pub mod ports;
pub mod process;
pub mod service;
pub mod synth;
pub mod tools;

pub use error::{Result, SetupError};
pub use orchestrator::{run, Orchestrator, ProvisionReport};

/// File looked up in the working directory for `KEY=VALUE` defaults.
pub const DOTENV_FILE: &str = ".env";
