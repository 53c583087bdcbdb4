//! Autoscaling lab library.
//!
//! Brings up a local minikube cluster running the ML prediction API with
//! Prometheus and Grafana, switches the API between horizontal and vertical
//! pod autoscaling, and tears everything down again.
//!
//! # Example
//!
//! ```ignore
//! use autoscale_cli::{DeployConfig, Orchestrator, SystemRunner};
//!
//! let config = DeployConfig::default();
//! let runner = SystemRunner;
//! let mut orchestrator = Orchestrator::new(&runner, &config)?;
//! orchestrator.switch_mode(autoscale_cli::AutoscalingMode::Vpa)?;
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await (may need await in future)
#![allow(clippy::unused_async)]

pub mod autoscaling;
pub mod commands;
pub mod config;
pub mod error;
pub mod image;
pub mod orchestrator;
pub mod portforward;
pub mod preflight;
pub mod provisioner;
pub mod readiness;
pub mod release;
pub mod runner;
pub mod state;
pub mod teardown;
pub mod tools;
pub mod traffic;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at the crate root
pub use autoscaling::AutoscalingMode;
pub use config::DeployConfig;
pub use error::{Error, Result, RunReport, StepOutcome};
pub use orchestrator::Orchestrator;
pub use runner::{CommandRunner, SystemRunner};
pub use state::{DeployState, DeployStep};
