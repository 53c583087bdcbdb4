//! Typed wrappers for the CLIs the tool drives.
//!
//! Each wrapper borrows a [`CommandRunner`](crate::runner::CommandRunner),
//! builds the argument list, and decodes JSON output where the CLI offers it.

mod docker;
mod helm;
mod kubectl;
mod minikube;

pub use docker::Docker;
pub use helm::{Helm, HelmRelease};
pub use kubectl::{pod_is_ready, Kubectl};
pub use minikube::{ClusterStatus, Minikube};

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Decode CLI JSON output, naming what was being decoded on failure.
pub(crate) fn parse_json<T: DeserializeOwned>(what: &str, stdout: &str) -> Result<T> {
    serde_json::from_str(stdout).map_err(|e| Error::parse(what, e))
}
