use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use super::parse_json;
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::runner::{CommandRunner, Invocation, RunnerExt};

/// Observed state of a minikube profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    /// Host, kubelet and API server all running.
    Running,
    /// Profile exists but is stopped.
    Stopped,
    /// Profile exists with some component not running.
    Degraded,
    /// No such profile.
    Absent,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Degraded => write!(f, "degraded"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfileStatus {
    #[serde(default)]
    host: String,
    #[serde(default)]
    kubelet: String,
    #[serde(rename = "APIServer", default)]
    api_server: String,
}

impl ProfileStatus {
    fn classify(&self) -> ClusterStatus {
        match self.host.as_str() {
            "Nonexistent" | "" => ClusterStatus::Absent,
            "Stopped" => ClusterStatus::Stopped,
            "Running" if self.kubelet == "Running" && self.api_server == "Running" => {
                ClusterStatus::Running
            }
            _ => ClusterStatus::Degraded,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddonState {
    #[serde(default)]
    status: String,
}

/// `minikube` bound to one profile.
pub struct Minikube<'a> {
    runner: &'a dyn CommandRunner,
    profile: String,
}

impl<'a> Minikube<'a> {
    pub fn new(runner: &'a dyn CommandRunner, profile: impl Into<String>) -> Self {
        Self {
            runner,
            profile: profile.into(),
        }
    }

    fn invocation(&self) -> Invocation {
        Invocation::new("minikube").args(["-p", self.profile.as_str()])
    }

    /// Current profile state.
    ///
    /// minikube exits non-zero for anything but a running cluster, so the
    /// exit code alone is not used; the JSON body decides.
    ///
    /// # Errors
    ///
    /// Returns an error if minikube cannot be run or its output is unrecognised.
    pub fn status(&self) -> Result<ClusterStatus> {
        let output = self
            .runner
            .run(&self.invocation().args(["status", "-o", "json"]))?;

        match serde_json::from_str::<Value>(output.stdout.trim()) {
            Ok(Value::Array(nodes)) => {
                // Multi-node profiles report one entry per node; the first is the control plane.
                let first = nodes
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::parse("minikube status", "empty node list"))?;
                let status: ProfileStatus =
                    serde_json::from_value(first).map_err(|e| Error::parse("minikube status", e))?;
                Ok(status.classify())
            }
            Ok(value @ Value::Object(_)) => {
                let status: ProfileStatus =
                    serde_json::from_value(value).map_err(|e| Error::parse("minikube status", e))?;
                Ok(status.classify())
            }
            _ => {
                let text = format!("{}{}", output.stdout, output.stderr).to_lowercase();
                if text.contains("not found") || output.code == Some(85) {
                    Ok(ClusterStatus::Absent)
                } else {
                    Err(Error::parse("minikube status", output.stderr.trim()))
                }
            }
        }
    }

    /// `minikube start` with the configured resources.
    ///
    /// # Errors
    ///
    /// Returns the command error if the cluster fails to start.
    pub fn start(&self, cluster: &ClusterConfig) -> Result<()> {
        let mut inv = self.invocation().args([
            "start".to_string(),
            format!("--driver={}", cluster.driver),
            format!("--cpus={}", cluster.cpus),
            format!("--memory={}", cluster.memory_mb),
            format!("--disk-size={}", cluster.disk_size),
        ]);
        if !cluster.kubernetes_version.is_empty() {
            inv = inv.arg(format!("--kubernetes-version={}", cluster.kubernetes_version));
        }
        self.runner.run_ok(&inv)?;
        Ok(())
    }

    /// `minikube delete` for this profile. Succeeds when the profile is absent.
    ///
    /// # Errors
    ///
    /// Returns the command error if deletion fails.
    pub fn delete(&self) -> Result<()> {
        self.runner.run_ok(&self.invocation().arg("delete"))?;
        Ok(())
    }

    /// Names of enabled add-ons.
    ///
    /// # Errors
    ///
    /// Returns an error if the add-on list cannot be read.
    pub fn enabled_addons(&self) -> Result<BTreeSet<String>> {
        let stdout = self
            .runner
            .run_ok(&self.invocation().args(["addons", "list", "-o", "json"]))?;
        let addons: BTreeMap<String, AddonState> = parse_json("minikube addon list", &stdout)?;
        Ok(addons
            .into_iter()
            .filter(|(_, state)| state.status == "enabled")
            .map(|(name, _)| name)
            .collect())
    }

    /// `minikube addons enable <name>`.
    ///
    /// # Errors
    ///
    /// Returns the command error if the add-on cannot be enabled.
    pub fn enable_addon(&self, name: &str) -> Result<()> {
        self.runner
            .run_ok(&self.invocation().args(["addons", "enable", name]))?;
        Ok(())
    }

    /// Copy a local image into the cluster's image store.
    ///
    /// # Errors
    ///
    /// Returns the command error if the load fails.
    pub fn image_load(&self, reference: &str) -> Result<()> {
        self.runner
            .run_ok(&self.invocation().args(["image", "load", reference]))?;
        Ok(())
    }
}
