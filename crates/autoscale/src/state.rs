//! Deploy state persistence.
//!
//! Records what the last run did so `status` can report it. The cluster stays
//! the source of truth; this file is informational and safe to delete.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autoscaling::AutoscalingMode;
use crate::error::{Error, Result};
use crate::release::ReleaseAction;

/// Bring-up steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    /// Not yet started.
    NotStarted,
    /// Checking tools and host resources.
    ValidatingPrerequisites,
    /// Creating or reusing the minikube profile.
    ProvisioningCluster,
    /// Enabling minikube add-ons.
    EnablingAddons,
    /// Installing the VPA CRDs and controllers.
    InstallingVpa,
    /// Building and loading the service image.
    BuildingImage,
    /// Deploying kube-prometheus-stack.
    DeployingMonitoring,
    /// Deploying the application chart.
    DeployingApp,
    /// Waiting for pods to become ready.
    WaitingReady,
    /// Starting port-forwards.
    ForwardingPorts,
    /// Bring-up complete.
    Complete,
}

impl DeployStep {
    /// Get the next step in the sequence.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::NotStarted => Self::ValidatingPrerequisites,
            Self::ValidatingPrerequisites => Self::ProvisioningCluster,
            Self::ProvisioningCluster => Self::EnablingAddons,
            Self::EnablingAddons => Self::InstallingVpa,
            Self::InstallingVpa => Self::BuildingImage,
            Self::BuildingImage => Self::DeployingMonitoring,
            Self::DeployingMonitoring => Self::DeployingApp,
            Self::DeployingApp => Self::WaitingReady,
            Self::WaitingReady => Self::ForwardingPorts,
            Self::ForwardingPorts | Self::Complete => Self::Complete,
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::ValidatingPrerequisites => "Validating prerequisites",
            Self::ProvisioningCluster => "Provisioning minikube cluster",
            Self::EnablingAddons => "Enabling add-ons",
            Self::InstallingVpa => "Installing Vertical Pod Autoscaler",
            Self::BuildingImage => "Building and loading image",
            Self::DeployingMonitoring => "Deploying Prometheus and Grafana",
            Self::DeployingApp => "Deploying prediction API",
            Self::WaitingReady => "Waiting for pods to be ready",
            Self::ForwardingPorts => "Forwarding ports",
            Self::Complete => "Complete",
        }
    }

    /// Get the step number for progress display.
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::ValidatingPrerequisites => 1,
            Self::ProvisioningCluster => 2,
            Self::EnablingAddons => 3,
            Self::InstallingVpa => 4,
            Self::BuildingImage => 5,
            Self::DeployingMonitoring => 6,
            Self::DeployingApp => 7,
            Self::WaitingReady => 8,
            Self::ForwardingPorts => 9,
            Self::Complete => 10,
        }
    }

    /// Total number of steps.
    pub const TOTAL_STEPS: u8 = 10;
}

impl std::fmt::Display for DeployStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A release the tool applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRelease {
    pub name: String,
    pub namespace: String,
    pub action: String,
    pub applied_at: DateTime<Utc>,
}

/// Persisted record of the last deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployState {
    pub profile: String,
    /// Last completed bring-up step.
    pub step: DeployStep,
    /// Image reference loaded into the cluster.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub releases: Vec<RecordedRelease>,
    #[serde(default)]
    pub mode: Option<AutoscalingMode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    path: PathBuf,
}

impl DeployState {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            profile: profile.into(),
            step: DeployStep::NotStarted,
            image: None,
            releases: Vec::new(),
            mode: None,
            created_at: now,
            updated_at: now,
            path: path.into(),
        }
    }

    /// Load state from file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let mut state: Self = serde_json::from_str(&content)
            .map_err(|e| Error::parse(format!("state file {}", path.display()), e))?;
        state.path = path.to_path_buf();

        debug!(step = %state.step, mode = ?state.mode, "Loaded deploy state");
        Ok(Some(state))
    }

    /// Load existing state for `profile`, or start a fresh record.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed.
    pub fn load_or_new(path: &Path, profile: &str) -> Result<Self> {
        Ok(Self::load(path)?
            .filter(|s| s.profile == profile)
            .unwrap_or_else(|| Self::new(path, profile)))
    }

    /// Save state to file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = Utc::now();

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::parse("deploy state", e))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Remove the state file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(path: &Path) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "Cleared deploy state");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a step complete and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn complete_step(&mut self, step: DeployStep) -> Result<()> {
        debug!("Step: {} -> {}", self.step, step);
        self.step = step;
        self.save()
    }

    /// Record an applied release, replacing an earlier entry with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn record_release(&mut self, name: &str, namespace: &str, action: ReleaseAction) -> Result<()> {
        self.releases
            .retain(|r| !(r.name == name && r.namespace == namespace));
        self.releases.push(RecordedRelease {
            name: name.to_string(),
            namespace: namespace.to_string(),
            action: action.to_string(),
            applied_at: Utc::now(),
        });
        self.save()
    }

    /// Record the active autoscaling mode.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn set_mode(&mut self, mode: AutoscalingMode) -> Result<()> {
        self.mode = Some(mode);
        self.save()
    }

    /// Record the image loaded into the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn set_image(&mut self, reference: String) -> Result<()> {
        self.image = Some(reference);
        self.save()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.step == DeployStep::Complete
    }
}
