//! Idempotent local-cluster provisioning: profile, add-ons, VPA CRDs.

use tracing::{info, warn};

use crate::config::{ClusterConfig, VpaConfig};
use crate::error::{Result, StepOutcome};
use crate::runner::{CommandRunner, Invocation, RunnerExt};
use crate::tools::{ClusterStatus, Kubectl, Minikube};

pub struct Provisioner<'a> {
    runner: &'a dyn CommandRunner,
    cluster: &'a ClusterConfig,
    minikube: Minikube<'a>,
    kubectl: Kubectl<'a>,
}

impl<'a> Provisioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cluster: &'a ClusterConfig) -> Self {
        Self {
            runner,
            cluster,
            minikube: Minikube::new(runner, &cluster.profile),
            kubectl: Kubectl::new(runner, Some(cluster.profile.clone())),
        }
    }

    /// Make sure the profile exists and is running.
    ///
    /// A stopped or degraded profile is treated as stale: it is deleted and
    /// recreated rather than resumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the status cannot be read or start/delete fails.
    pub fn ensure_cluster(&self) -> Result<StepOutcome> {
        let status = self.minikube.status()?;
        info!(profile = %self.cluster.profile, %status, "Cluster status");

        match status {
            ClusterStatus::Running => {
                return Ok(StepOutcome::Skipped(format!(
                    "profile {} already running",
                    self.cluster.profile
                )));
            }
            ClusterStatus::Stopped | ClusterStatus::Degraded => {
                warn!(profile = %self.cluster.profile, %status, "Deleting stale cluster");
                self.minikube.delete()?;
            }
            ClusterStatus::Absent => {}
        }

        info!(
            profile = %self.cluster.profile,
            cpus = self.cluster.cpus,
            memory_mb = self.cluster.memory_mb,
            "Starting cluster"
        );
        self.minikube.start(self.cluster)?;
        Ok(StepOutcome::Done)
    }

    /// Enable configured add-ons that are not enabled yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the add-on list cannot be read or an enable fails.
    pub fn ensure_addons(&self) -> Result<StepOutcome> {
        let enabled = self.minikube.enabled_addons()?;
        let missing: Vec<&String> = self
            .cluster
            .addons
            .iter()
            .filter(|a| !enabled.contains(a.as_str()))
            .collect();

        if missing.is_empty() {
            return Ok(StepOutcome::Skipped("all add-ons enabled".into()));
        }
        for addon in missing {
            info!(addon = %addon, "Enabling add-on");
            self.minikube.enable_addon(addon)?;
        }
        Ok(StepOutcome::Done)
    }

    /// Clone the autoscaler sources unless the checkout is already there.
    ///
    /// The install and certificate scripts live in the checkout, so this is
    /// needed whenever VPA is enabled, even on a cluster that already has the CRD.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or the clone fails.
    pub fn ensure_vpa_checkout(&self, vpa: &VpaConfig) -> Result<StepOutcome> {
        if vpa.vpa_dir().exists() {
            return Ok(StepOutcome::Skipped(format!(
                "checkout at {} present",
                vpa.checkout_dir.display()
            )));
        }

        info!(url = %vpa.repo_url, dir = %vpa.checkout_dir.display(), "Fetching autoscaler sources");
        if let Some(parent) = vpa.checkout_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.runner.run_ok(&Invocation::new("git").args([
            "clone".to_string(),
            "--depth".into(),
            "1".into(),
            vpa.repo_url.clone(),
            vpa.checkout_dir.display().to_string(),
        ]))?;
        Ok(StepOutcome::Done)
    }

    /// Install the VPA CRDs and controllers unless the CRD already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the CRD lookup, source checkout or install script fails.
    pub fn ensure_vpa_crds(&self, vpa: &VpaConfig) -> Result<StepOutcome> {
        if self.kubectl.exists("crd", &vpa.crd, None)? {
            return Ok(StepOutcome::Skipped(format!("{} present", vpa.crd)));
        }

        self.ensure_vpa_checkout(vpa)?;
        let vpa_dir = vpa.vpa_dir();
        info!(dir = %vpa_dir.display(), "Installing VPA components");
        self.runner.run_ok(
            &Invocation::new("bash")
                .arg(vpa_dir.join("hack/vpa-up.sh").display().to_string())
                .current_dir(&vpa_dir),
        )?;
        Ok(StepOutcome::Done)
    }
}
