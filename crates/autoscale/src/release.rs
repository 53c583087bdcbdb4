//! Helm release management with install-vs-upgrade detection.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result, StepOutcome};
use crate::runner::{CommandRunner, Invocation};
use crate::tools::Helm;

/// Desired state of one Helm release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    /// Chart path or `repo/chart` reference.
    pub chart: String,
    pub version: Option<String>,
    /// `--set` overrides, applied in key order.
    pub values: BTreeMap<String, String>,
    pub values_files: Vec<PathBuf>,
    /// Keep values from the previous revision on upgrade.
    pub reuse_values: bool,
    /// Pass `--wait` with this timeout.
    pub wait: Option<Duration>,
}

impl Release {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            chart: chart.into(),
            version: None,
            values: BTreeMap::new(),
            values_files: Vec::new(),
            reuse_values: false,
            wait: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_values<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.values.extend(values);
        self
    }

    #[must_use]
    pub fn with_values_files<I>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.values_files.extend(files);
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn reusing_values(mut self) -> Self {
        self.reuse_values = true;
        self
    }

    #[must_use]
    pub fn waiting(mut self, timeout: Duration) -> Self {
        self.wait = Some(timeout);
        self
    }

    /// Append the shared install/upgrade flags to a helm invocation.
    pub(crate) fn append_options(&self, mut inv: Invocation, upgrade: bool) -> Invocation {
        if let Some(version) = &self.version {
            inv = inv.args(["--version", version.as_str()]);
        }
        if upgrade && self.reuse_values {
            inv = inv.arg("--reuse-values");
        }
        for file in &self.values_files {
            inv = inv.arg("-f").arg(file.display().to_string());
        }
        for (key, value) in &self.values {
            inv = inv.arg("--set").arg(format!("{key}={value}"));
        }
        if let Some(timeout) = self.wait {
            inv = inv
                .arg("--wait")
                .arg(format!("--timeout={}s", timeout.as_secs()));
        }
        inv
    }
}

/// What `apply_release` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    Installed,
    Upgraded,
}

impl fmt::Display for ReleaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Upgraded => write!(f, "upgraded"),
        }
    }
}

/// Installs, upgrades and removes releases.
pub struct ReleaseManager<'a> {
    helm: Helm<'a>,
}

impl<'a> ReleaseManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, kube_context: Option<String>) -> Self {
        Self {
            helm: Helm::new(runner, kube_context),
        }
    }

    /// Whether a release with this name exists in the namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the release list cannot be read.
    pub fn exists(&self, name: &str, namespace: &str) -> Result<bool> {
        Ok(self.helm.list(namespace)?.iter().any(|r| r.name == name))
    }

    /// Converge a release to the desired state: upgrade if present, install otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the list, install or upgrade fails. When the release
    /// waits, Helm giving up on readiness is reported as [`Error::Timeout`].
    pub fn apply_release(&self, release: &Release) -> Result<ReleaseAction> {
        let (action, applied) = if self.exists(&release.name, &release.namespace)? {
            info!(release = %release.name, namespace = %release.namespace, "Upgrading release");
            (ReleaseAction::Upgraded, self.helm.upgrade(release))
        } else {
            info!(release = %release.name, namespace = %release.namespace, "Installing release");
            (ReleaseAction::Installed, self.helm.install(release))
        };

        match (applied, release.wait) {
            (Ok(()), _) => Ok(action),
            (Err(Error::Command(e)), Some(wait)) if e.is_deadline() => Err(Error::Timeout {
                what: format!("release {}/{} to become ready", release.namespace, release.name),
                secs: wait.as_secs(),
            }),
            (Err(e), _) => Err(e),
        }
    }

    /// Add a chart repository if it is not configured, then refresh its index.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be added or updated.
    pub fn ensure_repo(&self, name: &str, url: &str) -> Result<StepOutcome> {
        let outcome = if self.helm.repos()?.iter().any(|r| r == name) {
            StepOutcome::Skipped(format!("repository {name} already configured"))
        } else {
            info!(repo = name, url, "Adding chart repository");
            self.helm.repo_add(name, url)?;
            StepOutcome::Done
        };
        self.helm.repo_update(name)?;
        Ok(outcome)
    }

    /// Remove a release; an absent release is `Skipped`, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than the release being absent.
    pub fn uninstall(&self, name: &str, namespace: &str) -> Result<StepOutcome> {
        match self.helm.uninstall(name, namespace) {
            Ok(()) => Ok(StepOutcome::Done),
            Err(Error::Command(e)) if e.is_not_found() => {
                Ok(StepOutcome::Skipped(format!("release {name} not found")))
            }
            Err(e) => Err(e),
        }
    }

    /// User-supplied values of a release.
    ///
    /// # Errors
    ///
    /// Returns an error if the values cannot be read.
    pub fn values(&self, name: &str, namespace: &str) -> Result<Value> {
        self.helm.values(name, namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    fn app_release() -> Release {
        Release::new("ml-api", "ml-api", "./helm/ml-api").with_value("autoscaling.mode", "hpa")
    }

    #[test]
    fn test_first_apply_installs_then_upgrades() {
        let fake = FakeCluster::running();
        let manager = ReleaseManager::new(&fake, None);

        assert_eq!(manager.apply_release(&app_release()).unwrap(), ReleaseAction::Installed);
        assert_eq!(manager.apply_release(&app_release()).unwrap(), ReleaseAction::Upgraded);
    }

    #[test]
    fn test_repeated_apply_converges_to_one_release() {
        let fake = FakeCluster::running();
        let manager = ReleaseManager::new(&fake, None);

        for _ in 0..3 {
            manager.apply_release(&app_release()).unwrap();
        }

        assert_eq!(fake.release_count("ml-api", "ml-api"), 1);
        assert_eq!(fake.release_revision("ml-api", "ml-api"), Some(3));
        assert_eq!(
            fake.release_value("ml-api", "ml-api", "autoscaling.mode").as_deref(),
            Some("hpa")
        );
    }

    #[test]
    fn test_wait_deadline_is_timeout() {
        let fake = FakeCluster::running();
        fake.fail_when(&["--wait"], "Error: INSTALLATION FAILED: context deadline exceeded");
        let manager = ReleaseManager::new(&fake, None);

        let release = Release::new("monitoring", "monitoring", "prometheus-community/kube-prometheus-stack")
            .waiting(Duration::from_secs(600));
        let err = manager.apply_release(&release).unwrap_err();
        assert!(matches!(err, Error::Timeout { secs: 600, .. }));
        assert_eq!(err.severity(), crate::error::Severity::NonFatal);
    }

    #[test]
    fn test_deadline_without_wait_stays_command_error() {
        let fake = FakeCluster::running();
        fake.fail_when(&["install"], "Error: INSTALLATION FAILED: context deadline exceeded");
        let manager = ReleaseManager::new(&fake, None);

        let err = manager.apply_release(&app_release()).unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }

    #[test]
    fn test_uninstall_absent_release_is_skipped() {
        let fake = FakeCluster::running();
        let manager = ReleaseManager::new(&fake, None);

        let outcome = manager.uninstall("ml-api", "ml-api").unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
    }

    #[test]
    fn test_ensure_repo_adds_once() {
        let fake = FakeCluster::running();
        let manager = ReleaseManager::new(&fake, None);
        let url = "https://prometheus-community.github.io/helm-charts";

        assert_eq!(
            manager.ensure_repo("prometheus-community", url).unwrap(),
            StepOutcome::Done
        );
        assert!(matches!(
            manager.ensure_repo("prometheus-community", url).unwrap(),
            StepOutcome::Skipped(_)
        ));
    }

    #[test]
    fn test_append_options_order() {
        let release = Release::new("monitoring", "monitoring", "prometheus-community/kube-prometheus-stack")
            .with_version("65.1.0")
            .with_value("grafana.enabled", "true")
            .reusing_values()
            .waiting(Duration::from_secs(600));

        let inv = release.append_options(Invocation::new("helm").arg("upgrade"), true);
        assert_eq!(
            inv.to_string(),
            "helm upgrade --version 65.1.0 --reuse-values --set grafana.enabled=true --wait --timeout=600s"
        );

        let inv = release.append_options(Invocation::new("helm").arg("install"), false);
        assert!(!inv.has_args(&["--reuse-values"]));
    }
}
