//! HPA/VPA mode switching for the application release.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DeployConfig;
use crate::error::{Error, Result, RunReport, Severity, StepOutcome};
use crate::provisioner::Provisioner;
use crate::release::{Release, ReleaseAction, ReleaseManager};
use crate::runner::{CommandRunner, Invocation, RunnerExt};
use crate::tools::Kubectl;

/// Chart value that selects the autoscaler.
pub const MODE_VALUE: &str = "autoscaling.mode";

/// Which autoscaler governs the application.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AutoscalingMode {
    /// Horizontal Pod Autoscaler (the chart default).
    #[default]
    Hpa,
    /// Vertical Pod Autoscaler.
    Vpa,
}

impl AutoscalingMode {
    /// Chart value and kubectl short name for this mode.
    #[must_use]
    pub const fn as_value(self) -> &'static str {
        match self {
            Self::Hpa => "hpa",
            Self::Vpa => "vpa",
        }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Hpa => Self::Vpa,
            Self::Vpa => Self::Hpa,
        }
    }
}

impl fmt::Display for AutoscalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hpa => write!(f, "HPA"),
            Self::Vpa => write!(f, "VPA"),
        }
    }
}

impl FromStr for AutoscalingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hpa" => Ok(Self::Hpa),
            "vpa" => Ok(Self::Vpa),
            other => Err(Error::parse("autoscaling mode", format!("unknown mode `{other}`"))),
        }
    }
}

/// Toggles the application between HPA and VPA.
pub struct ModeSwitch<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a DeployConfig,
    kubectl: Kubectl<'a>,
    releases: ReleaseManager<'a>,
}

impl<'a> ModeSwitch<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a DeployConfig) -> Self {
        let context = Some(config.cluster.profile.clone());
        Self {
            runner,
            config,
            kubectl: Kubectl::new(runner, context.clone()),
            releases: ReleaseManager::new(runner, context),
        }
    }

    /// Move the application to `mode`, keeping every other release value.
    ///
    /// # Errors
    ///
    /// Returns an error if the release upgrade or VPA admission setup fails.
    /// A missing deployment or a slow admission rollout only produce warnings.
    pub fn switch_mode(&self, mode: AutoscalingMode) -> Result<RunReport> {
        let app = &self.config.app;
        let release = Release::new(&app.release, &app.namespace, &app.chart)
            .reusing_values()
            .with_value(MODE_VALUE, mode.as_value());
        let (_, report) = self.switch_to(mode, &release)?;
        Ok(report)
    }

    /// Apply `release` as a transition into `mode`.
    ///
    /// For VPA the autoscaler sources are fetched before anything changes.
    /// Replicas are reset to the baseline so the new autoscaler starts from a
    /// known size, then the release is applied. For VPA the admission
    /// controller is refreshed and the pods recreated. Finally any autoscaler
    /// of the other kind is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkout, release apply or VPA admission setup fails.
    pub fn switch_to(
        &self,
        mode: AutoscalingMode,
        release: &Release,
    ) -> Result<(ReleaseAction, RunReport)> {
        let app = &self.config.app;
        let mut report = RunReport::default();
        info!(mode = %mode, release = %release.name, "Switching autoscaling mode");

        if mode == AutoscalingMode::Vpa {
            let fetched = Provisioner::new(self.runner, &self.config.cluster)
                .ensure_vpa_checkout(&self.config.vpa)?;
            report.record("fetch VPA sources", fetched);
        }

        let scaled = self
            .kubectl
            .scale_deployment(&app.deployment, &app.namespace, app.baseline_replicas);
        report.record("reset replicas", tolerate_non_fatal(scaled)?);

        let action = self.releases.apply_release(release)?;
        info!(release = %release.name, %action, "Release updated");
        report.record("apply release", StepOutcome::Done);

        if mode == AutoscalingMode::Vpa {
            self.refresh_vpa_admission(&mut report)?;
        }

        let other = mode.other();
        let removed = self
            .kubectl
            .delete(other.as_value(), &app.autoscaler_name, &app.namespace);
        report.record(
            format!("remove {other} object"),
            StepOutcome::tolerate(removed),
        );

        Ok((action, report))
    }

    /// Mode recorded in the release values; HPA when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the values cannot be read or hold an unknown mode.
    pub fn current_mode(&self) -> Result<AutoscalingMode> {
        let app = &self.config.app;
        let values = self.releases.values(&app.release, &app.namespace)?;
        match values.pointer("/autoscaling/mode").and_then(|v| v.as_str()) {
            Some(raw) => raw.parse(),
            None => Ok(AutoscalingMode::Hpa),
        }
    }

    fn refresh_vpa_admission(&self, report: &mut RunReport) -> Result<()> {
        let vpa = &self.config.vpa;
        let app = &self.config.app;

        let gencerts = vpa.vpa_dir().join("pkg/admission-controller/gencerts.sh");
        self.runner.run_ok(
            &Invocation::new("bash")
                .arg(gencerts.display().to_string())
                .current_dir(vpa.vpa_dir()),
        )?;
        report.record("regenerate admission certificates", StepOutcome::Done);

        self.kubectl
            .rollout_restart(&vpa.admission_deployment, &vpa.admission_namespace)?;
        let rollout = self.kubectl.rollout_status(
            &vpa.admission_deployment,
            &vpa.admission_namespace,
            self.config.timeouts.admission_rollout(),
        );
        report.record("restart admission controller", tolerate_non_fatal(rollout)?);

        // Existing pods keep their old requests until recreated.
        let deleted = self.kubectl.delete_pods(&app.selector, &app.namespace);
        report.record("recreate application pods", StepOutcome::tolerate(deleted));
        Ok(())
    }
}

/// Downgrade non-fatal errors to a warning outcome; propagate fatal ones.
fn tolerate_non_fatal(result: Result<()>) -> Result<StepOutcome> {
    match result {
        Ok(()) => Ok(StepOutcome::Done),
        Err(e) if e.severity() == Severity::NonFatal => {
            warn!(error = %e, "Continuing after non-fatal error");
            Ok(StepOutcome::Warned(e.to_string()))
        }
        Err(e) => Err(e),
    }
}
