//! Bring-up, mode switching, status and teardown.
//!
//! Sequences the stages in order, printing progress through [`ui`] and
//! recording each completed step in the deploy state file:
//! - Preflight and cluster provisioning
//! - Image build and Helm releases
//! - Readiness waits and port-forwards

use tracing::{error, info, warn};

use crate::autoscaling::{AutoscalingMode, ModeSwitch, MODE_VALUE};
use crate::config::DeployConfig;
use crate::error::{Error, Result, RunReport, Severity, StepOutcome};
use crate::image;
use crate::portforward::ForwardSupervisor;
use crate::preflight::{self, Preflight};
use crate::provisioner::Provisioner;
use crate::readiness::{Readiness, ReadinessWaiter};
use crate::release::{Release, ReleaseManager};
use crate::runner::CommandRunner;
use crate::state::{DeployState, DeployStep};
use crate::teardown::Teardown;
use crate::tools::{ClusterStatus, Helm, HelmRelease, Kubectl, Minikube};
use crate::ui;

/// Secret key holding the Grafana admin password.
const GRAFANA_PASSWORD_KEY: &str = "admin-password";

/// Options for [`Orchestrator::up`].
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Autoscaling mode to deploy with; the configured default when unset.
    pub mode: Option<AutoscalingMode>,
    /// Reuse the image already loaded in the cluster.
    pub skip_build: bool,
    /// Start port-forwards once workloads are ready.
    pub forward: bool,
}

/// What `up` ended with.
#[derive(Debug)]
pub struct UpSummary {
    pub report: RunReport,
    pub mode: AutoscalingMode,
    pub app: Readiness,
    pub monitoring: Option<Readiness>,
    pub grafana_password: Option<String>,
}

/// Point-in-time view of the deployment.
#[derive(Debug)]
pub struct StatusReport {
    pub cluster: ClusterStatus,
    pub releases: Vec<HelmRelease>,
    pub mode: Option<AutoscalingMode>,
    pub autoscalers: Vec<String>,
    pub app_pods: (usize, usize),
    /// Grafana and Prometheus `(matched, ready)` counts.
    pub monitoring_pods: Option<((usize, usize), (usize, usize))>,
    pub grafana_password: Option<String>,
    pub recorded: Option<DeployState>,
}

/// Coordinates every stage against one configuration.
pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a DeployConfig,
    state: DeployState,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator, loading any recorded state for the profile.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing state file cannot be parsed.
    pub fn new(runner: &'a dyn CommandRunner, config: &'a DeployConfig) -> Result<Self> {
        let state = DeployState::load_or_new(&config.state_file(), &config.cluster.profile)?;
        Ok(Self {
            runner,
            config,
            state,
        })
    }

    fn context(&self) -> Option<String> {
        Some(self.config.cluster.profile.clone())
    }

    fn begin(&self, step: DeployStep) {
        info!(step = ?step, "Executing step");
        ui::print_progress_step(step.step_number(), DeployStep::TOTAL_STEPS, step.description());
    }

    fn finish(&mut self, step: DeployStep, report: &mut RunReport, outcome: StepOutcome) -> Result<()> {
        ui::print_outcome(step.description(), &outcome);
        report.record(step.description(), outcome);
        self.state.complete_step(step)
    }

    /// Chart release for the application in `mode`.
    #[must_use]
    pub fn app_release(&self, mode: AutoscalingMode) -> Release {
        let app = &self.config.app;
        let image = &self.config.image;
        Release::new(&app.release, &app.namespace, &app.chart)
            .with_value("image.repository", &image.repository)
            .with_value("image.tag", &image.tag)
            .with_value("image.pullPolicy", "Never")
            .with_values(app.values.clone())
            .with_values_files(app.values_files.clone())
            .with_value(MODE_VALUE, mode.as_value())
    }

    /// Full bring-up. Timeouts and port-forward failures are warnings; every
    /// other failure stops the run.
    ///
    /// # Errors
    ///
    /// Returns the first fatal step error.
    pub async fn up(
        &mut self,
        options: &UpOptions,
        supervisor: &mut ForwardSupervisor<'_>,
    ) -> Result<UpSummary> {
        let result = self.run_up(options, supervisor).await;
        if let Err(e) = &result {
            error!(step = %self.state.step.next(), error = %e, "Bring-up failed");
            ui::print_error(&format!(
                "Bring-up failed at step '{}': {e}",
                self.state.step.next()
            ));
        }
        result
    }

    async fn run_up(
        &mut self,
        options: &UpOptions,
        supervisor: &mut ForwardSupervisor<'_>,
    ) -> Result<UpSummary> {
        let config = self.config;
        let mode = options.mode.unwrap_or(config.app.default_mode);
        let mut report = RunReport::default();
        let provisioner = Provisioner::new(self.runner, &config.cluster);
        let releases = ReleaseManager::new(self.runner, self.context());

        ui::print_section("Bringing up the autoscaling lab");
        self.state.step = DeployStep::NotStarted;

        self.begin(DeployStep::ValidatingPrerequisites);
        Preflight::new(self.runner, config.min_memory_gb).validate()?;
        self.finish(DeployStep::ValidatingPrerequisites, &mut report, StepOutcome::Done)?;

        self.begin(DeployStep::ProvisioningCluster);
        let outcome = provisioner.ensure_cluster()?;
        self.finish(DeployStep::ProvisioningCluster, &mut report, outcome)?;

        self.begin(DeployStep::EnablingAddons);
        let outcome = provisioner.ensure_addons()?;
        self.finish(DeployStep::EnablingAddons, &mut report, outcome)?;

        self.begin(DeployStep::InstallingVpa);
        let outcome = provisioner.ensure_vpa_crds(&config.vpa)?;
        self.finish(DeployStep::InstallingVpa, &mut report, outcome)?;

        self.begin(DeployStep::BuildingImage);
        let outcome = if options.skip_build {
            StepOutcome::Skipped("--skip-build".into())
        } else {
            let pb = ui::spinner(format!("Building {}", config.image.reference()));
            let built = image::build_and_load(self.runner, &config.cluster.profile, &config.image);
            pb.finish_and_clear();
            self.state.set_image(built?)?;
            StepOutcome::Done
        };
        self.finish(DeployStep::BuildingImage, &mut report, outcome)?;

        self.begin(DeployStep::DeployingMonitoring);
        let outcome = if config.monitoring.enabled {
            let monitoring = &config.monitoring;
            releases.ensure_repo(&monitoring.repo_name, &monitoring.repo_url)?;
            let mut release = Release::new(&monitoring.release, &monitoring.namespace, &monitoring.chart)
                .waiting(config.timeouts.helm());
            if let Some(version) = &monitoring.version {
                release = release.with_version(version);
            }
            match releases.apply_release(&release) {
                Ok(action) => {
                    self.state
                        .record_release(&monitoring.release, &monitoring.namespace, action)?;
                    StepOutcome::Done
                }
                // The release exists but its pods are still starting; the
                // readiness wait below reports on Grafana.
                Err(e) if e.severity() == Severity::NonFatal => {
                    warn!(release = %monitoring.release, error = %e, "Monitoring release not ready");
                    StepOutcome::Warned(e.to_string())
                }
                Err(e) => return Err(e),
            }
        } else {
            StepOutcome::Skipped("monitoring disabled".into())
        };
        self.finish(DeployStep::DeployingMonitoring, &mut report, outcome)?;

        self.begin(DeployStep::DeployingApp);
        let app = &config.app;
        let switch = ModeSwitch::new(self.runner, config);
        let previous = if releases.exists(&app.release, &app.namespace)? {
            Some(switch.current_mode()?)
        } else {
            None
        };
        let outcome = match previous {
            Some(previous) if previous != mode => {
                info!(from = %previous, to = %mode, "Deployed mode differs, switching");
                let (action, switched) = switch.switch_to(mode, &self.app_release(mode))?;
                self.state.record_release(&app.release, &app.namespace, action)?;
                ui::print_report(&switched);
                if switched.has_warnings() {
                    StepOutcome::Warned(format!("switched from {previous} with warnings"))
                } else {
                    StepOutcome::Done
                }
            }
            _ => {
                let action = releases.apply_release(&self.app_release(mode))?;
                self.state.record_release(&app.release, &app.namespace, action)?;
                let other = mode.other();
                if let Err(e) = Kubectl::new(self.runner, self.context()).delete(
                    other.as_value(),
                    &app.autoscaler_name,
                    &app.namespace,
                ) {
                    warn!(kind = other.as_value(), error = %e, "Could not remove stale autoscaler");
                }
                StepOutcome::Done
            }
        };
        self.state.set_mode(mode)?;
        self.finish(DeployStep::DeployingApp, &mut report, outcome)?;

        self.begin(DeployStep::WaitingReady);
        let waiter = ReadinessWaiter::new(self.runner, self.context(), config.timeouts.poll_interval());
        let app_ready = self
            .wait(&waiter, &app.selector, &app.namespace, config.timeouts.app_ready())
            .await;
        let monitoring_ready = if config.monitoring.enabled {
            Some(
                self.wait(
                    &waiter,
                    &config.monitoring.grafana_selector,
                    &config.monitoring.namespace,
                    config.timeouts.monitoring_ready(),
                )
                .await,
            )
        } else {
            None
        };
        let outcome = match (app_ready, monitoring_ready) {
            (Readiness::Ready { .. }, None | Some(Readiness::Ready { .. })) => StepOutcome::Done,
            (app_r, mon_r) => {
                let mut parts = vec![format!("{}: {app_r}", app.release)];
                if let Some(m) = mon_r {
                    parts.push(format!("grafana: {m}"));
                }
                StepOutcome::Warned(format!("not ready in time ({})", parts.join(", ")))
            }
        };
        self.finish(DeployStep::WaitingReady, &mut report, outcome)?;

        self.begin(DeployStep::ForwardingPorts);
        let outcome = if options.forward {
            let forwards = self.start_forwards(supervisor);
            if forwards.has_warnings() {
                StepOutcome::Warned(format!("{} forward(s) failed", forwards.warnings().count()))
            } else {
                StepOutcome::Done
            }
        } else {
            StepOutcome::Skipped("--no-forward".into())
        };
        self.finish(DeployStep::ForwardingPorts, &mut report, outcome)?;

        let grafana_password = if config.monitoring.enabled {
            self.grafana_password()
                .map_err(|e| warn!(error = %e, "Grafana password unavailable"))
                .ok()
        } else {
            None
        };

        self.state.complete_step(DeployStep::Complete)?;
        Ok(UpSummary {
            report,
            mode,
            app: app_ready,
            monitoring: monitoring_ready,
            grafana_password,
        })
    }

    async fn wait(
        &self,
        waiter: &ReadinessWaiter<'_>,
        selector: &str,
        namespace: &str,
        timeout: std::time::Duration,
    ) -> Readiness {
        let pb = ui::spinner(format!("Waiting for {selector} in {namespace}"));
        let readiness = waiter.wait_ready(selector, namespace, timeout).await;
        pb.finish_and_clear();
        if readiness.is_ready() {
            ui::print_success(&format!("{namespace}/{selector}: {readiness}"));
        } else {
            warn!(selector, namespace, %readiness, "Readiness wait timed out");
            ui::print_warning(&format!("{namespace}/{selector}: {readiness} after {}s", timeout.as_secs()));
        }
        readiness
    }

    /// Start every configured forward; failures are recorded, not raised.
    pub fn start_forwards(&self, supervisor: &mut ForwardSupervisor<'_>) -> RunReport {
        let mut report = RunReport::default();
        for target in &self.config.forwards {
            let outcome = match supervisor.start(target) {
                Ok(session) => {
                    ui::print_kv(&target.name, &session.url());
                    StepOutcome::Done
                }
                Err(e) => StepOutcome::Warned(e.to_string()),
            };
            report.record(format!("forward {}", target.name), outcome);
        }
        report
    }

    /// Switch the application between HPA and VPA on a running cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster is unreachable or a fatal switch step fails.
    pub fn switch_mode(&mut self, mode: AutoscalingMode) -> Result<RunReport> {
        preflight::cluster_reachable(self.runner, &self.config.cluster.profile)?;

        let mut report = RunReport::default();
        if mode == AutoscalingMode::Vpa {
            let outcome = Provisioner::new(self.runner, &self.config.cluster)
                .ensure_vpa_crds(&self.config.vpa)?;
            report.record("ensure VPA components", outcome);
        }

        let switched = ModeSwitch::new(self.runner, self.config).switch_mode(mode)?;
        report.steps.extend(switched.steps);
        self.state.set_mode(mode)?;
        Ok(report)
    }

    /// Autoscaling mode recorded in the release values.
    ///
    /// # Errors
    ///
    /// Returns an error if the release values cannot be read.
    pub fn current_mode(&self) -> Result<AutoscalingMode> {
        ModeSwitch::new(self.runner, self.config).current_mode()
    }

    /// Decoded Grafana admin password.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be read or decoded.
    pub fn grafana_password(&self) -> Result<String> {
        let monitoring = &self.config.monitoring;
        Kubectl::new(self.runner, self.context()).secret_value(
            &monitoring.grafana_secret,
            &monitoring.namespace,
            GRAFANA_PASSWORD_KEY,
        )
    }

    /// Gather cluster, release, mode and readiness information.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClusterUnreachable`] if the cluster API does not answer.
    pub fn status(&self) -> Result<StatusReport> {
        let config = self.config;
        let cluster = Minikube::new(self.runner, &config.cluster.profile).status()?;
        if cluster != ClusterStatus::Running {
            return Err(Error::ClusterUnreachable {
                profile: config.cluster.profile.clone(),
                reason: format!("profile is {cluster}"),
            });
        }
        preflight::cluster_reachable(self.runner, &config.cluster.profile)?;

        let helm = Helm::new(self.runner, self.context());
        let kubectl = Kubectl::new(self.runner, self.context());
        let waiter = ReadinessWaiter::new(self.runner, self.context(), config.timeouts.poll_interval());

        let mut releases = helm.list(&config.app.namespace)?;
        if config.monitoring.enabled && config.monitoring.namespace != config.app.namespace {
            releases.extend(helm.list(&config.monitoring.namespace)?);
        }
        let deployed = releases.iter().any(|r| r.name == config.app.release);

        let mode = if deployed { Some(self.current_mode()?) } else { None };
        let mut autoscalers = Vec::new();
        for kind in [AutoscalingMode::Hpa, AutoscalingMode::Vpa] {
            match kubectl.list_names(kind.as_value(), &config.app.namespace) {
                Ok(names) => autoscalers.extend(names),
                Err(e) => warn!(kind = kind.as_value(), error = %e, "Could not list autoscalers"),
            }
        }

        let (monitoring_pods, grafana_password) = if config.monitoring.enabled {
            (
                Some((
                    waiter.snapshot(&config.monitoring.grafana_selector, &config.monitoring.namespace),
                    waiter.snapshot(&config.monitoring.prometheus_selector, &config.monitoring.namespace),
                )),
                self.grafana_password().ok(),
            )
        } else {
            (None, None)
        };

        Ok(StatusReport {
            cluster,
            releases,
            mode,
            autoscalers,
            app_pods: waiter.snapshot(&config.app.selector, &config.app.namespace),
            monitoring_pods,
            grafana_password,
            recorded: DeployState::load(&config.state_file())?,
        })
    }

    /// Tear everything down. Never fails; see the report for warnings.
    pub fn down(&self, supervisor: &mut ForwardSupervisor<'_>) -> RunReport {
        Teardown::new(self.runner, self.config).run(supervisor)
    }

    #[must_use]
    pub fn state(&self) -> &DeployState {
        &self.state
    }
}
