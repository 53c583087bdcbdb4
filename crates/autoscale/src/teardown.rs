//! Best-effort reversal of everything `up` creates.

use tracing::{info, warn};

use crate::config::DeployConfig;
use crate::error::{Result, RunReport, StepOutcome};
use crate::portforward::ForwardSupervisor;
use crate::release::ReleaseManager;
use crate::runner::CommandRunner;
use crate::state::DeployState;
use crate::tools::{ClusterStatus, Docker, Kubectl, Minikube};

/// Flatten a step that already reports its own outcome.
fn best_effort(result: Result<StepOutcome>) -> StepOutcome {
    result.unwrap_or_else(|e| StepOutcome::Warned(e.to_string()))
}

pub struct Teardown<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a DeployConfig,
}

impl<'a> Teardown<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a DeployConfig) -> Self {
        Self { runner, config }
    }

    /// Run every teardown step in reverse bring-up order.
    ///
    /// No step aborts the run; failures become warnings in the report.
    pub fn run(&self, supervisor: &mut ForwardSupervisor<'_>) -> RunReport {
        let config = self.config;
        let context = Some(config.cluster.profile.clone());
        let minikube = Minikube::new(self.runner, &config.cluster.profile);
        let kubectl = Kubectl::new(self.runner, context.clone());
        let releases = ReleaseManager::new(self.runner, context);
        let docker = Docker::new(self.runner);
        let mut report = RunReport::default();

        let stopped = supervisor.stop_all();
        let swept = config
            .forwards
            .iter()
            .filter(|f| supervisor.sweep(f.local_port))
            .count();
        report.record(
            "stop port-forwards",
            if stopped + swept == 0 {
                StepOutcome::Skipped("no port-forwards running".into())
            } else {
                StepOutcome::Done
            },
        );

        let cluster_present = match minikube.status() {
            Ok(status) => status != ClusterStatus::Absent,
            Err(e) => {
                warn!(error = %e, "Could not read cluster status; attempting in-cluster cleanup anyway");
                true
            }
        };

        if cluster_present {
            report.record(
                format!("uninstall {}", config.app.release),
                best_effort(releases.uninstall(&config.app.release, &config.app.namespace)),
            );
            if config.monitoring.enabled {
                report.record(
                    format!("uninstall {}", config.monitoring.release),
                    best_effort(
                        releases.uninstall(&config.monitoring.release, &config.monitoring.namespace),
                    ),
                );
            }
            for namespace in config.owned_namespaces() {
                report.record(
                    format!("delete namespace {namespace}"),
                    StepOutcome::tolerate(kubectl.delete_namespace(&namespace)),
                );
            }
            report.record("delete cluster", StepOutcome::tolerate(minikube.delete()));
        } else {
            let reason = format!("profile {} absent", config.cluster.profile);
            report.record("uninstall releases", StepOutcome::Skipped(reason.clone()));
            report.record("delete namespaces", StepOutcome::Skipped(reason.clone()));
            report.record("delete cluster", StepOutcome::Skipped(reason));
        }

        report.record(
            "remove image",
            StepOutcome::tolerate(docker.remove_image(&config.image.reference())),
        );
        report.record("prune images", StepOutcome::tolerate(docker.prune_dangling()));
        report.record(
            "clear state",
            match DeployState::clear(&config.state_file()) {
                Ok(true) => StepOutcome::Done,
                Ok(false) => StepOutcome::Skipped("no state file".into()),
                Err(e) => StepOutcome::Warned(e.to_string()),
            },
        );

        for step in report.warnings() {
            warn!(step = %step.step, outcome = %step.outcome, "Teardown step failed");
        }
        info!(warnings = report.warnings().count(), "Teardown finished");
        report
    }
}
