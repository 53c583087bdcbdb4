//! Forward command - (re)start port-forwards without redeploying.

use anyhow::{Context, Result};
use clap::Args;

use crate::config::DeployConfig;
use crate::orchestrator::Orchestrator;
use crate::portforward::ForwardSupervisor;
use crate::preflight;
use crate::runner::SystemRunner;
use crate::ui;

/// Forward the API, Grafana and Prometheus to localhost.
#[derive(Args)]
pub struct ForwardCommand {}

impl ForwardCommand {
    /// # Errors
    ///
    /// Returns an error if the cluster is unreachable or no forward could be started.
    pub async fn run(&self, config: &DeployConfig) -> Result<()> {
        let runner = SystemRunner;
        preflight::cluster_reachable(&runner, &config.cluster.profile)?;

        ui::print_section("Port-forwards");
        let orchestrator =
            Orchestrator::new(&runner, config).context("failed to load deploy state")?;
        let mut supervisor = ForwardSupervisor::new(&runner, Some(config.cluster.profile.clone()));
        let report = orchestrator.start_forwards(&mut supervisor);
        for step in report.warnings() {
            ui::print_outcome(&step.step, &step.outcome);
        }

        if supervisor.is_empty() {
            anyhow::bail!("no port-forward could be started");
        }
        super::hold_forwards(&mut supervisor).await;
        Ok(())
    }
}
