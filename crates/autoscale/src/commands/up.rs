//! Up command - full bring-up of the lab.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crate::autoscaling::AutoscalingMode;
use crate::config::DeployConfig;
use crate::orchestrator::{Orchestrator, UpOptions, UpSummary};
use crate::portforward::ForwardSupervisor;
use crate::runner::SystemRunner;
use crate::ui;

/// Provision the cluster and deploy the API with monitoring.
#[derive(Args)]
pub struct UpCommand {
    /// Autoscaling mode to deploy with (defaults to the configured mode).
    #[arg(long, value_enum)]
    mode: Option<AutoscalingMode>,

    /// Reuse the image already loaded into the cluster.
    #[arg(long)]
    skip_build: bool,

    /// Do not start port-forwards; exit once workloads are deployed.
    #[arg(long)]
    no_forward: bool,
}

impl UpCommand {
    /// Run the bring-up and hold the port-forwards until interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if a fatal step fails.
    pub async fn run(&self, config: &DeployConfig) -> Result<()> {
        ui::print_banner();

        let runner = SystemRunner;
        let mut orchestrator =
            Orchestrator::new(&runner, config).context("failed to load deploy state")?;
        let mut supervisor = ForwardSupervisor::new(&runner, Some(config.cluster.profile.clone()));

        let options = UpOptions {
            mode: self.mode,
            skip_build: self.skip_build,
            forward: !self.no_forward,
        };
        let summary = orchestrator.up(&options, &mut supervisor).await?;
        print_summary(&summary, &supervisor);

        if supervisor.is_empty() {
            return Ok(());
        }
        super::hold_forwards(&mut supervisor).await;
        Ok(())
    }
}

fn print_summary(summary: &UpSummary, supervisor: &ForwardSupervisor<'_>) {
    ui::print_section("Deployment Summary");
    ui::print_kv("Autoscaling", &summary.mode.to_string());
    ui::print_kv("API pods", &summary.app.to_string());
    if let Some(monitoring) = &summary.monitoring {
        ui::print_kv("Grafana", &monitoring.to_string());
    }

    if !supervisor.is_empty() {
        println!();
        println!("{}", "Endpoints:".bold());
        for session in supervisor.sessions() {
            ui::print_list_item(&format!("{:<11} {}", session.target.name, session.url()));
        }
    }

    if let Some(password) = &summary.grafana_password {
        println!();
        println!("{}", "Grafana login:".bold());
        ui::print_kv("user", "admin");
        ui::print_kv("password", password);
    }

    let warnings = summary.report.warnings().count();
    println!();
    if warnings == 0 {
        ui::print_success("Bring-up complete");
    } else {
        ui::print_warning(&format!("Bring-up complete with {warnings} warning(s)"));
        for step in summary.report.warnings() {
            ui::print_list_item(&format!("{}: {}", step.step, step.outcome));
        }
    }
}
