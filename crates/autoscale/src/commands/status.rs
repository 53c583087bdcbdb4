//! Status command.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crate::config::DeployConfig;
use crate::error::Error;
use crate::orchestrator::{Orchestrator, StatusReport};
use crate::runner::SystemRunner;
use crate::state::DeployState;
use crate::ui;

/// Show cluster, release, autoscaler and pod status.
#[derive(Args)]
pub struct StatusCommand {}

impl StatusCommand {
    /// # Errors
    ///
    /// Returns an error if status cannot be gathered from a reachable cluster.
    pub async fn run(&self, config: &DeployConfig) -> Result<()> {
        ui::print_section("Status");
        let runner = SystemRunner;
        let orchestrator =
            Orchestrator::new(&runner, config).context("failed to load deploy state")?;

        match orchestrator.status() {
            Ok(report) => print_status(&report),
            Err(e @ Error::ClusterUnreachable { .. }) => {
                ui::print_warning(&e.to_string());
                let recorded = DeployState::load(&config.state_file())?;
                print_recorded(recorded.as_ref());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

fn pods(counts: (usize, usize)) -> String {
    format!("{}/{} ready", counts.1, counts.0)
}

fn print_status(report: &StatusReport) {
    ui::print_kv("Cluster", &report.cluster.to_string());
    ui::print_kv(
        "Mode",
        &report
            .mode
            .map_or_else(|| "not deployed".to_string(), |m| m.to_string()),
    );
    ui::print_kv("API pods", &pods(report.app_pods));
    if let Some((grafana, prometheus)) = report.monitoring_pods {
        ui::print_kv("Grafana pods", &pods(grafana));
        ui::print_kv("Prometheus pods", &pods(prometheus));
    }

    println!();
    println!("{}", "Releases:".bold());
    if report.releases.is_empty() {
        ui::print_list_item(&"none".bright_black().to_string());
    }
    for release in &report.releases {
        ui::print_list_item(&format!(
            "{}/{} rev {} ({}) {}",
            release.namespace, release.name, release.revision, release.status, release.chart
        ));
    }

    println!();
    println!("{}", "Autoscalers:".bold());
    if report.autoscalers.is_empty() {
        ui::print_list_item(&"none".bright_black().to_string());
    }
    for name in &report.autoscalers {
        ui::print_list_item(name);
    }

    if let Some(password) = &report.grafana_password {
        println!();
        println!("{}", "Grafana login:".bold());
        ui::print_kv("user", "admin");
        ui::print_kv("password", password);
    }

    print_recorded(report.recorded.as_ref());
}

fn print_recorded(recorded: Option<&DeployState>) {
    println!();
    println!("{}", "Recorded state:".bold());
    let Some(state) = recorded else {
        ui::print_list_item(&"no deployment recorded".bright_black().to_string());
        return;
    };

    ui::print_kv("Profile", &state.profile);
    ui::print_kv("Last step", &state.step.to_string());
    if let Some(image) = &state.image {
        ui::print_kv("Image", image);
    }
    if let Some(mode) = state.mode {
        ui::print_kv("Mode", &mode.to_string());
    }
    ui::print_kv("Updated", &state.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    for release in &state.releases {
        ui::print_list_item(&format!(
            "{}/{} {} at {}",
            release.namespace,
            release.name,
            release.action,
            release.applied_at.format("%H:%M:%S")
        ));
    }
}
