//! Down command - tear the lab down.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::config::DeployConfig;
use crate::portforward::ForwardSupervisor;
use crate::runner::SystemRunner;
use crate::teardown::Teardown;
use crate::ui;

/// Remove the cluster, releases, image and local state.
#[derive(Args)]
pub struct DownCommand {
    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,
}

impl DownCommand {
    /// Run the teardown. Step failures are reported as warnings.
    ///
    /// # Errors
    ///
    /// Returns an error only if the confirmation prompt fails.
    pub async fn run(&self, config: &DeployConfig) -> Result<()> {
        if !self.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!(
                    "Delete minikube profile '{}' and everything deployed to it?",
                    config.cluster.profile
                ))
                .default(false)
                .interact()?;

            if !proceed {
                println!("{}", "Teardown cancelled.".yellow());
                return Ok(());
            }
        }

        ui::print_section("Tearing down");
        let runner = SystemRunner;
        let mut supervisor = ForwardSupervisor::new(&runner, Some(config.cluster.profile.clone()));
        let report = Teardown::new(&runner, config).run(&mut supervisor);
        ui::print_report(&report);

        println!();
        let warnings = report.warnings().count();
        if warnings == 0 {
            ui::print_success("Teardown complete");
        } else {
            ui::print_warning(&format!(
                "Teardown finished with {warnings} warning(s); re-run `autoscale down` to retry"
            ));
        }
        Ok(())
    }
}
