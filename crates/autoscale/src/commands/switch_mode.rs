//! Switch-mode command.

use anyhow::{Context, Result};
use clap::Args;

use crate::autoscaling::AutoscalingMode;
use crate::config::DeployConfig;
use crate::orchestrator::Orchestrator;
use crate::runner::SystemRunner;
use crate::ui;

/// Switch the running API between HPA and VPA.
#[derive(Args)]
pub struct SwitchModeCommand {
    /// Target autoscaling mode.
    #[arg(value_enum)]
    mode: AutoscalingMode,
}

impl SwitchModeCommand {
    /// # Errors
    ///
    /// Returns an error if the cluster is unreachable or the upgrade fails.
    pub async fn run(&self, config: &DeployConfig) -> Result<()> {
        ui::print_section(&format!("Switching to {}", self.mode));

        let runner = SystemRunner;
        let mut orchestrator =
            Orchestrator::new(&runner, config).context("failed to load deploy state")?;
        let report = orchestrator
            .switch_mode(self.mode)
            .with_context(|| format!("failed to switch to {}", self.mode))?;
        ui::print_report(&report);

        println!();
        ui::print_success(&format!("Autoscaling mode is now {}", self.mode));
        Ok(())
    }
}
