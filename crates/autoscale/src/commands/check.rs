//! Check command - preflight only.

use anyhow::Result;
use clap::Args;

use crate::config::DeployConfig;
use crate::preflight::Preflight;
use crate::runner::SystemRunner;
use crate::ui;

/// Verify local prerequisites without changing anything.
#[derive(Args)]
pub struct CheckCommand {}

impl CheckCommand {
    /// # Errors
    ///
    /// Returns an error if a critical prerequisite is missing.
    pub async fn run(&self, config: &DeployConfig) -> Result<()> {
        ui::print_section("Checking prerequisites");
        Preflight::new(&SystemRunner, config.min_memory_gb).validate()?;
        Ok(())
    }
}
