//! Traffic command - drive load at the forwarded API.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use crate::traffic::{RequestResult, TrafficConfig, TrafficGenerator};
use crate::ui;

/// Send prediction requests in a loop, with periodic invalid uploads.
#[derive(Args)]
pub struct TrafficCommand {
    /// Prediction endpoint.
    #[arg(long, default_value = "http://localhost:8001/predict")]
    url: String,

    /// Image to upload.
    #[arg(long, default_value = "images/bus.jpg")]
    image: PathBuf,

    /// File uploaded for intentional errors (a built-in text payload if unset).
    #[arg(long)]
    invalid_file: Option<PathBuf>,

    /// Delay between requests, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Send an invalid upload every N requests (0 disables).
    #[arg(long, default_value_t = 20)]
    error_every: u64,

    /// Stop after N requests.
    #[arg(long)]
    count: Option<u64>,

    /// Per-request timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

impl TrafficCommand {
    /// # Errors
    ///
    /// Returns an error if the payload files cannot be read.
    pub async fn run(&self) -> Result<()> {
        let config = TrafficConfig {
            url: self.url.clone(),
            image: self.image.clone(),
            invalid_file: self.invalid_file.clone(),
            interval: Duration::from_millis(self.interval_ms),
            error_every: self.error_every,
            count: self.count,
            timeout: Duration::from_secs(self.timeout_secs),
        };
        let mut generator = TrafficGenerator::new(config)
            .with_context(|| format!("failed to prepare uploads from {}", self.image.display()))?;

        ui::print_info(&format!("Sending traffic to {} (Ctrl+C to stop)", self.url));
        let stats = generator.run(super::shutdown_signal(), print_result).await;

        println!();
        ui::print_kv("Sent", &stats.sent.to_string());
        ui::print_kv("Succeeded", &stats.succeeded.to_string());
        ui::print_kv("Rejected", &stats.rejected.to_string());
        ui::print_kv("Failed", &stats.failed.to_string());
        Ok(())
    }
}

fn print_result(result: &RequestResult) {
    let elapsed = result.elapsed.as_secs_f64();
    let marker = if result.intentional_error {
        " (invalid upload)".bright_black().to_string()
    } else {
        String::new()
    };

    match (result.status, &result.error) {
        (Some(status), _) => {
            let status = if (200..300).contains(&status) {
                status.to_string().green()
            } else {
                status.to_string().yellow()
            };
            println!("Request #{}: [{status}] took {elapsed:.3}s{marker}", result.number);
        }
        (None, error) => {
            println!(
                "Request #{}: {} {}{marker}",
                result.number,
                "Error occurred:".red(),
                error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
