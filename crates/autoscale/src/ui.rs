//! UI helpers for the autoscale CLI.
//!
//! Provides consistent formatting for console output during bring-up and teardown.

use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{RunReport, StepOutcome};

/// Print the banner.
pub fn print_banner() {
    println!();
    println!("  {}", "autoscale".cyan().bold());
    println!("  {}", "ML prediction API on minikube, HPA and VPA".bright_black());
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a step indicator with message.
pub fn print_step(message: &str) {
    println!("{} {}", "▶".cyan(), message.bold());
}

/// Print a progress step with step number.
pub fn print_progress_step(current: u8, total: u8, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print prerequisite check result.
pub fn print_check_result(name: &str, passed: bool, message: Option<&str>) {
    let status = if passed { "✓".green() } else { "✗".red() };

    let text = if let Some(msg) = message {
        format!("{name} - {msg}")
    } else {
        name.to_string()
    };

    println!("  {status} {text}");
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print a list item.
pub fn print_list_item(item: &str) {
    println!("  {} {item}", "•".bright_black());
}

/// One line for a step outcome.
pub fn print_outcome(step: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Done => println!("  {} {step}", "✓".green()),
        StepOutcome::Skipped(reason) => println!(
            "  {} {step} {}",
            "↷".bright_black(),
            format!("({reason})").bright_black()
        ),
        StepOutcome::Warned(msg) => println!("  {} {step}: {}", "⚠".yellow(), msg.yellow()),
    }
}

/// Print every step of a report.
pub fn print_report(report: &RunReport) {
    for step in &report.steps {
        print_outcome(&step.step, &step.outcome);
    }
}

/// Spinner for a long wait; call `finish_and_clear` when done.
#[must_use]
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
