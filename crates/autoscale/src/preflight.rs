//! Prerequisite checks run before anything is mutated.

use colored::Colorize;
use sysinfo::System;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::runner::{CommandRunner, Invocation, RunnerExt};
use crate::tools::{Docker, Kubectl};
use crate::ui;

type Check = Box<dyn Fn(&dyn CommandRunner) -> std::result::Result<Option<String>, String>>;

struct Requirement {
    name: String,
    check: Check,
    install_instructions: String,
    critical: bool,
}

impl Requirement {
    /// A requirement satisfied when `program args...` exits successfully.
    fn tool(name: &str, program: &'static str, args: &'static [&'static str], hint: &str) -> Self {
        Self {
            name: name.to_string(),
            check: Box::new(move |runner| {
                let inv = Invocation::new(program).args(args.iter().copied());
                match runner.run_ok(&inv) {
                    Ok(_) => Ok(which::which(program)
                        .ok()
                        .map(|path| path.display().to_string())),
                    Err(e) => Err(e.to_string()),
                }
            }),
            install_instructions: hint.to_string(),
            critical: true,
        }
    }

    #[must_use]
    fn optional(mut self) -> Self {
        self.critical = false;
        self
    }
}

/// Outcome of one requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub critical: bool,
    pub detail: Option<String>,
}

/// Validates tools and host resources for the local cluster.
pub struct Preflight<'a> {
    runner: &'a dyn CommandRunner,
    requirements: Vec<Requirement>,
}

impl<'a> Preflight<'a> {
    pub fn new(runner: &'a dyn CommandRunner, min_memory_gb: u64) -> Self {
        let requirements = vec![
            Requirement::tool(
                "Docker",
                "docker",
                &["--version"],
                "Install Docker from https://docs.docker.com/get-docker/",
            ),
            Requirement {
                name: "Docker daemon".to_string(),
                check: Box::new(|runner| {
                    if Docker::new(runner).daemon_ready() {
                        Ok(None)
                    } else {
                        Err("`docker info` failed".to_string())
                    }
                }),
                install_instructions: "Start Docker Desktop or the docker service".to_string(),
                critical: true,
            },
            Requirement::tool(
                "kubectl",
                "kubectl",
                &["version", "--client"],
                "Install kubectl from https://kubernetes.io/docs/tasks/tools/",
            ),
            Requirement::tool(
                "Helm",
                "helm",
                &["version", "--short"],
                "Install Helm from https://helm.sh/docs/intro/install/",
            ),
            Requirement::tool(
                "minikube",
                "minikube",
                &["version", "--short"],
                "Install minikube from https://minikube.sigs.k8s.io/docs/start/",
            ),
            Requirement::tool(
                "git",
                "git",
                &["--version"],
                "Install git to fetch the VPA sources (only needed for VPA mode)",
            )
            .optional(),
            Requirement {
                name: "System Memory".to_string(),
                check: Box::new(move |_| {
                    let mut sys = System::new();
                    sys.refresh_memory();
                    let total_gb = sys.total_memory() / 1024 / 1024 / 1024;
                    if total_gb >= min_memory_gb {
                        Ok(Some(format!("{total_gb} GiB")))
                    } else {
                        Err(format!("{total_gb} GiB available"))
                    }
                }),
                install_instructions: format!(
                    "At least {min_memory_gb}GB of RAM required for the cluster and monitoring stack"
                ),
                critical: true,
            },
        ];

        Self {
            runner,
            requirements,
        }
    }

    /// Run every check without printing.
    #[must_use]
    pub fn run_checks(&self) -> Vec<CheckResult> {
        self.requirements
            .iter()
            .map(|req| {
                let outcome = (req.check)(self.runner);
                debug!(requirement = %req.name, ?outcome, "Checked prerequisite");
                let (passed, detail) = match outcome {
                    Ok(detail) => (true, detail),
                    Err(reason) => (false, Some(reason)),
                };
                CheckResult {
                    name: req.name.clone(),
                    passed,
                    critical: req.critical,
                    detail,
                }
            })
            .collect()
    }

    /// Run every check and print the results as a check list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Preflight`] naming every failed critical requirement.
    pub fn validate(&self) -> Result<Vec<CheckResult>> {
        println!();
        let results = self.run_checks();
        for result in &results {
            let detail = result.detail.as_deref().filter(|_| result.passed);
            ui::print_check_result(&result.name, result.passed, detail);
        }
        println!();

        let failures: Vec<(&CheckResult, &Requirement)> = results
            .iter()
            .zip(&self.requirements)
            .filter(|(r, _)| !r.passed)
            .collect();

        if failures.is_empty() {
            ui::print_success("All prerequisites met!");
            return Ok(results);
        }

        ui::print_warning("Some prerequisites are not met:");
        println!();
        for (result, req) in &failures {
            if req.critical {
                println!(
                    "  {} {} - {}",
                    "✗".red(),
                    result.name.red(),
                    req.install_instructions.bright_black()
                );
            } else {
                warn!(requirement = %result.name, "Optional prerequisite missing");
                println!(
                    "  {} {} - {}",
                    "⚠".yellow(),
                    result.name.yellow(),
                    req.install_instructions.bright_black()
                );
            }
        }
        println!();

        let critical: Vec<String> = failures
            .iter()
            .filter(|(_, req)| req.critical)
            .map(|(result, _)| result.name.clone())
            .collect();
        if critical.is_empty() {
            Ok(results)
        } else {
            Err(Error::Preflight(critical))
        }
    }
}

/// Fail unless the cluster API of `profile` answers.
///
/// # Errors
///
/// Returns [`Error::ClusterUnreachable`] when `kubectl cluster-info` fails.
pub fn cluster_reachable(runner: &dyn CommandRunner, profile: &str) -> Result<()> {
    Kubectl::new(runner, Some(profile.to_string()))
        .cluster_info()
        .map_err(|e| Error::ClusterUnreachable {
            profile: profile.to_string(),
            reason: match e {
                Error::Command(cmd) if !cmd.stderr().is_empty() => cmd.stderr().to_string(),
                other => other.to_string(),
            },
        })
}
