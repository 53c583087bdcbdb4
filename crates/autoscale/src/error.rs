//! Error and step-outcome types shared by every orchestration stage.
//!
//! Shell-style `|| true` suppression is expressed here as data: every error
//! carries a [`Severity`], and stages that are allowed to fail report a
//! [`StepOutcome`] instead of aborting the run.

use std::fmt;

use thiserror::Error;

/// Errors raised while invoking an external CLI.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The process could not be started at all.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully.
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "signal".to_string(),
    }
}

impl CommandError {
    /// Captured stderr for a failed command (empty for spawn errors).
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Spawn { .. } => "",
            Self::Failed { stderr, .. } => stderr,
        }
    }

    /// Whether the failure is the CLI reporting an absent object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        let stderr = self.stderr().to_lowercase();
        stderr.contains("not found") || stderr.contains("notfound")
    }

    /// Whether the CLI gave up waiting for a resource (`--wait`, `rollout status`).
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        let stderr = self.stderr().to_lowercase();
        stderr.contains("context deadline exceeded") || stderr.contains("timed out waiting")
    }
}

/// Library error type.
#[derive(Error, Debug)]
pub enum Error {
    /// External command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// One or more critical prerequisites are missing.
    #[error("prerequisites not met: {}", .0.join(", "))]
    Preflight(Vec<String>),

    /// The cluster API did not answer.
    #[error("cluster `{profile}` is not reachable: {reason}")]
    ClusterUnreachable { profile: String, reason: String },

    /// A bounded wait ran out of time.
    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    /// CLI output could not be decoded.
    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request to the forwarded API failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Build a parse error from any displayable cause.
    pub fn parse(what: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// How the orchestrator should treat this error.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Timeout { .. } => Severity::NonFatal,
            Self::Command(e) if e.is_not_found() => Severity::NonFatal,
            _ => Severity::Fatal,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether a failure stops the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the sequence immediately.
    Fatal,
    /// Log a warning and continue.
    NonFatal,
}

/// Result of a single orchestration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step changed something.
    Done,
    /// Nothing to do; the desired state was already present.
    Skipped(String),
    /// The step failed in a tolerated way.
    Warned(String),
}

impl StepOutcome {
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warned(_))
    }

    /// Fold a best-effort result into an outcome, never propagating the error.
    pub fn tolerate<T>(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self::Done,
            Err(e) => Self::Warned(e.to_string()),
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Skipped(reason) => write!(f, "skipped ({reason})"),
            Self::Warned(msg) => write!(f, "warning: {msg}"),
        }
    }
}

/// Named step outcome.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: String,
    pub outcome: StepOutcome,
}

/// Ordered outcomes of a multi-step run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn record(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        self.steps.push(StepReport {
            step: step.into(),
            outcome,
        });
    }

    /// Steps that ended in a tolerated failure.
    pub fn warnings(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.outcome.is_warning())
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }

    #[must_use]
    pub fn outcome_of(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }
}
