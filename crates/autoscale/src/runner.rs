//! External command execution.
//!
//! Every CLI the tool drives (`minikube`, `helm`, `kubectl`, `docker`, `git`)
//! goes through [`CommandRunner`], so the orchestration logic can be exercised
//! against fakes without a cluster.

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::error::CommandError;

/// A fully described command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// True when `needle` appears as a contiguous run of arguments.
    #[must_use]
    pub fn has_args(&self, needle: &[&str]) -> bool {
        needle.is_empty()
            || self
                .args
                .windows(needle.len())
                .any(|w| w.iter().zip(needle).all(|(a, b)| a == b))
    }

    /// Value following `flag`, e.g. `-n` -> namespace.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Handle to a long-running background process (e.g. a port-forward).
pub trait Tunnel: Send {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Whether the process is still running.
    fn is_alive(&mut self) -> bool;

    /// Terminate the process and reap it.
    fn terminate(&mut self);
}

/// Runs external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an error
    /// at this level; only failing to start the process is.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError>;

    /// Start a background process that outlives this call.
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn Tunnel>, CommandError>;
}

/// Convenience helpers layered over any [`CommandRunner`].
pub trait RunnerExt {
    /// Run and fail unless the command exits successfully; returns stdout.
    fn run_ok(&self, invocation: &Invocation) -> Result<String, CommandError>;

    /// Run and report only whether the command succeeded.
    fn succeeds(&self, invocation: &Invocation) -> bool;
}

impl<R: CommandRunner + ?Sized> RunnerExt for R {
    fn run_ok(&self, invocation: &Invocation) -> Result<String, CommandError> {
        let output = self.run(invocation)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(CommandError::Failed {
                command: invocation.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn succeeds(&self, invocation: &Invocation) -> bool {
        self.run(invocation).is_ok_and(|o| o.success())
    }
}

/// Runner backed by real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        debug!(command = %invocation, "Running");

        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn Tunnel>, CommandError> {
        debug!(command = %invocation, "Spawning background process");

        let child = invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        Ok(Box::new(ChildTunnel { child: Some(child) }))
    }
}

/// A supervised child process; killed when dropped.
struct ChildTunnel {
    child: Option<Child>,
}

impl Tunnel for ChildTunnel {
    fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ChildTunnel {
    fn drop(&mut self) {
        self.terminate();
    }
}
