use crate::config::ImageConfig;
use crate::error::Result;
use crate::runner::{CommandRunner, Invocation, RunnerExt};

/// `docker` on the host.
pub struct Docker<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Docker<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Whether the daemon answers `docker info`.
    #[must_use]
    pub fn daemon_ready(&self) -> bool {
        self.runner
            .succeeds(&Invocation::new("docker").args(["info", "--format", "{{.ServerVersion}}"]))
    }

    /// `docker build -t <ref> -f <dockerfile> <context>`.
    ///
    /// # Errors
    ///
    /// Returns the command error if the build fails.
    pub fn build(&self, image: &ImageConfig) -> Result<()> {
        let inv = Invocation::new("docker").args([
            "build".to_string(),
            "-t".into(),
            image.reference(),
            "-f".into(),
            image.dockerfile.display().to_string(),
            image.context.display().to_string(),
        ]);
        self.runner.run_ok(&inv)?;
        Ok(())
    }

    /// `docker image rm -f <ref>`; absent images are not an error.
    ///
    /// # Errors
    ///
    /// Returns the command error for failures other than a missing image.
    pub fn remove_image(&self, reference: &str) -> Result<()> {
        match self
            .runner
            .run_ok(&Invocation::new("docker").args(["image", "rm", "-f", reference]))
        {
            Ok(_) => Ok(()),
            Err(e) if e.stderr().contains("No such image") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `docker image prune -f`.
    ///
    /// # Errors
    ///
    /// Returns the command error if pruning fails.
    pub fn prune_dangling(&self) -> Result<()> {
        self.runner
            .run_ok(&Invocation::new("docker").args(["image", "prune", "-f"]))?;
        Ok(())
    }
}
