use serde::Deserialize;
use serde_json::Value;

use super::parse_json;
use crate::error::Result;
use crate::release::Release;
use crate::runner::{CommandRunner, Invocation, RunnerExt};

/// One entry of `helm list -o json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelmRelease {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub chart: String,
}

#[derive(Deserialize)]
struct HelmRepo {
    name: String,
}

/// `helm` bound to one kube context.
pub struct Helm<'a> {
    runner: &'a dyn CommandRunner,
    kube_context: Option<String>,
}

impl<'a> Helm<'a> {
    pub fn new(runner: &'a dyn CommandRunner, kube_context: Option<String>) -> Self {
        Self {
            runner,
            kube_context,
        }
    }

    fn invocation(&self) -> Invocation {
        let inv = Invocation::new("helm");
        match &self.kube_context {
            Some(ctx) => inv.args(["--kube-context", ctx.as_str()]),
            None => inv,
        }
    }

    /// Releases in a namespace (all states, so failed installs are seen too).
    ///
    /// # Errors
    ///
    /// Returns an error if helm fails or prints something other than JSON.
    pub fn list(&self, namespace: &str) -> Result<Vec<HelmRelease>> {
        let stdout = self
            .runner
            .run_ok(&self.invocation().args(["list", "-a", "-n", namespace, "-o", "json"]))?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_json("helm release list", &stdout)
    }

    /// `helm install ... --create-namespace`.
    ///
    /// # Errors
    ///
    /// Returns the command error if the install fails.
    pub fn install(&self, release: &Release) -> Result<()> {
        let inv = self
            .invocation()
            .args(["install", release.name.as_str(), release.chart.as_str()])
            .args(["-n", release.namespace.as_str(), "--create-namespace"]);
        self.runner.run_ok(&release.append_options(inv, false))?;
        Ok(())
    }

    /// `helm upgrade ...`, optionally keeping previously supplied values.
    ///
    /// # Errors
    ///
    /// Returns the command error if the upgrade fails.
    pub fn upgrade(&self, release: &Release) -> Result<()> {
        let inv = self
            .invocation()
            .args(["upgrade", release.name.as_str(), release.chart.as_str()])
            .args(["-n", release.namespace.as_str()]);
        self.runner.run_ok(&release.append_options(inv, true))?;
        Ok(())
    }

    /// `helm uninstall`.
    ///
    /// # Errors
    ///
    /// Returns the command error, including "not found" for absent releases.
    pub fn uninstall(&self, name: &str, namespace: &str) -> Result<()> {
        self.runner
            .run_ok(&self.invocation().args(["uninstall", name, "-n", namespace]))?;
        Ok(())
    }

    /// User-supplied values of a release (`Value::Null` when none were set).
    ///
    /// # Errors
    ///
    /// Returns an error if the release does not exist or output is not JSON.
    pub fn values(&self, name: &str, namespace: &str) -> Result<Value> {
        let stdout = self.runner.run_ok(
            &self
                .invocation()
                .args(["get", "values", name, "-n", namespace, "-o", "json"]),
        )?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        parse_json("helm values", &stdout)
    }

    /// Names of configured chart repositories.
    ///
    /// # Errors
    ///
    /// Returns an error if helm fails for a reason other than having no repositories.
    pub fn repos(&self) -> Result<Vec<String>> {
        match self
            .runner
            .run_ok(&Invocation::new("helm").args(["repo", "list", "-o", "json"]))
        {
            Ok(stdout) if stdout.trim().is_empty() => Ok(Vec::new()),
            Ok(stdout) => {
                let repos: Vec<HelmRepo> = parse_json("helm repo list", &stdout)?;
                Ok(repos.into_iter().map(|r| r.name).collect())
            }
            Err(e) if e.stderr().contains("no repositories") => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// `helm repo add`.
    ///
    /// # Errors
    ///
    /// Returns the command error if the repository cannot be added.
    pub fn repo_add(&self, name: &str, url: &str) -> Result<()> {
        self.runner
            .run_ok(&Invocation::new("helm").args(["repo", "add", name, url]))?;
        Ok(())
    }

    /// `helm repo update <name>`.
    ///
    /// # Errors
    ///
    /// Returns the command error if the index refresh fails.
    pub fn repo_update(&self, name: &str) -> Result<()> {
        self.runner
            .run_ok(&Invocation::new("helm").args(["repo", "update", name]))?;
        Ok(())
    }
}
