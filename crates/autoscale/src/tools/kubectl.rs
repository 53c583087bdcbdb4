use std::time::Duration;

use base64::Engine;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use tracing::debug;

use super::parse_json;
use crate::error::{Error, Result};
use crate::runner::{CommandRunner, Invocation, RunnerExt};

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

/// `kubectl` bound to one kube context.
pub struct Kubectl<'a> {
    runner: &'a dyn CommandRunner,
    context: Option<String>,
}

impl<'a> Kubectl<'a> {
    pub fn new(runner: &'a dyn CommandRunner, context: Option<String>) -> Self {
        Self { runner, context }
    }

    /// Base invocation carrying the context flag.
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        let inv = Invocation::new("kubectl");
        match &self.context {
            Some(ctx) => inv.args(["--context", ctx.as_str()]),
            None => inv,
        }
    }

    /// Fails unless the API server answers.
    ///
    /// # Errors
    ///
    /// Returns the command error from `kubectl cluster-info`.
    pub fn cluster_info(&self) -> Result<()> {
        self.runner
            .run_ok(&self.invocation().args(["cluster-info", "--request-timeout=10s"]))?;
        Ok(())
    }

    /// Whether an object exists. A "not found" answer is `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns an error for any other kubectl failure.
    pub fn exists(&self, kind: &str, name: &str, namespace: Option<&str>) -> Result<bool> {
        let mut inv = self.invocation().args(["get", kind, name]);
        if let Some(ns) = namespace {
            inv = inv.args(["-n", ns]);
        }
        match self.runner.run_ok(&inv.args(["-o", "name"])) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names (`kind/name`) of every object of `kind` in a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub fn list_names(&self, kind: &str, namespace: &str) -> Result<Vec<String>> {
        let stdout = self.runner.run_ok(
            &self
                .invocation()
                .args(["get", kind, "-n", namespace, "-o", "name"]),
        )?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Pods matching a label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails or the output is not a pod list.
    pub fn pods(&self, selector: &str, namespace: &str) -> Result<Vec<Pod>> {
        let stdout = self.runner.run_ok(&self.invocation().args([
            "get", "pods", "-l", selector, "-n", namespace, "-o", "json",
        ]))?;
        let list: PodList = parse_json("pod list", &stdout)?;
        Ok(list.items)
    }

    /// Set a deployment's replica count.
    ///
    /// # Errors
    ///
    /// Returns an error if the scale command fails.
    pub fn scale_deployment(&self, name: &str, namespace: &str, replicas: u32) -> Result<()> {
        self.runner.run_ok(&self.invocation().args([
            "scale".to_string(),
            format!("deployment/{name}"),
            "-n".into(),
            namespace.into(),
            format!("--replicas={replicas}"),
        ]))?;
        Ok(())
    }

    /// Delete pods by selector without waiting for termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete command fails.
    pub fn delete_pods(&self, selector: &str, namespace: &str) -> Result<()> {
        self.runner.run_ok(&self.invocation().args([
            "delete",
            "pods",
            "-l",
            selector,
            "-n",
            namespace,
            "--ignore-not-found",
            "--wait=false",
        ]))?;
        Ok(())
    }

    /// Delete one object, tolerating its absence.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete command fails.
    pub fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        self.runner.run_ok(&self.invocation().args([
            "delete",
            kind,
            name,
            "-n",
            namespace,
            "--ignore-not-found",
        ]))?;
        Ok(())
    }

    /// Delete a namespace, tolerating its absence.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete command fails.
    pub fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.runner.run_ok(&self.invocation().args([
            "delete",
            "namespace",
            namespace,
            "--ignore-not-found",
        ]))?;
        Ok(())
    }

    /// Trigger a rolling restart of a deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the restart command fails.
    pub fn rollout_restart(&self, deployment: &str, namespace: &str) -> Result<()> {
        self.runner.run_ok(&self.invocation().args([
            "rollout".to_string(),
            "restart".into(),
            format!("deployment/{deployment}"),
            "-n".into(),
            namespace.into(),
        ]))?;
        Ok(())
    }

    /// Block until a deployment rollout finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the rollout does not finish in time, and the
    /// command error for any other failure.
    pub fn rollout_status(&self, deployment: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let inv = self.invocation().args([
            "rollout".to_string(),
            "status".into(),
            format!("deployment/{deployment}"),
            "-n".into(),
            namespace.into(),
            format!("--timeout={}s", timeout.as_secs()),
        ]);
        match self.runner.run_ok(&inv) {
            Ok(_) => Ok(()),
            Err(e) if e.is_deadline() => {
                debug!(error = %e, "Rollout did not finish");
                Err(Error::Timeout {
                    what: format!("rollout of {namespace}/{deployment}"),
                    secs: timeout.as_secs(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read and base64-decode one key of a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be read or the value is not valid base64/UTF-8.
    pub fn secret_value(&self, name: &str, namespace: &str, key: &str) -> Result<String> {
        let stdout = self.runner.run_ok(&self.invocation().args([
            "get".to_string(),
            "secret".into(),
            name.into(),
            "-n".into(),
            namespace.into(),
            "-o".into(),
            format!("jsonpath={{.data.{key}}}"),
        ]))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(stdout.trim())
            .map_err(|e| Error::parse(format!("secret {namespace}/{name}"), e))?;
        String::from_utf8(bytes).map_err(|e| Error::parse(format!("secret {namespace}/{name}"), e))
    }

    /// Command line for a service port-forward.
    #[must_use]
    pub fn port_forward(&self, namespace: &str, service: &str, local: u16, remote: u16) -> Invocation {
        self.invocation().args([
            "port-forward".to_string(),
            "-n".into(),
            namespace.into(),
            format!("svc/{service}"),
            format!("{local}:{remote}"),
        ])
    }
}

/// Whether a pod reports condition `Ready=True`.
#[must_use]
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}
