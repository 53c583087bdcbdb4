//! Bounded polling of pod readiness.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::runner::CommandRunner;
use crate::tools::{pod_is_ready, Kubectl};

/// Result of a readiness wait. Timing out is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { pods: usize },
    TimedOut { matched: usize, ready: usize },
}

impl Readiness {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { pods } => write!(f, "{pods} pod(s) ready"),
            Self::TimedOut { matched: 0, .. } => write!(f, "no pods matched"),
            Self::TimedOut { matched, ready } => write!(f, "{ready}/{matched} pod(s) ready"),
        }
    }
}

/// Polls `kubectl get pods` until every matching pod is Ready.
pub struct ReadinessWaiter<'a> {
    kubectl: Kubectl<'a>,
    interval: Duration,
}

impl<'a> ReadinessWaiter<'a> {
    pub fn new(runner: &'a dyn CommandRunner, context: Option<String>, interval: Duration) -> Self {
        Self {
            kubectl: Kubectl::new(runner, context),
            interval,
        }
    }

    /// Current `(matched, ready)` counts; a failed query counts as nothing matched.
    #[must_use]
    pub fn snapshot(&self, selector: &str, namespace: &str) -> (usize, usize) {
        match self.kubectl.pods(selector, namespace) {
            Ok(pods) => (pods.len(), pods.iter().filter(|p| pod_is_ready(p)).count()),
            Err(e) => {
                debug!(selector, namespace, error = %e, "Pod query failed; treating as not ready");
                (0, 0)
            }
        }
    }

    /// Wait until at least one pod matches and all matching pods are Ready.
    pub async fn wait_ready(&self, selector: &str, namespace: &str, timeout: Duration) -> Readiness {
        let start = Instant::now();
        loop {
            let (matched, ready) = self.snapshot(selector, namespace);
            debug!(selector, namespace, matched, ready, "Polled readiness");

            if matched > 0 && ready == matched {
                return Readiness::Ready { pods: matched };
            }
            if start.elapsed() + self.interval > timeout {
                return Readiness::TimedOut { matched, ready };
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
