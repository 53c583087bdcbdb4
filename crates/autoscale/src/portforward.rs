//! Supervised `kubectl port-forward` tunnels, at most one per local port.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::ForwardConfig;
use crate::error::Result;
use crate::runner::{CommandRunner, Invocation, Tunnel};
use crate::tools::Kubectl;

/// A running tunnel and what it points at.
pub struct ForwardSession {
    pub target: ForwardConfig,
    pub started_at: DateTime<Utc>,
    tunnel: Box<dyn Tunnel>,
}

impl ForwardSession {
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.tunnel.id()
    }

    /// `http://localhost:<port>` for the forwarded service.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.target.local_port)
    }
}

/// Owns every tunnel it starts; dropping it terminates them.
pub struct ForwardSupervisor<'a> {
    runner: &'a dyn CommandRunner,
    kubectl: Kubectl<'a>,
    sessions: BTreeMap<u16, ForwardSession>,
}

impl<'a> ForwardSupervisor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, context: Option<String>) -> Self {
        Self {
            runner,
            kubectl: Kubectl::new(runner, context),
            sessions: BTreeMap::new(),
        }
    }

    /// Start forwarding `target`, replacing whatever holds its local port.
    ///
    /// # Errors
    ///
    /// Returns an error if `kubectl` cannot be started.
    pub fn start(&mut self, target: &ForwardConfig) -> Result<&ForwardSession> {
        let port = target.local_port;
        self.stop(port);
        self.sweep(port);

        let inv = self
            .kubectl
            .port_forward(&target.namespace, &target.service, port, target.remote_port);
        let tunnel = self.runner.spawn(&inv)?;
        info!(
            name = %target.name,
            service = %target.service,
            local_port = port,
            remote_port = target.remote_port,
            pid = ?tunnel.id(),
            "Port-forward started"
        );

        let session = ForwardSession {
            target: target.clone(),
            started_at: Utc::now(),
            tunnel,
        };
        let session: &ForwardSession = self.sessions.entry(port).or_insert(session);
        Ok(session)
    }

    /// Terminate the tracked tunnel on `port`, if any. Returns whether one was tracked.
    pub fn stop(&mut self, port: u16) -> bool {
        match self.sessions.remove(&port) {
            Some(mut session) => {
                debug!(port, name = %session.target.name, "Stopping port-forward");
                session.tunnel.terminate();
                true
            }
            None => false,
        }
    }

    /// Terminate every tracked tunnel. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let ports: Vec<u16> = self.sessions.keys().copied().collect();
        ports.into_iter().filter(|p| self.stop(*p)).count()
    }

    /// Forget sessions whose process has exited. Returns the affected ports.
    pub fn reap(&mut self) -> Vec<u16> {
        let dead: Vec<u16> = self
            .sessions
            .iter_mut()
            .filter_map(|(port, s)| (!s.tunnel.is_alive()).then_some(*port))
            .collect();
        for port in &dead {
            warn!(port, "Port-forward exited");
            self.sessions.remove(port);
        }
        dead
    }

    #[must_use]
    pub fn is_tracked(&self, port: u16) -> bool {
        self.sessions.contains_key(&port)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ForwardSession> {
        self.sessions.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Best-effort kill of untracked forwards on `port` left by earlier runs.
    /// Returns whether any process was signalled.
    pub fn sweep(&self, port: u16) -> bool {
        let pattern = format!("port-forward.* {port}:");
        match self.runner.run(&Invocation::new("pkill").args(["-f", pattern.as_str()])) {
            Ok(out) if out.success() => {
                info!(port, "Killed stray port-forward");
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(port, error = %e, "Stray port-forward sweep unavailable");
                false
            }
        }
    }
}

impl Drop for ForwardSupervisor<'_> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::testing::FakeCluster;

    fn grafana() -> ForwardConfig {
        DeployConfig::default()
            .forwards
            .into_iter()
            .find(|f| f.name == "grafana")
            .unwrap()
    }

    #[test]
    fn test_start_twice_leaves_one_process() {
        let fake = FakeCluster::running();
        let mut supervisor = ForwardSupervisor::new(&fake, None);

        supervisor.start(&grafana()).unwrap();
        supervisor.start(&grafana()).unwrap();

        assert_eq!(fake.live_tunnels_on(3000), 1);
        assert_eq!(supervisor.len(), 1);
    }

    #[test]
    fn test_start_kills_untracked_forward() {
        let fake = FakeCluster::running();
        // A tunnel from an earlier run that nobody tracks.
        let kubectl = Kubectl::new(&fake, None);
        let stray = fake
            .spawn(&kubectl.port_forward("monitoring", "monitoring-grafana", 3000, 80))
            .unwrap();

        let mut supervisor = ForwardSupervisor::new(&fake, None);
        let session = supervisor.start(&grafana()).unwrap();
        assert_eq!(session.url(), "http://localhost:3000");

        assert_eq!(fake.live_tunnels_on(3000), 1);
        drop(stray);
    }

    #[test]
    fn test_drop_stops_all() {
        let fake = FakeCluster::running();
        {
            let mut supervisor = ForwardSupervisor::new(&fake, None);
            for target in &DeployConfig::default().forwards {
                supervisor.start(target).unwrap();
            }
            assert_eq!(fake.live_tunnels(), 3);
        }
        assert_eq!(fake.live_tunnels(), 0);
    }

    #[test]
    fn test_stop_and_reap() {
        let fake = FakeCluster::running();
        let mut supervisor = ForwardSupervisor::new(&fake, None);
        let config = DeployConfig::default();
        for target in &config.forwards {
            supervisor.start(target).unwrap();
        }

        assert!(supervisor.stop(8001));
        assert!(!supervisor.stop(8001));
        assert_eq!(fake.live_tunnels_on(8001), 0);

        // Simulate the prometheus tunnel dying on its own.
        fake.run(&Invocation::new("pkill").args(["-f", "port-forward.* 9090:"]))
            .unwrap();
        assert_eq!(supervisor.reap(), vec![9090]);
        assert!(supervisor.is_tracked(3000));
        assert_eq!(supervisor.stop_all(), 1);
        assert!(supervisor.is_empty());
    }
}
