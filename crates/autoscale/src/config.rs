//! Deployment configuration types.
//!
//! Defaults reproduce the demo environment: a minikube profile running the ML
//! prediction API next to kube-prometheus-stack. A YAML file can override any
//! subset of fields.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::autoscaling::AutoscalingMode;
use crate::error::{Error, Result};

/// Local cluster settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// minikube profile name (also the kube context name).
    pub profile: String,
    /// minikube driver (e.g. "docker").
    pub driver: String,
    pub cpus: u32,
    /// Memory for the cluster VM/container, in MB.
    pub memory_mb: u32,
    /// Disk size, minikube syntax (e.g. "20g").
    pub disk_size: String,
    /// Kubernetes version; empty means minikube's default.
    pub kubernetes_version: String,
    /// Add-ons to enable after start.
    pub addons: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            profile: "ml-autoscale".into(),
            driver: "docker".into(),
            cpus: 4,
            memory_mb: 8192,
            disk_size: "20g".into(),
            kubernetes_version: String::new(),
            addons: vec!["ingress".into(), "metrics-server".into()],
        }
    }
}

/// Service image build settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub repository: String,
    pub tag: String,
    pub dockerfile: PathBuf,
    /// Build context directory.
    pub context: PathBuf,
}

impl ImageConfig {
    /// `repository:tag` reference.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            repository: "ml-prediction-api".into(),
            tag: "latest".into(),
            dockerfile: PathBuf::from("Dockerfile"),
            context: PathBuf::from("."),
        }
    }
}

/// Application release settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub release: String,
    pub namespace: String,
    /// Chart path or reference.
    pub chart: String,
    /// Deployment created by the chart.
    pub deployment: String,
    /// Label selector for the application pods.
    pub selector: String,
    /// Name of the HPA/VPA object the chart renders.
    pub autoscaler_name: String,
    /// Replica count patched in before every mode switch.
    pub baseline_replicas: u32,
    /// Mode used on first install.
    pub default_mode: AutoscalingMode,
    /// Extra `--set` overrides.
    pub values: BTreeMap<String, String>,
    /// Values files passed with `-f`.
    pub values_files: Vec<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            release: "ml-api".into(),
            namespace: "ml-api".into(),
            chart: "./helm/ml-api".into(),
            deployment: "ml-api".into(),
            selector: "app=ml-api".into(),
            autoscaler_name: "ml-api".into(),
            baseline_replicas: 1,
            default_mode: AutoscalingMode::Hpa,
            values: BTreeMap::new(),
            values_files: Vec::new(),
        }
    }
}

/// Monitoring stack settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub release: String,
    pub namespace: String,
    pub repo_name: String,
    pub repo_url: String,
    pub chart: String,
    /// Chart version; latest when unset.
    pub version: Option<String>,
    /// Secret holding the Grafana admin credentials.
    pub grafana_secret: String,
    /// Selector for Grafana pods.
    pub grafana_selector: String,
    /// Selector for Prometheus pods.
    pub prometheus_selector: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            release: "monitoring".into(),
            namespace: "monitoring".into(),
            repo_name: "prometheus-community".into(),
            repo_url: "https://prometheus-community.github.io/helm-charts".into(),
            chart: "prometheus-community/kube-prometheus-stack".into(),
            version: None,
            grafana_secret: "monitoring-grafana".into(),
            grafana_selector: "app.kubernetes.io/name=grafana".into(),
            prometheus_selector: "app.kubernetes.io/name=prometheus".into(),
        }
    }
}

/// Vertical Pod Autoscaler installation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpaConfig {
    /// CRD whose presence means VPA is installed.
    pub crd: String,
    /// Local checkout of kubernetes/autoscaler.
    pub checkout_dir: PathBuf,
    pub repo_url: String,
    pub admission_namespace: String,
    pub admission_deployment: String,
}

impl VpaConfig {
    /// The `vertical-pod-autoscaler` directory inside the checkout.
    #[must_use]
    pub fn vpa_dir(&self) -> PathBuf {
        self.checkout_dir.join("vertical-pod-autoscaler")
    }
}

impl Default for VpaConfig {
    fn default() -> Self {
        let checkout_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("autoscale")
            .join("autoscaler");
        Self {
            crd: "verticalpodautoscalers.autoscaling.k8s.io".into(),
            checkout_dir,
            repo_url: "https://github.com/kubernetes/autoscaler.git".into(),
            admission_namespace: "kube-system".into(),
            admission_deployment: "vpa-admission-controller".into(),
        }
    }
}

/// A service to expose on localhost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Logical name shown to the user.
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub remote_port: u16,
    pub local_port: u16,
}

/// Bounded waits, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub app_ready_secs: u64,
    pub monitoring_ready_secs: u64,
    pub admission_rollout_secs: u64,
    pub helm_secs: u64,
    pub poll_interval_ms: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub fn app_ready(&self) -> Duration {
        Duration::from_secs(self.app_ready_secs)
    }

    #[must_use]
    pub fn monitoring_ready(&self) -> Duration {
        Duration::from_secs(self.monitoring_ready_secs)
    }

    #[must_use]
    pub fn admission_rollout(&self) -> Duration {
        Duration::from_secs(self.admission_rollout_secs)
    }

    #[must_use]
    pub fn helm(&self) -> Duration {
        Duration::from_secs(self.helm_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            app_ready_secs: 300,
            monitoring_ready_secs: 600,
            admission_rollout_secs: 120,
            helm_secs: 600,
            poll_interval_ms: 5_000,
        }
    }
}

/// Full deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub cluster: ClusterConfig,
    pub image: ImageConfig,
    pub app: AppConfig,
    pub monitoring: MonitoringConfig,
    pub vpa: VpaConfig,
    pub forwards: Vec<ForwardConfig>,
    pub timeouts: TimeoutConfig,
    /// Directory for the deploy state file.
    pub state_dir: PathBuf,
    /// Minimum host memory, in GiB, required by preflight.
    pub min_memory_gb: u64,
}

/// Forwards for the API, Grafana and Prometheus services of the given releases.
fn default_forwards(app: &AppConfig, monitoring: &MonitoringConfig) -> Vec<ForwardConfig> {
    vec![
        ForwardConfig {
            name: "api".into(),
            namespace: app.namespace.clone(),
            service: app.release.clone(),
            remote_port: 8000,
            local_port: 8001,
        },
        ForwardConfig {
            name: "grafana".into(),
            namespace: monitoring.namespace.clone(),
            service: format!("{}-grafana", monitoring.release),
            remote_port: 80,
            local_port: 3000,
        },
        ForwardConfig {
            name: "prometheus".into(),
            namespace: monitoring.namespace.clone(),
            service: format!("{}-kube-prometheus-prometheus", monitoring.release),
            remote_port: 9090,
            local_port: 9090,
        },
    ]
}

impl Default for DeployConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        let monitoring = MonitoringConfig::default();
        let forwards = default_forwards(&app, &monitoring);

        Self {
            cluster: ClusterConfig::default(),
            image: ImageConfig::default(),
            app,
            monitoring,
            vpa: VpaConfig::default(),
            forwards,
            timeouts: TimeoutConfig::default(),
            state_dir: dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("autoscale"),
            min_memory_gb: 8,
        }
    }
}

impl DeployConfig {
    /// Load a YAML config file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let parse_error = |e: serde_yaml::Error| Error::parse(format!("config file {}", path.display()), e);
        let raw: serde_yaml::Value = serde_yaml::from_str(&content).map_err(parse_error)?;
        let mut config: Self = if raw.is_null() {
            Self::default()
        } else {
            serde_yaml::from_value(raw.clone()).map_err(parse_error)?
        };
        config.derive_unset_names(&raw);
        config.validate()?;
        Ok(config)
    }

    /// Names that default from other settings follow the loaded values
    /// unless the file sets them explicitly.
    fn derive_unset_names(&mut self, raw: &serde_yaml::Value) {
        if raw.get("forwards").is_none() {
            self.forwards = default_forwards(&self.app, &self.monitoring);
        }
        if raw
            .get("monitoring")
            .and_then(|m| m.get("grafana_secret"))
            .is_none()
        {
            self.monitoring.grafana_secret = format!("{}-grafana", self.monitoring.release);
        }
    }

    /// Load from `path` if given, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject configurations that would break orchestration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("cluster.profile", &self.cluster.profile),
            ("image.repository", &self.image.repository),
            ("image.tag", &self.image.tag),
            ("app.release", &self.app.release),
            ("app.namespace", &self.app.namespace),
            ("app.chart", &self.app.chart),
            ("app.deployment", &self.app.deployment),
            ("app.selector", &self.app.selector),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{field} must not be empty")));
            }
        }

        if self.monitoring.enabled
            && (self.monitoring.release.is_empty() || self.monitoring.namespace.is_empty())
        {
            return Err(Error::Config(
                "monitoring.release and monitoring.namespace are required when monitoring is enabled"
                    .into(),
            ));
        }

        if self.timeouts.poll_interval_ms == 0 {
            return Err(Error::Config("timeouts.poll_interval_ms must be positive".into()));
        }

        let mut ports = HashSet::new();
        for fwd in &self.forwards {
            if fwd.local_port == 0 || fwd.remote_port == 0 {
                return Err(Error::Config(format!("forward `{}` has a zero port", fwd.name)));
            }
            if !ports.insert(fwd.local_port) {
                return Err(Error::Config(format!(
                    "local port {} is used by more than one forward",
                    fwd.local_port
                )));
            }
        }

        Ok(())
    }

    /// Path of the deploy state file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("deploy-state.json")
    }

    /// Namespaces owned by this deployment (deleted on teardown).
    #[must_use]
    pub fn owned_namespaces(&self) -> Vec<String> {
        let mut namespaces = vec![self.app.namespace.clone()];
        if self.monitoring.enabled && !namespaces.contains(&self.monitoring.namespace) {
            namespaces.push(self.monitoring.namespace.clone());
        }
        namespaces
    }
}
