//! In-memory stand-in for minikube, helm, kubectl, docker and git.
//!
//! `FakeCluster` interprets the command lines the tool issues and keeps just
//! enough state to check convergence properties (one release per name, one
//! autoscaler kind, one tunnel per port). Rendering is deliberately leaky:
//! switching `autoscaling.mode` adds the new autoscaler object without
//! removing the old one, the same way objects created outside Helm linger.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::CommandError;
use crate::runner::{CommandOutput, CommandRunner, Invocation, Tunnel};
use crate::tools::ClusterStatus;

pub const VPA_CRD: &str = "verticalpodautoscalers.autoscaling.k8s.io";

/// Scripts a checkout provides, relative to `vertical-pod-autoscaler/`.
pub const VPA_SCRIPTS: [&str; 2] = ["hack/vpa-up.sh", "pkg/admission-controller/gencerts.sh"];

/// Lay out `vpa_dir` the way a clone of the autoscaler repository would.
pub fn seed_vpa_checkout(vpa_dir: &Path) -> std::io::Result<()> {
    for script in VPA_SCRIPTS {
        let path = vpa_dir.join(script);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, "#!/usr/bin/env bash\n")?;
    }
    Ok(())
}

const UNREACHABLE: &str =
    "The connection to the server 127.0.0.1:32771 was refused - did you specify the right host or port?";

#[derive(Debug, Clone, Default)]
struct FakeRelease {
    revision: u32,
    values: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    cluster: Option<ClusterStatus>,
    addons: BTreeSet<String>,
    crds: BTreeSet<String>,
    repos: BTreeSet<String>,
    releases: BTreeMap<(String, String), FakeRelease>,
    namespaces: BTreeSet<String>,
    pods: BTreeMap<(String, String), Vec<bool>>,
    replicas: BTreeMap<(String, String), u32>,
    autoscalers: BTreeSet<(String, String, String)>,
    secrets: BTreeMap<(String, String, String), String>,
    images: BTreeSet<String>,
    cluster_images: BTreeSet<String>,
    tunnels: Vec<(Invocation, Arc<AtomicBool>)>,
    missing_tools: BTreeSet<String>,
    failures: Vec<(Vec<String>, String)>,
    log: Vec<String>,
    pod_deletions: u32,
    restarts: u32,
    cert_regenerations: u32,
}

/// Scriptable fake implementing [`CommandRunner`].
pub struct FakeCluster {
    state: Mutex<State>,
    next_pid: AtomicU32,
}

impl FakeCluster {
    /// No minikube profile yet.
    pub fn absent() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_pid: AtomicU32::new(4000),
        }
    }

    /// A running profile with the system namespaces.
    pub fn running() -> Self {
        let fake = Self::absent();
        fake.with_cluster(ClusterStatus::Running);
        fake
    }

    pub fn with_cluster(&self, status: ClusterStatus) -> &Self {
        let mut st = self.lock();
        st.cluster = Some(status);
        st.namespaces.insert("default".into());
        st.namespaces.insert("kube-system".into());
        drop(st);
        self
    }

    pub fn with_crd(&self, name: &str) -> &Self {
        self.lock().crds.insert(name.into());
        self
    }

    pub fn with_addon(&self, name: &str) -> &Self {
        self.lock().addons.insert(name.into());
        self
    }

    pub fn with_pods(&self, namespace: &str, selector: &str, ready: &[bool]) -> &Self {
        self.lock()
            .pods
            .insert((namespace.into(), selector.into()), ready.to_vec());
        self
    }

    pub fn with_secret(&self, namespace: &str, name: &str, key: &str, plain: &str) -> &Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(plain);
        self.lock()
            .secrets
            .insert((namespace.into(), name.into(), key.into()), encoded);
        self
    }

    pub fn with_missing_tool(&self, program: &str) -> &Self {
        self.lock().missing_tools.insert(program.into());
        self
    }

    /// Fail every command whose arguments contain `needle` contiguously.
    pub fn fail_when(&self, needle: &[&str], stderr: &str) -> &Self {
        self.lock().failures.push((
            needle.iter().map(ToString::to_string).collect(),
            stderr.into(),
        ));
        self
    }

    // --- Observations ---

    pub fn cluster_status(&self) -> ClusterStatus {
        self.lock().cluster.unwrap_or(ClusterStatus::Absent)
    }

    pub fn has_crd(&self, name: &str) -> bool {
        self.lock().crds.contains(name)
    }

    pub fn addons(&self) -> BTreeSet<String> {
        self.lock().addons.clone()
    }

    pub fn release_count(&self, name: &str, namespace: &str) -> usize {
        self.lock()
            .releases
            .keys()
            .filter(|(ns, n)| ns == namespace && n == name)
            .count()
    }

    pub fn release_revision(&self, name: &str, namespace: &str) -> Option<u32> {
        self.lock()
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| r.revision)
    }

    pub fn release_value(&self, name: &str, namespace: &str, key: &str) -> Option<String> {
        self.lock()
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|r| r.values.get(key).cloned())
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.lock().namespaces.contains(namespace)
    }

    /// Autoscaler kinds (`hpa`/`vpa`) present in a namespace.
    pub fn autoscaler_kinds(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .autoscalers
            .iter()
            .filter(|(_, ns, _)| ns == namespace)
            .map(|(kind, _, _)| kind.clone())
            .collect()
    }

    pub fn replicas(&self, namespace: &str, deployment: &str) -> Option<u32> {
        self.lock()
            .replicas
            .get(&(namespace.to_string(), deployment.to_string()))
            .copied()
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.lock().images.contains(reference)
    }

    pub fn cluster_has_image(&self, reference: &str) -> bool {
        self.lock().cluster_images.contains(reference)
    }

    pub fn live_tunnels(&self) -> usize {
        self.lock()
            .tunnels
            .iter()
            .filter(|(_, alive)| alive.load(Ordering::SeqCst))
            .count()
    }

    pub fn live_tunnels_on(&self, local_port: u16) -> usize {
        let prefix = format!("{local_port}:");
        self.lock()
            .tunnels
            .iter()
            .filter(|(inv, alive)| {
                alive.load(Ordering::SeqCst) && inv.args.iter().any(|a| a.starts_with(&prefix))
            })
            .count()
    }

    pub fn pod_deletions(&self) -> u32 {
        self.lock().pod_deletions
    }

    pub fn restarts(&self) -> u32 {
        self.lock().restarts
    }

    pub fn cert_regenerations(&self) -> u32 {
        self.lock().cert_regenerations
    }

    /// Number of logged commands containing `needle` (matched on the display form).
    pub fn count_commands(&self, needle: &str) -> usize {
        self.lock().log.iter().filter(|l| l.contains(needle)).count()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    // --- Interpretation ---

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn handle(&self, inv: &Invocation) -> CommandOutput {
        let mut st = self.lock();
        st.log.push(inv.to_string());

        if let Some((_, stderr)) = st.failures.iter().find(|(needle, _)| {
            let refs: Vec<&str> = needle.iter().map(String::as_str).collect();
            inv.has_args(&refs)
        }) {
            return CommandOutput::failed(1, stderr.clone());
        }

        let args = strip_global_flags(&inv.args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match inv.program.as_str() {
            "minikube" => minikube(&mut st, &args),
            "kubectl" => kubectl(&mut st, &args),
            "helm" => helm(&mut st, &args),
            "docker" => docker(&mut st, &args),
            "git" => git(&args),
            "pkill" => pkill(&mut st, &args),
            "bash" => script(&mut st, &args),
            _ => CommandOutput::ok(""),
        }
    }
}

impl CommandRunner for FakeCluster {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        if self.lock().missing_tools.contains(&invocation.program) {
            return Err(CommandError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(self.handle(invocation))
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn Tunnel>, CommandError> {
        let alive = Arc::new(AtomicBool::new(true));
        let mut st = self.lock();
        st.log.push(invocation.to_string());
        st.tunnels.push((invocation.clone(), Arc::clone(&alive)));
        Ok(Box::new(FakeTunnel {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            alive,
        }))
    }
}

struct FakeTunnel {
    pid: u32,
    alive: Arc<AtomicBool>,
}

impl Tunnel for FakeTunnel {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn terminate(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for FakeTunnel {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn strip_global_flags(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if matches!(arg.as_str(), "--context" | "--kube-context" | "-p") {
            iter.next();
            continue;
        }
        out.push(arg.clone());
    }
    out
}

fn flag<'a>(args: &[&'a str], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == name)
        .and_then(|i| args.get(i + 1))
        .copied()
}

fn not_found(what: &str) -> CommandOutput {
    CommandOutput::failed(1, format!("Error from server (NotFound): {what} not found"))
}

fn cluster_up(st: &State) -> bool {
    st.cluster == Some(ClusterStatus::Running)
}

fn render_autoscaler(st: &mut State, namespace: &str, name: &str, values: &BTreeMap<String, String>) {
    let kind = values
        .get("autoscaling.mode")
        .map_or("hpa", String::as_str)
        .to_string();
    st.autoscalers
        .insert((kind, namespace.to_string(), name.to_string()));
    st.replicas
        .entry((namespace.to_string(), name.to_string()))
        .or_insert(1);
}

fn minikube(st: &mut State, args: &[&str]) -> CommandOutput {
    match args {
        ["version", ..] => CommandOutput::ok("minikube version: v1.34.0"),
        ["status", ..] => {
            let (host, component, code) = match st.cluster {
                None | Some(ClusterStatus::Absent) => {
                    return CommandOutput {
                        code: Some(85),
                        stdout: json!({"Name": "fake", "Host": "Nonexistent", "Kubelet": "Nonexistent", "APIServer": "Nonexistent"}).to_string(),
                        stderr: String::new(),
                    }
                }
                Some(ClusterStatus::Running) => ("Running", "Running", 0),
                Some(ClusterStatus::Stopped) => ("Stopped", "Stopped", 7),
                Some(ClusterStatus::Degraded) => ("Running", "Stopped", 2),
            };
            CommandOutput {
                code: Some(code),
                stdout: json!({"Name": "fake", "Host": host, "Kubelet": component, "APIServer": host}).to_string(),
                stderr: String::new(),
            }
        }
        ["start", ..] => {
            st.cluster = Some(ClusterStatus::Running);
            st.namespaces.insert("default".into());
            st.namespaces.insert("kube-system".into());
            CommandOutput::ok("Done! kubectl is now configured")
        }
        ["delete", ..] => {
            *st = State {
                tunnels: std::mem::take(&mut st.tunnels),
                log: std::mem::take(&mut st.log),
                failures: std::mem::take(&mut st.failures),
                missing_tools: std::mem::take(&mut st.missing_tools),
                repos: std::mem::take(&mut st.repos),
                images: std::mem::take(&mut st.images),
                ..State::default()
            };
            CommandOutput::ok("Removed all traces of the profile")
        }
        ["addons", "list", ..] => {
            if st.cluster.is_none() {
                return CommandOutput::failed(85, "Profile not found");
            }
            let mut map = Map::new();
            for name in ["ingress", "metrics-server", "dashboard", "storage-provisioner"] {
                let status = if st.addons.contains(name) { "enabled" } else { "disabled" };
                map.insert(name.into(), json!({"Profile": "fake", "Status": status}));
            }
            CommandOutput::ok(Value::Object(map).to_string())
        }
        ["addons", "enable", name, ..] => {
            if !cluster_up(st) {
                return CommandOutput::failed(1, "cluster is not running");
            }
            st.addons.insert((*name).to_string());
            CommandOutput::ok("")
        }
        ["image", "load", reference, ..] => {
            if !st.images.contains(*reference) {
                return CommandOutput::failed(1, "image not found in local docker daemon");
            }
            st.cluster_images.insert((*reference).to_string());
            CommandOutput::ok("")
        }
        _ => CommandOutput::ok(""),
    }
}

fn kubectl(st: &mut State, args: &[&str]) -> CommandOutput {
    if matches!(args, ["version", "--client", ..]) {
        return CommandOutput::ok("Client Version: v1.31.0");
    }
    if !cluster_up(st) {
        return CommandOutput::failed(1, UNREACHABLE);
    }

    match args {
        ["cluster-info", ..] => CommandOutput::ok("Kubernetes control plane is running"),
        ["get", "crd", name, ..] => {
            if st.crds.contains(*name) {
                CommandOutput::ok(format!("customresourcedefinition.apiextensions.k8s.io/{name}"))
            } else {
                not_found(&format!("customresourcedefinitions.apiextensions.k8s.io \"{name}\""))
            }
        }
        ["get", "pods", "-l", selector, "-n", namespace, ..] => {
            let key = ((*namespace).to_string(), (*selector).to_string());
            let items: Vec<Value> = st
                .pods
                .get(&key)
                .map(|pods| {
                    pods.iter()
                        .enumerate()
                        .map(|(i, ready)| {
                            json!({
                                "apiVersion": "v1",
                                "kind": "Pod",
                                "metadata": {"name": format!("pod-{i}"), "namespace": namespace},
                                "status": {"conditions": [
                                    {"type": "Ready", "status": if *ready { "True" } else { "False" }}
                                ]}
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            CommandOutput::ok(json!({"apiVersion": "v1", "kind": "List", "items": items}).to_string())
        }
        ["get", "secret", name, "-n", namespace, "-o", jsonpath] => {
            let key = jsonpath
                .trim_start_matches("jsonpath={.data.")
                .trim_end_matches('}');
            match st.secrets.get(&(
                (*namespace).to_string(),
                (*name).to_string(),
                key.to_string(),
            )) {
                Some(v) => CommandOutput::ok(v.clone()),
                None => not_found(&format!("secrets \"{name}\"")),
            }
        }
        ["get", kind, "-n", namespace, "-o", "name"] => {
            let kind = kind_alias(kind);
            let lines: Vec<String> = st
                .autoscalers
                .iter()
                .filter(|(k, ns, _)| *k == kind && ns == namespace)
                .map(|(k, _, n)| format!("{k}/{n}"))
                .collect();
            CommandOutput::ok(lines.join("\n"))
        }
        ["scale", target, "-n", namespace, replicas] => {
            let name = target.trim_start_matches("deployment/");
            let key = ((*namespace).to_string(), name.to_string());
            if !st.replicas.contains_key(&key) {
                return not_found(&format!("deployments.apps \"{name}\""));
            }
            let count = replicas
                .trim_start_matches("--replicas=")
                .parse()
                .unwrap_or_default();
            st.replicas.insert(key, count);
            CommandOutput::ok(format!("deployment.apps/{name} scaled"))
        }
        ["delete", "pods", ..] => {
            st.pod_deletions += 1;
            CommandOutput::ok("")
        }
        ["delete", "namespace", namespace, ..] => {
            st.namespaces.remove(*namespace);
            st.releases.retain(|(ns, _), _| ns != namespace);
            st.autoscalers.retain(|(_, ns, _)| ns != namespace);
            CommandOutput::ok("")
        }
        ["delete", kind, name, "-n", namespace, ..] => {
            let kind = kind_alias(kind);
            st.autoscalers.remove(&(
                kind.to_string(),
                (*namespace).to_string(),
                (*name).to_string(),
            ));
            CommandOutput::ok("")
        }
        ["rollout", "restart", ..] => {
            st.restarts += 1;
            CommandOutput::ok("")
        }
        _ => CommandOutput::ok(""),
    }
}

fn kind_alias(kind: &str) -> &str {
    match kind {
        "horizontalpodautoscaler" | "hpa" => "hpa",
        "verticalpodautoscaler" | "vpa" => "vpa",
        other => other,
    }
}

fn set_values(args: &[&str]) -> BTreeMap<String, String> {
    args.windows(2)
        .filter(|w| w[0] == "--set")
        .filter_map(|w| w[1].split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn nest_values(values: &BTreeMap<String, String>) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    let mut root = Map::new();
    for (key, value) in values {
        let mut node = &mut root;
        let parts: Vec<&str> = key.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            node = node
                .entry((*part).to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .expect("nested value is an object");
        }
        node.insert(parts[parts.len() - 1].to_string(), Value::String(value.clone()));
    }
    Value::Object(root)
}

fn helm(st: &mut State, args: &[&str]) -> CommandOutput {
    match args {
        ["version", ..] => return CommandOutput::ok("v3.16.2"),
        ["repo", "list", ..] => {
            if st.repos.is_empty() {
                return CommandOutput::failed(1, "Error: no repositories to show");
            }
            let repos: Vec<Value> = st
                .repos
                .iter()
                .map(|r| json!({"name": r, "url": "https://example.invalid"}))
                .collect();
            return CommandOutput::ok(Value::Array(repos).to_string());
        }
        ["repo", "add", name, ..] => {
            st.repos.insert((*name).to_string());
            return CommandOutput::ok("");
        }
        ["repo", ..] => return CommandOutput::ok(""),
        _ => {}
    }

    if !cluster_up(st) {
        return CommandOutput::failed(1, "Error: Kubernetes cluster unreachable");
    }

    let namespace = flag(args, "-n").unwrap_or("default").to_string();
    match args {
        ["list", ..] => {
            let items: Vec<Value> = st
                .releases
                .iter()
                .filter(|((ns, _), _)| *ns == namespace)
                .map(|((ns, name), r)| {
                    json!({"name": name, "namespace": ns, "revision": r.revision.to_string(), "status": "deployed", "chart": "chart-0.1.0"})
                })
                .collect();
            CommandOutput::ok(Value::Array(items).to_string())
        }
        ["install", name, ..] => {
            let key = (namespace.clone(), (*name).to_string());
            if st.releases.contains_key(&key) {
                return CommandOutput::failed(1, "Error: INSTALLATION FAILED: cannot re-use a name that is still in use");
            }
            let values = set_values(args);
            st.namespaces.insert(namespace.clone());
            render_autoscaler(st, &namespace, name, &values);
            st.releases.insert(key, FakeRelease { revision: 1, values });
            CommandOutput::ok("STATUS: deployed")
        }
        ["upgrade", name, ..] => {
            let key = (namespace.clone(), (*name).to_string());
            let Some(existing) = st.releases.get(&key).cloned() else {
                return CommandOutput::failed(1, format!("Error: UPGRADE FAILED: \"{name}\" has no deployed releases"));
            };
            let mut values = if args.contains(&"--reuse-values") {
                existing.values
            } else {
                BTreeMap::new()
            };
            values.extend(set_values(args));
            render_autoscaler(st, &namespace, name, &values);
            st.releases.insert(
                key,
                FakeRelease {
                    revision: existing.revision + 1,
                    values,
                },
            );
            CommandOutput::ok("STATUS: deployed")
        }
        ["uninstall", name, ..] => {
            let key = (namespace.clone(), (*name).to_string());
            if st.releases.remove(&key).is_none() {
                return CommandOutput::failed(
                    1,
                    format!("Error: uninstall: Release not loaded: {name}: release: not found"),
                );
            }
            st.autoscalers.retain(|(_, ns, n)| !(*ns == namespace && n == name));
            st.replicas.remove(&(namespace, (*name).to_string()));
            CommandOutput::ok(format!("release \"{name}\" uninstalled"))
        }
        ["get", "values", name, ..] => {
            match st.releases.get(&(namespace, (*name).to_string())) {
                Some(r) => CommandOutput::ok(nest_values(&r.values).to_string()),
                None => CommandOutput::failed(1, "Error: release: not found"),
            }
        }
        _ => CommandOutput::ok(""),
    }
}

fn docker(st: &mut State, args: &[&str]) -> CommandOutput {
    match args {
        ["build", "-t", reference, ..] => {
            st.images.insert((*reference).to_string());
            CommandOutput::ok("")
        }
        ["image", "rm", "-f", reference] => {
            if st.images.remove(*reference) {
                CommandOutput::ok(format!("Untagged: {reference}"))
            } else {
                CommandOutput::failed(1, format!("Error response from daemon: No such image: {reference}"))
            }
        }
        _ => CommandOutput::ok(""),
    }
}

fn git(args: &[&str]) -> CommandOutput {
    if let ["clone", .., dir] = args {
        if seed_vpa_checkout(&Path::new(dir).join("vertical-pod-autoscaler")).is_err() {
            return CommandOutput::failed(128, "could not create work tree dir");
        }
    }
    CommandOutput::ok("")
}

fn pkill(st: &mut State, args: &[&str]) -> CommandOutput {
    let Some(pattern) = args.last() else {
        return CommandOutput::failed(2, "usage");
    };
    let port_prefix = pattern.rsplit(' ').next().unwrap_or_default();
    let mut matched = false;
    for (inv, alive) in &st.tunnels {
        if alive.load(Ordering::SeqCst) && inv.args.iter().any(|a| a.starts_with(port_prefix)) {
            alive.store(false, Ordering::SeqCst);
            matched = true;
        }
    }
    if matched {
        CommandOutput::ok("")
    } else {
        CommandOutput::failed(1, "")
    }
}

fn script(st: &mut State, args: &[&str]) -> CommandOutput {
    let Some(path) = args.first() else {
        return CommandOutput::failed(2, "no script");
    };
    if !Path::new(path).is_file() {
        return CommandOutput::failed(127, format!("bash: {path}: No such file or directory"));
    }
    if !cluster_up(st) {
        return CommandOutput::failed(1, UNREACHABLE);
    }
    if path.ends_with("vpa-up.sh") {
        st.crds.insert(VPA_CRD.into());
    } else if path.ends_with("gencerts.sh") {
        st.cert_regenerations += 1;
    }
    CommandOutput::ok("")
}
