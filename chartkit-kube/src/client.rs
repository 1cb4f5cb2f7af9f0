use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use kube::{Client, Config};
use serde_json::Value as JsonValue;
use tokio::runtime::Runtime;

use super::{Error, ErrorKind, Result};

const FIELD_MANAGER: &str = "chartkit";

fn to_kube_error(reason: impl ToString) -> kube::Error {
    kube::Error::Service(Box::<dyn std::error::Error + Send + Sync>::from(reason.to_string()))
}

fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn gvk(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = parse_api_version(api_version);
    GroupVersionKind::gvk(&group, &version, kind)
}

/// The capabilities every release operation needs from a cluster
/// connection: apply, fetch, remove and enumerate arbitrary-kind
/// resources, and poll a known workload kind for readiness. Kept as a
/// trait (rather than a concrete `DynamicKubeClient`) so `chartkit-engine`
/// can be exercised against a fake in tests, the same separation
/// `chartkit_core::getter::Getter` gives the resolver.
pub trait KubeClient: Send + Sync {
    /// Server-side apply (create-or-update) a single manifest.
    fn apply(&self, api_version: &str, kind: &str, namespace: Option<&str>, manifest: &JsonValue) -> Result<()>;

    fn get(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<Option<JsonValue>>;

    fn delete(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<()>;

    fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<JsonValue>>;

    /// Poll until the named resource satisfies its kind's readiness
    /// predicate or `timeout` elapses. Kinds with no known predicate
    /// (anything outside the common workload types) are treated as ready
    /// the moment they exist.
    fn wait_until_ready(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str, timeout: Duration) -> Result<()>;
}

/// The default `KubeClient`, built on the same `kube`/`k8s-openapi`
/// dependency pair the teacher repository pins, generalised from its
/// per-CRD `Api<T>` usage to `Api<DynamicObject>` against a
/// request-time-resolved `ApiResource`, since a release's manifests span
/// arbitrary kinds unknown at compile time.
pub struct DynamicKubeClient {
    client: Client,
    runtime: Mutex<Runtime>,
}

impl DynamicKubeClient {
    /// Connect using an explicit kubeconfig path, or cluster auto-detection
    /// (in-cluster service account, then the default kubeconfig lookup)
    /// when `kubeconfig_path` is `None`.
    pub fn connect(kubeconfig_path: Option<&Path>) -> Result<DynamicKubeClient> {
        let runtime = Runtime::new()?;
        let client = runtime.block_on(async {
            let config = match kubeconfig_path {
                Some(path) => {
                    let kubeconfig = Kubeconfig::read_from(path).map_err(to_kube_error)?;
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(to_kube_error)?
                }
                None => Config::infer().await.map_err(to_kube_error)?,
            };
            Client::try_from(config)
        })?;
        Ok(DynamicKubeClient {
            client,
            runtime: Mutex::new(runtime),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(&gvk(api_version, kind));
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.lock().expect("tokio runtime mutex poisoned").block_on(future)
    }
}

impl KubeClient for DynamicKubeClient {
    fn apply(&self, api_version: &str, kind: &str, namespace: Option<&str>, manifest: &JsonValue) -> Result<()> {
        let name = manifest
            .pointer("/metadata/name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::from(ErrorKind::ConnectionFailed("manifest has no metadata.name".to_string())))?
            .to_string();
        let api = self.api(api_version, kind, namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.block_on(async { api.patch(&name, &params, &Patch::Apply(manifest)).await })?;
        Ok(())
    }

    fn get(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<Option<JsonValue>> {
        let api = self.api(api_version, kind, namespace);
        match self.block_on(async { api.get(name).await }) {
            Ok(obj) => Ok(Some(serde_json::to_value(obj)?)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn delete(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<()> {
        let api = self.api(api_version, kind, namespace);
        match self.block_on(async { api.delete(name, &DeleteParams::default()).await }) {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<JsonValue>> {
        let api = self.api(api_version, kind, namespace);
        let params = match label_selector {
            Some(sel) => ListParams::default().labels(sel),
            None => ListParams::default(),
        };
        let list = self.block_on(async { api.list(&params).await })?;
        list.items.into_iter().map(|o| Ok(serde_json::to_value(o)?)).collect()
    }

    fn wait_until_ready(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.get(api_version, kind, namespace, name)?;
            if let Some(obj) = &current {
                if is_ready(kind, obj) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                bail!(super::ErrorKind::Timeout(kind.to_string(), name.to_string(), timeout.as_secs()));
            }
            std::thread::sleep(Duration::from_secs(2));
        }
    }
}

/// Readiness predicate for the small set of workload kinds that have a
/// meaningful "is this rolled out" status; anything else is considered
/// ready as soon as it exists, matching `wait`'s documented best-effort
/// scope (spec §4.7).
fn is_ready(kind: &str, obj: &JsonValue) -> bool {
    let status = obj.pointer("/status");
    match kind {
        "Deployment" | "ReplicaSet" => {
            let desired = obj.pointer("/spec/replicas").and_then(JsonValue::as_i64).unwrap_or(1);
            let available = status.and_then(|s| s.get("availableReplicas")).and_then(JsonValue::as_i64).unwrap_or(0);
            available >= desired
        }
        "StatefulSet" => {
            let desired = obj.pointer("/spec/replicas").and_then(JsonValue::as_i64).unwrap_or(1);
            let ready = status.and_then(|s| s.get("readyReplicas")).and_then(JsonValue::as_i64).unwrap_or(0);
            ready >= desired
        }
        "DaemonSet" => {
            let desired = status.and_then(|s| s.get("desiredNumberScheduled")).and_then(JsonValue::as_i64).unwrap_or(1);
            let ready = status.and_then(|s| s.get("numberReady")).and_then(JsonValue::as_i64).unwrap_or(0);
            ready >= desired
        }
        "Job" => status.and_then(|s| s.get("succeeded")).and_then(JsonValue::as_i64).unwrap_or(0) >= 1,
        "Pod" => status.and_then(|s| s.get("phase")).and_then(JsonValue::as_str) == Some("Running"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_group_from_grouped_api_version() {
        let (group, version) = parse_api_version("apps/v1");
        assert_eq!(group, "apps");
        assert_eq!(version, "v1");
    }

    #[test]
    fn core_api_version_has_no_group() {
        let (group, version) = parse_api_version("v1");
        assert_eq!(group, "");
        assert_eq!(version, "v1");
    }

    #[test]
    fn deployment_is_ready_when_available_replicas_meets_desired() {
        let obj = json!({"spec": {"replicas": 3}, "status": {"availableReplicas": 3}});
        assert!(is_ready("Deployment", &obj));
    }

    #[test]
    fn deployment_is_not_ready_when_under_replicated() {
        let obj = json!({"spec": {"replicas": 3}, "status": {"availableReplicas": 1}});
        assert!(!is_ready("Deployment", &obj));
    }

    #[test]
    fn job_is_ready_once_succeeded() {
        let obj = json!({"status": {"succeeded": 1}});
        assert!(is_ready("Job", &obj));
    }

    #[test]
    fn unknown_kind_is_ready_immediately() {
        let obj = json!({});
        assert!(is_ready("ConfigMap", &obj));
    }
}
