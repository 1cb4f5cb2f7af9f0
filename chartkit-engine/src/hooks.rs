//! Hook ordering and execution (spec §4.5 "Hook execution"). Each hook
//! runs its create+poll+delete-policy sequence on a scoped worker thread
//! while the caller observes the operation's `CancellationToken` via a
//! `mpsc::Receiver::recv_timeout` select loop, per §9's coroutine/select
//! redesign note.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use chartkit_kube::KubeClient;
use chartkit_render::{DeletePolicy, Hook};

use super::cancel::CancellationToken;
use super::{Error, ErrorKind, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const SELECT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
}

/// Run a set of hooks for one event, already ordered ascending by weight
/// then kind/namespace/name by `ManifestStream::hooks_for`. The first
/// failing hook stops the sequence and fails the surrounding operation.
pub fn run_all(client: &dyn KubeClient, namespace: &str, hooks: &[&Hook], cancel: &CancellationToken, timeout: Duration) -> Result<()> {
    for hook in hooks {
        run_one(client, hook, namespace, cancel, timeout)?;
    }
    Ok(())
}

fn run_one(client: &dyn KubeClient, hook: &Hook, namespace: &str, cancel: &CancellationToken, timeout: Duration) -> Result<()> {
    if hook.delete_policies.contains(&DeletePolicy::BeforeHookCreation) {
        client.delete(&hook.document.api_version, &hook.document.kind, Some(namespace), &hook.document.name)?;
    }

    let manifest: JsonValue = serde_json::to_value(&hook.document.raw)?;
    client.apply(&hook.document.api_version, &hook.document.kind, Some(namespace), &manifest)?;

    let outcome = wait_for_terminal(client, hook, namespace, cancel, timeout)?;

    let should_delete = match outcome {
        Outcome::Succeeded => hook.delete_policies.contains(&DeletePolicy::HookSucceeded),
        Outcome::Failed => hook.delete_policies.contains(&DeletePolicy::HookFailed),
    };
    if should_delete {
        client.delete(&hook.document.api_version, &hook.document.kind, Some(namespace), &hook.document.name)?;
    }

    match outcome {
        Outcome::Succeeded => Ok(()),
        Outcome::Failed => Err(Error::from(ErrorKind::HookFailed(hook.document.name.clone(), format!("{:?}", hook.events)))),
    }
}

fn wait_for_terminal(client: &dyn KubeClient, hook: &Hook, namespace: &str, cancel: &CancellationToken, timeout: Duration) -> Result<Outcome> {
    if !matches!(hook.document.kind.as_str(), "Pod" | "Job") {
        return Ok(Outcome::Succeeded);
    }

    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(|| {
            let result = poll_until_terminal(client, hook, namespace, timeout);
            let _ = tx.send(result);
        });

        loop {
            if cancel.is_cancelled() {
                return Err(Error::from(ErrorKind::Cancelled(format!("hook '{}'", hook.document.name))));
            }
            match rx.recv_timeout(SELECT_INTERVAL) {
                Ok(result) => return result,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Error::from(ErrorKind::HookFailed(
                        hook.document.name.clone(),
                        "hook worker thread terminated unexpectedly".to_string(),
                    )));
                }
            }
        }
    })
}

fn poll_until_terminal(client: &dyn KubeClient, hook: &Hook, namespace: &str, timeout: Duration) -> Result<Outcome> {
    let deadline = Instant::now() + timeout;
    loop {
        let obj = client.get(&hook.document.api_version, &hook.document.kind, Some(namespace), &hook.document.name)?;
        if let Some(outcome) = terminal_outcome(&hook.document.kind, obj.as_ref()) {
            return Ok(outcome);
        }
        if Instant::now() >= deadline {
            return Err(Error::from(ErrorKind::Timeout(format!("hook '{}'", hook.document.name), timeout.as_secs())));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn terminal_outcome(kind: &str, obj: Option<&JsonValue>) -> Option<Outcome> {
    let status = obj?.pointer("/status");
    match kind {
        "Pod" => match status.and_then(|s| s.get("phase")).and_then(JsonValue::as_str) {
            Some("Succeeded") => Some(Outcome::Succeeded),
            Some("Failed") => Some(Outcome::Failed),
            _ => None,
        },
        "Job" => {
            let succeeded = status.and_then(|s| s.get("succeeded")).and_then(JsonValue::as_i64).unwrap_or(0);
            let failed = status.and_then(|s| s.get("failed")).and_then(JsonValue::as_i64).unwrap_or(0);
            if succeeded >= 1 {
                Some(Outcome::Succeeded)
            } else if failed >= 1 {
                Some(Outcome::Failed)
            } else {
                None
            }
        }
        _ => Some(Outcome::Succeeded),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use serde_json::json;

    use chartkit_render::{Document, HookEvent};

    use super::*;

    struct FakeClient {
        objects: Mutex<BTreeMap<String, JsonValue>>,
    }

    impl FakeClient {
        fn new() -> FakeClient {
            FakeClient { objects: Mutex::new(BTreeMap::new()) }
        }

        fn seed(&self, name: &str, obj: JsonValue) {
            self.objects.lock().unwrap().insert(name.to_string(), obj);
        }
    }

    impl KubeClient for FakeClient {
        fn apply(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, manifest: &JsonValue) -> Result<()> {
            let name = manifest.pointer("/metadata/name").and_then(JsonValue::as_str).unwrap().to_string();
            self.objects.lock().unwrap().entry(name).or_insert_with(|| manifest.clone());
            Ok(())
        }

        fn get(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, name: &str) -> Result<Option<JsonValue>> {
            Ok(self.objects.lock().unwrap().get(name).cloned())
        }

        fn delete(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, name: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(name);
            Ok(())
        }

        fn list(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, _label_selector: Option<&str>) -> Result<Vec<JsonValue>> {
            Ok(self.objects.lock().unwrap().values().cloned().collect())
        }

        fn wait_until_ready(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, _name: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn job_hook(name: &str, delete_policies: Vec<DeletePolicy>) -> Hook {
        Hook {
            document: Document {
                source_path: "templates/hook.yaml".to_string(),
                kind: "Job".to_string(),
                api_version: "batch/v1".to_string(),
                namespace: None,
                name: name.to_string(),
                raw: serde_yaml::to_value(json!({
                    "apiVersion": "batch/v1",
                    "kind": "Job",
                    "metadata": {"name": name},
                }))
                .unwrap(),
            },
            events: vec![HookEvent::PreInstall],
            weight: 0,
            delete_policies,
        }
    }

    #[test]
    fn succeeded_job_completes_without_error() {
        let client = FakeClient::new();
        client.seed("migrate", json!({"status": {"succeeded": 1}}));
        let hook = job_hook("migrate", vec![]);
        let cancel = CancellationToken::new();
        let result = run_one(&client, &hook, "default", &cancel, Duration::from_secs(5));
        assert!(result.is_ok());
    }

    #[test]
    fn failed_job_surfaces_hook_failed_error() {
        let client = FakeClient::new();
        client.seed("migrate", json!({"status": {"failed": 1}}));
        let hook = job_hook("migrate", vec![]);
        let cancel = CancellationToken::new();
        let result = run_one(&client, &hook, "default", &cancel, Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[test]
    fn hook_succeeded_delete_policy_removes_resource_on_success() {
        let client = FakeClient::new();
        client.seed("migrate", json!({"status": {"succeeded": 1}}));
        let hook = job_hook("migrate", vec![DeletePolicy::HookSucceeded]);
        let cancel = CancellationToken::new();
        run_one(&client, &hook, "default", &cancel, Duration::from_secs(5)).unwrap();
        assert!(client.objects.lock().unwrap().get("migrate").is_none());
    }

    #[test]
    fn configmap_hook_completes_immediately_on_creation() {
        let client = FakeClient::new();
        let mut hook = job_hook("seed-data", vec![]);
        hook.document.kind = "ConfigMap".to_string();
        hook.document.api_version = "v1".to_string();
        let cancel = CancellationToken::new();
        let result = run_one(&client, &hook, "default", &cancel, Duration::from_secs(5));
        assert!(result.is_ok());
    }
}
