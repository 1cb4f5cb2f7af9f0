use std::collections::BTreeMap;

use serde::Deserialize;
use serde_yaml::Value as YamlValue;

use super::{Error, ErrorKind, Result};

const HOOK_ANNOTATION: &str = "chartkit.io/hook";
const HOOK_WEIGHT_ANNOTATION: &str = "chartkit.io/hook-weight";
const HOOK_DELETE_POLICY_ANNOTATION: &str = "chartkit.io/hook-delete-policy";

/// A single parsed Kubernetes manifest, still carrying the path of the
/// template it was rendered from (for error messages and deterministic
/// tie-breaking in the install/uninstall ordering).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub source_path: String,
    pub kind: String,
    pub api_version: String,
    pub namespace: Option<String>,
    pub name: String,
    pub raw: YamlValue,
}

impl Document {
    fn parse(source_path: &str, raw: YamlValue) -> Result<Document> {
        let mapping = raw.as_mapping().ok_or_else(|| {
            Error::from(ErrorKind::RenderFailure(
                source_path.to_string(),
                0,
                "document is not a YAML mapping".to_string(),
            ))
        })?;
        let get_str = |key: &str| -> Option<String> {
            mapping
                .get(&YamlValue::String(key.to_string()))
                .and_then(YamlValue::as_str)
                .map(str::to_string)
        };
        let kind = get_str("kind").ok_or_else(|| {
            Error::from(ErrorKind::RenderFailure(source_path.to_string(), 0, "document has no kind".to_string()))
        })?;
        let api_version = get_str("apiVersion").unwrap_or_default();
        let metadata = mapping.get(&YamlValue::String("metadata".to_string()));
        let name = metadata
            .and_then(YamlValue::as_mapping)
            .and_then(|m| m.get(&YamlValue::String("name".to_string())))
            .and_then(YamlValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::from(ErrorKind::RenderFailure(source_path.to_string(), 0, "document has no metadata.name".to_string()))
            })?;
        let namespace = metadata
            .and_then(YamlValue::as_mapping)
            .and_then(|m| m.get(&YamlValue::String("namespace".to_string())))
            .and_then(YamlValue::as_str)
            .map(str::to_string);
        Ok(Document {
            source_path: source_path.to_string(),
            kind,
            api_version,
            namespace,
            name,
            raw,
        })
    }

    fn annotation(&self, key: &str) -> Option<String> {
        self.raw
            .as_mapping()?
            .get(&YamlValue::String("metadata".to_string()))?
            .as_mapping()?
            .get(&YamlValue::String("annotations".to_string()))?
            .as_mapping()?
            .get(&YamlValue::String(key.to_string()))?
            .as_str()
            .map(str::to_string)
    }
}

/// When a hook resource is deleted relative to its own lifecycle, mirroring
/// Helm's own hook-deletion annotation values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
    BeforeHookCreation,
    HookSucceeded,
    HookFailed,
}

impl DeletePolicy {
    fn parse(raw: &str) -> Option<DeletePolicy> {
        match raw.trim() {
            "before-hook-creation" => Some(DeletePolicy::BeforeHookCreation),
            "hook-succeeded" => Some(DeletePolicy::HookSucceeded),
            "hook-failed" => Some(DeletePolicy::HookFailed),
            _ => None,
        }
    }
}

/// The lifecycle point a hook resource fires on (spec §4.4's hook event
/// taxonomy, plus the two test outcomes used by the `test` operation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    TestSuccess,
    TestFailure,
}

impl HookEvent {
    fn parse(raw: &str) -> Option<HookEvent> {
        match raw.trim() {
            "pre-install" => Some(HookEvent::PreInstall),
            "post-install" => Some(HookEvent::PostInstall),
            "pre-upgrade" => Some(HookEvent::PreUpgrade),
            "post-upgrade" => Some(HookEvent::PostUpgrade),
            "pre-rollback" => Some(HookEvent::PreRollback),
            "post-rollback" => Some(HookEvent::PostRollback),
            "pre-delete" => Some(HookEvent::PreDelete),
            "post-delete" => Some(HookEvent::PostDelete),
            "test" | "test-success" => Some(HookEvent::TestSuccess),
            "test-failure" => Some(HookEvent::TestFailure),
            _ => None,
        }
    }
}

/// A document whose annotations mark it as a hook rather than a regular
/// release resource: it is applied and tracked separately from the main
/// manifest stream, at the weight-ordered point in the lifecycle its events
/// name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hook {
    pub document: Document,
    pub events: Vec<HookEvent>,
    pub weight: i32,
    pub delete_policies: Vec<DeletePolicy>,
}

/// A rendered chart's manifests split into ordered regular resources and
/// hooks grouped by the event that triggers them (spec §4.4).
#[derive(Clone, Debug, Default)]
pub struct ManifestStream {
    pub resources: Vec<Document>,
    pub hooks: Vec<Hook>,
}

/// Fixed install-order kind rubric (spec §4.4): resources are applied in
/// this order during install/upgrade, and in reverse during uninstall.
/// Anything not named here sorts after everything that is.
const KIND_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

fn kind_rank(kind: &str) -> usize {
    KIND_ORDER.iter().position(|k| *k == kind).unwrap_or(KIND_ORDER.len())
}

fn sort_key(doc: &Document) -> (usize, &str, &str, &str) {
    (
        kind_rank(&doc.kind),
        doc.namespace.as_deref().unwrap_or(""),
        doc.name.as_str(),
        doc.source_path.as_str(),
    )
}

impl ManifestStream {
    /// Split a renderer's flat `path -> rendered YAML text` map into
    /// ordered resources and classified hooks. Empty and comment-only
    /// documents (a template that rendered to nothing) are silently
    /// dropped, matching a template author's ability to conditionally emit
    /// zero resources.
    pub fn from_rendered(manifests: &BTreeMap<String, String>) -> Result<ManifestStream> {
        let mut resources = Vec::new();
        let mut hooks = Vec::new();
        for (path, text) in manifests {
            for raw in serde_yaml::Deserializer::from_str(text) {
                let value = YamlValue::deserialize(raw)?;
                if value.is_null() {
                    continue;
                }
                let doc = Document::parse(path, value)?;
                if let Some(raw_events) = doc.annotation(HOOK_ANNOTATION) {
                    let events: Vec<HookEvent> = raw_events.split(',').filter_map(HookEvent::parse).collect();
                    if events.is_empty() {
                        bail!(ErrorKind::RenderFailure(path.clone(), 0, format!("unrecognized hook event(s) '{}'", raw_events)));
                    }
                    let weight = doc
                        .annotation(HOOK_WEIGHT_ANNOTATION)
                        .and_then(|w| w.parse::<i32>().ok())
                        .unwrap_or(0);
                    let delete_policies = doc
                        .annotation(HOOK_DELETE_POLICY_ANNOTATION)
                        .map(|raw| raw.split(',').filter_map(|p| DeletePolicy::parse(p)).collect())
                        .unwrap_or_else(|| vec![DeletePolicy::BeforeHookCreation]);
                    hooks.push(Hook {
                        document: doc,
                        events,
                        weight,
                        delete_policies,
                    });
                } else {
                    resources.push(doc);
                }
            }
        }
        resources.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        hooks.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| sort_key(&a.document).cmp(&sort_key(&b.document))));
        Ok(ManifestStream { resources, hooks })
    }

    /// Resources in uninstall order: the exact reverse of install order.
    pub fn uninstall_order(&self) -> Vec<&Document> {
        self.resources.iter().rev().collect()
    }

    /// Hooks registered for a given lifecycle event, in ascending weight
    /// order (ties broken by kind/namespace/name for determinism).
    pub fn hooks_for(&self, event: HookEvent) -> Vec<&Hook> {
        self.hooks.iter().filter(|h| h.events.contains(&event)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(kind: &str, name: &str) -> String {
        format!("apiVersion: v1\nkind: {}\nmetadata:\n  name: {}\n", kind, name)
    }

    #[test]
    fn splits_hook_from_regular_resource() {
        let mut manifests = BTreeMap::new();
        manifests.insert("a".to_string(), rendered("Deployment", "web"));
        manifests.insert(
            "b".to_string(),
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n  annotations:\n    chartkit.io/hook: pre-install\n".to_string(),
        );
        let stream = ManifestStream::from_rendered(&manifests).unwrap();
        assert_eq!(stream.resources.len(), 1);
        assert_eq!(stream.hooks.len(), 1);
        assert_eq!(stream.hooks[0].events, vec![HookEvent::PreInstall]);
    }

    #[test]
    fn install_order_respects_kind_rubric() {
        let mut manifests = BTreeMap::new();
        manifests.insert("a".to_string(), rendered("Deployment", "web"));
        manifests.insert("b".to_string(), rendered("Namespace", "ns"));
        manifests.insert("c".to_string(), rendered("ConfigMap", "cfg"));
        let stream = ManifestStream::from_rendered(&manifests).unwrap();
        let kinds: Vec<&str> = stream.resources.iter().map(|d| d.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Namespace", "ConfigMap", "Deployment"]);
    }

    #[test]
    fn uninstall_order_is_exact_reverse() {
        let mut manifests = BTreeMap::new();
        manifests.insert("a".to_string(), rendered("Deployment", "web"));
        manifests.insert("b".to_string(), rendered("Namespace", "ns"));
        let stream = ManifestStream::from_rendered(&manifests).unwrap();
        let install: Vec<String> = stream.resources.iter().map(|d| d.kind.clone()).collect();
        let uninstall: Vec<String> = stream.uninstall_order().into_iter().map(|d| d.kind.clone()).collect();
        let mut reversed = install.clone();
        reversed.reverse();
        assert_eq!(uninstall, reversed);
    }

    #[test]
    fn empty_yaml_documents_are_dropped() {
        let mut manifests = BTreeMap::new();
        manifests.insert("a".to_string(), "\n---\n\n".to_string());
        let stream = ManifestStream::from_rendered(&manifests).unwrap();
        assert!(stream.resources.is_empty());
        assert!(stream.hooks.is_empty());
    }

    #[test]
    fn hook_without_explicit_delete_policy_defaults_to_before_hook_creation() {
        let mut manifests = BTreeMap::new();
        manifests.insert(
            "a".to_string(),
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n  annotations:\n    chartkit.io/hook: pre-install\n".to_string(),
        );
        let stream = ManifestStream::from_rendered(&manifests).unwrap();
        assert_eq!(stream.hooks[0].delete_policies, vec![DeletePolicy::BeforeHookCreation]);
    }

    #[test]
    fn hooks_sort_by_weight_then_name() {
        let mut manifests = BTreeMap::new();
        manifests.insert(
            "a".to_string(),
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: second\n  annotations:\n    chartkit.io/hook: pre-install\n    chartkit.io/hook-weight: \"5\"\n".to_string(),
        );
        manifests.insert(
            "b".to_string(),
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: first\n  annotations:\n    chartkit.io/hook: pre-install\n    chartkit.io/hook-weight: \"-5\"\n".to_string(),
        );
        let stream = ManifestStream::from_rendered(&manifests).unwrap();
        let names: Vec<&str> = stream.hooks.iter().map(|h| h.document.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
