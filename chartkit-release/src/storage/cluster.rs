//! Cluster-hosted storage drivers: one Kubernetes object per revision, body
//! gzip-compressed then base64-encoded (spec §6 "Storage layout"), labelled
//! for name/revision/status/owner so `list`/`history` can use a label
//! selector instead of scanning every object in the namespace.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use chartkit_kube::KubeClient;

use super::super::release::{Release, Status};
use super::super::{Error, ErrorKind, Result};
use super::ReleaseStorage;

const OWNER_LABEL: &str = "chartkit.io/owner";
const OWNER_VALUE: &str = "chartkit";
const NAME_LABEL: &str = "chartkit.io/name";
const REVISION_LABEL: &str = "chartkit.io/revision";
const STATUS_LABEL: &str = "chartkit.io/status";
const DATA_KEY: &str = "release";

fn object_name(release_name: &str, revision: u32) -> String {
    format!("chartkit.{}.v{}", release_name, revision)
}

fn encode(release: &Release) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(base64::encode(compressed))
}

fn decode(body: &str) -> Result<Release> {
    let compressed = base64::decode(body).map_err(|e| Error::from(ErrorKind::Msg(format!("invalid base64 release body: {}", e))))?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

fn manifest(kind: &str, release: &Release) -> Result<serde_json::Value> {
    let name = object_name(&release.name, release.revision);
    let body = encode(release)?;
    Ok(json!({
        "apiVersion": "v1",
        "kind": kind,
        "metadata": {
            "name": name,
            "namespace": release.namespace,
            "labels": {
                OWNER_LABEL: OWNER_VALUE,
                NAME_LABEL: release.name,
                REVISION_LABEL: release.revision.to_string(),
                STATUS_LABEL: release.status.to_string(),
            },
        },
        "data": { DATA_KEY: body },
    }))
}

fn release_from_object(obj: &serde_json::Value) -> Result<Release> {
    let body = obj
        .pointer(&format!("/data/{}", DATA_KEY))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::from(ErrorKind::Msg("storage object has no release body".to_string())))?;
    decode(body)
}

/// Shared implementation for the two cluster-hosted drivers, which differ
/// only in the Kubernetes `kind`/`apiVersion` they store into (`Secret` vs
/// `ConfigMap`).
struct ClusterStorage<'a> {
    client: &'a dyn KubeClient,
    namespace: String,
    kind: &'static str,
    api_version: &'static str,
}

impl<'a> ClusterStorage<'a> {
    fn put(&self, release: &Release) -> Result<()> {
        let body = manifest(self.kind, release)?;
        self.client.apply(self.api_version, self.kind, Some(&self.namespace), &body)?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Release>> {
        let selector = format!("{}={}", OWNER_LABEL, OWNER_VALUE);
        let objs = self.client.list(self.api_version, self.kind, Some(&self.namespace), Some(&selector))?;
        objs.iter().map(release_from_object).collect()
    }
}

/// A cluster-hosted driver storing each release revision as a `Secret`, the
/// default for releases carrying sensitive values.
pub struct SecretStorage<'a> {
    inner: ClusterStorage<'a>,
}

impl<'a> SecretStorage<'a> {
    pub fn new(client: &'a dyn KubeClient, namespace: &str) -> SecretStorage<'a> {
        SecretStorage {
            inner: ClusterStorage {
                client,
                namespace: namespace.to_string(),
                kind: "Secret",
                api_version: "v1",
            },
        }
    }
}

/// A cluster-hosted driver storing each release revision as a `ConfigMap`,
/// for clusters/operators that prefer not to use `Secret` for release
/// bookkeeping.
pub struct ConfigMapStorage<'a> {
    inner: ClusterStorage<'a>,
}

impl<'a> ConfigMapStorage<'a> {
    pub fn new(client: &'a dyn KubeClient, namespace: &str) -> ConfigMapStorage<'a> {
        ConfigMapStorage {
            inner: ClusterStorage {
                client,
                namespace: namespace.to_string(),
                kind: "ConfigMap",
                api_version: "v1",
            },
        }
    }
}

macro_rules! impl_release_storage {
    ($ty:ident) => {
        impl<'a> ReleaseStorage for $ty<'a> {
            fn create(&self, release: &Release) -> Result<()> {
                if self.inner.client.get(
                    self.inner.api_version,
                    self.inner.kind,
                    Some(&self.inner.namespace),
                    &object_name(&release.name, release.revision),
                )?.is_some() {
                    bail!(ErrorKind::AlreadyExists(release.name.clone()));
                }
                self.inner.put(release)
            }

            fn update(&self, release: &Release) -> Result<()> {
                self.inner.put(release)
            }

            fn get(&self, name: &str, revision: u32) -> Result<Option<Release>> {
                let obj = self.inner.client.get(
                    self.inner.api_version,
                    self.inner.kind,
                    Some(&self.inner.namespace),
                    &object_name(name, revision),
                )?;
                obj.as_ref().map(release_from_object).transpose()
            }

            fn last(&self, name: &str) -> Result<Option<Release>> {
                Ok(self.history(name)?.into_iter().max_by_key(|r| r.revision))
            }

            fn history(&self, name: &str) -> Result<Vec<Release>> {
                let mut releases: Vec<Release> = self.inner.list_all()?.into_iter().filter(|r| r.name == name).collect();
                releases.sort_by_key(|r| r.revision);
                Ok(releases)
            }

            fn delete(&self, name: &str, revision: u32) -> Result<Option<Release>> {
                let existing = self.get(name, revision)?;
                self.inner.client.delete(
                    self.inner.api_version,
                    self.inner.kind,
                    Some(&self.inner.namespace),
                    &object_name(name, revision),
                )?;
                Ok(existing)
            }

            fn delete_all(&self, name: &str) -> Result<()> {
                for release in self.history(name)? {
                    self.delete(name, release.revision)?;
                }
                Ok(())
            }

            fn deployed_all(&self) -> Result<Vec<Release>> {
                Ok(self.inner.list_all()?.into_iter().filter(|r| r.status == Status::Deployed).collect())
            }

            fn list(&self, predicate: &dyn Fn(&Release) -> bool) -> Result<Vec<Release>> {
                Ok(self.inner.list_all()?.into_iter().filter(|r| predicate(r)).collect())
            }
        }
    };
}

impl_release_storage!(SecretStorage);
impl_release_storage!(ConfigMapStorage);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ApplyMethod;
    use chartkit_core::chart::{ChartType, Metadata};
    use chartkit_core::Chart;
    use chartkit_values::Value;
    use chrono::Utc;
    use serde_json::Value as JsonValue;
    use std::collections::BTreeMap as Map;
    use std::sync::Mutex;

    fn minimal_chart() -> Chart {
        Chart {
            metadata: Metadata {
                api_version: "v2".to_string(),
                name: "hello".to_string(),
                version: "1.0.0".to_string(),
                kind: ChartType::Application,
                app_version: None,
                description: None,
                kube_version: None,
                keywords: vec![],
                home: None,
                sources: vec![],
                dependencies: vec![],
                maintainers: vec![],
                icon: None,
                deprecated: false,
                annotations: Default::default(),
            },
            values: Value::empty_mapping(),
            schema: None,
            templates: Map::new(),
            notes: None,
            files: Map::new(),
            crds: Map::new(),
            charts: vec![],
            lock: None,
            legacy_requirements: None,
        }
    }

    fn release(name: &str, revision: u32, status: Status) -> Release {
        Release::new_pending(
            name,
            "default",
            revision,
            minimal_chart(),
            Value::empty_mapping(),
            "kind: ConfigMap".to_string(),
            vec![],
            status,
            Utc::now(),
            ApplyMethod::ServerSideApply,
        )
        .unwrap()
    }

    /// A fake `KubeClient` that keeps applied objects in memory, enough to
    /// exercise `ClusterStorage`'s own logic without a real cluster.
    #[derive(Default)]
    struct FakeClient {
        objects: Mutex<Vec<JsonValue>>,
    }

    impl KubeClient for FakeClient {
        fn apply(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, manifest: &JsonValue) -> chartkit_kube::Result<()> {
            let name = manifest.pointer("/metadata/name").and_then(JsonValue::as_str).unwrap().to_string();
            let mut objects = self.objects.lock().unwrap();
            objects.retain(|o| o.pointer("/metadata/name").and_then(JsonValue::as_str) != Some(name.as_str()));
            objects.push(manifest.clone());
            Ok(())
        }

        fn get(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, name: &str) -> chartkit_kube::Result<Option<JsonValue>> {
            let objects = self.objects.lock().unwrap();
            Ok(objects.iter().find(|o| o.pointer("/metadata/name").and_then(JsonValue::as_str) == Some(name)).cloned())
        }

        fn delete(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, name: &str) -> chartkit_kube::Result<()> {
            let mut objects = self.objects.lock().unwrap();
            objects.retain(|o| o.pointer("/metadata/name").and_then(JsonValue::as_str) != Some(name));
            Ok(())
        }

        fn list(
            &self,
            _api_version: &str,
            _kind: &str,
            _namespace: Option<&str>,
            _label_selector: Option<&str>,
        ) -> chartkit_kube::Result<Vec<JsonValue>> {
            Ok(self.objects.lock().unwrap().clone())
        }

        fn wait_until_ready(
            &self,
            _api_version: &str,
            _kind: &str,
            _namespace: Option<&str>,
            _name: &str,
            _timeout: std::time::Duration,
        ) -> chartkit_kube::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn create_then_get_round_trips_through_gzip_base64() {
        let client = FakeClient::default();
        let storage = SecretStorage::new(&client, "default");
        let r = release("r1", 1, Status::Deployed);
        storage.create(&r).unwrap();
        let fetched = storage.get("r1", 1).unwrap().unwrap();
        assert_eq!(fetched.name, "r1");
        assert_eq!(fetched.manifest, r.manifest);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let client = FakeClient::default();
        let storage = SecretStorage::new(&client, "default");
        let r = release("r1", 1, Status::Deployed);
        storage.create(&r).unwrap();
        assert!(storage.create(&r).is_err());
    }

    #[test]
    fn history_sorts_ascending_by_revision() {
        let client = FakeClient::default();
        let storage = ConfigMapStorage::new(&client, "default");
        storage.create(&release("r1", 2, Status::Deployed)).unwrap();
        storage.create(&release("r1", 1, Status::Superseded)).unwrap();
        let history = storage.history("r1").unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![1, 2]);
    }
}
