use std::collections::BTreeMap;
use std::sync::Mutex;

use super::super::release::Release;
use super::super::{Error, ErrorKind, Result};
use super::ReleaseStorage;

/// A `Mutex`-guarded in-memory store, keyed by `(name, revision)`. Safe for
/// concurrent readers and writers alike (spec §5); intended for tests and
/// for callers that don't need the record to survive the process.
#[derive(Default)]
pub struct InMemoryStorage {
    records: Mutex<BTreeMap<(String, u32), Release>>,
}

impl InMemoryStorage {
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }
}

impl ReleaseStorage for InMemoryStorage {
    fn create(&self, release: &Release) -> Result<()> {
        let mut records = self.records.lock().expect("release storage mutex poisoned");
        let key = release.key();
        if records.contains_key(&key) {
            bail!(ErrorKind::AlreadyExists(release.name.clone()));
        }
        records.insert(key, release.clone());
        Ok(())
    }

    fn update(&self, release: &Release) -> Result<()> {
        let mut records = self.records.lock().expect("release storage mutex poisoned");
        let key = release.key();
        if !records.contains_key(&key) {
            bail!(ErrorKind::NotFound(release.name.clone(), release.revision));
        }
        records.insert(key, release.clone());
        Ok(())
    }

    fn get(&self, name: &str, revision: u32) -> Result<Option<Release>> {
        let records = self.records.lock().expect("release storage mutex poisoned");
        Ok(records.get(&(name.to_string(), revision)).cloned())
    }

    fn last(&self, name: &str) -> Result<Option<Release>> {
        let records = self.records.lock().expect("release storage mutex poisoned");
        Ok(records
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, r)| r.clone())
            .max_by_key(|r| r.revision))
    }

    fn history(&self, name: &str) -> Result<Vec<Release>> {
        let records = self.records.lock().expect("release storage mutex poisoned");
        let mut out: Vec<Release> = records
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by_key(|r| r.revision);
        Ok(out)
    }

    fn delete(&self, name: &str, revision: u32) -> Result<Option<Release>> {
        let mut records = self.records.lock().expect("release storage mutex poisoned");
        Ok(records.remove(&(name.to_string(), revision)))
    }

    fn delete_all(&self, name: &str) -> Result<()> {
        let mut records = self.records.lock().expect("release storage mutex poisoned");
        let keys: Vec<(String, u32)> = records.keys().filter(|(n, _)| n == name).cloned().collect();
        for key in keys {
            records.remove(&key);
        }
        Ok(())
    }

    fn deployed_all(&self) -> Result<Vec<Release>> {
        let records = self.records.lock().expect("release storage mutex poisoned");
        Ok(records
            .values()
            .filter(|r| r.status == super::super::release::Status::Deployed)
            .cloned()
            .collect())
    }

    fn list(&self, predicate: &dyn Fn(&Release) -> bool) -> Result<Vec<Release>> {
        let records = self.records.lock().expect("release storage mutex poisoned");
        Ok(records.values().filter(|r| predicate(r)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ApplyMethod, Status};
    use chartkit_core::chart::{ChartType, Metadata};
    use chartkit_core::Chart;
    use chartkit_values::Value;
    use chrono::Utc;
    use std::collections::BTreeMap as Map;

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

    #[test]
    fn create_then_get_round_trips() {
        let storage = InMemoryStorage::new();
        let r = release("r1", 1, Status::Deployed);
        storage.create(&r).unwrap();
        let fetched = storage.get("r1", 1).unwrap().unwrap();
        assert_eq!(fetched.name, "r1");
        assert_eq!(fetched.revision, 1);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let storage = InMemoryStorage::new();
        let r = release("r1", 1, Status::Deployed);
        storage.create(&r).unwrap();
        assert!(storage.create(&r).is_err());
    }

    #[test]
    fn last_returns_highest_revision() {
        let storage = InMemoryStorage::new();
        storage.create(&release("r1", 1, Status::Superseded)).unwrap();
        storage.create(&release("r1", 2, Status::Deployed)).unwrap();
        let last = storage.last("r1").unwrap().unwrap();
        assert_eq!(last.revision, 2);
    }

    #[test]
    fn history_is_ascending_by_revision() {
        let storage = InMemoryStorage::new();
        storage.create(&release("r1", 2, Status::Deployed)).unwrap();
        storage.create(&release("r1", 1, Status::Superseded)).unwrap();
        let history = storage.history("r1").unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![1, 2]);
    }

    #[test]
    fn prune_keeps_live_revisions_regardless_of_max_history() {
        let storage = InMemoryStorage::new();
        storage.create(&release("r1", 1, Status::Superseded)).unwrap();
        storage.create(&release("r1", 2, Status::Superseded)).unwrap();
        storage.create(&release("r1", 3, Status::Deployed)).unwrap();
        storage.prune("r1", 1).unwrap();
        let history = storage.history("r1").unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![2, 3]);
    }

    #[test]
    fn deployed_all_returns_only_deployed_status() {
        let storage = InMemoryStorage::new();
        storage.create(&release("r1", 1, Status::Superseded)).unwrap();
        storage.create(&release("r1", 2, Status::Deployed)).unwrap();
        let deployed = storage.deployed_all().unwrap();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].revision, 2);
    }
}
