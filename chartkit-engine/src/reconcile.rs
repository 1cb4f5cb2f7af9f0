//! Resource reconciliation between a release's previous and next manifest
//! (spec §4.5 "Upgrade"), plus the adoption check an install runs against
//! resources that already exist in the cluster.

use std::collections::BTreeMap;

use chartkit_kube::KubeClient;
use chartkit_render::Document;

use super::{Error, ErrorKind, Result};

const OWNER_ANNOTATION: &str = "chartkit.io/release-name";

fn key(doc: &Document) -> (String, Option<String>, String) {
    (doc.kind.clone(), doc.namespace.clone(), doc.name.clone())
}

/// The three-way split between a release's previous manifest and its next
/// one: resources only in the old set (to delete, in uninstall order),
/// resources in both (to update), and resources only in the new set (to
/// create, in install order).
pub struct Diff<'a> {
    pub to_delete: Vec<&'a Document>,
    pub to_update: Vec<&'a Document>,
    pub to_create: Vec<&'a Document>,
}

/// Compare the previous revision's sorted resources against the next
/// revision's, matching by (kind, namespace, name). `old` and `new` are
/// expected in install order already; `to_delete` is returned reversed
/// (uninstall order) per spec §4.5.
pub fn diff<'a>(old: &'a [Document], new: &'a [Document]) -> Diff<'a> {
    let old_keys: BTreeMap<(String, Option<String>, String), &Document> = old.iter().map(|d| (key(d), d)).collect();
    let new_keys: BTreeMap<(String, Option<String>, String), &Document> = new.iter().map(|d| (key(d), d)).collect();

    let mut to_delete: Vec<&Document> = old.iter().filter(|d| !new_keys.contains_key(&key(d))).collect();
    to_delete.reverse();
    let to_update: Vec<&Document> = new.iter().filter(|d| old_keys.contains_key(&key(d))).collect();
    let to_create: Vec<&Document> = new.iter().filter(|d| !old_keys.contains_key(&key(d))).collect();

    Diff { to_delete, to_update, to_create }
}

/// Whether an object pinned against deletion by annotation (the
/// `resource-policy: keep` idiom a release author can attach to a resource
/// they want to survive an upgrade that would otherwise remove it).
fn is_pinned(obj: &serde_json::Value) -> bool {
    obj.pointer("/metadata/annotations/chartkit.io~1resource-policy")
        .and_then(serde_json::Value::as_str)
        == Some("keep")
}

/// Check that every resource about to be created by an install is either
/// absent from the cluster or already owned by `release_name`. An existing,
/// unowned resource blocks the install rather than being silently adopted.
pub fn check_adoptable(client: &dyn KubeClient, namespace: &str, resources: &[Document], release_name: &str) -> Result<()> {
    for doc in resources {
        let existing = client.get(&doc.api_version, &doc.kind, Some(namespace), &doc.name)?;
        if let Some(obj) = existing {
            let owner = obj
                .pointer(&format!("/metadata/annotations/{}", OWNER_ANNOTATION.replace('/', "~1")))
                .and_then(serde_json::Value::as_str);
            if owner != Some(release_name) {
                return Err(Error::from(ErrorKind::ResourceNotOwned(
                    doc.kind.clone(),
                    doc.name.clone(),
                    owner.unwrap_or("<none>").to_string(),
                )));
            }
        }
    }
    Ok(())
}

/// Apply a resource set in the given order, stamping the release-ownership
/// annotation so a later adoption check or reconcile can recognise it.
pub fn apply_all(client: &dyn KubeClient, namespace: &str, resources: &[&Document], release_name: &str) -> Result<()> {
    for doc in resources {
        let mut manifest = serde_json::to_value(&doc.raw)?;
        stamp_owner(&mut manifest, release_name);
        client.apply(&doc.api_version, &doc.kind, Some(namespace), &manifest)?;
    }
    Ok(())
}

/// Delete a resource set, skipping anything pinned with the `keep`
/// resource-policy annotation (spec §4.5 "Upgrade": "unless pinned by
/// annotation").
pub fn delete_all_unpinned(client: &dyn KubeClient, namespace: &str, resources: &[&Document]) -> Result<()> {
    for doc in resources {
        if let Some(obj) = client.get(&doc.api_version, &doc.kind, Some(namespace), &doc.name)? {
            if is_pinned(&obj) {
                continue;
            }
        }
        client.delete(&doc.api_version, &doc.kind, Some(namespace), &doc.name)?;
    }
    Ok(())
}

fn stamp_owner(manifest: &mut serde_json::Value, release_name: &str) {
    let annotations = manifest
        .pointer_mut("/metadata")
        .and_then(|m| m.as_object_mut())
        .map(|m| m.entry("annotations").or_insert_with(|| serde_json::json!({})));
    if let Some(annotations) = annotations {
        if let Some(map) = annotations.as_object_mut() {
            map.insert(OWNER_ANNOTATION.to_string(), serde_json::Value::String(release_name.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(kind: &str, name: &str) -> Document {
        Document {
            source_path: format!("templates/{}.yaml", name),
            kind: kind.to_string(),
            api_version: "v1".to_string(),
            namespace: None,
            name: name.to_string(),
            raw: serde_yaml::to_value(serde_json::json!({"kind": kind, "metadata": {"name": name}})).unwrap(),
        }
    }

    #[test]
    fn diff_classifies_create_update_delete() {
        let old = vec![doc("ConfigMap", "a"), doc("ConfigMap", "b")];
        let new = vec![doc("ConfigMap", "a"), doc("ConfigMap", "c")];
        let d = diff(&old, &new);
        let deleted: Vec<&str> = d.to_delete.iter().map(|x| x.name.as_str()).collect();
        let updated: Vec<&str> = d.to_update.iter().map(|x| x.name.as_str()).collect();
        let created: Vec<&str> = d.to_create.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(deleted, vec!["b"]);
        assert_eq!(updated, vec!["a"]);
        assert_eq!(created, vec!["c"]);
    }

    #[test]
    fn diff_of_identical_sets_has_nothing_to_create_or_delete() {
        let old = vec![doc("ConfigMap", "a")];
        let new = vec![doc("ConfigMap", "a")];
        let d = diff(&old, &new);
        assert!(d.to_delete.is_empty());
        assert!(d.to_create.is_empty());
        assert_eq!(d.to_update.len(), 1);
    }

    #[test]
    fn pinned_resource_is_not_a_deletion_candidate() {
        let obj = serde_json::json!({"metadata": {"annotations": {"chartkit.io/resource-policy": "keep"}}});
        assert!(is_pinned(&obj));
        let obj = serde_json::json!({"metadata": {}});
        assert!(!is_pinned(&obj));
    }
}
