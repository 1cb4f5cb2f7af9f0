//! Directory/archive/in-memory chart loading.
//!
//! All three front-ends funnel into [`assemble`], which owns the one copy of
//! the structural rules from spec §4.1: `Chart.yaml` is required, a missing
//! `apiVersion` triggers the v1 shim, `templates/`/`crds/`/`charts/` are
//! routed to their respective slots, and everything left over becomes an
//! embedded file.

use std::collections::BTreeMap;
use std::path::Path;

use super::chart::{Chart, Metadata};
use super::lock::Lock;
use super::{Error, ErrorKind, Result};

mod archive;
mod directory;
mod legacy;
mod memory;

pub use archive::load_archive;
pub use directory::load_dir;
pub use memory::load_memory;

const RESERVED: &[&str] = &[
    "Chart.yaml",
    "values.yaml",
    "values.schema.json",
    "Chart.lock",
    "requirements.yaml",
    "requirements.lock",
];

fn parse_metadata(raw: &[u8]) -> Result<(Metadata, bool)> {
    let generic: serde_yaml::Value = serde_yaml::from_slice(raw)?;
    let is_v1 = generic
        .as_mapping()
        .map(|m| m.get(&serde_yaml::Value::String("apiVersion".to_string())).is_none())
        .unwrap_or(true);
    let mut metadata: Metadata = if is_v1 {
        // v1 charts omit `apiVersion` entirely; patch it in before
        // deserializing into the (v2-shaped) `Metadata` struct. A missing
        // `type` falls back to `ChartType::default()` via `#[serde(default)]`.
        let mut patched = generic;
        if let serde_yaml::Value::Mapping(ref mut m) = patched {
            m.insert(
                serde_yaml::Value::String("apiVersion".to_string()),
                serde_yaml::Value::String("v1".to_string()),
            );
        }
        serde_yaml::from_value(patched)?
    } else {
        serde_yaml::from_value(generic)?
    };
    if is_v1 {
        metadata.api_version = "v1".to_string();
    }
    Ok((metadata, is_v1))
}

/// Build a `Chart` from a flat, logical-path-keyed file set. Shared by the
/// directory, archive and in-memory front-ends so the structural validation
/// lives in exactly one place.
pub(crate) fn assemble(files: BTreeMap<String, Vec<u8>>) -> Result<Chart> {
    let chart_yaml = files
        .get("Chart.yaml")
        .ok_or_else(|| Error::from(ErrorKind::MissingMetadata("Chart.yaml".to_string())))?;
    let (mut metadata, is_v1) = parse_metadata(chart_yaml)?;

    let mut legacy_requirements = None;
    if is_v1 {
        if let Some(raw) = files.get("requirements.yaml") {
            let reqs = legacy::RequirementsFile::parse(raw)?;
            metadata.dependencies = reqs.dependencies;
            legacy_requirements = Some(raw.clone());
        }
    }
    metadata.validate()?;

    let values = match files.get("values.yaml") {
        Some(raw) => chartkit_values::Value::from_yaml_str(&String::from_utf8_lossy(raw))
            .map_err(|e| Error::from(ErrorKind::InvalidMetadata(format!("values.yaml: {}", e))))?,
        None => chartkit_values::Value::empty_mapping(),
    };
    let schema = files
        .get("values.schema.json")
        .map(|raw| String::from_utf8_lossy(raw).into_owned());
    let lock = files
        .get("Chart.lock")
        .map(|raw| serde_yaml::from_slice::<Lock>(raw))
        .transpose()?;

    let mut templates = BTreeMap::new();
    let mut notes = None;
    let mut crds = BTreeMap::new();
    let mut chart_files = BTreeMap::new();
    let mut subchart_files: BTreeMap<String, BTreeMap<String, Vec<u8>>> = BTreeMap::new();
    let mut subchart_archives: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for (path, bytes) in &files {
        if RESERVED.contains(&path.as_str()) {
            continue;
        }
        if let Some(rest) = path.strip_prefix("templates/") {
            if rest == "NOTES.txt" {
                notes = Some(String::from_utf8_lossy(bytes).into_owned());
            } else {
                templates.insert(path.clone(), String::from_utf8_lossy(bytes).into_owned());
            }
            continue;
        }
        if let Some(rest) = path.strip_prefix("crds/") {
            if !rest.is_empty() {
                crds.insert(path.clone(), String::from_utf8_lossy(bytes).into_owned());
                continue;
            }
        }
        if let Some(rest) = path.strip_prefix("charts/") {
            if let Some(name) = rest.strip_suffix(".tgz") {
                if !name.starts_with('.') && !name.starts_with('_') {
                    subchart_archives.insert(name.to_string(), bytes.clone());
                    continue;
                }
            } else if let Some((subname, subpath)) = rest.split_once('/') {
                if !subname.starts_with('.') && !subname.starts_with('_') {
                    subchart_files
                        .entry(subname.to_string())
                        .or_insert_with(BTreeMap::new)
                        .insert(subpath.to_string(), bytes.clone());
                    continue;
                }
            }
            // a stray `.prov` file or a dotfile/underscore-prefixed entry:
            // kept as a regular chart file, not routed to a sub-chart.
            chart_files.insert(path.clone(), bytes.clone());
            continue;
        }
        chart_files.insert(path.clone(), bytes.clone());
    }

    let mut charts = Vec::new();
    for (name, files) in subchart_files {
        let sub = assemble(files).map_err(|_| Error::from(ErrorKind::SubchartLoadFailure(name.clone())))?;
        sub.validate(&name)?;
        charts.push(sub);
    }
    for (name, bytes) in subchart_archives {
        let (root, inner) = archive::unpack_tar_gz(&bytes)?;
        let sub = assemble(inner).map_err(|_| Error::from(ErrorKind::SubchartLoadFailure(name.clone())))?;
        sub.validate(&root)?;
        charts.push(sub);
    }
    charts.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    Ok(Chart {
        metadata,
        values,
        schema,
        templates,
        notes,
        files: chart_files,
        crds,
        charts,
        lock,
        legacy_requirements,
    })
}

pub(crate) fn relative_path(root: &Path, entry: &Path) -> Result<String> {
    let rel = entry
        .strip_prefix(root)
        .map_err(|_| Error::from(ErrorKind::MalformedArchive(format!("{:?} escapes chart root", entry))))?;
    Ok(rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/"))
}
