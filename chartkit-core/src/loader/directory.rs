use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use super::super::chart::Chart;
use super::super::Result;
use super::{assemble, relative_path};

/// Load a chart from a directory on disk, walking it with `walkdir` the way
/// `shipcat_definitions::template::add_templates` walks a template tree.
/// Sub-charts under `charts/` are reached through the same walk (their files
/// simply carry a `charts/<name>/...` logical path) and peeled off by
/// [`assemble`], not by a second recursive directory walk here.
pub fn load_dir(path: &Path) -> Result<Chart> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        let entry_path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path_is_symlink() {
            debug!("skipping symlink entry {:?}", entry_path);
            continue;
        }
        let rel = relative_path(path, entry_path)?;
        let bytes = fs::read(entry_path)?;
        files.insert(rel, bytes);
    }
    let chart = assemble(files)?;
    let basename = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    chart.validate(&basename)?;
    Ok(chart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let full = dir.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn loads_a_minimal_chart_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("hello");
        fs::create_dir_all(&root).unwrap();
        write(&root, "Chart.yaml", "apiVersion: v2\nname: hello\nversion: 1.0.0\n");
        write(&root, "values.yaml", "replicaCount: 1\n");
        write(&root, "templates/configmap.yaml", "kind: ConfigMap\nmetadata:\n  name: {{ .Release.Name }}-cm\n");

        let chart = load_dir(&root).unwrap();
        assert_eq!(chart.name(), "hello");
        assert!(chart.templates.contains_key("templates/configmap.yaml"));
    }

    #[test]
    fn missing_chart_yaml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("broken");
        fs::create_dir_all(&root).unwrap();
        write(&root, "values.yaml", "a: 1\n");
        assert!(load_dir(&root).is_err());
    }

    #[test]
    fn name_mismatch_with_directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("actual-dir-name");
        fs::create_dir_all(&root).unwrap();
        write(&root, "Chart.yaml", "apiVersion: v2\nname: different-name\nversion: 1.0.0\n");
        assert!(load_dir(&root).is_err());
    }

    #[test]
    fn routes_nested_subchart_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("parent");
        fs::create_dir_all(&root).unwrap();
        write(&root, "Chart.yaml", "apiVersion: v2\nname: parent\nversion: 1.0.0\n");
        write(&root, "charts/db/Chart.yaml", "apiVersion: v2\nname: db\nversion: 2.0.0\n");
        write(&root, "charts/db/values.yaml", "port: 5432\n");

        let chart = load_dir(&root).unwrap();
        assert_eq!(chart.charts.len(), 1);
        assert_eq!(chart.charts[0].name(), "db");
    }

    #[test]
    fn ignores_subchart_directories_prefixed_with_underscore_or_dot() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("parent");
        fs::create_dir_all(&root).unwrap();
        write(&root, "Chart.yaml", "apiVersion: v2\nname: parent\nversion: 1.0.0\n");
        write(&root, "charts/_ignored/values.yaml", "a: 1\n");
        write(&root, "charts/.hidden/values.yaml", "a: 1\n");

        let chart = load_dir(&root).unwrap();
        assert!(chart.charts.is_empty());
    }
}
