use std::collections::BTreeMap;

use super::super::chart::Chart;
use super::super::Result;
use super::assemble;

/// Load a chart from an already-in-memory file list keyed by logical path
/// (e.g. bytes pulled from an OCI layer). No directory-name invariant is
/// enforced here since there is no filesystem basename to compare against;
/// callers that do have an expected name should call `chart.validate(name)`
/// themselves.
pub fn load_memory(files: BTreeMap<String, Vec<u8>>) -> Result<Chart> {
    assemble(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_chart_from_an_in_memory_file_list() {
        let mut files = BTreeMap::new();
        files.insert("Chart.yaml".to_string(), b"apiVersion: v2\nname: hello\nversion: 1.0.0\n".to_vec());
        files.insert("values.yaml".to_string(), b"replicaCount: 2\n".to_vec());
        let chart = load_memory(files).unwrap();
        assert_eq!(chart.name(), "hello");
        assert_eq!(chart.values.get_path("replicaCount").is_some(), true);
    }
}
