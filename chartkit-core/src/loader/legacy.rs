//! The v1 `requirements.yaml` shim: normalised into v2 dependency fields at
//! load time, with the raw bytes kept around on the `Chart` only so a v1
//! `Lock` digest can still be recomputed for back-compatibility (§3, §4.2).

use super::super::dependency::Dependency;
use super::super::Result;

#[derive(Deserialize)]
pub(crate) struct RequirementsFile {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl RequirementsFile {
    pub fn parse(raw: &[u8]) -> Result<RequirementsFile> {
        Ok(serde_yaml::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v1_requirements_dependencies() {
        let raw = br#"
dependencies:
  - name: db
    version: "^1.0.0"
    repository: "https://charts.example.com"
"#;
        let reqs = RequirementsFile::parse(raw).unwrap();
        assert_eq!(reqs.dependencies.len(), 1);
        assert_eq!(reqs.dependencies[0].name, "db");
    }
}
