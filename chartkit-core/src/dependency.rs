use chartkit_values::Value;

use super::{Error, ErrorKind, Result};

/// One entry of `import-values`: either a bare key copied verbatim between
/// parent and child scope, or an explicit child-path/parent-path mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImportValueSpec {
    Same(String),
    Mapped {
        #[serde(rename = "child")]
        child: String,
        #[serde(rename = "parent")]
        parent: String,
    },
}

/// A dependency declaration as it appears under `Chart.yaml`'s
/// `dependencies:` list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(rename = "import-values", default)]
    pub import_values: Vec<ImportValueSpec>,
    /// Computed, not authored: whether resolution/enablement determined
    /// this dependency should be included. Absent from `Chart.yaml`.
    #[serde(skip)]
    pub enabled: bool,
}

/// The parsed form of a dependency's `repository` string.
#[derive(Clone, Debug, PartialEq)]
pub enum RepositoryRef {
    Http(String),
    Oci(String),
    File(String),
    Alias(String),
}

impl Dependency {
    pub fn repository_ref(&self) -> Result<RepositoryRef> {
        let r = self.repository.trim();
        if let Some(path) = r.strip_prefix("file://") {
            return Ok(RepositoryRef::File(path.to_string()));
        }
        if let Some(reference) = r.strip_prefix("oci://") {
            return Ok(RepositoryRef::Oci(reference.to_string()));
        }
        if r.starts_with("http://") || r.starts_with("https://") {
            return Ok(RepositoryRef::Http(r.to_string()));
        }
        if let Some(alias) = r.strip_prefix('@') {
            return Ok(RepositoryRef::Alias(alias.to_string()));
        }
        if r.contains(':') && !r.contains("://") {
            return Ok(RepositoryRef::Alias(r.to_string()));
        }
        Err(Error::from(ErrorKind::RepoNotConfigured(r.to_string())))
    }

    /// The name under which this dependency's chart tree is mounted in
    /// `charts/` and under `.Values`/`.Subcharts`.
    pub fn import_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Evaluate enablement against the already-merged parent values tree:
    /// `condition` wins when present (a missing path falls through to
    /// `tags`); otherwise any tag set `true` under `.Values.tags` enables
    /// the dependency. No condition and no tags means always enabled.
    pub fn evaluate_enabled(&self, merged_parent_values: &Value) -> bool {
        if let Some(cond) = &self.condition {
            if let Some(v) = merged_parent_values.get_path(cond) {
                return v.is_truthy();
            }
        }
        if !self.tags.is_empty() {
            return self.tags.iter().any(|tag| {
                merged_parent_values
                    .get_path(&format!("tags.{}", tag))
                    .map(|v| v.is_truthy())
                    .unwrap_or(false)
            });
        }
        true
    }
}
