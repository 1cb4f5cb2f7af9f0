use std::collections::BTreeMap;

use regex::Regex;
use semver::Version;

use chartkit_values::Value;

use super::dependency::Dependency;
use super::lock::Lock;
use super::{Error, ErrorKind, Result};

const DNS_LABEL_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        bail!(ErrorKind::InvalidMetadata(format!(
            "name '{}' must be 1-63 characters",
            name
        )));
    }
    if !Regex::new(DNS_LABEL_PATTERN).unwrap().is_match(name) {
        bail!(ErrorKind::InvalidMetadata(format!(
            "name '{}' is not a valid DNS label",
            name
        )));
    }
    Ok(())
}

/// Whether a chart is directly installable or only usable as a library of
/// template helpers consumed by other charts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Application,
    Library,
}

impl Default for ChartType {
    fn default() -> Self {
        ChartType::Application
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `Chart.yaml`, deserialized straight off the wire (v2 layout). Loaders
/// translate a v1 file (no `apiVersion`) into this same shape, keeping the
/// original API version around for legacy digest computation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "type", default)]
    pub kind: ChartType,
    #[serde(rename = "appVersion", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "kubeVersion", skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Metadata {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        Version::parse(&self.version)
            .map_err(|e| Error::from(ErrorKind::InvalidMetadata(format!("version '{}': {}", self.version, e))))?;
        if self.api_version != "v1" && self.api_version != "v2" {
            bail!(ErrorKind::UnsupportedApiVersion(self.api_version.clone()));
        }
        Ok(())
    }

    pub fn semver(&self) -> Result<Version> {
        Ok(Version::parse(&self.version)?)
    }

    pub fn is_library(&self) -> bool {
        self.kind == ChartType::Library
    }
}

/// The in-memory representation of a fully loaded chart: metadata, default
/// values, raw template/file/CRD bytes and any loaded sub-charts. Immutable
/// once built; dropped after the render that consumes it. Serializable so a
/// `Release` can snapshot the installing chart by value into storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chart {
    pub metadata: Metadata,
    pub values: Value,
    pub schema: Option<String>,
    /// Logical path under `templates/` (e.g. `templates/deployment.yaml`) to
    /// raw template source, including partials/helpers.
    pub templates: BTreeMap<String, String>,
    pub notes: Option<String>,
    /// Non-template files, keyed by chart-relative path, exposed to
    /// templates via `.Files`.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Raw YAML under `crds/`, never rendered.
    pub crds: BTreeMap<String, String>,
    pub charts: Vec<Chart>,
    pub lock: Option<Lock>,
    /// Present only for charts loaded from a v1-layout `requirements.yaml`;
    /// retained verbatim so a v1 Lock digest can be recomputed.
    pub legacy_requirements: Option<Vec<u8>>,
}

impl Chart {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Structural invariants beyond per-field metadata validation: name
    /// matches the directory basename (enforced by the loader, not here),
    /// and a library chart must not carry templates that would emit
    /// resources — every template file under `templates/` other than
    /// `_*` partials and `NOTES.txt` counts as resource-emitting.
    pub fn validate(&self, basename: &str) -> Result<()> {
        self.metadata.validate()?;
        if self.metadata.name != basename {
            bail!(ErrorKind::InvalidMetadata(format!(
                "chart name '{}' does not match directory '{}'",
                self.metadata.name, basename
            )));
        }
        if self.metadata.is_library() {
            let emitting = self.templates.keys().any(|path| {
                let file = path.rsplit('/').next().unwrap_or(path);
                !file.starts_with('_') && file != "NOTES.txt"
            });
            if emitting {
                bail!(ErrorKind::InvalidMetadata(format!(
                    "library chart '{}' must not contain resource-emitting templates",
                    self.metadata.name
                )));
            }
        }
        Ok(())
    }

    /// The name a loaded sub-chart is mounted under: its declared `alias`
    /// if this chart's dependency list names one for it, otherwise its own
    /// chart name.
    pub fn alias_of(&self, child: &Chart) -> String {
        self.metadata
            .dependencies
            .iter()
            .find(|d| d.name == child.metadata.name)
            .and_then(|d| d.alias.clone())
            .unwrap_or_else(|| child.metadata.name.clone())
    }

    /// Find a loaded sub-chart by its import alias (alias if declared,
    /// otherwise the sub-chart's own name).
    pub fn subchart(&self, alias: &str) -> Option<&Chart> {
        self.charts.iter().find(|c| self.alias_of(c) == alias)
    }
}
