use std::collections::BTreeMap;

use serde_json::json;

use super::Value;

/// The `.Release` reserved context: who this render is for and what kind
/// of operation is producing it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseContext {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub is_install: bool,
    pub is_upgrade: bool,
    pub is_rollback: bool,
    /// Constant across every release: identifies what produced this
    /// context, the way Helm's own `.Release.Service` is always `"Helm"`.
    pub service: String,
}

impl ReleaseContext {
    pub fn for_install(name: &str, namespace: &str) -> ReleaseContext {
        ReleaseContext {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            is_rollback: false,
            service: "Helm".to_string(),
        }
    }

    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> ReleaseContext {
        ReleaseContext {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            is_install: false,
            is_upgrade: true,
            is_rollback: false,
            service: "Helm".to_string(),
        }
    }

    pub fn for_rollback(name: &str, namespace: &str, revision: u32) -> ReleaseContext {
        ReleaseContext {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            is_install: false,
            is_upgrade: false,
            is_rollback: true,
            service: "Helm".to_string(),
        }
    }
}

/// A Kubernetes version as reported by the capabilities probe, kept both
/// as the raw string (`.Capabilities.KubeVersion.Version`) and split into
/// major/minor for numeric template comparisons.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl KubeVersion {
    pub fn parse(version: &str) -> KubeVersion {
        let trimmed = version.trim_start_matches('v');
        let mut parts = trimmed.splitn(2, '.');
        let major = parts.next().unwrap_or("0").to_string();
        let minor = parts
            .next()
            .unwrap_or("0")
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        KubeVersion {
            version: version.to_string(),
            major,
            minor,
        }
    }
}

/// The `.Capabilities` reserved context: what the target cluster offers,
/// as reported by the cluster capabilities probe (§4.7). Populated once
/// per engine operation and shared read-only across every chart in the
/// dependency tree being rendered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub kube_version: KubeVersion,
    pub api_versions: Vec<String>,
    /// Constant across every render: the version of this tool, the way
    /// Helm's own `.Capabilities.HelmVersion` is always its own build
    /// version rather than anything cluster-reported.
    pub helm_version: String,
}

impl Capabilities {
    pub fn has_api(&self, group_version: &str) -> bool {
        self.api_versions.iter().any(|v| v == group_version)
    }
}

/// The `.Chart` reserved context: metadata about the chart currently being
/// rendered, re-bound per sub-chart so templates always see their own
/// chart's identity rather than the root's.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

/// The fully assembled context a chart's templates are rendered against:
/// the merged value tree plus the reserved `Release`/`Capabilities`/
/// `Chart`/`Files`/`Subcharts` keys layered on top of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenderContext {
    pub release: ReleaseContext,
    pub capabilities: Capabilities,
    pub chart: ChartInfo,
    /// Raw, non-template file contents, keyed by chart-relative path,
    /// exposed to templates via `.Files`.
    pub files: BTreeMap<String, String>,
    pub values: Value,
}

impl RenderContext {
    /// Fold the reserved keys on top of `values` and return a single
    /// `Value` tree ready to hand to a renderer's template context.
    pub fn to_value(&self) -> Value {
        let mut root = self.values.clone();
        let reserved = json!({
            "Release": self.release,
            "Capabilities": self.capabilities,
            "Chart": self.chart,
            "Files": self.files,
        });
        root = root.merge(Value::from(reserved));
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kube_version_splits_major_minor() {
        let v = KubeVersion::parse("v1.28.3");
        assert_eq!(v.major, "1");
        assert_eq!(v.minor, "28");
    }

    #[test]
    fn capabilities_checks_api_membership() {
        let caps = Capabilities {
            kube_version: KubeVersion::parse("1.28.0"),
            api_versions: vec!["apps/v1".to_string(), "batch/v1".to_string()],
            helm_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        assert!(caps.has_api("apps/v1"));
        assert!(!caps.has_api("apps/v1beta1"));
    }

    #[test]
    fn render_context_layers_reserved_keys_over_values() {
        let ctx = RenderContext {
            release: ReleaseContext::for_install("demo", "default"),
            capabilities: Capabilities {
                kube_version: KubeVersion::parse("1.28.0"),
                api_versions: vec![],
                helm_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            chart: ChartInfo {
                name: "demo".into(),
                version: "1.0.0".into(),
                app_version: None,
            },
            files: BTreeMap::new(),
            values: Value::from_yaml_str("replicaCount: 2").unwrap(),
        };
        let v = ctx.to_value();
        assert_eq!(v.get_path("replicaCount").unwrap().as_str(), None);
        assert_eq!(v.get_path("Release.name").unwrap().as_str(), Some("demo"));
        assert_eq!(v.get_path("Chart.name").unwrap().as_str(), Some("demo"));
    }
}
