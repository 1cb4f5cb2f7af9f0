use std::sync::Mutex;

use kube::{Client, Config};
use tokio::runtime::Runtime;

use super::Result;

/// What a release operation needs to know about the target cluster before
/// rendering and applying a chart: the server's own version (for
/// `.Capabilities.KubeVersion` template access) and the API groups/versions
/// it actually serves (for dependency condition checks against
/// `.Capabilities.APIVersions`, spec §4.5/§4.6). Deliberately its own type
/// rather than `chartkit_values::context::Capabilities` — this crate has no
/// dependency on `chartkit-values`, and `chartkit-engine` is the one place
/// that converts between the two.
#[derive(Clone, Debug)]
pub struct ClusterCapabilities {
    pub kube_version: String,
    pub api_versions: Vec<String>,
    /// This tool's own version, not cluster-reported (`.Capabilities.HelmVersion`).
    pub helm_version: String,
}

impl Default for ClusterCapabilities {
    fn default() -> ClusterCapabilities {
        ClusterCapabilities {
            kube_version: String::new(),
            api_versions: Vec::new(),
            helm_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Probes a live cluster connection for its `ClusterCapabilities`. Split out
/// from `DynamicKubeClient` so a probe can be taken against any `kube::Client`
/// without requiring the rest of the `KubeClient` trait surface.
pub struct Prober {
    client: Client,
    runtime: Mutex<Runtime>,
}

impl Prober {
    pub fn new(client: Client) -> Result<Prober> {
        Ok(Prober {
            client,
            runtime: Mutex::new(Runtime::new()?),
        })
    }

    pub fn for_config(config: Config) -> Result<Prober> {
        Prober::new(Client::try_from(config)?)
    }

    pub fn probe(&self) -> Result<ClusterCapabilities> {
        let runtime = self.runtime.lock().expect("tokio runtime mutex poisoned");
        let client = self.client.clone();
        runtime.block_on(async move {
            let version = client.apiserver_version().await?;
            let kube_version = format!("{}.{}", version.major, version.minor);

            let discovery = kube::discovery::Discovery::new(client).run().await?;
            let mut api_versions: Vec<String> = discovery
                .groups()
                .flat_map(|group| {
                    group.versions().map(move |version| match group.name() {
                        "" => version.to_string(),
                        name => format!("{}/{}", name, version),
                    })
                })
                .collect();
            api_versions.sort();
            api_versions.dedup();

            Ok(ClusterCapabilities {
                kube_version,
                api_versions,
                helm_version: env!("CARGO_PKG_VERSION").to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_capabilities_default_is_empty() {
        let caps = ClusterCapabilities::default();
        assert!(caps.kube_version.is_empty());
        assert!(caps.api_versions.is_empty());
    }
}
