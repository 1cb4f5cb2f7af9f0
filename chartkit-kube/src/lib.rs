//! The Kube Client Abstraction, a cluster capabilities probe and
//! readiness polling for a narrow, known subset of workload kinds.
//!
//! Deliberately has no dependency on the chart/render/release crates: it
//! knows about group/version/kind/namespace/name and raw JSON bodies only,
//! the same way `chartkit_core::getter::Getter` knows about URLs and bytes
//! only.

#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate serde_yaml;

#[macro_use]
extern crate log;

#[macro_use]
extern crate error_chain;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeJ(serde_json::Error);
        Kube(kube::Error);
    }
    errors {
        ConnectionFailed(reason: String) {
            description("failed to connect to the cluster")
            display("failed to connect to the cluster: {}", reason)
        }
        NotFound(kind: String, name: String) {
            description("resource not found")
            display("{} '{}' not found", kind, name)
        }
        Timeout(kind: String, name: String, seconds: u64) {
            description("timed out waiting for a resource to become ready")
            display("timed out after {}s waiting for {} '{}' to become ready", seconds, kind, name)
        }
    }
}

/// The `KubeClient` trait and its `kube`/`k8s-openapi`-backed default
/// implementation.
pub mod client;
pub use client::{DynamicKubeClient, KubeClient};

/// Cluster capabilities probe: server version and available API groups.
pub mod capabilities;
pub use capabilities::{ClusterCapabilities, Prober};
