//! Chart model, loader, repository index, dependency resolver and
//! provenance verification — the package side of the system.

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
    links {
        Values(chartkit_values::Error, chartkit_values::ErrorKind);
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
        Semver(semver::SemVerError);
        SemverReq(semver::ReqParseError);
        Reqw(reqwest::Error);
        Walkdir(walkdir::Error);
        Url(url::ParseError);
    }
    errors {
        MissingMetadata(path: String) {
            description("chart is missing Chart.yaml")
            display("chart at '{}' is missing Chart.yaml", path)
        }
        InvalidMetadata(reason: String) {
            description("chart metadata is invalid")
            display("invalid Chart.yaml: {}", reason)
        }
        UnsupportedApiVersion(v: String) {
            description("unsupported chart apiVersion")
            display("unsupported chart apiVersion '{}'", v)
        }
        MalformedArchive(reason: String) {
            description("chart archive is malformed")
            display("malformed chart archive: {}", reason)
        }
        PathEscape(entry: String) {
            description("archive entry escapes the chart root")
            display("archive entry '{}' escapes the chart root", entry)
        }
        SubchartLoadFailure(name: String) {
            description("failed to load a sub-chart")
            display("failed to load sub-chart '{}'", name)
        }
        RepoNotConfigured(repo: String) {
            description("dependency references an unconfigured repository")
            display("repository '{}' is not configured", repo)
        }
        VersionNotFound(name: String, range: String) {
            description("no chart version satisfies the requested range")
            display("no version of '{}' satisfies '{}'", name, range)
        }
        DigestMismatch(name: String) {
            description("downloaded archive digest does not match the index")
            display("digest mismatch for '{}'", name)
        }
        LockStale(reason: String) {
            description("lock file does not match the declared dependencies")
            display("lock file is stale: {}", reason)
        }
        DownloadFailed(url: String, reason: String) {
            description("dependency download failed")
            display("failed to download '{}': {}", url, reason)
        }
        ProvenanceInvalid(reason: String) {
            description("provenance verification failed")
            display("provenance verification failed: {}", reason)
        }
        IndexDuplicateEntry(name: String, version: String) {
            description("repository index has a duplicate chart version")
            display("duplicate entry for '{}' version '{}' in index", name, version)
        }
        IndexDigestConflict(name: String, version: String) {
            description("repository index merge found divergent digests for the same version")
            display("conflicting digests for '{}' version '{}' during index merge", name, version)
        }
    }
}

/// Chart metadata and in-memory package representation.
pub mod chart;
pub use chart::{Chart, ChartType, Maintainer, Metadata};

/// Declared and resolved dependency types.
pub mod dependency;
pub use dependency::{Dependency, ImportValueSpec};

/// Resolved-dependency lock file.
pub mod lock;
pub use lock::{Lock, LockedDependency};

/// Directory/archive/in-memory chart loading.
pub mod loader;

/// Repository index parsing, merge and lookup.
pub mod index;
pub use index::{ChartVersion, Index};

/// Dependency resolution against an index/Getter set.
pub mod resolver;
pub use resolver::Resolver;

/// Scheme-dispatched byte fetcher used by the index, resolver and
/// provenance verifier.
pub mod getter;
pub use getter::Getter;

/// Detached-signature verification over a chart archive.
pub mod provenance;
