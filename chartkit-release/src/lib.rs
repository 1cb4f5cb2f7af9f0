//! The release data model (spec §3 `Release`/`Hook`) and the pluggable
//! release storage abstraction (spec §4.6): a key/value layer mapping
//! `(release-name, revision)` to a full release record, with in-memory and
//! cluster-hosted implementations.

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
        Core(chartkit_core::Error, chartkit_core::ErrorKind);
        Values(chartkit_values::Error, chartkit_values::ErrorKind);
        Render(chartkit_render::Error, chartkit_render::ErrorKind);
        Kube(chartkit_kube::Error, chartkit_kube::ErrorKind);
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeY(serde_yaml::Error);
        SerdeJ(serde_json::Error);
    }
    errors {
        InvalidReleaseName(reason: String) {
            description("release name is invalid")
            display("invalid release name: {}", reason)
        }
        NotFound(name: String, revision: u32) {
            description("release revision not found")
            display("release '{}' revision {} not found", name, revision)
        }
        NoRevisions(name: String) {
            description("release has no revisions")
            display("release '{}' has no revisions", name)
        }
        AlreadyExists(name: String) {
            description("a live release already exists under this name")
            display("a release named '{}' already exists", name)
        }
        OperationInProgress(name: String, status: String) {
            description("another operation is already in progress for this release")
            display("release '{}' has an operation already in progress ({})", name, status)
        }
    }
}

/// `Release`, `Info`, `Status` and the release-name grammar.
pub mod release;
pub use release::{ApplyMethod, Info, Release, Status};

/// The `ReleaseStorage` trait and its in-memory/cluster-hosted drivers.
pub mod storage;
pub use storage::{InMemoryStorage, ReleaseStorage};
