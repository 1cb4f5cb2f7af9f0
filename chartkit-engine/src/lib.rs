//! The release state machine (spec §4.5): install, upgrade, rollback,
//! uninstall and test, each an explicit orchestration function over a
//! `chartkit_kube::KubeClient` and a `chartkit_release::ReleaseStorage`,
//! threaded with an `EngineConfig` rather than any crate-level mutable
//! state (spec §9's "process-wide configuration object" redesign note).

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
        ReleaseStore(chartkit_release::Error, chartkit_release::ErrorKind);
        Kube(chartkit_kube::Error, chartkit_kube::ErrorKind);
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeJ(serde_json::Error);
    }
    errors {
        Timeout(operation: String, seconds: u64) {
            description("operation timed out")
            display("{} timed out after {}s", operation, seconds)
        }
        Cancelled(operation: String) {
            description("operation was cancelled")
            display("{} was cancelled", operation)
        }
        HookFailed(name: String, event: String) {
            description("a hook reported failure")
            display("hook '{}' for event '{}' failed", name, event)
        }
        NoDeployedRevision(name: String) {
            description("release has no deployed revision to act on")
            display("release '{}' has no deployed revision", name)
        }
        NothingToRollBack(name: String) {
            description("no prior revision to roll back to")
            display("release '{}' has no prior revision to roll back to", name)
        }
        ResourceNotOwned(kind: String, name: String, owner: String) {
            description("a rendered resource already exists and is owned by another release")
            display("{} '{}' already exists and is not owned by release '{}'", kind, name, owner)
        }
        AtomicRollbackFailed(original: String, rollback: String) {
            description("the operation failed and the atomic rollback that followed also failed")
            display("operation failed ({}); atomic rollback also failed: {}", original, rollback)
        }
    }
}

/// Explicit, caller-constructed configuration (spec AMBIENT-3): no part of
/// this crate reads the environment except [`config::EngineConfig::from_env`].
pub mod config;
pub use config::{EngineConfig, StorageDriver};

/// Cooperative cancellation handle threaded through every long-running
/// operation (spec §5).
pub mod cancel;
pub use cancel::CancellationToken;

/// Per-operation option bags (`wait`, `atomic`, `timeout`, ...).
pub mod options;
pub use options::{InstallOptions, RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions};

/// Hook ordering and execution, with a cancellation-observer pair per hook
/// (spec §9's goroutine/select redesign note).
pub mod hooks;

/// Resource reconciliation between a release's previous and next manifest
/// (spec §4.5 "Upgrade").
pub mod reconcile;

/// The `Engine` and its install/upgrade/rollback/uninstall/test operations.
pub mod engine;
pub use engine::Engine;

/// Thread-pool fan-out across independent release names (spec §5).
pub mod fanout;
