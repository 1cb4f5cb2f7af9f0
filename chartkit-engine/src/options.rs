use std::time::Duration;

use chartkit_values::engine::ValueOverride;

/// Per-operation user-supplied values: files (applied in order) plus
/// `--set`/`--set-string`-style overrides, applied last and therefore
/// highest-precedence (spec §4.3 layers 3-4).
#[derive(Clone, Debug, Default)]
pub struct ValueInputs {
    pub files: Vec<chartkit_values::Value>,
    pub overrides: Vec<ValueOverride>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

/// Options shared by every mutating operation: whether to block for
/// resource readiness, the per-operation time budget, and whether failure
/// should trigger an automatic rollback to the prior deployed revision.
#[derive(Clone, Debug)]
pub struct InstallOptions {
    pub values: ValueInputs,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    pub atomic: bool,
    pub skip_crds: bool,
    /// Reinstall over a name whose latest revision is `uninstalled`/`failed`
    /// rather than requiring the name be entirely unused (spec §4.5
    /// "Install" preconditions).
    pub replace: bool,
    pub dry_run: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        InstallOptions {
            values: ValueInputs::default(),
            wait: false,
            wait_for_jobs: false,
            timeout: default_timeout(),
            atomic: false,
            skip_crds: false,
            replace: false,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpgradeOptions {
    pub values: ValueInputs,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    pub atomic: bool,
    pub cleanup_on_fail: bool,
    pub dry_run: bool,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        UpgradeOptions {
            values: ValueInputs::default(),
            wait: false,
            wait_for_jobs: false,
            timeout: default_timeout(),
            atomic: false,
            cleanup_on_fail: false,
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RollbackOptions {
    /// The target revision, or `None` for "the immediate predecessor of the
    /// current deployed revision".
    pub revision: Option<u32>,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        RollbackOptions {
            revision: None,
            wait: false,
            wait_for_jobs: false,
            timeout: default_timeout(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UninstallOptions {
    /// Keep the final release record(s) with status `uninstalled` rather
    /// than deleting history entirely (spec §4.5 "Uninstall").
    pub keep_history: bool,
    pub timeout: Duration,
}

impl Default for UninstallOptions {
    fn default() -> Self {
        UninstallOptions {
            keep_history: false,
            timeout: default_timeout(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TestOptions {
    pub timeout: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        TestOptions { timeout: default_timeout() }
    }
}
