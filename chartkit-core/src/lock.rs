use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::dependency::Dependency;

/// One resolved dependency as recorded in `Chart.lock`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockedDependency {
    pub name: String,
    pub version: String,
    pub repository: String,
    pub digest: String,
}

/// `Chart.lock`: the exact set of dependency versions a resolution run
/// produced, plus a digest over the request so a later `Build` can detect
/// staleness without re-resolving.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lock {
    pub generated: DateTime<Utc>,
    pub digest: String,
    pub dependencies: Vec<LockedDependency>,
}

impl Lock {
    pub fn new(dependencies: Vec<LockedDependency>, requested: &[Dependency]) -> Lock {
        Lock {
            generated: Utc::now(),
            digest: digest_v2(requested, &dependencies),
            dependencies,
        }
    }

    /// Whether this lock still matches a (possibly edited) dependency
    /// declaration list. A v1-sourced chart additionally accepts a match
    /// against the legacy digest scheme to stay compatible with locks
    /// written by older tooling.
    pub fn matches(&self, requested: &[Dependency], legacy_requirements: Option<&[u8]>) -> bool {
        if self.digest == digest_v2(requested, &self.dependencies) {
            return true;
        }
        if let Some(raw) = legacy_requirements {
            if self.digest == digest_v1(raw) {
                return true;
            }
        }
        false
    }
}

fn digest_v2(requested: &[Dependency], resolved: &[LockedDependency]) -> String {
    let mut hasher = Sha256::new();
    for d in requested {
        hasher.input(d.name.as_bytes());
        hasher.input(d.version.as_bytes());
        hasher.input(d.repository.as_bytes());
    }
    for d in resolved {
        hasher.input(d.name.as_bytes());
        hasher.input(d.version.as_bytes());
        hasher.input(d.digest.as_bytes());
    }
    format!("sha256:{:x}", hasher.result())
}

/// The v1 digest scheme hashes the raw `requirements.yaml`/`requirements.lock`
/// bytes directly, matching the legacy tool's lock format.
fn digest_v1(raw_requirements: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.input(raw_requirements);
    format!("sha256:{:x}", hasher.result())
}
