use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;

use chartkit_core::Chart;
use chartkit_render::Hook;
use chartkit_values::Value;

use super::{Error, ErrorKind, Result};

const NAME_PATTERN: &str = r"^[a-z0-9-]{1,53}$";

/// Validate a release name against spec §3's grammar: the usual DNS-label
/// character set, but capped at 53 characters (tighter than the 63-char
/// chart-name limit, to leave room for the `-<revision>` suffix cluster-
/// hosted storage drivers append to generated object names).
pub fn validate_release_name(name: &str) -> Result<()> {
    if !Regex::new(NAME_PATTERN).unwrap().is_match(name) {
        bail!(ErrorKind::InvalidReleaseName(format!(
            "'{}' must match {} ",
            name, NAME_PATTERN
        )));
    }
    Ok(())
}

/// A release's lifecycle status (spec §3). Exactly one revision of a given
/// name may be in a "live" status at a time; see [`Status::is_live`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Unknown,
    PendingInstall,
    Deployed,
    PendingUpgrade,
    PendingRollback,
    Superseded,
    Failed,
    Uninstalling,
    Uninstalled,
}

impl Status {
    /// A "live" status is one a second concurrent mutating operation on the
    /// same release name must not be allowed to start alongside (spec §4.5,
    /// §5's pending-status advisory lock).
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Status::Deployed | Status::PendingInstall | Status::PendingUpgrade | Status::PendingRollback
        )
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Status::PendingInstall | Status::PendingUpgrade | Status::PendingRollback)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Unknown => "unknown",
            Status::PendingInstall => "pending-install",
            Status::Deployed => "deployed",
            Status::PendingUpgrade => "pending-upgrade",
            Status::PendingRollback => "pending-rollback",
            Status::Superseded => "superseded",
            Status::Failed => "failed",
            Status::Uninstalling => "uninstalling",
            Status::Uninstalled => "uninstalled",
        };
        write!(f, "{}", s)
    }
}

/// Whether a release's resources were last reconciled with a client-side
/// three-way merge or a server-side apply (spec §3 "apply-method marker").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyMethod {
    ClientSideMerge,
    ServerSideApply,
}

/// User-facing bookkeeping carried alongside a release record: when it was
/// first and last touched, an optional human description, and the rendered
/// `NOTES.txt` text for this revision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Info {
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
}

impl Info {
    pub fn new(now: DateTime<Utc>) -> Info {
        Info {
            first_deployed: now,
            last_deployed: now,
            description: String::new(),
            notes: String::new(),
        }
    }
}

/// A named, versioned instance of a chart deployed into a cluster (spec
/// §3). Each revision is a distinct, immutable-once-written record; a
/// status transition produces a new `Release` value rather than mutating
/// one in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub chart: Chart,
    pub config: Value,
    pub manifest: String,
    pub hooks: Vec<Hook>,
    pub status: Status,
    pub info: Info,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub apply_method: ApplyMethod,
}

impl Release {
    /// Construct the pending record for a fresh install (always revision 1,
    /// unless `replace` is reinstalling over a prior uninstalled/failed
    /// record at a higher revision — the caller supplies that revision).
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        name: &str,
        namespace: &str,
        revision: u32,
        chart: Chart,
        config: Value,
        manifest: String,
        hooks: Vec<Hook>,
        status: Status,
        now: DateTime<Utc>,
        apply_method: ApplyMethod,
    ) -> Result<Release> {
        validate_release_name(name)?;
        Ok(Release {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            chart,
            config,
            manifest,
            hooks,
            status,
            info: Info::new(now),
            labels: BTreeMap::new(),
            apply_method,
        })
    }

    pub fn key(&self) -> (String, u32) {
        (self.name.clone(), self.revision)
    }

    /// Move to a terminal/new status, stamping `last_deployed` and
    /// optionally a human-readable description (e.g. a failure reason).
    pub fn transition(&mut self, status: Status, now: DateTime<Utc>, description: Option<String>) {
        self.status = status;
        self.info.last_deployed = now;
        if let Some(d) = description {
            self.info.description = d;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_53_char_name() {
        let name: String = std::iter::repeat('a').take(53).collect();
        assert!(validate_release_name(&name).is_ok());
    }

    #[test]
    fn rejects_54_char_name() {
        let name: String = std::iter::repeat('a').take(54).collect();
        assert!(validate_release_name(&name).is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_release_name("").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(validate_release_name("MyRelease").is_err());
    }

    #[test]
    fn live_statuses_are_exactly_deployed_and_pending() {
        assert!(Status::Deployed.is_live());
        assert!(Status::PendingInstall.is_live());
        assert!(Status::PendingUpgrade.is_live());
        assert!(Status::PendingRollback.is_live());
        assert!(!Status::Superseded.is_live());
        assert!(!Status::Failed.is_live());
        assert!(!Status::Uninstalled.is_live());
        assert!(!Status::Unknown.is_live());
    }

    #[test]
    fn status_display_matches_kebab_case() {
        assert_eq!(Status::PendingRollback.to_string(), "pending-rollback");
        assert_eq!(Status::Deployed.to_string(), "deployed");
    }
}
