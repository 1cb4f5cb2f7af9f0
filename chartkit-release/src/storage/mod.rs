//! The release storage abstraction (spec §4.6): a key/value layer keyed by
//! `(release-name, revision)` with a secondary name → revisions index,
//! `MaxHistory` pruning, and drivers for in-memory and cluster-hosted
//! (Secret/ConfigMap) backing stores.

use super::release::Release;
use super::Result;

mod cluster;
mod in_memory;

pub use cluster::{ConfigMapStorage, SecretStorage};
pub use in_memory::InMemoryStorage;

/// The capability contract every storage driver implements. Keyed by
/// `(name, revision)`; a single release name is protected from concurrent
/// mutation by the state machine's pending-status convention (spec §5), not
/// by anything in this trait — implementations only need to be safe for
/// concurrent *readers*.
pub trait ReleaseStorage: Send + Sync {
    fn create(&self, release: &Release) -> Result<()>;
    fn update(&self, release: &Release) -> Result<()>;
    fn get(&self, name: &str, revision: u32) -> Result<Option<Release>>;
    /// The highest-revision record for `name`, regardless of status.
    fn last(&self, name: &str) -> Result<Option<Release>>;
    /// Every revision of `name`, ascending.
    fn history(&self, name: &str) -> Result<Vec<Release>>;
    fn delete(&self, name: &str, revision: u32) -> Result<Option<Release>>;
    /// Delete every revision of `name`.
    fn delete_all(&self, name: &str) -> Result<()>;
    /// Every revision across every name currently in status `deployed`.
    /// Expected to hold at most one entry per name; kept plural because a
    /// storage driver reports what is actually there, not what the
    /// invariant promises (spec §8's monotonic-history property is
    /// something callers verify, not something storage enforces).
    fn deployed_all(&self) -> Result<Vec<Release>>;
    /// Every release record, across every name and revision, matching
    /// `predicate`.
    fn list(&self, predicate: &dyn Fn(&Release) -> bool) -> Result<Vec<Release>>;

    /// Best-effort history pruning: delete the oldest non-live revisions of
    /// `name` until at most `max_history` remain (`0` disables pruning).
    /// Per spec §4.6 this "tolerates partial failure (reported but
    /// non-fatal)" — a failed prune delete is logged, never surfaced to the
    /// caller of the install/upgrade/rollback operation that triggered it.
    fn prune(&self, name: &str, max_history: u32) -> Result<()> {
        if max_history == 0 {
            return Ok(());
        }
        let mut history = self.history(name)?;
        history.sort_by_key(|r| r.revision);
        let excess = history.len().saturating_sub(max_history as usize);
        let prunable: Vec<&Release> = history.iter().filter(|r| !r.status.is_live()).collect();
        for release in prunable.into_iter().take(excess) {
            if let Err(e) = self.delete(name, release.revision) {
                warn!("failed to prune {} revision {} during history trim: {}", name, release.revision, e);
            }
        }
        Ok(())
    }
}
