use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};

use super::chart::Metadata;
use super::{Error, ErrorKind, Result};

/// One published version of a chart as it appears in a repository index:
/// its metadata, one or more download URLs (mirrors), content digest and
/// publish time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChartVersion {
    #[serde(flatten)]
    pub metadata: Metadata,
    pub urls: Vec<String>,
    pub created: DateTime<Utc>,
    pub digest: String,
    #[serde(default)]
    pub removed: bool,
}

impl ChartVersion {
    pub fn semver(&self) -> Result<Version> {
        self.metadata.semver()
    }
}

/// A repository's catalogue: every chart name it carries, each with its
/// published versions sorted descending by SemVer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Index {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub generated: DateTime<Utc>,
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

impl Index {
    pub fn from_bytes(raw: &[u8]) -> Result<Index> {
        let mut index: Index = serde_yaml::from_slice(raw)?;
        for (name, versions) in index.entries.iter_mut() {
            let mut seen = std::collections::HashSet::new();
            for v in versions.iter() {
                if !seen.insert(v.metadata.version.clone()) {
                    return Err(Error::from(ErrorKind::IndexDuplicateEntry(
                        name.clone(),
                        v.metadata.version.clone(),
                    )));
                }
            }
            versions.sort_by(|a, b| {
                let av = a.semver().ok();
                let bv = b.semver().ok();
                bv.cmp(&av)
            });
        }
        Ok(index)
    }

    /// Union this index with another. A chart+version present in both with
    /// an identical digest is kept once (the later index's copy wins,
    /// harmlessly); a divergent digest for the same chart+version is a
    /// conflict.
    pub fn merge(mut self, other: Index) -> Result<Index> {
        for (name, other_versions) in other.entries {
            match self.entries.entry(name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(other_versions);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    for ov in other_versions {
                        if let Some(existing_v) = existing.iter_mut().find(|v| v.metadata.version == ov.metadata.version) {
                            if existing_v.digest != ov.digest {
                                return Err(Error::from(ErrorKind::IndexDigestConflict(name.clone(), ov.metadata.version.clone())));
                            }
                            *existing_v = ov;
                        } else {
                            existing.push(ov);
                        }
                    }
                    existing.sort_by(|a, b| {
                        let av = a.semver().ok();
                        let bv = b.semver().ok();
                        bv.cmp(&av)
                    });
                }
            }
        }
        Ok(self)
    }

    /// The highest version of `name` satisfying `range`, ignoring entries
    /// marked `removed`.
    pub fn find(&self, name: &str, range: &VersionReq) -> Result<&ChartVersion> {
        self.entries
            .get(name)
            .and_then(|versions| {
                versions
                    .iter()
                    .filter(|v| !v.removed)
                    .find(|v| v.semver().map(|sv| range.matches(&sv)).unwrap_or(false))
            })
            .ok_or_else(|| Error::from(ErrorKind::VersionNotFound(name.to_string(), range.to_string())))
    }
}
