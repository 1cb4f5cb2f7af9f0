//! The dependency resolver (spec §4.2): turns a chart's declared
//! dependencies into a `Lock` plus the archive bytes that need to land in
//! `charts/`.
//!
//! Remote fetches go through the `Getter` trait so this module stays
//! synchronous, transport-agnostic, pure decision logic; the only I/O it
//! performs directly is the final atomic commit into a chart directory's
//! `charts/` subtree, and even that is a separate, optional step
//! (`commit_to_charts_dir`) so the resolution logic itself is testable
//! without a filesystem.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use semver::VersionReq;
use sha2::{Digest, Sha256};

use super::chart::Chart;
use super::dependency::{Dependency, RepositoryRef};
use super::getter::Getter;
use super::index::Index;
use super::lock::{Lock, LockedDependency};
use super::loader;
use super::{Error, ErrorKind, Result};

/// A repository the resolver is allowed to consult, keyed by the name a
/// dependency's `@alias`/`alias:name`/bare-URL repository field resolves to.
#[derive(Clone, Debug)]
pub struct ConfiguredRepo {
    pub name: String,
    pub url: String,
    pub index: Index,
}

/// One dependency's resolved archive, ready to be written into `charts/`.
/// `bytes` is `None` for a `file://` dependency, which is loaded directly
/// from the chart tree rather than fetched and re-written.
pub struct ResolvedArchive {
    pub alias: String,
    pub bytes: Option<Vec<u8>>,
    pub locked: LockedDependency,
}

pub struct Resolution {
    pub lock: Lock,
    pub archives: Vec<ResolvedArchive>,
}

pub struct Resolver<'a> {
    getter: &'a dyn Getter,
    repos: &'a BTreeMap<String, ConfiguredRepo>,
}

impl<'a> Resolver<'a> {
    pub fn new(getter: &'a dyn Getter, repos: &'a BTreeMap<String, ConfiguredRepo>) -> Resolver<'a> {
        Resolver { getter, repos }
    }

    fn find_repo(&self, key: &str) -> Option<&ConfiguredRepo> {
        let name = key.split(':').next().unwrap_or(key);
        self.repos.get(name).or_else(|| self.repos.values().find(|r| r.url == key))
    }

    /// Resolve every enabled dependency of `chart` against the configured
    /// repositories / local filesystem, ignoring any existing `Chart.lock`
    /// (the "Update" mode of §4.2). `chart_dir` is required to resolve
    /// `file://` dependency paths; it may be omitted for charts that declare
    /// none.
    pub fn update(&self, chart: &Chart, chart_dir: Option<&Path>, merged_values: &chartkit_values::Value) -> Result<Resolution> {
        let enabled: Vec<&Dependency> = chart
            .metadata
            .dependencies
            .iter()
            .filter(|d| d.evaluate_enabled(merged_values))
            .collect();

        let mut archives = Vec::new();
        for dep in &enabled {
            archives.push(self.resolve_one(dep, chart_dir)?);
        }

        let locked: Vec<LockedDependency> = archives.iter().map(|a| a.locked.clone()).collect();
        let lock = Lock::new(locked, &chart.metadata.dependencies);
        Ok(Resolution { lock, archives })
    }

    /// Resolve exactly the versions recorded in `chart`'s existing lock (the
    /// "Build" mode of §4.2), after checking the lock still matches the
    /// declared dependency list (accepting either digest scheme for a
    /// v1-sourced chart).
    pub fn build(&self, chart: &Chart, chart_dir: Option<&Path>) -> Result<Resolution> {
        let lock = chart
            .lock
            .clone()
            .ok_or_else(|| Error::from(ErrorKind::LockStale("no Chart.lock present".to_string())))?;
        if !lock.matches(&chart.metadata.dependencies, chart.legacy_requirements.as_deref()) {
            bail!(ErrorKind::LockStale(
                "Chart.lock does not match the declared dependencies".to_string()
            ));
        }
        let mut archives = Vec::new();
        for locked in &lock.dependencies {
            archives.push(self.fetch_locked(locked, chart_dir)?);
        }
        Ok(Resolution { lock, archives })
    }

    fn resolve_one(&self, dep: &Dependency, chart_dir: Option<&Path>) -> Result<ResolvedArchive> {
        match dep.repository_ref()? {
            RepositoryRef::File(rel) => {
                let dir = chart_dir.ok_or_else(|| {
                    Error::from(ErrorKind::RepoNotConfigured(format!(
                        "'{}' is a file:// dependency but no chart directory was given",
                        dep.name
                    )))
                })?;
                let sub_dir = dir.join(&rel);
                let sub = loader::load_dir(&sub_dir)?;
                let range = VersionReq::parse(&dep.version)?;
                let version = sub.metadata.semver()?;
                if !range.matches(&version) {
                    bail!(ErrorKind::VersionNotFound(dep.name.clone(), dep.version.clone()));
                }
                let digest = digest_dir(&sub_dir)?;
                Ok(ResolvedArchive {
                    alias: dep.import_alias().to_string(),
                    bytes: None,
                    locked: LockedDependency {
                        name: dep.name.clone(),
                        version: sub.metadata.version.clone(),
                        repository: dep.repository.clone(),
                        digest,
                    },
                })
            }
            RepositoryRef::Oci(reference) => {
                let bytes = self.getter.get(&format!("oci://{}", reference))?;
                let digest = digest_bytes(&bytes);
                Ok(ResolvedArchive {
                    alias: dep.import_alias().to_string(),
                    bytes: Some(bytes),
                    locked: LockedDependency {
                        name: dep.name.clone(),
                        version: dep.version.clone(),
                        repository: dep.repository.clone(),
                        digest,
                    },
                })
            }
            RepositoryRef::Http(_) | RepositoryRef::Alias(_) => {
                let key = dep.repository.trim_start_matches('@');
                let repo = self
                    .find_repo(key)
                    .ok_or_else(|| Error::from(ErrorKind::RepoNotConfigured(dep.repository.clone())))?;
                let range = VersionReq::parse(&dep.version)?;
                let entry = repo.index.find(&dep.name, &range)?;
                let url = entry
                    .urls
                    .first()
                    .ok_or_else(|| Error::from(ErrorKind::VersionNotFound(dep.name.clone(), dep.version.clone())))?;
                let absolute = resolve_relative_url(&repo.url, url);
                let bytes = self.getter.get(&absolute)?;
                let digest = digest_bytes(&bytes);
                if digest != entry.digest {
                    bail!(ErrorKind::DigestMismatch(dep.name.clone()));
                }
                Ok(ResolvedArchive {
                    alias: dep.import_alias().to_string(),
                    bytes: Some(bytes),
                    locked: LockedDependency {
                        name: dep.name.clone(),
                        version: entry.metadata.version.clone(),
                        repository: dep.repository.clone(),
                        digest,
                    },
                })
            }
        }
    }

    fn fetch_locked(&self, locked: &LockedDependency, chart_dir: Option<&Path>) -> Result<ResolvedArchive> {
        let dummy = Dependency {
            name: locked.name.clone(),
            version: format!("={}", locked.version),
            repository: locked.repository.clone(),
            condition: None,
            tags: vec![],
            alias: None,
            import_values: vec![],
            enabled: true,
        };
        self.resolve_one(&dummy, chart_dir)
    }
}

fn resolve_relative_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match ::url::Url::parse(base).and_then(|b| b.join(url)) {
        Ok(joined) => joined.to_string(),
        Err(_) => format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/')),
    }
}

fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.input(bytes);
    format!("sha256:{:x}", hasher.result())
}

/// A stable digest for a local (`file://`) dependency: every file's relative
/// path and content, hashed in path order so it is independent of
/// filesystem traversal order.
fn digest_dir(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            entries.push(entry.path().to_path_buf());
        }
    }
    entries.sort();
    for path in entries {
        let rel = path.strip_prefix(dir).unwrap_or(&path);
        hasher.input(rel.to_string_lossy().as_bytes());
        hasher.input(fs::read(&path)?);
    }
    Ok(format!("sha256:{:x}", hasher.result()))
}

/// Atomically replace a chart's `charts/` subtree with the resolved set:
/// stage every downloaded archive in a temp directory, then rename it into
/// place, deleting prior archives no longer in the resolved set (local,
/// unrepositoried dependencies are never deleted — they live in the chart
/// tree directly, not as a staged download).
pub fn commit_to_charts_dir(chart_dir: &Path, resolution: &Resolution) -> Result<()> {
    let charts_dir = chart_dir.join("charts");
    fs::create_dir_all(&charts_dir)?;
    let staging = tempfile::tempdir_in(&charts_dir)?;

    let mut staged_names = Vec::new();
    for archive in &resolution.archives {
        let bytes = match &archive.bytes {
            Some(b) => b,
            None => continue,
        };
        let filename = format!("{}-{}.tgz", archive.locked.name, archive.locked.version);
        fs::write(staging.path().join(&filename), bytes)?;
        staged_names.push(filename);
    }

    let resolved_names: std::collections::HashSet<String> = staged_names.iter().cloned().collect();
    for entry in fs::read_dir(&charts_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".tgz") && !resolved_names.contains(&name) {
            let _ = fs::remove_file(entry.path());
        }
    }
    for name in staged_names {
        fs::rename(staging.path().join(&name), charts_dir.join(&name))?;
    }
    Ok(())
}
