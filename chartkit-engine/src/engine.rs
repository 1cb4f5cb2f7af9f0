//! The release state machine (spec §4.5): `install`, `upgrade`, `rollback`,
//! `uninstall` and `test`, each an explicit orchestration function over an
//! [`EngineConfig`], a `&dyn KubeClient` and a `&dyn ReleaseStorage` — no
//! part of this module reads crate-level mutable state (spec §9's
//! process-wide-configuration redesign note).

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;

use chartkit_core::{Chart, ImportValueSpec};
use chartkit_kube::{ClusterCapabilities, KubeClient};
use chartkit_release::{ApplyMethod, Release, ReleaseStorage, Status};
use chartkit_render::{Document, Hook, HookEvent, ManifestStream, Renderer};
use chartkit_values::context::{ChartInfo, ReleaseContext};
use chartkit_values::engine::{build_context, merge_layers, ImportValue, SubchartNode, ValuesLayer};
use chartkit_values::{Capabilities, KubeVersion, RenderContext, Value};

use super::cancel::CancellationToken;
use super::config::EngineConfig;
use super::options::{InstallOptions, RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions, ValueInputs};
use super::{hooks, reconcile};
use super::{Error, ErrorKind, Result};

/// The release state machine. Holds only references: configuration, a
/// cluster connection and a storage backend, all supplied by the caller
/// rather than constructed here (spec AMBIENT-3).
pub struct Engine<'a> {
    config: &'a EngineConfig,
    kube: &'a dyn KubeClient,
    storage: &'a dyn ReleaseStorage,
    renderer: &'a dyn Renderer,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a EngineConfig, kube: &'a dyn KubeClient, storage: &'a dyn ReleaseStorage, renderer: &'a dyn Renderer) -> Engine<'a> {
        Engine { config, kube, storage, renderer }
    }

    /// Install a chart under a fresh (or reinstallable) release name (spec
    /// §4.5 "Install"). `capabilities` is supplied by the caller, typically
    /// from a prior `chartkit_kube::Prober::probe()` call.
    pub fn install(
        &self,
        chart: Chart,
        name: &str,
        namespace: &str,
        capabilities: ClusterCapabilities,
        opts: InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Release> {
        chartkit_release::release::validate_release_name(name)?;

        let last = self.storage.last(name)?;
        let revision = match &last {
            None => 1,
            Some(r) => {
                if r.status.is_pending() {
                    return Err(release_err(chartkit_release::ErrorKind::OperationInProgress(name.to_string(), r.status.to_string())));
                }
                if r.status.is_live() || !opts.replace {
                    return Err(release_err(chartkit_release::ErrorKind::AlreadyExists(name.to_string())));
                }
                r.revision + 1
            }
        };

        if !opts.skip_crds {
            self.apply_crds(&chart);
        }

        let now = Utc::now();
        let release_ctx = ReleaseContext::for_install(name, namespace);
        let (merged_values, stream, notes) = self.render(&chart, release_ctx, &capabilities, &opts.values)?;

        if opts.dry_run {
            let manifest = manifest_text(&stream);
            let mut release = Release::new_pending(
                name,
                namespace,
                revision,
                chart,
                merged_values,
                manifest,
                stream.hooks.clone(),
                Status::PendingInstall,
                now,
                ApplyMethod::ServerSideApply,
            )?;
            release.info.notes = notes.unwrap_or_default();
            return Ok(release);
        }

        reconcile::check_adoptable(self.kube, namespace, &stream.resources, name)?;

        let manifest_text_value = manifest_text(&stream);
        let mut release = Release::new_pending(
            name,
            namespace,
            revision,
            chart,
            merged_values,
            manifest_text_value,
            stream.hooks.clone(),
            Status::PendingInstall,
            now,
            ApplyMethod::ServerSideApply,
        )?;
        release.info.notes = notes.unwrap_or_default();
        self.storage.create(&release)?;

        let pre_hooks = stream.hooks_for(HookEvent::PreInstall);
        if let Err(e) = hooks::run_all(self.kube, namespace, &pre_hooks, cancel, opts.timeout) {
            return Err(self.fail_install(release, namespace, &[], e, opts.atomic));
        }

        let install_order: Vec<&Document> = stream.resources.iter().collect();
        if let Err(e) = reconcile::apply_all(self.kube, namespace, &install_order, name) {
            return Err(self.fail_install(release, namespace, &install_order, e, opts.atomic));
        }

        if opts.wait {
            if let Err(e) = self.wait_for_all(&install_order, namespace, opts.timeout, opts.wait_for_jobs) {
                return Err(self.fail_install(release, namespace, &install_order, e, opts.atomic));
            }
        }

        let post_hooks = stream.hooks_for(HookEvent::PostInstall);
        if let Err(e) = hooks::run_all(self.kube, namespace, &post_hooks, cancel, opts.timeout) {
            return Err(self.fail_install(release, namespace, &install_order, e, opts.atomic));
        }

        release.transition(Status::Deployed, Utc::now(), None);
        self.storage.update(&release)?;
        self.storage.prune(name, self.config.max_history)?;
        Ok(release)
    }

    /// Upgrade the currently deployed revision of `name` to a new chart
    /// and/or value set (spec §4.5 "Upgrade").
    pub fn upgrade(&self, chart: Chart, name: &str, capabilities: ClusterCapabilities, opts: UpgradeOptions, cancel: &CancellationToken) -> Result<Release> {
        let deployed = self.storage.last(name)?.ok_or_else(|| Error::from(ErrorKind::NoDeployedRevision(name.to_string())))?;
        if deployed.status.is_pending() {
            return Err(release_err(chartkit_release::ErrorKind::OperationInProgress(name.to_string(), deployed.status.to_string())));
        }
        if deployed.status != Status::Deployed {
            return Err(Error::from(ErrorKind::NoDeployedRevision(name.to_string())));
        }

        let namespace = deployed.namespace.clone();
        let revision = deployed.revision + 1;
        let now = Utc::now();

        let release_ctx = ReleaseContext::for_upgrade(name, &namespace, revision);
        let (merged_values, stream, notes) = self.render(&chart, release_ctx, &capabilities, &opts.values)?;

        if opts.dry_run {
            let manifest = manifest_text(&stream);
            let mut release = Release::new_pending(
                name,
                &namespace,
                revision,
                chart,
                merged_values,
                manifest,
                stream.hooks.clone(),
                Status::PendingUpgrade,
                now,
                ApplyMethod::ServerSideApply,
            )?;
            release.info.notes = notes.unwrap_or_default();
            return Ok(release);
        }

        let old_resources = documents_from_manifest(&deployed.manifest)?;
        let diff = reconcile::diff(&old_resources, &stream.resources);

        let manifest_text_value = manifest_text(&stream);
        let mut release = Release::new_pending(
            name,
            &namespace,
            revision,
            chart,
            merged_values,
            manifest_text_value,
            stream.hooks.clone(),
            Status::PendingUpgrade,
            now,
            ApplyMethod::ServerSideApply,
        )?;
        release.info.first_deployed = deployed.info.first_deployed;
        release.info.notes = notes.unwrap_or_default();
        self.storage.create(&release)?;

        let mut created: Vec<&Document> = Vec::new();

        let pre_hooks = stream.hooks_for(HookEvent::PreUpgrade);
        if let Err(e) = hooks::run_all(self.kube, &namespace, &pre_hooks, cancel, opts.timeout) {
            return Err(self.fail_upgrade(release, &namespace, &old_resources, &created, &diff, e, &opts));
        }

        if let Err(e) = reconcile::apply_all(self.kube, &namespace, &diff.to_create, name) {
            return Err(self.fail_upgrade(release, &namespace, &old_resources, &created, &diff, e, &opts));
        }
        created.extend(diff.to_create.iter().cloned());

        if let Err(e) = reconcile::apply_all(self.kube, &namespace, &diff.to_update, name) {
            return Err(self.fail_upgrade(release, &namespace, &old_resources, &created, &diff, e, &opts));
        }
        if let Err(e) = reconcile::delete_all_unpinned(self.kube, &namespace, &diff.to_delete) {
            return Err(self.fail_upgrade(release, &namespace, &old_resources, &created, &diff, e, &opts));
        }

        if opts.wait {
            let mut to_wait: Vec<&Document> = diff.to_create.clone();
            to_wait.extend(diff.to_update.iter().cloned());
            if let Err(e) = self.wait_for_all(&to_wait, &namespace, opts.timeout, opts.wait_for_jobs) {
                return Err(self.fail_upgrade(release, &namespace, &old_resources, &created, &diff, e, &opts));
            }
        }

        let post_hooks = stream.hooks_for(HookEvent::PostUpgrade);
        if let Err(e) = hooks::run_all(self.kube, &namespace, &post_hooks, cancel, opts.timeout) {
            return Err(self.fail_upgrade(release, &namespace, &old_resources, &created, &diff, e, &opts));
        }

        release.transition(Status::Deployed, Utc::now(), None);
        self.storage.update(&release)?;

        let mut superseded = deployed;
        superseded.transition(Status::Superseded, Utc::now(), None);
        self.storage.update(&superseded)?;

        self.storage.prune(name, self.config.max_history)?;
        Ok(release)
    }

    /// Roll a release back to an earlier revision's chart/values/manifest
    /// (spec §4.5 "Rollback"). `opts.revision` defaults to the immediate
    /// predecessor of the currently deployed revision.
    pub fn rollback(&self, name: &str, opts: RollbackOptions, cancel: &CancellationToken) -> Result<Release> {
        let deployed = self.storage.last(name)?.ok_or_else(|| Error::from(ErrorKind::NoDeployedRevision(name.to_string())))?;
        if deployed.status.is_pending() {
            return Err(release_err(chartkit_release::ErrorKind::OperationInProgress(name.to_string(), deployed.status.to_string())));
        }

        let target_revision = match opts.revision {
            Some(r) => r,
            None => {
                if deployed.revision <= 1 {
                    return Err(Error::from(ErrorKind::NothingToRollBack(name.to_string())));
                }
                deployed.revision - 1
            }
        };
        if target_revision == 0 || target_revision == deployed.revision {
            return Err(Error::from(ErrorKind::NothingToRollBack(name.to_string())));
        }
        let target = self
            .storage
            .get(name, target_revision)?
            .ok_or_else(|| Error::from(ErrorKind::NothingToRollBack(name.to_string())))?;

        let namespace = deployed.namespace.clone();
        let new_revision = deployed.revision + 1;
        let now = Utc::now();

        let mut release = Release::new_pending(
            name,
            &namespace,
            new_revision,
            target.chart.clone(),
            target.config.clone(),
            target.manifest.clone(),
            target.hooks.clone(),
            Status::PendingRollback,
            now,
            target.apply_method,
        )?;
        release.info.first_deployed = deployed.info.first_deployed;
        release.info.notes = target.info.notes.clone();
        self.storage.create(&release)?;

        let old_resources = documents_from_manifest(&deployed.manifest)?;
        let new_resources = documents_from_manifest(&target.manifest)?;
        let diff = reconcile::diff(&old_resources, &new_resources);

        {
            let pre_hooks: Vec<&Hook> = release.hooks.iter().filter(|h| h.events.contains(&HookEvent::PreRollback)).collect();
            if let Err(e) = hooks::run_all(self.kube, &namespace, &pre_hooks, cancel, opts.timeout) {
                release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
                let _ = self.storage.update(&release);
                return Err(e);
            }
        }

        let reconciled = reconcile::apply_all(self.kube, &namespace, &diff.to_create, name)
            .and_then(|_| reconcile::apply_all(self.kube, &namespace, &diff.to_update, name))
            .and_then(|_| reconcile::delete_all_unpinned(self.kube, &namespace, &diff.to_delete));
        if let Err(e) = reconciled {
            release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
            let _ = self.storage.update(&release);
            return Err(e);
        }

        if opts.wait {
            let mut to_wait: Vec<&Document> = diff.to_create.clone();
            to_wait.extend(diff.to_update.iter().cloned());
            if let Err(e) = self.wait_for_all(&to_wait, &namespace, opts.timeout, opts.wait_for_jobs) {
                release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
                let _ = self.storage.update(&release);
                return Err(e);
            }
        }

        {
            let post_hooks: Vec<&Hook> = release.hooks.iter().filter(|h| h.events.contains(&HookEvent::PostRollback)).collect();
            if let Err(e) = hooks::run_all(self.kube, &namespace, &post_hooks, cancel, opts.timeout) {
                release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
                let _ = self.storage.update(&release);
                return Err(e);
            }
        }

        release.transition(Status::Deployed, Utc::now(), None);
        self.storage.update(&release)?;

        for mut r in self.storage.history(name)? {
            if r.revision != new_revision && r.status == Status::Deployed {
                r.transition(Status::Superseded, Utc::now(), None);
                let _ = self.storage.update(&r);
            }
        }

        self.storage.prune(name, self.config.max_history)?;
        Ok(release)
    }

    /// Uninstall a release (spec §4.5 "Uninstall"): delete resources in
    /// reverse install order, then either drop the history entirely or keep
    /// a final `uninstalled` record per `opts.keep_history`.
    pub fn uninstall(&self, name: &str, opts: UninstallOptions, cancel: &CancellationToken) -> Result<Release> {
        let last = self.storage.last(name)?.ok_or_else(|| release_err(chartkit_release::ErrorKind::NoRevisions(name.to_string())))?;
        if last.status == Status::Uninstalled {
            return Err(release_err(chartkit_release::ErrorKind::NoRevisions(name.to_string())));
        }
        if last.status.is_pending() {
            return Err(release_err(chartkit_release::ErrorKind::OperationInProgress(name.to_string(), last.status.to_string())));
        }

        let namespace = last.namespace.clone();
        let mut release = last;
        release.transition(Status::Uninstalling, Utc::now(), None);
        self.storage.update(&release)?;

        {
            let pre_hooks: Vec<&Hook> = release.hooks.iter().filter(|h| h.events.contains(&HookEvent::PreDelete)).collect();
            if let Err(e) = hooks::run_all(self.kube, &namespace, &pre_hooks, cancel, opts.timeout) {
                release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
                let _ = self.storage.update(&release);
                return Err(e);
            }
        }

        let resources = documents_from_manifest(&release.manifest)?;
        let uninstall_order: Vec<&Document> = resources.iter().rev().collect();
        if let Err(e) = reconcile::delete_all_unpinned(self.kube, &namespace, &uninstall_order) {
            release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
            let _ = self.storage.update(&release);
            return Err(e);
        }

        {
            let post_hooks: Vec<&Hook> = release.hooks.iter().filter(|h| h.events.contains(&HookEvent::PostDelete)).collect();
            if let Err(e) = hooks::run_all(self.kube, &namespace, &post_hooks, cancel, opts.timeout) {
                release.transition(Status::Failed, Utc::now(), Some(e.to_string()));
                let _ = self.storage.update(&release);
                return Err(e);
            }
        }

        if opts.keep_history {
            release.transition(Status::Uninstalled, Utc::now(), None);
            self.storage.update(&release)?;
        } else {
            self.storage.delete_all(name)?;
        }
        Ok(release)
    }

    /// Run a release's test hooks (the `test`/`test-failure` events) without
    /// touching its stored status (spec §4.5 "Test").
    pub fn test(&self, name: &str, opts: TestOptions, cancel: &CancellationToken) -> Result<()> {
        let release = self.storage.last(name)?.ok_or_else(|| release_err(chartkit_release::ErrorKind::NoRevisions(name.to_string())))?;
        let test_hooks: Vec<&Hook> = release
            .hooks
            .iter()
            .filter(|h| h.events.iter().any(|e| matches!(e, HookEvent::TestSuccess | HookEvent::TestFailure)))
            .collect();
        hooks::run_all(self.kube, &release.namespace, &test_hooks, cancel, opts.timeout)
    }

    fn render(
        &self,
        chart: &Chart,
        release_ctx: ReleaseContext,
        capabilities: &ClusterCapabilities,
        values: &ValueInputs,
    ) -> Result<(Value, ManifestStream, Option<String>)> {
        let mut layers = vec![ValuesLayer::ChartDefaults(chart.values.clone())];
        for f in &values.files {
            layers.push(ValuesLayer::UserFile(f.clone()));
        }
        if !values.overrides.is_empty() {
            layers.push(ValuesLayer::Cli(values.overrides.clone()));
        }
        let root_values = merge_layers(layers)?;

        if let Some(schema_src) = &chart.schema {
            let schema = chartkit_values::schema::Schema::compile(schema_src)?;
            schema.validate(&root_values)?;
        }

        let (full_values, enabled) = self.fold_subcharts(chart, root_values)?;

        let caps = Capabilities {
            kube_version: KubeVersion::parse(&capabilities.kube_version),
            api_versions: capabilities.api_versions.clone(),
            helm_version: capabilities.helm_version.clone(),
        };
        let ctx = RenderContext {
            release: release_ctx,
            capabilities: caps,
            chart: ChartInfo {
                name: chart.name().to_string(),
                version: chart.version().to_string(),
                app_version: chart.metadata.app_version.clone(),
            },
            files: chart.files.iter().map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned())).collect(),
            values: full_values.clone(),
        };
        let rendered = self.renderer.render(chart, &ctx, &enabled)?;
        let stream = ManifestStream::from_rendered(&rendered.manifests)?;
        Ok((full_values, stream, rendered.notes))
    }

    /// Recursively fold each enabled sub-chart's own merged value tree into
    /// `root_values`, nested under its alias, validating each sub-chart's
    /// merged tree against its own schema (spec §4.3 "schema validation") as
    /// it is folded in. Returns the fully merged tree plus the set of
    /// aliases that are enabled (for the renderer's recursion and the
    /// `Subcharts` reserved key).
    fn fold_subcharts(&self, chart: &Chart, root_values: Value) -> Result<(Value, BTreeSet<String>)> {
        let mut nodes = Vec::new();
        let mut enabled = BTreeSet::new();
        for child in &chart.charts {
            let alias = chart.alias_of(child);
            let dep = chart.metadata.dependencies.iter().find(|d| d.name == child.metadata.name);
            let is_enabled = dep.map(|d| d.evaluate_enabled(&root_values)).unwrap_or(true);
            if !is_enabled {
                continue;
            }
            enabled.insert(alias.clone());

            let (child_values, _) = self.fold_subcharts(child, child.values.clone())?;
            if let Some(schema_src) = &child.schema {
                let schema = chartkit_values::schema::Schema::compile(schema_src)?;
                schema.validate(&child_values)?;
            }
            let import_values = dep.map(|d| convert_imports(&d.import_values)).unwrap_or_default();
            nodes.push(SubchartNode { alias, values: child_values, import_values });
        }
        let result = build_context(root_values, &nodes)?;
        Ok((result, enabled))
    }

    fn apply_crds(&self, chart: &Chart) {
        for (path, raw) in &chart.crds {
            for doc in serde_yaml::Deserializer::from_str(raw) {
                let value = match YamlValue::deserialize(doc) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("crd '{}' failed to parse, skipping: {}", path, e);
                        continue;
                    }
                };
                if value.is_null() {
                    continue;
                }
                let kind = value.get("kind").and_then(YamlValue::as_str).unwrap_or("CustomResourceDefinition").to_string();
                let api_version = value.get("apiVersion").and_then(YamlValue::as_str).unwrap_or("apiextensions.k8s.io/v1").to_string();
                let manifest = match serde_json::to_value(&value) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("crd '{}' failed to convert to JSON, skipping: {}", path, e);
                        continue;
                    }
                };
                if let Err(e) = self.kube.apply(&api_version, &kind, None, &manifest) {
                    warn!("crd '{}' apply failed (continuing best-effort): {}", path, e);
                }
            }
        }
    }

    fn wait_for_all(&self, docs: &[&Document], namespace: &str, timeout: Duration, wait_for_jobs: bool) -> Result<()> {
        for doc in docs {
            if doc.kind == "Job" && !wait_for_jobs {
                continue;
            }
            self.kube.wait_until_ready(&doc.api_version, &doc.kind, Some(namespace), &doc.name, timeout)?;
        }
        Ok(())
    }

    /// On install failure: if `atomic`, delete whatever was applied so far
    /// (in reverse order) before marking the release failed, so the failed
    /// record reflects a cleanly torn-down cluster state (spec §4.5
    /// scenario 2).
    fn fail_install(&self, mut release: Release, namespace: &str, applied: &[&Document], err: Error, atomic: bool) -> Error {
        if atomic {
            let reversed: Vec<&Document> = applied.iter().rev().cloned().collect();
            let _ = reconcile::delete_all_unpinned(self.kube, namespace, &reversed);
        }
        release.transition(Status::Failed, Utc::now(), Some(err.to_string()));
        let _ = self.storage.update(&release);
        err
    }

    /// On upgrade failure: `cleanup_on_fail` removes whatever this operation
    /// newly created; `atomic` additionally reverts updated resources back
    /// to their pre-upgrade state and removes newly created ones, bringing
    /// the cluster back to what the prior deployed revision described.
    fn fail_upgrade(
        &self,
        mut release: Release,
        namespace: &str,
        old_resources: &[Document],
        created: &[&Document],
        diff: &reconcile::Diff<'_>,
        err: Error,
        opts: &UpgradeOptions,
    ) -> Error {
        if opts.cleanup_on_fail {
            let reversed: Vec<&Document> = created.iter().rev().cloned().collect();
            let _ = reconcile::delete_all_unpinned(self.kube, namespace, &reversed);
        }
        if opts.atomic {
            let updated_keys: BTreeSet<(String, Option<String>, String)> =
                diff.to_update.iter().map(|d| (d.kind.clone(), d.namespace.clone(), d.name.clone())).collect();
            let revert: Vec<&Document> = old_resources
                .iter()
                .filter(|d| updated_keys.contains(&(d.kind.clone(), d.namespace.clone(), d.name.clone())))
                .collect();
            let _ = reconcile::apply_all(self.kube, namespace, &revert, &release.name);
            let _ = reconcile::delete_all_unpinned(self.kube, namespace, &diff.to_create);
        }
        release.transition(Status::Failed, Utc::now(), Some(err.to_string()));
        let _ = self.storage.update(&release);
        err
    }
}

fn release_err(kind: chartkit_release::ErrorKind) -> Error {
    chartkit_release::Error::from(kind).into()
}

fn convert_imports(specs: &[ImportValueSpec]) -> Vec<ImportValue> {
    specs
        .iter()
        .map(|s| match s {
            ImportValueSpec::Same(k) => ImportValue::Same(k.clone()),
            ImportValueSpec::Mapped { child, parent } => ImportValue::Renamed { child: child.clone(), parent: parent.clone() },
        })
        .collect()
}

fn manifest_text(stream: &ManifestStream) -> String {
    stream.resources.iter().filter_map(|d| serde_yaml::to_string(&d.raw).ok()).collect::<Vec<_>>().join("---\n")
}

fn documents_from_manifest(text: &str) -> Result<Vec<Document>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut map = std::collections::BTreeMap::new();
    map.insert("stored".to_string(), text.to_string());
    Ok(ManifestStream::from_rendered(&map)?.resources)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use serde_json::Value as JsonValue;

    use chartkit_core::{ChartType, Metadata};
    use chartkit_release::InMemoryStorage;
    use chartkit_render::TeraRenderer;

    use super::*;

    struct FakeCluster {
        objects: Mutex<BTreeMap<String, JsonValue>>,
        fail_on_apply: Option<String>,
    }

    impl FakeCluster {
        fn new() -> FakeCluster {
            FakeCluster { objects: Mutex::new(BTreeMap::new()), fail_on_apply: None }
        }

        fn failing_on(name: &str) -> FakeCluster {
            FakeCluster { objects: Mutex::new(BTreeMap::new()), fail_on_apply: Some(name.to_string()) }
        }
    }

    impl KubeClient for FakeCluster {
        fn apply(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, manifest: &JsonValue) -> Result<()> {
            let name = manifest.pointer("/metadata/name").and_then(JsonValue::as_str).unwrap().to_string();
            if self.fail_on_apply.as_deref() == Some(name.as_str()) {
                return Err(Error::from(ErrorKind::Timeout(format!("apply {}", name), 1)));
            }
            self.objects.lock().unwrap().insert(name, manifest.clone());
            Ok(())
        }

        fn get(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, name: &str) -> Result<Option<JsonValue>> {
            Ok(self.objects.lock().unwrap().get(name).cloned())
        }

        fn delete(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, name: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(name);
            Ok(())
        }

        fn list(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, _label_selector: Option<&str>) -> Result<Vec<JsonValue>> {
            Ok(self.objects.lock().unwrap().values().cloned().collect())
        }

        fn wait_until_ready(&self, _api_version: &str, _kind: &str, _namespace: Option<&str>, _name: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn minimal_chart(name: &str, templates: &[(&str, &str)]) -> Chart {
        Chart {
            metadata: Metadata {
                api_version: "v2".to_string(),
                name: name.to_string(),
                version: "1.0.0".to_string(),
                kind: ChartType::Application,
                app_version: None,
                description: None,
                kube_version: None,
                keywords: vec![],
                home: None,
                sources: vec![],
                dependencies: vec![],
                maintainers: vec![],
                icon: None,
                deprecated: false,
                annotations: Default::default(),
            },
            values: Value::empty_mapping(),
            schema: None,
            templates: templates.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            notes: None,
            files: BTreeMap::new(),
            crds: BTreeMap::new(),
            charts: vec![],
            lock: None,
            legacy_requirements: None,
        }
    }

    fn caps() -> ClusterCapabilities {
        ClusterCapabilities {
            kube_version: "1.28.0".to_string(),
            api_versions: vec!["v1".to_string()],
            helm_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    #[test]
    fn install_happy_path_deploys_and_records_release() {
        let chart = minimal_chart(
            "hello",
            &[("templates/cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ Release.name }}-cm\n")],
        );
        let config = EngineConfig::default();
        let kube = FakeCluster::new();
        let storage = InMemoryStorage::new();
        let renderer = TeraRenderer::new();
        let engine = Engine::new(&config, &kube, &storage, &renderer);
        let cancel = CancellationToken::new();

        let release = engine
            .install(chart, "hello", "default", caps(), InstallOptions::default(), &cancel)
            .expect("install should succeed");

        assert_eq!(release.status, Status::Deployed);
        assert_eq!(release.revision, 1);
        assert!(kube.objects.lock().unwrap().contains_key("hello-cm"));

        let stored = storage.last("hello").unwrap().expect("release recorded");
        assert_eq!(stored.status, Status::Deployed);
    }

    #[test]
    fn atomic_install_failure_tears_down_what_it_applied() {
        let chart = minimal_chart(
            "hello",
            &[
                ("templates/a.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n"),
                ("templates/b.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n"),
            ],
        );
        let config = EngineConfig::default();
        let kube = FakeCluster::failing_on("b");
        let storage = InMemoryStorage::new();
        let renderer = TeraRenderer::new();
        let engine = Engine::new(&config, &kube, &storage, &renderer);
        let cancel = CancellationToken::new();
        let opts = InstallOptions { atomic: true, ..InstallOptions::default() };

        let result = engine.install(chart, "hello", "default", caps(), opts, &cancel);
        assert!(result.is_err());
        assert!(kube.objects.lock().unwrap().get("a").is_none(), "atomic rollback should delete what was already applied");

        let stored = storage.last("hello").unwrap().expect("failed release still recorded");
        assert_eq!(stored.status, Status::Failed);
    }

    #[test]
    fn reinstalling_a_live_release_without_replace_is_rejected() {
        let chart = minimal_chart("hello", &[("templates/cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n")]);
        let config = EngineConfig::default();
        let kube = FakeCluster::new();
        let storage = InMemoryStorage::new();
        let renderer = TeraRenderer::new();
        let engine = Engine::new(&config, &kube, &storage, &renderer);
        let cancel = CancellationToken::new();

        engine
            .install(chart.clone(), "hello", "default", caps(), InstallOptions::default(), &cancel)
            .expect("first install should succeed");

        let result = engine.install(chart, "hello", "default", caps(), InstallOptions::default(), &cancel);
        assert!(result.is_err());
    }
}
