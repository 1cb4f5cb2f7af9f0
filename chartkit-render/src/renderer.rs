use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::iter;

use serde_json::Value as JsonValue;
use tera::{Context, Tera};

use chartkit_core::Chart;
use chartkit_values::context::ChartInfo;
use chartkit_values::{RenderContext, Value};

use super::{Error, ErrorKind, Result};

/// The output of rendering one chart tree: every non-`NOTES.txt` template's
/// rendered text, keyed by fully-qualified logical path
/// (`<chartname>/templates/foo.yaml`), plus the root chart's rendered notes
/// (sub-chart `NOTES.txt` files are not part of the release's notes, only
/// the chart actually being installed/upgraded contributes one).
#[derive(Clone, Debug, Default)]
pub struct RenderedChart {
    pub manifests: BTreeMap<String, String>,
    pub notes: Option<String>,
}

/// Evaluates a chart's template set against a render context. Deliberately
/// template-language-agnostic at this boundary (spec §1/§4.4): the default
/// implementation happens to be `tera`-backed, but nothing downstream
/// depends on that.
pub trait Renderer {
    /// `enabled` is the set of import aliases (spec §4.3 "enabled
    /// determination") whose sub-charts should be recursed into; disabled
    /// sub-charts and everything under them are skipped entirely.
    fn render(&self, chart: &Chart, ctx: &RenderContext, enabled: &BTreeSet<String>) -> Result<RenderedChart>;
}

fn to_yaml_filter(v: JsonValue, _: HashMap<String, JsonValue>) -> tera::Result<JsonValue> {
    let rendered = serde_yaml::to_string(&v).map_err(|e| tera::Error::from(e.to_string()))?;
    let trimmed = rendered.trim_start_matches("---\n").trim_end();
    Ok(JsonValue::String(trimmed.to_string()))
}

fn indent_filter(v: JsonValue, args: HashMap<String, JsonValue>) -> tera::Result<JsonValue> {
    let s = v.as_str().ok_or_else(|| tera::Error::from("indent: value must be a string"))?;
    let spaces = args.get("spaces").and_then(JsonValue::as_u64).unwrap_or(2);
    let pad: String = iter::repeat(' ').take(spaces as usize).collect();
    let out: Vec<String> = s.lines().map(|l| if l.is_empty() { l.to_string() } else { format!("{}{}", pad, l) }).collect();
    Ok(JsonValue::String(out.join("\n")))
}

/// Like `indent`, but also prefixes a leading newline — the common idiom for
/// splicing a `toYaml`'d block under a parent key at a fixed depth.
fn nindent_filter(v: JsonValue, args: HashMap<String, JsonValue>) -> tera::Result<JsonValue> {
    let indented = indent_filter(v, args)?;
    let s = indented.as_str().unwrap_or("");
    Ok(JsonValue::String(format!("\n{}", s)))
}

/// Whether a logical template path is a partial/helper: its basename starts
/// with `_`, the same convention Helm charts use for files like
/// `_helpers.tpl` that only ever get `{% include %}`d, never rendered on
/// their own (spec §4.4 "Partials/helpers produce no output").
fn is_partial(path: &str) -> bool {
    path.rsplit('/').next().map(|base| base.starts_with('_')).unwrap_or(false)
}

fn trimmed_render(tera: &Tera, name: &str, ctx: &Context) -> Result<String> {
    let rendered = tera
        .render(name, ctx)
        .map_err(|e| Error::from(ErrorKind::RenderFailure(name.to_string(), 0, e.to_string())))?;
    let lines: Vec<&str> = rendered.lines().map(|l| l.trim_end()).collect();
    Ok(lines.join("\n"))
}

/// The default `Renderer`, built directly on the teacher's own `tera` usage
/// pattern (`Tera::default()`, `add_raw_template`, `register_filter`,
/// whitespace-trimmed render) in `shipcat_definitions::template`, with the
/// filter set swapped from secret/indent helpers to the chart-renderer
/// conveniences a template set actually needs here.
#[derive(Default)]
pub struct TeraRenderer;

impl TeraRenderer {
    pub fn new() -> TeraRenderer {
        TeraRenderer
    }

    fn render_one(&self, chart: &Chart, ctx: &RenderContext, is_root: bool) -> Result<(BTreeMap<String, String>, Option<String>)> {
        let mut tera = Tera::default();
        tera.register_filter("toYaml", to_yaml_filter);
        tera.register_filter("indent", indent_filter);
        tera.register_filter("nindent", nindent_filter);
        for (path, src) in &chart.templates {
            tera.add_raw_template(path, src)?;
        }

        let context_value = ctx.to_value().to_json();
        let mut tera_ctx = Context::new();
        if let Some(map) = context_value.as_object() {
            for (k, v) in map {
                tera_ctx.insert(k, v);
            }
        }

        let mut manifests = BTreeMap::new();
        let mut notes = None;
        for path in chart.templates.keys() {
            let rendered = trimmed_render(&tera, path, &tera_ctx)?;
            if path.ends_with("NOTES.txt") {
                if is_root {
                    notes = Some(rendered);
                }
                continue;
            }
            // Partials/helpers (`_helpers.tpl` and friends) are registered
            // with Tera above for `{% include %}`/`{% import %}` but never
            // produce manifest output of their own (spec §4.4).
            if is_partial(path) {
                continue;
            }
            manifests.insert(format!("{}/{}", chart.name(), path), rendered);
        }
        Ok((manifests, notes))
    }

    fn scoped_context(&self, parent: &Chart, child: &Chart, parent_ctx: &RenderContext) -> RenderContext {
        let alias = parent.alias_of(child);
        let mut values = parent_ctx.values.get_path(&alias).cloned().unwrap_or_else(Value::empty_mapping);
        if let Some(global) = parent_ctx.values.get_path("global") {
            let _ = values.set_path("global", global.clone());
        }
        let files = child
            .files
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect();
        RenderContext {
            release: parent_ctx.release.clone(),
            capabilities: parent_ctx.capabilities.clone(),
            chart: ChartInfo {
                name: child.name().to_string(),
                version: child.version().to_string(),
                app_version: child.metadata.app_version.clone(),
            },
            files,
            values,
        }
    }
}

impl Renderer for TeraRenderer {
    fn render(&self, chart: &Chart, ctx: &RenderContext, enabled: &BTreeSet<String>) -> Result<RenderedChart> {
        let mut out = RenderedChart::default();
        self.render_recursive(chart, ctx, enabled, true, &mut out)?;
        Ok(out)
    }
}

impl TeraRenderer {
    fn render_recursive(
        &self,
        chart: &Chart,
        ctx: &RenderContext,
        enabled: &BTreeSet<String>,
        is_root: bool,
        out: &mut RenderedChart,
    ) -> Result<()> {
        let (manifests, notes) = self.render_one(chart, ctx, is_root)?;
        out.manifests.extend(manifests);
        if notes.is_some() {
            out.notes = notes;
        }
        for child in &chart.charts {
            let alias = chart.alias_of(child);
            if !enabled.contains(&alias) {
                continue;
            }
            let child_ctx = self.scoped_context(chart, child, ctx);
            self.render_recursive(child, &child_ctx, enabled, false, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartkit_core::chart::ChartType;
    use chartkit_values::context::{Capabilities, KubeVersion, ReleaseContext};
    use std::collections::BTreeMap as Map;

    fn minimal_chart(name: &str, templates: &[(&str, &str)]) -> Chart {
        let metadata = chartkit_core::chart::Metadata {
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
        };
        Chart {
            metadata,
            values: Value::empty_mapping(),
            schema: None,
            templates: templates.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            notes: None,
            files: Map::new(),
            crds: Map::new(),
            charts: vec![],
            lock: None,
            legacy_requirements: None,
        }
    }

    fn base_ctx(values: Value) -> RenderContext {
        RenderContext {
            release: ReleaseContext::for_install("r1", "n1"),
            capabilities: Capabilities {
                kube_version: KubeVersion::parse("1.28.0"),
                api_versions: vec![],
                helm_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            chart: ChartInfo {
                name: "hello".to_string(),
                version: "1.0.0".to_string(),
                app_version: None,
            },
            files: Map::new(),
            values,
        }
    }

    #[test]
    fn renders_a_template_referencing_release_name() {
        let chart = minimal_chart(
            "hello",
            &[("templates/cm.yaml", "kind: ConfigMap\nmetadata:\n  name: {{ Release.name }}-cm\n")],
        );
        let ctx = base_ctx(Value::empty_mapping());
        let renderer = TeraRenderer::new();
        let out = renderer.render(&chart, &ctx, &Default::default()).unwrap();
        let rendered = out.manifests.get("hello/templates/cm.yaml").unwrap();
        assert!(rendered.contains("r1-cm"));
    }

    #[test]
    fn notes_txt_is_excluded_from_manifest_stream() {
        let chart = minimal_chart("hello", &[("templates/NOTES.txt", "thanks for installing {{ Chart.name }}")]);
        let ctx = base_ctx(Value::empty_mapping());
        let renderer = TeraRenderer::new();
        let out = renderer.render(&chart, &ctx, &Default::default()).unwrap();
        assert!(out.manifests.is_empty());
        assert_eq!(out.notes.unwrap(), "thanks for installing hello");
    }

    #[test]
    fn helper_partials_produce_no_manifest_output() {
        let chart = minimal_chart(
            "hello",
            &[
                ("templates/_helpers.tpl", "{% macro label() %}app={{ Chart.name }}{% endmacro %}"),
                ("templates/cm.yaml", "kind: ConfigMap\nmetadata:\n  name: {{ Release.name }}-cm\n"),
            ],
        );
        let ctx = base_ctx(Value::empty_mapping());
        let renderer = TeraRenderer::new();
        let out = renderer.render(&chart, &ctx, &Default::default()).unwrap();
        assert_eq!(out.manifests.len(), 1);
        assert!(out.manifests.contains_key("hello/templates/cm.yaml"));
        assert!(!out.manifests.keys().any(|k| k.contains("_helpers")));
    }

    #[test]
    fn disabled_subchart_templates_never_render() {
        let mut parent = minimal_chart("parent", &[]);
        let child = minimal_chart("db", &[("templates/cm.yaml", "kind: ConfigMap\n")]);
        parent.charts.push(child);
        let ctx = base_ctx(Value::empty_mapping());
        let renderer = TeraRenderer::new();
        let out = renderer.render(&parent, &ctx, &Default::default()).unwrap();
        assert!(out.manifests.is_empty());
    }
}
