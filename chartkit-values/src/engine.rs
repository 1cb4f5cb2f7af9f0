//! The merge pipeline: turns the ordered layers of chart defaults, parent
//! overrides, user-supplied files and CLI overrides into one value tree,
//! and folds in resolved sub-chart trees plus their `import-values`.

use std::collections::BTreeMap;

use super::{Result, Value};

/// A single `--set`/`--set-string` style override, already split into its
/// dotted path and typed value.
#[derive(Clone, Debug)]
pub enum ValueOverride {
    Set(String, Value),
    SetString(String, String),
}

impl ValueOverride {
    /// Parse a `path=value` pair as `--set` would: typed scalar inference.
    pub fn parse_set(raw: &str) -> Result<ValueOverride> {
        let (path, raw_value) = split_kv(raw)?;
        Ok(ValueOverride::Set(path, Value::from_scalar_override(raw_value)?))
    }

    /// Parse a `path=value` pair as `--set-string` would: value is always
    /// a string, never inferred as a bool or number.
    pub fn parse_set_string(raw: &str) -> Result<ValueOverride> {
        let (path, raw_value) = split_kv(raw)?;
        Ok(ValueOverride::SetString(path, raw_value.to_string()))
    }
}

fn split_kv(raw: &str) -> Result<(String, &str)> {
    match raw.find('=') {
        Some(idx) => Ok((raw[..idx].to_string(), &raw[idx + 1..])),
        None => Err(super::ErrorKind::InvalidOverride(raw.to_string()).into()),
    }
}

/// One precedence tier of the values merge, applied in the order spec
/// §4.3 defines: chart defaults, then the parent chart's overrides for
/// this sub-chart, then user-supplied `-f` files in the order given, then
/// CLI `--set`/`--set-string` overrides last (and so highest-precedence).
#[derive(Clone, Debug)]
pub enum ValuesLayer {
    ChartDefaults(Value),
    ParentOverride(Value),
    UserFile(Value),
    Cli(Vec<ValueOverride>),
}

/// Merge an ordered list of layers into one value tree. Later layers win,
/// per-leaf, per `Value::merge`.
pub fn merge_layers(layers: Vec<ValuesLayer>) -> Result<Value> {
    let mut acc = Value::empty_mapping();
    for layer in layers {
        let layer_value = match layer {
            ValuesLayer::ChartDefaults(v) => v,
            ValuesLayer::ParentOverride(v) => v,
            ValuesLayer::UserFile(v) => v,
            ValuesLayer::Cli(overrides) => {
                let mut o = Value::empty_mapping();
                for ov in overrides {
                    match ov {
                        ValueOverride::Set(path, val) => o.set_path(&path, val)?,
                        ValueOverride::SetString(path, s) => o.set_path(&path, Value::String(s))?,
                    }
                }
                o
            }
        };
        acc = acc.merge(layer_value);
    }
    Ok(acc)
}

/// How a sub-chart's key is re-published into its parent's scope, per the
/// chart's `import-values` declaration.
#[derive(Clone, Debug)]
pub enum ImportValue {
    /// Copy `child` from the sub-chart's tree to the same dotted path at
    /// the parent's root.
    Same(String),
    /// Copy `child` from the sub-chart's tree to `parent` at the parent's
    /// root.
    Renamed { child: String, parent: String },
}

/// A resolved sub-chart ready to be folded into its parent's render
/// context: its own fully-merged value tree (defaults merged with its own
/// nested dependencies, if any) plus the `import-values` it declares.
#[derive(Clone, Debug)]
pub struct SubchartNode {
    pub alias: String,
    pub values: Value,
    pub import_values: Vec<ImportValue>,
}

/// Fold resolved sub-chart trees into a parent's merged values, nesting
/// each under its alias and publishing any declared `import-values` back
/// up to the parent's root scope. Also populates the `Subcharts` reserved
/// key with each alias's final, as-rendered value tree. Parent overrides
/// for a sub-chart (already present in `root_values` under its alias from
/// an earlier `ValuesLayer::ParentOverride` merge) take precedence over
/// the sub-chart's own defaults.
pub fn build_context(root_values: Value, subcharts: &[SubchartNode]) -> Result<Value> {
    let mut result = root_values;
    for node in subcharts {
        let defaults = node.values.clone().nest_under(&node.alias);
        result = defaults.merge(result);
    }

    let mut subcharts_map = BTreeMap::new();
    for node in subcharts {
        if let Some(v) = result.get_path(&node.alias) {
            subcharts_map.insert(node.alias.clone(), v.clone());
        }
        for imp in &node.import_values {
            let (child_path, parent_path) = match imp {
                ImportValue::Same(key) => (key.clone(), key.clone()),
                ImportValue::Renamed { child, parent } => (child.clone(), parent.clone()),
            };
            let scoped = format!("{}.{}", node.alias, child_path);
            if let Some(v) = result.get_path(&scoped).cloned() {
                result.set_path(&parent_path, v)?;
            }
        }
    }
    if !subcharts_map.is_empty() {
        result.set_path("Subcharts", Value::Mapping(subcharts_map))?;
    }
    Ok(result)
}
