use std::collections::BTreeMap;

use serde_json::Number;

use super::{ErrorKind, Result};

/// A recursive, tagged-variant value tree.
///
/// This is the single representation the value engine merges, queries and
/// hands to the renderer. Mappings merge recursively (per-leaf, later wins);
/// sequences and scalars are always replaced wholesale by a later layer,
/// never concatenated or unioned — see `Value::merge`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// An empty mapping, the usual starting point for a layer.
    pub fn empty_mapping() -> Value {
        Value::Mapping(BTreeMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Truthiness used for condition/tags evaluation: missing or explicit
    /// `false` is false, everything else (including non-bool scalars) is
    /// considered not-disabling so authors don't get silently opted out by
    /// a typo'd non-bool condition value.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            _ => true,
        }
    }

    /// Parse a YAML document into a `Value`. An empty document parses to an
    /// empty mapping, matching `values.yaml` being optional/empty.
    pub fn from_yaml_str(raw: &str) -> Result<Value> {
        if raw.trim().is_empty() {
            return Ok(Value::empty_mapping());
        }
        let y: serde_yaml::Value = serde_yaml::from_str(raw)?;
        Ok(Value::from(y))
    }

    /// Parse a single `key=value` scalar override (the default `--set` form).
    pub fn from_scalar_override(raw: &str) -> Result<Value> {
        if let Ok(b) = raw.parse::<bool>() {
            return Ok(Value::Bool(b));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(Value::Number(Number::from(n)));
        }
        if let Ok(n) = raw.parse::<f64>() {
            if let Some(num) = Number::from_f64(n) {
                return Ok(Value::Number(num));
            }
        }
        Ok(Value::String(raw.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Look up a dotted path (`a.b.c`) through nested mappings.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut cur = self;
        for part in path.split('.') {
            cur = cur.as_mapping()?.get(part)?;
        }
        Some(cur)
    }

    /// Insert a value at a dotted path, creating intermediate mappings as
    /// needed. Used for command-scoped `--set`-style overrides.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(ErrorKind::InvalidOverride(path.to_string()).into());
        }
        let mut cur = self;
        for part in &parts[..parts.len() - 1] {
            if !matches!(cur, Value::Mapping(_)) {
                *cur = Value::empty_mapping();
            }
            let map = cur.as_mapping_mut().expect("just coerced to mapping");
            cur = map.entry((*part).to_string()).or_insert_with(Value::empty_mapping);
        }
        if !matches!(cur, Value::Mapping(_)) {
            *cur = Value::empty_mapping();
        }
        let map = cur.as_mapping_mut().expect("just coerced to mapping");
        map.insert(parts[parts.len() - 1].to_string(), value);
        Ok(())
    }

    /// Place `self` under a dotted alias path within a fresh mapping,
    /// building intermediate mappings as needed. Used to nest a sub-chart's
    /// defaults under its import alias, and to re-publish imported values.
    pub fn nest_under(self, path: &str) -> Value {
        let mut root = Value::empty_mapping();
        if root.set_path(path, self).is_err() {
            // an empty path means "at the root" - merge makes that a no-op
            return root;
        }
        root
    }

    /// Merge `other` into `self`. Mappings merge recursively, per-leaf,
    /// with `other` taking precedence; anything else (scalars, sequences,
    /// or a type mismatch) is replaced wholesale by `other` unless `other`
    /// is `Null`, which never overwrites a present value — this lets a
    /// layer omit a key (by leaving it `null`/absent) without clobbering
    /// an earlier layer's value for that key.
    pub fn merge(self, other: Value) -> Value {
        match (self, other) {
            (a, Value::Null) => a,
            (Value::Mapping(mut a), Value::Mapping(b)) => {
                for (k, v) in b {
                    let merged = match a.remove(&k) {
                        Some(existing) => existing.merge(v),
                        None => v,
                    };
                    a.insert(k, merged);
                }
                Value::Mapping(a)
            }
            (_, b) => b,
        }
    }

    /// Merge a whole sequence of layers in order, left to right.
    pub fn merge_all<I: IntoIterator<Item = Value>>(layers: I) -> Value {
        layers
            .into_iter()
            .fold(Value::empty_mapping(), |acc, layer| acc.merge(layer))
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(y: serde_yaml::Value) -> Value {
        match y {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(Number::from(i))
                } else if let Some(f) = n.as_f64() {
                    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            serde_yaml::Value::String(s) => Value::String(s),
            serde_yaml::Value::Sequence(xs) => Value::Sequence(xs.into_iter().map(Value::from).collect()),
            serde_yaml::Value::Mapping(m) => {
                let mut out = BTreeMap::new();
                for (k, v) in m {
                    if let serde_yaml::Value::String(ks) = k {
                        out.insert(ks, Value::from(v));
                    } else if let Some(ks) = k.as_str() {
                        out.insert(ks.to_string(), Value::from(v));
                    }
                }
                Value::Mapping(out)
            }
            #[allow(unreachable_patterns)]
            _ => Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Value {
        match j {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(xs) => Value::Sequence(xs.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(m) => {
                Value::Mapping(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_merge_is_recursive_per_leaf() {
        let a = Value::from_yaml_str("a: 1\nb:\n  c: 2\n  d: 3").unwrap();
        let b = Value::from_yaml_str("b:\n  c: 20\ne: 5").unwrap();
        let merged = a.merge(b);
        assert_eq!(merged.get_path("a"), Some(&Value::Number(Number::from(1))));
        assert_eq!(merged.get_path("b.c"), Some(&Value::Number(Number::from(20))));
        assert_eq!(merged.get_path("b.d"), Some(&Value::Number(Number::from(3))));
        assert_eq!(merged.get_path("e"), Some(&Value::Number(Number::from(5))));
    }

    #[test]
    fn lists_and_scalars_are_replaced_not_concatenated() {
        let a = Value::from_yaml_str("xs: [1, 2, 3]\nname: old").unwrap();
        let b = Value::from_yaml_str("xs: [9]\nname: new").unwrap();
        let merged = a.merge(b);
        assert_eq!(merged.get_path("xs"), Some(&Value::Sequence(vec![Value::Number(Number::from(9))])));
        assert_eq!(merged.get_path("name").unwrap().as_str(), Some("new"));
    }

    #[test]
    fn null_layer_never_clobbers() {
        let a = Value::from_yaml_str("a: 1").unwrap();
        let merged = a.clone().merge(Value::Null);
        assert_eq!(merged, a);
    }

    #[test]
    fn set_path_builds_intermediate_mappings() {
        let mut v = Value::empty_mapping();
        v.set_path("a.b.c", Value::String("x".into())).unwrap();
        assert_eq!(v.get_path("a.b.c").unwrap().as_str(), Some("x"));
    }

    #[test]
    fn nest_under_places_value_at_alias_path() {
        let sub = Value::from_yaml_str("replicaCount: 3").unwrap();
        let nested = sub.nest_under("db");
        assert_eq!(nested.get_path("db.replicaCount"), Some(&Value::Number(Number::from(3))));
    }

    #[test]
    fn scalar_override_parses_typed_variants() {
        assert_eq!(Value::from_scalar_override("true").unwrap(), Value::Bool(true));
        assert_eq!(Value::from_scalar_override("42").unwrap(), Value::Number(Number::from(42)));
        assert_eq!(Value::from_scalar_override("hello").unwrap().as_str(), Some("hello"));
    }
}
