//! Layered metadata resolution.
//!
//! Metadata reaches a run from four places, merged lowest to highest
//! precedence:
//!
//! ```text
//! built-in defaults ─▶ metadata file ─▶ key=value overrides ─▶ front matter (doc 1, doc 2, …)
//! ```
//!
//! ## Merge rules
//!
//! * Known fields (`title`, `author`, `company`, `contact`, `address`,
//!   `logo_path`, `date`, `version`) are replaced wholesale by a higher layer.
//! * Every other key lands in `extra`, which is merged key by key: two layers
//!   setting different `extra` keys both survive.
//! * A `metadata:` mapping inside a layer is flattened onto that layer after
//!   its top-level keys.
//! * `logo_path` is resolved against the directory of whichever file set it.
//!
//! Values keep their structure as [`MetaValue`], so a template can receive a
//! list or a nested mapping without everything being coerced to strings.

use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Field names with a dedicated slot in [`MetadataContext`].
pub const KNOWN_FIELDS: &[&str] = &[
    "title", "author", "company", "contact", "address", "logo_path", "date", "version",
];

// ── MetaValue ────────────────────────────────────────────────────────────

/// A metadata value of any shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Seq(Vec<MetaValue>),
    Map(IndexMap<String, MetaValue>),
}

impl MetaValue {
    /// Scalar rendering used when a value fills a text field.
    ///
    /// Returns `None` for `Null`, sequences and mappings.
    pub fn as_scalar_string(&self) -> Option<String> {
        match self {
            MetaValue::Bool(b) => Some(b.to_string()),
            MetaValue::Integer(i) => Some(i.to_string()),
            MetaValue::Float(f) => Some(f.to_string()),
            MetaValue::String(s) => Some(s.clone()),
            MetaValue::Null | MetaValue::Seq(_) | MetaValue::Map(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MetaValue::Null => "null",
            MetaValue::Bool(_) => "boolean",
            MetaValue::Integer(_) | MetaValue::Float(_) => "number",
            MetaValue::String(_) => "string",
            MetaValue::Seq(_) => "sequence",
            MetaValue::Map(_) => "mapping",
        }
    }
}

impl From<serde_yaml::Value> for MetaValue {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Integer(i),
                None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => MetaValue::String(s),
            Value::Sequence(seq) => MetaValue::Seq(seq.into_iter().map(Into::into).collect()),
            Value::Mapping(map) => MetaValue::Map(
                map.into_iter()
                    .map(|(k, v)| (yaml_key(k), MetaValue::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => MetaValue::from(tagged.value),
        }
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(b) => MetaValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetaValue::Integer(i),
                None => MetaValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => MetaValue::String(s),
            Value::Array(items) => MetaValue::Seq(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                MetaValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::String(s.to_string())
    }
}

/// YAML allows non-string keys (`1: one`, `true: yes`); they are stringified.
fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        other => MetaValue::from(other)
            .as_scalar_string()
            .unwrap_or_default(),
    }
}

// ── MetadataContext ──────────────────────────────────────────────────────

/// The resolved metadata for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataContext {
    pub title: Option<String>,
    pub author: Option<String>,
    pub company: Option<String>,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub logo_path: Option<PathBuf>,
    pub date: Option<String>,
    pub version: Option<String>,
    /// Template-defined keys, merged key by key across layers.
    pub extra: IndexMap<String, MetaValue>,
}

impl MetadataContext {
    /// Look up a known field or an `extra` key.
    pub fn get(&self, key: &str) -> Option<MetaValue> {
        let text = |v: &Option<String>| v.as_deref().map(MetaValue::from);
        match key {
            "title" => text(&self.title),
            "author" => text(&self.author),
            "company" => text(&self.company),
            "contact" => text(&self.contact),
            "address" => text(&self.address),
            "date" => text(&self.date),
            "version" => text(&self.version),
            "logo_path" => self
                .logo_path
                .as_ref()
                .map(|p| MetaValue::String(p.display().to_string())),
            other => self.extra.get(other).cloned(),
        }
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "title" => Some(&mut self.title),
            "author" => Some(&mut self.author),
            "company" => Some(&mut self.company),
            "contact" => Some(&mut self.contact),
            "address" => Some(&mut self.address),
            "date" => Some(&mut self.date),
            "version" => Some(&mut self.version),
            _ => None,
        }
    }
}

// ── Layers ───────────────────────────────────────────────────────────────

/// Where a metadata layer came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOrigin {
    Defaults,
    File(PathBuf),
    Overrides,
    FrontMatter(PathBuf),
}

impl fmt::Display for LayerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerOrigin::Defaults => f.write_str("built-in defaults"),
            LayerOrigin::File(p) => write!(f, "metadata file '{}'", p.display()),
            LayerOrigin::Overrides => f.write_str("command-line overrides"),
            LayerOrigin::FrontMatter(p) => write!(f, "front matter of '{}'", p.display()),
        }
    }
}

/// One source of metadata entries plus the directory its relative paths
/// are resolved against.
#[derive(Debug, Clone)]
pub struct MetadataLayer {
    pub origin: LayerOrigin,
    pub base_dir: Option<PathBuf>,
    pub entries: IndexMap<String, MetaValue>,
}

impl MetadataLayer {
    /// Built-in defaults from `(key, value)` pairs.
    pub fn defaults(pairs: &[(String, String)]) -> Self {
        Self {
            origin: LayerOrigin::Defaults,
            base_dir: None,
            entries: pairs
                .iter()
                .map(|(k, v)| (k.clone(), MetaValue::String(v.clone())))
                .collect(),
        }
    }

    /// Parse a metadata file: JSON when the extension is `.json`, YAML otherwise.
    ///
    /// The file must hold a mapping at its top level.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::MetadataFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let value: MetaValue = if is_json {
            serde_json::from_str::<serde_json::Value>(&text)
                .map_err(|e| ConfigError::MetadataFile {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })?
                .into()
        } else {
            serde_yaml::from_str::<serde_yaml::Value>(&text)
                .map_err(|e| ConfigError::MetadataFile {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })?
                .into()
        };

        let MetaValue::Map(entries) = value else {
            return Err(ConfigError::MetadataNotMapping {
                path: path.to_path_buf(),
            });
        };

        Ok(Self {
            origin: LayerOrigin::File(path.to_path_buf()),
            base_dir: path.parent().map(Path::to_path_buf),
            entries,
        })
    }

    /// Parse raw `key=value` strings. Keys and values are trimmed; a later
    /// entry for the same key wins.
    pub fn from_overrides(raw: &[String]) -> Result<Self, ConfigError> {
        let mut entries = IndexMap::new();
        for entry in raw {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(ConfigError::Override(entry.clone()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Override(entry.clone()));
            }
            entries.insert(key.to_string(), MetaValue::String(value.trim().to_string()));
        }
        Ok(Self {
            origin: LayerOrigin::Overrides,
            base_dir: std::env::current_dir().ok(),
            entries,
        })
    }

    /// Front matter of one document; relative paths resolve against the
    /// document's directory.
    pub fn front_matter(document: &Path, entries: IndexMap<String, MetaValue>) -> Self {
        Self {
            origin: LayerOrigin::FrontMatter(document.to_path_buf()),
            base_dir: document.parent().map(Path::to_path_buf),
            entries,
        }
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────

/// Keys in front matter that are consumed elsewhere and never become metadata.
const RESERVED_KEYS: &[&str] = &["preamble"];

/// Accumulates layers in precedence order and folds them into a
/// [`MetadataContext`].
#[derive(Debug, Default)]
pub struct MetadataResolver {
    layers: Vec<MetadataLayer>,
}

impl MetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a layer above every layer pushed so far.
    pub fn push(&mut self, layer: MetadataLayer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn resolve(&self) -> Result<MetadataContext, ConfigError> {
        let mut ctx = MetadataContext::default();
        for layer in &self.layers {
            debug!("Applying metadata layer: {} ({} keys)", layer.origin, layer.entries.len());
            apply_entries(&mut ctx, layer, &layer.entries, true)?;
        }
        Ok(ctx)
    }
}

fn apply_entries(
    ctx: &mut MetadataContext,
    layer: &MetadataLayer,
    entries: &IndexMap<String, MetaValue>,
    top_level: bool,
) -> Result<(), ConfigError> {
    let mut nested: Option<&IndexMap<String, MetaValue>> = None;

    for (key, value) in entries {
        match key.as_str() {
            "metadata" if top_level && value.as_map().is_some() => {
                nested = value.as_map();
            }
            "extra" => match value {
                MetaValue::Map(map) => {
                    for (k, v) in map {
                        ctx.extra.insert(k.clone(), v.clone());
                    }
                }
                MetaValue::Null => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "{}: 'extra' must be a mapping, got a {}",
                        layer.origin,
                        other.kind()
                    )))
                }
            },
            k if RESERVED_KEYS.contains(&k) => {}
            "logo_path" => {
                ctx.logo_path = scalar_field(layer, key, value)?
                    .filter(|s| !s.is_empty())
                    .map(|s| resolve_path(layer.base_dir.as_deref(), &s));
            }
            k => {
                if let Some(slot) = ctx.slot_mut(k) {
                    *slot = scalar_field(layer, key, value)?;
                } else {
                    ctx.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    if let Some(section) = nested {
        apply_entries(ctx, layer, section, false)?;
    }
    Ok(())
}

fn scalar_field(
    layer: &MetadataLayer,
    key: &str,
    value: &MetaValue,
) -> Result<Option<String>, ConfigError> {
    match value {
        MetaValue::Null => Ok(None),
        MetaValue::Seq(_) | MetaValue::Map(_) => Err(ConfigError::Invalid(format!(
            "{}: '{key}' must be a scalar, got a {}",
            layer.origin,
            value.kind()
        ))),
        scalar => Ok(scalar.as_scalar_string()),
    }
}

fn resolve_path(base: Option<&Path>, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    match base {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn map(pairs: &[(&str, MetaValue)]) -> IndexMap<String, MetaValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn override_beats_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("meta.yaml");
        std::fs::write(&file, "title: From File\nauthor: Alice\n").unwrap();

        let mut r = MetadataResolver::new();
        r.push(MetadataLayer::defaults(&[("title".into(), "Default".into())]))
            .push(MetadataLayer::from_file(&file).unwrap())
            .push(MetadataLayer::from_overrides(&["title = From CLI".into()]).unwrap());
        let ctx = r.resolve().unwrap();

        assert_eq!(ctx.title.as_deref(), Some("From CLI"));
        assert_eq!(ctx.author.as_deref(), Some("Alice"));
    }

    #[test]
    fn later_front_matter_wins_and_extra_merges() {
        let a = MetadataLayer::front_matter(
            Path::new("a.md"),
            map(&[
                ("title", "A".into()),
                ("client", "ACME".into()),
                ("extra", MetaValue::Map(map(&[("x", "1".into())]))),
            ]),
        );
        let b = MetadataLayer::front_matter(
            Path::new("b.md"),
            map(&[
                ("title", "B".into()),
                ("extra", MetaValue::Map(map(&[("y", "2".into())]))),
            ]),
        );
        let mut r = MetadataResolver::new();
        r.push(a).push(b);
        let ctx = r.resolve().unwrap();

        assert_eq!(ctx.title.as_deref(), Some("B"));
        assert_eq!(ctx.extra.get("client"), Some(&"ACME".into()));
        assert_eq!(ctx.extra.get("x"), Some(&"1".into()));
        assert_eq!(ctx.extra.get("y"), Some(&"2".into()));
    }

    #[test]
    fn nested_metadata_section_is_flattened_after_top_level() {
        let layer = MetadataLayer::front_matter(
            Path::new("doc.md"),
            map(&[
                (
                    "metadata",
                    MetaValue::Map(map(&[("title", "Nested".into())])),
                ),
                ("title", "Top".into()),
                ("preamble", "\\usepackage{x}".into()),
            ]),
        );
        let mut r = MetadataResolver::new();
        r.push(layer);
        let ctx = r.resolve().unwrap();
        assert_eq!(ctx.title.as_deref(), Some("Nested"));
        assert!(!ctx.extra.contains_key("preamble"));
    }

    #[test]
    fn logo_path_is_relative_to_its_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("meta.yml");
        std::fs::write(&file, "logo_path: img/logo.png\n").unwrap();

        let mut r = MetadataResolver::new();
        r.push(MetadataLayer::from_file(&file).unwrap());
        assert_eq!(
            r.resolve().unwrap().logo_path,
            Some(dir.path().join("img/logo.png"))
        );

        r.push(MetadataLayer::front_matter(
            Path::new("/docs/guide/intro.md"),
            map(&[("logo_path", "logo.svg".into())]),
        ));
        assert_eq!(
            r.resolve().unwrap().logo_path,
            Some(PathBuf::from("/docs/guide/logo.svg"))
        );
    }

    #[test]
    fn json_metadata_file_is_parsed_by_extension() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(f, r#"{{"title": "J", "pages": 3, "tags": ["a", "b"]}}"#).unwrap();
        let layer = MetadataLayer::from_file(f.path()).unwrap();
        let mut r = MetadataResolver::new();
        r.push(layer);
        let ctx = r.resolve().unwrap();
        assert_eq!(ctx.title.as_deref(), Some("J"));
        assert_eq!(ctx.extra.get("pages"), Some(&MetaValue::Integer(3)));
        assert!(matches!(ctx.extra.get("tags"), Some(MetaValue::Seq(v)) if v.len() == 2));
    }

    #[test]
    fn non_mapping_file_is_a_config_error() {
        let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(f, "- just\n- a list\n").unwrap();
        assert!(matches!(
            MetadataLayer::from_file(f.path()),
            Err(ConfigError::MetadataNotMapping { .. })
        ));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(f, "{{ not json").unwrap();
        assert!(matches!(
            MetadataLayer::from_file(f.path()),
            Err(ConfigError::MetadataFile { .. })
        ));
    }

    #[test]
    fn override_without_equals_is_rejected() {
        assert!(matches!(
            MetadataLayer::from_overrides(&["novalue".into()]),
            Err(ConfigError::Override(_))
        ));
        assert!(MetadataLayer::from_overrides(&["=x".into()]).is_err());
    }

    #[test]
    fn numeric_known_field_is_stringified() {
        let mut r = MetadataResolver::new();
        r.push(MetadataLayer::front_matter(
            Path::new("a.md"),
            map(&[("version", MetaValue::Float(1.5))]),
        ));
        assert_eq!(r.resolve().unwrap().version.as_deref(), Some("1.5"));
    }

    #[test]
    fn structured_known_field_is_rejected() {
        let mut r = MetadataResolver::new();
        r.push(MetadataLayer::front_matter(
            Path::new("a.md"),
            map(&[("title", MetaValue::Seq(vec![]))]),
        ));
        assert!(r.resolve().is_err());
    }

    #[test]
    fn yaml_non_string_keys_are_stringified() {
        let v: serde_yaml::Value = serde_yaml::from_str("1: one\ntrue: yes\n").unwrap();
        let MetaValue::Map(m) = MetaValue::from(v) else {
            panic!("expected mapping");
        };
        assert!(m.contains_key("1"));
        assert!(m.contains_key("true"));
    }
}
