//! One Markdown input unit and its front matter.

use crate::error::ConfigError;
use crate::metadata::MetaValue;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

static FRONT_MATTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").expect("valid regex")
});

/// A Markdown document as loaded from disk.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source path; relative references in the body resolve against its parent.
    pub path: PathBuf,
    /// Text after the front matter block.
    pub body: String,
    /// Lines occupied by the front matter, so body line numbers can be
    /// reported against the original file.
    pub body_line_offset: usize,
    /// Parsed front matter; empty when the document has none.
    pub front_matter: IndexMap<String, MetaValue>,
}

impl Document {
    /// Split and parse the leading `---` YAML block, if present.
    ///
    /// Front matter that is not valid YAML, or that is not a mapping, is a
    /// [`ConfigError::FrontMatter`].
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self, ConfigError> {
        let path = path.into();

        let Some(caps) = FRONT_MATTER.captures(text) else {
            return Ok(Self {
                path,
                body: text.to_string(),
                body_line_offset: 0,
                front_matter: IndexMap::new(),
            });
        };

        let whole = caps.get(0).map_or("", |m| m.as_str());
        let raw = caps.get(1).map_or("", |m| m.as_str());

        let parsed: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::FrontMatter {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        let front_matter = match MetaValue::from(parsed) {
            MetaValue::Map(m) => m,
            MetaValue::Null => IndexMap::new(),
            _ => {
                return Err(ConfigError::FrontMatter {
                    path,
                    detail: "front matter must be a key/value mapping".into(),
                })
            }
        };

        let mut body_line_offset = whole.matches('\n').count();
        if !whole.ends_with('\n') {
            body_line_offset += 1;
        }

        Ok(Self {
            path,
            body: text[whole.len()..].to_string(),
            body_line_offset,
            front_matter,
        })
    }

    /// Directory that relative image paths and `logo_path` resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File stem used to name per-document artifacts.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into())
    }

    /// Extra typesetting preamble declared in front matter.
    pub fn preamble(&self) -> Option<&str> {
        self.front_matter.get("preamble").and_then(MetaValue::as_str)
    }
}
