//! Typesetting source from a Tera template.
//!
//! The template receives:
//!
//! | Variable       | Content                                           |
//! |----------------|---------------------------------------------------|
//! | `body`         | converter output (LaTeX)                          |
//! | `metadata`     | resolved metadata, `extra` included               |
//! | `preamble`     | preamble file + configured + front-matter extras  |
//! | `front_matter` | merged raw front matter                           |
//! | `show_cover`   | cover page flag                                   |
//! | `show_toc`     | table-of-contents flag                            |
//! | `toc_entries`  | level, title, anchor, label, number per heading   |
//!
//! A `latex_escape` filter escapes LaTeX specials in metadata values.

use crate::config::TemplateConfig;
use crate::error::PipelineError;
use crate::output::PreparedDocument;
use crate::pipeline::inline::latex_escape;
use std::collections::HashMap;
use tera::{Context, Tera, Value};

/// Template used when no custom template is configured.
pub const BUILTIN_TEMPLATE: &str = include_str!("templates/document.tex.tera");

const TEMPLATE_NAME: &str = "document.tex";

pub struct TemplateRenderer {
    tera: Tera,
    preamble: Vec<String>,
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("preamble", &self.preamble)
            .finish_non_exhaustive()
    }
}

impl TemplateRenderer {
    /// Load the configured template (or the built-in one) and the
    /// configured preamble file.
    pub fn new(config: &TemplateConfig) -> Result<Self, PipelineError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.register_filter("latex_escape", latex_escape_filter);

        match &config.template_path {
            Some(path) => tera
                .add_template_file(path, Some(TEMPLATE_NAME))
                .map_err(|e| template_error(&e))?,
            None => tera
                .add_raw_template(TEMPLATE_NAME, BUILTIN_TEMPLATE)
                .map_err(|e| template_error(&e))?,
        }

        let mut preamble = Vec::new();
        if let Some(path) = &config.preamble_path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                PipelineError::Template(format!("preamble '{}': {e}", path.display()))
            })?;
            preamble.push(text);
        }
        if let Some(extra) = &config.extra_preamble {
            preamble.push(extra.clone());
        }

        Ok(Self { tera, preamble })
    }

    /// Render the final typesetting source around `body`.
    pub fn render(&self, body: &str, prepared: &PreparedDocument) -> Result<String, PipelineError> {
        let mut metadata = serde_json::to_value(&prepared.metadata)
            .map_err(|e| PipelineError::Internal(format!("metadata context: {e}")))?;
        if let Some(logo) = &prepared.metadata.logo_path {
            metadata["logo_path"] = Value::String(logo.to_string_lossy().replace('\\', "/"));
        }

        let preamble: Vec<&str> = self
            .preamble
            .iter()
            .map(String::as_str)
            .chain(prepared.preamble.iter().map(String::as_str))
            .filter(|p| !p.trim().is_empty())
            .collect();

        let mut context = Context::new();
        context.insert("body", body);
        context.insert("metadata", &metadata);
        if preamble.is_empty() {
            context.insert("preamble", &Value::Null);
        } else {
            context.insert("preamble", &preamble.join("\n"));
        }
        context.insert("front_matter", &prepared.front_matter);
        context.insert("show_cover", &prepared.show_cover);
        context.insert("show_toc", &prepared.show_toc);
        context.insert("toc_entries", &prepared.toc);

        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| template_error(&e))
    }
}

fn latex_escape_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(Value::String(latex_escape(&text)))
}

/// Tera reports the useful detail in the source chain.
fn template_error(e: &tera::Error) -> PipelineError {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    PipelineError::Template(message)
}
