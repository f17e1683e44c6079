//! Error types for the markdown-pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] is **fatal**: the run cannot proceed at all (malformed
//!   metadata, a required tool missing, the converter or compiler rejecting
//!   its input). Returned as `Err(PipelineError)` from the top-level entry
//!   points, always before the external converter is invoked when the cause
//!   is known up front.
//!
//! * [`AssetError`] is **non-fatal**: a single diagram or remote image could
//!   not be materialised but the rest of the document is fine. Stored inside
//!   [`crate::output::PreparedDocument::failures`] and attributed to the
//!   originating document and line.
//!
//! [`RenderError`] and [`FetchError`] are the per-operation errors returned
//! by diagram renderers and the remote fetcher. The configured failure
//! policy decides whether one of them is promoted to a [`PipelineError`] or
//! recorded as an [`AssetError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the markdown-pdf library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A source path does not exist.
    #[error("Markdown source not found: '{path}'")]
    DocumentNotFound { path: PathBuf },

    /// A source directory contained no Markdown files.
    #[error("No Markdown documents found in '{path}'")]
    NoDocuments { path: PathBuf },

    /// The source exists but could not be read as UTF-8 text.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Malformed metadata, front matter, or conflicting options.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    // ── Tool errors ───────────────────────────────────────────────────────
    /// A declared external program is not on the PATH.
    #[error("Required tool '{tool}' was not found.\n{hint}")]
    ToolUnavailable { tool: String, hint: String },

    /// A diagram failed to render under the abort policy.
    #[error("{0}")]
    Render(AssetError),

    /// A remote image failed to download under the hard-fail policy.
    #[error("{0}")]
    Fetch(AssetError),

    /// The Markdown converter exited with an error.
    #[error("Markdown conversion failed:\n{diagnostics}")]
    Converter { diagnostics: String },

    /// The template could not be loaded or rendered.
    #[error("Template error: {0}")]
    Template(String),

    /// The typesetting compiler exited with an error or produced no PDF.
    #[error("Typesetting failed:\n{diagnostics}")]
    Compiler { diagnostics: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The asset cache could not be read or written.
    #[error("Asset cache error: {0}")]
    Cache(#[from] CacheError),

    /// Could not create or write the output PDF.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Work-directory or temp-file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structural problems with metadata sources or options.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("metadata file '{path}' could not be parsed: {detail}")]
    MetadataFile { path: PathBuf, detail: String },

    #[error("metadata file '{path}' must contain a key/value mapping")]
    MetadataNotMapping { path: PathBuf },

    #[error("front matter in '{path}' is invalid: {detail}")]
    FrontMatter { path: PathBuf, detail: String },

    #[error("expected key=value, got '{0}'")]
    Override(String),

    #[error("{0}")]
    Invalid(String),
}

/// A non-fatal failure for a single diagram block or image reference.
///
/// The document path and 1-based line locate the originating block so the
/// report can point the user at the exact source.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum AssetError {
    /// A diagram block could not be rendered.
    #[error("{}:{line}: {kind} diagram failed to render: {detail}", .document.display())]
    Render {
        document: PathBuf,
        line: usize,
        kind: String,
        detail: String,
    },

    /// A remote image could not be fetched.
    #[error("{}:{line}: remote image '{url}' could not be fetched: {detail}", .document.display())]
    Fetch {
        document: PathBuf,
        line: usize,
        url: String,
        detail: String,
    },
}

/// Errors raised by a single diagram render.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("'{program}' was not found on the PATH")]
    ToolNotFound { program: String },

    #[error("'{command}' exited with {status}: {details}")]
    NonZeroExit {
        command: String,
        status: String,
        details: String,
    },

    #[error("renderer produced no output at '{path}'")]
    EmptyOutput { path: PathBuf },

    #[error("renderer I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a single remote image fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("response exceeds the {limit}-byte limit")]
    TooLarge { limit: u64 },

    #[error("response is not a decodable image: {detail}")]
    InvalidImage { detail: String },

    #[error("{0}")]
    Transport(String),

    #[error("could not store fetched image: {0}")]
    Store(String),
}

impl FetchError {
    /// Whether a retry has a realistic chance of succeeding.
    ///
    /// Timeouts, dropped connections and 5xx/429 responses are transient;
    /// oversize bodies, invalid images and other 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport(_) => true,
            FetchError::Http { status } => *status == 429 || *status >= 500,
            FetchError::TooLarge { .. } | FetchError::InvalidImage { .. } | FetchError::Store(_) => {
                false
            }
        }
    }
}

/// Errors raised by an [`crate::cache::AssetCache`] implementation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache directory '{path}' is not usable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to commit asset '{path}': {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_failure_display_is_localised() {
        let e = AssetError::Render {
            document: PathBuf::from("docs/intro.md"),
            line: 12,
            kind: "mermaid".into(),
            detail: "syntax error".into(),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("docs/intro.md:12:"), "got: {msg}");
        assert!(msg.contains("mermaid"));
    }

    #[test]
    fn fetch_failure_display_names_url() {
        let e = AssetError::Fetch {
            document: PathBuf::from("a.md"),
            line: 3,
            url: "https://img.test/x.png".into(),
            detail: "timed out after 5s".into(),
        };
        assert!(e.to_string().contains("https://img.test/x.png"));
    }

    #[test]
    fn tool_unavailable_display() {
        let e = PipelineError::ToolUnavailable {
            tool: "mmdc".into(),
            hint: "Install @mermaid-js/mermaid-cli.".into(),
        };
        assert!(e.to_string().contains("mmdc"));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout { secs: 5 }.is_transient());
        assert!(FetchError::Http { status: 503 }.is_transient());
        assert!(FetchError::Http { status: 429 }.is_transient());
        assert!(!FetchError::Http { status: 404 }.is_transient());
        assert!(!FetchError::TooLarge { limit: 10 }.is_transient());
        assert!(!FetchError::InvalidImage { detail: "x".into() }.is_transient());
    }

    #[test]
    fn config_error_converts_into_pipeline_error() {
        let e: PipelineError = ConfigError::Override("novalue".into()).into();
        assert!(e.to_string().contains("key=value"));
    }
}
