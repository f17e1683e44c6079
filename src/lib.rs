//! # markdown-pdf
//!
//! Assemble annotated Markdown into a print-ready PDF.
//!
//! ## Why this crate?
//!
//! Technical documents mix prose with Mermaid and PlantUML diagrams, images
//! hosted elsewhere, and the odd `<span style="color:red">` a plain Markdown
//! converter drops on the floor. This crate materialises all of that into
//! local files first (rendering diagrams, downloading images, translating
//! styled HTML), then hands clean Markdown to Pandoc and a LaTeX engine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! *.md
//!  │
//!  ├─ 1. Input     resolve files / walk directories, split front matter
//!  ├─ 2. Metadata  defaults < metadata file < overrides < front matter
//!  ├─ 3. Diagrams  mermaid / plantuml subprocesses, fingerprint cache
//!  ├─ 4. Images    concurrent HTTP fetch with retries and size limit
//!  ├─ 5. Rewrite   substitute assets, anchors + ToC, inline styles, merge
//!  │               └─▶ PreparedDocument (the core's output)
//!  ├─ 6. Convert   pandoc → LaTeX
//!  ├─ 7. Template  tera → document.tex
//!  └─ 8. Compile   xelatex → PDF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markdown_pdf::{convert, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .metadata_override("title=Operations Handbook")
//!         .cache_dir(".md2pdf-cache")
//!         .build()?;
//!     let output = convert("docs/handbook", "dist/handbook.pdf", &config).await?;
//!     for failure in &output.prepared.failures {
//!         eprintln!("warning: {failure}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! To stop before the external stages, load documents and call
//! [`Pipeline::prepare`]; the returned [`PreparedDocument`] carries the
//! rewritten Markdown, the metadata, and the ToC entries.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `md2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! markdown-pdf = { version = "0.3", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Needed for | Checked |
//! |------|------------|---------|
//! | `mmdc` | ` ```mermaid ` blocks | only when such blocks exist |
//! | `plantuml` | ` ```plantuml ` blocks | only when such blocks exist |
//! | `pandoc` | [`Pipeline::build`] | before preparing |
//! | `xelatex` | [`Pipeline::build`] | before preparing |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod cache;
pub mod config;
pub mod convert;
pub mod diagram;
pub mod document;
pub mod error;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{AssetCache, DiskCache, Fingerprint, MemoryCache};
pub use config::{
    DiagramFormat, FailurePolicy, InlineStyleTarget, LatexConfig, MermaidConfig, PandocConfig,
    PipelineConfig, PipelineConfigBuilder, PlantUmlConfig, RemoteImageConfig, TemplateConfig,
    TocConfig,
};
pub use convert::{convert, convert_many, convert_sync, prepare, Pipeline};
pub use diagram::{DiagramRenderer, RendererRegistry};
pub use document::Document;
pub use error::{AssetError, ConfigError, FetchError, PipelineError, RenderError};
pub use metadata::{MetaValue, MetadataContext};
pub use output::{AssetKind, BuildOutput, PipelineStats, PreparedDocument, RenderedAsset};
pub use pipeline::toc::TocEntry;
pub use progress::{PipelineProgressCallback, ProgressCallback, Stage};
