//! Progress-callback trait for pipeline stage and asset events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as documents are loaded and diagrams and images are materialised.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log sink or a
//! channel without the library knowing how the host communicates. The trait
//! is `Send + Sync` because renders and fetches complete concurrently.
//!
//! # Example
//!
//! ```rust
//! use markdown_pdf::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_asset_complete(&self, kind: &str, cached: bool) {
//!         self.rendered.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{kind} done (cached: {cached})");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rendered: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Coarse pipeline stages reported through [`PipelineProgressCallback::on_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Metadata,
    Diagrams,
    Images,
    InlineStyles,
    Toc,
    Convert,
    Template,
    Compile,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Metadata => "resolving metadata",
            Stage::Diagrams => "rendering diagrams",
            Stage::Images => "fetching remote images",
            Stage::InlineStyles => "translating inline styles",
            Stage::Toc => "extracting table of contents",
            Stage::Convert => "converting Markdown",
            Stage::Template => "applying template",
            Stage::Compile => "compiling PDF",
        }
    }
}

/// Called by the pipeline as it works through a run.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_asset_start`, `on_asset_complete` and `on_asset_error` may be called
/// concurrently from different tasks.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after source documents are loaded.
    ///
    /// # Arguments
    /// * `documents`: number of Markdown documents in the run
    /// * `assets`: diagram blocks plus remote image references found
    fn on_run_start(&self, documents: usize, assets: usize) {
        let _ = (documents, assets);
    }

    /// Called when the pipeline enters a stage.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called before a diagram render or image fetch begins.
    ///
    /// # Arguments
    /// * `kind`: `"mermaid"`, `"plantuml"` or `"image"`
    /// * `label`: short description (document:line or URL)
    fn on_asset_start(&self, kind: &str, label: &str) {
        let _ = (kind, label);
    }

    /// Called when an asset is available, freshly produced or from cache.
    fn on_asset_complete(&self, kind: &str, cached: bool) {
        let _ = (kind, cached);
    }

    /// Called when an asset could not be produced.
    fn on_asset_error(&self, kind: &str, error: &str) {
        let _ = (kind, error);
    }

    /// Called once when the run finishes, successfully or not.
    ///
    /// # Arguments
    /// * `failures`: number of non-fatal asset failures recorded
    fn on_run_complete(&self, failures: usize) {
        let _ = failures;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
