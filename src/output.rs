//! Output types: what the pipeline hands to the typesetting stages.

use crate::cache::Fingerprint;
use crate::error::AssetError;
use crate::metadata::{MetaValue, MetadataContext};
use crate::pipeline::toc::TocEntry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether an asset is a bitmap or a scalable drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Raster,
    Vector,
}

/// A locally materialised image standing in for a diagram block or a
/// remote image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedAsset {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub kind: AssetKind,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub documents: usize,
    /// Diagram blocks found, duplicates included.
    pub diagrams: usize,
    /// Renderer invocations that actually ran.
    pub renders_executed: usize,
    /// Fingerprints served from the cache without any work.
    pub cache_hits: usize,
    /// Remote image references found, duplicates included.
    pub images: usize,
    pub fetches_executed: usize,
    pub failures: usize,
    pub render_duration_ms: u64,
    pub fetch_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The handoff payload for the converter and templating stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedDocument {
    /// Rewritten Markdown body, all documents merged.
    pub body: String,
    pub metadata: MetadataContext,
    pub toc: Vec<TocEntry>,
    pub show_cover: bool,
    pub show_toc: bool,
    /// Every asset the body references, in first-reference order.
    pub assets: Vec<RenderedAsset>,
    /// Non-fatal per-block and per-reference failures.
    pub failures: Vec<AssetError>,
    /// Merged front matter of all documents, for templates that want raw keys.
    pub front_matter: IndexMap<String, MetaValue>,
    /// Extra typesetting preamble collected from front matter.
    pub preamble: Vec<String>,
    /// Directories relative references in the body resolve against.
    pub resource_dirs: Vec<PathBuf>,
    pub stats: PipelineStats,
}

impl PreparedDocument {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of a full build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutput {
    pub pdf_path: PathBuf,
    pub prepared: PreparedDocument,
    /// Work directory, when it was kept.
    pub work_dir: Option<PathBuf>,
}
