//! Pipeline coordinator and the eager entry points built on it.
//!
//! [`Pipeline::prepare`] is the core: it resolves metadata, materialises
//! every diagram block and remote image, rewrites the bodies and produces a
//! [`PreparedDocument`]. [`Pipeline::build`] adds the external stages
//! (converter, template, compiler) and writes the PDF.
//!
//! ## Substitution order
//!
//! Renders and fetches complete in any order. Their results are keyed by
//! block index and URL, and the rewrite walks each document's edits sorted
//! by byte offset, so the output never depends on completion order.

use crate::backend::latex::LATEX_HINT;
use crate::backend::pandoc::PANDOC_HINT;
use crate::backend::{LatexCompiler, PandocConverter, TemplateRenderer};
use crate::cache::{AssetCache, DiskCache, MemoryCache};
use crate::config::PipelineConfig;
use crate::diagram::RendererRegistry;
use crate::document::Document;
use crate::error::{AssetError, ConfigError, PipelineError};
use crate::metadata::{MetaValue, MetadataContext, MetadataLayer, MetadataResolver};
use crate::output::{BuildOutput, PipelineStats, PreparedDocument, RenderedAsset};
use crate::pipeline::extract::{self, DiagramBlock, RemoteImageRef};
use crate::pipeline::fetch::{self, Fetcher};
use crate::pipeline::input::{load_documents, resolve_source};
use crate::pipeline::postprocess::{clean_latex, clean_markdown};
use crate::pipeline::render::{self, RenderReport};
use crate::pipeline::{inline, toc};
use crate::progress::{ProgressCallback, Stage};
use indexmap::IndexMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Inserted between merged documents.
const DOCUMENT_SEPARATOR: &str = "\n\n\\newpage\n\n";

/// A configured pipeline: renderers, asset cache and HTTP client.
///
/// One `Pipeline` can prepare or build any number of runs; they share the
/// cache, so a diagram rendered for one document is reused by the next.
pub struct Pipeline {
    config: PipelineConfig,
    registry: RendererRegistry,
    cache: Arc<dyn AssetCache>,
    fetcher: Fetcher,
    /// Backing directory of the run-scoped cache when no `cache_dir` is set.
    scratch: Option<TempDir>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("cache_root", &self.cache.root())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build a pipeline with the renderers enabled in `config`.
    ///
    /// With `cache_dir` set, assets persist across runs in that directory.
    /// Otherwise they live in a scratch directory removed with the pipeline.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let (cache, scratch): (Arc<dyn AssetCache>, Option<TempDir>) = match &config.cache_dir {
            Some(dir) => (Arc::new(DiskCache::open(dir, config.validate_cache)?), None),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("markdown-pdf-assets-")
                    .tempdir()?;
                (Arc::new(MemoryCache::new(dir.path())?), Some(dir))
            }
        };
        let registry = RendererRegistry::from_config(&config);
        let fetcher = Fetcher::new(config.remote_images.clone())?;
        debug!("Pipeline ready: renderers {:?}, cache {}", registry, cache.root().display());

        Ok(Self {
            config,
            registry,
            cache,
            fetcher,
            scratch,
        })
    }

    /// Replace the renderer set.
    pub fn with_registry(mut self, registry: RendererRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the asset cache.
    pub fn with_cache(mut self, cache: Arc<dyn AssetCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &dyn AssetCache {
        self.cache.as_ref()
    }

    /// Detach the run-scoped asset directory so it outlives the pipeline.
    ///
    /// Returns its path, or `None` when a persistent `cache_dir` is used.
    pub fn persist_assets(&mut self) -> Option<PathBuf> {
        self.scratch.take().map(TempDir::keep)
    }

    /// Rewrite `documents` into one [`PreparedDocument`].
    ///
    /// # Errors
    /// Fatal problems only: malformed metadata, a missing diagram tool, an
    /// abort-policy render failure or a hard-fail fetch failure. Anything
    /// else is recorded in [`PreparedDocument::failures`].
    pub async fn prepare(&self, documents: &[Document]) -> Result<PreparedDocument, PipelineError> {
        let result = self.prepare_documents(documents).await;
        self.finish_run(result.as_ref().map_or(0, |p| p.failures.len()));
        result
    }

    /// Prepare `sources` and run the converter, template and compiler,
    /// writing the PDF to `output`.
    ///
    /// Every source is resolved (directories are walked) and all documents
    /// are merged into the one PDF.
    pub async fn build(
        &self,
        sources: &[PathBuf],
        output: &Path,
    ) -> Result<BuildOutput, PipelineError> {
        let result = self.build_pdf(sources, output).await;
        self.finish_run(result.as_ref().map_or(0, |b| b.prepared.failures.len()));
        result
    }

    async fn prepare_documents(
        &self,
        documents: &[Document],
    ) -> Result<PreparedDocument, PipelineError> {
        let total_start = Instant::now();
        let progress = self.config.progress_callback.as_ref();
        if documents.is_empty() {
            return Err(ConfigError::Invalid("no documents to prepare".into()).into());
        }
        info!("Preparing {} document(s)", documents.len());

        // ── Step 1: Resolve metadata ─────────────────────────────────────────
        stage(progress, Stage::Metadata);
        let metadata = self.resolve_metadata(documents)?;
        let front_matter = merged_front_matter(documents);
        let preamble: Vec<String> = documents
            .iter()
            .filter_map(Document::preamble)
            .map(str::to_string)
            .collect();

        // ── Step 2: Extract diagram blocks and remote images ─────────────────
        let mut blocks: Vec<DiagramBlock> = Vec::new();
        let mut refs: Vec<RemoteImageRef> = Vec::new();
        for (index, doc) in documents.iter().enumerate() {
            blocks.extend(extract::diagram_blocks(index, doc, &self.registry));
            let protected = extract::protected_ranges(&doc.body);
            refs.extend(extract::remote_images(index, doc, &protected));
        }
        debug!("Found {} diagram block(s) and {} remote image(s)", blocks.len(), refs.len());
        if let Some(cb) = progress {
            cb.on_run_start(documents.len(), blocks.len() + refs.len());
        }

        // ── Step 3: Check diagram tools before any rendering ─────────────────
        self.check_renderer_tools(&blocks)?;

        // ── Step 4: Render diagrams ──────────────────────────────────────────
        stage(progress, Stage::Diagrams);
        let renders = render::render_diagrams(
            &blocks,
            &self.registry,
            self.cache.as_ref(),
            self.config.render_concurrency,
            self.config.render_failure,
            progress,
        )
        .await?;

        // ── Step 5: Fetch remote images ──────────────────────────────────────
        stage(progress, Stage::Images);
        let fetches = fetch::fetch_images(&refs, &self.fetcher, self.cache.as_ref(), progress).await?;

        // ── Step 6: Substitute assets by source position ─────────────────────
        let rewrite = self.substitute(documents, &blocks, &renders, &refs, &fetches);

        // ── Step 7: Table of contents ────────────────────────────────────────
        stage(progress, Stage::Toc);
        let toc = toc::build_toc(rewrite.bodies, &self.config.toc);

        // ── Step 8: Inline styles ────────────────────────────────────────────
        stage(progress, Stage::InlineStyles);
        let bodies: Vec<String> = toc
            .bodies
            .iter()
            .map(|b| inline::translate(b, self.config.inline_styles))
            .collect();

        // ── Step 9: Merge ────────────────────────────────────────────────────
        let body = clean_markdown(&merge_bodies(&bodies));

        let failures = rewrite.failures;
        if !failures.is_empty() {
            warn!("{} asset(s) could not be materialised", failures.len());
        }
        let stats = PipelineStats {
            documents: documents.len(),
            diagrams: blocks.len(),
            renders_executed: renders.executed,
            cache_hits: renders.cache_hits + fetches.cache_hits,
            images: refs.len(),
            fetches_executed: fetches.executed,
            failures: failures.len(),
            render_duration_ms: renders.duration_ms,
            fetch_duration_ms: fetches.duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Prepared {} document(s): {} diagram(s), {} image(s), {} failure(s), {}ms",
            stats.documents, stats.diagrams, stats.images, stats.failures, stats.total_duration_ms
        );

        Ok(PreparedDocument {
            body,
            metadata,
            toc: toc.entries,
            show_cover: self.config.include_cover,
            show_toc: self.config.toc.enabled,
            assets: rewrite.assets,
            failures,
            front_matter,
            preamble,
            resource_dirs: resource_dirs(documents),
            stats,
        })
    }

    async fn build_pdf(
        &self,
        sources: &[PathBuf],
        output: &Path,
    ) -> Result<BuildOutput, PipelineError> {
        let total_start = Instant::now();
        let progress = self.config.progress_callback.as_ref();
        info!("Starting build: {} source(s) → {}", sources.len(), output.display());

        // ── Step 1: Resolve and load sources ─────────────────────────────────
        let mut files: Vec<PathBuf> = Vec::new();
        for source in sources {
            for file in resolve_source(source)?.files {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        let documents = load_documents(&files).await?;

        // ── Step 2: Set up the external stages ───────────────────────────────
        let converter = PandocConverter::new(self.config.converter.clone());
        let compiler = LatexCompiler::new(self.config.compiler.clone());
        let template = TemplateRenderer::new(&self.config.template)?;
        if let Some(tool) = converter.required_tool() {
            require_tool(tool, PANDOC_HINT)?;
        }
        if let Some(tool) = compiler.required_tool() {
            require_tool(tool, LATEX_HINT)?;
        }

        // ── Step 3: Prepare ──────────────────────────────────────────────────
        let prepared = self.prepare_documents(&documents).await?;

        // ── Step 4: Work directory ───────────────────────────────────────────
        let work = tempfile::Builder::new()
            .prefix("markdown-pdf-build-")
            .tempdir()?;
        let (work_path, _guard) = if self.config.keep_work_dir {
            (work.keep(), None)
        } else {
            (work.path().to_path_buf(), Some(work))
        };
        let markdown_path = work_path.join("document.md");
        tokio::fs::write(&markdown_path, &prepared.body).await?;

        let mut search_paths = vec![work_path.clone()];
        search_paths.extend(prepared.resource_dirs.iter().cloned());

        // ── Step 5: Markdown → LaTeX ─────────────────────────────────────────
        stage(progress, Stage::Convert);
        let convert_start = Instant::now();
        let latex = clean_latex(&converter.convert(&markdown_path, &search_paths).await?);
        info!("Converted to LaTeX in {}ms", convert_start.elapsed().as_millis());

        // ── Step 6: Template ─────────────────────────────────────────────────
        stage(progress, Stage::Template);
        let tex = template.render(&latex, &prepared)?;
        let tex_path = work_path.join("document.tex");
        tokio::fs::write(&tex_path, tex).await?;

        // ── Step 7: Compile ──────────────────────────────────────────────────
        stage(progress, Stage::Compile);
        let compile_start = Instant::now();
        let pdf = compiler.compile(&tex_path, &search_paths).await?;
        info!("Compiled PDF in {}ms", compile_start.elapsed().as_millis());

        // ── Step 8: Deliver ──────────────────────────────────────────────────
        write_output(&pdf, output).await?;
        info!(
            "Build complete: {} in {}ms",
            output.display(),
            total_start.elapsed().as_millis()
        );

        let work_dir = self.config.keep_work_dir.then(|| {
            info!("Kept work directory {}", work_path.display());
            work_path
        });
        Ok(BuildOutput {
            pdf_path: output.to_path_buf(),
            prepared,
            work_dir,
        })
    }

    fn resolve_metadata(&self, documents: &[Document]) -> Result<MetadataContext, PipelineError> {
        let mut resolver = MetadataResolver::new();
        resolver.push(MetadataLayer::defaults(&self.config.metadata_defaults));
        if let Some(file) = &self.config.metadata_file {
            resolver.push(MetadataLayer::from_file(file)?);
        }
        resolver.push(MetadataLayer::from_overrides(&self.config.metadata_overrides)?);
        for doc in documents {
            resolver.push(MetadataLayer::front_matter(&doc.path, doc.front_matter.clone()));
        }
        Ok(resolver.resolve()?)
    }

    /// Fail unless every renderer with at least one block has its tool.
    fn check_renderer_tools(&self, blocks: &[DiagramBlock]) -> Result<(), PipelineError> {
        let mut checked: Vec<&str> = Vec::new();
        for block in blocks {
            let Some(renderer) = self.registry.for_tag(&block.tag) else {
                continue;
            };
            if checked.contains(&renderer.name()) {
                continue;
            }
            checked.push(renderer.name());
            if let Some(tool) = renderer.required_tool() {
                require_tool(tool, renderer.install_hint())?;
            }
        }
        Ok(())
    }

    fn substitute(
        &self,
        documents: &[Document],
        blocks: &[DiagramBlock],
        renders: &RenderReport,
        refs: &[RemoteImageRef],
        fetches: &fetch::FetchReport,
    ) -> Rewrite {
        let mut edits: Vec<Vec<Edit>> = vec![Vec::new(); documents.len()];
        let mut failures: Vec<(usize, usize, AssetError)> = Vec::new();
        let mut used: Vec<(usize, usize, RenderedAsset)> = Vec::new();

        for (i, block) in blocks.iter().enumerate() {
            let display = self
                .registry
                .for_tag(&block.tag)
                .map_or(block.tag.as_str(), |r| r.display_name());
            let at = (block.document, block.range.start);

            if let Some(asset) = renders.asset_for(i) {
                edits[block.document].push(Edit {
                    range: block.range.clone(),
                    text: format!("![{display} diagram]({})", markdown_target(&asset.path)),
                });
                used.push((at.0, at.1, asset.clone()));
            } else if let Some(detail) = renders.failure_for(i) {
                let original = &documents[block.document].body[block.range.clone()];
                edits[block.document].push(Edit {
                    range: block.range.clone(),
                    text: format!(
                        "{original}\n\n> **{display} diagram could not be rendered:** {}",
                        one_line(detail)
                    ),
                });
                failures.push((
                    at.0,
                    at.1,
                    AssetError::Render {
                        document: block.path.clone(),
                        line: block.line,
                        kind: display.to_string(),
                        detail: detail.to_string(),
                    },
                ));
            }
        }

        for r in refs {
            if let Some(asset) = fetches.asset_for(&r.url) {
                edits[r.document].push(Edit {
                    range: r.range.clone(),
                    text: r.with_target(&markdown_target(&asset.path)),
                });
                used.push((r.document, r.range.start, asset.clone()));
            } else if let Some(detail) = fetches.failure_for(&r.url) {
                failures.push((
                    r.document,
                    r.range.start,
                    AssetError::Fetch {
                        document: r.path.clone(),
                        line: r.line,
                        url: r.url.clone(),
                        detail: detail.to_string(),
                    },
                ));
            }
        }

        let bodies = documents
            .iter()
            .zip(edits)
            .map(|(doc, doc_edits)| apply_edits(&doc.body, doc_edits))
            .collect();

        used.sort_by_key(|(doc, offset, _)| (*doc, *offset));
        let mut assets: Vec<RenderedAsset> = Vec::new();
        for (_, _, asset) in used {
            if !assets.iter().any(|a| a.path == asset.path) {
                assets.push(asset);
            }
        }
        failures.sort_by_key(|(doc, offset, _)| (*doc, *offset));

        Rewrite {
            bodies,
            assets,
            failures: failures.into_iter().map(|(_, _, e)| e).collect(),
        }
    }

    fn finish_run(&self, failures: usize) {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_complete(failures);
        }
    }
}

#[derive(Debug, Clone)]
struct Edit {
    range: Range<usize>,
    text: String,
}

struct Rewrite {
    bodies: Vec<String>,
    assets: Vec<RenderedAsset>,
    failures: Vec<AssetError>,
}

fn stage(progress: Option<&ProgressCallback>, stage: Stage) {
    debug!("Stage: {}", stage.label());
    if let Some(cb) = progress {
        cb.on_stage(stage);
    }
}

/// [`PipelineError::ToolUnavailable`] unless `tool` resolves on the PATH
/// (or is an existing path).
pub(crate) fn require_tool(tool: &str, hint: &str) -> Result<(), PipelineError> {
    match which::which(tool) {
        Ok(path) => {
            debug!("Found {tool} at {}", path.display());
            Ok(())
        }
        Err(_) => Err(PipelineError::ToolUnavailable {
            tool: tool.to_string(),
            hint: hint.to_string(),
        }),
    }
}

/// Apply non-overlapping edits to `body`.
fn apply_edits(body: &str, mut edits: Vec<Edit>) -> String {
    if edits.is_empty() {
        return body.to_string();
    }
    edits.sort_by_key(|e| e.range.start);
    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.range.start < cursor {
            continue;
        }
        out.push_str(&body[cursor..edit.range.start]);
        out.push_str(&edit.text);
        cursor = edit.range.end;
    }
    out.push_str(&body[cursor..]);
    out
}

/// A link target for `path`; angle brackets when it would otherwise break
/// the Markdown link syntax.
fn markdown_target(path: &Path) -> String {
    let target = path.to_string_lossy().replace('\\', "/");
    if target.contains(|c: char| c.is_whitespace() || c == '(' || c == ')') {
        format!("<{target}>")
    } else {
        target
    }
}

fn one_line(detail: &str) -> String {
    detail.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn merge_bodies(bodies: &[String]) -> String {
    bodies
        .iter()
        .map(|b| b.trim_end())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// Front matter of all documents, later documents overriding earlier keys.
fn merged_front_matter(documents: &[Document]) -> IndexMap<String, MetaValue> {
    let mut merged = IndexMap::new();
    for doc in documents {
        for (key, value) in &doc.front_matter {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Distinct document directories, absolute where they exist.
fn resource_dirs(documents: &[Document]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for doc in documents {
        let base = doc.base_dir();
        let base = if base.as_os_str().is_empty() {
            Path::new(".")
        } else {
            base
        };
        let dir = std::fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

/// Copy the compiled PDF to `output` via a temporary file and rename.
async fn write_output(pdf: &Path, output: &Path) -> Result<(), PipelineError> {
    let fail = |source: std::io::Error| PipelineError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let tmp_path = output.with_extension("pdf.tmp");
    tokio::fs::copy(pdf, &tmp_path).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, output).await.map_err(fail)?;
    Ok(())
}

// ── Free functions ───────────────────────────────────────────────────────

/// Prepare already-loaded documents with a one-off [`Pipeline`].
///
/// Without a `cache_dir` the asset directory is kept on disk so the paths in
/// the returned body stay valid; the caller owns its cleanup.
pub async fn prepare(
    documents: &[Document],
    config: &PipelineConfig,
) -> Result<PreparedDocument, PipelineError> {
    let mut pipeline = Pipeline::new(config.clone())?;
    let prepared = pipeline.prepare(documents).await?;
    if let Some(dir) = pipeline.persist_assets() {
        debug!("Assets kept in {}", dir.display());
    }
    Ok(prepared)
}

/// Convert one Markdown file or directory to a PDF at `output`.
pub async fn convert(
    source: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BuildOutput, PipelineError> {
    let pipeline = Pipeline::new(config.clone())?;
    pipeline
        .build(&[source.as_ref().to_path_buf()], output.as_ref())
        .await
}

/// Convert each source to its own PDF in `output_dir`, named after the file
/// stem or directory name.
///
/// The sources share one pipeline and therefore one asset cache. The first
/// fatal error stops the batch.
pub async fn convert_many(
    sources: &[PathBuf],
    output_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<Vec<BuildOutput>, PipelineError> {
    let output_dir = output_dir.as_ref();
    let pipeline = Pipeline::new(config.clone())?;
    let mut outputs = Vec::with_capacity(sources.len());
    for source in sources {
        let set = resolve_source(source)?;
        let output = output_dir.join(format!("{}.pdf", set.output_stem));
        outputs.push(pipeline.build(std::slice::from_ref(source), &output).await?);
    }
    Ok(outputs)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    source: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BuildOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(source, output, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_apply_in_offset_order() {
        let body = "aa BLOCK bb IMG cc";
        let edits = vec![
            Edit {
                range: 12..15,
                text: "img.png".into(),
            },
            Edit {
                range: 3..8,
                text: "diagram".into(),
            },
        ];
        assert_eq!(apply_edits(body, edits), "aa diagram bb img.png cc");
    }

    #[test]
    fn overlapping_edit_is_skipped() {
        let edits = vec![
            Edit {
                range: 0..4,
                text: "X".into(),
            },
            Edit {
                range: 2..6,
                text: "Y".into(),
            },
        ];
        assert_eq!(apply_edits("abcdefg", edits), "Xefg");
    }

    #[test]
    fn targets_with_spaces_are_bracketed() {
        assert_eq!(markdown_target(Path::new("/tmp/a/b.png")), "/tmp/a/b.png");
        assert_eq!(
            markdown_target(Path::new("/Users/me/My Docs/b.png")),
            "</Users/me/My Docs/b.png>"
        );
    }

    #[test]
    fn merge_separates_documents_with_page_break() {
        let merged = merge_bodies(&["# A\n\n".into(), "# B\n".into()]);
        assert_eq!(merged, "# A\n\n\\newpage\n\n# B");
    }

    #[test]
    fn later_front_matter_wins() {
        let a = Document::parse("a.md", "---\ntitle: A\nteam: x\n---\n").unwrap();
        let b = Document::parse("b.md", "---\ntitle: B\n---\n").unwrap();
        let merged = merged_front_matter(&[a, b]);
        assert_eq!(merged["title"].as_str(), Some("B"));
        assert_eq!(merged["team"].as_str(), Some("x"));
    }

    #[test]
    fn missing_tool_reports_hint() {
        let err = require_tool("definitely-not-a-tool-91c2", "install it").unwrap_err();
        match err {
            PipelineError::ToolUnavailable { tool, hint } => {
                assert_eq!(tool, "definitely-not-a-tool-91c2");
                assert_eq!(hint, "install it");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("document.pdf");
        std::fs::write(&pdf, b"%PDF-1.5").unwrap();
        let out = dir.path().join("dist/nested/report.pdf");
        write_output(&pdf, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"%PDF-1.5");
        assert!(!dir.path().join("dist/nested/report.pdf.tmp").exists());
    }
}
