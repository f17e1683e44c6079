//! Diagram rendering: deduplicate, consult the cache, render the rest
//! concurrently.
//!
//! ## Scheduling
//!
//! Blocks are grouped by fingerprint first, so a diagram repeated across
//! documents renders once. Each unique fingerprint becomes one job; jobs run
//! through `buffer_unordered(render_concurrency)` and report back with their
//! slot index, which keeps the report independent of completion order.
//!
//! ## Why reserve inside the job?
//!
//! A persistent cache can be shared with another process rendering the same
//! diagram right now. Going through [`AssetCache::reserve`] for every job
//! means a concurrent producer is waited on rather than duplicated.
//!
//! ## Failures
//!
//! Under [`FailurePolicy::Abort`] the first failed job ends the run: the
//! stream is dropped, so nothing further is scheduled, and the error is
//! attributed to the first block that carried the fingerprint. Under
//! [`FailurePolicy::Placeholder`] failures are collected and every block
//! is still accounted for. Cache errors are always fatal.

use crate::cache::{AssetCache, Fingerprint, Reservation};
use crate::config::FailurePolicy;
use crate::diagram::{fingerprint, DiagramRenderer, RendererRegistry};
use crate::error::{AssetError, PipelineError};
use crate::output::{AssetKind, RenderedAsset};
use crate::pipeline::extract::DiagramBlock;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How many times a job re-reserves after a concurrent producer failed.
const MAX_RESERVE_ATTEMPTS: usize = 3;

/// Outcome of rendering a set of blocks.
#[derive(Debug, Default)]
pub struct RenderReport {
    /// One entry per input block, same order.
    pub fingerprints: Vec<Fingerprint>,
    pub assets: HashMap<Fingerprint, RenderedAsset>,
    /// Failure detail per fingerprint (placeholder policy only).
    pub failures: HashMap<Fingerprint, String>,
    pub executed: usize,
    pub cache_hits: usize,
    pub duration_ms: u64,
}

impl RenderReport {
    /// Asset for the block at `index`, if it rendered.
    pub fn asset_for(&self, index: usize) -> Option<&RenderedAsset> {
        self.fingerprints.get(index).and_then(|fp| self.assets.get(fp))
    }

    /// Failure detail for the block at `index`, if it failed.
    pub fn failure_for(&self, index: usize) -> Option<&str> {
        self.fingerprints
            .get(index)
            .and_then(|fp| self.failures.get(fp))
            .map(String::as_str)
    }
}

struct Job<'a> {
    fingerprint: Fingerprint,
    renderer: Arc<dyn DiagramRenderer>,
    /// First block carrying this fingerprint; used for attribution.
    block: &'a DiagramBlock,
}

enum JobError {
    Render(String),
    Fatal(PipelineError),
}

/// Render every block in `blocks`.
///
/// Every block must have been extracted against `registry`; a block whose
/// tag does not resolve is an internal error.
pub async fn render_diagrams(
    blocks: &[DiagramBlock],
    registry: &RendererRegistry,
    cache: &dyn AssetCache,
    concurrency: usize,
    policy: FailurePolicy,
    progress: Option<&ProgressCallback>,
) -> Result<RenderReport, PipelineError> {
    let start = Instant::now();
    let mut report = RenderReport::default();
    let mut jobs: Vec<Job<'_>> = Vec::new();
    let mut seen: HashMap<Fingerprint, usize> = HashMap::new();

    for block in blocks {
        let Some(renderer) = registry.for_tag(&block.tag) else {
            return Err(PipelineError::Internal(format!(
                "no renderer registered for '{}' blocks",
                block.tag
            )));
        };
        let fp = fingerprint(renderer.as_ref(), &block.source);
        report.fingerprints.push(fp.clone());
        seen.entry(fp.clone()).or_insert_with(|| {
            jobs.push(Job {
                fingerprint: fp,
                renderer: Arc::clone(renderer),
                block,
            });
            jobs.len() - 1
        });
    }

    if jobs.is_empty() {
        return Ok(report);
    }
    info!(
        "Rendering {} unique diagrams ({} blocks), concurrency {}",
        jobs.len(),
        blocks.len(),
        concurrency
    );

    let mut results = stream::iter(jobs.iter().enumerate().map(|(slot, job)| async move {
        if let Some(cb) = progress {
            cb.on_asset_start(
                job.renderer.name(),
                &format!("{}:{}", job.block.path.display(), job.block.line),
            );
        }
        (slot, run_job(job, cache).await)
    }))
    .buffer_unordered(concurrency.max(1));

    while let Some((slot, result)) = results.next().await {
        let job = &jobs[slot];
        let kind = job.renderer.name();
        match result {
            Ok((asset, cached)) => {
                if cached {
                    report.cache_hits += 1;
                } else {
                    report.executed += 1;
                }
                if let Some(cb) = progress {
                    cb.on_asset_complete(kind, cached);
                }
                report.assets.insert(job.fingerprint.clone(), asset);
            }
            Err(JobError::Fatal(e)) => return Err(e),
            Err(JobError::Render(detail)) => {
                report.executed += 1;
                let error = AssetError::Render {
                    document: job.block.path.clone(),
                    line: job.block.line,
                    kind: job.renderer.display_name().to_string(),
                    detail: detail.clone(),
                };
                if let Some(cb) = progress {
                    cb.on_asset_error(kind, &error.to_string());
                }
                match policy {
                    FailurePolicy::Abort => return Err(PipelineError::Render(error)),
                    FailurePolicy::Placeholder => {
                        warn!("{error}");
                        report.failures.insert(job.fingerprint.clone(), detail);
                    }
                }
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Diagrams done: {} rendered, {} cached, {} failed in {}ms",
        report.executed - report.failures.len(),
        report.cache_hits,
        report.failures.len(),
        report.duration_ms
    );
    Ok(report)
}

/// Produce one fingerprint. Returns the asset and whether it came from
/// the cache.
async fn run_job(job: &Job<'_>, cache: &dyn AssetCache) -> Result<(RenderedAsset, bool), JobError> {
    let format = job.renderer.output_format();
    let ext = format.extension();
    let kind = if format.is_vector() {
        AssetKind::Vector
    } else {
        AssetKind::Raster
    };
    let asset = |path: PathBuf| RenderedAsset {
        path,
        fingerprint: job.fingerprint.clone(),
        kind,
    };

    for attempt in 0..MAX_RESERVE_ATTEMPTS {
        let reservation = cache
            .reserve(&job.fingerprint, ext)
            .await
            .map_err(|e| JobError::Fatal(e.into()))?;

        match reservation {
            Reservation::Cached(path) => {
                debug!("Cache hit for {} diagram {}", job.renderer.name(), job.fingerprint);
                return Ok((asset(path), true));
            }
            Reservation::Reserved(ticket) => {
                debug!(
                    "Rendering {} diagram from {}:{}",
                    job.renderer.name(),
                    job.block.path.display(),
                    job.block.line
                );
                job.renderer
                    .render(&job.block.source, ticket.path())
                    .await
                    .map_err(|e| JobError::Render(e.to_string()))?;
                let path = ticket
                    .commit()
                    .map_err(|e| JobError::Fatal(e.into()))?;
                return Ok((asset(path), false));
            }
            Reservation::Pending(in_flight) => {
                debug!("Waiting on concurrent render of {}", job.fingerprint);
                if let Some(path) = in_flight.wait().await {
                    return Ok((asset(path), true));
                }
                warn!(
                    "Concurrent render of {} failed; retrying ({}/{})",
                    job.fingerprint,
                    attempt + 1,
                    MAX_RESERVE_ATTEMPTS
                );
            }
        }
    }
    Err(JobError::Render(
        "a concurrent render of the same diagram failed".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::DiagramFormat;
    use crate::error::RenderError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fake {
        calls: AtomicUsize,
        format: DiagramFormat,
    }

    impl Fake {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                format: DiagramFormat::Png,
            })
        }
    }

    #[async_trait]
    impl DiagramRenderer for Fake {
        fn name(&self) -> &str {
            "fake"
        }
        fn fence_tags(&self) -> &[&str] {
            &["fake"]
        }
        fn output_format(&self) -> DiagramFormat {
            self.format
        }
        fn options_key(&self) -> String {
            String::new()
        }
        async fn render(&self, source: &str, output: &Path) -> Result<(), RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if source.contains("boom") {
                return Err(RenderError::NonZeroExit {
                    command: "fake".into(),
                    status: "exit status: 1".into(),
                    details: "syntax error".into(),
                });
            }
            tokio::fs::write(output, source.as_bytes()).await?;
            Ok(())
        }
    }

    fn block(line: usize, source: &str) -> DiagramBlock {
        DiagramBlock {
            document: 0,
            path: PathBuf::from("doc.md"),
            range: 0..0,
            line,
            tag: "fake".into(),
            source: source.into(),
        }
    }

    fn registry(fake: &Arc<Fake>) -> RendererRegistry {
        let mut r = RendererRegistry::new();
        r.register(Arc::clone(fake) as Arc<dyn DiagramRenderer>);
        r
    }

    #[tokio::test]
    async fn identical_blocks_render_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fake = Fake::new();
        let blocks = vec![block(1, "a"), block(5, "b"), block(9, "a")];

        let report = render_diagrams(
            &blocks,
            &registry(&fake),
            &cache,
            4,
            FailurePolicy::Placeholder,
            None,
        )
        .await
        .unwrap();

        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.executed, 2);
        assert_eq!(report.asset_for(0), report.asset_for(2));
        assert_ne!(report.asset_for(0), report.asset_for(1));
        assert_eq!(
            std::fs::read_to_string(&report.asset_for(1).unwrap().path).unwrap(),
            "b"
        );
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fake = Fake::new();
        let reg = registry(&fake);
        let blocks = vec![block(1, "a")];

        render_diagrams(&blocks, &reg, &cache, 1, FailurePolicy::Placeholder, None)
            .await
            .unwrap();
        let again = render_diagrams(&blocks, &reg, &cache, 1, FailurePolicy::Placeholder, None)
            .await
            .unwrap();

        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(again.cache_hits, 1);
        assert_eq!(again.executed, 0);
    }

    #[tokio::test]
    async fn placeholder_policy_records_failure_per_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fake = Fake::new();
        let blocks = vec![block(1, "boom"), block(4, "ok")];

        let report = render_diagrams(
            &blocks,
            &registry(&fake),
            &cache,
            2,
            FailurePolicy::Placeholder,
            None,
        )
        .await
        .unwrap();

        assert!(report.failure_for(0).unwrap().contains("syntax error"));
        assert!(report.asset_for(0).is_none());
        assert!(report.asset_for(1).is_some());
    }

    #[tokio::test]
    async fn abort_policy_returns_attributed_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fake = Fake::new();
        let blocks = vec![block(7, "boom")];

        let err = render_diagrams(
            &blocks,
            &registry(&fake),
            &cache,
            1,
            FailurePolicy::Abort,
            None,
        )
        .await
        .unwrap_err();

        match err {
            PipelineError::Render(AssetError::Render { line, document, .. }) => {
                assert_eq!(line, 7);
                assert_eq!(document, PathBuf::from("doc.md"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn vector_formats_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fake = Arc::new(Fake {
            calls: AtomicUsize::new(0),
            format: DiagramFormat::Svg,
        });
        let report = render_diagrams(
            &[block(1, "a")],
            &registry(&fake),
            &cache,
            1,
            FailurePolicy::Placeholder,
            None,
        )
        .await
        .unwrap();
        let asset = report.asset_for(0).unwrap();
        assert_eq!(asset.kind, AssetKind::Vector);
        assert_eq!(asset.path.extension().unwrap(), "svg");
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let report = render_diagrams(
            &[],
            &RendererRegistry::new(),
            &cache,
            1,
            FailurePolicy::Abort,
            None,
        )
        .await
        .unwrap();
        assert!(report.fingerprints.is_empty());
    }
}
