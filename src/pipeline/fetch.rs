//! Remote image download with retry, size limit and validation.
//!
//! ## Retry Strategy
//!
//! Timeouts, dropped connections and 5xx/429 answers are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt - 1)`, capped at
//! 30 s): with the default 250 ms base and 2 retries the waits are 250 ms
//! then 500 ms. Anything
//! else (404, oversize body, bytes that do not decode) fails immediately.
//!
//! ## Why stream the body?
//!
//! `max_bytes` has to be enforced without buffering an arbitrarily large
//! response first. The body is read chunk by chunk and the request is
//! dropped as soon as the limit is crossed; a too-large image is a failure,
//! never a truncated file.

use crate::cache::{looks_like_svg, AssetCache, Fingerprint, Reservation};
use crate::config::RemoteImageConfig;
use crate::error::{AssetError, FetchError, PipelineError};
use crate::output::{AssetKind, RenderedAsset};
use crate::pipeline::extract::RemoteImageRef;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Extensions a fetched image may have been stored under.
const STORED_EXTENSIONS: &[&str] = &["png", "jpg", "gif", "webp", "svg"];

/// Progress kind reported for downloads.
const KIND: &str = "image";

/// Outcome of fetching a set of references.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub assets: HashMap<String, RenderedAsset>,
    /// Failure detail per URL (soft-fail only).
    pub failures: HashMap<String, String>,
    pub executed: usize,
    pub cache_hits: usize,
    pub duration_ms: u64,
}

impl FetchReport {
    pub fn asset_for(&self, url: &str) -> Option<&RenderedAsset> {
        self.assets.get(url)
    }

    pub fn failure_for(&self, url: &str) -> Option<&str> {
        self.failures.get(url).map(String::as_str)
    }
}

/// Cache key for a remote URL.
pub fn url_fingerprint(url: &str) -> Fingerprint {
    Fingerprint::from_parts(&["url", url])
}

/// Upper bound on a single retry delay.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// HTTP client configured for image downloads.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: RemoteImageConfig,
}

impl Fetcher {
    pub fn new(config: RemoteImageConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteImageConfig {
        &self.config
    }

    /// Download `url` with retries and return the validated bytes together
    /// with the extension and kind they should be stored as.
    pub async fn fetch(&self, url: &str) -> Result<(Vec<u8>, &'static str, AssetKind), FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.backoff_ms(attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    url, attempt, self.config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.download(url).await {
                Ok(bytes) => {
                    let (ext, kind) = validate(bytes.clone()).await?;
                    debug!("{url}: {} bytes, stored as .{ext}", bytes.len());
                    return Ok((bytes, ext, kind));
                }
                Err(e) if e.is_transient() => {
                    warn!("{url}: attempt {} failed: {e}", attempt + 1);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Transport("no attempt was made".into())))
    }

    /// Delay before retry number `attempt` (1-based): the configured backoff
    /// doubled per retry, saturating and capped at [`MAX_BACKOFF_MS`].
    fn backoff_ms(&self, attempt: u32) -> u64 {
        self.config
            .retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(MAX_BACKOFF_MS)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let limit = self.config.max_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| self.classify(e))?;
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                secs: self.config.timeout_secs,
            }
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Check that `bytes` is an image and pick its storage extension.
///
/// SVG is recognised by sniffing and accepted as vector content; anything
/// else must fully decode.
async fn validate(bytes: Vec<u8>) -> Result<(&'static str, AssetKind), FetchError> {
    if looks_like_svg(&bytes) {
        return Ok(("svg", AssetKind::Vector));
    }
    tokio::task::spawn_blocking(move || -> Result<(&'static str, AssetKind), FetchError> {
        let format = image::guess_format(&bytes).map_err(|e| FetchError::InvalidImage {
            detail: e.to_string(),
        })?;
        image::load_from_memory_with_format(&bytes, format).map_err(|e| {
            FetchError::InvalidImage {
                detail: e.to_string(),
            }
        })?;
        let ext = format.extensions_str().first().copied().unwrap_or("png");
        Ok((ext, AssetKind::Raster))
    })
    .await
    .map_err(|e| FetchError::InvalidImage {
        detail: format!("validation task failed: {e}"),
    })?
}

enum JobError {
    Fetch(String),
    Fatal(PipelineError),
}

/// Fetch every distinct URL among `refs`.
///
/// Does nothing when remote images are disabled; the references are then
/// left as written. Under `fail_hard` the first failure is returned as
/// [`PipelineError::Fetch`], attributed to the first reference to the URL.
pub async fn fetch_images(
    refs: &[RemoteImageRef],
    fetcher: &Fetcher,
    cache: &dyn AssetCache,
    progress: Option<&ProgressCallback>,
) -> Result<FetchReport, PipelineError> {
    let start = Instant::now();
    let mut report = FetchReport::default();
    if !fetcher.config.enabled || refs.is_empty() {
        return Ok(report);
    }

    let mut firsts: Vec<&RemoteImageRef> = Vec::new();
    for r in refs {
        if !firsts.iter().any(|f| f.url == r.url) {
            firsts.push(r);
        }
    }
    info!(
        "Fetching {} remote images ({} references), concurrency {}",
        firsts.len(),
        refs.len(),
        fetcher.config.concurrency
    );

    let mut results = stream::iter(firsts.iter().enumerate().map(|(slot, r)| async move {
        if let Some(cb) = progress {
            cb.on_asset_start(KIND, &r.url);
        }
        (slot, fetch_one(&r.url, fetcher, cache).await)
    }))
    .buffer_unordered(fetcher.config.concurrency.max(1));

    while let Some((slot, result)) = results.next().await {
        let r = firsts[slot];
        match result {
            Ok((asset, cached)) => {
                if cached {
                    report.cache_hits += 1;
                } else {
                    report.executed += 1;
                }
                if let Some(cb) = progress {
                    cb.on_asset_complete(KIND, cached);
                }
                report.assets.insert(r.url.clone(), asset);
            }
            Err(JobError::Fatal(e)) => return Err(e),
            Err(JobError::Fetch(detail)) => {
                report.executed += 1;
                let error = AssetError::Fetch {
                    document: r.path.clone(),
                    line: r.line,
                    url: r.url.clone(),
                    detail: detail.clone(),
                };
                if let Some(cb) = progress {
                    cb.on_asset_error(KIND, &error.to_string());
                }
                if fetcher.config.fail_hard {
                    return Err(PipelineError::Fetch(error));
                }
                warn!("{error}; keeping the remote reference");
                report.failures.insert(r.url.clone(), detail);
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Images done: {} downloaded, {} cached, {} failed in {}ms",
        report.executed - report.failures.len(),
        report.cache_hits,
        report.failures.len(),
        report.duration_ms
    );
    Ok(report)
}

async fn fetch_one(
    url: &str,
    fetcher: &Fetcher,
    cache: &dyn AssetCache,
) -> Result<(RenderedAsset, bool), JobError> {
    let fingerprint = url_fingerprint(url);
    let asset = |path: PathBuf, kind: AssetKind| RenderedAsset {
        path,
        fingerprint: fingerprint.clone(),
        kind,
    };
    let kind_of = |path: &PathBuf| {
        if path.extension().is_some_and(|e| e == "svg") {
            AssetKind::Vector
        } else {
            AssetKind::Raster
        }
    };

    for ext in STORED_EXTENSIONS {
        if let Some(path) = cache.lookup(&fingerprint, ext).await {
            debug!("Cache hit for {url}");
            let kind = kind_of(&path);
            return Ok((asset(path, kind), true));
        }
    }

    let (bytes, ext, kind) = fetcher
        .fetch(url)
        .await
        .map_err(|e| JobError::Fetch(e.to_string()))?;

    match cache
        .reserve(&fingerprint, ext)
        .await
        .map_err(|e| JobError::Fatal(e.into()))?
    {
        Reservation::Cached(path) => Ok((asset(path, kind), true)),
        Reservation::Pending(in_flight) => match in_flight.wait().await {
            Some(path) => Ok((asset(path, kind), true)),
            None => Err(JobError::Fetch(
                FetchError::Store("concurrent download failed".into()).to_string(),
            )),
        },
        Reservation::Reserved(ticket) => {
            tokio::fs::write(ticket.path(), &bytes)
                .await
                .map_err(|e| JobError::Fetch(FetchError::Store(e.to_string()).to_string()))?;
            let path = ticket.commit().map_err(|e| JobError::Fatal(e.into()))?;
            Ok((asset(path, kind), false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::io::Cursor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn config() -> RemoteImageConfig {
        RemoteImageConfig {
            timeout_secs: 1,
            max_retries: 1,
            retry_backoff_ms: 10,
            ..Default::default()
        }
    }

    fn reference(url: String, line: usize) -> RemoteImageRef {
        RemoteImageRef {
            document: 0,
            path: PathBuf::from("doc.md"),
            range: 0..0,
            line,
            alt: "alt".into(),
            url,
            title: None,
        }
    }

    #[test]
    fn backoff_doubles_then_saturates_at_cap() {
        let fetcher = Fetcher::new(RemoteImageConfig {
            retry_backoff_ms: 250,
            ..config()
        })
        .unwrap();
        assert_eq!(fetcher.backoff_ms(1), 250);
        assert_eq!(fetcher.backoff_ms(3), 1_000);
        assert_eq!(fetcher.backoff_ms(64), MAX_BACKOFF_MS);
        assert_eq!(fetcher.backoff_ms(u32::MAX), MAX_BACKOFF_MS);

        let huge = Fetcher::new(RemoteImageConfig {
            retry_backoff_ms: u64::MAX,
            ..config()
        })
        .unwrap();
        assert_eq!(huge.backoff_ms(2), MAX_BACKOFF_MS);
    }

    #[tokio::test]
    async fn duplicate_urls_fetch_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fetcher = Fetcher::new(config()).unwrap();
        let url = format!("{}/logo.png", server.uri());
        let refs = vec![reference(url.clone(), 1), reference(url.clone(), 9)];

        let report = fetch_images(&refs, &fetcher, &cache, None).await.unwrap();
        assert_eq!(report.executed, 1);
        let asset = report.asset_for(&url).unwrap();
        assert_eq!(asset.kind, AssetKind::Raster);
        assert_eq!(asset.path.extension().unwrap(), "png");
    }

    #[tokio::test]
    async fn svg_is_accepted_as_vector() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"),
            )
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(config()).unwrap();
        let (_, ext, kind) = fetcher.fetch(&format!("{}/d", server.uri())).await.unwrap();
        assert_eq!(ext, "svg");
        assert_eq!(kind, AssetKind::Vector);
    }

    #[tokio::test]
    async fn non_image_body_is_rejected_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(config()).unwrap();
        let err = fetcher.fetch(&format!("{}/x", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidImage { .. }));
    }

    #[tokio::test]
    async fn oversize_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(RemoteImageConfig {
            max_bytes: 1024,
            ..config()
        })
        .unwrap();
        let err = fetcher.fetch(&format!("{}/big", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(config()).unwrap();
        let err = fetcher.fetch(&format!("{}/busy", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 503 }));
    }

    #[tokio::test]
    async fn not_found_is_recorded_and_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fetcher = Fetcher::new(config()).unwrap();
        let url = format!("{}/missing.png", server.uri());

        let report = fetch_images(&[reference(url.clone(), 3)], &fetcher, &cache, None)
            .await
            .unwrap();
        assert!(report.asset_for(&url).is_none());
        assert_eq!(report.failure_for(&url), Some("HTTP 404"));
    }

    #[tokio::test]
    async fn hard_fail_aborts_with_attribution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fetcher = Fetcher::new(RemoteImageConfig {
            fail_hard: true,
            ..config()
        })
        .unwrap();
        let url = format!("{}/missing.png", server.uri());

        let err = fetch_images(&[reference(url, 12)], &fetcher, &cache, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Fetch(AssetError::Fetch { line: 12, .. })
        ));
    }

    #[tokio::test]
    async fn disabled_fetcher_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let fetcher = Fetcher::new(RemoteImageConfig {
            enabled: false,
            ..config()
        })
        .unwrap();
        let refs = vec![reference("http://127.0.0.1:9/x.png".into(), 1)];
        let report = fetch_images(&refs, &fetcher, &cache, None).await.unwrap();
        assert!(report.assets.is_empty());
        assert!(report.failures.is_empty());
    }
}
