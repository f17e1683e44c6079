//! Fingerprint-keyed asset cache.
//!
//! Rendered diagrams and fetched images are stored once per fingerprint and
//! never rewritten in place. Workers go through [`AssetCache::reserve`],
//! which answers atomically with one of:
//!
//! ```text
//! Cached(path)      ─▶ reuse, no work
//! Reserved(ticket)  ─▶ this caller produces the asset, then commits
//! Pending(inflight) ─▶ a sibling is producing it; wait for its result
//! ```
//!
//! ## Why reserve before rendering?
//!
//! Two workers that discover the same fingerprint at the same moment would
//! otherwise both launch a subprocess. The in-flight table makes the second
//! one wait on a `watch` channel instead. If the first worker fails, waiters
//! see `None` and may reserve again.
//!
//! ## Write path
//!
//! A ticket hands out a staging file inside the cache root. `commit` renames
//! it onto the final name, so readers never observe a partial file. When
//! validation is on and the file under the canonical name is unreadable, the
//! new asset is written under a suffixed name (`<fp>-1.png`, `<fp>-2.png`, …)
//! rather than over the bad one.

use crate::error::CacheError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempPath;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Upper bound on suffixed candidates examined for one fingerprint.
const MAX_CANDIDATES: usize = 16;

// ── Fingerprint ──────────────────────────────────────────────────────────

/// Content hash used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash an ordered list of parts. Each part is length-prefixed so
    /// `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn from_parts(parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Reservation ──────────────────────────────────────────────────────────

/// `None` while running; `Some(None)` on failure; `Some(Some(path))` on success.
type Slot = Option<Option<PathBuf>>;

/// Result of [`AssetCache::reserve`].
#[derive(Debug)]
pub enum Reservation {
    Cached(PathBuf),
    Reserved(WriteTicket),
    Pending(InFlight),
}

/// Handle on an asset another worker is producing.
#[derive(Debug)]
pub struct InFlight {
    rx: watch::Receiver<Slot>,
}

impl InFlight {
    /// Wait for the producing worker. `None` means it failed or gave up.
    pub async fn wait(mut self) -> Option<PathBuf> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone().flatten(),
            Err(_) => None,
        }
    }
}

/// Exclusive right to produce one fingerprint.
///
/// Dropping a ticket without committing releases the reservation and wakes
/// any waiters with a failure.
#[derive(Debug)]
pub struct WriteTicket {
    key: String,
    staging: Option<TempPath>,
    target: PathBuf,
    core: Arc<CacheCore>,
    tx: watch::Sender<Slot>,
    done: bool,
}

impl WriteTicket {
    /// Where the producer must write the asset.
    pub fn path(&self) -> &Path {
        self.staging.as_deref().unwrap_or(&self.target)
    }

    /// The name the asset will have once committed.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically publish the staged file under its final name.
    pub fn commit(mut self) -> Result<PathBuf, CacheError> {
        if let Some(staging) = self.staging.take() {
            staging.persist(&self.target).map_err(|e| CacheError::Commit {
                path: self.target.clone(),
                source: e.error,
            })?;
        }
        let target = self.target.clone();
        self.core.finish(&self.key, Some(target.clone()));
        self.tx.send_replace(Some(Some(target.clone())));
        self.done = true;
        debug!("Committed asset {}", target.display());
        Ok(target)
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        if !self.done {
            self.core.finish(&self.key, None);
            self.tx.send_replace(Some(None));
        }
    }
}

// ── Trait ────────────────────────────────────────────────────────────────

/// Storage for rendered and fetched assets, keyed by fingerprint and file
/// extension.
#[async_trait]
pub trait AssetCache: Send + Sync {
    /// Directory the assets live in.
    fn root(&self) -> &Path;

    /// Return the path of a usable asset without reserving anything.
    async fn lookup(&self, fingerprint: &Fingerprint, ext: &str) -> Option<PathBuf>;

    /// Atomically check for the asset and, if absent, claim the right to
    /// produce it.
    async fn reserve(&self, fingerprint: &Fingerprint, ext: &str)
        -> Result<Reservation, CacheError>;
}

// ── Shared core ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct CacheCore {
    root: PathBuf,
    scan_disk: bool,
    validate: bool,
    index: Mutex<HashMap<String, PathBuf>>,
    in_flight: Mutex<HashMap<String, watch::Receiver<Slot>>>,
}

impl CacheCore {
    fn new(root: PathBuf, scan_disk: bool, validate: bool) -> Result<Arc<Self>, CacheError> {
        std::fs::create_dir_all(&root).map_err(|e| CacheError::Directory {
            path: root.clone(),
            source: e,
        })?;
        Ok(Arc::new(Self {
            root,
            scan_disk,
            validate,
            index: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }))
    }

    fn finish(&self, key: &str, path: Option<PathBuf>) {
        if let Some(path) = path {
            if let Ok(mut index) = self.index.lock() {
                index.insert(key.to_string(), path);
            }
        }
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(key);
        }
    }

    fn indexed(&self, key: &str) -> Option<PathBuf> {
        let index = self.index.lock().ok()?;
        index.get(key).filter(|p| p.is_file()).cloned()
    }

    /// Candidate file names for one fingerprint, canonical name first.
    fn candidates(&self, fingerprint: &Fingerprint, ext: &str) -> Vec<PathBuf> {
        (0..MAX_CANDIDATES)
            .map(|n| match n {
                0 => self.root.join(format!("{fingerprint}.{ext}")),
                n => self.root.join(format!("{fingerprint}-{n}.{ext}")),
            })
            .collect()
    }

    /// Walk the candidates: return the first usable file, or the first free
    /// name to write to.
    async fn find_slot(&self, fingerprint: &Fingerprint, ext: &str) -> Lookup {
        let candidates = self.candidates(fingerprint, ext);
        let validate = self.validate;
        tokio::task::spawn_blocking(move || {
            for path in candidates {
                if !path.exists() {
                    return Lookup::Free(path);
                }
                if !validate || is_valid_asset(&path) {
                    return Lookup::Hit(path);
                }
                warn!("Cached asset {} failed validation; writing a fresh copy", path.display());
            }
            Lookup::Exhausted
        })
        .await
        .unwrap_or(Lookup::Exhausted)
    }

    async fn lookup(&self, fingerprint: &Fingerprint, ext: &str) -> Option<PathBuf> {
        let key = format!("{fingerprint}.{ext}");
        if let Some(path) = self.indexed(&key) {
            return Some(path);
        }
        if !self.scan_disk {
            return None;
        }
        match self.find_slot(fingerprint, ext).await {
            Lookup::Hit(path) => Some(path),
            Lookup::Free(_) | Lookup::Exhausted => None,
        }
    }

    async fn reserve(
        self: &Arc<Self>,
        fingerprint: &Fingerprint,
        ext: &str,
    ) -> Result<Reservation, CacheError> {
        let key = format!("{fingerprint}.{ext}");

        let tx = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| poisoned(&self.root))?;
            if let Some(path) = self.indexed(&key) {
                return Ok(Reservation::Cached(path));
            }
            if let Some(rx) = in_flight.get(&key) {
                return Ok(Reservation::Pending(InFlight { rx: rx.clone() }));
            }
            let (tx, rx) = watch::channel(None);
            in_flight.insert(key.clone(), rx);
            tx
        };

        let mut ticket = WriteTicket {
            key,
            staging: None,
            target: self.root.join(format!("{fingerprint}.{ext}")),
            core: Arc::clone(self),
            tx,
            done: false,
        };

        if self.scan_disk {
            match self.find_slot(fingerprint, ext).await {
                Lookup::Hit(path) => {
                    debug!("Cache hit on disk: {}", path.display());
                    ticket.target = path;
                    return ticket.commit().map(Reservation::Cached);
                }
                Lookup::Free(path) => ticket.target = path,
                Lookup::Exhausted => {
                    return Err(CacheError::Directory {
                        path: self.root.clone(),
                        source: std::io::Error::other(format!(
                            "no free slot for fingerprint {fingerprint}"
                        )),
                    })
                }
            }
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .suffix(&format!(".{ext}"))
            .tempfile_in(&self.root)
            .map_err(|e| CacheError::Directory {
                path: self.root.clone(),
                source: e,
            })?
            .into_temp_path();
        ticket.staging = Some(staging);
        Ok(Reservation::Reserved(ticket))
    }
}

enum Lookup {
    Hit(PathBuf),
    Free(PathBuf),
    Exhausted,
}

fn poisoned(root: &Path) -> CacheError {
    CacheError::Directory {
        path: root.to_path_buf(),
        source: std::io::Error::other("cache lock poisoned"),
    }
}

// ── Implementations ──────────────────────────────────────────────────────

/// Persistent cache shared across runs.
#[derive(Debug, Clone)]
pub struct DiskCache {
    core: Arc<CacheCore>,
}

impl DiskCache {
    /// Open (creating if needed) a cache directory.
    ///
    /// With `validate` set, files found on disk are checked before reuse.
    pub fn open(root: impl Into<PathBuf>, validate: bool) -> Result<Self, CacheError> {
        Ok(Self {
            core: CacheCore::new(root.into(), true, validate)?,
        })
    }
}

#[async_trait]
impl AssetCache for DiskCache {
    fn root(&self) -> &Path {
        &self.core.root
    }

    async fn lookup(&self, fingerprint: &Fingerprint, ext: &str) -> Option<PathBuf> {
        self.core.lookup(fingerprint, ext).await
    }

    async fn reserve(
        &self,
        fingerprint: &Fingerprint,
        ext: &str,
    ) -> Result<Reservation, CacheError> {
        self.core.reserve(fingerprint, ext).await
    }
}

/// Run-scoped cache. Files live under `root` but only assets committed
/// through this instance are ever reused.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    core: Arc<CacheCore>,
}

impl MemoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Ok(Self {
            core: CacheCore::new(root.into(), false, false)?,
        })
    }
}

#[async_trait]
impl AssetCache for MemoryCache {
    fn root(&self) -> &Path {
        &self.core.root
    }

    async fn lookup(&self, fingerprint: &Fingerprint, ext: &str) -> Option<PathBuf> {
        self.core.lookup(fingerprint, ext).await
    }

    async fn reserve(
        &self,
        fingerprint: &Fingerprint,
        ext: &str,
    ) -> Result<Reservation, CacheError> {
        self.core.reserve(fingerprint, ext).await
    }
}

// ── Content sniffing ─────────────────────────────────────────────────────

/// Whether the bytes look like an SVG document.
pub fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    (trimmed.starts_with("<?xml") || trimmed.starts_with("<svg") || trimmed.starts_with("<!--"))
        && text.contains("<svg")
}

/// Cheap integrity check for a cached file, chosen by extension.
pub fn is_valid_asset(path: &Path) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    if bytes.is_empty() {
        return false;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" => image::load_from_memory(&bytes).is_ok(),
        "svg" => looks_like_svg(&bytes),
        "pdf" => bytes.starts_with(b"%PDF"),
        "eps" => bytes.starts_with(b"%!PS"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_parts(&["test", s])
    }

    #[test]
    fn fingerprint_is_deterministic_and_length_prefixed() {
        assert_eq!(fp("a"), fp("a"));
        assert_ne!(fp("a"), fp("b"));
        assert_ne!(
            Fingerprint::from_parts(&["ab", "c"]),
            Fingerprint::from_parts(&["a", "bc"])
        );
        assert_eq!(fp("a").as_str().len(), 64);
    }

    #[tokio::test]
    async fn reserve_commit_then_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let key = fp("x");

        let Reservation::Reserved(ticket) = cache.reserve(&key, "svg").await.unwrap() else {
            panic!("expected a fresh reservation");
        };
        std::fs::write(ticket.path(), "<svg/>").unwrap();
        let path = ticket.commit().unwrap();
        assert!(path.ends_with(format!("{key}.svg")));

        match cache.reserve(&key, "svg").await.unwrap() {
            Reservation::Cached(p) => assert_eq!(p, path),
            other => panic!("expected cache hit, got {other:?}"),
        }
        assert_eq!(cache.lookup(&key, "svg").await, Some(path));
    }

    #[tokio::test]
    async fn concurrent_reserve_waits_for_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let key = fp("y");

        let Reservation::Reserved(ticket) = cache.reserve(&key, "svg").await.unwrap() else {
            panic!("expected a fresh reservation");
        };
        let Reservation::Pending(waiter) = cache.reserve(&key, "svg").await.unwrap() else {
            panic!("expected an in-flight reservation");
        };

        let handle = tokio::spawn(waiter.wait());
        std::fs::write(ticket.path(), "<svg/>").unwrap();
        let committed = ticket.commit().unwrap();
        assert_eq!(handle.await.unwrap(), Some(committed));
    }

    #[tokio::test]
    async fn dropped_ticket_releases_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MemoryCache::new(dir.path()).unwrap();
        let key = fp("z");

        let Reservation::Reserved(ticket) = cache.reserve(&key, "png").await.unwrap() else {
            panic!("expected a fresh reservation");
        };
        let Reservation::Pending(waiter) = cache.reserve(&key, "png").await.unwrap() else {
            panic!("expected an in-flight reservation");
        };
        drop(ticket);
        assert_eq!(waiter.wait().await, None);
        assert!(matches!(
            cache.reserve(&key, "png").await.unwrap(),
            Reservation::Reserved(_)
        ));
    }

    #[tokio::test]
    async fn disk_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = fp("persist");
        let path = {
            let cache = DiskCache::open(dir.path(), true).unwrap();
            let Reservation::Reserved(ticket) = cache.reserve(&key, "svg").await.unwrap() else {
                panic!("expected a fresh reservation");
            };
            std::fs::write(ticket.path(), "<svg xmlns=\"x\"/>").unwrap();
            ticket.commit().unwrap()
        };

        let reopened = DiskCache::open(dir.path(), true).unwrap();
        match reopened.reserve(&key, "svg").await.unwrap() {
            Reservation::Cached(p) => assert_eq!(p, path),
            other => panic!("expected disk hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_cached_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let key = fp("corrupt");
        let canonical = dir.path().join(format!("{key}.png"));
        std::fs::write(&canonical, b"not a png").unwrap();

        let cache = DiskCache::open(dir.path(), true).unwrap();
        let Reservation::Reserved(ticket) = cache.reserve(&key, "png").await.unwrap() else {
            panic!("corrupt file must not be reused");
        };
        assert_eq!(ticket.target(), dir.path().join(format!("{key}-1.png")));
        drop(ticket);
        assert_eq!(std::fs::read(&canonical).unwrap(), b"not a png");
    }

    #[tokio::test]
    async fn validation_disabled_reuses_any_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = fp("trusted");
        std::fs::write(dir.path().join(format!("{key}.png")), b"whatever").unwrap();
        let cache = DiskCache::open(dir.path(), false).unwrap();
        assert!(matches!(
            cache.reserve(&key, "png").await.unwrap(),
            Reservation::Cached(_)
        ));
    }

    #[test]
    fn svg_sniffing() {
        assert!(looks_like_svg(b"<svg xmlns='http://www.w3.org/2000/svg'></svg>"));
        assert!(looks_like_svg(b"<?xml version=\"1.0\"?>\n<svg></svg>"));
        assert!(!looks_like_svg(b"<html><body></body></html>"));
        assert!(!looks_like_svg(b"\x89PNG\r\n"));
    }
}
