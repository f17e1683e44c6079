//! Input resolution: turn a user-supplied file or directory into an ordered
//! list of Markdown documents.
//!
//! ## Why sort the directory walk?
//!
//! `walkdir` yields entries in file-system order, which differs between
//! platforms and even between runs on the same machine. Merge order decides
//! page order and which front matter wins, so a directory source is sorted
//! by path before anything is read.

use crate::document::Document;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// A resolved source: the Markdown files to merge and the stem of the PDF
/// they produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    pub files: Vec<PathBuf>,
    /// `intro` for `intro.md`, `guide` for a directory named `guide`.
    pub output_stem: String,
}

/// Check if the path has a Markdown extension.
pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

/// Resolve a file or directory source.
///
/// A directory is walked recursively; hidden entries are skipped.
pub fn resolve_source(source: &Path) -> Result<SourceSet, PipelineError> {
    if !source.exists() {
        return Err(PipelineError::DocumentNotFound {
            path: source.to_path_buf(),
        });
    }

    let stem = source
        .file_stem()
        .or_else(|| source.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());

    if source.is_file() {
        debug!("Resolved Markdown file: {}", source.display());
        return Ok(SourceSet {
            files: vec![source.to_path_buf()],
            output_stem: stem,
        });
    }

    let mut files: Vec<PathBuf> = WalkDir::new(source)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_markdown(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(PipelineError::NoDocuments {
            path: source.to_path_buf(),
        });
    }

    let dir_name = source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(stem);

    info!("Found {} Markdown file(s) in {}", files.len(), source.display());
    Ok(SourceSet {
        files,
        output_stem: dir_name,
    })
}

/// Read and parse documents in the given order.
pub async fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>, PipelineError> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::DocumentNotFound { path: path.clone() }
            } else {
                PipelineError::ReadFailed {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        documents.push(Document::parse(path.clone(), &text)?);
    }
    Ok(documents)
}
