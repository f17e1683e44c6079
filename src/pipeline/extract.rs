//! Locate diagram blocks, remote images and code regions in Markdown text.
//!
//! This is not a Markdown parser. It recognises exactly three things:
//!
//! * fenced code blocks (```` ``` ```` or `~~~`, up to three spaces of
//!   indentation, closed by a fence of the same character at least as long),
//! * single-backtick inline code spans,
//! * `![alt](http(s)://… "title")` image references.
//!
//! Everything else is left to the downstream converter. Fenced blocks and
//! inline code are "protected": the other stages never rewrite text inside
//! them.

use crate::diagram::RendererRegistry;
use crate::document::Document;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use std::path::PathBuf;

static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").expect("valid regex"));

static REMOTE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"!\[(?P<alt>[^\]\n]*)\]\(\s*<?(?P<url>https?://[^\s<>)]+)>?(?:\s+(?P<title>"[^"\n]*"|'[^'\n]*'))?\s*\)"#,
    )
    .expect("valid regex")
});

// ── Line index ───────────────────────────────────────────────────────────

/// Maps byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset)
    }
}

// ── Fenced blocks ────────────────────────────────────────────────────────

/// One fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// From the first fence character's line start to the end of the
    /// closing fence, excluding its line break.
    pub range: Range<usize>,
    /// Content between the fences, without the final line break.
    pub content: Range<usize>,
    /// 1-based line of the opening fence.
    pub line: usize,
    /// First word of the info string, lowercased, with `{.` `}` stripped.
    pub tag: String,
    /// `false` when the document ended before a closing fence.
    pub closed: bool,
}

struct OpenFence {
    start: usize,
    line: usize,
    ch: char,
    len: usize,
    tag: String,
    content_start: usize,
}

fn fence_run(rest: &str) -> Option<(char, usize)> {
    let ch = rest.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = rest.chars().take_while(|&c| c == ch).count();
    (len >= 3).then_some((ch, len))
}

fn info_tag(info: &str) -> String {
    info.split_whitespace()
        .next()
        .unwrap_or("")
        .trim_start_matches('{')
        .trim_start_matches('.')
        .trim_end_matches('}')
        .to_ascii_lowercase()
}

/// Scan all fenced code blocks in document order.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;
    let mut offset = 0;

    for (idx, raw_line) in text.split_inclusive('\n').enumerate() {
        let line = raw_line.trim_end_matches(['\n', '\r']);
        let indent = line.len() - line.trim_start_matches(' ').len();
        let rest = &line[indent..];

        if indent <= 3 {
            match &open {
                None => {
                    if let Some((ch, len)) = fence_run(rest) {
                        let info = &rest[len..];
                        if ch != '`' || !info.contains('`') {
                            open = Some(OpenFence {
                                start: offset,
                                line: idx + 1,
                                ch,
                                len,
                                tag: info_tag(info),
                                content_start: offset + raw_line.len(),
                            });
                        }
                    }
                }
                Some(f) => {
                    if let Some((ch, len)) = fence_run(rest) {
                        if ch == f.ch && len >= f.len && rest[len..].trim().is_empty() {
                            let content_end = offset.max(f.content_start);
                            let content_end = if content_end > f.content_start {
                                trim_break(text, f.content_start, content_end)
                            } else {
                                content_end
                            };
                            blocks.push(FencedBlock {
                                range: f.start..offset + line.len(),
                                content: f.content_start..content_end,
                                line: f.line,
                                tag: f.tag.clone(),
                                closed: true,
                            });
                            open = None;
                        }
                    }
                }
            }
        }
        offset += raw_line.len();
    }

    if let Some(f) = open {
        blocks.push(FencedBlock {
            range: f.start..text.len(),
            content: f.content_start.min(text.len())..text.len(),
            line: f.line,
            tag: f.tag,
            closed: false,
        });
    }
    blocks
}

/// Drop one trailing `\n` or `\r\n` from `text[start..end]`.
fn trim_break(text: &str, start: usize, end: usize) -> usize {
    let slice = &text[start..end];
    if let Some(s) = slice.strip_suffix("\r\n") {
        start + s.len()
    } else if let Some(s) = slice.strip_suffix('\n') {
        start + s.len()
    } else {
        end
    }
}

/// Byte ranges no rewriting stage may touch: fenced blocks and inline code
/// spans outside them. Sorted and non-overlapping.
pub fn protected_ranges(text: &str) -> Vec<Range<usize>> {
    let fences: Vec<Range<usize>> = fenced_blocks(text).into_iter().map(|b| b.range).collect();
    let mut ranges = fences.clone();
    for m in INLINE_CODE.find_iter(text) {
        if !overlaps(&fences, &m.range()) {
            ranges.push(m.range());
        }
    }
    ranges.sort_by_key(|r| r.start);
    ranges
}

/// Whether `range` intersects any of the sorted `ranges`.
pub fn overlaps(ranges: &[Range<usize>], range: &Range<usize>) -> bool {
    ranges
        .iter()
        .any(|r| r.start < range.end && range.start < r.end)
}

// ── Diagram blocks ───────────────────────────────────────────────────────

/// A fenced block claimed by a registered diagram renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramBlock {
    /// Index of the document in merge order.
    pub document: usize,
    pub path: PathBuf,
    /// Byte range in the document body.
    pub range: Range<usize>,
    /// 1-based line in the original file.
    pub line: usize,
    pub tag: String,
    pub source: String,
}

/// Diagram blocks of one document, in source order.
pub fn diagram_blocks(
    index: usize,
    doc: &Document,
    registry: &RendererRegistry,
) -> Vec<DiagramBlock> {
    fenced_blocks(&doc.body)
        .into_iter()
        .filter(|b| b.closed && registry.for_tag(&b.tag).is_some())
        .map(|b| DiagramBlock {
            document: index,
            path: doc.path.clone(),
            line: b.line + doc.body_line_offset,
            tag: b.tag,
            source: doc.body[b.content].to_string(),
            range: b.range,
        })
        .collect()
}

// ── Remote images ────────────────────────────────────────────────────────

/// A Markdown image whose target is an HTTP(S) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImageRef {
    pub document: usize,
    pub path: PathBuf,
    pub range: Range<usize>,
    pub line: usize,
    pub alt: String,
    pub url: String,
    /// Title including its quotes, as written.
    pub title: Option<String>,
}

impl RemoteImageRef {
    /// The reference with its target replaced by `target`.
    pub fn with_target(&self, target: &str) -> String {
        match &self.title {
            Some(title) => format!("![{}]({} {})", self.alt, target, title),
            None => format!("![{}]({})", self.alt, target),
        }
    }
}

/// Remote image references of one document outside protected ranges.
pub fn remote_images(index: usize, doc: &Document, protected: &[Range<usize>]) -> Vec<RemoteImageRef> {
    let lines = LineIndex::new(&doc.body);
    REMOTE_IMAGE
        .captures_iter(&doc.body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if overlaps(protected, &whole.range()) {
                return None;
            }
            Some(RemoteImageRef {
                document: index,
                path: doc.path.clone(),
                range: whole.range(),
                line: lines.line_of(whole.start()) + doc.body_line_offset,
                alt: caps.name("alt").map_or("", |m| m.as_str()).to_string(),
                url: caps.name("url").map_or("", |m| m.as_str()).to_string(),
                title: caps.name("title").map(|m| m.as_str().to_string()),
            })
        })
        .collect()
}
