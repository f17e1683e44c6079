//! Table-of-contents extraction and heading anchors.
//!
//! Headings are ATX headings (`#` … `######`) and setext headings (a text
//! line underlined with `===` or `---`) outside fenced code, scanned across
//! all merged documents in order. Every heading gets an anchor that is
//! unique within the whole run: the slug of its title, or its explicit
//! `{#id}`, with `-1`, `-2`, … appended on collision. Only headings up to
//! the configured depth become [`TocEntry`] values, but all of them take
//! part in uniqueness so converter-generated ids can never collide with ours.
//!
//! When anchor injection is on, each heading line in the body is rewritten
//! to carry `{#anchor}` so the converter's identifiers match the entries.
//! A trailing `{…}` counts as an attribute block only when every token in it
//! is `#id`, `.class` or `key=value`; anything else stays part of the title.

use crate::config::TocConfig;
use crate::pipeline::extract::fenced_blocks;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

static ATX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*?))?(?:[ \t]+#+)?[ \t]*$").expect("valid regex")
});

static SETEXT_UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(=+|-+)[ \t]*$").expect("valid regex"));

/// Lines that open another block type and so cannot be setext heading text.
static NOT_SETEXT_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ {0,3}(?:[-*+][ \t]|\d{1,9}[.)][ \t]|>|\||#{1,6}(?:[ \t]|$)|[-*_=]+[ \t]*$)")
        .expect("valid regex")
});

static ATTR_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]*\{([^{}]*)\}[ \t]*$").expect("valid regex"));

static ATTR_TOKEN_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:[^\s"]|"[^"]*")+"#).expect("valid regex"));

static ATTR_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:#[^\s#{}="]+|\.[^\s#.{}="]+|[A-Za-z_][\w.:-]*=(?:"[^"]*"|[^\s"]*)|-)$"#)
        .expect("valid regex")
});

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][^<>]*>").expect("valid regex"));

/// One anchored heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub level: u8,
    pub title: String,
    /// Unique within the run.
    pub anchor: String,
    /// Display label: number and title, e.g. `2.1 Usage`.
    pub label: String,
    /// Hierarchical number such as `2.1.3`.
    pub number: String,
    /// Index of the source document in merge order.
    pub document: usize,
}

/// Entries plus the bodies with anchors injected (unchanged bodies when
/// injection is off).
#[derive(Debug, Clone, Default)]
pub struct TocResult {
    pub entries: Vec<TocEntry>,
    pub bodies: Vec<String>,
}

/// Lowercase, replace anything but alphanumerics, `-` and `_` with `-`,
/// collapse dash runs and trim dashes.
pub fn slugify(text: &str) -> String {
    let replaced = text
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != '-' && c != '_', "-");
    let mut slug = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug.trim_matches('-').to_string()
}

/// Plain-text title: inline links reduced to their text, emphasis and code
/// markers removed.
fn plain_title(raw: &str) -> String {
    let text = LINK.replace_all(raw, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    text.chars()
        .filter(|c| !matches!(c, '*' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Default)]
struct Anchors {
    used: HashSet<String>,
}

impl Anchors {
    fn claim(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "section" } else { base };
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}-{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

struct Heading {
    line_start: usize,
    line_end: usize,
    level: u8,
    /// Underlined heading; the rewrite keeps the text line without hashes.
    setext: bool,
    /// Heading text without closing hashes or attribute block.
    text: String,
    explicit_id: Option<String>,
    /// Attribute block content minus the `#id` token.
    other_attrs: Vec<String>,
}

/// Tokens of a Pandoc attribute block, or `None` when `content` holds
/// anything else (plain braces in the title, LaTeX arguments).
fn attribute_tokens(content: &str) -> Option<Vec<&str>> {
    let tokens: Vec<&str> = ATTR_TOKEN_SPAN
        .find_iter(content)
        .map(|m| m.as_str())
        .collect();
    let rest = ATTR_TOKEN_SPAN.replace_all(content, "");
    if !rest.trim().is_empty() || !tokens.iter().all(|t| ATTR_TOKEN.is_match(t)) {
        return None;
    }
    Some(tokens)
}

fn heading(line_start: usize, line: &str, level: u8, setext: bool, raw_text: &str) -> Heading {
    let mut text = raw_text.to_string();
    let mut explicit_id = None;
    let mut other_attrs = Vec::new();

    if let Some(attr) = ATTR_BLOCK.captures(raw_text) {
        if let Some(tokens) = attribute_tokens(&attr[1]) {
            for token in tokens {
                match token.strip_prefix('#') {
                    Some(id) => explicit_id = Some(id.to_string()),
                    None => other_attrs.push(token.to_string()),
                }
            }
            let cut = attr.get(0).map_or(text.len(), |m| m.start());
            text.truncate(cut);
        }
    }

    Heading {
        line_start,
        line_end: line_start + line.len(),
        level,
        setext,
        text: text.trim().to_string(),
        explicit_id,
        other_attrs,
    }
}

fn scan_headings(body: &str) -> Vec<Heading> {
    let fences = fenced_blocks(body);
    let in_fence = |at: usize| fences.iter().any(|f| f.range.start <= at && at < f.range.end);

    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for raw in body.split_inclusive('\n') {
        lines.push((offset, raw.trim_end_matches(['\n', '\r'])));
        offset += raw.len();
    }

    let mut headings = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let (start, line) = lines[i];
        if in_fence(start) {
            i += 1;
            continue;
        }

        if let Some(caps) = ATX.captures(line) {
            let level = caps[1].len() as u8;
            let text = caps.get(2).map_or("", |m| m.as_str());
            headings.push(heading(start, line, level, false, text));
            i += 1;
            continue;
        }

        // Setext: one non-blank text line after a blank line (or the start),
        // immediately followed by an underline.
        let after_blank = i == 0 || lines[i - 1].1.trim().is_empty();
        if after_blank
            && !line.trim().is_empty()
            && !line.starts_with("    ")
            && !line.starts_with('\t')
            && !NOT_SETEXT_TEXT.is_match(line)
        {
            if let Some(&(next_start, next)) = lines.get(i + 1) {
                if !in_fence(next_start) {
                    if let Some(caps) = SETEXT_UNDERLINE.captures(next) {
                        let level = if caps[1].starts_with('=') { 1 } else { 2 };
                        let text = line.trim_start().trim_end();
                        headings.push(heading(start, line, level, true, text));
                        i += 2;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    headings
}

/// Extract entries from `bodies` in order and, if configured, inject anchors.
///
/// With `config.enabled == false` nothing is scanned and the bodies are
/// returned untouched.
pub fn build_toc(bodies: Vec<String>, config: &TocConfig) -> TocResult {
    if !config.enabled {
        return TocResult {
            entries: Vec::new(),
            bodies,
        };
    }

    let scanned: Vec<Vec<Heading>> = bodies.iter().map(|b| scan_headings(b)).collect();
    let base_level = scanned
        .iter()
        .flatten()
        .map(|h| h.level)
        .filter(|&l| l <= config.max_depth)
        .min()
        .unwrap_or(1);

    let mut anchors = Anchors::default();
    let mut counters = [0usize; 6];
    let mut entries = Vec::new();
    let mut out_bodies = Vec::with_capacity(bodies.len());

    for (doc_index, (body, headings)) in bodies.into_iter().zip(scanned).enumerate() {
        let mut rewritten = String::with_capacity(body.len() + headings.len() * 16);
        let mut cursor = 0;

        for h in headings {
            let title = plain_title(&h.text);
            let base = h.explicit_id.clone().unwrap_or_else(|| slugify(&title));
            let anchor = anchors.claim(&base);

            if h.level <= config.max_depth {
                let depth = usize::from(h.level - 1);
                counters[depth] += 1;
                for c in counters.iter_mut().skip(depth + 1) {
                    *c = 0;
                }
                let number = counters[usize::from(base_level - 1)..=depth]
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(".");
                entries.push(TocEntry {
                    level: h.level,
                    label: format!("{number} {title}"),
                    title,
                    anchor: anchor.clone(),
                    number,
                    document: doc_index,
                });
            }

            if config.inject_anchors {
                let mut attrs = vec![format!("#{anchor}")];
                attrs.extend(h.other_attrs.iter().cloned());
                let marker = if h.setext {
                    String::new()
                } else {
                    "#".repeat(usize::from(h.level))
                };
                let line = [marker.as_str(), h.text.as_str()]
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                rewritten.push_str(&body[cursor..h.line_start]);
                rewritten.push_str(&format!("{line} {{{}}}", attrs.join(" ")));
                cursor = h.line_end;
            }
        }
        rewritten.push_str(&body[cursor..]);
        out_bodies.push(rewritten);
    }

    TocResult {
        entries,
        bodies: out_bodies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(depth: u8, inject: bool) -> TocConfig {
        TocConfig {
            enabled: true,
            max_depth: depth,
            inject_anchors: inject,
        }
    }

    #[test]
    fn slugify_matches_common_cases() {
        assert_eq!(slugify("Hello World!"), "hello-world");
        assert_eq!(slugify("  API -- v2.0  "), "api-v2-0");
        assert_eq!(slugify("Ünïcode Títle"), "ünïcode-títle");
        assert_eq!(slugify("snake_case"), "snake_case");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn duplicate_titles_get_distinct_anchors() {
        let bodies = vec![
            "# Setup\n\n## Usage\n".to_string(),
            "# Setup\n\n## Usage\n".to_string(),
        ];
        let toc = build_toc(bodies, &config(3, false));
        let anchors: Vec<_> = toc.entries.iter().map(|e| e.anchor.as_str()).collect();
        assert_eq!(anchors, vec!["setup", "usage", "setup-1", "usage-1"]);
        assert_eq!(toc.entries[2].label, "2 Setup");
        assert_eq!(toc.entries[3].document, 1);
    }

    #[test]
    fn depth_limits_entries_but_not_uniqueness() {
        let body = "# A\n#### Deep\n## B\n# Deep\n".to_string();
        let toc = build_toc(vec![body], &config(2, true));
        let titles: Vec<_> = toc.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "Deep"]);
        assert_eq!(toc.entries[2].anchor, "deep-1");
        assert!(toc.bodies[0].contains("#### Deep {#deep}"));
    }

    #[test]
    fn styled_heading_uses_plain_text() {
        let body = "## <span style=\"color:red\">Alert</span> level\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));
        assert_eq!(toc.entries[0].title, "Alert level");
        assert_eq!(toc.entries[0].anchor, "alert-level");
    }

    #[test]
    fn numbering_is_hierarchical() {
        let body = "# One\n## One.A\n## One.B\n### x\n# Two\n## Two.A\n".to_string();
        let toc = build_toc(vec![body], &config(3, false));
        let numbers: Vec<_> = toc.entries.iter().map(|e| e.number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "1.1", "1.2", "1.2.1", "2", "2.1"]);
    }

    #[test]
    fn numbering_starts_at_shallowest_level() {
        let toc = build_toc(vec!["## A\n### B\n## C\n".into()], &config(3, false));
        let numbers: Vec<_> = toc.entries.iter().map(|e| e.number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "1.1", "2"]);
    }

    #[test]
    fn headings_in_code_are_ignored() {
        let body = "```bash\n# not a heading\n```\n# Real\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));
        assert_eq!(toc.entries.len(), 1);
        assert_eq!(
            toc.bodies[0],
            "```bash\n# not a heading\n```\n# Real {#real}\n"
        );
    }

    #[test]
    fn explicit_id_is_honoured_and_uniquified() {
        let body = "# Intro {#start .unnumbered}\n# Again {#start}\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));
        assert_eq!(toc.entries[0].anchor, "start");
        assert_eq!(toc.entries[1].anchor, "start-1");
        assert_eq!(
            toc.bodies[0],
            "# Intro {#start .unnumbered}\n# Again {#start-1}\n"
        );
    }

    #[test]
    fn closing_hashes_and_markup_are_stripped() {
        let body = "## The **`fetch`** [API](https://x.test) ##\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));
        assert_eq!(toc.entries[0].title, "The fetch API");
        assert_eq!(toc.entries[0].anchor, "the-fetch-api");
        assert!(toc.bodies[0].starts_with("## The **`fetch`** [API](https://x.test) {#the-fetch-api}"));
    }

    #[test]
    fn disabled_short_circuits() {
        let bodies = vec!["# A\n".to_string()];
        let toc = build_toc(
            bodies.clone(),
            &TocConfig {
                enabled: false,
                ..config(3, true)
            },
        );
        assert!(toc.entries.is_empty());
        assert_eq!(toc.bodies, bodies);
    }

    #[test]
    fn braces_that_are_not_attributes_stay_in_the_title() {
        let body = "# Sets {a, b}\n# Use \\textbf{x}\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));

        assert_eq!(toc.entries[0].title, "Sets {a, b}");
        assert_eq!(toc.entries[1].title, "Use \\textbf{x}");
        assert_eq!(
            toc.bodies[0],
            "# Sets {a, b} {#sets-a-b}\n# Use \\textbf{x} {#use-textbf-x}\n"
        );
    }

    #[test]
    fn attribute_blocks_keep_classes_and_key_values() {
        let body = "# Intro {.unnumbered lang=\"en gb\"}\n# Plain {}\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));
        assert_eq!(toc.entries[0].title, "Intro");
        assert_eq!(toc.entries[1].title, "Plain");
        assert_eq!(
            toc.bodies[0],
            "# Intro {#intro .unnumbered lang=\"en gb\"}\n# Plain {#plain}\n"
        );
    }

    #[test]
    fn setext_headings_are_entries_and_share_anchor_space() {
        let body = "Overview\n========\n\nText\n\nDetails\n-------\n\n# Overview\n".to_string();
        let toc = build_toc(vec![body], &config(3, true));

        let got: Vec<_> = toc
            .entries
            .iter()
            .map(|e| (e.level, e.title.as_str(), e.anchor.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (1, "Overview", "overview"),
                (2, "Details", "details"),
                (1, "Overview", "overview-1"),
            ]
        );
        assert_eq!(
            toc.bodies[0],
            "Overview {#overview}\n========\n\nText\n\nDetails {#details}\n-------\n\n# Overview {#overview-1}\n"
        );
    }

    #[test]
    fn rules_and_paragraph_continuations_are_not_setext() {
        let body = "Intro\n\n---\n\nline one\nline two\n---\n\n- item\n---\n\n```\ncode\n---\n```\n"
            .to_string();
        let toc = build_toc(vec![body.clone()], &config(3, true));
        assert!(toc.entries.is_empty());
        assert_eq!(toc.bodies[0], body);
    }

    #[test]
    fn hashtag_without_space_is_not_a_heading() {
        let toc = build_toc(vec!["#hashtag\n".into()], &config(3, true));
        assert!(toc.entries.is_empty());
    }
}
