//! Post-processing: deterministic cleanup passes on both sides of the
//! converter.
//!
//! [`clean_markdown`] runs on the merged, rewritten body before it is handed
//! to the converter. It never touches the content of lines, so fenced code
//! and hard line breaks (two trailing spaces) survive.
//!
//! [`stabilise_floats`] runs on the converter's LaTeX output. Pandoc emits
//! floating `figure` environments and `longtable`s without placement, which
//! lets LaTeX move diagrams pages away from the paragraph that introduces
//! them; pinning them with `[H]` keeps the reading order of the source.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply the Markdown-side rules, in order:
///
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (BOM, zero-width space, word joiner)
/// 3. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Apply the LaTeX-side rules to converter output.
pub fn clean_latex(input: &str) -> String {
    let s = normalise_line_endings(input);
    stabilise_floats(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────
//
// Zero-width joiners are kept: emoji sequences and several scripts need them.

fn remove_invisible_chars(input: &str) -> String {
    input.replace(['\u{200B}', '\u{FEFF}', '\u{2060}'], "")
}

// ── Rule 3: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end_matches('\n');
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── LaTeX: pin floats ────────────────────────────────────────────────────────

static RE_FLOAT_BEGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\begin\{(figure|longtable)\}(\[)?").expect("valid regex")
});

/// Add `[H]` to every `figure` and `longtable` that has no placement or
/// alignment argument.
pub fn stabilise_floats(latex: &str) -> String {
    RE_FLOAT_BEGIN
        .replace_all(latex, |caps: &regex::Captures<'_>| {
            if caps.get(2).is_some() {
                caps[0].to_string()
            } else {
                format!("\\begin{{{}}}[H]", &caps[1])
            }
        })
        .into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────
