//! Styled HTML → intermediate markup.
//!
//! Authors colour or centre text with small HTML islands such as
//! `<span style="color:#c00">Warning</span>` or
//! `<div style="text-align:center">…</div>`. Pandoc drops those styles when
//! writing LaTeX, so this stage rewrites them before conversion.
//!
//! ## Recognised input
//!
//! * tags: `span` (inline), `div` and `p` (block), each with a `style`
//!   attribute; any other tag, and these tags without `style`, pass through
//! * properties: `color`, `background-color`, `font-weight: bold`,
//!   `font-style: italic`, `text-decoration: underline`, and `text-align`
//!   on blocks; everything else is ignored
//! * colours: `#rgb`, `#rrggbb`, `rgb(r, g, b)`, otherwise a colour name
//!
//! ## Nesting
//!
//! Tags are matched with a stack, not a regex, so a styled element may
//! contain one level of styled children. An element whose styled children
//! have styled children of their own is left exactly as written. Elements
//! that overlap code are never touched.
//!
//! ## Output
//!
//! [`InlineStyleTarget::Latex`] emits `\textcolor`, `\colorbox`, `\textbf`,
//! `\textit`, `\underline` and alignment environments.
//! [`InlineStyleTarget::Attributes`] emits Pandoc bracketed spans and fenced
//! divs carrying a normalised `style` attribute.

use crate::config::InlineStyleTarget;
use crate::pipeline::extract::{overlaps, protected_ranges};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::ops::Range;

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(/?)(span|div|p)\b([^>]*)>").expect("valid regex")
});

static STYLE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bstyle\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([0-9a-fA-F]{6}|[0-9a-fA-F]{3})\b").expect("valid regex"));

static RGB_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^rgb\s*\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*\)")
        .expect("valid regex")
});

// ── Style model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Color {
    /// Six uppercase hex digits.
    Hex(String),
    Named(String),
}

impl Color {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(caps) = HEX_COLOR.captures(raw) {
            let hex = &caps[1];
            let hex: String = if hex.len() == 3 {
                hex.chars().flat_map(|c| [c, c]).collect()
            } else {
                hex.to_string()
            };
            return Some(Color::Hex(hex.to_ascii_uppercase()));
        }
        if let Some(caps) = RGB_COLOR.captures(raw) {
            let mut hex = String::with_capacity(6);
            for i in 1..=3 {
                let v: u32 = caps[i].parse().unwrap_or(0);
                let _ = write!(hex, "{:02X}", v.min(255));
            }
            return Some(Color::Hex(hex));
        }
        Some(Color::Named(raw.to_string()))
    }

    fn css(&self) -> String {
        match self {
            Color::Hex(h) => format!("#{h}"),
            Color::Named(n) => n.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
    Justify,
}

/// The recognised properties of one `style` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSet {
    pub color: Option<Color>,
    pub background: Option<Color>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub align: Option<Align>,
}

impl StyleSet {
    pub fn parse(style: &str) -> Self {
        let mut set = StyleSet::default();
        for decl in style.split(';') {
            let Some((key, value)) = decl.split_once(':') else {
                continue;
            };
            let value = value.trim();
            let lower = value.to_ascii_lowercase();
            match key.trim().to_ascii_lowercase().as_str() {
                "color" => set.color = Color::parse(value),
                "background-color" | "background" => set.background = Color::parse(value),
                "font-weight" => set.bold = lower.contains("bold") || lower == "700",
                "font-style" => set.italic = lower.contains("italic"),
                "text-decoration" => set.underline = lower.contains("underline"),
                "text-align" => {
                    set.align = if lower.contains("center") {
                        Some(Align::Center)
                    } else if lower.contains("right") {
                        Some(Align::Right)
                    } else if lower.contains("justify") {
                        Some(Align::Justify)
                    } else if lower.contains("left") {
                        Some(Align::Left)
                    } else {
                        None
                    }
                }
                _ => {}
            }
        }
        set
    }

    /// Canonical CSS for the recognised properties only.
    fn css(&self, block: bool) -> String {
        let mut parts = Vec::new();
        if let Some(c) = &self.color {
            parts.push(format!("color: {}", c.css()));
        }
        if let Some(c) = &self.background {
            parts.push(format!("background-color: {}", c.css()));
        }
        if self.bold {
            parts.push("font-weight: bold".to_string());
        }
        if self.italic {
            parts.push("font-style: italic".to_string());
        }
        if self.underline {
            parts.push("text-decoration: underline".to_string());
        }
        if block {
            if let Some(a) = self.align {
                let v = match a {
                    Align::Left => "left",
                    Align::Center => "center",
                    Align::Right => "right",
                    Align::Justify => "justify",
                };
                parts.push(format!("text-align: {v}"));
            }
        }
        parts.join("; ")
    }
}

// ── LaTeX escaping ───────────────────────────────────────────────────────

/// Escape LaTeX special characters in plain text.
pub fn latex_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str(r"\textbackslash{}"),
            '&' => out.push_str(r"\&"),
            '%' => out.push_str(r"\%"),
            '$' => out.push_str(r"\$"),
            '#' => out.push_str(r"\#"),
            '_' => out.push_str(r"\_"),
            '{' => out.push_str(r"\{"),
            '}' => out.push_str(r"\}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            c => out.push(c),
        }
    }
    out
}

// ── Tag tree ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Element {
    name: String,
    open: Range<usize>,
    close: Option<Range<usize>>,
    style: Option<StyleSet>,
    parent: Option<usize>,
}

impl Element {
    fn outer(&self) -> Range<usize> {
        self.open.start..self.close.as_ref().map_or(self.open.end, |c| c.end)
    }

    fn is_block(&self) -> bool {
        self.name != "span"
    }
}

/// Match open/close tags with a stack. Unclosed elements keep `close: None`.
fn build_tree(text: &str) -> Vec<Element> {
    let mut elements: Vec<Element> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();

    for caps in TAG.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();

        if !closing {
            let style = STYLE_ATTR
                .captures(&caps[3])
                .and_then(|s| s.get(1).or_else(|| s.get(2)))
                .map(|m| StyleSet::parse(m.as_str()));
            elements.push(Element {
                name,
                open: whole.range(),
                close: None,
                style,
                parent: stack.last().copied(),
            });
            stack.push(elements.len() - 1);
            continue;
        }

        if let Some(pos) = stack.iter().rposition(|&i| elements[i].name == name) {
            let idx = stack[pos];
            elements[idx].close = Some(whole.range());
            stack.truncate(pos);
        }
    }
    elements
}

// ── Translator ───────────────────────────────────────────────────────────

/// Rewrite styled HTML in `text` for `target`. Text outside recognised
/// elements is returned unchanged.
pub fn translate(text: &str, target: InlineStyleTarget) -> String {
    if target == InlineStyleTarget::Disabled || !TAG.is_match(text) {
        return text.to_string();
    }

    let protected = protected_ranges(text);
    let elements = build_tree(text);
    let translator = Translator::new(text, target, &elements);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (idx, el) in elements.iter().enumerate() {
        if el.outer().start < cursor || !translator.is_root(idx) {
            continue;
        }
        if overlaps(&protected, &el.outer()) || translator.too_deep(idx) {
            continue;
        }
        out.push_str(&text[cursor..el.outer().start]);
        out.push_str(&translator.render(idx));
        cursor = el.outer().end;
    }
    out.push_str(&text[cursor..]);
    out
}

struct Translator<'a> {
    text: &'a str,
    target: InlineStyleTarget,
    elements: &'a [Element],
    /// Nearest closed, styled ancestor of each element.
    owner: Vec<Option<usize>>,
    /// Closed elements grouped by `owner`, in document order.
    owned: Vec<Vec<usize>>,
    /// Styled elements that have a styled grandchild.
    deep: Vec<bool>,
}

impl<'a> Translator<'a> {
    fn new(text: &'a str, target: InlineStyleTarget, elements: &'a [Element]) -> Self {
        let n = elements.len();
        let styled = |i: usize| elements[i].close.is_some() && elements[i].style.is_some();

        // Parents always precede their children, so one forward pass suffices.
        let mut owner: Vec<Option<usize>> = Vec::with_capacity(n);
        for el in elements {
            let o = el.parent.and_then(|p| if styled(p) { Some(p) } else { owner[p] });
            owner.push(o);
        }

        let mut owned = vec![Vec::new(); n];
        let mut deep = vec![false; n];
        for (i, el) in elements.iter().enumerate() {
            let Some(o) = owner[i] else { continue };
            if el.close.is_some() {
                owned[o].push(i);
            }
            if styled(i) {
                if let Some(g) = owner[o] {
                    deep[g] = true;
                }
            }
        }

        Self {
            text,
            target,
            elements,
            owner,
            owned,
            deep,
        }
    }

    fn styled(&self, idx: usize) -> bool {
        self.elements[idx].close.is_some() && self.elements[idx].style.is_some()
    }

    fn is_root(&self, idx: usize) -> bool {
        self.styled(idx) && self.owner[idx].is_none()
    }

    /// Whether a styled grandchild exists below `root`.
    fn too_deep(&self, root: usize) -> bool {
        self.deep[root]
    }

    fn render(&self, idx: usize) -> String {
        let el = &self.elements[idx];
        let Some(close) = &el.close else {
            return self.text[el.outer()].to_string();
        };
        let inner = el.open.end..close.start;

        // Edits inside the element: styled children are rendered, the tags of
        // unstyled ones are dropped.
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        for &child in &self.owned[idx] {
            let c = &self.elements[child];
            if c.style.is_some() {
                edits.push((c.outer(), self.render(child)));
            } else if let Some(cc) = &c.close {
                edits.push((c.open.clone(), String::new()));
                edits.push((cc.clone(), String::new()));
            }
        }
        edits.sort_by_key(|(r, _)| r.start);

        let mut content = String::new();
        let mut cursor = inner.start;
        for (range, replacement) in edits {
            if range.start < cursor {
                continue;
            }
            content.push_str(&self.plain(&self.text[cursor..range.start]));
            content.push_str(&replacement);
            cursor = range.end;
        }
        content.push_str(&self.plain(&self.text[cursor..inner.end]));

        let style = el.style.clone().unwrap_or_default();
        if el.is_block() {
            self.wrap_block(&style, content)
        } else {
            self.wrap_inline(&style, content)
        }
    }

    /// Text between tags: entities decoded, `<br>` translated, and LaTeX
    /// specials escaped unless the text already looks like LaTeX.
    fn plain(&self, raw: &str) -> String {
        let decoded = html_escape::decode_html_entities(raw);
        match self.target {
            InlineStyleTarget::Latex => {
                let already_latex = decoded.contains(['\\', '{', '}']);
                BR.split(&decoded)
                    .map(|piece| {
                        if already_latex {
                            piece.to_string()
                        } else {
                            latex_escape(piece)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(r"\\")
            }
            InlineStyleTarget::Attributes => BR.replace_all(raw, "\\\n").into_owned(),
            InlineStyleTarget::Disabled => raw.to_string(),
        }
    }

    fn wrap_inline(&self, style: &StyleSet, content: String) -> String {
        match self.target {
            InlineStyleTarget::Latex => latex_inline(style, content),
            InlineStyleTarget::Attributes => {
                let css = style.css(false);
                if css.is_empty() {
                    content
                } else {
                    format!("[{content}]{{style=\"{css}\"}}")
                }
            }
            InlineStyleTarget::Disabled => content,
        }
    }

    fn wrap_block(&self, style: &StyleSet, content: String) -> String {
        match self.target {
            InlineStyleTarget::Latex => {
                let content = latex_inline(style, content);
                let env = match style.align {
                    Some(Align::Center) => Some("center"),
                    Some(Align::Right) => Some("flushright"),
                    Some(Align::Left) | Some(Align::Justify) => Some("flushleft"),
                    None => None,
                };
                match env {
                    Some(env) => format!("\\begin{{{env}}}\n{}\n\\end{{{env}}}", content.trim()),
                    None => content,
                }
            }
            InlineStyleTarget::Attributes => {
                let css = style.css(true);
                if css.is_empty() {
                    content
                } else {
                    format!("::: {{style=\"{css}\"}}\n{}\n:::", content.trim())
                }
            }
            InlineStyleTarget::Disabled => content,
        }
    }
}

fn latex_inline(style: &StyleSet, mut content: String) -> String {
    if let Some(color) = &style.color {
        content = match color {
            Color::Hex(h) => format!("\\textcolor[HTML]{{{h}}}{{{content}}}"),
            Color::Named(n) => format!("\\textcolor{{{n}}}{{{content}}}"),
        };
    }
    if style.bold {
        content = format!("\\textbf{{{content}}}");
    }
    if style.italic {
        content = format!("\\textit{{{content}}}");
    }
    if style.underline {
        content = format!("\\underline{{{content}}}");
    }
    if let Some(bg) = &style.background {
        content = match bg {
            Color::Hex(h) => format!("\\colorbox[HTML]{{{h}}}{{{content}}}"),
            Color::Named(n) => format!("\\colorbox{{{n}}}{{{content}}}"),
        };
    }
    content
}
