//! Pipeline stages for Markdown-to-PDF assembly.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable; the
//! coordinator in [`crate::convert`] only sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ render ──┐
//! (walk)    (scan)      (diagrams)├──▶ inline ──▶ toc ──▶ postprocess
//!                  └──▶ fetch ────┘    (styles)   (anchors) (cleanup)
//!                       (images)
//! ```
//!
//! 1. [`input`]: resolve files and directories to an ordered document list
//! 2. [`extract`]: find fenced blocks, diagram blocks and remote image refs
//! 3. [`render`]: render unique diagrams through the cache, bounded
//!    concurrency; one of the two stages with real suspension points
//! 4. [`fetch`]: download unique remote images with retry/backoff; the
//!    only stage with network I/O
//! 5. [`inline`]: rewrite styled `<span>`/`<div>`/`<p>` tags
//! 6. [`toc`]: heading anchors and table-of-contents entries
//! 7. [`postprocess`]: deterministic cleanup before and after the converter

pub mod extract;
pub mod fetch;
pub mod inline;
pub mod input;
pub mod postprocess;
pub mod render;
pub mod toc;
