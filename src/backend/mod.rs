//! External collaborators that turn the prepared Markdown into a PDF.
//!
//! ```text
//! PreparedDocument.body ──▶ PandocConverter ──▶ LaTeX body
//!                                                  │
//!                        TemplateRenderer ◀────────┘  (+ metadata, ToC, flags)
//!                              │
//!                              ▼
//!                        LatexCompiler ──▶ document.pdf
//! ```
//!
//! Each stage is a thin wrapper; replacing one means replacing one type.

pub mod latex;
pub mod pandoc;
pub mod template;

pub use latex::LatexCompiler;
pub use pandoc::PandocConverter;
pub use template::TemplateRenderer;

use crate::error::PipelineError;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Run `argv` to completion and capture its output.
///
/// A missing program becomes [`PipelineError::ToolUnavailable`] with `hint`.
pub(crate) async fn run_captured(
    argv: &[String],
    cwd: Option<&Path>,
    envs: &[(&str, String)],
    hint: &str,
) -> Result<Output, PipelineError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(PipelineError::Config(crate::error::ConfigError::Invalid(
            "empty command line".into(),
        )));
    };
    debug!("Running: {}", argv.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }

    cmd.output().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::ToolUnavailable {
            tool: program.clone(),
            hint: hint.to_string(),
        },
        _ => PipelineError::Io(e),
    })
}

/// Joined stdout and stderr, trimmed, for diagnostics.
pub(crate) fn diagnostics(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
