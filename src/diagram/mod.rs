//! Diagram renderers.
//!
//! Each diagram language is one [`DiagramRenderer`]: it names the fence tags
//! it claims, describes its active options as a canonical string for the
//! fingerprint, and turns source text into a file. The coordinator only
//! talks to the trait, so a third language is one new implementation plus a
//! [`RendererRegistry::register`] call.
//!
//! ```text
//! mermaid fence   ──▶ MermaidRenderer  ──▶ mmdc      (stdin → file)
//! plantuml fence  ──▶ PlantUmlRenderer ──▶ plantuml  (stdin → stdout → file)
//! ```

pub mod mermaid;
pub mod plantuml;

pub use mermaid::MermaidRenderer;
pub use plantuml::PlantUmlRenderer;

use crate::cache::Fingerprint;
use crate::config::{DiagramFormat, PipelineConfig};
use crate::error::RenderError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Renders one diagram language to an image file.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    /// Short lowercase name, e.g. `"mermaid"`. Used in logs, errors and
    /// the fingerprint.
    fn name(&self) -> &str;

    /// Human-readable name used in alt text and placeholders.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Info-string tags of fenced blocks this renderer claims.
    fn fence_tags(&self) -> &[&str];

    fn output_format(&self) -> DiagramFormat;

    /// Canonical description of every option that affects the output.
    /// Two renderers with equal keys must produce identical files.
    fn options_key(&self) -> String;

    /// Program that must be on the PATH, if any.
    fn required_tool(&self) -> Option<&str> {
        None
    }

    /// Shown when [`Self::required_tool`] is missing.
    fn install_hint(&self) -> &str {
        ""
    }

    /// Render `source` into a file at `output`.
    async fn render(&self, source: &str, output: &Path) -> Result<(), RenderError>;
}

/// Fingerprint for one diagram under one renderer's active options.
pub fn fingerprint(renderer: &dyn DiagramRenderer, source: &str) -> Fingerprint {
    Fingerprint::from_parts(&[
        "diagram",
        renderer.name(),
        renderer.output_format().extension(),
        &renderer.options_key(),
        source,
    ])
}

/// The set of enabled renderers, looked up by fence tag.
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: Vec<Arc<dyn DiagramRenderer>>,
}

impl std::fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.renderers.iter().map(|r| r.name().to_string()))
            .finish()
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in renderers enabled in `config`.
    ///
    /// A disabled language has no renderer, so its blocks are never
    /// extracted and pass through as ordinary fenced code.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut registry = Self::new();
        if config.mermaid.enabled {
            registry.register(Arc::new(MermaidRenderer::new(config.mermaid.clone())));
        }
        if config.plantuml.enabled {
            registry.register(Arc::new(PlantUmlRenderer::new(config.plantuml.clone())));
        }
        registry
    }

    /// Add a renderer. A later renderer claiming the same tag shadows the
    /// earlier one.
    pub fn register(&mut self, renderer: Arc<dyn DiagramRenderer>) -> &mut Self {
        self.renderers.push(renderer);
        self
    }

    pub fn for_tag(&self, tag: &str) -> Option<&Arc<dyn DiagramRenderer>> {
        self.renderers
            .iter()
            .rev()
            .find(|r| r.fence_tags().iter().any(|t| t.eq_ignore_ascii_case(tag)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DiagramRenderer>> {
        self.renderers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

// ── Subprocess helper ────────────────────────────────────────────────────

/// Split a configured command such as `"npx -y mmdc"` into program + args.
pub(crate) fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Run `argv`, feeding `stdin` and collecting stdout.
///
/// stdin is written concurrently with reading the output so a tool that
/// streams its result before consuming all input cannot deadlock.
pub(crate) async fn run_tool(argv: &[String], stdin: &[u8]) -> Result<Vec<u8>, RenderError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(RenderError::ToolNotFound {
            program: String::new(),
        });
    };
    debug!("Running: {}", argv.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RenderError::ToolNotFound {
                program: program.clone(),
            },
            _ => RenderError::Io(e),
        })?;

    let pipe = child.stdin.take();
    let input = stdin.to_vec();
    let writer = async move {
        if let Some(mut pipe) = pipe {
            match pipe.write_all(&input).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }
        Ok(())
    };

    let (written, output) = tokio::join!(writer, child.wait_with_output());
    let output = output?;
    written?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let details = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            "no diagnostic output".to_string()
        };
        return Err(RenderError::NonZeroExit {
            command: argv.join(" "),
            status: output.status.to_string(),
            details,
        });
    }
    Ok(output.stdout)
}

/// Fail with [`RenderError::EmptyOutput`] unless `path` is a non-empty file.
pub(crate) async fn ensure_output(path: &Path) -> Result<(), RenderError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(RenderError::EmptyOutput {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MermaidConfig, PlantUmlConfig};

    #[test]
    fn registry_from_default_config_claims_both_languages() {
        let registry = RendererRegistry::from_config(&PipelineConfig::default());
        assert_eq!(registry.for_tag("mermaid").unwrap().name(), "mermaid");
        assert_eq!(registry.for_tag("plantuml").unwrap().name(), "plantuml");
        assert_eq!(registry.for_tag("puml").unwrap().name(), "plantuml");
        assert!(registry.for_tag("rust").is_none());
    }

    #[test]
    fn disabled_language_is_not_registered() {
        let config = PipelineConfig::builder().disable_mermaid().build().unwrap();
        let registry = RendererRegistry::from_config(&config);
        assert!(registry.for_tag("mermaid").is_none());
        assert!(registry.for_tag("plantuml").is_some());
    }

    #[test]
    fn fingerprint_tracks_options() {
        let plain = MermaidRenderer::new(MermaidConfig::default());
        let themed = MermaidRenderer::new(MermaidConfig {
            theme: Some("dark".into()),
            ..Default::default()
        });
        let scaled = MermaidRenderer::new(MermaidConfig {
            scale: Some(2.0),
            ..Default::default()
        });
        let svg = MermaidRenderer::new(MermaidConfig {
            output_format: DiagramFormat::Svg,
            ..Default::default()
        });
        let src = "graph TD; A-->B";

        let base = fingerprint(&plain, src);
        assert_eq!(base, fingerprint(&MermaidRenderer::new(MermaidConfig::default()), src));
        assert_ne!(base, fingerprint(&themed, src));
        assert_ne!(base, fingerprint(&scaled, src));
        assert_ne!(base, fingerprint(&svg, src));
        assert_ne!(base, fingerprint(&plain, "graph TD; A-->C"));
    }

    #[test]
    fn same_source_differs_across_languages() {
        let m = MermaidRenderer::new(MermaidConfig::default());
        let p = PlantUmlRenderer::new(PlantUmlConfig::default());
        assert_ne!(fingerprint(&m, "x"), fingerprint(&p, "x"));
    }

    #[test]
    fn split_command_handles_wrappers() {
        assert_eq!(split_command("npx -y  mmdc"), vec!["npx", "-y", "mmdc"]);
        assert!(split_command("   ").is_empty());
    }

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let argv = vec!["definitely-not-a-real-program-4711".to_string()];
        let err = run_tool(&argv, b"").await.unwrap_err();
        assert!(matches!(err, RenderError::ToolNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_tool_pipes_stdin_to_stdout() {
        let argv = vec!["cat".to_string()];
        let out = run_tool(&argv, b"@startuml\n@enduml\n").await.unwrap();
        assert_eq!(out, b"@startuml\n@enduml\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo boom >&2; exit 3".to_string(),
        ];
        match run_tool(&argv, b"").await.unwrap_err() {
            RenderError::NonZeroExit { details, .. } => assert_eq!(details, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
