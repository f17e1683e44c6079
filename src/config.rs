//! Configuration types for the document assembly pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Every knob lives in one struct so a run can
//! be logged, cloned into worker tasks, and compared against another run.
//!
//! The per-tool sections ([`MermaidConfig`], [`PlantUmlConfig`],
//! [`RemoteImageConfig`], [`PandocConfig`], [`LatexConfig`]) are plain serde
//! structs with `Default` impls matching the documented defaults.

use crate::error::{ConfigError, PipelineError};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use markdown_pdf::{FailurePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .render_concurrency(4)
///     .render_failure(FailurePolicy::Abort)
///     .toc_depth(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.toc.max_depth, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Mermaid rendering options. Default: enabled, `mmdc`, PNG.
    pub mermaid: MermaidConfig,

    /// PlantUML rendering options. Default: enabled, `plantuml`, PNG.
    pub plantuml: PlantUmlConfig,

    /// Number of diagram subprocesses allowed to run at once.
    /// Default: number of available CPUs.
    pub render_concurrency: usize,

    /// What happens when a diagram fails to render. Default: [`FailurePolicy::Placeholder`].
    ///
    /// A failed diagram is never dropped silently: it either aborts the run
    /// or stays in the output as its original fenced block followed by a
    /// visible notice.
    pub render_failure: FailurePolicy,

    /// Remote image download options.
    pub remote_images: RemoteImageConfig,

    /// How styled `<span>`/`<div>`/`<p>` tags are rewritten. Default: LaTeX.
    pub inline_styles: InlineStyleTarget,

    /// Table-of-contents extraction.
    pub toc: TocConfig,

    /// Whether the template should render a cover page. Default: true.
    pub include_cover: bool,

    /// Structured metadata file (YAML, or JSON by extension).
    pub metadata_file: Option<PathBuf>,

    /// Raw `key=value` metadata overrides, applied above the metadata file.
    pub metadata_overrides: Vec<String>,

    /// Lowest-precedence metadata layer.
    pub metadata_defaults: Vec<(String, String)>,

    /// Template and preamble locations.
    pub template: TemplateConfig,

    /// Markdown → LaTeX converter.
    pub converter: PandocConfig,

    /// LaTeX → PDF compiler.
    pub compiler: LatexConfig,

    /// Persistent asset cache directory. `None` keeps assets for the run only.
    pub cache_dir: Option<PathBuf>,

    /// Re-check cached files before reuse; unreadable entries are rewritten
    /// under a fresh path instead of being reused. Default: true.
    pub validate_cache: bool,

    /// Keep the per-run work directory instead of deleting it. Default: false.
    pub keep_work_dir: bool,

    /// Optional observer for stage and asset events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mermaid: MermaidConfig::default(),
            plantuml: PlantUmlConfig::default(),
            render_concurrency: num_cpus::get().max(1),
            render_failure: FailurePolicy::default(),
            remote_images: RemoteImageConfig::default(),
            inline_styles: InlineStyleTarget::default(),
            toc: TocConfig::default(),
            include_cover: true,
            metadata_file: None,
            metadata_overrides: Vec::new(),
            metadata_defaults: Vec::new(),
            template: TemplateConfig::default(),
            converter: PandocConfig::default(),
            compiler: LatexConfig::default(),
            cache_dir: None,
            validate_cache: true,
            keep_work_dir: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mermaid", &self.mermaid)
            .field("plantuml", &self.plantuml)
            .field("render_concurrency", &self.render_concurrency)
            .field("render_failure", &self.render_failure)
            .field("remote_images", &self.remote_images)
            .field("inline_styles", &self.inline_styles)
            .field("toc", &self.toc)
            .field("include_cover", &self.include_cover)
            .field("metadata_file", &self.metadata_file)
            .field("metadata_overrides", &self.metadata_overrides)
            .field("template", &self.template)
            .field("converter", &self.converter)
            .field("compiler", &self.compiler)
            .field("cache_dir", &self.cache_dir)
            .field("validate_cache", &self.validate_cache)
            .field("keep_work_dir", &self.keep_work_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn mermaid(mut self, mermaid: MermaidConfig) -> Self {
        self.config.mermaid = mermaid;
        self
    }

    pub fn plantuml(mut self, plantuml: PlantUmlConfig) -> Self {
        self.config.plantuml = plantuml;
        self
    }

    pub fn disable_mermaid(mut self) -> Self {
        self.config.mermaid.enabled = false;
        self
    }

    pub fn disable_plantuml(mut self) -> Self {
        self.config.plantuml.enabled = false;
        self
    }

    pub fn render_concurrency(mut self, n: usize) -> Self {
        self.config.render_concurrency = n.max(1);
        self
    }

    pub fn render_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.render_failure = policy;
        self
    }

    pub fn remote_images(mut self, remote: RemoteImageConfig) -> Self {
        self.config.remote_images = remote;
        self
    }

    pub fn disable_remote_images(mut self) -> Self {
        self.config.remote_images.enabled = false;
        self
    }

    pub fn inline_styles(mut self, target: InlineStyleTarget) -> Self {
        self.config.inline_styles = target;
        self
    }

    pub fn toc(mut self, enabled: bool) -> Self {
        self.config.toc.enabled = enabled;
        self
    }

    pub fn toc_depth(mut self, depth: u8) -> Self {
        self.config.toc.max_depth = depth.clamp(1, 6);
        self
    }

    pub fn include_cover(mut self, v: bool) -> Self {
        self.config.include_cover = v;
        self
    }

    pub fn metadata_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_file = Some(path.into());
        self
    }

    pub fn metadata_override(mut self, entry: impl Into<String>) -> Self {
        self.config.metadata_overrides.push(entry.into());
        self
    }

    pub fn metadata_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .metadata_defaults
            .push((key.into(), value.into()));
        self
    }

    pub fn template(mut self, template: TemplateConfig) -> Self {
        self.config.template = template;
        self
    }

    pub fn converter(mut self, converter: PandocConfig) -> Self {
        self.config.converter = converter;
        self
    }

    pub fn compiler(mut self, compiler: LatexConfig) -> Self {
        self.config.compiler = compiler;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn validate_cache(mut self, v: bool) -> Self {
        self.config.validate_cache = v;
        self
    }

    pub fn keep_work_dir(mut self, v: bool) -> Self {
        self.config.keep_work_dir = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.render_concurrency == 0 {
            return Err(ConfigError::Invalid("render concurrency must be ≥ 1".into()).into());
        }
        if c.remote_images.concurrency == 0 {
            return Err(ConfigError::Invalid("fetch concurrency must be ≥ 1".into()).into());
        }
        if c.remote_images.max_bytes == 0 {
            return Err(ConfigError::Invalid("remote image size limit must be > 0".into()).into());
        }
        if c.compiler.runs == 0 {
            return Err(ConfigError::Invalid("LaTeX runs must be ≥ 1".into()).into());
        }
        if c.mermaid.enabled && c.mermaid.command.trim().is_empty() {
            return Err(ConfigError::Invalid("mermaid command is empty".into()).into());
        }
        if c.mermaid.enabled && c.mermaid.output_format == DiagramFormat::Eps {
            return Err(ConfigError::Invalid(
                "mermaid cannot produce eps output (use png, svg or pdf)".into(),
            )
            .into());
        }
        if c.plantuml.enabled && c.plantuml.command.trim().is_empty() {
            return Err(ConfigError::Invalid("plantuml command is empty".into()).into());
        }
        if let Some(scale) = c.mermaid.scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(
                    ConfigError::Invalid(format!("mermaid scale must be > 0, got {scale}")).into(),
                );
            }
        }
        Ok(self.config)
    }
}

// ── Tool sections ────────────────────────────────────────────────────────

/// Options passed to mermaid-cli (`mmdc`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MermaidConfig {
    pub enabled: bool,
    /// Program plus leading arguments, e.g. `"mmdc"` or `"npx -y mmdc"`.
    pub command: String,
    pub output_format: DiagramFormat,
    pub theme: Option<String>,
    pub background: Option<String>,
    pub scale: Option<f32>,
    pub config_file: Option<PathBuf>,
    /// Chromium arguments written to a generated puppeteer config file.
    pub puppeteer_args: Vec<String>,
    pub extra_args: Vec<String>,
}

impl Default for MermaidConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "mmdc".into(),
            output_format: DiagramFormat::Png,
            theme: None,
            background: None,
            scale: None,
            config_file: None,
            puppeteer_args: vec!["--no-sandbox".into(), "--disable-setuid-sandbox".into()],
            extra_args: Vec::new(),
        }
    }
}

/// Options passed to the PlantUML CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantUmlConfig {
    pub enabled: bool,
    pub command: String,
    pub output_format: DiagramFormat,
    pub charset: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for PlantUmlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "plantuml".into(),
            output_format: DiagramFormat::Png,
            charset: Some("UTF-8".into()),
            extra_args: Vec::new(),
        }
    }
}

/// Remote image download behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteImageConfig {
    pub enabled: bool,

    /// Per-request timeout in seconds. Default: 10.
    pub timeout_secs: u64,

    /// Retries after the first attempt on transient failures. Default: 2.
    pub max_retries: u32,

    /// Initial backoff in milliseconds, doubled after each retry. Default: 250.
    pub retry_backoff_ms: u64,

    /// Largest accepted body. The download is aborted once exceeded. Default: 20 MiB.
    pub max_bytes: u64,

    /// Concurrent downloads. Default: 4.
    pub concurrency: usize,

    pub user_agent: String,

    /// Abort the run on the first failed fetch instead of keeping the URL.
    pub fail_hard: bool,
}

impl Default for RemoteImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
            max_retries: 2,
            retry_backoff_ms: 250,
            max_bytes: 20 * 1024 * 1024,
            concurrency: 4,
            user_agent: concat!("markdown-pdf/", env!("CARGO_PKG_VERSION")).to_string(),
            fail_hard: false,
        }
    }
}

/// Table-of-contents extraction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TocConfig {
    pub enabled: bool,
    /// Deepest heading level included (1–6). Default: 3.
    pub max_depth: u8,
    /// Append `{#anchor}` to headings in the rewritten body. Default: true.
    pub inject_anchors: bool,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 3,
            inject_anchors: true,
        }
    }
}

/// Template and preamble locations, consumed opaquely by the template stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Custom Tera template. `None` uses the built-in LaTeX template.
    pub template_path: Option<PathBuf>,
    pub preamble_path: Option<PathBuf>,
    pub extra_preamble: Option<String>,
}

/// Pandoc invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PandocConfig {
    pub command: String,
    pub from_format: String,
    pub to_format: String,
    pub extra_args: Vec<String>,
}

impl Default for PandocConfig {
    fn default() -> Self {
        Self {
            command: "pandoc".into(),
            from_format: "markdown".into(),
            to_format: "latex".into(),
            extra_args: vec!["--listings".into(), "-V".into(), "float-placement=H".into()],
        }
    }
}

/// LaTeX engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatexConfig {
    pub command: String,
    /// Number of passes; two are needed for the table of contents. Default: 2.
    pub runs: u32,
    pub extra_args: Vec<String>,
}

impl Default for LatexConfig {
    fn default() -> Self {
        Self {
            command: "xelatex".into(),
            runs: 2,
            extra_args: Vec::new(),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// File format requested from a diagram renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramFormat {
    #[default]
    Png,
    Svg,
    Pdf,
    Eps,
}

impl DiagramFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DiagramFormat::Png => "png",
            DiagramFormat::Svg => "svg",
            DiagramFormat::Pdf => "pdf",
            DiagramFormat::Eps => "eps",
        }
    }

    /// Whether assets in this format are vector content.
    pub fn is_vector(self) -> bool {
        !matches!(self, DiagramFormat::Png)
    }
}

impl fmt::Display for DiagramFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for DiagramFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(DiagramFormat::Png),
            "svg" => Ok(DiagramFormat::Svg),
            "pdf" => Ok(DiagramFormat::Pdf),
            "eps" => Ok(DiagramFormat::Eps),
            other => Err(ConfigError::Invalid(format!(
                "unsupported diagram format '{other}' (expected png, svg, pdf or eps)"
            ))),
        }
    }
}

/// Reaction to a per-block render failure.
///
/// | Policy | Effect |
/// |--------|--------|
/// | `Placeholder` | keep the fenced block, add a visible notice, continue (default) |
/// | `Abort` | stop scheduling, surface the first failure as a fatal error |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Placeholder,
    Abort,
}

/// Output flavour for translated inline style spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InlineStyleTarget {
    /// Raw LaTeX commands (`\textcolor`, `\colorbox`, `center` environments).
    #[default]
    Latex,
    /// Pandoc bracketed spans and fenced divs carrying the style as attributes.
    Attributes,
    /// Leave styled HTML untouched.
    Disabled,
}
