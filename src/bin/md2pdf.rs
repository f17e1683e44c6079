//! CLI binary for markdown-pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use markdown_pdf::pipeline::input::{load_documents, resolve_source};
use markdown_pdf::{
    DiagramFormat, FailurePolicy, InlineStyleTarget, LatexConfig, MermaidConfig, PandocConfig,
    Pipeline, PipelineConfig, PipelineProgressCallback, PlantUmlConfig, ProgressCallback,
    RemoteImageConfig, Stage, TemplateConfig,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the current stage plus one
/// log line per diagram or image. Assets complete out of order, so lines are
/// printed as they arrive.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Assets finished in the current run.
    done: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Loading");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            done: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, documents: usize, assets: usize) {
        self.done.store(0, Ordering::SeqCst);
        self.bar.set_message(format!("{documents} document(s), {assets} asset reference(s)"));
    }

    fn on_stage(&self, stage: Stage) {
        self.bar.set_prefix(stage.label().to_string());
    }

    fn on_asset_start(&self, kind: &str, label: &str) {
        self.bar.set_message(format!("{kind}: {label}"));
    }

    fn on_asset_complete(&self, kind: &str, cached: bool) {
        let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let origin = match (cached, kind) {
            (true, _) => "cached",
            (false, "image") => "downloaded",
            _ => "rendered",
        };
        self.bar
            .println(format!("  {} {:>3}  {:<8}  {}", green("✓"), n, kind, dim(origin)));
    }

    fn on_asset_error(&self, kind: &str, error: &str) {
        let msg: String = if error.chars().count() > 100 {
            error.chars().take(99).chain(Some('\u{2026}')).collect()
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<8}  {}", red("✗"), kind, red(&msg)));
    }

    fn on_run_complete(&self, failures: usize) {
        self.bar.set_prefix("Done");
        self.bar.set_message(String::new());
        if failures > 0 {
            self.bar.println(format!(
                "{} {} asset(s) could not be materialised",
                yellow("⚠"),
                bold(&failures.to_string())
            ));
        }
    }
}

/// Print a status line without tearing the spinner.
fn report(progress: Option<&CliProgressCallback>, line: String) {
    match progress {
        Some(cb) => cb.bar.println(line),
        None => eprintln!("{line}"),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One file → dist/guide.pdf
  md2pdf convert guide.md

  # A directory of chapters merged into one PDF → out/handbook.pdf
  md2pdf convert docs/handbook -o out

  # Explicit output name, metadata file and override
  md2pdf convert report.md -f Q3-report.pdf --meta meta.yaml --meta-entry version=2.1

  # Persistent diagram cache, SVG mermaid, abort on the first failed diagram
  md2pdf convert docs --cache-dir .md2pdf-cache --mermaid-format svg --on-render-failure abort

  # Inspect the rewritten Markdown without running pandoc or LaTeX
  md2pdf convert guide.md --prepare-only

  # Start a metadata file
  md2pdf init-metadata meta.yaml

REQUIRED TOOLS:
  mmdc       Mermaid diagrams      npm install -g @mermaid-js/mermaid-cli
  plantuml   PlantUML diagrams     https://plantuml.com/starting
  pandoc     Markdown → LaTeX      https://pandoc.org/installing.html
  xelatex    LaTeX → PDF           TeX Live, MiKTeX or MacTeX

  Diagram tools are only required when the documents contain such blocks.
"#;

/// Convert Markdown documents (with Mermaid/PlantUML diagrams and remote
/// images) to PDF via Pandoc and LaTeX.
#[derive(Parser, Debug)]
#[command(
    name = "md2pdf",
    version,
    about = "Convert Markdown documents to PDF via Pandoc and LaTeX",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MD2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MD2PDF_QUIET")]
    quiet: bool,

    /// Disable progress output.
    #[arg(long, global = true, env = "MD2PDF_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert Markdown files or directories to PDF.
    Convert(ConvertArgs),

    /// Write a commented metadata template.
    InitMetadata {
        /// Destination file. Never overwritten.
        #[arg(default_value = "metadata.yaml")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Markdown files or directories. A directory becomes one PDF.
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output directory.
    #[arg(short, long, env = "MD2PDF_OUTPUT_DIR", default_value = "dist")]
    output_dir: PathBuf,

    /// PDF file name (relative to --output-dir unless absolute). Single source only.
    #[arg(short = 'f', long)]
    output_file: Option<PathBuf>,

    /// Stop after preparation and write `<name>.md` and `<name>.json`.
    #[arg(long)]
    prepare_only: bool,

    // ── Metadata ─────────────────────────────────────────────────────────
    /// Metadata file (YAML, or JSON by extension).
    #[arg(long = "meta", env = "MD2PDF_META")]
    metadata_file: Option<PathBuf>,

    /// Metadata override `key=value` (repeatable, wins over --meta).
    #[arg(long = "meta-entry", value_name = "KEY=VALUE")]
    meta_entries: Vec<String>,

    // ── Template ─────────────────────────────────────────────────────────
    /// Custom Tera LaTeX template.
    #[arg(long)]
    template: Option<PathBuf>,

    /// LaTeX file injected into the preamble.
    #[arg(long)]
    preamble: Option<PathBuf>,

    /// Inline LaTeX appended to the preamble.
    #[arg(long)]
    preamble_inline: Option<String>,

    /// Omit the cover page.
    #[arg(long)]
    no_cover: bool,

    /// Omit the table of contents and heading anchors.
    #[arg(long)]
    no_toc: bool,

    /// Deepest heading level in the table of contents.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=6))]
    toc_depth: u8,

    /// How styled HTML spans are rewritten.
    #[arg(long, value_enum, default_value = "latex")]
    inline_styles: InlineStylesArg,

    // ── Diagrams ─────────────────────────────────────────────────────────
    /// Concurrent diagram renders (default: CPU count).
    #[arg(long, env = "MD2PDF_RENDER_CONCURRENCY")]
    render_concurrency: Option<usize>,

    /// What to do when a diagram fails to render.
    #[arg(long, value_enum, default_value = "placeholder")]
    on_render_failure: FailureArg,

    #[arg(long)]
    disable_mermaid: bool,

    /// mermaid-cli command.
    #[arg(long, env = "MD2PDF_MERMAID_CLI")]
    mermaid_cli: Option<String>,

    /// png, svg or pdf.
    #[arg(long, default_value = "png")]
    mermaid_format: DiagramFormat,

    #[arg(long)]
    mermaid_theme: Option<String>,

    #[arg(long)]
    mermaid_background: Option<String>,

    #[arg(long)]
    mermaid_scale: Option<f32>,

    /// Mermaid JSON configuration file.
    #[arg(long)]
    mermaid_config: Option<PathBuf>,

    /// Extra argument for mermaid-cli (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    mermaid_arg: Vec<String>,

    /// Extra Chromium argument passed through puppeteer (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    mermaid_puppeteer_arg: Vec<String>,

    #[arg(long)]
    disable_plantuml: bool,

    /// plantuml command.
    #[arg(long, env = "MD2PDF_PLANTUML_CLI")]
    plantuml_cli: Option<String>,

    /// png, svg, eps or pdf.
    #[arg(long, default_value = "png")]
    plantuml_format: DiagramFormat,

    #[arg(long, default_value = "UTF-8")]
    plantuml_charset: String,

    /// Extra argument for plantuml (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    plantuml_arg: Vec<String>,

    // ── Remote images ────────────────────────────────────────────────────
    #[arg(long)]
    disable_remote_images: bool,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    remote_image_timeout: u64,

    /// Retries on timeouts and 5xx responses.
    #[arg(long, default_value_t = 2)]
    remote_image_retries: u32,

    /// Largest accepted image in bytes.
    #[arg(long, default_value_t = 20 * 1024 * 1024)]
    remote_image_max_bytes: u64,

    #[arg(long, default_value_t = 4)]
    remote_image_concurrency: usize,

    #[arg(long)]
    remote_image_user_agent: Option<String>,

    /// Abort on the first image that cannot be fetched.
    #[arg(long)]
    remote_image_fail_hard: bool,

    // ── Cache ────────────────────────────────────────────────────────────
    /// Persistent asset cache shared between runs.
    #[arg(long, env = "MD2PDF_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Reuse cached files without re-checking them.
    #[arg(long)]
    no_cache_validation: bool,

    /// Keep the LaTeX work directory.
    #[arg(long)]
    keep_temp: bool,

    // ── Converter and compiler ───────────────────────────────────────────
    /// pandoc command.
    #[arg(long, env = "MD2PDF_PANDOC")]
    pandoc: Option<String>,

    /// Extra Pandoc argument (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    pandoc_arg: Vec<String>,

    /// LaTeX engine command (xelatex, lualatex, …).
    #[arg(long, env = "MD2PDF_LATEX_ENGINE")]
    latex_engine: Option<String>,

    #[arg(long, default_value_t = 2)]
    latex_runs: u32,

    /// Extra LaTeX engine argument (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    latex_arg: Vec<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FailureArg {
    Placeholder,
    Abort,
}

impl From<FailureArg> for FailurePolicy {
    fn from(v: FailureArg) -> Self {
        match v {
            FailureArg::Placeholder => FailurePolicy::Placeholder,
            FailureArg::Abort => FailurePolicy::Abort,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum InlineStylesArg {
    Latex,
    Attributes,
    Disabled,
}

impl From<InlineStylesArg> for InlineStyleTarget {
    fn from(v: InlineStylesArg) -> Self {
        match v {
            InlineStylesArg::Latex => InlineStyleTarget::Latex,
            InlineStylesArg::Attributes => InlineStyleTarget::Attributes,
            InlineStylesArg::Disabled => InlineStyleTarget::Disabled,
        }
    }
}

const METADATA_TEMPLATE: &str = r#"# Document metadata for md2pdf.
#
#   md2pdf convert docs/ --meta metadata.yaml
#
# Precedence, lowest first: this file, --meta-entry key=value, then the
# front matter of each document (later documents win).
# Unknown keys are available to templates as `metadata.extra.<key>`.

title: "Untitled document"
# author: "Jane Doe"
# company: "Example Corp"
# contact: "docs@example.com"
# address: "1 Main Street, Springfield"
# logo_path: "assets/logo.png"   # relative to this file
# date: "2024-01-31"
# version: "1.0"

# extra:
#   department: "Engineering"
#   classification: "Internal"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress spinner is active;
    // the spinner and per-asset lines give the feedback that matters.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::InitMetadata { ref path } => init_metadata(path, cli.quiet),
        Command::Convert(ref args) => {
            let progress = (show_progress && !cli.verbose).then(CliProgressCallback::new);
            let result = run_convert(args, progress.as_ref(), cli.quiet).await;
            if let Some(cb) = progress {
                cb.bar.finish_and_clear();
            }
            result
        }
    }
}

fn init_metadata(path: &Path, quiet: bool) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists; refusing to overwrite it", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, METADATA_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if !quiet {
        eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
    }
    Ok(())
}

async fn run_convert(
    args: &ConvertArgs,
    progress: Option<&Arc<CliProgressCallback>>,
    quiet: bool,
) -> Result<()> {
    if args.output_file.is_some() && args.sources.len() != 1 {
        anyhow::bail!("--output-file requires exactly one source");
    }
    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let callback: Option<ProgressCallback> =
        progress.map(|cb| Arc::clone(cb) as Arc<dyn PipelineProgressCallback>);
    let config = build_config(args, callback)?;
    let pipeline = Pipeline::new(config).context("Failed to set up the pipeline")?;

    let mut failed = 0usize;
    for source in &args.sources {
        let result = if args.prepare_only {
            prepare_source(&pipeline, source, &args.output_dir).await
        } else {
            let output = output_path(args, source)?;
            pipeline
                .build(std::slice::from_ref(source), &output)
                .await
                .map(|built| (built.pdf_path, built.prepared.failures.len()))
                .map_err(anyhow::Error::from)
        };

        match result {
            Ok((path, warnings)) => {
                if !quiet {
                    let note = if warnings > 0 {
                        yellow(&format!("  ({warnings} warning(s))"))
                    } else {
                        String::new()
                    };
                    report(
                        progress.map(Arc::as_ref),
                        format!(
                            "{} {} → {}{}",
                            green("✔"),
                            source.display(),
                            bold(&path.display().to_string()),
                            note
                        ),
                    );
                }
            }
            Err(e) => {
                failed += 1;
                report(
                    progress.map(Arc::as_ref),
                    format!("{} {}: {:#}", red("✘"), source.display(), e),
                );
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} source(s) failed", args.sources.len());
    }
    Ok(())
}

/// `--output-file` if given, else `<output-dir>/<stem>.pdf`.
fn output_path(args: &ConvertArgs, source: &Path) -> Result<PathBuf> {
    if let Some(file) = &args.output_file {
        return Ok(if file.is_absolute() {
            file.clone()
        } else {
            args.output_dir.join(file)
        });
    }
    let set = resolve_source(source).with_context(|| format!("Cannot read {}", source.display()))?;
    Ok(args.output_dir.join(format!("{}.pdf", set.output_stem)))
}

/// Prepare one source and write its rewritten Markdown and JSON context.
async fn prepare_source(
    pipeline: &Pipeline,
    source: &Path,
    output_dir: &Path,
) -> Result<(PathBuf, usize)> {
    let set = resolve_source(source).with_context(|| format!("Cannot read {}", source.display()))?;
    let documents = load_documents(&set.files).await?;
    let prepared = pipeline.prepare(&documents).await?;

    let markdown_path = output_dir.join(format!("{}.md", set.output_stem));
    let json_path = output_dir.join(format!("{}.json", set.output_stem));
    tokio::fs::write(&markdown_path, &prepared.body)
        .await
        .with_context(|| format!("Failed to write {}", markdown_path.display()))?;
    let json = serde_json::to_string_pretty(&prepared).context("Failed to serialise output")?;
    tokio::fs::write(&json_path, json)
        .await
        .with_context(|| format!("Failed to write {}", json_path.display()))?;

    Ok((markdown_path, prepared.failures.len()))
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &ConvertArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let default_mermaid = MermaidConfig::default();
    let mermaid = MermaidConfig {
        enabled: !args.disable_mermaid,
        command: args.mermaid_cli.clone().unwrap_or(default_mermaid.command),
        output_format: args.mermaid_format,
        theme: args.mermaid_theme.clone(),
        background: args.mermaid_background.clone(),
        scale: args.mermaid_scale,
        config_file: args.mermaid_config.clone(),
        puppeteer_args: default_mermaid
            .puppeteer_args
            .into_iter()
            .chain(args.mermaid_puppeteer_arg.iter().cloned())
            .collect(),
        extra_args: args.mermaid_arg.clone(),
    };

    let default_plantuml = PlantUmlConfig::default();
    let plantuml = PlantUmlConfig {
        enabled: !args.disable_plantuml,
        command: args.plantuml_cli.clone().unwrap_or(default_plantuml.command),
        output_format: args.plantuml_format,
        charset: Some(args.plantuml_charset.clone()).filter(|c| !c.is_empty()),
        extra_args: args.plantuml_arg.clone(),
    };

    let default_remote = RemoteImageConfig::default();
    let remote = RemoteImageConfig {
        enabled: !args.disable_remote_images,
        timeout_secs: args.remote_image_timeout,
        max_retries: args.remote_image_retries,
        max_bytes: args.remote_image_max_bytes,
        concurrency: args.remote_image_concurrency,
        user_agent: args
            .remote_image_user_agent
            .clone()
            .unwrap_or(default_remote.user_agent),
        fail_hard: args.remote_image_fail_hard,
        ..default_remote
    };

    let default_pandoc = PandocConfig::default();
    let converter = PandocConfig {
        command: args.pandoc.clone().unwrap_or(default_pandoc.command),
        extra_args: default_pandoc
            .extra_args
            .into_iter()
            .chain(args.pandoc_arg.iter().cloned())
            .collect(),
        ..PandocConfig::default()
    };

    let compiler = LatexConfig {
        command: args
            .latex_engine
            .clone()
            .unwrap_or_else(|| LatexConfig::default().command),
        runs: args.latex_runs,
        extra_args: args.latex_arg.clone(),
    };

    let mut builder = PipelineConfig::builder()
        .mermaid(mermaid)
        .plantuml(plantuml)
        .remote_images(remote)
        .render_failure(args.on_render_failure.into())
        .inline_styles(args.inline_styles.into())
        .toc(!args.no_toc)
        .toc_depth(args.toc_depth)
        .include_cover(!args.no_cover)
        .template(TemplateConfig {
            template_path: args.template.clone(),
            preamble_path: args.preamble.clone(),
            extra_preamble: args.preamble_inline.clone(),
        })
        .converter(converter)
        .compiler(compiler)
        .validate_cache(!args.no_cache_validation)
        .keep_work_dir(args.keep_temp);

    if let Some(n) = args.render_concurrency {
        builder = builder.render_concurrency(n);
    }
    if let Some(file) = &args.metadata_file {
        builder = builder.metadata_file(file);
    }
    for entry in &args.meta_entries {
        builder = builder.metadata_override(entry);
    }
    // Prepared Markdown points at asset files, so they must outlive the run.
    match (&args.cache_dir, args.prepare_only) {
        (Some(dir), _) => builder = builder.cache_dir(dir),
        (None, true) => builder = builder.cache_dir(args.output_dir.join("assets")),
        (None, false) => {}
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
