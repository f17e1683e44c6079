//! End-to-end tests for markdown-pdf.
//!
//! These tests drive the real external tools (`mmdc`, `plantuml`, `pandoc`,
//! `xelatex`) and write PDFs to `test_cases/output/`. They are gated behind
//! the `E2E_ENABLED` environment variable so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_mermaid -- --nocapture

use markdown_pdf::{
    convert, convert_many, DiagramFormat, MermaidConfig, PipelineConfig, PipelineError,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test unless E2E_ENABLED is set *and* every listed tool is on the PATH.
macro_rules! e2e_skip_unless_ready {
    ($($tool:expr),* $(,)?) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        $(
            if which::which($tool).is_err() {
                println!("SKIP — '{}' not found on PATH", $tool);
                return;
            }
        )*
    }};
}

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// Assert the output is a non-trivial PDF.
fn assert_pdf(path: &Path, context: &str) {
    let bytes = std::fs::read(path)
        .unwrap_or_else(|e| panic!("[{context}] cannot read {}: {e}", path.display()));
    assert!(bytes.starts_with(b"%PDF"), "[{context}] not a PDF");
    assert!(
        bytes.len() > 1_000,
        "[{context}] PDF suspiciously small: {} bytes",
        bytes.len()
    );
    println!("[{context}] ✓  {} bytes → {}", bytes.len(), path.display());
}

fn base_config(cache: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .cache_dir(cache)
        .disable_remote_images()
        .disable_mermaid()
        .disable_plantuml()
        .build()
        .unwrap()
}

// ── Plain documents ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_document_with_cover_and_toc() {
    e2e_skip_unless_ready!("pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "report.md",
        "---\ntitle: Quarterly Report\nauthor: Ops & Finance\n---\n\
         # Summary\n\nCosts fell by 12%.\n\n## Details\n\n\
         Some <span style=\"color:red\">red</span> and <mark>marked</mark> text.\n",
    );
    let out = output_dir().join("plain.pdf");

    let result = convert(&src, &out, &base_config(&dir.path().join("cache")))
        .await
        .expect("convert should succeed");

    assert_pdf(&result.pdf_path, "plain");
    assert_eq!(result.prepared.toc.len(), 2);
    assert!(!result.prepared.has_failures());
}

#[tokio::test]
async fn test_directory_source_is_merged_in_name_order() {
    e2e_skip_unless_ready!("pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    write(&docs, "02-second.md", "# Second\n\nBody.\n");
    write(&docs, "01-first.md", "# First\n\nBody.\n");
    let out = output_dir().join("merged.pdf");

    let result = convert(&docs, &out, &base_config(&dir.path().join("cache")))
        .await
        .expect("convert should succeed");

    assert_pdf(&result.pdf_path, "merged");
    let titles: Vec<_> = result.prepared.toc.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["First", "Second"]);
}

#[tokio::test]
async fn test_convert_many_writes_one_pdf_per_source() {
    e2e_skip_unless_ready!("pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "alpha.md", "# Alpha\n");
    let b = write(dir.path(), "beta.md", "# Beta\n");
    let out = output_dir().join("many");

    let results = convert_many(&[a, b], &out, &base_config(&dir.path().join("cache")))
        .await
        .expect("convert_many should succeed");

    assert_eq!(results.len(), 2);
    assert_pdf(&out.join("alpha.pdf"), "many/alpha");
    assert_pdf(&out.join("beta.pdf"), "many/beta");
}

// ── Diagrams ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mermaid_diagram_is_rendered_and_cached() {
    e2e_skip_unless_ready!("mmdc", "pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "flow.md",
        "# Flow\n\n```mermaid\ngraph TD\n  A[Start] --> B[Stop]\n```\n",
    );
    let cache = dir.path().join("cache");
    let config = PipelineConfig::builder()
        .cache_dir(&cache)
        .disable_remote_images()
        .disable_plantuml()
        .mermaid(MermaidConfig {
            output_format: DiagramFormat::Png,
            puppeteer_args: vec!["--no-sandbox".into()],
            ..Default::default()
        })
        .build()
        .unwrap();

    let first = convert(&src, &output_dir().join("mermaid.pdf"), &config)
        .await
        .expect("first run should succeed");
    assert_pdf(&first.pdf_path, "mermaid");
    assert_eq!(first.prepared.stats.renders_executed, 1);

    let second = convert(&src, &output_dir().join("mermaid-again.pdf"), &config)
        .await
        .expect("second run should succeed");
    assert_eq!(second.prepared.stats.renders_executed, 0);
    assert_eq!(second.prepared.stats.cache_hits, 1);
}

#[tokio::test]
async fn test_plantuml_diagram_is_rendered() {
    e2e_skip_unless_ready!("plantuml", "pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "seq.md",
        "# Sequence\n\n```plantuml\n@startuml\nAlice -> Bob: hello\n@enduml\n```\n",
    );
    let config = PipelineConfig::builder()
        .cache_dir(dir.path().join("cache"))
        .disable_remote_images()
        .disable_mermaid()
        .build()
        .unwrap();

    let result = convert(&src, &output_dir().join("plantuml.pdf"), &config)
        .await
        .expect("convert should succeed");
    assert_pdf(&result.pdf_path, "plantuml");
    assert_eq!(result.prepared.assets.len(), 1);
}

#[tokio::test]
async fn test_broken_mermaid_keeps_source_and_still_builds() {
    e2e_skip_unless_ready!("mmdc", "pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "broken.md",
        "# Broken\n\n```mermaid\ngraph TD\n  A -->\n```\n",
    );
    let config = PipelineConfig::builder()
        .cache_dir(dir.path().join("cache"))
        .disable_remote_images()
        .disable_plantuml()
        .mermaid(MermaidConfig {
            puppeteer_args: vec!["--no-sandbox".into()],
            ..Default::default()
        })
        .build()
        .unwrap();

    let result = convert(&src, &output_dir().join("broken.pdf"), &config)
        .await
        .expect("placeholder policy should still produce a PDF");
    assert_pdf(&result.pdf_path, "broken");
    assert_eq!(result.prepared.failures.len(), 1);
    assert!(result.prepared.body.contains("could not be rendered"));
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_latex_in_preamble_reports_compiler_error() {
    e2e_skip_unless_ready!("pandoc", "xelatex");
    let dir = tempfile::tempdir().unwrap();
    let src = write(
        dir.path(),
        "bad.md",
        "---\npreamble: \\usepackage{definitely-not-a-package}\n---\n# Bad\n",
    );
    let out = output_dir().join("bad.pdf");
    std::fs::remove_file(&out).ok();

    let err = convert(&src, &out, &base_config(&dir.path().join("cache")))
        .await
        .expect_err("missing package must fail compilation");
    assert!(matches!(err, PipelineError::Compiler { .. }), "{err}");
    assert!(!out.exists(), "no partial PDF may be left behind");
}

#[tokio::test]
async fn test_missing_source_is_reported() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let err = convert(
        dir.path().join("nope.md"),
        dir.path().join("nope.pdf"),
        &base_config(&dir.path().join("cache")),
    )
    .await
    .expect_err("missing input");
    assert!(matches!(err, PipelineError::DocumentNotFound { .. }), "{err}");
}
