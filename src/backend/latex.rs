//! LaTeX → PDF through a TeX engine (`xelatex` by default).
//!
//! The engine runs `runs` times in the directory of the `.tex` file so that
//! page references and the table of contents settle. `TEXINPUTS` is extended
//! with the search paths so relative `\includegraphics` targets next to the
//! source documents resolve.

use super::{diagnostics, run_captured};
use crate::config::LatexConfig;
use crate::diagram::split_command;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LATEX_HINT: &str =
    "Install a TeX distribution providing xelatex (TeX Live, MiKTeX or MacTeX).";

#[derive(Debug, Clone)]
pub struct LatexCompiler {
    config: LatexConfig,
    argv: Vec<String>,
}

impl LatexCompiler {
    pub fn new(config: LatexConfig) -> Self {
        let argv = split_command(&config.command);
        Self { config, argv }
    }

    pub fn required_tool(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    fn command(&self, tex_name: &str) -> Vec<String> {
        let mut cmd = self.argv.clone();
        cmd.push("-interaction=nonstopmode".into());
        cmd.push("-halt-on-error".into());
        cmd.extend(self.config.extra_args.iter().cloned());
        cmd.push(tex_name.into());
        cmd
    }

    /// Compile `tex_file` and return the path of the produced PDF, which
    /// sits next to it.
    pub async fn compile(
        &self,
        tex_file: &Path,
        search_paths: &[PathBuf],
    ) -> Result<PathBuf, PipelineError> {
        let workdir = tex_file.parent().unwrap_or_else(|| Path::new("."));
        let tex_name = tex_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::Internal(format!("not a file: {}", tex_file.display())))?;
        let pdf_path = tex_file.with_extension("pdf");
        let envs = texinputs(search_paths)
            .map(|v| vec![("TEXINPUTS", v)])
            .unwrap_or_default();
        let command = self.command(&tex_name);

        for run in 1..=self.config.runs {
            debug!("TeX pass {run}/{}", self.config.runs);
            let output = run_captured(&command, Some(workdir), &envs, LATEX_HINT).await?;
            if !output.status.success() {
                return Err(PipelineError::Compiler {
                    diagnostics: diagnostics(&output),
                });
            }
        }

        if !tokio::fs::try_exists(&pdf_path).await.unwrap_or(false) {
            return Err(PipelineError::Compiler {
                diagnostics: format!("no PDF was produced at {}", pdf_path.display()),
            });
        }
        info!("Compiled {}", pdf_path.display());
        Ok(pdf_path)
    }
}

/// `TEXINPUTS` value: the search paths, then any inherited value, then an
/// empty entry so the engine keeps its default search path.
fn texinputs(search_paths: &[PathBuf]) -> Option<String> {
    if search_paths.is_empty() {
        return None;
    }
    let mut entries: Vec<PathBuf> = search_paths
        .iter()
        .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
        .collect();
    if let Some(existing) = std::env::var_os("TEXINPUTS") {
        entries.extend(std::env::split_paths(&existing).filter(|p| !p.as_os_str().is_empty()));
    }
    entries.push(PathBuf::new());
    std::env::join_paths(entries)
        .ok()
        .map(|v| v.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_non_interactive() {
        let c = LatexCompiler::new(LatexConfig {
            extra_args: vec!["-shell-escape".into()],
            ..Default::default()
        });
        assert_eq!(
            c.command("document.tex"),
            vec![
                "xelatex",
                "-interaction=nonstopmode",
                "-halt-on-error",
                "-shell-escape",
                "document.tex"
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn texinputs_ends_with_default_marker() {
        let dir = tempfile::tempdir().unwrap();
        let value = texinputs(&[dir.path().to_path_buf()]).unwrap();
        assert!(value.ends_with(':'));
        assert!(value.starts_with(&std::fs::canonicalize(dir.path()).unwrap().display().to_string()));
        assert!(texinputs(&[]).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_every_pass_and_finds_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("document.tex");
        std::fs::write(&tex, "\\relax").unwrap();
        let counter = dir.path().join("passes");
        // Stand-in engine: appends a line per pass and writes the PDF.
        let script = format!(
            "echo x >> {}; touch document.pdf",
            counter.display()
        );
        let c = LatexCompiler {
            config: LatexConfig {
                runs: 3,
                ..Default::default()
            },
            argv: vec!["sh".into(), "-c".into(), script],
        };
        let pdf = c.compile(&tex, &[]).await.unwrap();
        assert_eq!(pdf, dir.path().join("document.pdf"));
        assert_eq!(std::fs::read_to_string(counter).unwrap().lines().count(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_pdf_is_a_compiler_error() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("document.tex");
        std::fs::write(&tex, "").unwrap();
        let c = LatexCompiler {
            config: LatexConfig::default(),
            argv: vec!["true".into()],
        };
        let err = c.compile(&tex, &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Compiler { .. }));
    }
}
