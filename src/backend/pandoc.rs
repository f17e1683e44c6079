//! Markdown → LaTeX through Pandoc.

use super::{diagnostics, run_captured};
use crate::config::PandocConfig;
use crate::diagram::split_command;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};

pub const PANDOC_HINT: &str = "Install Pandoc from https://pandoc.org/installing.html.";

#[derive(Debug, Clone)]
pub struct PandocConverter {
    config: PandocConfig,
    argv: Vec<String>,
}

impl PandocConverter {
    pub fn new(config: PandocConfig) -> Self {
        let argv = split_command(&config.command);
        Self { config, argv }
    }

    pub fn required_tool(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    fn command(&self, input: &Path, resource_paths: &[PathBuf]) -> Vec<String> {
        let mut cmd = self.argv.clone();
        cmd.extend(self.config.extra_args.iter().cloned());
        cmd.extend([
            "--from".into(),
            self.config.from_format.clone(),
            "--to".into(),
            self.config.to_format.clone(),
            input.display().to_string(),
        ]);
        if let Ok(joined) = std::env::join_paths(resource_paths) {
            if !resource_paths.is_empty() {
                cmd.extend(["--resource-path".into(), joined.to_string_lossy().into_owned()]);
            }
        }
        cmd
    }

    /// Convert the Markdown file at `input` and return the converter's
    /// standard output.
    ///
    /// `resource_paths` are searched, in order, for relative image targets.
    pub async fn convert(
        &self,
        input: &Path,
        resource_paths: &[PathBuf],
    ) -> Result<String, PipelineError> {
        let output = run_captured(&self.command(input, resource_paths), None, &[], PANDOC_HINT).await?;
        if !output.status.success() {
            return Err(PipelineError::Converter {
                diagnostics: diagnostics(&output),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| PipelineError::Converter {
            diagnostics: format!("converter output is not UTF-8: {e}"),
        })
    }
}
