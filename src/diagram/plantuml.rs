//! PlantUML rendering through the `plantuml` CLI in pipe mode.
//!
//! `-pipe` reads the diagram from stdin and writes the image to stdout, so
//! no input file is needed and the output file is written here.

use super::{run_tool, split_command, DiagramRenderer};
use crate::config::{DiagramFormat, PlantUmlConfig};
use crate::error::RenderError;
use async_trait::async_trait;
use std::path::Path;

pub struct PlantUmlRenderer {
    config: PlantUmlConfig,
    argv: Vec<String>,
}

impl PlantUmlRenderer {
    pub fn new(config: PlantUmlConfig) -> Self {
        let argv = split_command(&config.command);
        Self { config, argv }
    }

    fn command(&self) -> Vec<String> {
        let mut cmd = self.argv.clone();
        cmd.push("-pipe".into());
        if let Some(charset) = &self.config.charset {
            cmd.extend(["-charset".into(), charset.clone()]);
        }
        cmd.push(format!("-t{}", self.config.output_format.extension()));
        cmd.extend(self.config.extra_args.iter().cloned());
        cmd
    }
}

#[async_trait]
impl DiagramRenderer for PlantUmlRenderer {
    fn name(&self) -> &str {
        "plantuml"
    }

    fn display_name(&self) -> &str {
        "PlantUML"
    }

    fn fence_tags(&self) -> &[&str] {
        &["plantuml", "puml"]
    }

    fn output_format(&self) -> DiagramFormat {
        self.config.output_format
    }

    fn options_key(&self) -> String {
        format!(
            "charset={};extra={}",
            self.config.charset.as_deref().unwrap_or(""),
            self.config.extra_args.join("\u{1f}")
        )
    }

    fn required_tool(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    fn install_hint(&self) -> &str {
        "Install PlantUML (https://plantuml.com/starting) and make sure `plantuml` is on the PATH."
    }

    async fn render(&self, source: &str, output: &Path) -> Result<(), RenderError> {
        let image = run_tool(&self.command(), source.as_bytes()).await?;
        if image.is_empty() {
            return Err(RenderError::EmptyOutput {
                path: output.to_path_buf(),
            });
        }
        tokio::fs::write(output, &image).await?;
        Ok(())
    }
}
