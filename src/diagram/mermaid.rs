//! Mermaid rendering through mermaid-cli (`mmdc`).
//!
//! ## Why two command spellings?
//!
//! Older `mmdc` releases only understand the short flags (`-i`, `-o`, `-t`);
//! newer ones renamed several options and some distributions ship wrappers
//! that accept only the long form. The renderer tries the short spelling
//! first and retries once with the long spelling on a non-zero exit.
//!
//! Chromium sandbox flags cannot be passed on the `mmdc` command line, so
//! they go into a generated puppeteer config file for the duration of the
//! render.

use super::{ensure_output, run_tool, split_command, DiagramRenderer};
use crate::config::{DiagramFormat, MermaidConfig};
use crate::error::RenderError;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::warn;

pub struct MermaidRenderer {
    config: MermaidConfig,
    argv: Vec<String>,
}

impl MermaidRenderer {
    pub fn new(config: MermaidConfig) -> Self {
        let argv = split_command(&config.command);
        Self { config, argv }
    }

    fn puppeteer_config(&self) -> Result<Option<NamedTempFile>, RenderError> {
        if self.config.puppeteer_args.is_empty() {
            return Ok(None);
        }
        let mut file = tempfile::Builder::new()
            .prefix("puppeteer-")
            .suffix(".json")
            .tempfile()?;
        let body = serde_json::json!({ "args": self.config.puppeteer_args });
        file.write_all(body.to_string().as_bytes())?;
        file.flush()?;
        Ok(Some(file))
    }

    /// Short-flag command line understood by every `mmdc` release.
    fn short_command(&self, output: &Path, puppeteer: Option<&Path>) -> Vec<String> {
        let c = &self.config;
        let mut cmd = self.argv.clone();
        cmd.extend(["-i".into(), "-".into(), "-o".into(), output.display().to_string()]);
        cmd.extend(["-e".into(), c.output_format.extension().into()]);
        if let Some(theme) = &c.theme {
            cmd.extend(["-t".into(), theme.clone()]);
        }
        if let Some(bg) = &c.background {
            cmd.extend(["-b".into(), bg.clone()]);
        }
        if let Some(scale) = c.scale {
            cmd.extend(["-s".into(), scale.to_string()]);
        }
        if let Some(file) = &c.config_file {
            cmd.extend(["-c".into(), file.display().to_string()]);
        }
        if let Some(p) = puppeteer {
            cmd.extend(["-p".into(), p.display().to_string()]);
        }
        self.finish(cmd)
    }

    /// Long-flag command line used by newer releases.
    fn long_command(&self, output: &Path, puppeteer: Option<&Path>) -> Vec<String> {
        let c = &self.config;
        let mut cmd = self.argv.clone();
        cmd.extend([
            "--input".into(),
            "-".into(),
            "--output".into(),
            output.display().to_string(),
            "--outputFormat".into(),
            c.output_format.extension().into(),
        ]);
        if let Some(theme) = &c.theme {
            cmd.extend(["--theme".into(), theme.clone()]);
        }
        if let Some(bg) = &c.background {
            cmd.extend(["--backgroundColor".into(), bg.clone()]);
        }
        if let Some(scale) = c.scale {
            cmd.extend(["--scale".into(), scale.to_string()]);
        }
        if let Some(file) = &c.config_file {
            cmd.extend(["--configFile".into(), file.display().to_string()]);
        }
        if let Some(p) = puppeteer {
            cmd.extend(["--puppeteerConfigFile".into(), p.display().to_string()]);
        }
        self.finish(cmd)
    }

    fn finish(&self, mut cmd: Vec<String>) -> Vec<String> {
        if !self.argv.iter().any(|a| a == "--quiet" || a == "-q") {
            cmd.push("--quiet".into());
        }
        cmd.extend(self.config.extra_args.iter().cloned());
        cmd
    }
}

#[async_trait]
impl DiagramRenderer for MermaidRenderer {
    fn name(&self) -> &str {
        "mermaid"
    }

    fn display_name(&self) -> &str {
        "Mermaid"
    }

    fn fence_tags(&self) -> &[&str] {
        &["mermaid"]
    }

    fn output_format(&self) -> DiagramFormat {
        self.config.output_format
    }

    fn options_key(&self) -> String {
        let c = &self.config;
        format!(
            "theme={};background={};scale={};config={};extra={}",
            c.theme.as_deref().unwrap_or(""),
            c.background.as_deref().unwrap_or(""),
            c.scale.map(|s| s.to_string()).unwrap_or_default(),
            c.config_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            c.extra_args.join("\u{1f}"),
        )
    }

    fn required_tool(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    fn install_hint(&self) -> &str {
        "Install mermaid-cli: npm install -g @mermaid-js/mermaid-cli"
    }

    async fn render(&self, source: &str, output: &Path) -> Result<(), RenderError> {
        let puppeteer = self.puppeteer_config()?;
        let puppeteer_path = puppeteer.as_ref().map(|f| f.path());

        let short = self.short_command(output, puppeteer_path);
        match run_tool(&short, source.as_bytes()).await {
            Ok(_) => {}
            Err(RenderError::NonZeroExit { details, .. }) => {
                warn!("mmdc rejected short flags ({details}); retrying with long flags");
                let long = self.long_command(output, puppeteer_path);
                run_tool(&long, source.as_bytes()).await?;
            }
            Err(e) => return Err(e),
        }

        ensure_output(output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn renderer(config: MermaidConfig) -> MermaidRenderer {
        MermaidRenderer::new(config)
    }

    #[test]
    fn short_command_carries_all_options() {
        let r = renderer(MermaidConfig {
            command: "npx -y mmdc".into(),
            theme: Some("forest".into()),
            background: Some("transparent".into()),
            scale: Some(2.0),
            extra_args: vec!["--width".into(), "800".into()],
            ..Default::default()
        });
        let out = PathBuf::from("/tmp/out.png");
        let cmd = r.short_command(&out, Some(Path::new("/tmp/p.json")));
        assert_eq!(&cmd[..3], ["npx", "-y", "mmdc"]);
        let joined = cmd.join(" ");
        assert!(joined.contains("-i - -o /tmp/out.png"));
        assert!(joined.contains("-e png"));
        assert!(joined.contains("-t forest"));
        assert!(joined.contains("-b transparent"));
        assert!(joined.contains("-s 2"));
        assert!(joined.contains("-p /tmp/p.json"));
        assert!(joined.ends_with("--quiet --width 800"));
    }

    #[test]
    fn long_command_uses_long_flags() {
        let r = renderer(MermaidConfig {
            theme: Some("dark".into()),
            background: Some("white".into()),
            output_format: DiagramFormat::Svg,
            ..Default::default()
        });
        let cmd = r.long_command(Path::new("o.svg"), None).join(" ");
        assert!(cmd.starts_with("mmdc --input - --output o.svg --outputFormat svg"));
        assert!(cmd.contains("--theme dark"));
        assert!(cmd.contains("--backgroundColor white"));
        assert!(!cmd.contains("--puppeteerConfigFile"));
    }

    #[test]
    fn quiet_is_not_duplicated() {
        let r = renderer(MermaidConfig {
            command: "mmdc --quiet".into(),
            ..Default::default()
        });
        let cmd = r.short_command(Path::new("o.png"), None);
        assert_eq!(cmd.iter().filter(|a| *a == "--quiet").count(), 1);
    }

    #[test]
    fn puppeteer_config_holds_browser_args() {
        let r = renderer(MermaidConfig::default());
        let file = r.puppeteer_config().unwrap().expect("default has sandbox args");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(json["args"][0], "--no-sandbox");

        let none = renderer(MermaidConfig {
            puppeteer_args: vec![],
            ..Default::default()
        });
        assert!(none.puppeteer_config().unwrap().is_none());
    }

    #[test]
    fn required_tool_is_first_word() {
        let r = renderer(MermaidConfig {
            command: "/opt/bin/mmdc".into(),
            ..Default::default()
        });
        assert_eq!(r.required_tool(), Some("/opt/bin/mmdc"));
    }
}
