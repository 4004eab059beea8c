//! `WCP.md`: per-project settings kept as a readable Markdown file.
//!
//! The machine-readable part is the fenced `json` block under
//! `## Configuration`; everything else is regenerated on every write.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

pub const CONFIG_FILE: &str = "WCP.md";

static CONFIG_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"## Configuration\s+```json\s*([\s\S]*?)\s*```")
        .expect("Invalid configuration block regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub project: ProjectInfo,
    #[serde(default)]
    pub dev_server: Option<DevServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(rename = "type", default = "unknown_project")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            kind: unknown_project(),
            package_manager: None,
        }
    }
}

fn unknown_project() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevServer {
    pub name: String,
    pub command: Vec<String>,
    pub source: String,
}

impl DevServer {
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Extracts the configuration block. Anything unparseable yields `None`.
pub fn parse(content: &str) -> Option<ProjectConfig> {
    let captures = CONFIG_BLOCK_REGEX.captures(content)?;
    let json = captures.get(1)?.as_str();
    match serde_json::from_str(json) {
        Ok(config) => Some(config),
        Err(e) => {
            debug!(error = %e, "Ignoring malformed WCP.md configuration");
            None
        }
    }
}

/// Reads `WCP.md` from `dir`; a missing or malformed file yields `None`.
pub fn read(dir: &Path) -> Option<ProjectConfig> {
    let content = fs::read_to_string(config_path(dir)).ok()?;
    parse(&content)
}

pub fn render(config: &ProjectConfig) -> io::Result<String> {
    let json = serde_json::to_string_pretty(config)?;

    let mut lines: Vec<String> = vec![
        "# WCP.md".into(),
        String::new(),
        "This file configures wcp for this project.".into(),
        String::new(),
        "## Quick Start".into(),
        String::new(),
        "```bash".into(),
        "wcp start   # Start dev server".into(),
        "wcp watch   # Monitor logs (in another terminal)".into(),
        "wcp status  # Show current configuration".into(),
        "```".into(),
        String::new(),
        "## Dev Server".into(),
        String::new(),
    ];
    match &config.dev_server {
        Some(dev) => {
            lines.push(format!("**Command:** `{}`", dev.display_command()));
            lines.push(String::new());
            lines.push(format!("**Source:** {}", dev.source));
        }
        None => lines.push(
            "No dev server configured. Run `wcp create dev --save -- <command>` to set one."
                .into(),
        ),
    }
    lines.extend([
        String::new(),
        "## Configuration".into(),
        String::new(),
        "```json".into(),
        json,
        "```".into(),
        String::new(),
        "## About".into(),
        String::new(),
        "wcp creates Unix domain sockets for sharing terminal output across".into(),
        "multiple processes. Run background dev servers while monitoring logs".into(),
        "from external terminals.".into(),
        String::new(),
    ]);
    Ok(lines.join("\n"))
}

/// Regenerates `WCP.md` in `dir`.
pub fn write(dir: &Path, config: &ProjectConfig) -> io::Result<PathBuf> {
    let path = config_path(dir);
    fs::write(&path, render(config)?)?;
    Ok(path)
}
