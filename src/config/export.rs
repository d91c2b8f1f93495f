//! Read-only renderings of a configuration tree for deployment tooling.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::config::tree;
use crate::error::{EngineError, EngineResult};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty JSON with sorted keys.
    Json,
    /// `PREFIX_KEY=value` lines, one per leaf.
    Env,
    /// Indented key-per-line YAML.
    Yaml,
    /// TOML; fails for values TOML cannot express (e.g. null).
    Toml,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Env => "env",
            ExportFormat::Yaml => "yaml",
            ExportFormat::Toml => "toml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "env" | "dotenv" => Ok(ExportFormat::Env),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "toml" => Ok(ExportFormat::Toml),
            other => Err(EngineError::Export {
                format: "unknown",
                message: format!("unsupported format '{other}'"),
            }),
        }
    }
}

/// Render `tree` in `format`. `env_prefix` only affects [`ExportFormat::Env`].
pub fn export(tree: &Value, format: ExportFormat, env_prefix: Option<&str>) -> EngineResult<String> {
    let fail = |message: String| EngineError::Export {
        format: format.as_str(),
        message,
    };

    match format {
        ExportFormat::Json => serde_json::to_string_pretty(tree)
            .map(|s| s + "\n")
            .map_err(|e| fail(e.to_string())),
        ExportFormat::Yaml => serde_yaml::to_string(tree).map_err(|e| fail(e.to_string())),
        ExportFormat::Toml => toml::to_string_pretty(tree).map_err(|e| fail(e.to_string())),
        ExportFormat::Env => Ok(render_env(tree, env_prefix)),
    }
}

fn render_env(tree: &Value, prefix: Option<&str>) -> String {
    let prefix = prefix
        .map(|p| p.trim_end_matches('_'))
        .filter(|p| !p.is_empty());

    let mut out = String::new();
    for (path, value) in tree::flatten(tree) {
        if path.is_empty() {
            continue;
        }
        let key = path.replace('.', "_").to_uppercase();
        match prefix {
            Some(p) => out.push_str(&format!("{p}_{key}={}\n", env_value(value))),
            None => out.push_str(&format!("{key}={}\n", env_value(value))),
        }
    }
    out
}

/// Strings stay bare unless the environment overlay would read them back
/// as something else; everything else is a JSON literal.
fn env_value(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let ambiguous = s.is_empty()
                || s.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '=' | '\\'))
                || serde_json::from_str::<Value>(s).is_ok();
            if ambiguous {
                Value::String(s.clone()).to_string()
            } else {
                s.clone()
            }
        }
        other => other.to_string(),
    }
}
