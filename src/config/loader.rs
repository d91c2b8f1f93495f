//! Configuration loading from disk and the environment.
//!
//! # Data Flow
//! ```text
//! backing file (JSON or TOML, by extension)
//!     → parse (ParseError leaves engine state untouched)
//!     → depth check
//!     → environment overlay (PREFIX_A_B=value → a.b), each override recorded
//!       so saves can write the file's own view
//!     → raw tree, handed to the pipeline for defaults and validation
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::tree;
use crate::config::writer::write_atomic;
use crate::error::{EngineError, EngineResult};
use crate::schema::{apply_defaults, SchemaNode};

/// On-disk syntax of the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    /// `.toml` files are TOML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => FileFormat::Toml,
            _ => FileFormat::Json,
        }
    }

    fn parse(self, text: &str) -> Result<Value, String> {
        match self {
            FileFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            FileFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        }
    }

    fn render(self, tree: &Value) -> Result<String, String> {
        match self {
            FileFormat::Json => serde_json::to_string_pretty(tree)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| e.to_string()),
            FileFormat::Toml => toml::to_string_pretty(tree).map_err(|e| e.to_string()),
        }
    }
}

/// The backing file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    format: FileFormat,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = FileFormat::from_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Parse the file. `Ok(None)` if it does not exist.
    pub fn read(&self) -> EngineResult<Option<Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(EngineError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        self.format
            .parse(&text)
            .map(Some)
            .map_err(|message| EngineError::Parse {
                path: self.path.clone(),
                message,
            })
    }

    /// Serialize `tree` and replace the file atomically.
    pub fn save(&self, tree: &Value) -> EngineResult<()> {
        let text = self.format.render(tree).map_err(|message| EngineError::Persistence {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, message),
        })?;
        write_atomic(&self.path, text.as_bytes()).map_err(|source| EngineError::Persistence {
            path: self.path.clone(),
            source,
        })
    }
}

/// Maps prefixed environment variables onto dot-paths.
#[derive(Debug, Clone)]
pub struct EnvOverlay {
    prefix: String,
}

impl EnvOverlay {
    /// `prefix` is matched with a trailing `_`: `"APP"` selects `APP_*`.
    pub fn new(prefix: &str) -> Self {
        let mut prefix = prefix.trim_end_matches('_').to_string();
        prefix.push('_');
        Self { prefix }
    }

    /// Prefix without its trailing separator.
    pub fn prefix(&self) -> &str {
        self.prefix.trim_end_matches('_')
    }

    /// `(path, value)` pairs selected from `vars`, sorted by path.
    pub fn collect<I>(&self, vars: I) -> Vec<(String, Value)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut out: Vec<(String, Value)> = vars
            .into_iter()
            .filter_map(|(name, raw)| {
                let rest = name.strip_prefix(&self.prefix)?;
                let path = rest
                    .to_lowercase()
                    .split('_')
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(".");
                if path.is_empty() {
                    return None;
                }
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                Some((path, value))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Write the selected variables into `tree`, recording what each one
    /// replaced.
    pub fn apply<I>(&self, tree: &mut Value, vars: I) -> Vec<Override>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = Vec::new();
        for (path, value) in self.collect(vars) {
            let file_value = tree::lookup(tree, &path).cloned();
            match tree::set_path(tree, &path, value.clone()) {
                Ok(()) => applied.push(Override {
                    path,
                    value,
                    file_value,
                }),
                Err(e) => tracing::warn!(path = %path, error = %e, "Skipping environment override"),
            }
        }
        applied
    }
}

/// One environment override and the file value it shadows.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub path: String,
    /// Value taken from the environment.
    pub value: Value,
    /// `None` when the file had nothing at `path`.
    pub file_value: Option<Value>,
}

/// Undo `overrides` on a copy of `tree`, giving back what belongs on disk.
///
/// A path whose value no longer matches the environment was changed since
/// the load; that change is kept.
pub fn without_overrides(tree: &Value, overrides: &[Override]) -> Value {
    let mut out = tree.clone();
    for ov in overrides.iter().rev() {
        if tree::lookup(&out, &ov.path) != Some(&ov.value) {
            continue;
        }
        let undone = match &ov.file_value {
            Some(value) => tree::set_path(&mut out, &ov.path, value.clone()),
            None => tree::remove_path(&mut out, &ov.path).map(|_| ()),
        };
        if let Err(e) = undone {
            tracing::warn!(path = %ov.path, error = %e, "Could not strip environment override");
        }
    }
    out
}

/// A freshly loaded tree plus the environment overrides merged into it.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub tree: Value,
    pub overrides: Vec<Override>,
}

/// Reads the backing file and merges the environment overlay.
#[derive(Debug, Clone)]
pub struct Loader {
    file: ConfigFile,
    overlay: Option<EnvOverlay>,
    create_if_missing: bool,
    max_depth: usize,
}

impl Loader {
    pub fn new(
        file: ConfigFile,
        overlay: Option<EnvOverlay>,
        create_if_missing: bool,
        max_depth: usize,
    ) -> Self {
        Self {
            file,
            overlay,
            create_if_missing,
            max_depth,
        }
    }

    pub fn file(&self) -> &ConfigFile {
        &self.file
    }

    pub fn overlay(&self) -> Option<&EnvOverlay> {
        self.overlay.as_ref()
    }

    /// Startup load using the process environment for the overlay.
    pub fn load(&self, schema: &SchemaNode) -> EngineResult<Loaded> {
        self.load_with_env(schema, std::env::vars())
    }

    /// Startup load: a missing file is created from schema defaults when
    /// `create_if_missing` is set.
    pub fn load_with_env<I>(&self, schema: &SchemaNode, vars: I) -> EngineResult<Loaded>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let tree = match self.file.read()? {
            Some(tree) => tree,
            None if self.create_if_missing => {
                let defaults = apply_defaults(&Value::Object(Map::new()), schema);
                self.file.save(&defaults)?;
                tracing::info!(path = %self.file.path().display(), "Created configuration file with defaults");
                defaults
            }
            None => {
                tracing::warn!(path = %self.file.path().display(), "Configuration file missing, starting empty");
                Value::Object(Map::new())
            }
        };
        self.finish(tree, vars)
    }

    /// Reload using the process environment for the overlay.
    pub fn reload(&self) -> EngineResult<Loaded> {
        self.reload_with_env(std::env::vars())
    }

    /// Re-read an existing file. A missing file is an error, never recreated.
    pub fn reload_with_env<I>(&self, vars: I) -> EngineResult<Loaded>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let tree = self.file.read()?.ok_or_else(|| EngineError::Io {
            path: self.file.path().to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "configuration file is missing"),
        })?;
        self.finish(tree, vars)
    }

    fn finish<I>(&self, mut tree: Value, vars: I) -> EngineResult<Loaded>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if !tree.is_object() {
            return Err(self.parse_error("root must be an object"));
        }
        let depth = tree::depth(&tree);
        if depth > self.max_depth {
            return Err(self.parse_error(format!(
                "nesting depth {depth} exceeds limit {}",
                self.max_depth
            )));
        }

        let overrides = match &self.overlay {
            Some(overlay) => overlay.apply(&mut tree, vars),
            None => Vec::new(),
        };
        if !overrides.is_empty() {
            tracing::debug!(count = overrides.len(), "Applied environment overrides");
        }
        Ok(Loaded { tree, overrides })
    }

    fn parse_error(&self, message: impl Into<String>) -> EngineError {
        EngineError::Parse {
            path: self.file.path().to_path_buf(),
            message: message.into(),
        }
    }
}
