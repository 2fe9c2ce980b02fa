//! `ctxprof.toml` configuration.
//!
//! Every section and key is optional:
//!
//! ```toml
//! [profile]
//! path = "perf.prof"
//! format = "text"          # or "json"; by extension when absent
//! name-table = "names.json"
//!
//! [loader]
//! max-skipped = 100
//!
//! [tracker]
//! merge-context = true
//! create-callee-contexts = true
//!
//! [dump]
//! show-sizes = true
//!
//! [log]
//! level = "warn"           # off, error, warn, info, debug or trace
//! ```

use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;

/// Profile input format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileFormat {
    Text,
    Json,
}

impl ProfileFormat {
    /// `.json` files are JSON, everything else is the text format
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ProfileFormat::Json,
            _ => ProfileFormat::Text,
        }
    }
}

/// `[profile]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProfileSection {
    /// Input profile
    pub path: Option<String>,
    pub format: Option<ProfileFormat>,
    /// Hash to name table (JSON object) for hashed profiles
    pub name_table: Option<String>,
}

/// `[loader]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoaderSection {
    /// Fail the load once more records than this were skipped
    pub max_skipped: Option<usize>,
}

/// `[tracker]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TrackerOptions {
    /// Base profiles sum every non-inlined context by default
    pub merge_context: bool,
    /// Callee lookups create missing contexts
    pub create_callee_contexts: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            merge_context: true,
            create_callee_contexts: true,
        }
    }
}

/// `[dump]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DumpOptions {
    pub show_sizes: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self { show_sizes: true }
    }
}

/// Log level names accepted in `[log] level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LogSection {
    /// Base level; each `-v` raises it one step
    pub level: LogLevel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub profile: ProfileSection,
    #[serde(default)]
    pub loader: LoaderSection,
    #[serde(default)]
    pub tracker: TrackerOptions,
    #[serde(default)]
    pub dump: DumpOptions,
    #[serde(default)]
    pub log: LogSection,
}

impl TrackerConfig {
    /// Format for `path`: the configured one, else guessed from the extension
    pub fn format_for(&self, path: &Path) -> ProfileFormat {
        self.profile
            .format
            .unwrap_or_else(|| ProfileFormat::from_path(path))
    }
}

/// Parse a `ctxprof.toml` string.
pub fn parse_config(content: &str) -> Result<TrackerConfig, String> {
    toml::from_str(content).map_err(|e| format!("Failed to parse ctxprof.toml: {}", e))
}

/// Read and parse a config file.
pub fn load_config(path: &Path) -> Result<TrackerConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}
