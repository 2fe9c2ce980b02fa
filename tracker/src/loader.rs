//! Profile loading
//!
//! Turns a text or JSON profile into the context map the tracker is built
//! from. Records whose header or context string does not parse are
//! skipped and counted; repeated contexts are summed. A configured ceiling
//! on skipped records turns a badly broken profile into a load error.

use diagnostics::profile::ProfileDiagnostics;
use diagnostics::{Diagnostics, SourceMap, SourceSpan};
use fxhash::FxHashMap;
use indexmap::IndexMap;
use parser::{
    parse_sample_context, read_text_profile, ContextLessProfileMap, FunctionSamples, RawProfileMap,
    RawRecord, SampleContext, SampleProfileMap,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ProfileFormat, TrackerConfig, TrackerOptions};
use crate::error_codes::{format_error_code, TOO_MANY_SKIPPED};
use crate::tracker::SampleContextTracker;

/// JSON profile document
///
/// ```json
/// {
///   "names": { "1234": "main" },
///   "profiles": { "main:3 @ foo": { "total_samples": 10 } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonProfileDocument {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub names: IndexMap<String, String>,
    #[serde(default)]
    pub profiles: IndexMap<String, FunctionSamples>,
}

impl JsonProfileDocument {
    /// Document holding one profile per function
    pub fn from_context_less(profiles: &ContextLessProfileMap) -> Self {
        Self {
            names: IndexMap::new(),
            profiles: profiles
                .iter()
                .map(|(name, samples)| (name.to_string(), samples.clone()))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to write JSON profile: {}", e))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Distinct contexts loaded
    pub loaded: usize,
    /// Records dropped because their header or context did not parse
    pub skipped: usize,
    pub diagnostics: Diagnostics,
}

impl LoadReport {
    pub fn format(&self) -> String {
        format!(
            "Loaded {} contexts, skipped {} records, {} diagnostics",
            self.loaded,
            self.skipped,
            self.diagnostics.len()
        )
    }
}

#[derive(Debug)]
pub struct LoadedProfile {
    pub profiles: SampleProfileMap,
    pub names: Option<FxHashMap<u64, String>>,
    pub report: LoadReport,
    pub source_map: SourceMap,
}

impl LoadedProfile {
    pub fn into_tracker(self, options: TrackerOptions) -> SampleContextTracker {
        SampleContextTracker::new(self.profiles, self.names, options)
    }

    /// Add a name table, keeping names already known from the profile
    pub fn add_names(&mut self, names: FxHashMap<u64, String>) {
        let table = self.names.get_or_insert_with(FxHashMap::default);
        for (hash, name) in names {
            table.entry(hash).or_insert(name);
        }
    }
}

/// Parse the context of every raw record. Malformed contexts are skipped
/// with a diagnostic; repeated contexts are summed.
pub fn build_sample_profile_map(raw: RawProfileMap, diagnostics: &mut Diagnostics) -> (SampleProfileMap, usize) {
    let mut profiles = SampleProfileMap::new();
    let mut first_seen: FxHashMap<SampleContext, SourceSpan> = FxHashMap::default();
    let mut skipped = 0;

    for (key, RawRecord { mut samples, span }) in raw {
        let context = match parse_sample_context(&key) {
            Ok(context) => context,
            Err(e) => {
                log::warn!("skipping record with malformed context '{}': {}", key, e);
                diagnostics.push(ProfileDiagnostics::malformed_context(span, &key, &e.message));
                skipped += 1;
                continue;
            }
        };
        if samples.name.is_empty() {
            if let Some(leaf) = context.leaf() {
                samples.name = leaf.clone();
            }
        }

        match profiles.get_mut(&context) {
            Some(existing) => {
                let first = first_seen.get(&context).cloned();
                diagnostics.push(ProfileDiagnostics::duplicate_context(span, first, &key));
                existing.merge(&samples);
            }
            None => {
                first_seen.insert(context.clone(), span);
                profiles.insert(context, samples);
            }
        }
    }

    (profiles, skipped)
}

/// Load a text profile from memory
pub fn read_text(file_name: &str, content: &str) -> LoadedProfile {
    let text = read_text_profile(file_name, content);
    let mut diagnostics = text.diagnostics;
    let (profiles, bad_contexts) = build_sample_profile_map(text.records, &mut diagnostics);
    LoadedProfile {
        report: LoadReport {
            loaded: profiles.len(),
            skipped: text.skipped + bad_contexts,
            diagnostics,
        },
        profiles,
        names: None,
        source_map: text.source_map,
    }
}

/// Parse name-table entries. Keys that are not decimal hashes are reported
/// and ignored.
pub fn parse_name_entries(
    entries: IndexMap<String, String>,
    diagnostics: &mut Diagnostics,
) -> FxHashMap<u64, String> {
    let mut names = FxHashMap::default();
    for (key, name) in entries {
        match key.trim().parse::<u64>() {
            Ok(hash) => {
                names.insert(hash, name);
            }
            Err(_) => {
                log::warn!("ignoring name table entry '{}'", key);
                diagnostics.push(ProfileDiagnostics::invalid_name_table_key(
                    SourceSpan::detached(),
                    &key,
                ));
            }
        }
    }
    names
}

/// Load a JSON profile from memory
pub fn read_json(file_name: &str, content: &str) -> Result<LoadedProfile, String> {
    let document: JsonProfileDocument = serde_json::from_str(content)
        .map_err(|e| format!("Failed to parse {}: {}", file_name, e))?;

    let mut source_map = SourceMap::new();
    source_map.add_file(file_name.to_string(), content.to_string());

    let mut diagnostics = Diagnostics::new();
    let names = parse_name_entries(document.names, &mut diagnostics);
    let raw: RawProfileMap = document
        .profiles
        .into_iter()
        .map(|(key, samples)| (key, RawRecord::detached(samples)))
        .collect();
    let (profiles, skipped) = build_sample_profile_map(raw, &mut diagnostics);

    Ok(LoadedProfile {
        report: LoadReport {
            loaded: profiles.len(),
            skipped,
            diagnostics,
        },
        profiles,
        names: if names.is_empty() { None } else { Some(names) },
        source_map,
    })
}

/// Read a JSON name table (`{"<hash>": "<name>"}`) from disk
pub fn load_name_table(path: &Path) -> Result<(FxHashMap<u64, String>, Diagnostics), String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let entries: IndexMap<String, String> = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
    let mut diagnostics = Diagnostics::new();
    let names = parse_name_entries(entries, &mut diagnostics);
    Ok((names, diagnostics))
}

/// Read a profile from disk according to the configuration.
pub fn load_profile(path: &Path, config: &TrackerConfig) -> Result<LoadedProfile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let file_name = path.display().to_string();

    let mut loaded = match config.format_for(path) {
        ProfileFormat::Text => read_text(&file_name, &content),
        ProfileFormat::Json => read_json(&file_name, &content)?,
    };

    if let Some(table) = &config.profile.name_table {
        let (names, diagnostics) = load_name_table(Path::new(table))?;
        loaded.report.diagnostics.extend(diagnostics);
        loaded.add_names(names);
    }

    check_skipped(&loaded.report, config.loader.max_skipped)?;
    log::info!("{}: {}", file_name, loaded.report.format());
    Ok(loaded)
}

/// Fail when more records were skipped than allowed
pub fn check_skipped(report: &LoadReport, max_skipped: Option<usize>) -> Result<(), String> {
    match max_skipped {
        Some(max) if report.skipped > max => Err(format!(
            "error[{}]: {} malformed records skipped, limit is {}",
            format_error_code(TOO_MANY_SKIPPED),
            report.skipped,
            max
        )),
        _ => Ok(()),
    }
}
