//! ctxprof - context-sensitive sample profile tool
//!
//! # Usage
//!
//! ```bash
//! # Load a profile and report problems
//! ctxprof check perf.prof
//!
//! # Print the context tree
//! ctxprof dump perf.prof
//!
//! # Base profile of a function, all contexts summed
//! ctxprof base perf.prof foo
//!
//! # Inline foo into main at line 3 and show the result
//! ctxprof inline perf.prof --context main --callsite 3 --callee foo
//!
//! # Flatten to one profile per function
//! ctxprof flatten perf.prof --format json --output flat.json
//! ```

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use parser::{
    write_context_less_profiles, write_record, ErrorFormatter, FunctionId, LineLocation,
    SampleContext,
};
use std::path::{Path, PathBuf};
use std::process;
use tracker::config::load_config;
use tracker::dump::{dump_contexts, dump_tree};
use tracker::error_codes::{error_registry, format_error_code, TOO_MANY_SKIPPED};
use tracker::loader::{load_name_table, JsonProfileDocument};
use tracker::{load_profile, logging, LoadedProfile, SampleContextTracker, TrackerConfig};

#[derive(Parser)]
#[command(name = "ctxprof")]
#[command(version = "0.1.0")]
#[command(about = "Context-sensitive sample profile tracker", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./ctxprof.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hash to name table (JSON object)
    #[arg(long, global = true)]
    names: Option<PathBuf>,

    /// More log output; repeat for more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a profile, report diagnostics and statistics
    Check {
        /// Profile to read (defaults to [profile] path in the config)
        profile: Option<PathBuf>,
    },

    /// Print the context tree
    Dump {
        profile: Option<PathBuf>,

        /// Print one line per context instead of the tree
        #[arg(long)]
        flat: bool,
    },

    /// Print the base profile of a function
    Base {
        profile: PathBuf,

        /// Function name (or hash)
        function: String,

        /// Use only the top-level context instead of summing all contexts
        #[arg(long)]
        no_merge: bool,
    },

    /// Fold all context away, one profile per function
    Flatten {
        profile: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inline a callee context into its caller and print the tree
    Inline {
        profile: PathBuf,

        /// Caller context, e.g. `main` or `main:3 @ foo`
        #[arg(long)]
        context: SampleContext,

        /// Call site inside the caller, e.g. `3` or `2.1`
        #[arg(long)]
        callsite: LineLocation,

        /// Callee function
        #[arg(long)]
        callee: String,
    },

    /// Promote a context to top level and print the tree
    Promote {
        profile: PathBuf,

        /// Context to promote
        #[arg(long)]
        context: SampleContext,
    },
}

#[derive(ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = load_settings(&cli).and_then(|config| {
        logging::init(logging::effective_level(&config.log, cli.verbose));
        run(cli.command, &config)
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(command: Commands, config: &TrackerConfig) -> Result<(), String> {
    match command {
        Commands::Check { profile } => check_profile(profile, config),
        Commands::Dump { profile, flat } => dump_profile(profile, flat, config),
        Commands::Base {
            profile,
            function,
            no_merge,
        } => show_base(Some(profile), &function, !no_merge, config),
        Commands::Flatten {
            profile,
            format,
            output,
        } => flatten_profile(profile, format, output, config),
        Commands::Inline {
            profile,
            context,
            callsite,
            callee,
        } => inline_context(Some(profile), &context, callsite, &callee, config),
        Commands::Promote { profile, context } => promote_context(Some(profile), &context, config),
    }
}

/// Configuration from --config or ./ctxprof.toml, with --names applied
fn load_settings(cli: &Cli) -> Result<TrackerConfig, String> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None if Path::new("ctxprof.toml").exists() => load_config(Path::new("ctxprof.toml"))?,
        None => TrackerConfig::default(),
    };
    if let Some(names) = &cli.names {
        config.profile.name_table = Some(names.display().to_string());
    }
    Ok(config)
}

fn profile_path(profile: Option<PathBuf>, config: &TrackerConfig) -> Result<PathBuf, String> {
    profile
        .or_else(|| config.profile.path.as_ref().map(PathBuf::from))
        .ok_or_else(|| "No profile given and no [profile] path in the config".to_string())
}

/// Load the profile, printing its diagnostics
fn load(profile: Option<PathBuf>, config: &TrackerConfig) -> Result<LoadedProfile, String> {
    let path = profile_path(profile, config)?;
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()));
    }
    let loaded = load_profile(&path, config)?;
    if !loaded.report.diagnostics.is_empty() {
        let formatter = ErrorFormatter::new();
        eprint!(
            "{}",
            formatter.format_diagnostics(&loaded.report.diagnostics, &loaded.source_map)
        );
    }
    Ok(loaded)
}

fn build_tracker(profile: Option<PathBuf>, config: &TrackerConfig) -> Result<SampleContextTracker, String> {
    Ok(load(profile, config)?.into_tracker(config.tracker))
}

fn check_profile(profile: Option<PathBuf>, config: &TrackerConfig) -> Result<(), String> {
    let loaded = load(profile, config)?;
    println!("{}", loaded.report.format());

    let registry = error_registry();
    for code in registry.record_errors() {
        let formatted = code.format_code();
        let count = loaded.report.diagnostics.with_code(&formatted).count();
        if count > 0 {
            println!("  {:>4} x {}", count, code);
        }
    }
    if let Some(max) = config.loader.max_skipped {
        println!(
            "  skip ceiling {} ({} above it)",
            max,
            format_error_code(TOO_MANY_SKIPPED)
        );
    }

    let tracker = loaded.into_tracker(config.tracker);
    println!("{}", tracker.statistics().format());
    Ok(())
}

fn dump_profile(profile: Option<PathBuf>, flat: bool, config: &TrackerConfig) -> Result<(), String> {
    let tracker = build_tracker(profile, config)?;
    if flat {
        print!("{}", dump_contexts(&tracker));
    } else {
        print!("{}", dump_tree(&tracker, &config.dump));
    }
    Ok(())
}

fn show_base(
    profile: Option<PathBuf>,
    function: &str,
    merge_context: bool,
    config: &TrackerConfig,
) -> Result<(), String> {
    let tracker = build_tracker(profile, config)?;
    let name = resolve_function(function, config)?;
    let samples = tracker
        .get_base_samples_for(&name, merge_context)
        .ok_or_else(|| format!("No profile for function '{}'", function))?;

    let mut out = String::new();
    write_record(&mut out, &tracker.display_name(&name), &samples);
    print!("{}", out);
    Ok(())
}

/// A function argument may be a readable name for a hashed profile; map it
/// back through the name table.
fn resolve_function(function: &str, config: &TrackerConfig) -> Result<FunctionId, String> {
    let id = FunctionId::from(function);
    if id.as_hash().is_some() {
        return Ok(id);
    }
    let Some(table) = &config.profile.name_table else {
        return Ok(id);
    };
    let (names, _) = load_name_table(Path::new(table))?;
    Ok(names
        .into_iter()
        .find(|(_, name)| name == function)
        .map(|(hash, _)| FunctionId::Hash(hash))
        .unwrap_or(id))
}

fn flatten_profile(
    profile: Option<PathBuf>,
    format: OutputFormat,
    output: Option<PathBuf>,
    config: &TrackerConfig,
) -> Result<(), String> {
    let tracker = build_tracker(profile, config)?;
    let flat = tracker.create_context_less_profile_map();

    let text = match format {
        OutputFormat::Text => write_context_less_profiles(&flat),
        OutputFormat::Json => JsonProfileDocument::from_context_less(&flat).to_json()?,
    };

    match output {
        Some(path) => {
            std::fs::write(&path, text)
                .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            log::info!("wrote {} profiles to {}", flat.len(), path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn inline_context(
    profile: Option<PathBuf>,
    context: &SampleContext,
    callsite: LineLocation,
    callee: &str,
    config: &TrackerConfig,
) -> Result<(), String> {
    let mut tracker = build_tracker(profile, config)?;
    let caller = tracker
        .find_context(context)
        .ok_or_else(|| format!("Context [{}] not found", context))?;
    let callee = resolve_function(callee, config)?;

    let node = tracker
        .inline_context_into_caller(caller, callsite, &callee)
        .ok_or_else(|| format!("No callee context '{}' at {} in [{}]", callee, callsite, context))?;
    log::debug!("inlined {}", node);

    print!("{}", dump_tree(&tracker, &config.dump));
    Ok(())
}

fn promote_context(
    profile: Option<PathBuf>,
    context: &SampleContext,
    config: &TrackerConfig,
) -> Result<(), String> {
    let mut tracker = build_tracker(profile, config)?;
    let node = tracker
        .find_context(context)
        .ok_or_else(|| format!("Context [{}] not found", context))?;
    let promoted = tracker
        .promote_merge_context_samples_tree(node)
        .ok_or_else(|| format!("Context [{}] cannot be promoted", context))?;
    log::debug!("promoted {} to {}", node, promoted);

    print!("{}", dump_tree(&tracker, &config.dump));
    Ok(())
}
