//! Context-sensitive sample profile tracker
//!
//! Profiles collected with full calling context (`main:3 @ foo:2 @ bar`) are
//! organized as a trie of contexts. The optimizer queries it while deciding
//! what to inline and updates it with each decision, so the samples it sees
//! for a function always reflect the code as it currently stands.

pub mod config;
pub mod context_trie;
pub mod debug_loc;
pub mod dump;
pub mod error_codes;
pub mod inline_merge;
pub mod loader;
pub mod logging;
pub mod profile_store;
pub mod stats;
pub mod tracker;

pub use config::{
    parse_config, DumpOptions, LogLevel, LogSection, ProfileFormat, TrackerConfig, TrackerOptions,
};
pub use context_trie::{ChildKey, ContextState, ContextTrie, ContextTrieNode, NodeId};
pub use debug_loc::{CallInstruction, DebugLoc};
pub use loader::{load_profile, read_json, read_text, LoadReport, LoadedProfile};
pub use profile_store::{ProfileId, ProfileStore};
pub use stats::TrackerStatistics;
pub use tracker::{ContextSamples, SampleContextTracker};
