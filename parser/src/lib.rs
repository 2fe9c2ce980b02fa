//! Sample profile formats
//!
//! Data model for context-sensitive sample profiles, the context string
//! grammar, and the line-oriented text format (reader and writer).

use std::fmt;

pub mod context_parser;
pub mod sample_prof;
pub mod text_reader;
pub mod text_writer;

// Re-export diagnostics so readers and callers share one set of types
pub use diagnostics::*;

pub use context_parser::parse_sample_context;
pub use sample_prof::{
    ContextFrame, ContextLessProfileMap, FunctionId, FunctionSamples, LineLocation,
    RawProfileMap, RawRecord, SampleContext, SampleProfileMap, SampleRecord,
};
pub use text_reader::{read_text_profile, TextProfile};
pub use text_writer::{write_context_less_profiles, write_context_profiles, write_record};

/// A context string that could not be parsed. `offset` is the byte offset
/// into the string where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileParseError {
    pub message: String,
    pub offset: usize,
}

impl ProfileParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

impl fmt::Display for ProfileParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.offset)
    }
}

impl std::error::Error for ProfileParseError {}
