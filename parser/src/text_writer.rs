//! Text profile writer
//!
//! Emits the format `text_reader` reads. Body records come first, then the
//! nested inlinee profiles, each level indented by one more space.

use std::fmt::Write;

use crate::sample_prof::{ContextLessProfileMap, FunctionSamples, SampleProfileMap};

/// Write one record under the given header text (a function name or a
/// bracketed context).
pub fn write_record(out: &mut String, header: &str, samples: &FunctionSamples) {
    writeln!(out, "{}:{}:{}", header, samples.total_samples, samples.head_samples).unwrap();
    write_body(out, samples, 1);
}

fn write_body(out: &mut String, samples: &FunctionSamples, depth: usize) {
    let indent = " ".repeat(depth);

    for (location, record) in &samples.body_samples {
        write!(out, "{}{}: {}", indent, location, record.samples).unwrap();
        for (target, count) in &record.call_targets {
            write!(out, " {}:{}", target, count).unwrap();
        }
        out.push('\n');
    }

    for (location, callees) in &samples.callsite_samples {
        for (callee, profile) in callees {
            writeln!(out, "{}{}: {}:{}", indent, location, callee, profile.total_samples).unwrap();
            write_body(out, profile, depth + 1);
        }
    }
}

/// Dump context profiles, one bracketed record per context.
pub fn write_context_profiles(profiles: &SampleProfileMap) -> String {
    let mut out = String::new();
    for (context, samples) in profiles {
        write_record(&mut out, &format!("[{}]", context), samples);
    }
    out
}

/// Dump context-less profiles, one record per function.
pub fn write_context_less_profiles(profiles: &ContextLessProfileMap) -> String {
    let mut out = String::new();
    for (name, samples) in profiles {
        write_record(&mut out, &name.to_string(), samples);
    }
    out
}
