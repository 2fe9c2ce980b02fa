//! Profile-format diagnostic builders
//!
//! Helpers for the problems profile readers report. Every builder here is a
//! warning: the reader skips the offending input and keeps going.

use crate::{Diagnostic, DiagnosticBuilder, SourceSpan};

/// Provides common profile diagnostic builders
pub struct ProfileDiagnostics;

impl ProfileDiagnostics {
    /// A context string that does not parse (`main:3 @ foo` shape expected)
    pub fn malformed_context(span: SourceSpan, context: &str, reason: &str) -> Diagnostic {
        DiagnosticBuilder::warning(format!("malformed context '{}'", context), span.clone())
            .code("P0001")
            .label(span, reason.to_string())
            .help("contexts look like `main:3 @ foo:2.1 @ bar`")
            .note("the record was skipped")
            .build()
    }

    /// A body line inside a record that does not parse
    pub fn malformed_body_line(span: SourceSpan, reason: &str) -> Diagnostic {
        DiagnosticBuilder::warning("malformed sample line", span.clone())
            .code("P0002")
            .label(span, reason.to_string())
            .help("body lines look like `2.1: 50 bar:30` or `3: inlinee:40`")
            .note("the line was skipped")
            .build()
    }

    /// A record header without the `:total:head` counters
    pub fn malformed_header(span: SourceSpan, reason: &str) -> Diagnostic {
        DiagnosticBuilder::warning("malformed profile header", span.clone())
            .code("P0003")
            .label(span, reason.to_string())
            .help("headers look like `[main:3 @ foo]:1220:20`")
            .note("the record and its body were skipped")
            .build()
    }

    /// The same context appears twice; counts are summed
    pub fn duplicate_context(span: SourceSpan, first: Option<SourceSpan>, context: &str) -> Diagnostic {
        let mut builder =
            DiagnosticBuilder::info(format!("duplicate context '{}'", context), span.clone())
                .code("P0004")
                .label(span, "samples merged into the earlier record");
        if let Some(first) = first {
            builder = builder.secondary_label(first, "first defined here");
        }
        builder.build()
    }

    /// A name-table key that is not a decimal function hash
    pub fn invalid_name_table_key(span: SourceSpan, key: &str) -> Diagnostic {
        DiagnosticBuilder::warning(format!("name table key '{}' is not a function hash", key), span)
            .code("P0005")
            .note("the entry was ignored")
            .build()
    }

    /// An indented line with no record header above it
    pub fn orphan_body_line(span: SourceSpan) -> Diagnostic {
        DiagnosticBuilder::warning("sample line outside of any record", span.clone())
            .code("P0006")
            .label(span, "no header above this line")
            .note("the line was skipped")
            .build()
    }
}
