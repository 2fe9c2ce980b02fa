//! Text profile reader
//!
//! Reads the line-oriented sample profile format:
//!
//! ```text
//! [main:3 @ foo]:1220:20
//!  1: 100
//!  2.1: 50 bar:30 baz:20
//!  3: inlinee:40
//!   1: 40
//!  !Attributes: 1
//! ```
//!
//! A header at column 0 opens a record (`context:total:head`). Indented lines
//! belong to it: `loc: count [target:count]*` adds body samples,
//! `loc: name:total` opens a nested inlinee profile whose own lines are
//! indented further. `!` lines carry metadata and are ignored.
//!
//! Broken input never stops the reader. A bad body line is skipped with a
//! warning; a bad header skips the whole record up to the next header.

use diagnostics::profile::ProfileDiagnostics;
use diagnostics::{Diagnostics, FileId, SourceMap, SourceSpan};
use nom::{
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{char, space0, space1},
    combinator::{all_consuming, map},
    multi::many0,
    sequence::{delimited, preceded, separated_pair},
    Parser,
};

use crate::context_parser::{count, function_name, line_location, PResult};
use crate::sample_prof::{FunctionId, FunctionSamples, LineLocation, RawProfileMap, RawRecord};

/// Result of reading a text profile, with the diagnostics collected on the way
#[derive(Debug)]
pub struct TextProfile {
    pub records: RawProfileMap,
    /// Records dropped because their header did not parse
    pub skipped: usize,
    pub diagnostics: Diagnostics,
    pub source_map: SourceMap,
    pub file_id: FileId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Header<'a> {
    context: &'a str,
    total: u64,
    head: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyLine<'a> {
    Samples {
        location: LineLocation,
        count: u64,
        targets: Vec<(&'a str, u64)>,
    },
    Inlinee {
        location: LineLocation,
        callee: &'a str,
        total: u64,
    },
}

fn bracketed_context(input: &str) -> PResult<&str> {
    delimited(char('['), take_till1(|c: char| c == ']'), char(']')).parse(input)
}

fn header(input: &str) -> PResult<Header<'_>> {
    let (input, context) = alt((bracketed_context, function_name)).parse(input)?;
    let (input, (total, head)) = preceded(
        char(':'),
        separated_pair(count, char(':'), count),
    )
    .parse(input)?;
    let (input, _) = space0(input)?;
    Ok((
        input,
        Header {
            context: context.trim(),
            total,
            head,
        },
    ))
}

fn call_target(input: &str) -> PResult<(&str, u64)> {
    separated_pair(function_name, char(':'), count).parse(input)
}

fn inlinee_line(input: &str) -> PResult<BodyLine<'_>> {
    map(
        (
            line_location,
            char(':'),
            space1,
            call_target,
            space0,
        ),
        |(location, _, _, (callee, total), _)| BodyLine::Inlinee {
            location,
            callee,
            total,
        },
    )
    .parse(input)
}

fn samples_line(input: &str) -> PResult<BodyLine<'_>> {
    map(
        (
            line_location,
            char(':'),
            space1,
            count,
            many0(preceded(space1, call_target)),
            space0,
        ),
        |(location, _, _, count, targets, _)| BodyLine::Samples {
            location,
            count,
            targets,
        },
    )
    .parse(input)
}

fn body_line(input: &str) -> PResult<BodyLine<'_>> {
    alt((all_consuming(inlinee_line), all_consuming(samples_line))).parse(input)
}

/// Record under construction
struct OpenRecord {
    key: String,
    samples: FunctionSamples,
    span: SourceSpan,
    /// Open inlinee profiles: indentation of the line that opened each one,
    /// plus the path to it inside `samples`
    nesting: Vec<(usize, LineLocation, FunctionId)>,
}

impl OpenRecord {
    fn target_mut(&mut self) -> &mut FunctionSamples {
        let mut profile = &mut self.samples;
        for (_, location, callee) in &self.nesting {
            profile = profile.callsite_profile_mut(*location, callee.clone());
        }
        profile
    }
}

fn close_record(records: &mut RawProfileMap, diagnostics: &mut Diagnostics, record: OpenRecord) {
    match records.get_mut(&record.key) {
        Some(existing) => {
            diagnostics.push(ProfileDiagnostics::duplicate_context(
                record.span,
                Some(existing.span.clone()),
                &record.key,
            ));
            existing.samples.merge(&record.samples);
        }
        None => {
            records.insert(record.key, RawRecord::new(record.samples, record.span));
        }
    }
}

/// Read a text profile. Never fails; problems end up in the diagnostics.
pub fn read_text_profile(file_name: &str, content: &str) -> TextProfile {
    let mut source_map = SourceMap::new();
    let file_id = source_map.add_file(file_name.to_string(), content.to_string());
    let mut diagnostics = Diagnostics::new();
    let mut records = RawProfileMap::new();
    let mut skipped = 0;

    let mut current: Option<OpenRecord> = None;
    let mut skipping = false;

    for (index, line) in content.lines().enumerate() {
        let line_number = index + 1;
        let span = || {
            source_map
                .line_span(file_id, line_number)
                .unwrap_or_else(SourceSpan::detached)
        };

        let body = line.trim();
        if body.is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();

        if indent == 0 {
            if let Some(record) = current.take() {
                close_record(&mut records, &mut diagnostics, record);
            }
            match all_consuming(header).parse(line.trim_end()) {
                Ok((_, parsed)) => {
                    let mut samples = FunctionSamples::default();
                    samples.add_total_samples(parsed.total);
                    samples.add_head_samples(parsed.head);
                    current = Some(OpenRecord {
                        key: parsed.context.to_string(),
                        samples,
                        span: span(),
                        nesting: Vec::new(),
                    });
                    skipping = false;
                }
                Err(_) => {
                    log::warn!("{}:{}: malformed profile header", file_name, line_number);
                    diagnostics.push(ProfileDiagnostics::malformed_header(
                        span(),
                        "expected `context:total:head`",
                    ));
                    skipped += 1;
                    skipping = true;
                }
            }
            continue;
        }

        if skipping {
            continue;
        }
        let record = match current.as_mut() {
            Some(record) => record,
            None => {
                diagnostics.push(ProfileDiagnostics::orphan_body_line(span()));
                continue;
            }
        };
        if body.starts_with('!') {
            continue;
        }

        while matches!(record.nesting.last(), Some((opened_at, _, _)) if *opened_at >= indent) {
            record.nesting.pop();
        }

        match body_line(body) {
            Ok((_, BodyLine::Samples { location, count, targets })) => {
                let target = record.target_mut();
                target.add_body_samples(location, count);
                for (callee, calls) in targets {
                    target.add_called_target_samples(location, FunctionId::from(callee), calls);
                }
            }
            Ok((_, BodyLine::Inlinee { location, callee, total })) => {
                let callee = FunctionId::from(callee);
                record
                    .target_mut()
                    .callsite_profile_mut(location, callee.clone())
                    .add_total_samples(total);
                record.nesting.push((indent, location, callee));
            }
            Err(_) => {
                log::warn!("{}:{}: malformed sample line", file_name, line_number);
                diagnostics.push(ProfileDiagnostics::malformed_body_line(
                    span(),
                    "expected `loc: count [target:count]*` or `loc: name:total`",
                ));
            }
        }
    }

    if let Some(record) = current.take() {
        close_record(&mut records, &mut diagnostics, record);
    }

    TextProfile {
        records,
        skipped,
        diagnostics,
        source_map,
        file_id,
    }
}
