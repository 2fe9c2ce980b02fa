//! Context string parsing
//!
//! Calling contexts are written outermost caller first, frames separated by
//! ` @ `, each non-leaf frame carrying the call site that leads to the next
//! frame: `main:3 @ foo:2.1 @ bar`. Profile headers wrap them in brackets.

use nom::{
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map_res, opt, value},
    multi::separated_list1,
    sequence::{delimited, preceded},
    IResult, Parser,
};

use crate::sample_prof::{ContextFrame, FunctionId, LineLocation, SampleContext};
use crate::ProfileParseError;

pub type PResult<'a, T> = IResult<&'a str, T>;

/// Decimal counter (sample counts, totals)
pub fn count(input: &str) -> PResult<u64> {
    map_res(digit1, str::parse::<u64>).parse(input)
}

fn small_number(input: &str) -> PResult<u32> {
    map_res(digit1, str::parse::<u32>).parse(input)
}

/// `line` or `line.discriminator`
pub fn line_location(input: &str) -> PResult<LineLocation> {
    let (input, line) = small_number(input)?;
    let (input, discriminator) = opt(preceded(char('.'), small_number)).parse(input)?;
    Ok((input, LineLocation::new(line, discriminator.unwrap_or(0))))
}

/// A function name or hash. Stops at the characters that delimit frames.
pub fn function_name(input: &str) -> PResult<&str> {
    take_till1(|c: char| c == ':' || c == '@' || c == '[' || c == ']' || c.is_whitespace())
        .parse(input)
}

fn frame(input: &str) -> PResult<(FunctionId, Option<LineLocation>)> {
    let (input, name) = function_name(input)?;
    let (input, location) = opt(preceded(char(':'), line_location)).parse(input)?;
    Ok((input, (FunctionId::from(name), location)))
}

fn frame_separator(input: &str) -> PResult<()> {
    value((), (space0, char('@'), space0)).parse(input)
}

fn frames(input: &str) -> PResult<Vec<(FunctionId, Option<LineLocation>)>> {
    separated_list1(frame_separator, frame).parse(input)
}

/// Frames of a context, bracketed or bare
pub fn context_frames(input: &str) -> PResult<Vec<(FunctionId, Option<LineLocation>)>> {
    alt((
        delimited((char('['), space0), frames, (space0, char(']'))),
        frames,
    ))
    .parse(input)
}

/// Parse a whole context string.
pub fn parse_sample_context(input: &str) -> Result<SampleContext, ProfileParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ProfileParseError::new("empty context", 0));
    }
    let leading = input.len() - input.trim_start().len();

    let parsed = match all_consuming(context_frames).parse(text) {
        Ok((_, parsed)) => parsed,
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let offset = leading + text.len() - e.input.len();
            return Err(ProfileParseError::new(
                format!("unexpected input at '{}'", e.input),
                offset,
            ));
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(ProfileParseError::new("incomplete context", input.len()));
        }
    };

    let last = parsed.len() - 1;
    let mut context_frames = Vec::with_capacity(parsed.len());
    for (i, (func, location)) in parsed.into_iter().enumerate() {
        let location = match (i == last, location) {
            (false, Some(location)) => location,
            (false, None) => {
                return Err(ProfileParseError::new(
                    format!("frame '{}' has no call-site location", func),
                    leading,
                ));
            }
            (true, None) => LineLocation::zero(),
            (true, Some(location)) => {
                return Err(ProfileParseError::new(
                    format!("leaf frame '{}' cannot carry a call site ({})", func, location),
                    leading,
                ));
            }
        };
        context_frames.push(ContextFrame::new(func, location));
    }

    Ok(SampleContext::new(context_frames))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_and_bracketed() {
        let bare = parse_sample_context("main:3 @ foo:2.1 @ bar").unwrap();
        let bracketed = parse_sample_context("[main:3 @ foo:2.1 @ bar]").unwrap();
        assert_eq!(bare, bracketed);

        let frames = bare.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], ContextFrame::new("main", LineLocation::new(3, 0)));
        assert_eq!(frames[1], ContextFrame::new("foo", LineLocation::new(2, 1)));
        assert_eq!(frames[2], ContextFrame::new("bar", LineLocation::zero()));
    }

    #[test]
    fn test_parse_base_context() {
        let context = parse_sample_context("[_Z3foov]").unwrap();
        assert!(context.is_base());
        assert_eq!(context.leaf(), Some(&FunctionId::from("_Z3foov")));
    }

    #[test]
    fn test_parse_hashed_frames() {
        let context = parse_sample_context("1234:1 @ 5678").unwrap();
        assert_eq!(context.frames()[0].func, FunctionId::Hash(1234));
        assert_eq!(context.leaf(), Some(&FunctionId::Hash(5678)));
    }

    #[test]
    fn test_display_round_trip() {
        let text = "main:3 @ foo:2.1 @ bar";
        assert_eq!(parse_sample_context(text).unwrap().to_string(), text);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_sample_context("").is_err());
        assert!(parse_sample_context("main @ foo").is_err());
        assert!(parse_sample_context("main:3 @ foo:4").is_err());
        assert!(parse_sample_context("[main:3 @ foo").is_err());
        assert!(parse_sample_context("main:x @ foo").is_err());

        let err = parse_sample_context("main:3 @@ foo").unwrap_err();
        assert!(err.offset > 0);
    }
}
