//! Error code registry for profile loading
//!
//! Codes attached to diagnostics are stable so tools can filter on them.
//!
//! # Code Ranges
//!
//! - P0001-P0099: per-record input problems (the record or line is skipped)
//! - P0100-P0199: whole-load failures

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// The numeric code (e.g., 1)
    pub code: u16,
    /// Human-readable category
    pub category: &'static str,
    /// Brief description of what the code means
    pub description: &'static str,
    /// Optional help text
    pub help: Option<&'static str>,
}

impl ErrorCode {
    pub const fn new(
        code: u16,
        category: &'static str,
        description: &'static str,
        help: Option<&'static str>,
    ) -> Self {
        Self {
            code,
            category,
            description,
            help,
        }
    }

    /// Format the code as "P{code:04}" (e.g., "P0001")
    pub fn format_code(&self) -> String {
        format_error_code(self.code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {}",
            self.format_code(),
            self.category,
            self.description
        )
    }
}

pub const MALFORMED_CONTEXT: u16 = 1;
pub const MALFORMED_BODY_LINE: u16 = 2;
pub const MALFORMED_HEADER: u16 = 3;
pub const DUPLICATE_CONTEXT: u16 = 4;
pub const INVALID_NAME_TABLE_KEY: u16 = 5;
pub const ORPHAN_BODY_LINE: u16 = 6;
pub const TOO_MANY_SKIPPED: u16 = 100;

pub struct ErrorCodeRegistry {
    codes: BTreeMap<u16, ErrorCode>,
}

impl ErrorCodeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            codes: BTreeMap::new(),
        };
        registry.register_all_codes();
        registry
    }

    pub fn get(&self, code: u16) -> Option<&ErrorCode> {
        self.codes.get(&code)
    }

    /// Look up by formatted string (e.g., "P0004")
    pub fn get_by_string(&self, code_str: &str) -> Option<&ErrorCode> {
        self.get(parse_error_code(code_str)?)
    }

    pub fn is_valid_code(&self, code: u16) -> bool {
        self.codes.contains_key(&code)
    }

    /// Codes for problems that skip a single record or line
    pub fn record_errors(&self) -> Vec<&ErrorCode> {
        self.codes.range(1..100).map(|(_, code)| code).collect()
    }

    fn register(&mut self, error_code: ErrorCode) {
        self.codes.insert(error_code.code, error_code);
    }

    fn register_all_codes(&mut self) {
        // ===== RECORD ERRORS (P0001-P0099) =====
        self.register(ErrorCode::new(
            MALFORMED_CONTEXT,
            "Record",
            "Malformed context string",
            Some("Contexts look like `main:3 @ foo:2.1 @ bar`"),
        ));
        self.register(ErrorCode::new(
            MALFORMED_BODY_LINE,
            "Record",
            "Malformed sample line",
            Some("Body lines look like `2.1: 50 bar:30` or `3: inlinee:40`"),
        ));
        self.register(ErrorCode::new(
            MALFORMED_HEADER,
            "Record",
            "Malformed profile header",
            Some("Headers look like `[main:3 @ foo]:1220:20`"),
        ));
        self.register(ErrorCode::new(
            DUPLICATE_CONTEXT,
            "Record",
            "Duplicate context",
            Some("Samples of repeated contexts are summed"),
        ));
        self.register(ErrorCode::new(
            INVALID_NAME_TABLE_KEY,
            "Record",
            "Name table key is not a function hash",
            Some("Name table keys are decimal function hashes"),
        ));
        self.register(ErrorCode::new(
            ORPHAN_BODY_LINE,
            "Record",
            "Sample line outside any record",
            Some("Body lines must follow a header line"),
        ));

        // ===== LOAD ERRORS (P0100-P0199) =====
        self.register(ErrorCode::new(
            TOO_MANY_SKIPPED,
            "Load",
            "Too many malformed records",
            Some("Raise `max-skipped` in ctxprof.toml or fix the profile"),
        ));
    }
}

impl Default for ErrorCodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: std::sync::OnceLock<ErrorCodeRegistry> = std::sync::OnceLock::new();

/// Global registry
pub fn error_registry() -> &'static ErrorCodeRegistry {
    REGISTRY.get_or_init(ErrorCodeRegistry::new)
}

pub fn get_error_code(code: u16) -> Option<&'static ErrorCode> {
    error_registry().get(code)
}

/// 4 -> "P0004"
pub fn format_error_code(code: u16) -> String {
    format!("P{:04}", code)
}

/// "P0004" -> Some(4)
pub fn parse_error_code(code_str: &str) -> Option<u16> {
    code_str.strip_prefix('P')?.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry = ErrorCodeRegistry::new();
        let duplicate = registry.get_by_string("P0004").unwrap();
        assert_eq!(duplicate.code, DUPLICATE_CONTEXT);
        assert_eq!(duplicate.format_code(), "P0004");
        assert!(registry.get(999).is_none());
        assert!(registry.get_by_string("E0004").is_none());
    }

    #[test]
    fn test_ranges() {
        let registry = error_registry();
        let records = registry.record_errors();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|code| code.code < 100));
        assert!(registry.is_valid_code(TOO_MANY_SKIPPED));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(format_error_code(100), "P0100");
        assert_eq!(parse_error_code("P0001"), Some(1));
        assert_eq!(parse_error_code("0001"), None);
        assert_eq!(
            get_error_code(MALFORMED_HEADER).unwrap().to_string(),
            "P0003 [Record]: Malformed profile header"
        );
    }
}
