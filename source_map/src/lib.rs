//! Source mapping for profile files
//!
//! Profile readers hand out byte offsets into the text they were given. This
//! crate keeps the loaded profile texts, assigns them file identifiers, and
//! turns offsets into 1-based line/column positions so diagnostics can point
//! at the offending record.

use std::collections::HashMap;
use std::fmt;

/// Represents a position in a profile file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self { line, column, byte_offset }
    }
}

/// A span of profile text inside one file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: SourcePosition,
    pub end: SourcePosition,
    pub file_id: FileId,
}

impl SourceSpan {
    pub fn new(start: SourcePosition, end: SourcePosition, file_id: FileId) -> Self {
        Self { start, end, file_id }
    }

    /// Span for input that did not come from a file (in-memory maps, CLI arguments).
    pub fn detached() -> Self {
        let origin = SourcePosition::new(0, 0, 0);
        Self::new(origin, origin, FileId::DETACHED)
    }

    pub fn is_detached(&self) -> bool {
        self.file_id == FileId::DETACHED
    }
}

/// Unique identifier for a loaded profile file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

impl FileId {
    /// Sentinel for spans that have no backing file.
    pub const DETACHED: FileId = FileId(usize::MAX);

    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// A loaded profile text with precomputed line starts
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
    pub line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: String, content: String) -> Self {
        let line_starts = compute_line_starts(&content);
        Self {
            name,
            content,
            line_starts,
        }
    }

    /// Number of lines in the file
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte range of a line without its terminator (1-based line numbers)
    pub fn line_range(&self, line_number: usize) -> Option<(usize, usize)> {
        if line_number == 0 || line_number > self.line_starts.len() {
            return None;
        }

        let start = self.line_starts[line_number - 1];
        let mut end = if line_number < self.line_starts.len() {
            self.line_starts[line_number]
        } else {
            self.content.len()
        };

        let bytes = self.content.as_bytes();
        while end > start && matches!(bytes[end - 1], b'\n' | b'\r') {
            end -= 1;
        }

        Some((start, end))
    }

    /// Get a specific line (1-based line numbers)
    pub fn get_line(&self, line_number: usize) -> Option<&str> {
        self.line_range(line_number)
            .map(|(start, end)| &self.content[start..end])
    }

    /// Convert a byte offset to line and column (1-based)
    pub fn offset_to_line_col(&self, offset: usize) -> (usize, usize) {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };

        let line_start = self.line_starts.get(line_index).copied().unwrap_or(0);
        (line_index + 1, offset - line_start + 1)
    }

    pub fn offset_to_position(&self, offset: usize) -> SourcePosition {
        let (line, column) = self.offset_to_line_col(offset);
        SourcePosition::new(line, column, offset)
    }
}

/// Owns every profile text loaded during one run
#[derive(Debug, Clone)]
pub struct SourceMap {
    files: HashMap<FileId, SourceFile>,
    next_id: usize,
}

impl SourceMap {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            next_id: 0,
        }
    }

    /// Add a profile text and return its FileId
    pub fn add_file(&mut self, name: String, content: String) -> FileId {
        let file_id = FileId(self.next_id);
        self.next_id += 1;
        self.files.insert(file_id, SourceFile::new(name, content));
        file_id
    }

    pub fn get_file(&self, file_id: FileId) -> Option<&SourceFile> {
        self.files.get(&file_id)
    }

    /// Get a specific line from a file (1-based line numbers)
    pub fn get_line(&self, file_id: FileId, line_number: usize) -> Option<&str> {
        self.get_file(file_id)?.get_line(line_number)
    }

    pub fn offset_to_line_col(&self, file_id: FileId, offset: usize) -> Option<(usize, usize)> {
        self.get_file(file_id).map(|file| file.offset_to_line_col(offset))
    }

    /// Create a SourceSpan from file, start offset, and end offset
    pub fn span_from_offsets(&self, file_id: FileId, start: usize, end: usize) -> Option<SourceSpan> {
        let file = self.get_file(file_id)?;
        Some(SourceSpan::new(
            file.offset_to_position(start),
            file.offset_to_position(end),
            file_id,
        ))
    }

    /// Span covering one whole line (1-based), terminator excluded
    pub fn line_span(&self, file_id: FileId, line_number: usize) -> Option<SourceSpan> {
        let (start, end) = self.get_file(file_id)?.line_range(line_number)?;
        self.span_from_offsets(file_id, start, end)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut line_starts = vec![0];

    for (i, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push(i + 1);
        }
    }

    line_starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_line_strips_terminators() {
        let mut source_map = SourceMap::new();
        let file_id = source_map.add_file(
            "perf.prof".to_string(),
            "[main]:10:1\r\n 1: 10\n".to_string(),
        );

        assert_eq!(source_map.get_line(file_id, 1), Some("[main]:10:1"));
        assert_eq!(source_map.get_line(file_id, 2), Some(" 1: 10"));
        assert_eq!(source_map.get_line(file_id, 3), Some(""));
        assert_eq!(source_map.get_line(file_id, 4), None);
    }

    #[test]
    fn test_offset_to_line_col() {
        let mut source_map = SourceMap::new();
        let file_id = source_map.add_file("perf.prof".to_string(), "foo:1:0\n 2: 5\n".to_string());

        assert_eq!(source_map.offset_to_line_col(file_id, 0), Some((1, 1)));
        assert_eq!(source_map.offset_to_line_col(file_id, 4), Some((1, 5)));
        assert_eq!(source_map.offset_to_line_col(file_id, 9), Some((2, 2)));
    }

    #[test]
    fn test_line_span() {
        let mut source_map = SourceMap::new();
        let file_id = source_map.add_file("perf.prof".to_string(), "foo:1:0\n 2: x\n".to_string());

        let span = source_map.line_span(file_id, 2).unwrap();
        assert_eq!(span.start.line, 2);
        assert_eq!(span.start.column, 1);
        assert_eq!(span.end.column, 6);
        assert!(source_map.line_span(file_id, 7).is_none());
    }

    #[test]
    fn test_detached_span() {
        let span = SourceSpan::detached();
        assert!(span.is_detached());

        let mut source_map = SourceMap::new();
        let file_id = source_map.add_file("a.prof".to_string(), String::new());
        assert_ne!(file_id, FileId::DETACHED);
        assert!(source_map.get_file(FileId::DETACHED).is_none());
    }
}
