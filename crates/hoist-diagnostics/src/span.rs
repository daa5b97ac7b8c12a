//! Spans tie IR nodes back to the syntax they were bound from.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl FileId {
    pub const DUMMY: FileId = FileId(u32::MAX);
}

/// Byte range `start..end` in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub file_id: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    /// Span of synthesized nodes that have no syntax of their own.
    pub const DUMMY: Span = Span {
        file_id: FileId::DUMMY,
        start: 0,
        end: 0,
    };

    pub fn new(file_id: FileId, start: u32, end: u32) -> Self {
        Self { file_id, start, end }
    }

    pub fn is_dummy(&self) -> bool {
        self.file_id == FileId::DUMMY
    }

    /// Offset of this span's start relative to the start of `body`.
    ///
    /// Debug ids are keyed by this offset so that they survive edits
    /// above the enclosing method.
    pub fn syntax_offset(&self, body: Span) -> i32 {
        self.start as i32 - body.start as i32
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::DUMMY
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dummy() {
            f.write_str("<synthesized>")
        } else {
            write!(f, "file{}:{}..{}", self.file_id.0, self.start, self.end)
        }
    }
}

/// A related location attached to a diagnostic.
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

impl Label {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_offset_is_relative() {
        let body = Span::new(FileId(0), 100, 400);
        let lambda = Span::new(FileId(0), 140, 180);
        assert_eq!(lambda.syntax_offset(body), 40);
        assert_eq!(body.syntax_offset(body), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Span::new(FileId(3), 1, 4).to_string(), "file3:1..4");
        assert_eq!(Span::DUMMY.to_string(), "<synthesized>");
    }
}
