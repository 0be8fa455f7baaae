use std::fmt;

use thiserror::Error;

/// Byte span within a source file, plus the 1-based line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: usize,
}

impl SourceSpan {
    pub const fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    /// Span covering `self` through `other`, keeping the starting line.
    pub fn to(self, other: SourceSpan) -> Self {
        Self {
            start: self.start,
            end: other.end.max(self.end),
            line: self.line,
        }
    }
}

/// Classification of a diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexer,
    Parser,
    Runtime,
}

/// Rich diagnostic information surfaced to end users.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(span) = self.span {
            write!(f, " (line {})", span.line)?;
        }
        if !self.notes.is_empty() {
            writeln!(f)?;
            for note in &self.notes {
                writeln!(f, "  note: {note}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Unified error type for the Vint toolchain.
#[derive(Debug, Error)]
pub enum VintError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VintError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Diagnostic(Diagnostic::new(DiagnosticKind::Runtime, message))
    }
}

pub type Result<T> = std::result::Result<T, VintError>;
