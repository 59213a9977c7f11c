use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Surface syntaxes accepted by the transpiler. Both lower to the same
/// program representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// Indentation-based script text (`//@version=5`, `x := e`, `=>`).
    Pine,
    /// Brace-and-semicolon function body (`(context) => { ... }`).
    Host,
}

fn host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(\(\s*\w*\s*\)\s*=>\s*\{|async\s+|function\b|const\b|let\b)|\bcontext\.(data|pine)\b")
            .expect("static host dialect pattern")
    })
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//\s*@version\s*=\s*(\d+)").expect("static version pattern"))
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Pine => "pine",
            Dialect::Host => "host",
        }
    }

    /// Guess the dialect of `source`. A `//@version` directive always means
    /// pine; host markers are a function wrapper, `let`/`const` declarations
    /// or `context.data` / `context.pine` access.
    pub fn detect(source: &str) -> Dialect {
        if version_re().is_match(source) {
            return Dialect::Pine;
        }
        if host_re().is_match(source) {
            Dialect::Host
        } else {
            Dialect::Pine
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Language version from a `//@version=N` directive, if present.
pub fn version_directive(source: &str) -> Option<u32> {
    version_re()
        .captures(source)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A line/column range (1-based) used for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl SourceSpan {
    pub fn point(line: usize, col: usize) -> Self {
        Self {
            start_line: line,
            start_col: col,
            end_line: line,
            end_col: col,
        }
    }

    pub fn single_line(line: usize, start_col: usize, end_col: usize) -> Self {
        Self {
            start_line: line,
            start_col,
            end_line: line,
            end_col,
        }
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_col)
    }
}

/// Machine-readable syntax error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyntaxErrorKind {
    UnexpectedToken,
    UnexpectedEof,
    InvalidIndentation,
    UnterminatedString,
    InvalidNumber,
    UndeclaredIdentifier,
    UnknownNamespace,
    UnknownFunction,
    DuplicateDefinition,
    InvalidAssignment,
    ArityMismatch,
    UnsupportedConstruct,
}

impl SyntaxErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            SyntaxErrorKind::UnexpectedToken => "E001",
            SyntaxErrorKind::UnexpectedEof => "E002",
            SyntaxErrorKind::InvalidIndentation => "E003",
            SyntaxErrorKind::UnterminatedString => "E004",
            SyntaxErrorKind::InvalidNumber => "E005",
            SyntaxErrorKind::UndeclaredIdentifier => "E101",
            SyntaxErrorKind::UnknownNamespace => "E102",
            SyntaxErrorKind::UnknownFunction => "E103",
            SyntaxErrorKind::DuplicateDefinition => "E104",
            SyntaxErrorKind::InvalidAssignment => "E105",
            SyntaxErrorKind::ArityMismatch => "E106",
            SyntaxErrorKind::UnsupportedConstruct => "E200",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dialects() {
        assert_eq!(Dialect::detect("//@version=5\nplot(close)"), Dialect::Pine);
        assert_eq!(Dialect::detect("x = ta.sma(close, 3)"), Dialect::Pine);
        assert_eq!(
            Dialect::detect("(context) => {\n  const { close } = context.data;\n}"),
            Dialect::Host
        );
        assert_eq!(Dialect::detect("let x = 1;"), Dialect::Host);
    }

    #[test]
    fn reads_version_directive() {
        assert_eq!(version_directive("//@version=5\n"), Some(5));
        assert_eq!(version_directive("// @version = 6"), Some(6));
        assert_eq!(version_directive("plot(close)"), None);
    }
}
