use std::borrow::Cow;

use ruff_python_ast::Stmt;
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange, TextSize};

use crate::exception::{ExcType, Exception};

/// Errors that can occur while parsing or compiling a script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Error in syntax.
    #[error("{msg} (line {line})")]
    Syntax { msg: Cow<'static, str>, line: u32 },
    /// Valid syntax the compiler does not handle.
    #[error("the withhack compiler does not yet support {msg} (line {line})")]
    NotImplemented { msg: Cow<'static, str>, line: u32 },
}

impl ParseError {
    pub(crate) fn not_implemented(msg: impl Into<Cow<'static, str>>, line: u32) -> Self {
        Self::NotImplemented { msg: msg.into(), line }
    }

    pub(crate) fn syntax(msg: impl Into<Cow<'static, str>>, line: u32) -> Self {
        Self::Syntax { msg: msg.into(), line }
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        match self {
            Self::Syntax { line, .. } | Self::NotImplemented { line, .. } => *line,
        }
    }

    /// Converts this error into a script-level exception.
    #[must_use]
    pub fn into_exception(self) -> Exception {
        let exc_type = match self {
            Self::Syntax { .. } => ExcType::SyntaxError,
            Self::NotImplemented { .. } => ExcType::NotImplementedError,
        };
        Exception::new(exc_type, self.to_string())
    }
}

/// Maps byte offsets in the source to 1-based line numbers.
#[derive(Debug, Clone)]
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { line_starts }
    }

    pub fn line_of(&self, offset: TextSize) -> u32 {
        let offset = usize::from(offset);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        };
        u32::try_from(line + 1).unwrap_or(u32::MAX)
    }

    pub fn line_of_range(&self, range: TextRange) -> u32 {
        self.line_of(range.start())
    }

    /// Number of the last line in the source.
    pub fn last_line(&self) -> u32 {
        u32::try_from(self.line_starts.len()).unwrap_or(u32::MAX)
    }
}

/// Parses a module into its statement list.
pub(crate) fn parse(source: &str, lines: &LineIndex) -> Result<Vec<Stmt>, ParseError> {
    let parsed =
        parse_module(source).map_err(|e| ParseError::syntax(e.to_string(), lines.line_of(e.range().start())))?;
    Ok(parsed.into_syntax().body.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_index_is_one_based() {
        let lines = LineIndex::new("a = 1\nb = 2\n\nc = 3");
        assert_eq!(lines.line_of(TextSize::new(0)), 1);
        assert_eq!(lines.line_of(TextSize::new(6)), 2);
        assert_eq!(lines.line_of(TextSize::new(13)), 4);
        assert_eq!(lines.last_line(), 4);
    }

    #[test]
    fn syntax_errors_carry_a_line() {
        let source = "x = 1\ny = (\n";
        let err = parse(source, &LineIndex::new(source)).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
        assert!(err.line() >= 2);
    }
}
