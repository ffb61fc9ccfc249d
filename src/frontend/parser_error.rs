use crate::lang::diagnostic::{self, Component, Span};

/// A parsing error with source location.
///
/// Positions come from the lexer spans. Errors at end of input fall back to
/// the `eof` token's span, so a position is always present in practice; the
/// `Option` only covers an empty token stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserError {
    pub message: String,
    pub span: Option<Span>,
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&diagnostic::render(
            Component::Parser,
            self.span,
            &self.message,
        ))
    }
}

impl std::error::Error for ParserError {}
