use crate::lang::diagnostic::{self, Component, Span};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    /// A second `var` (or function) with the same name in one scope
    #[error("variable '{0}' is already defined in this scope")]
    Redefinition(String),

    /// No enclosing scope declares the name
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    /// `break` / `continue` with no enclosing loop in the same function
    #[error("'{0}' outside of a loop")]
    OutsideLoop(&'static str),

    #[error("'return' outside of a function")]
    ReturnOutsideFunction,

    /// A declaration that would shadow a name an earlier function in the
    /// same scope already resolved further out
    #[error("'{0}' is declared after a function in this scope that uses an outer '{0}'")]
    ShadowsCapture(String),

    #[error("too many constants (limit {0})")]
    TooManyConstants(usize),

    /// An operand does not fit in an `i32` code slot
    #[error("operand {0} does not fit in an instruction")]
    OperandOverflow(usize),
}

impl CompileErrorKind {
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CompileErrorKind::Redefinition(_) => {
                Some("use assignment to change it, or declare it in an inner block")
            }
            CompileErrorKind::UndefinedVariable(_) => {
                Some("declare it with 'var' before its first use")
            }
            CompileErrorKind::ShadowsCapture(_) => {
                Some("declare it before the function, or give it another name")
            }
            CompileErrorKind::OutsideLoop(_) => {
                Some("loops do not extend into the body of a function defined inside them")
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Option<Span>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind) -> Self {
        CompileError { kind, span: None }
    }

    pub fn at(kind: CompileErrorKind, span: Span) -> Self {
        CompileError {
            kind,
            span: Some(span),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.kind.to_string();
        f.write_str(&diagnostic::render(Component::Compiler, self.span, &message))
    }
}

// No `source()`: the message already includes the kind's text.
impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redefinition_display() {
        let err = CompileError::at(CompileErrorKind::Redefinition("x".into()), Span::new(1, 17));
        assert_eq!(
            err.to_string(),
            "cilly compiler : 第1行第17列 : variable 'x' is already defined in this scope"
        );
    }

    #[test]
    fn test_display_without_span() {
        let err = CompileError::new(CompileErrorKind::TooManyConstants(100));
        assert_eq!(err.to_string(), "cilly compiler : too many constants (limit 100)");
    }

    #[test]
    fn test_outside_loop_display() {
        let err = CompileError::at(CompileErrorKind::OutsideLoop("break"), Span::new(3, 5));
        assert_eq!(err.to_string(), "cilly compiler : 第3行第5列 : 'break' outside of a loop");
    }

    #[test]
    fn test_error_chain_is_a_single_message() {
        use std::error::Error;

        let err = CompileError::at(CompileErrorKind::UndefinedVariable("y".into()), Span::new(1, 7));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_hints() {
        assert!(CompileErrorKind::UndefinedVariable("y".into()).hint().is_some());
        assert!(CompileErrorKind::ReturnOutsideFunction.hint().is_none());
    }
}
