use crate::lang::diagnostic::{self, Component, Span};

/// What went wrong while executing a program.
///
/// Shared by the evaluator and the bytecode VM so that both backends
/// report the same condition for the same program.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    // ───────────────────────────── User errors ──────────────────────────
    #[error("type error: {0}")]
    TypeError(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("variable '{0}' is already defined in this scope")]
    Redefinition(String),

    #[error("{0} is not callable")]
    NotCallable(&'static str),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("native function '{name}' failed: {message}")]
    Native { name: String, message: String },

    #[error("'{0}' outside of a loop")]
    OutsideLoop(&'static str),

    #[error("'return' outside of a function")]
    ReturnOutsideFunction,

    // ───────────────────────────── Limits ───────────────────────────────
    #[error("call depth limit exceeded ({0}) - possible infinite recursion")]
    CallDepthExceeded(usize),

    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),

    #[error("stack size limit exceeded ({0})")]
    StackLimitExceeded(usize),

    // ─────────────────────── Compiler/VM layout mismatch ────────────────
    #[error("unknown opcode {opcode} at {at}")]
    UnknownOpcode { opcode: i32, at: usize },

    #[error("truncated instruction at {0}")]
    TruncatedInstruction(usize),

    #[error("scope index out of range: {depth} (scope stack height {height})")]
    ScopeOutOfRange { depth: i32, height: usize },

    #[error("variable index out of range: {index} (frame size {size})")]
    SlotOutOfRange { index: i32, size: usize },

    #[error("invalid scope size {0}")]
    InvalidScopeSize(i32),

    #[error("constant index out of range: {0}")]
    ConstantOutOfRange(i32),

    #[error("jump target {target} out of range at {at}")]
    BadJumpTarget { target: i32, at: usize },

    #[error("stack underflow")]
    StackUnderflow,

    #[error("native function '{0}' is not provided by the host")]
    UnboundNative(String),

    #[error("output error: {0}")]
    Output(String),
}

impl RuntimeErrorKind {
    /// True for errors that mean the compiled code and the VM disagree about
    /// the program's layout, as opposed to errors in the user's program.
    pub fn is_layout_error(&self) -> bool {
        matches!(
            self,
            RuntimeErrorKind::UnknownOpcode { .. }
                | RuntimeErrorKind::TruncatedInstruction(_)
                | RuntimeErrorKind::ScopeOutOfRange { .. }
                | RuntimeErrorKind::SlotOutOfRange { .. }
                | RuntimeErrorKind::InvalidScopeSize(_)
                | RuntimeErrorKind::ConstantOutOfRange(_)
                | RuntimeErrorKind::BadJumpTarget { .. }
                | RuntimeErrorKind::StackUnderflow
        )
    }
}

/// A fatal execution error, tagged with the backend that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub component: Component,
    pub kind: RuntimeErrorKind,
    pub span: Option<Span>,
}

impl RuntimeError {
    pub fn new(component: Component, kind: RuntimeErrorKind) -> Self {
        RuntimeError {
            component,
            kind,
            span: None,
        }
    }

    pub fn vm(kind: RuntimeErrorKind) -> Self {
        Self::new(Component::Vm, kind)
    }

    pub fn eval(kind: RuntimeErrorKind) -> Self {
        Self::new(Component::Eval, kind)
    }

    /// Attaches a source position unless one is already known.
    pub fn with_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.kind.to_string();
        f.write_str(&diagnostic::render(self.component, self.span, &message))
    }
}

// No `source()`: the message already includes the kind's text.
impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_span() {
        let err = RuntimeError::eval(RuntimeErrorKind::UndefinedVariable("x".into()))
            .with_span(Span::new(2, 9));
        assert_eq!(
            err.to_string(),
            "cilly eval : 第2行第9列 : undefined variable 'x'"
        );
    }

    #[test]
    fn test_display_without_span() {
        let err = RuntimeError::vm(RuntimeErrorKind::UnknownOpcode { opcode: 99, at: 4 });
        assert_eq!(err.to_string(), "cilly vm : unknown opcode 99 at 4");
    }

    #[test]
    fn test_with_span_keeps_innermost_position() {
        let err = RuntimeError::eval(RuntimeErrorKind::DivisionByZero)
            .with_span(Span::new(1, 1))
            .with_span(Span::new(5, 5));
        assert_eq!(err.span, Some(Span::new(1, 1)));
    }

    #[test]
    fn test_error_chain_is_a_single_message() {
        use std::error::Error;

        let err = RuntimeError::vm(RuntimeErrorKind::DivisionByZero);
        assert!(err.source().is_none());
    }

    #[test]
    fn test_layout_errors() {
        assert!(RuntimeErrorKind::StackUnderflow.is_layout_error());
        assert!(RuntimeErrorKind::SlotOutOfRange { index: 3, size: 1 }.is_layout_error());
        assert!(!RuntimeErrorKind::DivisionByZero.is_layout_error());
    }
}
