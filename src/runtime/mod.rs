//! Execution backends: the tree-walking evaluator (`vm_ast`) and the
//! bytecode VM (`vm_bc`), plus the runtime error type they share.

pub mod environment;
pub mod runtime_error;
pub mod vm_ast;
pub mod vm_bc;

/// Nesting limit for cilly function calls, shared by both backends so that
/// a program fails (or succeeds) the same way on either.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;
