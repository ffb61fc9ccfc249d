//! # Cilly language core
//!
//! Shared data definitions used by every stage of the toolchain: the
//! Abstract Syntax Tree produced by the parser, the runtime value model
//! used by both execution backends, the host native-function table, and
//! diagnostic formatting.
//!
//! ## Documentation conventions
//!
//! - Grammar fragments are written in the source syntax, e.g. `var x = e;`.
//! - Node tags (`define`, `fun_def`, ...) are the names reported by
//!   `Stmt::tag` and `Expr::tag`.

pub mod diagnostic;
pub mod native;
pub mod node;
pub mod program;
pub mod value;
