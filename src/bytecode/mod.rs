pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;

pub use ir::{CodeObject, Constant, Program, ScopeInfo};
pub use op::Opcode;
