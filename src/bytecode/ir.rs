use serde::{Deserialize, Serialize};

use crate::lang::value::Value;

/// A compiled bytecode program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Top-level code.
    pub main: CodeObject,

    /// Constant pool shared by `main` and every function code object.
    pub constants: Vec<Constant>,

    /// Slot layout of the prelude frame: the native names the program was
    /// compiled against, bound by name when the VM starts.
    pub globals: Vec<String>,
}

impl Program {
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Program, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Function code objects in constant-pool order, with their pool index.
    pub fn functions(&self) -> impl Iterator<Item = (usize, &CodeObject)> {
        self.constants
            .iter()
            .enumerate()
            .filter_map(|(idx, constant)| match constant {
                Constant::Code(code) => Some((idx, code)),
                _ => None,
            })
    }
}

/// A single compiled instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    pub params: Vec<String>,

    /// Slots in the frame a call pushes: parameters first, then the
    /// body-level locals. Zero for `main`, which enters its scopes itself.
    pub frame_size: usize,

    /// Opcodes interleaved with their operands.
    pub code: Vec<i32>,

    /// Per-scope address ranges and slot names, for disassembly.
    pub scopes: Vec<ScopeInfo>,

    /// Names of the compile-time scopes enclosing the definition site,
    /// outermost first.
    pub enclosing: Vec<Vec<String>>,
}

impl CodeObject {
    pub fn new(name: impl Into<String>) -> Self {
        CodeObject {
            name: name.into(),
            params: Vec::new(),
            frame_size: 0,
            code: Vec::new(),
            scopes: Vec::new(),
            enclosing: Vec::new(),
        }
    }

    /// Names of the scopes live at `addr`, outermost first, ending with the
    /// innermost scope.
    pub fn scope_chain_at(&self, addr: usize) -> Vec<&[String]> {
        let mut active: Vec<&ScopeInfo> = self
            .scopes
            .iter()
            .filter(|s| s.start <= addr && addr <= s.end)
            .collect();
        active.sort_by_key(|s| s.start);

        self.enclosing
            .iter()
            .map(Vec::as_slice)
            .chain(active.into_iter().map(|s| s.names.as_slice()))
            .collect()
    }
}

/// Address range `[start, end]` of a scope and the names of its slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub start: usize,
    pub end: usize,
    pub names: Vec<String>,
}

/// An entry of the constant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
    Code(CodeObject),
}

impl PartialEq for Constant {
    /// Same kind and same value. `Int(1)` and `Float(1.0)` differ.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Code(a), Constant::Code(b)) => a == b,
            _ => false,
        }
    }
}

impl Constant {
    /// The run-time value `LOAD_CONST` pushes for this constant.
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(n) => Value::Float(*n),
            Constant::Str(s) => Value::Str(s.clone()),
            Constant::Code(code) => Value::Code(std::rc::Rc::new(code.clone())),
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(n) => write!(f, "{}", Value::Float(*n)),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Code(code) => write!(f, "<code {}>", code.name),
        }
    }
}
