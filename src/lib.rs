//! # cilly
//!
//! A small dynamically typed scripting language with two interchangeable
//! backends: a tree-walking evaluator and a compiler to a stack bytecode VM.
//!
//! ```text
//! source ──lex──▶ tokens ──parse──▶ AST ──evaluate──▶ output
//!                                    └──compile──▶ bytecode ──run──▶ output
//! ```
//!
//! Both backends print the same text for every program they both accept.

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;

use crate::bytecode::compile::Compiler;
use crate::bytecode::compile_error::CompileError;
use crate::frontend::lexer::{Lexer, LexerError, Spanned};
use crate::frontend::parser::Parser;
use crate::frontend::parser_error::ParserError;
use crate::lang::native::Natives;
use crate::lang::program::Program as Ast;
use crate::lang::value::Value;
use crate::runtime::environment::Environment;
use crate::runtime::runtime_error::RuntimeError;
use crate::runtime::vm_ast::Evaluator;
use crate::runtime::vm_bc::VmBc;

/// Any failure of the toolchain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lexer(#[from] LexerError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Codec(#[from] postcard::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn lex(source: &str) -> Result<Vec<Spanned>, Error> {
    Ok(Lexer::new(source).tokenize()?)
}

pub fn parse(tokens: Vec<Spanned>) -> Result<Ast, Error> {
    Ok(Parser::new(tokens).parse()?)
}

/// Runs `ast` with the evaluator, printing to stdout.
///
/// Passing the environment returned by an earlier call continues in the same
/// global scope; `None` starts from a fresh environment holding the
/// prelude natives. Returns the value of the last top-level statement.
pub fn evaluate(ast: &Ast, env: Option<Environment>) -> Result<(Value, Environment), Error> {
    let natives = Natives::prelude();
    let env = env.unwrap_or_else(|| Environment::new(&natives));

    let mut evaluator = Evaluator::new(&natives).with_environment(env);
    let value = evaluator.eval_program(ast)?;
    Ok((value, evaluator.into_environment()))
}

/// Compiles against the prelude natives.
pub fn compile(ast: &Ast) -> Result<bytecode::Program, Error> {
    compile_with(ast, &Natives::prelude())
}

pub fn compile_with(ast: &Ast, natives: &Natives) -> Result<bytecode::Program, Error> {
    Ok(Compiler::with_natives(natives).compile_program(ast)?)
}

/// Runs a compiled program on the VM, printing to stdout.
pub fn run(program: &bytecode::Program) -> Result<(), Error> {
    run_with(program, &Natives::prelude())
}

pub fn run_with(program: &bytecode::Program, natives: &Natives) -> Result<(), Error> {
    VmBc::new(natives).run_compiled(program)?;
    Ok(())
}
