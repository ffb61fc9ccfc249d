//! Source text to AST: tokens, lexer, Pratt parser and the token dumper.

pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod token;
pub mod token_dumper;
