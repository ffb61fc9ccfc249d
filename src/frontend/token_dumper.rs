use std::fmt::Write;

use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

/// Renders a token stream for `--tokens`.
pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints `tag:value` instead of Debug
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: false,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn debug_repr(mut self) -> Self {
        self.show_debug_repr = true;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Spanned]) -> String {
        let mut out = String::new();
        for s in tokens {
            self.render_one(&mut out, s);
        }
        out
    }

    fn render_one(&self, out: &mut String, s: &Spanned) {
        let kind = Self::kind(&s.token);
        let colr = if self.color { Self::color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let text = if self.show_debug_repr {
            format!("{:?}", s.token)
        } else {
            match &s.token {
                Token::Ident(name) => format!("id:{}", name),
                Token::Integer(n) => format!("num:{}", n),
                Token::Float(n) => format!("num:{}", n),
                Token::String(v) => format!("str:{:?}", v),
                other => other.tag().to_string(),
            }
        };

        // Writing into a String cannot fail.
        let _ = writeln!(
            out,
            "[{:02}:{:02}] {}{:<8} {}{}",
            s.span.line, s.span.col, colr, kind, text, reset
        );
    }

    fn kind(t: &Token) -> &'static str {
        use Token::*;
        match t {
            Eof => "EOF",
            Integer(_) | Float(_) => "NUM",
            String(_) => "STRING",
            Ident(_) => "IDENT",
            LParen | RParen | LBrace | RBrace | Comma | Semicolon => "PUNCT",
            Plus | Minus | Star | Slash | Percent | Caret | Assign | Question | Colon => "OP",
            EqEq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",
            AndAnd | OrOr | Bang => "LOGIC",
            _ => "KEYWORD",
        }
    }

    fn color(t: &Token) -> &'static str {
        use Token::*;
        match t {
            Eof => Self::DIM,
            String(_) => Self::GRN,
            Integer(_) | Float(_) => Self::CYN,
            Ident(_) => Self::YEL,
            LParen | RParen | LBrace | RBrace | Comma | Semicolon => Self::DIM,
            Var | Print | If | Else | While | For | Break | Continue | Return | Fun | True
            | False | Null => Self::BLU,
            _ => Self::MAG,
        }
    }
}
