use crate::lang::node::Literal;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    String(std::string::String),

    // Identifier
    Ident(std::string::String),

    // Keywords
    Var,
    Print,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Return,
    Fun,
    True,
    False,
    Null,

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    Comma,     // ,
    Semicolon, // ;

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,

    // Comparison
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Logic
    AndAnd,
    OrOr,
    Bang,

    // Other operators
    Assign,   // =
    Question, // ?
    Colon,    // :

    Eof,
}

impl Token {
    /// The fixed tag string of this token (`"id"`, `"num"`, `"var"`, `"=="`, ...).
    pub fn tag(&self) -> &'static str {
        match self {
            Token::Integer(_) | Token::Float(_) => "num",
            Token::String(_) => "str",
            Token::Ident(_) => "id",
            Token::Var => "var",
            Token::Print => "print",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::For => "for",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Return => "return",
            Token::Fun => "fun",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Assign => "=",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Eof => "eof",
        }
    }

    /// The literal value carried by `id`, `num` and `str` tokens.
    pub fn value(&self) -> Option<Literal> {
        match self {
            Token::Integer(n) => Some(Literal::Int(*n)),
            Token::Float(n) => Some(Literal::Float(*n)),
            Token::String(s) | Token::Ident(s) => Some(Literal::Str(s.clone())),
            _ => None,
        }
    }

    /// Maps an identifier to its keyword token, if it is one.
    pub fn keyword(ident: &str) -> Option<Token> {
        let token = match ident {
            "var" => Token::Var,
            "print" => Token::Print,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "return" => Token::Return,
            "fun" => Token::Fun,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => return None,
        };
        Some(token)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Ident(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.tag()),
        }
    }
}
