use super::token::Token;
use crate::lang::diagnostic::{self, Component, Span};

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    pub message: String,
    pub span: Span,
}

impl LexerError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        LexerError {
            message: message.into(),
            span,
        }
    }
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&diagnostic::render(
            Component::Lexer,
            Some(self.span),
            &self.message,
        ))
    }
}

impl std::error::Error for LexerError {}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    /// Skips whitespace and `#` comments.
    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current() {
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '#' => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    let escape_span = self.span();
                    self.advance();
                    let escaped = match self.current() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('0') => '\0',
                        Some(ch) => {
                            return Err(LexerError::new(
                                format!("unknown escape sequence: \\{}", ch),
                                escape_span,
                            ));
                        }
                        None => {
                            return Err(LexerError::new("unterminated string literal", start));
                        }
                    };
                    string.push(escaped);
                    self.advance();
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(LexerError::new("unterminated string literal", start));
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        let mut digits = String::new();

        while let Some(ch) = self.current().filter(char::is_ascii_digit) {
            digits.push(ch);
            self.advance();
        }

        // `1.` is a float too
        if self.current() == Some('.') {
            digits.push('.');
            self.advance();
            while let Some(ch) = self.current().filter(char::is_ascii_digit) {
                digits.push(ch);
                self.advance();
            }
            return digits
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| LexerError::new(format!("invalid number: {}", digits), start));
        }

        digits
            .parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| LexerError::new(format!("integer literal too large: {}", digits), start))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::keyword(&ident).unwrap_or(Token::Ident(ident))
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semicolon, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Bang, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('?', _) => (Token::Question, 1),
            (':', _) => (Token::Colon, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some('"') => self.read_string()?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_identifier(),
                Some(ch) => match self.read_operator() {
                    Some(token) => token,
                    None => {
                        return Err(LexerError::new(
                            format!("illegal character '{}'", ch),
                            span,
                        ));
                    }
                },
            };

            tokens.push(Spanned { token, span });
        }

        log::debug!("lexed {} tokens", tokens.len());
        Ok(tokens)
    }
}
