use super::lexer::Spanned;
use super::parser_error::ParserError;
use super::token::Token;
use crate::lang::diagnostic::Span;
use crate::lang::node::{BinaryOp, Expr, Literal, Stmt, UnaryOp};
use crate::lang::program::Program;

/// Binding power of prefix operands of `-` and `!`.
const UNARY_POWER: u8 = 85;

/// Binding powers `(left, right)` of infix operators.
///
/// An infix operator binds while its left power is greater than the
/// minimum power of the expression being parsed. `^` has a right power
/// lower than its left power, which makes it right-associative.
fn infix_power(token: &Token) -> Option<(u8, u8)> {
    let power = match token {
        Token::LParen => (90, 91),
        Token::Caret => (88, 87),
        Token::Star | Token::Slash | Token::Percent => (80, 81),
        Token::Plus | Token::Minus => (70, 71),
        Token::Gt | Token::GtEq | Token::Lt | Token::LtEq => (60, 61),
        Token::EqEq | Token::NotEq => (50, 51),
        Token::AndAnd => (40, 41),
        Token::OrOr => (30, 31),
        Token::Question => (20, 21),
        _ => return None,
    };
    Some(power)
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    let op = match token {
        Token::Plus => BinaryOp::Add,
        Token::Minus => BinaryOp::Sub,
        Token::Star => BinaryOp::Mul,
        Token::Slash => BinaryOp::Div,
        Token::Percent => BinaryOp::Mod,
        Token::Caret => BinaryOp::Pow,
        Token::EqEq => BinaryOp::Eq,
        Token::NotEq => BinaryOp::Ne,
        Token::Lt => BinaryOp::Lt,
        Token::LtEq => BinaryOp::Le,
        Token::Gt => BinaryOp::Gt,
        Token::GtEq => BinaryOp::Ge,
        Token::AndAnd => BinaryOp::And,
        Token::OrOr => BinaryOp::Or,
        _ => return None,
    };
    Some(op)
}

/// Recursive-descent parser for statements with a Pratt parser for
/// expressions.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Span of the most recently consumed token.
    last_span: Option<Span>,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser {
            tokens,
            pos: 0,
            last_span: None,
        }
    }

    fn current(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_next(&self) -> &Token {
        self.tokens
            .get(self.pos + 1)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.pos).cloned();
        if let Some(s) = &spanned {
            self.last_span = Some(s.span);
            self.pos += 1;
        }
        spanned
    }

    /// Span of the current token, or of the last one consumed at end of input.
    fn span(&self) -> Option<Span> {
        self.current().map(|s| s.span).or(self.last_span)
    }

    fn error(&self, message: impl Into<String>) -> ParserError {
        ParserError {
            message: message.into(),
            span: self.span(),
        }
    }

    fn found(&self) -> String {
        match self.peek() {
            Token::Eof => "end of input".to_string(),
            other => format!("'{}'", other),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<Span, ParserError> {
        if *self.peek() == expected {
            let span = self.span().unwrap_or_default();
            self.advance();
            Ok(span)
        } else {
            Err(self.error(format!(
                "expected '{}', found {}",
                expected.tag(),
                self.found()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParserError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                let span = self.span().unwrap_or_default();
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.error(format!("expected identifier, found {}", self.found()))),
        }
    }

    /// Parses a complete program, stopping at `eof`.
    pub fn parse(&mut self) -> Result<Program, ParserError> {
        let mut statements = Vec::new();
        while *self.peek() != Token::Eof {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        match self.peek() {
            Token::Var => self.parse_define(),
            Token::Ident(_) if *self.peek_next() == Token::Assign => self.parse_assign(),
            Token::Print => self.parse_print(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::For => self.parse_for(),
            Token::Break => {
                let span = self.expect(Token::Break)?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Break(span))
            }
            Token::Continue => {
                let span = self.expect(Token::Continue)?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Continue(span))
            }
            Token::Return => self.parse_return(),
            Token::Fun if matches!(self.peek_next(), Token::Ident(_)) => self.parse_fun_def(),
            Token::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            _ => {
                let expr = self.expr(0)?;
                self.expect(Token::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_define(&mut self) -> Result<Stmt, ParserError> {
        self.expect(Token::Var)?;
        let (name, span) = self.expect_ident()?;
        self.expect(Token::Assign)?;
        let value = self.expr(0)?;
        self.expect(Token::Semicolon)?;
        Ok(Stmt::Define { name, value, span })
    }

    fn parse_assign(&mut self) -> Result<Stmt, ParserError> {
        let (name, span) = self.expect_ident()?;
        self.expect(Token::Assign)?;
        let value = self.expr(0)?;
        self.expect(Token::Semicolon)?;
        Ok(Stmt::Assign { name, value, span })
    }

    fn parse_print(&mut self) -> Result<Stmt, ParserError> {
        self.expect(Token::Print)?;
        self.expect(Token::LParen)?;
        let args = self.parse_args()?;
        self.expect(Token::Semicolon)?;
        Ok(Stmt::Print(args))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParserError> {
        self.expect(Token::If)?;
        let cond = self.parse_condition()?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if *self.peek() == Token::Else {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParserError> {
        self.expect(Token::While)?;
        let cond = self.parse_condition()?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While { cond, body })
    }

    /// `for ( init cond; step ) body` where all three header parts are
    /// statements and `cond` must be an expression statement.
    fn parse_for(&mut self) -> Result<Stmt, ParserError> {
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;
        let init = Box::new(self.parse_statement()?);

        let cond_span = self.span();
        let cond = match self.parse_statement()? {
            Stmt::Expr(expr) => expr,
            other => {
                return Err(ParserError {
                    message: format!(
                        "for-loop condition must be an expression, found '{}' statement",
                        other.tag()
                    ),
                    span: cond_span,
                });
            }
        };

        let step = Box::new(self.parse_statement()?);
        self.expect(Token::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParserError> {
        let span = self.expect(Token::Return)?;
        let value = if *self.peek() == Token::Semicolon {
            None
        } else {
            Some(self.expr(0)?)
        };
        self.expect(Token::Semicolon)?;
        Ok(Stmt::Return(value, span))
    }

    fn parse_fun_def(&mut self) -> Result<Stmt, ParserError> {
        self.expect(Token::Fun)?;
        let (name, span) = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Stmt::FunDef {
            name,
            params,
            body,
            span,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParserError> {
        self.expect(Token::LBrace)?;
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Token::RBrace => break,
                Token::Eof => return Err(self.error("unexpected end of input, expected '}'")),
                _ => statements.push(self.parse_statement()?),
            }
        }
        self.expect(Token::RBrace)?;
        Ok(statements)
    }

    fn parse_condition(&mut self) -> Result<Expr, ParserError> {
        self.expect(Token::LParen)?;
        let cond = self.expr(0)?;
        self.expect(Token::RParen)?;
        Ok(cond)
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParserError> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                let (name, _) = self.expect_ident()?;
                params.push(name);
                if *self.peek() != Token::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RParen)?;
        Ok(params)
    }

    /// Comma-separated expressions up to and including the closing `)`.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParserError> {
        let mut args = Vec::new();
        if *self.peek() != Token::RParen {
            loop {
                args.push(self.expr(0)?);
                if *self.peek() != Token::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Parses an expression whose infix operators all bind tighter than `bp`.
    fn expr(&mut self, bp: u8) -> Result<Expr, ParserError> {
        let mut left = self.prefix()?;

        loop {
            let Some((l_bp, r_bp)) = infix_power(self.peek()) else {
                break;
            };
            if l_bp <= bp {
                break;
            }

            let span = self.span().unwrap_or_default();
            let token = self.peek().clone();
            self.advance();

            left = match token {
                Token::LParen => Expr::Call {
                    callee: Box::new(left),
                    args: self.parse_args()?,
                    span,
                },
                Token::Question => {
                    let then_expr = self.expr(0)?;
                    self.expect(Token::Colon)?;
                    let else_expr = self.expr(r_bp)?;
                    Expr::Ternary {
                        cond: Box::new(left),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                    }
                }
                other => match binary_op(&other) {
                    Some(op) => Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(self.expr(r_bp)?),
                    },
                    None => {
                        return Err(ParserError {
                            message: format!("unexpected operator '{}'", other),
                            span: Some(span),
                        });
                    }
                },
            };
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ParserError> {
        let span = self.span().unwrap_or_default();
        let expr = match self.peek().clone() {
            Token::Integer(n) => {
                self.advance();
                Expr::Literal(Literal::Int(n))
            }
            Token::Float(n) => {
                self.advance();
                Expr::Literal(Literal::Float(n))
            }
            Token::String(s) => {
                self.advance();
                Expr::Literal(Literal::Str(s))
            }
            Token::True => {
                self.advance();
                Expr::Literal(Literal::True)
            }
            Token::False => {
                self.advance();
                Expr::Literal(Literal::False)
            }
            Token::Null => {
                self.advance();
                Expr::Literal(Literal::Null)
            }
            Token::Ident(name) => {
                self.advance();
                Expr::Id { name, span }
            }
            Token::LParen => {
                self.advance();
                let inner = self.expr(0)?;
                self.expect(Token::RParen)?;
                inner
            }
            Token::Minus | Token::Bang => {
                let op = if *self.peek() == Token::Minus {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Not
                };
                self.advance();
                Expr::Unary {
                    op,
                    operand: Box::new(self.expr(UNARY_POWER)?),
                }
            }
            Token::Fun => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                Expr::Fun { params, body }
            }
            _ => return Err(self.error(format!("unexpected {} in expression", self.found()))),
        };
        Ok(expr)
    }
}
