use super::diagnostic::Span;

/// Literal values as they appear in source.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer literal: `42`.
    Int(i64),

    /// Float literal: `3.5`, `1.`.
    Float(f64),

    /// String literal: `"hello"`.
    Str(String),

    True,
    False,
    Null,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation: `-x`.
    Neg,

    /// Logical negation: `!x`.
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// Infix operators.
///
/// `And` and `Or` short-circuit; every other operator evaluates both
/// operands left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// Exponentiation, right-associative: `2 ^ 3 ^ 2 == 2 ^ 9`.
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Expression nodes. Every expression produces exactly one value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // ───────────────────────────── Literals ─────────────────────────────
    /// `num`, `str`, `true`, `false` or `null`.
    Literal(Literal),

    /// Variable reference.
    Id { name: String, span: Span },

    // ───────────────────────────── Operators ────────────────────────────
    /// `-e`, `!e`
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// `l op r`
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `cond ? then_expr : else_expr`
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },

    // ───────────────────────────── Functions ────────────────────────────
    /// Anonymous function literal: `fun (a, b) { ... }`.
    Fun { params: Vec<String>, body: Vec<Stmt> },

    /// `callee(args...)`
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    /// The node-kind tag of this expression.
    pub fn tag(&self) -> &'static str {
        match self {
            Expr::Literal(Literal::Int(_)) | Expr::Literal(Literal::Float(_)) => "num",
            Expr::Literal(Literal::Str(_)) => "str",
            Expr::Literal(Literal::True) => "true",
            Expr::Literal(Literal::False) => "false",
            Expr::Literal(Literal::Null) => "null",
            Expr::Id { .. } => "id",
            Expr::Unary { .. } => "unary",
            Expr::Binary { .. } => "binary",
            Expr::Ternary { .. } => "ternary",
            Expr::Fun { .. } => "fun",
            Expr::Call { .. } => "call",
        }
    }
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `var name = value;`
    Define {
        name: String,
        value: Expr,
        span: Span,
    },

    /// `name = value;`
    Assign {
        name: String,
        value: Expr,
        span: Span,
    },

    /// `print(a, b, ...);`
    Print(Vec<Expr>),

    /// `if (cond) then_branch else else_branch`
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// `while (cond) body`
    While { cond: Expr, body: Box<Stmt> },

    /// `for (init cond; step) body`
    ///
    /// The header holds three statements; `cond` is the expression of the
    /// middle one. Variables declared by `init` live in the loop's own scope.
    For {
        init: Box<Stmt>,
        cond: Expr,
        step: Box<Stmt>,
        body: Box<Stmt>,
    },

    Break(Span),
    Continue(Span),

    /// `return value?;`
    Return(Option<Expr>, Span),

    /// `{ statements... }`
    Block(Vec<Stmt>),

    /// Named function declaration: `fun name(params) { body }`.
    ///
    /// The name is visible in the whole enclosing block, so functions may
    /// reference each other before their declaration runs.
    FunDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        span: Span,
    },

    /// `expr;`
    Expr(Expr),
}

impl Stmt {
    /// The node-kind tag of this statement.
    pub fn tag(&self) -> &'static str {
        match self {
            Stmt::Define { .. } => "define",
            Stmt::Assign { .. } => "assign",
            Stmt::Print(_) => "print",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::For { .. } => "for",
            Stmt::Break(_) => "break",
            Stmt::Continue(_) => "continue",
            Stmt::Return(..) => "return",
            Stmt::Block(_) => "block",
            Stmt::FunDef { .. } => "fun_def",
            Stmt::Expr(_) => "expr_stat",
        }
    }
}

/// Names declared by the `fun_def` statements directly inside `statements`,
/// with the span of each declaration.
pub fn hoisted_functions(statements: &[Stmt]) -> impl Iterator<Item = (&str, Span)> {
    statements.iter().filter_map(|stmt| match stmt {
        Stmt::FunDef { name, span, .. } => Some((name.as_str(), *span)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_tags() {
        assert_eq!(Expr::Literal(Literal::Int(1)).tag(), "num");
        assert_eq!(Expr::Literal(Literal::Float(1.5)).tag(), "num");
        assert_eq!(Expr::Literal(Literal::Str("s".into())).tag(), "str");
        assert_eq!(Expr::Literal(Literal::Null).tag(), "null");
        let call = Expr::Call {
            callee: Box::new(Expr::Id {
                name: "f".into(),
                span: Span::new(1, 1),
            }),
            args: vec![],
            span: Span::new(1, 2),
        };
        assert_eq!(call.tag(), "call");
    }

    #[test]
    fn test_statement_tags() {
        assert_eq!(Stmt::Block(vec![]).tag(), "block");
        assert_eq!(Stmt::Break(Span::default()).tag(), "break");
        assert_eq!(Stmt::Expr(Expr::Literal(Literal::True)).tag(), "expr_stat");
    }

    #[test]
    fn test_hoisted_functions_only_direct_children() {
        let inner = Stmt::FunDef {
            name: "inner".into(),
            params: vec![],
            body: vec![],
            span: Span::new(2, 5),
        };
        let statements = vec![
            Stmt::FunDef {
                name: "outer".into(),
                params: vec![],
                body: vec![],
                span: Span::new(1, 1),
            },
            Stmt::Block(vec![inner]),
        ];
        let names: Vec<_> = hoisted_functions(&statements).map(|(n, _)| n).collect();
        assert_eq!(names, vec!["outer"]);
    }
}
