use std::io::{self, Write};
use std::rc::Rc;

use crate::lang::{
    native::Natives,
    node::{BinaryOp, Expr, Literal, Stmt, hoisted_functions},
    program::Program,
    value::{self, Closure, ClosureBody, Value},
};
use crate::runtime::DEFAULT_MAX_CALL_DEPTH;
use crate::runtime::environment::{EnvId, Environment};
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: None,
        }
    }
}

/// Native stack that must remain before another statement or expression
/// is walked; below it the walk continues on a freshly allocated segment.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_SEGMENT: usize = 2 * 1024 * 1024;

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal(Value),
    Break,
    Continue,
    Return(Value),
}

/// Tree-walking evaluator.
///
/// Walks the AST against an arena [`Environment`]; the environment survives
/// between programs so a REPL can thread one through every line.
pub struct Evaluator<W: Write = io::Stdout> {
    env: Environment,
    out: W,
    config: EvalConfig,
    call_depth: usize,
    steps: usize,
}

impl Evaluator<io::Stdout> {
    pub fn new(natives: &Natives) -> Self {
        Self::with_writer(natives, io::stdout())
    }
}

impl<W: Write> Evaluator<W> {
    pub fn with_writer(natives: &Natives, out: W) -> Self {
        Evaluator {
            env: Environment::new(natives),
            out,
            config: EvalConfig::default(),
            call_depth: 0,
            steps: 0,
        }
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    /// Continues in an environment left by an earlier run.
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn into_environment(self) -> Environment {
        self.env
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    pub fn into_writer(self) -> W {
        self.out
    }

    /// Runs `program` in the global frame and returns the value of its last
    /// statement.
    pub fn eval_program(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        self.call_depth = 0;
        self.steps = 0;

        let global = self.env.global();
        self.hoist(global, &program.statements)?;

        let mut last = Value::Null;
        for stmt in &program.statements {
            match self.exec(stmt, global)? {
                Flow::Normal(value) => last = value,
                Flow::Break => return Err(err(RuntimeErrorKind::OutsideLoop("break"))),
                Flow::Continue => return Err(err(RuntimeErrorKind::OutsideLoop("continue"))),
                Flow::Return(_) => return Err(err(RuntimeErrorKind::ReturnOutsideFunction)),
            }
        }

        self.flush()?;
        Ok(last)
    }

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(err(RuntimeErrorKind::StepLimitExceeded(max)));
            }
        }
        Ok(())
    }

    fn hoist(&mut self, env: EnvId, statements: &[Stmt]) -> Result<(), RuntimeError> {
        for (name, span) in hoisted_functions(statements) {
            self.env
                .define(env, name, Value::Null)
                .map_err(|kind| err(kind).with_span(span))?;
        }
        Ok(())
    }

    /// Runs `body` in a fresh child frame of `parent`, reclaiming the frame
    /// afterwards unless a closure captured it.
    fn in_child<T>(
        &mut self,
        parent: EnvId,
        body: impl FnOnce(&mut Self, EnvId) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let child = self.env.push(Some(parent));
        let result = body(self, child);
        self.env.release(child);
        result
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Recursion into the AST goes through here and [`Self::eval`], so deep
    /// cilly recursion grows the native stack instead of overflowing it.
    fn exec(&mut self, stmt: &Stmt, env: EnvId) -> Result<Flow, RuntimeError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.exec_stmt(stmt, env))
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: EnvId) -> Result<Flow, RuntimeError> {
        self.check_limits()?;

        match stmt {
            Stmt::Define { name, value, span } => {
                let value = self.eval(value, env)?;
                self.env
                    .define(env, name, value)
                    .map_err(|kind| err(kind).with_span(*span))?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Assign { name, value, span } => {
                let value = self.eval(value, env)?;
                self.env
                    .assign(env, name, value)
                    .map_err(|kind| err(kind).with_span(*span))?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Print(args) => {
                for arg in args {
                    let value = self.eval(arg, env)?;
                    self.write(&format!("{} ", value))?;
                }
                self.write("\n")?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if !self.eval(cond, env)?.is_false() {
                    self.exec(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch, env)
                } else {
                    Ok(Flow::Normal(Value::Null))
                }
            }
            Stmt::While { cond, body } => {
                while !self.eval(cond, env)?.is_false() {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(_) | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.in_child(env, |this, scope| this.exec_for(init, cond, step, body, scope)),
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Return(value, _) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Block(statements) => {
                self.in_child(env, |this, scope| this.exec_block(statements, scope))
            }
            Stmt::FunDef {
                name,
                params,
                body,
                span,
            } => {
                let closure = self.make_closure(Some(name.clone()), params, body, env);
                self.env
                    .assign(env, name, closure)
                    .map_err(|kind| err(kind).with_span(*span))?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Expr(expr) => Ok(Flow::Normal(self.eval(expr, env)?)),
        }
    }

    /// Hoists and runs `statements` in `env`, stopping at the first
    /// statement that does not finish normally.
    fn exec_block(&mut self, statements: &[Stmt], env: EnvId) -> Result<Flow, RuntimeError> {
        self.hoist(env, statements)?;
        let mut last = Value::Null;
        for stmt in statements {
            match self.exec(stmt, env)? {
                Flow::Normal(value) => last = value,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn exec_for(
        &mut self,
        init: &Stmt,
        cond: &Expr,
        step: &Stmt,
        body: &Stmt,
        env: EnvId,
    ) -> Result<Flow, RuntimeError> {
        self.hoist(env, std::slice::from_ref(init))?;
        match self.exec(init, env)? {
            Flow::Normal(_) => {}
            other => return Ok(other),
        }

        while !self.eval(cond, env)?.is_false() {
            match self.exec(body, env)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal(_) | Flow::Continue => {}
            }
            match self.exec(step, env)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal(_) | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal(Value::Null))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn eval(&mut self, expr: &Expr, env: EnvId) -> Result<Value, RuntimeError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.eval_expr(expr, env))
    }

    fn eval_expr(&mut self, expr: &Expr, env: EnvId) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(n) => Value::Float(*n),
                Literal::Str(s) => Value::Str(s.clone()),
                Literal::True => Value::Bool(true),
                Literal::False => Value::Bool(false),
                Literal::Null => Value::Null,
            }),
            Expr::Id { name, span } => self
                .env
                .get(env, name)
                .map_err(|kind| err(kind).with_span(*span)),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, env)?;
                value::unary(*op, &operand).map_err(err)
            }
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                if self.eval(left, env)?.is_false() {
                    Ok(Value::Bool(false))
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                if self.eval(left, env)?.is_true() {
                    Ok(Value::Bool(true))
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                value::binary(*op, &left, &right).map_err(err)
            }
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval(cond, env)?.is_false() {
                    self.eval(else_expr, env)
                } else {
                    self.eval(then_expr, env)
                }
            }
            Expr::Fun { params, body } => Ok(self.make_closure(None, params, body, env)),
            Expr::Call { callee, args, span } => {
                let callee = self.eval(callee, env)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&callee, args)
                    .map_err(|e| e.with_span(*span))
            }
        }
    }

    fn make_closure(
        &mut self,
        name: Option<String>,
        params: &[String],
        body: &[Stmt],
        env: EnvId,
    ) -> Value {
        self.env.mark_captured(env);
        Value::Closure(Rc::new(Closure {
            name,
            params: params.to_vec(),
            body: ClosureBody::Tree {
                body: Rc::from(body),
                env,
            },
        }))
    }

    fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let closure = match callee {
            Value::Closure(closure) => closure.clone(),
            Value::Native(native) => return native.call(&args).map_err(err),
            other => return Err(err(RuntimeErrorKind::NotCallable(other.type_name()))),
        };

        let ClosureBody::Tree { body, env } = &closure.body else {
            return Err(err(RuntimeErrorKind::NotCallable("compiled function")));
        };

        if closure.params.len() != args.len() {
            return Err(err(RuntimeErrorKind::ArityMismatch {
                name: closure.display_name().to_string(),
                expected: closure.params.len(),
                got: args.len(),
            }));
        }

        if self.call_depth >= self.config.max_call_depth {
            return Err(err(RuntimeErrorKind::CallDepthExceeded(
                self.config.max_call_depth,
            )));
        }

        self.call_depth += 1;
        let result = self.in_child(*env, |this, frame| {
            for (param, arg) in closure.params.iter().zip(args) {
                this.env.define(frame, param, arg).map_err(err)?;
            }
            this.exec_block(body, frame)
        });
        self.call_depth -= 1;

        match result? {
            Flow::Normal(_) => Ok(Value::Null),
            Flow::Return(value) => Ok(value),
            Flow::Break => Err(err(RuntimeErrorKind::OutsideLoop("break"))),
            Flow::Continue => Err(err(RuntimeErrorKind::OutsideLoop("continue"))),
        }
    }

    fn write(&mut self, text: &str) -> Result<(), RuntimeError> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| err(RuntimeErrorKind::Output(e.to_string())))
    }

    fn flush(&mut self) -> Result<(), RuntimeError> {
        self.out
            .flush()
            .map_err(|e| err(RuntimeErrorKind::Output(e.to_string())))
    }
}

fn err(kind: RuntimeErrorKind) -> RuntimeError {
    RuntimeError::eval(kind)
}
