use crate::{
    bytecode::{
        compile_error::{CompileError, CompileErrorKind},
        ir::{CodeObject, Constant, Program, ScopeInfo},
        op::Opcode,
    },
    lang::{
        diagnostic::Span,
        native::Natives,
        node::{BinaryOp, Expr, Literal, Stmt, UnaryOp, hoisted_functions},
        program::Program as Ast,
    },
};

/// Operand written for jump targets and scope sizes not known yet.
pub const PLACEHOLDER: i32 = -1;

/// Code-object name of function literals.
pub const ANONYMOUS: &str = "<anonymous>";

/// Jumps waiting for the end and the continue target of one loop.
struct LoopContext {
    /// Compile-time scope depth when the loop body starts.
    scope_depth: usize,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// The code object being emitted, with its loop bookkeeping.
struct FunctionState {
    code: CodeObject,
    is_function: bool,
    /// Index in the scope stack of the first scope this code object owns.
    base: usize,
    loops: Vec<LoopContext>,
}

impl FunctionState {
    fn new(code: CodeObject, is_function: bool, base: usize) -> Self {
        FunctionState {
            code,
            is_function,
            base,
            loops: Vec::new(),
        }
    }
}

/// Single-pass AST to bytecode compiler.
///
/// Keeps a compile-time scope stack of names that mirrors the run-time
/// frames of the VM: a variable is addressed by `(depth from the innermost
/// scope, index within the scope)`. The outermost scope is the native
/// prelude; the program itself is compiled as a block on top of it.
pub struct Compiler {
    globals: Vec<String>,
    constants: Vec<Constant>,
    max_constants: usize,
    scopes: Vec<Vec<String>>,
    /// Per scope, the names a nested function looked up past it. Declaring
    /// one of them later in that scope would change what the function sees
    /// once it runs, so it is rejected.
    passed_over: Vec<Vec<String>>,
    current: FunctionState,
}

impl Compiler {
    pub fn new(globals: Vec<String>) -> Self {
        Self {
            globals,
            constants: Vec::new(),
            max_constants: i32::MAX as usize,
            scopes: Vec::new(),
            passed_over: Vec::new(),
            current: FunctionState::new(CodeObject::new("main"), false, 0),
        }
    }

    /// A compiler whose prelude scope holds the names of `natives`.
    pub fn with_natives(natives: &Natives) -> Self {
        Self::new(natives.names())
    }

    pub fn with_max_constants(mut self, max_constants: usize) -> Self {
        self.max_constants = max_constants;
        self
    }

    pub fn compile_program(mut self, program: &Ast) -> Result<Program, CompileError> {
        self.scopes = vec![self.globals.clone()];
        self.passed_over = vec![Vec::new()];
        self.current.code.enclosing = self.scopes.clone();

        self.compile_block(&program.statements)?;

        log::debug!(
            "compiled main: {} words, {} constants, {} globals",
            self.current.code.code.len(),
            self.constants.len(),
            self.globals.len()
        );

        Ok(Program {
            main: self.current.code,
            constants: self.constants,
            globals: self.globals,
        })
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// Adds `name` to the innermost scope and returns its slot index.
    fn define(&mut self, name: &str, span: Span) -> Result<usize, CompileError> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(CompileError::at(
                CompileErrorKind::UndefinedVariable(name.to_string()),
                span,
            ));
        };
        if scope.iter().any(|n| n == name) {
            return Err(CompileError::at(
                CompileErrorKind::Redefinition(name.to_string()),
                span,
            ));
        }
        let captured = self
            .passed_over
            .last()
            .is_some_and(|names| names.iter().any(|n| n == name));
        if captured {
            return Err(CompileError::at(
                CompileErrorKind::ShadowsCapture(name.to_string()),
                span,
            ));
        }
        scope.push(name.to_string());
        Ok(scope.len() - 1)
    }

    /// Finds `name` searching from the innermost scope outwards.
    fn resolve(&self, name: &str, span: Span) -> Result<(usize, usize), CompileError> {
        self.scopes
            .iter()
            .rev()
            .enumerate()
            .find_map(|(depth, scope)| {
                scope
                    .iter()
                    .position(|n| n == name)
                    .map(|index| (depth, index))
            })
            .ok_or_else(|| {
                CompileError::at(CompileErrorKind::UndefinedVariable(name.to_string()), span)
            })
    }

    /// Resolves a variable read or write. When the owning scope lies outside
    /// the current function, the scopes in between are marked so a later
    /// declaration there cannot shadow what the function already bound to.
    fn resolve_use(&mut self, name: &str, span: Span) -> Result<(usize, usize), CompileError> {
        let (depth, index) = self.resolve(name, span)?;
        let owner = self.scopes.len() - 1 - depth;

        for scope in owner + 1..self.current.base.min(self.passed_over.len()) {
            let names = &mut self.passed_over[scope];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        Ok((depth, index))
    }

    fn hoist(&mut self, statements: &[Stmt]) -> Result<(), CompileError> {
        for (name, span) in hoisted_functions(statements) {
            self.define(name, span)?;
        }
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn here(&self) -> usize {
        self.current.code.code.len()
    }

    /// Appends an instruction and returns the address of its opcode.
    fn emit(&mut self, op: Opcode, operands: &[i32]) -> usize {
        debug_assert_eq!(operands.len(), op.operand_count());
        let addr = self.here();
        self.current.code.code.push(op.code());
        self.current.code.code.extend_from_slice(operands);
        addr
    }

    /// Overwrites the operands of the instruction at `addr`.
    fn backpatch(&mut self, addr: usize, operands: &[i32]) {
        let start = addr + 1;
        self.current.code.code[start..start + operands.len()].copy_from_slice(operands);
    }

    /// Points the jump at `addr` to the current end of code.
    fn patch_to_here(&mut self, addr: usize) -> Result<(), CompileError> {
        let target = operand(self.here())?;
        self.backpatch(addr, &[target]);
        Ok(())
    }

    fn emit_var(&mut self, op: Opcode, (depth, index): (usize, usize)) -> Result<(), CompileError> {
        let operands = [operand(depth)?, operand(index)?];
        self.emit(op, &operands);
        Ok(())
    }

    fn add_constant(&mut self, constant: Constant) -> Result<i32, CompileError> {
        let existing = match constant {
            Constant::Code(_) => None,
            _ => self.constants.iter().position(|c| *c == constant),
        };
        let idx = match existing {
            Some(idx) => idx,
            None => {
                if self.constants.len() >= self.max_constants {
                    return Err(CompileError::new(CompileErrorKind::TooManyConstants(
                        self.max_constants,
                    )));
                }
                self.constants.push(constant);
                self.constants.len() - 1
            }
        };
        operand(idx)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Define { name, value, span } => {
                self.compile_expr(value)?;
                let index = self.define(name, *span)?;
                self.emit_var(Opcode::StoreVar, (0, index))
            }
            Stmt::Assign { name, value, span } => {
                self.compile_expr(value)?;
                let position = self.resolve_use(name, *span)?;
                self.emit_var(Opcode::StoreVar, position)
            }
            Stmt::Print(args) => {
                for arg in args {
                    self.compile_expr(arg)?;
                    self.emit(Opcode::PrintItem, &[]);
                }
                self.emit(Opcode::PrintNewline, &[]);
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(cond)?;
                let to_else = self.emit(Opcode::JmpFalse, &[PLACEHOLDER]);
                self.compile_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let to_end = self.emit(Opcode::Jmp, &[PLACEHOLDER]);
                        self.patch_to_here(to_else)?;
                        self.compile_stmt(else_branch)?;
                        self.patch_to_here(to_end)
                    }
                    None => self.patch_to_here(to_else),
                }
            }
            Stmt::While { cond, body } => self.compile_while(cond, body),
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.compile_for(init, cond, step, body),
            Stmt::Break(span) => self.compile_loop_exit("break", *span),
            Stmt::Continue(span) => self.compile_loop_exit("continue", *span),
            Stmt::Return(value, span) => {
                if !self.current.is_function {
                    return Err(CompileError::at(
                        CompileErrorKind::ReturnOutsideFunction,
                        *span,
                    ));
                }
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => {
                        self.emit(Opcode::LoadNull, &[]);
                    }
                }
                self.emit(Opcode::Return, &[]);
                Ok(())
            }
            Stmt::Block(statements) => self.compile_block(statements),
            Stmt::FunDef {
                name,
                params,
                body,
                span,
            } => {
                self.compile_function(name, params, body, *span)?;
                // the slot was created when the enclosing block hoisted it
                let position = self.resolve(name, *span)?;
                self.emit_var(Opcode::StoreVar, position)
            }
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(Opcode::Pop, &[]);
                Ok(())
            }
        }
    }

    /// Emits `ENTER_SCOPE`, runs `body` in a fresh compile-time scope, then
    /// emits `LEAVE_SCOPE` and backpatches the slot count.
    fn scoped<F>(&mut self, body: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        let enter = self.emit(Opcode::EnterScope, &[PLACEHOLDER]);
        self.scopes.push(Vec::new());
        self.passed_over.push(Vec::new());

        let result = body(self);
        self.passed_over.pop();
        let names = self.scopes.pop().unwrap_or_default();
        result?;

        let leave = self.emit(Opcode::LeaveScope, &[]);
        self.backpatch(enter, &[operand(names.len())?]);
        self.current.code.scopes.push(ScopeInfo {
            start: enter,
            end: leave,
            names,
        });
        Ok(())
    }

    fn compile_block(&mut self, statements: &[Stmt]) -> Result<(), CompileError> {
        self.scoped(|c| {
            c.hoist(statements)?;
            statements.iter().try_for_each(|stmt| c.compile_stmt(stmt))
        })
    }

    fn compile_while(&mut self, cond: &Expr, body: &Stmt) -> Result<(), CompileError> {
        let top = self.here();
        self.compile_expr(cond)?;
        let to_end = self.emit(Opcode::JmpFalse, &[PLACEHOLDER]);

        self.enter_loop();
        self.compile_stmt(body)?;
        self.emit(Opcode::Jmp, &[operand(top)?]);

        let end = self.here();
        self.patch_to_here(to_end)?;
        self.leave_loop(end, top)
    }

    fn compile_for(
        &mut self,
        init: &Stmt,
        cond: &Expr,
        step: &Stmt,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        self.scoped(|c| {
            c.hoist(std::slice::from_ref(init))?;
            c.compile_stmt(init)?;

            let top = c.here();
            c.compile_expr(cond)?;
            let to_end = c.emit(Opcode::JmpFalse, &[PLACEHOLDER]);

            c.enter_loop();
            c.compile_stmt(body)?;
            let step_addr = c.here();
            c.compile_stmt(step)?;
            c.emit(Opcode::Jmp, &[operand(top)?]);

            let end = c.here();
            c.patch_to_here(to_end)?;
            c.leave_loop(end, step_addr)
        })
    }

    fn enter_loop(&mut self) {
        let scope_depth = self.scopes.len();
        self.current.loops.push(LoopContext {
            scope_depth,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    /// Patches the pending `break`s to `end` and `continue`s to `next`.
    fn leave_loop(&mut self, end: usize, next: usize) -> Result<(), CompileError> {
        let Some(ctx) = self.current.loops.pop() else {
            return Ok(());
        };
        let (end, next) = (operand(end)?, operand(next)?);
        for addr in ctx.breaks {
            self.backpatch(addr, &[end]);
        }
        for addr in ctx.continues {
            self.backpatch(addr, &[next]);
        }
        Ok(())
    }

    /// `break` / `continue`: leave every scope opened inside the loop body,
    /// then jump to a target patched when the loop finishes.
    fn compile_loop_exit(&mut self, keyword: &'static str, span: Span) -> Result<(), CompileError> {
        let Some(scope_depth) = self.current.loops.last().map(|l| l.scope_depth) else {
            return Err(CompileError::at(
                CompileErrorKind::OutsideLoop(keyword),
                span,
            ));
        };

        for _ in scope_depth..self.scopes.len() {
            self.emit(Opcode::LeaveScope, &[]);
        }
        let jump = self.emit(Opcode::Jmp, &[PLACEHOLDER]);

        if let Some(ctx) = self.current.loops.last_mut() {
            if keyword == "break" {
                ctx.breaks.push(jump);
            } else {
                ctx.continues.push(jump);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Compiles a function body into its own code object, adds it to the
    /// pool and emits `LOAD_CONST idx; MAKE_CLOSURE`.
    fn compile_function(
        &mut self,
        name: &str,
        params: &[String],
        body: &[Stmt],
        span: Span,
    ) -> Result<(), CompileError> {
        let mut code = CodeObject::new(name);
        code.params = params.to_vec();
        code.enclosing = self.scopes.clone();

        let base = self.scopes.len();
        let outer = std::mem::replace(&mut self.current, FunctionState::new(code, true, base));
        self.scopes.push(Vec::new());
        self.passed_over.push(Vec::new());

        let result = self.compile_function_body(params, body, span);

        self.passed_over.pop();
        let names = self.scopes.pop().unwrap_or_default();
        let mut function = std::mem::replace(&mut self.current, outer).code;
        result?;

        function.frame_size = names.len();
        function.scopes.push(ScopeInfo {
            start: 0,
            end: function.code.len(),
            names,
        });
        log::debug!(
            "compiled function '{}': {} words, frame size {}",
            function.name,
            function.code.len(),
            function.frame_size
        );

        let idx = self.add_constant(Constant::Code(function))?;
        self.emit(Opcode::LoadConst, &[idx]);
        self.emit(Opcode::MakeClosure, &[]);
        Ok(())
    }

    fn compile_function_body(
        &mut self,
        params: &[String],
        body: &[Stmt],
        span: Span,
    ) -> Result<(), CompileError> {
        for param in params {
            self.define(param, span)?;
        }
        self.hoist(body)?;
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        self.emit(Opcode::LoadNull, &[]);
        self.emit(Opcode::Return, &[]);
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(literal) => self.compile_literal(literal),
            Expr::Id { name, span } => {
                let position = self.resolve_use(name, *span)?;
                self.emit_var(Opcode::LoadVar, position)
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::UnaryNeg,
                    UnaryOp::Not => Opcode::UnaryNot,
                };
                self.emit(opcode, &[]);
                Ok(())
            }
            Expr::Binary { op, left, right } => self.compile_binary(*op, left, right),
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                self.compile_expr(cond)?;
                let to_else = self.emit(Opcode::JmpFalse, &[PLACEHOLDER]);
                self.compile_expr(then_expr)?;
                let to_end = self.emit(Opcode::Jmp, &[PLACEHOLDER]);
                self.patch_to_here(to_else)?;
                self.compile_expr(else_expr)?;
                self.patch_to_here(to_end)
            }
            Expr::Fun { params, body } => {
                self.compile_function(ANONYMOUS, params, body, Span::default())
            }
            Expr::Call { callee, args, .. } => {
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Opcode::CallFunction, &[operand(args.len())?]);
                Ok(())
            }
        }
    }

    fn compile_literal(&mut self, literal: &Literal) -> Result<(), CompileError> {
        let constant = match literal {
            Literal::Int(n) => Constant::Int(*n),
            Literal::Float(n) => Constant::Float(*n),
            Literal::Str(s) => Constant::Str(s.clone()),
            Literal::True => {
                self.emit(Opcode::LoadTrue, &[]);
                return Ok(());
            }
            Literal::False => {
                self.emit(Opcode::LoadFalse, &[]);
                return Ok(());
            }
            Literal::Null => {
                self.emit(Opcode::LoadNull, &[]);
                return Ok(());
            }
        };
        let idx = self.add_constant(constant)?;
        self.emit(Opcode::LoadConst, &[idx]);
        Ok(())
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        let opcode = match op {
            BinaryOp::And | BinaryOp::Or => return self.compile_short_circuit(op, left, right),
            // `a > b` is `b < a` and `a <= b` is `b >= a`
            BinaryOp::Gt | BinaryOp::Le => {
                self.compile_expr(right)?;
                self.compile_expr(left)?;
                let opcode = if op == BinaryOp::Gt {
                    Opcode::BinaryLt
                } else {
                    Opcode::BinaryGe
                };
                self.emit(opcode, &[]);
                return Ok(());
            }
            BinaryOp::Add => Opcode::BinaryAdd,
            BinaryOp::Sub => Opcode::BinarySub,
            BinaryOp::Mul => Opcode::BinaryMul,
            BinaryOp::Div => Opcode::BinaryDiv,
            BinaryOp::Mod => Opcode::BinaryMod,
            BinaryOp::Pow => Opcode::BinaryPow,
            BinaryOp::Eq => Opcode::BinaryEq,
            BinaryOp::Ne => Opcode::BinaryNe,
            BinaryOp::Lt => Opcode::BinaryLt,
            BinaryOp::Ge => Opcode::BinaryGe,
        };
        self.compile_expr(left)?;
        self.compile_expr(right)?;
        self.emit(opcode, &[]);
        Ok(())
    }

    /// `l && r`: `l; JMP_FALSE a; r; JMP b; a: LOAD_FALSE; b:`
    /// `l || r`: `l; JMP_TRUE a; r; JMP b; a: LOAD_TRUE; b:`
    fn compile_short_circuit(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CompileError> {
        let (test, constant) = if op == BinaryOp::And {
            (Opcode::JmpFalse, Opcode::LoadFalse)
        } else {
            (Opcode::JmpTrue, Opcode::LoadTrue)
        };

        self.compile_expr(left)?;
        let to_short = self.emit(test, &[PLACEHOLDER]);
        self.compile_expr(right)?;
        let to_end = self.emit(Opcode::Jmp, &[PLACEHOLDER]);
        self.patch_to_here(to_short)?;
        self.emit(constant, &[]);
        self.patch_to_here(to_end)
    }
}

fn operand(value: usize) -> Result<i32, CompileError> {
    i32::try_from(value).map_err(|_| CompileError::new(CompileErrorKind::OperandOverflow(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{lexer::Lexer, parser::Parser};

    fn parse(source: &str) -> Ast {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn compile(source: &str) -> Program {
        Compiler::new(Vec::new())
            .compile_program(&parse(source))
            .unwrap()
    }

    fn compile_err(source: &str) -> CompileError {
        Compiler::new(Vec::new())
            .compile_program(&parse(source))
            .unwrap_err()
    }

    fn function_code(program: &Program, idx: usize) -> &CodeObject {
        match &program.constants[idx] {
            Constant::Code(code) => code,
            other => panic!("expected code constant, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_define() {
        let program = compile("var x = 1;");
        assert_eq!(program.main.code, vec![13, 1, 1, 0, 6, 0, 0, 14]);
        assert_eq!(program.constants, vec![Constant::Int(1)]);
        assert_eq!(program.main.scopes[0].names, vec!["x".to_string()]);
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let program = compile("print(1, 1, 1.0, \"a\", \"a\", 1.0);");
        assert_eq!(
            program.constants,
            vec![
                Constant::Int(1),
                Constant::Float(1.0),
                Constant::Str("a".into())
            ]
        );
    }

    #[test]
    fn test_greater_than_swaps_operands() {
        let program = compile("var a = 1; var b = 2; print(a > b);");
        assert_eq!(
            program.main.code,
            vec![
                13, 2, // ENTER_SCOPE 2
                1, 0, 6, 0, 0, // a = 1
                1, 1, 6, 0, 1, // b = 2
                5, 0, 1, // LOAD_VAR b
                5, 0, 0, // LOAD_VAR a
                119, // BINARY_LT
                7, 8, 14,
            ]
        );
    }

    #[test]
    fn test_short_circuit_and_layout() {
        let program = compile("print(true && false);");
        assert_eq!(
            program.main.code,
            vec![13, 0, 3, 11, 8, 4, 9, 9, 4, 7, 8, 14]
        );
    }

    #[test]
    fn test_break_leaves_inner_scopes() {
        let program = compile("while (true) { var a = 1; break; }");
        assert_eq!(
            program.main.code,
            vec![
                13, 0, // program block
                3, 11, 18, // top: LOAD_TRUE; JMP_FALSE end
                13, 1, 1, 0, 6, 0, 0, // { var a = 1;
                14, 9, 18, // break: LEAVE_SCOPE; JMP end
                14, // }
                9, 2, // JMP top
                14, // end: LEAVE_SCOPE
            ]
        );
    }

    #[test]
    fn test_continue_in_for_targets_step() {
        let program = compile("for (var i = 0; i < 3; i = i + 1;) { continue; }");
        let code = &program.main.code;
        // ENTER_SCOPE for the loop scope right after the program block's
        assert_eq!(&code[..4], &[13, 0, 13, 1]);
        let scope = program
            .main
            .scopes
            .iter()
            .find(|s| s.names == vec!["i".to_string()])
            .unwrap();
        assert_eq!(code[scope.end], Opcode::LeaveScope.code());

        // the continue jump lands on the step: LOAD_VAR i; LOAD_CONST 1
        let continue_jump = code
            .windows(3)
            .position(|w| w == [14, 9, w[2]] && w[2] != PLACEHOLDER)
            .unwrap();
        let target = code[continue_jump + 2] as usize;
        assert_eq!(&code[target..target + 5], &[5, 0, 0, 1, 2]);
    }

    #[test]
    fn test_no_unpatched_jumps_in_nested_control_flow() {
        let program = compile(
            "var x = 0;
             for (var i = 0; i < 10; i = i + 1;) {
                 while (x < 5 && i > 2 || false) {
                     if (x == 3) { x = x + 2; continue; } else { x = x + 1; }
                     if (x > 100) break;
                 }
                 x = i > 5 ? x : -x;
             }",
        );
        let code = &program.main.code;
        let mut pc = 0;
        while pc < code.len() {
            let op = Opcode::from_i32(code[pc]).unwrap();
            if op.is_jump() || op == Opcode::EnterScope {
                assert_ne!(code[pc + 1], PLACEHOLDER, "placeholder at {}", pc);
            }
            pc += op.width();
        }
        assert_eq!(pc, code.len());
    }

    #[test]
    fn test_shadowing_in_inner_block_is_allowed() {
        let program = compile("var x = 1; { var x = 2; print(x); } print(x);");
        assert_eq!(program.main.scopes.len(), 2);
    }

    #[test]
    fn test_redefinition_error() {
        let err = compile_err("var x = 1; var x = 2;");
        assert_eq!(err.kind, CompileErrorKind::Redefinition("x".into()));
        assert_eq!(err.span, Some(Span::new(1, 16)));
    }

    #[test]
    fn test_undefined_variable_error() {
        let err = compile_err("print(y);");
        assert_eq!(err.kind, CompileErrorKind::UndefinedVariable("y".into()));
        assert_eq!(err.span, Some(Span::new(1, 7)));
    }

    #[test]
    fn test_break_outside_loop() {
        let err = compile_err("if (true) { break; }");
        assert_eq!(err.kind, CompileErrorKind::OutsideLoop("break"));
    }

    #[test]
    fn test_loop_does_not_extend_into_function() {
        let err = compile_err("while (true) { fun f() { continue; } }");
        assert_eq!(err.kind, CompileErrorKind::OutsideLoop("continue"));
    }

    #[test]
    fn test_return_outside_function() {
        let err = compile_err("return 1;");
        assert_eq!(err.kind, CompileErrorKind::ReturnOutsideFunction);
        assert_eq!(err.span, Some(Span::new(1, 1)));
    }

    #[test]
    fn test_function_code_object() {
        let program = compile("fun f(a) { return a; }");
        assert_eq!(program.main.code, vec![13, 1, 1, 0, 20, 6, 0, 0, 14]);

        let f = function_code(&program, 0);
        assert_eq!(f.name, "f");
        assert_eq!(f.params, vec!["a".to_string()]);
        assert_eq!(f.frame_size, 1);
        assert_eq!(f.code, vec![5, 0, 0, 22, 2, 22]);
        assert_eq!(f.enclosing, vec![vec![], vec!["f".to_string()]]);
    }

    #[test]
    fn test_free_variables_resolve_into_enclosing_frames() {
        let program = compile("var x = 1; fun f() { var y = 2; return x + y; }");
        let f = function_code(&program, 2);
        // f's frame holds y; x is slot 1 of the program block (after f)
        assert_eq!(
            f.code,
            vec![1, 1, 6, 0, 0, 5, 1, 1, 5, 0, 0, 111, 22, 2, 22]
        );
        assert_eq!(f.frame_size, 1);
    }

    #[test]
    fn test_declaration_after_capturing_function_is_rejected() {
        let err = compile_err("var x = 1; { fun f() { return x; } var x = 2; print(f()); }");
        assert_eq!(err.kind, CompileErrorKind::ShadowsCapture("x".into()));
        assert_eq!(err.span, Some(Span::new(1, 40)));

        // assignments and nested functions look past the block too
        let err = compile_err(
            "var x = 1; { fun f() { var g = fun () { x = 5; }; return g; } var x = 2; }",
        );
        assert_eq!(err.kind, CompileErrorKind::ShadowsCapture("x".into()));

        let err = Compiler::with_natives(&Natives::prelude())
            .compile_program(&parse("fun f() { return abs(-1); } var abs = 3;"))
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::ShadowsCapture("abs".into()));
    }

    #[test]
    fn test_declaration_before_function_or_elsewhere_is_allowed() {
        compile("var x = 1; { var x = 2; fun f() { return x; } print(f()); }");
        compile("var x = 1; { fun f() { return x; } } { var x = 2; }");
        compile("var x = 1; fun f() { var x = 2; return x; }");
        compile("fun f() { return 1; } { var y = 0; print(y); var z = y; }");
    }

    #[test]
    fn test_mutual_recursion_via_hoisting() {
        let program = compile(
            "fun even(n) { return n == 0 ? true : odd(n - 1); }
             fun odd(n) { return n == 0 ? false : even(n - 1); }",
        );
        assert_eq!(program.functions().count(), 2);
    }

    #[test]
    fn test_duplicate_function_names_in_block() {
        let err = compile_err("fun f() {} fun f() {}");
        assert_eq!(err.kind, CompileErrorKind::Redefinition("f".into()));
    }

    #[test]
    fn test_natives_live_in_the_prelude_scope() {
        let natives = Natives::prelude();
        let program = Compiler::with_natives(&natives)
            .compile_program(&parse("print(abs(-1));"))
            .unwrap();
        assert_eq!(program.globals, natives.names());
        // LOAD_VAR 1 0 reaches abs through the program block
        assert_eq!(&program.main.code[2..5], &[5, 1, 0]);
    }

    #[test]
    fn test_too_many_constants() {
        let err = Compiler::new(Vec::new())
            .with_max_constants(1)
            .compile_program(&parse("print(1, 2);"))
            .unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::TooManyConstants(1));
    }
}
