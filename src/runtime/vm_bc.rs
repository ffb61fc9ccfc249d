use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::bytecode::ir::{CodeObject, Constant, Program};
use crate::bytecode::op::Opcode;
use crate::lang::native::Natives;
use crate::lang::node::{BinaryOp, UnaryOp};
use crate::lang::value::{self, Closure, ClosureBody, Frame, Value};
use crate::runtime::DEFAULT_MAX_CALL_DEPTH;
use crate::runtime::runtime_error::{RuntimeError, RuntimeErrorKind};

#[derive(Debug, Clone)]
pub struct VmBcConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
}

impl Default for VmBcConfig {
    fn default() -> Self {
        VmBcConfig {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: None,
            max_stack_size: 10_000,
        }
    }
}

/// Execution state of one code object.
struct CallFrame {
    code: Rc<CodeObject>,
    pc: usize,
    /// Run-time scope stack, outermost first.
    scopes: Vec<Frame>,
    /// Operand stack height when the call started.
    stack_base: usize,
}

/// Stack-based bytecode VM.
///
/// Keeps an operand stack, a call stack and, per call, a scope stack of
/// shared frames whose shape matches what the compiler laid out.
pub struct VmBc<W: Write = io::Stdout> {
    stack: Vec<Value>,
    calls: Vec<CallFrame>,
    constants: Vec<Value>,
    natives: Natives,
    out: W,
    config: VmBcConfig,
    steps: usize,
}

impl VmBc<io::Stdout> {
    pub fn new(natives: &Natives) -> Self {
        Self::with_writer(natives, io::stdout())
    }
}

impl<W: Write> VmBc<W> {
    pub fn with_writer(natives: &Natives, out: W) -> Self {
        VmBc {
            stack: Vec::new(),
            calls: Vec::new(),
            constants: Vec::new(),
            natives: natives.clone(),
            out,
            config: VmBcConfig::default(),
            steps: 0,
        }
    }

    pub fn with_config(mut self, config: VmBcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    pub fn into_writer(self) -> W {
        self.out
    }

    pub fn reset_execution_state(&mut self) {
        self.stack.clear();
        self.calls.clear();
        self.steps = 0;
    }

    pub fn run_compiled(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.reset_execution_state();
        self.constants = program.constants.iter().map(Constant::to_value).collect();

        let globals = program
            .globals
            .iter()
            .map(|name| {
                self.natives
                    .get(name)
                    .map(|native| Value::Native(native.clone()))
                    .ok_or_else(|| RuntimeError::vm(RuntimeErrorKind::UnboundNative(name.clone())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let main = CallFrame {
            code: Rc::new(program.main.clone()),
            pc: 0,
            scopes: vec![Rc::new(RefCell::new(globals))],
            stack_base: 0,
        };

        let result = self.execute(main);
        self.out
            .flush()
            .map_err(|e| RuntimeError::vm(RuntimeErrorKind::Output(e.to_string())))?;
        result.map_err(RuntimeError::vm)
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), RuntimeErrorKind> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeErrorKind::StepLimitExceeded(max));
            }
        }

        if self.stack.len() > self.config.max_stack_size {
            return Err(RuntimeErrorKind::StackLimitExceeded(
                self.config.max_stack_size,
            ));
        }

        Ok(())
    }

    fn execute(&mut self, mut frame: CallFrame) -> Result<(), RuntimeErrorKind> {
        loop {
            let at = frame.pc;
            let word = frame.code.code.get(at).copied();
            let Some(word) = word else {
                // off the end: main finishes, functions return null
                match self.calls.pop() {
                    None => return Ok(()),
                    Some(caller) => {
                        self.stack.truncate(frame.stack_base);
                        frame = caller;
                        self.push(Value::Null);
                        continue;
                    }
                }
            };

            self.check_limits()?;

            let op = Opcode::from_i32(word).ok_or(RuntimeErrorKind::UnknownOpcode { opcode: word, at })?;
            let mut operands = [0i32; 2];
            let count = op.operand_count();
            let slice = frame
                .code
                .code
                .get(at + 1..at + 1 + count)
                .ok_or(RuntimeErrorKind::TruncatedInstruction(at))?;
            operands[..count].copy_from_slice(slice);
            frame.pc = at + op.width();

            log::trace!(
                "{:>4} {:<14} {:?} stack={} scopes={}",
                at,
                op.mnemonic(),
                &operands[..count],
                self.stack.len(),
                frame.scopes.len()
            );

            match op {
                Opcode::LoadConst => {
                    let value = usize::try_from(operands[0])
                        .ok()
                        .and_then(|idx| self.constants.get(idx))
                        .cloned()
                        .ok_or(RuntimeErrorKind::ConstantOutOfRange(operands[0]))?;
                    self.push(value);
                }
                Opcode::LoadNull => self.push(Value::Null),
                Opcode::LoadTrue => self.push(Value::Bool(true)),
                Opcode::LoadFalse => self.push(Value::Bool(false)),

                Opcode::LoadVar => {
                    let scope = scope_at(&frame.scopes, operands[0])?;
                    let value = {
                        let slots = scope.borrow();
                        slot_index(&slots, operands[1]).map(|i| slots[i].clone())?
                    };
                    self.push(value);
                }
                Opcode::StoreVar => {
                    let value = self.pop()?;
                    let scope = scope_at(&frame.scopes, operands[0])?;
                    let mut slots = scope.borrow_mut();
                    let i = slot_index(&slots, operands[1])?;
                    slots[i] = value;
                }

                Opcode::PrintItem => {
                    let value = self.pop()?;
                    self.write(&format!("{} ", value))?;
                }
                Opcode::PrintNewline => self.write("\n")?,

                Opcode::Jmp => frame.pc = jump_target(&frame.code, operands[0], at)?,
                Opcode::JmpTrue => {
                    let target = jump_target(&frame.code, operands[0], at)?;
                    if self.pop()?.is_true() {
                        frame.pc = target;
                    }
                }
                Opcode::JmpFalse => {
                    let target = jump_target(&frame.code, operands[0], at)?;
                    if self.pop()?.is_false() {
                        frame.pc = target;
                    }
                }

                Opcode::Pop => {
                    self.pop()?;
                }

                Opcode::EnterScope => {
                    let size = usize::try_from(operands[0])
                        .map_err(|_| RuntimeErrorKind::InvalidScopeSize(operands[0]))?;
                    frame
                        .scopes
                        .push(Rc::new(RefCell::new(vec![Value::Null; size])));
                }
                Opcode::LeaveScope => {
                    frame
                        .scopes
                        .pop()
                        .ok_or(RuntimeErrorKind::ScopeOutOfRange { depth: 0, height: 0 })?;
                }

                Opcode::MakeClosure => {
                    let code = match self.pop()? {
                        Value::Code(code) => code,
                        other => {
                            return Err(RuntimeErrorKind::TypeError(format!(
                                "MAKE_CLOSURE expects code, got {}",
                                other.type_name()
                            )));
                        }
                    };
                    self.push(Value::Closure(Rc::new(Closure {
                        name: Some(code.name.clone()),
                        params: code.params.clone(),
                        body: ClosureBody::Compiled {
                            code,
                            captured: frame.scopes.clone(),
                        },
                    })));
                }
                Opcode::CallFunction => {
                    let argc = usize::try_from(operands[0])
                        .map_err(|_| RuntimeErrorKind::StackUnderflow)?;
                    // callee sits below its arguments
                    if argc >= self.stack.len() {
                        return Err(RuntimeErrorKind::StackUnderflow);
                    }
                    let args = self.stack.split_off(self.stack.len() - argc);
                    let callee = self.pop()?;

                    if let Some(callee_frame) = self.enter_call(&callee, args)? {
                        self.calls.push(std::mem::replace(&mut frame, callee_frame));
                    }
                }
                Opcode::Return => {
                    let result = self.pop()?;
                    let caller = self
                        .calls
                        .pop()
                        .ok_or(RuntimeErrorKind::ReturnOutsideFunction)?;
                    self.stack.truncate(frame.stack_base);
                    frame = caller;
                    self.push(result);
                }

                Opcode::UnaryNeg => self.unary(UnaryOp::Neg)?,
                Opcode::UnaryNot => self.unary(UnaryOp::Not)?,

                Opcode::BinaryAdd => self.binary(BinaryOp::Add)?,
                Opcode::BinarySub => self.binary(BinaryOp::Sub)?,
                Opcode::BinaryMul => self.binary(BinaryOp::Mul)?,
                Opcode::BinaryDiv => self.binary(BinaryOp::Div)?,
                Opcode::BinaryMod => self.binary(BinaryOp::Mod)?,
                Opcode::BinaryPow => self.binary(BinaryOp::Pow)?,
                Opcode::BinaryEq => self.binary(BinaryOp::Eq)?,
                Opcode::BinaryNe => self.binary(BinaryOp::Ne)?,
                Opcode::BinaryLt => self.binary(BinaryOp::Lt)?,
                Opcode::BinaryGe => self.binary(BinaryOp::Ge)?,
            }
        }
    }

    /// Calls natives in place; for closures, returns the frame to switch to.
    fn enter_call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
    ) -> Result<Option<CallFrame>, RuntimeErrorKind> {
        let closure = match callee {
            Value::Closure(closure) => closure,
            Value::Native(native) => {
                log::debug!("call native '{}' with {} argument(s)", native.name, args.len());
                let result = native.call(&args)?;
                self.push(result);
                return Ok(None);
            }
            other => return Err(RuntimeErrorKind::NotCallable(other.type_name())),
        };

        let ClosureBody::Compiled { code, captured } = &closure.body else {
            return Err(RuntimeErrorKind::NotCallable("evaluator function"));
        };

        if closure.params.len() != args.len() {
            return Err(RuntimeErrorKind::ArityMismatch {
                name: closure.display_name().to_string(),
                expected: closure.params.len(),
                got: args.len(),
            });
        }

        if self.calls.len() + 1 > self.config.max_call_depth {
            return Err(RuntimeErrorKind::CallDepthExceeded(
                self.config.max_call_depth,
            ));
        }

        if code.frame_size < args.len() {
            return Err(RuntimeErrorKind::SlotOutOfRange {
                index: i32::try_from(args.len()).unwrap_or(i32::MAX),
                size: code.frame_size,
            });
        }
        let mut slots = args;
        slots.resize(code.frame_size, Value::Null);

        log::debug!(
            "call '{}' depth {} frame size {}",
            closure.display_name(),
            self.calls.len() + 1,
            code.frame_size
        );

        let mut scopes = captured.clone();
        scopes.push(Rc::new(RefCell::new(slots)));
        Ok(Some(CallFrame {
            code: code.clone(),
            pc: 0,
            scopes,
            stack_base: self.stack.len(),
        }))
    }

    fn unary(&mut self, op: UnaryOp) -> Result<(), RuntimeErrorKind> {
        let operand = self.pop()?;
        let result = value::unary(op, &operand)?;
        self.push(result);
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp) -> Result<(), RuntimeErrorKind> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = value::binary(op, &left, &right)?;
        self.push(result);
        Ok(())
    }

    fn write(&mut self, text: &str) -> Result<(), RuntimeErrorKind> {
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| RuntimeErrorKind::Output(e.to_string()))
    }

    // Stack operations

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeErrorKind> {
        self.stack.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }
}

/// The frame `depth` levels below the innermost one.
fn scope_at(scopes: &[Frame], depth: i32) -> Result<&Frame, RuntimeErrorKind> {
    let out_of_range = || RuntimeErrorKind::ScopeOutOfRange {
        depth,
        height: scopes.len(),
    };
    let depth = usize::try_from(depth).map_err(|_| out_of_range())?;
    let index = scopes
        .len()
        .checked_sub(depth + 1)
        .ok_or_else(out_of_range)?;
    Ok(&scopes[index])
}

fn slot_index(slots: &[Value], index: i32) -> Result<usize, RuntimeErrorKind> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < slots.len())
        .ok_or(RuntimeErrorKind::SlotOutOfRange {
            index,
            size: slots.len(),
        })
}

fn jump_target(code: &CodeObject, target: i32, at: usize) -> Result<usize, RuntimeErrorKind> {
    usize::try_from(target)
        .ok()
        .filter(|t| *t <= code.code.len())
        .ok_or(RuntimeErrorKind::BadJumpTarget { target, at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::frontend::{lexer::Lexer, parser::Parser};

    // ============================================================
    // Test Helpers
    // ============================================================

    /// A program whose main code is `code`, with no natives.
    fn program_from_code(code: Vec<i32>, constants: Vec<Constant>) -> Program {
        let mut main = CodeObject::new("main");
        main.code = code;
        Program {
            main,
            constants,
            globals: Vec::new(),
        }
    }

    /// Run raw code and return what it printed
    fn run_code(code: Vec<i32>, constants: Vec<Constant>) -> Result<String, RuntimeError> {
        let mut vm = VmBc::with_writer(&Natives::new(), Vec::new());
        vm.run_compiled(&program_from_code(code, constants))?;
        Ok(String::from_utf8(vm.into_writer()).unwrap())
    }

    fn assert_code_error(code: Vec<i32>, expected: RuntimeErrorKind) {
        match run_code(code, vec![Constant::Int(0)]) {
            Ok(out) => panic!("expected {:?}, got output {:?}", expected, out),
            Err(e) => assert_eq!(e.kind, expected),
        }
    }

    fn compile(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let ast = Parser::new(tokens).parse().unwrap();
        Compiler::with_natives(&Natives::prelude())
            .compile_program(&ast)
            .unwrap()
    }

    fn run_source_with(source: &str, config: VmBcConfig) -> Result<String, RuntimeError> {
        let mut vm = VmBc::with_writer(&Natives::prelude(), Vec::new()).with_config(config);
        vm.run_compiled(&compile(source))?;
        assert!(vm.stack().is_empty(), "operand stack not balanced");
        Ok(String::from_utf8(vm.into_writer()).unwrap())
    }

    fn assert_output(source: &str, expected: &str) {
        let out = run_source_with(source, VmBcConfig::default()).expect("execution should succeed");
        assert_eq!(out, expected);
    }

    // ============================================================
    // Raw instructions
    // ============================================================

    #[test]
    fn test_load_const_and_print() {
        let out = run_code(vec![1, 0, 7, 8], vec![Constant::Int(42)]).unwrap();
        assert_eq!(out, "42 \n");
    }

    #[test]
    fn test_binary_pops_right_then_left() {
        let out = run_code(
            vec![1, 0, 1, 1, 112, 7, 8],
            vec![Constant::Int(10), Constant::Int(3)],
        )
        .unwrap();
        assert_eq!(out, "7 \n");
    }

    #[test]
    fn test_jmp_false_falls_through_on_non_bool() {
        // LOAD_CONST 0; JMP_FALSE 7; LOAD_TRUE; PRINT_ITEM; PRINT_NEWLINE
        let out = run_code(vec![1, 0, 11, 7, 3, 7, 8], vec![Constant::Int(0)]).unwrap();
        assert_eq!(out, "true \n");

        let out = run_code(vec![4, 11, 6, 3, 7, 8], vec![]).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn test_scopes_and_variables() {
        // ENTER_SCOPE 1; LOAD_TRUE; STORE_VAR 0 0; LOAD_VAR 0 0; PRINT_ITEM; LEAVE_SCOPE
        let out = run_code(vec![13, 1, 3, 6, 0, 0, 5, 0, 0, 7, 14], vec![]).unwrap();
        assert_eq!(out, "true ");
    }

    #[test]
    fn test_unknown_opcode() {
        assert_code_error(vec![2, 99], RuntimeErrorKind::UnknownOpcode { opcode: 99, at: 1 });
    }

    #[test]
    fn test_truncated_instruction() {
        assert_code_error(vec![5, 0], RuntimeErrorKind::TruncatedInstruction(0));
    }

    #[test]
    fn test_slot_out_of_range() {
        assert_code_error(
            vec![13, 1, 5, 0, 3],
            RuntimeErrorKind::SlotOutOfRange { index: 3, size: 1 },
        );
    }

    #[test]
    fn test_scope_out_of_range() {
        assert_code_error(
            vec![5, 2, 0],
            RuntimeErrorKind::ScopeOutOfRange {
                depth: 2,
                height: 1,
            },
        );
    }

    #[test]
    fn test_constant_out_of_range() {
        assert_code_error(vec![1, 5], RuntimeErrorKind::ConstantOutOfRange(5));
    }

    #[test]
    fn test_unpatched_jump() {
        assert_code_error(
            vec![9, -1],
            RuntimeErrorKind::BadJumpTarget { target: -1, at: 0 },
        );
    }

    #[test]
    fn test_unpatched_scope_size() {
        assert_code_error(vec![13, -1], RuntimeErrorKind::InvalidScopeSize(-1));
    }

    #[test]
    fn test_stack_underflow() {
        assert_code_error(vec![12], RuntimeErrorKind::StackUnderflow);
        assert_code_error(vec![111], RuntimeErrorKind::StackUnderflow);
    }

    #[test]
    fn test_layout_errors_are_reported_by_the_vm() {
        let err = run_code(vec![99], vec![]).unwrap_err();
        assert!(err.kind.is_layout_error());
        assert_eq!(err.to_string(), "cilly vm : unknown opcode 99 at 0");
    }

    #[test]
    fn test_unbound_native() {
        let mut program = program_from_code(vec![], vec![]);
        program.globals = vec!["missing".into()];
        let mut vm = VmBc::with_writer(&Natives::prelude(), Vec::new());
        let err = vm.run_compiled(&program).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::UnboundNative("missing".into()));
    }

    // ============================================================
    // Compiled programs
    // ============================================================

    #[test]
    fn test_sum_loop() {
        assert_output(
            "var sum=0; var i=1; while(i<=100){ sum=sum+i; i=i+1; } print(sum);",
            "5050 \n",
        );
    }

    #[test]
    fn test_ternary_and_power() {
        assert_output("var x=-5; var y = x>0 ? x : -x; print(y);", "5 \n");
        assert_output("print(2 ^ 3 ^ 2);", "512 \n");
    }

    #[test]
    fn test_block_shadowing() {
        assert_output("var x=1; { var x=2; print(x); } print(x);", "2 \n1 \n");
    }

    #[test]
    fn test_short_circuit() {
        assert_output("print(false && (1/0), true || (1/0));", "false true \n");
        assert_output("print(1 && 2, null || \"r\");", "2 r \n");
    }

    #[test]
    fn test_function_falls_off_end_returns_null() {
        assert_output("fun f() { var a = 1; } print(f());", "null \n");
    }

    #[test]
    fn test_closures_share_captured_frames() {
        assert_output(
            "fun counter() {
                 var n = 0;
                 return fun () { n = n + 1; return n; };
             }
             var c = counter();
             var d = counter();
             c(); c();
             print(c(), d());",
            "3 1 \n",
        );
    }

    #[test]
    fn test_recursion() {
        assert_output(
            "fun fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); } print(fib(15));",
            "610 \n",
        );
    }

    #[test]
    fn test_return_from_inside_loop_and_blocks() {
        assert_output(
            "fun find(limit) {
                 for (var i = 0; i < 100; i = i + 1;) {
                     { var sq = i * i; if (sq > limit) { return i; } }
                 }
                 return -1;
             }
             print(find(50), find(100000));",
            "8 -1 \n",
        );
    }

    #[test]
    fn test_break_continue_in_nested_scopes() {
        assert_output(
            "var total = 0;
             for (var i = 0; i < 10; i = i + 1;) {
                 var j = i;
                 { var k = j; if (k % 2 == 0) { continue; } if (k > 7) { break; } }
                 total = total + j;
             }
             print(total);",
            "16 \n",
        );
    }

    #[test]
    fn test_natives() {
        assert_output("print(abs(-3), sqrt(16), len(\"héllo\"));", "3 4.0 5 \n");
    }

    #[test]
    fn test_arity_mismatch() {
        let err = run_source_with("fun f(a) { return a; } f();", VmBcConfig::default()).unwrap_err();
        assert_eq!(
            err.kind,
            RuntimeErrorKind::ArityMismatch {
                name: "f".into(),
                expected: 1,
                got: 0,
            }
        );
    }

    #[test]
    fn test_not_callable() {
        let err = run_source_with("var s = \"x\"; s(1);", VmBcConfig::default()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::NotCallable("string"));
    }

    #[test]
    fn test_call_depth_limit() {
        let config = VmBcConfig {
            max_call_depth: 50,
            ..VmBcConfig::default()
        };
        let err = run_source_with("fun f(n) { return f(n + 1); } f(0);", config).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::CallDepthExceeded(50));
    }

    #[test]
    fn test_step_limit() {
        let config = VmBcConfig {
            max_steps: Some(1000),
            ..VmBcConfig::default()
        };
        let err = run_source_with("while (true) {}", config).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StepLimitExceeded(1000));
    }

    #[test]
    fn test_division_by_zero() {
        let err = run_source_with("print(1 % 0);", VmBcConfig::default()).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
    }
}
