use std::cell::RefCell;
use std::rc::Rc;

use super::native::NativeFunction;
use super::node::{BinaryOp, Stmt, UnaryOp};
use crate::bytecode::ir::CodeObject;
use crate::runtime::environment::EnvId;
use crate::runtime::runtime_error::RuntimeErrorKind;

/// A run-time scope frame of the bytecode VM.
///
/// Frames are shared because closures capture the frames that were live
/// when they were created.
pub type Frame = Rc<RefCell<Vec<Value>>>;

/// Runtime value in the cilly language.
///
/// Shared by the tree-walking evaluator and the bytecode VM.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating-point number.
    Float(f64),

    /// UTF-8 string value.
    Str(String),

    /// Boolean value.
    Bool(bool),

    Null,

    /// User function together with the scope it was created in.
    Closure(Rc<Closure>),

    /// Host function injected through a `Natives` table.
    Native(Rc<NativeFunction>),

    /// Raw compiled function code, as stored in the constant pool.
    ///
    /// `MAKE_CLOSURE` turns it into a `Closure`.
    Code(Rc<CodeObject>),
}

/// A first-class function value.
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: ClosureBody,
}

/// Backend specific half of a closure.
pub enum ClosureBody {
    /// Evaluator closure: the AST body and the environment frame it captured.
    Tree { body: Rc<[Stmt]>, env: EnvId },

    /// VM closure: compiled code and the run-time frames it captured.
    Compiled {
        code: Rc<CodeObject>,
        captured: Vec<Frame>,
    },
}

impl Closure {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

// Captured frames can contain the closure itself, so Debug stays shallow.
impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.body {
            ClosureBody::Tree { .. } => "tree",
            ClosureBody::Compiled { .. } => "compiled",
        };
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("backend", &backend)
            .finish()
    }
}

impl Value {
    /// Human-readable kind name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::Closure(_) => "function",
            Value::Native(_) => "native function",
            Value::Code(_) => "code",
        }
    }

    /// True only for the boolean `false`; conditional jumps and the
    /// evaluator's conditions branch on this exact value.
    pub fn is_false(&self) -> bool {
        matches!(self, Value::Bool(false))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }
}

/// Language-level equality used by `==` and `!=`.
///
/// Numbers compare numerically across int/float; functions compare by
/// identity; values of different kinds are never equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::Code(x), Value::Code(y)) => Rc::ptr_eq(x, y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

impl std::fmt::Display for Value {
    /// Formats a value the way `print` shows it.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Closure(c) => write!(f, "<fun {}>", c.display_name()),
            Value::Native(n) => write!(f, "<native {}>", n.name),
            Value::Code(c) => write!(f, "<code {}>", c.name),
        }
    }
}

// =============================================================================
// Operators shared by both backends
// =============================================================================

/// Applies a prefix operator.
pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, RuntimeErrorKind> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(RuntimeErrorKind::Overflow("-")),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => Err(RuntimeErrorKind::TypeError(format!(
            "cannot negate {}",
            other.type_name()
        ))),
        (UnaryOp::Not, other) => Err(RuntimeErrorKind::TypeError(format!(
            "'!' expects a bool, got {}",
            other.type_name()
        ))),
    }
}

/// Applies a strict (non short-circuit) infix operator.
///
/// `>` and `<=` are evaluated as `<` and `>=` with swapped operands so
/// that both backends report identical errors for them.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeErrorKind> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => arithmetic(op, left, right, i64::checked_add, |a, b| a + b),
        },
        BinaryOp::Sub => arithmetic(op, left, right, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(op, left, right, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => {
            check_divisor(right)?;
            arithmetic(op, left, right, i64::checked_div, |a, b| a / b)
        }
        BinaryOp::Mod => {
            check_divisor(right)?;
            arithmetic(op, left, right, i64::checked_rem, |a, b| a % b)
        }
        BinaryOp::Pow => power(left, right),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => compare(op, left, right),
        BinaryOp::Ge => compare(op, left, right),
        BinaryOp::Gt => compare(BinaryOp::Lt, right, left),
        BinaryOp::Le => compare(BinaryOp::Ge, right, left),
        BinaryOp::And | BinaryOp::Or => Err(RuntimeErrorKind::TypeError(format!(
            "'{}' is a short-circuit operator",
            op.symbol()
        ))),
    }
}

fn arithmetic(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeErrorKind> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or(RuntimeErrorKind::Overflow(op.symbol())),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
            _ => Err(operand_error(op, left, right)),
        },
    }
}

fn check_divisor(right: &Value) -> Result<(), RuntimeErrorKind> {
    match right {
        Value::Int(0) => Err(RuntimeErrorKind::DivisionByZero),
        Value::Float(n) if *n == 0.0 => Err(RuntimeErrorKind::DivisionByZero),
        _ => Ok(()),
    }
}

fn power(left: &Value, right: &Value) -> Result<Value, RuntimeErrorKind> {
    match (left, right) {
        (Value::Int(base), Value::Int(exp)) if *exp >= 0 => {
            let exact = u32::try_from(*exp)
                .ok()
                .and_then(|exp| base.checked_pow(exp));
            Ok(match exact {
                Some(n) => Value::Int(n),
                None => Value::Float((*base as f64).powf(*exp as f64)),
            })
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
            _ => Err(operand_error(BinaryOp::Pow, left, right)),
        },
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeErrorKind> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(RuntimeErrorKind::TypeError(format!(
                    "cannot compare {} and {}",
                    left.type_name(),
                    right.type_name()
                )));
            }
        },
    };

    // NaN compares false both ways
    let result = match ordering {
        Some(ordering) => match op {
            BinaryOp::Lt => ordering.is_lt(),
            _ => ordering.is_ge(),
        },
        None => false,
    };
    Ok(Value::Bool(result))
}

fn operand_error(op: BinaryOp, left: &Value, right: &Value) -> RuntimeErrorKind {
    RuntimeErrorKind::TypeError(format!(
        "unsupported operands for '{}': {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(op: BinaryOp, a: Value, b: Value) -> Result<Value, RuntimeErrorKind> {
        binary(op, &a, &b)
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(bin(BinaryOp::Add, Value::Int(2), Value::Int(3)), Ok(Value::Int(5)));
        assert!(matches!(
            bin(BinaryOp::Div, Value::Int(7), Value::Int(2)),
            Ok(Value::Int(3))
        ));
        assert!(matches!(
            bin(BinaryOp::Mod, Value::Int(7), Value::Int(3)),
            Ok(Value::Int(1))
        ));
    }

    #[test]
    fn test_mixed_arithmetic_is_float() {
        assert!(matches!(
            bin(BinaryOp::Div, Value::Int(7), Value::Float(2.0)),
            Ok(Value::Float(f)) if f == 3.5
        ));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            bin(BinaryOp::Div, Value::Int(1), Value::Int(0)),
            Err(RuntimeErrorKind::DivisionByZero)
        );
        assert_eq!(
            bin(BinaryOp::Mod, Value::Float(1.0), Value::Float(0.0)),
            Err(RuntimeErrorKind::DivisionByZero)
        );
    }

    #[test]
    fn test_power() {
        assert!(matches!(
            bin(BinaryOp::Pow, Value::Int(2), Value::Int(9)),
            Ok(Value::Int(512))
        ));
        assert!(matches!(
            bin(BinaryOp::Pow, Value::Int(2), Value::Int(-1)),
            Ok(Value::Float(f)) if f == 0.5
        ));
        assert!(matches!(
            bin(BinaryOp::Pow, Value::Int(10), Value::Int(40)),
            Ok(Value::Float(_))
        ));
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert_eq!(
            bin(BinaryOp::Mul, Value::Int(i64::MAX), Value::Int(2)),
            Err(RuntimeErrorKind::Overflow("*"))
        );
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            bin(BinaryOp::Add, Value::Str("ab".into()), Value::Str("cd".into())),
            Ok(Value::Str("abcd".into()))
        );
        assert!(matches!(
            bin(BinaryOp::Add, Value::Str("ab".into()), Value::Int(1)),
            Err(RuntimeErrorKind::TypeError(_))
        ));
    }

    #[test]
    fn test_swapped_comparisons() {
        assert_eq!(bin(BinaryOp::Gt, Value::Int(3), Value::Int(2)), Ok(Value::Bool(true)));
        assert_eq!(bin(BinaryOp::Le, Value::Int(3), Value::Int(2)), Ok(Value::Bool(false)));
        assert_eq!(bin(BinaryOp::Le, Value::Int(2), Value::Int(2)), Ok(Value::Bool(true)));
        assert_eq!(
            bin(BinaryOp::Lt, Value::Str("a".into()), Value::Str("b".into())),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn test_compare_type_error() {
        let err = bin(BinaryOp::Lt, Value::Int(1), Value::Null).unwrap_err();
        assert_eq!(
            err,
            RuntimeErrorKind::TypeError("cannot compare number and null".into())
        );
    }

    #[test]
    fn test_equality_across_kinds() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Int(1), &Value::Str("1".into())));
        assert!(values_equal(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnaryOp::Neg, &Value::Int(5)), Ok(Value::Int(-5)));
        assert_eq!(unary(UnaryOp::Not, &Value::Bool(true)), Ok(Value::Bool(false)));
        assert!(unary(UnaryOp::Not, &Value::Int(0)).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(5050).to_string(), "5050");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(3.5).to_string(), "3.5");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }
}
