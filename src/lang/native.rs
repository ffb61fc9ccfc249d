use std::rc::Rc;

use super::value::Value;
use crate::runtime::runtime_error::RuntimeErrorKind;

/// Signature of a host function callable from cilly code.
///
/// Receives the evaluated argument values; an `Err` message aborts the
/// program with a native-call error.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, String>;

/// A named host function.
pub struct NativeFunction {
    pub name: String,
    /// Expected argument count, or `None` for variadic functions.
    pub arity: Option<usize>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeErrorKind> {
        if let Some(expected) = self.arity {
            if expected != args.len() {
                return Err(RuntimeErrorKind::ArityMismatch {
                    name: self.name.clone(),
                    expected,
                    got: args.len(),
                });
            }
        }

        (self.func)(args).map_err(|message| RuntimeErrorKind::Native {
            name: self.name.clone(),
            message,
        })
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Ordered table of host functions injected into the outermost scope of
/// both backends.
///
/// The order is significant for the bytecode backend: it is the slot layout
/// of the prelude frame.
#[derive(Debug, Clone, Default)]
pub struct Natives {
    entries: Vec<Rc<NativeFunction>>,
}

impl Natives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Natives::register`].
    pub fn with<F>(mut self, name: &str, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        self.register(name, arity, func);
        self
    }

    /// Adds a function, replacing any earlier entry with the same name.
    pub fn register<F>(&mut self, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        let native = Rc::new(NativeFunction {
            name: name.to_string(),
            arity,
            func: Rc::new(func),
        });

        match self.entries.iter_mut().find(|n| n.name == name) {
            Some(slot) => *slot = native,
            None => self.entries.push(native),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Rc<NativeFunction>> {
        self.entries.iter().find(|n| n.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|n| n.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<NativeFunction>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The small set of helpers the command-line runner installs.
    pub fn prelude() -> Self {
        Natives::new()
            .with("abs", Some(1), |args| match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| "integer overflow".to_string()),
                Value::Float(n) => Ok(Value::Float(n.abs())),
                other => Err(format!("expected number, got {}", other.type_name())),
            })
            .with("sqrt", Some(1), |args| match &args[0] {
                Value::Int(n) => Ok(Value::Float((*n as f64).sqrt())),
                Value::Float(n) => Ok(Value::Float(n.sqrt())),
                other => Err(format!("expected number, got {}", other.type_name())),
            })
            .with("len", Some(1), |args| match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(format!("expected string, got {}", other.type_name())),
            })
            .with("str", Some(1), |args| Ok(Value::Str(args[0].to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces_existing() {
        let natives = Natives::new()
            .with("f", Some(0), |_| Ok(Value::Int(1)))
            .with("g", Some(0), |_| Ok(Value::Int(2)))
            .with("f", Some(0), |_| Ok(Value::Int(3)));

        assert_eq!(natives.names(), vec!["f".to_string(), "g".to_string()]);
        let f = natives.get("f").unwrap();
        assert_eq!(f.call(&[]), Ok(Value::Int(3)));
    }

    #[test]
    fn test_arity_is_checked() {
        let natives = Natives::prelude();
        let abs = natives.get("abs").unwrap();
        let err = abs.call(&[]).unwrap_err();
        assert!(matches!(err, RuntimeErrorKind::ArityMismatch { expected: 1, got: 0, .. }));
    }

    #[test]
    fn test_native_failure_is_wrapped() {
        let natives = Natives::prelude();
        let len = natives.get("len").unwrap();
        let err = len.call(&[Value::Int(3)]).unwrap_err();
        assert!(matches!(err, RuntimeErrorKind::Native { ref name, .. } if name == "len"));
    }

    #[test]
    fn test_prelude_helpers() {
        let natives = Natives::prelude();
        assert_eq!(
            natives.get("abs").unwrap().call(&[Value::Int(-4)]),
            Ok(Value::Int(4))
        );
        assert_eq!(
            natives.get("str").unwrap().call(&[Value::Float(2.0)]),
            Ok(Value::Str("2.0".into()))
        );
        assert_eq!(
            natives.get("len").unwrap().call(&[Value::Str("héllo".into())]),
            Ok(Value::Int(5))
        );
    }
}
