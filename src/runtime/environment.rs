use std::collections::HashMap;

use crate::lang::native::Natives;
use crate::lang::value::Value;
use crate::runtime::runtime_error::RuntimeErrorKind;

/// Index of a frame in an [`Environment`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(usize);

#[derive(Debug)]
struct EnvFrame {
    vars: HashMap<String, Value>,
    parent: Option<EnvId>,
    /// Set once a closure holds this frame (or a descendant); such frames
    /// are never reclaimed.
    captured: bool,
}

/// Arena of evaluator scope frames.
///
/// Frames form a parent chain. The outermost frame holds the natives, the
/// frame below it is the global scope of the program. Closures refer to
/// frames by [`EnvId`]; frames no closure captured are reclaimed when the
/// block that created them exits, and their slots are reused.
#[derive(Debug)]
pub struct Environment {
    frames: Vec<Option<EnvFrame>>,
    free: Vec<usize>,
    prelude: EnvId,
    global: EnvId,
}

impl Environment {
    pub fn new(natives: &Natives) -> Self {
        let mut env = Environment {
            frames: Vec::new(),
            free: Vec::new(),
            prelude: EnvId(0),
            global: EnvId(0),
        };

        env.prelude = env.push(None);
        if let Some(frame) = env.frame_mut(env.prelude) {
            frame.captured = true;
            for native in natives.iter() {
                frame
                    .vars
                    .insert(native.name.clone(), Value::Native(native.clone()));
            }
        }

        env.global = env.push(Some(env.prelude));
        env.mark_captured(env.global);
        env
    }

    pub fn global(&self) -> EnvId {
        self.global
    }

    pub fn prelude(&self) -> EnvId {
        self.prelude
    }

    /// Creates a new frame whose parent is `parent`.
    pub fn push(&mut self, parent: Option<EnvId>) -> EnvId {
        let frame = EnvFrame {
            vars: HashMap::new(),
            parent,
            captured: false,
        };
        match self.free.pop() {
            Some(slot) => {
                self.frames[slot] = Some(frame);
                EnvId(slot)
            }
            None => {
                self.frames.push(Some(frame));
                EnvId(self.frames.len() - 1)
            }
        }
    }

    /// Reclaims `id` unless a closure captured it.
    pub fn release(&mut self, id: EnvId) {
        let reclaim = self.frame(id).is_some_and(|f| !f.captured);
        if reclaim {
            self.frames[id.0] = None;
            self.free.push(id.0);
        }
    }

    /// Pins `id` and all of its ancestors.
    pub fn mark_captured(&mut self, id: EnvId) {
        let mut current = Some(id);
        while let Some(frame) = current.and_then(|id| self.frame_mut(id)) {
            if frame.captured && current != Some(id) {
                // ancestors of a captured frame are captured already
                break;
            }
            frame.captured = true;
            current = frame.parent;
        }
    }

    /// Declares `name` in `id` itself; fails if the frame already has it.
    pub fn define(&mut self, id: EnvId, name: &str, value: Value) -> Result<(), RuntimeErrorKind> {
        let frame = self
            .frame_mut(id)
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))?;
        if frame.vars.contains_key(name) {
            return Err(RuntimeErrorKind::Redefinition(name.to_string()));
        }
        frame.vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Updates the nearest frame, from `id` outwards, that declares `name`.
    pub fn assign(&mut self, id: EnvId, name: &str, value: Value) -> Result<(), RuntimeErrorKind> {
        let owner = self
            .owner_of(id, name)
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))?;
        if let Some(slot) = self.frame_mut(owner).and_then(|f| f.vars.get_mut(name)) {
            *slot = value;
        }
        Ok(())
    }

    pub fn get(&self, id: EnvId, name: &str) -> Result<Value, RuntimeErrorKind> {
        self.owner_of(id, name)
            .and_then(|owner| self.frame(owner))
            .and_then(|f| f.vars.get(name))
            .cloned()
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))
    }

    /// Number of frames currently allocated.
    pub fn live_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }

    fn owner_of(&self, id: EnvId, name: &str) -> Option<EnvId> {
        let mut current = Some(id);
        while let Some(id) = current {
            let frame = self.frame(id)?;
            if frame.vars.contains_key(name) {
                return Some(id);
            }
            current = frame.parent;
        }
        None
    }

    fn frame(&self, id: EnvId) -> Option<&EnvFrame> {
        self.frames.get(id.0).and_then(Option::as_ref)
    }

    fn frame_mut(&mut self, id: EnvId) -> Option<&mut EnvFrame> {
        self.frames.get_mut(id.0).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new(&Natives::prelude())
    }

    #[test]
    fn test_natives_visible_from_global() {
        let env = env();
        assert!(matches!(env.get(env.global(), "abs"), Ok(Value::Native(_))));
    }

    #[test]
    fn test_define_and_shadow() {
        let mut env = env();
        let global = env.global();
        env.define(global, "x", Value::Int(1)).unwrap();

        let inner = env.push(Some(global));
        env.define(inner, "x", Value::Int(2)).unwrap();
        assert_eq!(env.get(inner, "x"), Ok(Value::Int(2)));
        assert_eq!(env.get(global, "x"), Ok(Value::Int(1)));
    }

    #[test]
    fn test_redefinition_in_same_frame() {
        let mut env = env();
        let global = env.global();
        env.define(global, "x", Value::Int(1)).unwrap();
        assert_eq!(
            env.define(global, "x", Value::Int(2)),
            Err(RuntimeErrorKind::Redefinition("x".into()))
        );
    }

    #[test]
    fn test_assign_walks_parents() {
        let mut env = env();
        let global = env.global();
        env.define(global, "x", Value::Int(1)).unwrap();
        let inner = env.push(Some(global));
        env.assign(inner, "x", Value::Int(5)).unwrap();
        assert_eq!(env.get(global, "x"), Ok(Value::Int(5)));
        assert_eq!(
            env.assign(inner, "nope", Value::Null),
            Err(RuntimeErrorKind::UndefinedVariable("nope".into()))
        );
    }

    #[test]
    fn test_released_frames_are_reused() {
        let mut env = env();
        let before = env.live_frames();
        let a = env.push(Some(env.global()));
        env.release(a);
        assert_eq!(env.live_frames(), before);
        let b = env.push(Some(env.global()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_captured_frames_survive_release() {
        let mut env = env();
        let outer = env.push(Some(env.global()));
        let inner = env.push(Some(outer));
        env.define(outer, "n", Value::Int(3)).unwrap();
        env.mark_captured(inner);

        env.release(inner);
        env.release(outer);
        assert_eq!(env.get(inner, "n"), Ok(Value::Int(3)));
    }
}
