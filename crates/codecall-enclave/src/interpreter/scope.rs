//! Lexical scopes as an index-based arena.
//!
//! Frames are pushed and popped in strict stack order as evaluation enters
//! and leaves blocks and calls. A frame captured by a closure must outlive
//! its block, so popping only marks it dead; storage is reclaimed from the
//! top of the arena whenever the trailing frames are dead and uncaptured.

use std::collections::HashMap;

use super::value::Value;

/// Index of a frame in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
    initialized: bool,
}

#[derive(Debug)]
struct Frame<'a> {
    parent: Option<ScopeId>,
    bindings: HashMap<&'a str, Binding>,
    captured: bool,
    dead: bool,
}

/// Why a binding operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingError {
    /// No binding with this name is visible.
    Undeclared,
    /// The binding exists but its declaration has not run yet.
    Uninitialized,
    /// Assignment to a `const` binding.
    Constant,
}

/// The arena.
#[derive(Debug, Default)]
pub struct Scopes<'a> {
    frames: Vec<Frame<'a>>,
}

impl<'a> Scopes<'a> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Push a new frame.
    pub fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.frames.push(Frame {
            parent,
            bindings: HashMap::new(),
            captured: false,
            dead: false,
        });
        ScopeId(self.frames.len() - 1)
    }

    /// Leave a frame.
    pub fn pop(&mut self, id: ScopeId) {
        if let Some(frame) = self.frames.get_mut(id.0) {
            frame.dead = true;
        }
        while self
            .frames
            .last()
            .is_some_and(|frame| frame.dead && !frame.captured)
        {
            self.frames.pop();
        }
    }

    /// Keep `id` and all of its ancestors alive for a closure.
    pub fn capture(&mut self, id: ScopeId) {
        let mut current = Some(id);
        while let Some(ScopeId(index)) = current {
            let frame = &mut self.frames[index];
            if frame.captured {
                break;
            }
            frame.captured = true;
            current = frame.parent;
        }
    }

    pub fn is_captured(&self, id: ScopeId) -> bool {
        self.frames[id.0].captured
    }

    /// Copy a frame's bindings into a fresh sibling frame. Used to give each
    /// `for` iteration its own `let` bindings once a closure has seen them.
    pub fn fork(&mut self, id: ScopeId) -> ScopeId {
        let parent = self.frames[id.0].parent;
        let bindings = self.frames[id.0].bindings.clone();
        self.frames.push(Frame {
            parent,
            bindings,
            captured: false,
            dead: false,
        });
        ScopeId(self.frames.len() - 1)
    }

    /// Create an initialized binding in `id`, replacing any existing one.
    pub fn declare(&mut self, id: ScopeId, name: &'a str, value: Value, mutable: bool) {
        self.frames[id.0].bindings.insert(
            name,
            Binding {
                value,
                mutable,
                initialized: true,
            },
        );
    }

    /// Reserve a binding whose declaration has not been reached yet.
    pub fn hoist(&mut self, id: ScopeId, name: &'a str, mutable: bool) {
        self.frames[id.0].bindings.insert(
            name,
            Binding {
                value: Value::Undefined,
                mutable,
                initialized: false,
            },
        );
    }

    /// Whether `name` resolves from `id`.
    pub fn is_declared(&self, id: ScopeId, name: &str) -> bool {
        self.resolve(id, name).is_some()
    }

    pub fn get(&self, id: ScopeId, name: &str) -> Result<Value, BindingError> {
        let scope = self.resolve(id, name).ok_or(BindingError::Undeclared)?;
        let binding = &self.frames[scope.0].bindings[name];
        if !binding.initialized {
            return Err(BindingError::Uninitialized);
        }
        Ok(binding.value.clone())
    }

    pub fn set(&mut self, id: ScopeId, name: &str, value: Value) -> Result<(), BindingError> {
        let scope = self.resolve(id, name).ok_or(BindingError::Undeclared)?;
        let binding = self.frames[scope.0]
            .bindings
            .get_mut(name)
            .ok_or(BindingError::Undeclared)?;
        if !binding.initialized {
            return Err(BindingError::Uninitialized);
        }
        if !binding.mutable {
            return Err(BindingError::Constant);
        }
        binding.value = value;
        Ok(())
    }

    fn resolve(&self, id: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(id);
        while let Some(scope) = current {
            let frame = &self.frames[scope.0];
            if frame.bindings.contains_key(name) {
                return Some(scope);
            }
            current = frame.parent;
        }
        None
    }

    /// Live frames in the arena.
    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parents() {
        let mut scopes = Scopes::new();
        let root = scopes.push(None);
        scopes.declare(root, "a", Value::Number(1.0), false);
        let child = scopes.push(Some(root));
        assert!(matches!(scopes.get(child, "a"), Ok(Value::Number(n)) if n == 1.0));
        assert_eq!(scopes.get(child, "b").unwrap_err(), BindingError::Undeclared);
    }

    #[test]
    fn const_and_tdz() {
        let mut scopes = Scopes::new();
        let root = scopes.push(None);
        scopes.declare(root, "c", Value::Null, false);
        scopes.hoist(root, "l", true);
        assert_eq!(
            scopes.set(root, "c", Value::Null).unwrap_err(),
            BindingError::Constant
        );
        assert_eq!(scopes.get(root, "l").unwrap_err(), BindingError::Uninitialized);
        scopes.declare(root, "l", Value::Bool(true), true);
        assert!(scopes.set(root, "l", Value::Bool(false)).is_ok());
    }

    #[test]
    fn captured_frames_survive_pop() {
        let mut scopes = Scopes::new();
        let root = scopes.push(None);
        let block = scopes.push(Some(root));
        scopes.declare(block, "x", Value::Number(7.0), false);
        scopes.capture(block);
        scopes.pop(block);
        assert_eq!(scopes.len(), 2);
        assert!(scopes.get(block, "x").is_ok());

        let other = scopes.push(Some(root));
        scopes.pop(other);
        assert_eq!(scopes.len(), 2);
    }

    #[test]
    fn fork_copies_bindings() {
        let mut scopes = Scopes::new();
        let root = scopes.push(None);
        let iter = scopes.push(Some(root));
        scopes.declare(iter, "i", Value::Number(0.0), true);
        let next = scopes.fork(iter);
        scopes.set(next, "i", Value::Number(1.0)).unwrap();
        assert!(matches!(scopes.get(iter, "i"), Ok(Value::Number(n)) if n == 0.0));
        assert!(matches!(scopes.get(next, "i"), Ok(Value::Number(n)) if n == 1.0));
    }
}
