//! Per-run storage for arrays, objects and closures.
//!
//! Nothing is ever freed during a run; the whole heap is dropped when the
//! run ends. Growth is bounded by the interpreter's allocation budget.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::ArrowFunction;

use super::scope::ScopeId;
use super::value::{ArrayId, ClosureId, ObjId, Value};

/// Insertion-ordered string-keyed properties.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(Rc<str>, Value)>,
    index: HashMap<Rc<str>, usize>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite. Returns true when the key is new.
    pub fn insert(&mut self, key: Rc<str>, value: Value) -> bool {
        if let Some(&i) = self.index.get(&*key) {
            self.entries[i].1 = value;
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }
}

/// A script array.
#[derive(Debug, Clone, Default)]
pub struct JsArray {
    pub items: Vec<Value>,
    pub frozen: bool,
}

/// A script object.
#[derive(Debug, Clone, Default)]
pub struct JsObject {
    pub props: PropertyMap,
    pub frozen: bool,
    /// Created by `Error(...)` / `new TypeError(...)`.
    pub is_error: bool,
}

/// An arrow function together with the scope it closed over.
#[derive(Debug, Clone)]
pub struct Closure<'a> {
    pub function: &'a ArrowFunction,
    pub scope: ScopeId,
    pub name: Option<Rc<str>>,
}

/// Arena for reference values.
#[derive(Debug, Default)]
pub struct Heap<'a> {
    arrays: Vec<JsArray>,
    objects: Vec<JsObject>,
    closures: Vec<Closure<'a>>,
}

impl<'a> Heap<'a> {
    pub fn new() -> Self {
        Self {
            arrays: Vec::new(),
            objects: Vec::new(),
            closures: Vec::new(),
        }
    }

    pub fn alloc_array(&mut self, items: Vec<Value>) -> ArrayId {
        self.arrays.push(JsArray {
            items,
            frozen: false,
        });
        ArrayId(self.arrays.len() - 1)
    }

    pub fn alloc_object(&mut self, object: JsObject) -> ObjId {
        self.objects.push(object);
        ObjId(self.objects.len() - 1)
    }

    pub fn alloc_closure(&mut self, closure: Closure<'a>) -> ClosureId {
        self.closures.push(closure);
        ClosureId(self.closures.len() - 1)
    }

    pub fn array(&self, id: ArrayId) -> &JsArray {
        &self.arrays[id.0]
    }

    pub fn array_mut(&mut self, id: ArrayId) -> &mut JsArray {
        &mut self.arrays[id.0]
    }

    pub fn object(&self, id: ObjId) -> &JsObject {
        &self.objects[id.0]
    }

    pub fn object_mut(&mut self, id: ObjId) -> &mut JsObject {
        &mut self.objects[id.0]
    }

    pub fn closure(&self, id: ClosureId) -> &Closure<'a> {
        &self.closures[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_map_keeps_insertion_order() {
        let mut props = PropertyMap::new();
        assert!(props.insert("b".into(), Value::Number(1.0)));
        assert!(props.insert("a".into(), Value::Number(2.0)));
        assert!(!props.insert("b".into(), Value::Number(3.0)));
        let keys: Vec<&str> = props.keys().map(|k| &**k).collect();
        assert_eq!(keys, ["b", "a"]);
        assert!(matches!(props.get("b"), Some(Value::Number(n)) if *n == 3.0));
        assert_eq!(props.len(), 2);
    }
}
