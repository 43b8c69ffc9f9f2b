//! Value semantics: coercion, operators, property access, JSON conversion
//! and allocation accounting.

use std::cmp::Ordering;
use std::rc::Rc;

use serde_json::{Map, Value as JsonValue};

use crate::ast::BinaryOp;
use crate::ast_validator::{is_banned_global, is_banned_property};
use crate::error::{AccessKind, Budget, EnclaveError};
use crate::numeric::{array_index, number_to_string, string_to_number, to_int32, to_uint32};
use crate::sanitize::{number_to_json, MAX_JSON_DEPTH};

use super::heap::{Heap, JsObject, PropertyMap};
use super::intrinsics;
use super::value::{ArrayId, BoundMethod, Callable, ObjId, Value};
use super::{Eval, Interpreter};

/// Accounting cost of one value slot.
pub(super) const VALUE_SIZE: usize = 16;
/// Accounting cost of an array header.
pub(super) const ARRAY_OVERHEAD: usize = 32;
/// Accounting cost of an object header (also used for closures).
pub(super) const OBJECT_OVERHEAD: usize = 48;
/// Accounting cost of one object property.
pub(super) const PROPERTY_OVERHEAD: usize = 48;

/// How script values become JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum JsonMode {
    /// Results and tool arguments: cycles are dropped, depth is clamped.
    Sanitize,
    /// `JSON.stringify`: cycles and excessive depth are errors.
    Stringify,
}

pub(super) fn truthy(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

pub(super) fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Namespace(x), Value::Namespace(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => match (x, y) {
            (Callable::Closure(x), Callable::Closure(y)) => x == y,
            (Callable::Builtin(x), Callable::Builtin(y)) => x == y,
            (Callable::Method(x), Callable::Method(y)) => Rc::ptr_eq(x, y),
            _ => false,
        },
        _ => false,
    }
}

/// Equality used by `includes`: like `===` except `NaN` equals itself.
pub(super) fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

/// A short string that is not charged to the allocation budget.
pub(super) fn static_str(s: &str) -> Value {
    Value::String(Rc::from(s))
}

pub(super) fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Array or object identity, for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Array(ArrayId),
    Object(ObjId),
}

enum WalkError {
    Circular,
    TooDeep,
    Budget,
}

/// Converts script values to JSON while counting what it produces.
struct JsonWalk<'h, 'a> {
    heap: &'h Heap<'a>,
    mode: JsonMode,
    ancestors: Vec<Node>,
    used: usize,
    budget: usize,
}

impl JsonWalk<'_, '_> {
    fn value(&mut self, value: &Value, depth: usize) -> Result<Option<JsonValue>, WalkError> {
        self.used += VALUE_SIZE;
        if self.used > self.budget {
            return Err(WalkError::Budget);
        }
        let node = match value {
            Value::Undefined | Value::Function(_) | Value::Namespace(_) => return Ok(None),
            Value::Null => return Ok(Some(JsonValue::Null)),
            Value::Bool(b) => return Ok(Some(JsonValue::Bool(*b))),
            Value::Number(n) => return Ok(Some(number_to_json(*n))),
            Value::String(s) => {
                self.used += s.len();
                return Ok(Some(JsonValue::String(s.to_string())));
            }
            Value::Array(id) => Node::Array(*id),
            Value::Object(id) => Node::Object(*id),
        };

        if self.ancestors.contains(&node) {
            return match self.mode {
                JsonMode::Sanitize => Ok(None),
                JsonMode::Stringify => Err(WalkError::Circular),
            };
        }
        if depth >= MAX_JSON_DEPTH {
            return match self.mode {
                JsonMode::Sanitize => Ok(Some(JsonValue::Null)),
                JsonMode::Stringify => Err(WalkError::TooDeep),
            };
        }

        self.ancestors.push(node);
        let heap = self.heap;
        let out = match node {
            Node::Array(id) => {
                let mut items = Vec::with_capacity(heap.array(id).items.len());
                for item in &heap.array(id).items {
                    items.push(self.value(item, depth + 1)?.unwrap_or(JsonValue::Null));
                }
                JsonValue::Array(items)
            }
            Node::Object(id) => {
                let mut map = Map::new();
                for (key, item) in heap.object(id).props.iter() {
                    if let Some(json) = self.value(item, depth + 1)? {
                        self.used += key.len();
                        map.insert(key.to_string(), json);
                    }
                }
                JsonValue::Object(map)
            }
        };
        self.ancestors.pop();
        Ok(Some(out))
    }
}

impl<'a> Interpreter<'a> {
    // ── allocation ───────────────────────────────────────────────────────

    pub(super) fn check_string_length(&self, len: usize) -> Eval<()> {
        if len > self.limits.max_string_length {
            return Err(self.throw("RangeError", "Invalid string length"));
        }
        Ok(())
    }

    pub(super) fn check_array_length(&self, len: usize) -> Eval<()> {
        if len > self.limits.max_array_length {
            return Err(self.throw("RangeError", "Invalid array length"));
        }
        Ok(())
    }

    /// A string produced at runtime. Literals are not charged.
    pub(super) fn make_string(&mut self, s: String) -> Eval<Value> {
        self.check_string_length(s.len())?;
        self.charge(s.len())?;
        Ok(Value::String(Rc::from(s)))
    }

    pub(super) fn new_array(&mut self, items: Vec<Value>) -> Eval<Value> {
        self.check_array_length(items.len())?;
        self.charge(ARRAY_OVERHEAD + items.len() * VALUE_SIZE)?;
        Ok(Value::Array(self.heap.alloc_array(items)))
    }

    pub(super) fn new_object(&mut self, props: PropertyMap) -> Eval<Value> {
        self.charge(OBJECT_OVERHEAD + props.len() * PROPERTY_OVERHEAD)?;
        Ok(Value::Object(self.heap.alloc_object(JsObject {
            props,
            ..JsObject::default()
        })))
    }

    /// An `Error`-like object with `name` and `message`.
    pub(super) fn new_error_object(&mut self, name: &str, message: Value) -> Eval<Value> {
        let mut props = PropertyMap::new();
        props.insert(Rc::from("name"), static_str(name));
        props.insert(Rc::from("message"), message);
        self.charge(OBJECT_OVERHEAD + 2 * PROPERTY_OVERHEAD)?;
        Ok(Value::Object(self.heap.alloc_object(JsObject {
            props,
            frozen: false,
            is_error: true,
        })))
    }

    // ── coercion ─────────────────────────────────────────────────────────

    pub(super) fn to_number(&self, value: &Value) -> Eval<f64> {
        Ok(match value {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(_) | Value::Object(_) => string_to_number(&self.to_display(value)?),
            Value::Function(_) | Value::Namespace(_) => f64::NAN,
        })
    }

    pub(super) fn to_primitive(&self, value: &Value) -> Eval<Value> {
        match value {
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Namespace(_) => {
                Ok(Value::String(Rc::from(self.to_display(value)?)))
            }
            other => Ok(other.clone()),
        }
    }

    /// String conversion, as template literals and `+` perform it.
    pub(super) fn to_display(&self, value: &Value) -> Eval<String> {
        match value {
            Value::String(s) => Ok(s.to_string()),
            other => {
                let mut out = String::new();
                self.display_into(other, &mut out, &mut Vec::new())?;
                Ok(out)
            }
        }
    }

    fn display_into(&self, value: &Value, out: &mut String, seen: &mut Vec<ArrayId>) -> Eval<()> {
        match value {
            Value::Undefined => out.push_str("undefined"),
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&number_to_string(*n)),
            Value::String(s) => out.push_str(s),
            Value::Array(id) => {
                if seen.contains(id) {
                    return Ok(());
                }
                seen.push(*id);
                for (i, item) in self.heap.array(*id).items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if !item.is_nullish() {
                        self.display_into(item, out, seen)?;
                    }
                    self.check_string_length(out.len())?;
                }
                seen.pop();
            }
            Value::Object(id) => {
                let object = self.heap.object(*id);
                if object.is_error {
                    let name = object.props.get("name").and_then(Value::as_str).unwrap_or("Error");
                    out.push_str(name);
                    if let Some(message) = object.props.get("message").and_then(Value::as_str) {
                        if !message.is_empty() {
                            out.push_str(": ");
                            out.push_str(message);
                        }
                    }
                } else {
                    out.push_str("[object Object]");
                }
            }
            Value::Function(callable) => out.push_str(&self.function_label(callable)),
            Value::Namespace(ns) if ns.is_callable() => {
                out.push_str(&format!("function {}() {{ [native code] }}", ns.name()))
            }
            Value::Namespace(ns) => out.push_str(&format!("[object {}]", ns.name())),
        }
        self.check_string_length(out.len())
    }

    fn function_label(&self, callable: &Callable) -> String {
        match callable {
            Callable::Closure(id) => match &self.heap.closure(*id).name {
                Some(name) => format!("[Function: {name}]"),
                None => "[Function (anonymous)]".to_string(),
            },
            Callable::Builtin(builtin) => format!("[Function: {}]", builtin.name),
            Callable::Method(method) => format!("[Function: {}]", method.name),
        }
    }

    pub(super) fn to_property_key(&self, value: &Value) -> Eval<Rc<str>> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(Rc::from(number_to_string(*n))),
            other => Ok(Rc::from(self.to_display(other)?)),
        }
    }

    /// Console rendering: strings print raw at the top level, containers
    /// print as compact JSON-like text. Output is cut at a fixed size.
    pub(super) fn inspect(&self, value: &Value) -> String {
        let limit = self.limits.max_log_entry_len.saturating_mul(4).max(64);
        let mut out = String::new();
        match value {
            Value::String(s) => out.push_str(s),
            other => self.inspect_into(other, &mut out, &mut Vec::new(), limit),
        }
        if out.len() > limit {
            let mut cut = limit;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("...");
        }
        out
    }

    fn inspect_into(&self, value: &Value, out: &mut String, seen: &mut Vec<Node>, limit: usize) {
        if out.len() > limit {
            return;
        }
        match value {
            Value::String(s) => {
                out.push_str(&serde_json::to_string(&**s).unwrap_or_default());
            }
            Value::Array(id) => {
                let node = Node::Array(*id);
                if seen.contains(&node) {
                    out.push_str("[Circular]");
                    return;
                }
                seen.push(node);
                out.push('[');
                for (i, item) in self.heap.array(*id).items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.inspect_into(item, out, seen, limit);
                    if out.len() > limit {
                        break;
                    }
                }
                out.push(']');
                seen.pop();
            }
            Value::Object(id) => {
                let object = self.heap.object(*id);
                if object.is_error {
                    // Error objects hold only strings, so display cannot fail.
                    out.push_str(&self.to_display(value).unwrap_or_default());
                    return;
                }
                let node = Node::Object(*id);
                if seen.contains(&node) {
                    out.push_str("[Circular]");
                    return;
                }
                seen.push(node);
                out.push('{');
                for (i, (key, item)) in object.props.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(&**key).unwrap_or_default());
                    out.push(':');
                    self.inspect_into(item, out, seen, limit);
                    if out.len() > limit {
                        break;
                    }
                }
                out.push('}');
                seen.pop();
            }
            Value::Function(callable) => out.push_str(&self.function_label(callable)),
            Value::Namespace(ns) => out.push_str(ns.name()),
            Value::Undefined => out.push_str("undefined"),
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => out.push_str(&number_to_string(*n)),
        }
    }

    // ── operators ────────────────────────────────────────────────────────

    pub(super) fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Eval<Value> {
        let number = |n: f64| Ok(Value::Number(n));
        match op {
            BinaryOp::Add => {
                let l = self.to_primitive(left)?;
                let r = self.to_primitive(right)?;
                if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                    let l = self.to_display(&l)?;
                    let r = self.to_display(&r)?;
                    self.check_string_length(l.len() + r.len())?;
                    self.make_string(l + &r)
                } else {
                    number(self.to_number(&l)? + self.to_number(&r)?)
                }
            }
            BinaryOp::Sub => number(self.to_number(left)? - self.to_number(right)?),
            BinaryOp::Mul => number(self.to_number(left)? * self.to_number(right)?),
            BinaryOp::Div => number(self.to_number(left)? / self.to_number(right)?),
            BinaryOp::Rem => number(self.to_number(left)? % self.to_number(right)?),
            BinaryOp::Exp => number(js_pow(self.to_number(left)?, self.to_number(right)?)),
            BinaryOp::Lt => Ok(Value::Bool(self.compare(left, right)? == Some(Ordering::Less))),
            BinaryOp::Gt => Ok(Value::Bool(self.compare(left, right)? == Some(Ordering::Greater))),
            BinaryOp::LtEq => Ok(Value::Bool(matches!(
                self.compare(left, right)?,
                Some(Ordering::Less | Ordering::Equal)
            ))),
            BinaryOp::GtEq => Ok(Value::Bool(matches!(
                self.compare(left, right)?,
                Some(Ordering::Greater | Ordering::Equal)
            ))),
            BinaryOp::Eq => Ok(Value::Bool(self.loose_equals(left, right)?)),
            BinaryOp::NotEq => Ok(Value::Bool(!self.loose_equals(left, right)?)),
            BinaryOp::StrictEq => Ok(Value::Bool(strict_equals(left, right))),
            BinaryOp::StrictNotEq => Ok(Value::Bool(!strict_equals(left, right))),
            BinaryOp::BitAnd => number(f64::from(self.int32(left)? & self.int32(right)?)),
            BinaryOp::BitOr => number(f64::from(self.int32(left)? | self.int32(right)?)),
            BinaryOp::BitXor => number(f64::from(self.int32(left)? ^ self.int32(right)?)),
            BinaryOp::Shl => {
                let shift = to_uint32(self.to_number(right)?) & 31;
                number(f64::from(self.int32(left)?.wrapping_shl(shift)))
            }
            BinaryOp::Shr => {
                let shift = to_uint32(self.to_number(right)?) & 31;
                number(f64::from(self.int32(left)? >> shift))
            }
            BinaryOp::UShr => {
                let shift = to_uint32(self.to_number(right)?) & 31;
                number(f64::from(to_uint32(self.to_number(left)?) >> shift))
            }
            BinaryOp::In => {
                if !matches!(right, Value::Object(_) | Value::Array(_)) {
                    return Err(self.throw(
                        "TypeError",
                        format!("Cannot use 'in' operator to search for a key in {}", right.describe()),
                    ));
                }
                let key = self.to_property_key(left)?;
                Ok(Value::Bool(self.has_property(right, &key)))
            }
        }
    }

    fn int32(&self, value: &Value) -> Eval<i32> {
        Ok(to_int32(self.to_number(value)?))
    }

    fn compare(&self, left: &Value, right: &Value) -> Eval<Option<Ordering>> {
        let l = self.to_primitive(left)?;
        let r = self.to_primitive(right)?;
        if let (Value::String(a), Value::String(b)) = (&l, &r) {
            return Ok(Some(a.cmp(b)));
        }
        Ok(self.to_number(&l)?.partial_cmp(&self.to_number(&r)?))
    }

    pub(super) fn loose_equals(&self, left: &Value, right: &Value) -> Eval<bool> {
        Ok(match (left, right) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number(left)? == self.to_number(right)?,
            (
                Value::Array(_) | Value::Object(_),
                Value::Number(_) | Value::String(_),
            )
            | (
                Value::Number(_) | Value::String(_),
                Value::Array(_) | Value::Object(_),
            ) => {
                let l = self.to_primitive(left)?;
                let r = self.to_primitive(right)?;
                return self.loose_equals(&l, &r);
            }
            _ => strict_equals(left, right),
        })
    }

    // ── properties ───────────────────────────────────────────────────────

    /// Member names no value may expose, plus computed spellings of banned
    /// globals.
    pub(super) fn check_key(&self, key: &str, computed: bool) -> Eval<()> {
        if is_banned_property(key) {
            return Err(EnclaveError::illegal(
                AccessKind::IllegalBuiltinAccess,
                format!("access to '{key}' is not allowed"),
            ));
        }
        if computed && is_banned_global(key) {
            return Err(EnclaveError::illegal(
                AccessKind::IllegalBuiltinAccess,
                format!("computed access to '{key}' is not allowed"),
            ));
        }
        Ok(())
    }

    pub(super) fn get_property(&self, target: &Value, key: &str, computed: bool) -> Eval<Value> {
        self.check_key(key, computed)?;
        let method = |name: &'static str| {
            Ok(Value::Function(Callable::Method(Rc::new(BoundMethod {
                receiver: target.clone(),
                name,
            }))))
        };
        match target {
            Value::Undefined | Value::Null => Err(self.throw(
                "TypeError",
                format!("Cannot read properties of {} (reading '{key}')", target.describe()),
            )),
            Value::Object(id) => Ok(self
                .heap
                .object(*id)
                .props
                .get(key)
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Array(id) => {
                let items = &self.heap.array(*id).items;
                if key == "length" {
                    return Ok(Value::Number(items.len() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.get(index).cloned().unwrap_or(Value::Undefined));
                }
                match intrinsics::find_name(intrinsics::ARRAY_METHODS, key) {
                    Some(name) => method(name),
                    None => self.missing_member(target, key),
                }
            }
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map(|c| Value::String(Rc::from(c.to_string())))
                        .unwrap_or(Value::Undefined));
                }
                match intrinsics::find_name(intrinsics::STRING_METHODS, key) {
                    Some(name) => method(name),
                    None => self.missing_member(target, key),
                }
            }
            Value::Number(_) => match intrinsics::find_name(intrinsics::NUMBER_METHODS, key) {
                Some(name) => method(name),
                None => self.missing_member(target, key),
            },
            Value::Bool(_) => match intrinsics::find_name(intrinsics::BOOLEAN_METHODS, key) {
                Some(name) => method(name),
                None => self.missing_member(target, key),
            },
            Value::Namespace(ns) => intrinsics::namespace_member(*ns, key).ok_or_else(|| {
                EnclaveError::illegal(
                    AccessKind::IllegalBuiltinAccess,
                    format!("'{}.{key}' is not an allowed built-in", ns.name()),
                )
            }),
            Value::Function(_) => Err(EnclaveError::illegal(
                AccessKind::IllegalBuiltinAccess,
                format!("access to '{key}' on a function is not allowed"),
            )),
        }
    }

    /// A member outside the whitelist of a primitive or array. Numeric
    /// spellings (`"-1"`, `"1.5"`) read as missing elements.
    fn missing_member(&self, target: &Value, key: &str) -> Eval<Value> {
        if key.parse::<f64>().is_ok() {
            return Ok(Value::Undefined);
        }
        Err(EnclaveError::illegal(
            AccessKind::IllegalBuiltinAccess,
            format!("'{key}' is not an allowed member of {}", target.type_of_name()),
        ))
    }

    pub(super) fn set_property(
        &mut self,
        target: &Value,
        key: &str,
        value: Value,
        computed: bool,
    ) -> Eval<()> {
        self.check_key(key, computed)?;
        match target {
            Value::Object(id) => {
                if self.heap.object(*id).frozen {
                    return Err(self.throw(
                        "TypeError",
                        format!("Cannot assign to read only property '{key}' of object"),
                    ));
                }
                if !self.heap.object(*id).props.contains_key(key) {
                    self.charge(PROPERTY_OVERHEAD + key.len())?;
                }
                self.heap.object_mut(*id).props.insert(Rc::from(key), value);
                Ok(())
            }
            Value::Array(id) => {
                if self.heap.array(*id).frozen {
                    return Err(self.throw(
                        "TypeError",
                        format!("Cannot assign to read only property '{key}' of array"),
                    ));
                }
                if key == "length" {
                    let n = self.to_number(&value)?;
                    if n < 0.0 || n.fract() != 0.0 || n > self.limits.max_array_length as f64 {
                        return Err(self.throw("RangeError", "Invalid array length"));
                    }
                    let n = n as usize;
                    let len = self.heap.array(*id).items.len();
                    if n > len {
                        self.charge((n - len) * VALUE_SIZE)?;
                    }
                    self.heap.array_mut(*id).items.resize(n, Value::Undefined);
                    return Ok(());
                }
                let Some(index) = array_index(key) else {
                    return Err(self.throw(
                        "TypeError",
                        format!("Cannot set property '{key}' on an array"),
                    ));
                };
                self.check_array_length(index.saturating_add(1))?;
                let len = self.heap.array(*id).items.len();
                if index >= len {
                    self.charge((index + 1 - len) * VALUE_SIZE)?;
                    self.heap
                        .array_mut(*id)
                        .items
                        .resize(index + 1, Value::Undefined);
                }
                self.heap.array_mut(*id).items[index] = value;
                Ok(())
            }
            Value::Namespace(ns) => Err(EnclaveError::illegal(
                AccessKind::IllegalBuiltinAccess,
                format!("built-in '{}' cannot be modified", ns.name()),
            )),
            Value::Function(_) => Err(EnclaveError::illegal(
                AccessKind::IllegalBuiltinAccess,
                format!("cannot set '{key}' on a function"),
            )),
            Value::Undefined | Value::Null => Err(self.throw(
                "TypeError",
                format!("Cannot set properties of {} (setting '{key}')", target.describe()),
            )),
            other => Err(self.throw(
                "TypeError",
                format!("Cannot create property '{key}' on {}", other.type_of()),
            )),
        }
    }

    pub(super) fn has_property(&self, target: &Value, key: &str) -> bool {
        match target {
            Value::Object(id) => self.heap.object(*id).props.contains_key(key),
            Value::Array(id) => {
                key == "length"
                    || array_index(key).is_some_and(|i| i < self.heap.array(*id).items.len())
            }
            _ => false,
        }
    }

    /// Own enumerable entries, as object spread and `Object.entries` see them.
    pub(super) fn own_entries(&self, value: &Value) -> Eval<Vec<(Rc<str>, Value)>> {
        Ok(match value {
            Value::Object(id) => self
                .heap
                .object(*id)
                .props
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Value::Array(id) => self
                .heap
                .array(*id)
                .items
                .iter()
                .enumerate()
                .map(|(i, v)| (Rc::from(i.to_string()), v.clone()))
                .collect(),
            Value::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Rc::from(i.to_string()), Value::String(Rc::from(c.to_string()))))
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Snapshot of the values a `for...of`, spread or array pattern visits.
    pub(super) fn iterate(&mut self, value: &Value) -> Eval<Vec<Value>> {
        match value {
            Value::Array(id) => Ok(self.heap.array(*id).items.clone()),
            Value::String(s) => {
                let chars: Vec<Value> = s
                    .chars()
                    .map(|c| Value::String(Rc::from(c.to_string())))
                    .collect();
                self.charge(chars.len() * VALUE_SIZE)?;
                Ok(chars)
            }
            other => Err(self.throw(
                "TypeError",
                format!("{} is not iterable", other.describe()),
            )),
        }
    }

    // ── JSON ─────────────────────────────────────────────────────────────

    /// Convert to JSON. `None` means the value has no JSON form (`undefined`,
    /// functions).
    pub(super) fn to_json(&mut self, value: &Value, mode: JsonMode) -> Eval<Option<JsonValue>> {
        let mut walk = JsonWalk {
            heap: &self.heap,
            mode,
            ancestors: Vec::new(),
            used: 0,
            budget: self
                .limits
                .max_allocated_bytes
                .saturating_sub(self.allocated),
        };
        let result = walk.value(value, 0);
        let used = walk.used;
        match result {
            Ok(json) => {
                self.charge(used)?;
                Ok(json)
            }
            Err(WalkError::Budget) => Err(Budget::Memory {
                max: self.limits.max_allocated_bytes,
            }
            .into()),
            Err(WalkError::Circular) => {
                Err(self.throw("TypeError", "Converting circular structure to JSON"))
            }
            Err(WalkError::TooDeep) => {
                Err(self.throw("RangeError", "Maximum JSON nesting depth exceeded"))
            }
        }
    }

    /// Bring JSON into the script. `frozen` applies to every container.
    pub(super) fn from_json(&mut self, json: &JsonValue, frozen: bool) -> Eval<Value> {
        Ok(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => self.make_string(s.clone())?,
            JsonValue::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.from_json(item, frozen)?);
                }
                let array = self.new_array(values)?;
                if let Value::Array(id) = &array {
                    self.heap.array_mut(*id).frozen = frozen;
                }
                array
            }
            JsonValue::Object(map) => {
                let mut props = PropertyMap::new();
                for (key, item) in map {
                    let value = self.from_json(item, frozen)?;
                    props.insert(Rc::from(key.as_str()), value);
                }
                let object = self.new_object(props)?;
                if let Value::Object(id) = &object {
                    self.heap.object_mut(*id).frozen = frozen;
                }
                object
            }
        })
    }
}

impl Value {
    /// Type name used in member-access errors.
    fn type_of_name(&self) -> &'static str {
        match self {
            Value::Array(_) => "array",
            other => other.type_of(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::tests::{eval_err, eval_ok};
    use crate::error::{AccessKind, EnclaveError};

    fn access_kind(err: EnclaveError) -> AccessKind {
        match err {
            EnclaveError::IllegalAccess { kind, .. } => kind,
            other => panic!("expected illegal access, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn coercion_follows_script_rules() {
        let src = "return [
            '5' * '2', '5' - 2, true + 1, null + 1, [1, 2] + '', `${{}}`,
            1 / 0, -'x', '3' == 3, null == undefined, null === undefined,
            0 == '', [2] == 2, 'b' > 'a', '10' < '9', 10 < 9
        ];";
        assert_eq!(
            eval_ok(src).await,
            json!([
                10, 3, 2, 1, "1,2", "[object Object]", null, null, true, true, false,
                true, true, true, true, false
            ])
        );
    }

    #[tokio::test]
    async fn bitwise_operators_wrap_to_32_bits() {
        assert_eq!(
            eval_ok("return [5 & 3, 5 | 3, 5 ^ 3, ~5, 1 << 31, -16 >> 2, -16 >>> 28, 2 ** 32 | 0];").await,
            json!([1, 7, 6, -6, -2147483648, -4, 15, 0])
        );
    }

    #[tokio::test]
    async fn in_operator() {
        assert_eq!(
            eval_ok("const o = { a: 1 }; return ['a' in o, 'b' in o, 0 in [9], 3 in [9]];").await,
            json!([true, false, true, false])
        );
    }

    #[tokio::test]
    async fn computed_access_to_banned_names_is_illegal() {
        let err = eval_err("const o = {}; const k = 'pro' + 'cess'; return o[k];").await;
        assert_eq!(access_kind(err), AccessKind::IllegalBuiltinAccess);
        let err = eval_err("const k = ['con', 'structor'].join(''); return [][k];").await;
        assert_eq!(access_kind(err), AccessKind::IllegalBuiltinAccess);
    }

    #[tokio::test]
    async fn unknown_members_of_builtins_are_illegal() {
        let err = eval_err("return Math.random();").await;
        assert_eq!(access_kind(err), AccessKind::IllegalBuiltinAccess);
        let err = eval_err("return [1].toSource;").await;
        assert_eq!(access_kind(err), AccessKind::IllegalBuiltinAccess);
        let err = eval_err("Math.PI = 3;").await;
        assert_eq!(access_kind(err), AccessKind::IllegalBuiltinAccess);
        assert_eq!(eval_ok("return [[1][-1], 'ab'[5], ({}).missing];").await, json!([null, null, null]));
    }

    #[tokio::test]
    async fn array_length_assignment() {
        assert_eq!(
            eval_ok("const a = [1, 2, 3]; a.length = 1; a[3] = 4; return a;").await,
            json!([1, null, null, 4])
        );
    }

    #[tokio::test]
    async fn huge_array_indices_are_range_errors() {
        for src in [
            "const a = []; a['18446744073709551615'] = 1;",
            "const a = []; a[4294967294] = 1;",
        ] {
            match eval_err(src).await {
                EnclaveError::Script(e) => {
                    assert_eq!(e.name, "RangeError", "{src}");
                    assert_eq!(e.message, "Invalid array length", "{src}");
                }
                other => panic!("{src}: unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn string_length_is_bounded() {
        let src = "let s = 'x'; for (let i = 0; i < 30; i++) { s = s + s; } return s.length;";
        match eval_err(src).await {
            EnclaveError::Script(e) => {
                assert_eq!(e.name, "RangeError");
                assert_eq!(e.message, "Invalid string length");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn strings_index_by_character() {
        assert_eq!(
            eval_ok("const s = 'héllo'; return [s.length, s[1], s.at(-1)];").await,
            json!([5, "é", "o"])
        );
    }
}
