//! Whitelisted built-ins.
//!
//! Every global function, namespace member and prototype method a script can
//! reach is named in one of the tables below. Lookups that miss a table are
//! illegal accesses (see `ops::get_property`), so adding a name here is the
//! only way to widen the surface.

use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{AccessKind, EnclaveError, ToolFailure};
use crate::numeric::{
    number_to_radix_string, number_to_string, parse_float_prefix, parse_int_prefix, to_int32,
    to_uint32,
};
use crate::sanitize::MAX_JSON_DEPTH;

use super::console::LogLevel;
use super::heap::PropertyMap;
use super::ops::{js_pow, same_value_zero, static_str, strict_equals, truthy, JsonMode, VALUE_SIZE};
use super::value::{ArrayId, Builtin, Callable, Namespace, Value};
use super::{Eval, Interpreter};

pub(super) const GLOBAL_FUNCTIONS: &[&str] =
    &["callTool", "parseInt", "parseFloat", "isNaN", "isFinite"];

const MATH_FUNCTIONS: &[&str] = &[
    "abs", "acos", "asin", "atan", "atan2", "cbrt", "ceil", "cos", "exp", "floor", "hypot", "log",
    "log10", "log2", "max", "min", "pow", "round", "sign", "sin", "sqrt", "tan", "trunc",
];
const JSON_FUNCTIONS: &[&str] = &["parse", "stringify"];
const OBJECT_FUNCTIONS: &[&str] = &[
    "assign",
    "entries",
    "freeze",
    "fromEntries",
    "isFrozen",
    "keys",
    "values",
];
const ARRAY_FUNCTIONS: &[&str] = &["from", "isArray", "of"];
const NUMBER_FUNCTIONS: &[&str] = &[
    "isFinite",
    "isInteger",
    "isNaN",
    "isSafeInteger",
    "parseFloat",
    "parseInt",
];
const STRING_FUNCTIONS: &[&str] = &["fromCharCode"];
const PROMISE_FUNCTIONS: &[&str] = &["all", "allSettled", "resolve"];
const CONSOLE_FUNCTIONS: &[&str] = &["debug", "error", "info", "log", "warn"];

pub(super) const ARRAY_METHODS: &[&str] = &[
    "at",
    "concat",
    "every",
    "fill",
    "filter",
    "find",
    "findIndex",
    "findLast",
    "findLastIndex",
    "flat",
    "flatMap",
    "forEach",
    "includes",
    "indexOf",
    "join",
    "lastIndexOf",
    "map",
    "pop",
    "push",
    "reduce",
    "reduceRight",
    "reverse",
    "shift",
    "slice",
    "some",
    "sort",
    "splice",
    "toString",
    "unshift",
];

pub(super) const STRING_METHODS: &[&str] = &[
    "at",
    "charAt",
    "charCodeAt",
    "concat",
    "endsWith",
    "includes",
    "indexOf",
    "lastIndexOf",
    "localeCompare",
    "padEnd",
    "padStart",
    "repeat",
    "replace",
    "replaceAll",
    "slice",
    "split",
    "startsWith",
    "substring",
    "toLowerCase",
    "toString",
    "toUpperCase",
    "trim",
    "trimEnd",
    "trimStart",
];

pub(super) const NUMBER_METHODS: &[&str] = &["toFixed", "toString"];
pub(super) const BOOLEAN_METHODS: &[&str] = &["toString"];

pub(super) fn find_name(table: &[&'static str], key: &str) -> Option<&'static str> {
    table.iter().copied().find(|name| *name == key)
}

fn functions(ns: Namespace) -> &'static [&'static str] {
    match ns {
        Namespace::Math => MATH_FUNCTIONS,
        Namespace::Json => JSON_FUNCTIONS,
        Namespace::Object => OBJECT_FUNCTIONS,
        Namespace::Array => ARRAY_FUNCTIONS,
        Namespace::Number => NUMBER_FUNCTIONS,
        Namespace::String => STRING_FUNCTIONS,
        Namespace::Promise => PROMISE_FUNCTIONS,
        Namespace::Console => CONSOLE_FUNCTIONS,
        Namespace::Global
        | Namespace::Boolean
        | Namespace::Error
        | Namespace::TypeError
        | Namespace::RangeError => &[],
    }
}

fn constant(ns: Namespace, key: &str) -> Option<f64> {
    use std::f64::consts;
    Some(match (ns, key) {
        (Namespace::Math, "PI") => consts::PI,
        (Namespace::Math, "E") => consts::E,
        (Namespace::Math, "LN2") => consts::LN_2,
        (Namespace::Math, "LN10") => consts::LN_10,
        (Namespace::Math, "LOG2E") => consts::LOG2_E,
        (Namespace::Math, "LOG10E") => consts::LOG10_E,
        (Namespace::Math, "SQRT2") => consts::SQRT_2,
        (Namespace::Math, "SQRT1_2") => consts::FRAC_1_SQRT_2,
        (Namespace::Number, "MAX_SAFE_INTEGER") => 9_007_199_254_740_991.0,
        (Namespace::Number, "MIN_SAFE_INTEGER") => -9_007_199_254_740_991.0,
        (Namespace::Number, "EPSILON") => f64::EPSILON,
        (Namespace::Number, "MAX_VALUE") => f64::MAX,
        (Namespace::Number, "MIN_VALUE") => 5e-324,
        (Namespace::Number, "POSITIVE_INFINITY") => f64::INFINITY,
        (Namespace::Number, "NEGATIVE_INFINITY") => f64::NEG_INFINITY,
        (Namespace::Number, "NaN") => f64::NAN,
        _ => return None,
    })
}

/// Resolve `Namespace.key`, or `None` when it is not whitelisted.
pub(super) fn namespace_member(ns: Namespace, key: &str) -> Option<Value> {
    if let Some(n) = constant(ns, key) {
        return Some(Value::Number(n));
    }
    find_name(functions(ns), key)
        .map(|name| Value::Function(Callable::Builtin(Builtin { namespace: ns, name })))
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

/// Resolve a possibly negative position against `len`, clamped to `0..=len`.
fn clamp_index(n: f64, len: usize) -> usize {
    let len_f = len as f64;
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    let i = if n < 0.0 { (len_f + n).max(0.0) } else { n.min(len_f) };
    i as usize
}

fn char_to_byte(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(b, _)| b)
}

fn byte_to_char(s: &str, index: usize) -> usize {
    s[..index].chars().count()
}

/// `Number.prototype.toFixed`: exact decimal expansion, ties away from zero.
fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return number_to_string(n);
    }
    let exact = format!("{:.1100}", n.abs());
    let (int_part, frac) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let mut out: Vec<u8> = int_part
        .bytes()
        .chain(frac.bytes().chain(std::iter::repeat(b'0')).take(digits))
        .collect();
    if frac.as_bytes().get(digits).is_some_and(|&b| b >= b'5') {
        let mut i = out.len();
        loop {
            if i == 0 {
                out.insert(0, b'1');
                break;
            }
            i -= 1;
            if out[i] == b'9' {
                out[i] = b'0';
            } else {
                out[i] += 1;
                break;
            }
        }
    }
    let int_len = out.len() - digits;
    let mut s = String::with_capacity(out.len() + 2);
    if n < 0.0 {
        s.push('-');
    }
    s.push_str(&String::from_utf8_lossy(&out[..int_len]));
    if digits > 0 {
        s.push('.');
        s.push_str(&String::from_utf8_lossy(&out[int_len..]));
    }
    s
}

impl<'a> Interpreter<'a> {
    pub(super) async fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> Eval<Value> {
        let name = builtin.name;
        match builtin.namespace {
            Namespace::Global => self.call_global(name, args).await,
            Namespace::Math => self.call_math(name, &args),
            Namespace::Json => self.call_json(name, &args),
            Namespace::Object => self.call_object(name, &args),
            Namespace::Array => self.call_array_static(name, args).await,
            Namespace::Number => self.call_number_static(name, &args),
            Namespace::String => self.string_from_char_code(&args),
            Namespace::Promise => self.call_promise(name, args),
            Namespace::Console => {
                let message = args
                    .iter()
                    .map(|a| self.inspect(a))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.console.push(LogLevel::from_method(name), message);
                Ok(Value::Undefined)
            }
            other => Err(self.throw(
                "TypeError",
                format!("{}.{name} is not a function", other.name()),
            )),
        }
    }

    /// `Number(x)`, `String(x)`, `Boolean(x)` and `Error(msg)` without `new`.
    pub(super) fn call_namespace(&mut self, ns: Namespace, args: &[Value]) -> Eval<Value> {
        match ns {
            Namespace::Number => Ok(Value::Number(match args.first() {
                Some(v) => self.to_number(v)?,
                None => 0.0,
            })),
            Namespace::String => match args.first() {
                Some(Value::String(s)) => Ok(Value::String(s.clone())),
                Some(v) => {
                    let s = self.to_display(v)?;
                    self.make_string(s)
                }
                None => Ok(static_str("")),
            },
            Namespace::Boolean => Ok(Value::Bool(args.first().is_some_and(truthy))),
            ns if ns.is_error_class() => self.construct_error(ns, args),
            other => Err(self.throw("TypeError", format!("{} is not a function", other.name()))),
        }
    }

    pub(super) fn construct_error(&mut self, ns: Namespace, args: &[Value]) -> Eval<Value> {
        let message = match args.first() {
            None | Some(Value::Undefined) => static_str(""),
            Some(Value::String(s)) => Value::String(s.clone()),
            Some(other) => {
                let s = self.to_display(other)?;
                self.make_string(s)?
            }
        };
        self.new_error_object(ns.name(), message)
    }

    async fn call_global(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "callTool" => self.call_tool(args).await,
            "parseInt" => self.parse_int(&args),
            "parseFloat" => {
                let s = self.to_display(&arg(&args, 0))?;
                Ok(Value::Number(parse_float_prefix(&s)))
            }
            "isNaN" => Ok(Value::Bool(self.to_number(&arg(&args, 0))?.is_nan())),
            "isFinite" => Ok(Value::Bool(self.to_number(&arg(&args, 0))?.is_finite())),
            other => Err(self.throw("TypeError", format!("{other} is not a function"))),
        }
    }

    fn parse_int(&self, args: &[Value]) -> Eval<Value> {
        let s = self.to_display(&arg(args, 0))?;
        let radix = match args.get(1) {
            None | Some(Value::Undefined) => 0,
            Some(v) => to_int32(self.to_number(v)?),
        };
        if radix < 0 {
            return Ok(Value::Number(f64::NAN));
        }
        Ok(Value::Number(parse_int_prefix(&s, radix as u32)))
    }

    fn call_math(&self, name: &str, args: &[Value]) -> Eval<Value> {
        let nums = args
            .iter()
            .map(|a| self.to_number(a))
            .collect::<Eval<Vec<f64>>>()?;
        let x = nums.first().copied().unwrap_or(f64::NAN);
        let y = nums.get(1).copied().unwrap_or(f64::NAN);
        let n = match name {
            "abs" => x.abs(),
            "acos" => x.acos(),
            "asin" => x.asin(),
            "atan" => x.atan(),
            "atan2" => x.atan2(y),
            "cbrt" => x.cbrt(),
            "ceil" => x.ceil(),
            "cos" => x.cos(),
            "exp" => x.exp(),
            "floor" => x.floor(),
            "hypot" => nums.iter().map(|n| n * n).sum::<f64>().sqrt(),
            "log" => x.ln(),
            "log10" => x.log10(),
            "log2" => x.log2(),
            "max" => nums.iter().fold(f64::NEG_INFINITY, |acc, &n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.max(n)
                }
            }),
            "min" => nums.iter().fold(f64::INFINITY, |acc, &n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.min(n)
                }
            }),
            "pow" => js_pow(x, y),
            // Halves round towards +Infinity.
            "round" => {
                if !x.is_finite() || x.fract() == 0.0 {
                    x
                } else {
                    (x + 0.5).floor()
                }
            }
            "sign" => {
                if x.is_nan() || x == 0.0 {
                    x
                } else {
                    x.signum()
                }
            }
            "sin" => x.sin(),
            "sqrt" => x.sqrt(),
            "tan" => x.tan(),
            "trunc" => x.trunc(),
            other => return Err(self.throw("TypeError", format!("Math.{other} is not a function"))),
        };
        Ok(Value::Number(n))
    }

    fn call_json(&mut self, name: &str, args: &[Value]) -> Eval<Value> {
        match name {
            "parse" => {
                let text = self.to_display(&arg(args, 0))?;
                let json: JsonValue = serde_json::from_str(&text)
                    .map_err(|e| self.throw("SyntaxError", format!("JSON.parse: {e}")))?;
                self.from_json(&json, false)
            }
            _ => {
                if !arg(args, 1).is_nullish() {
                    return Err(self.throw(
                        "TypeError",
                        "JSON.stringify replacer functions and arrays are not supported",
                    ));
                }
                let Some(json) = self.to_json(&arg(args, 0), JsonMode::Stringify)? else {
                    return Ok(Value::Undefined);
                };
                let indent = match arg(args, 2) {
                    Value::Number(n) if n >= 1.0 => " ".repeat(n.min(10.0) as usize),
                    Value::String(s) => s.chars().take(10).collect(),
                    _ => String::new(),
                };
                let text = if indent.is_empty() {
                    serde_json::to_string(&json)
                        .map_err(|e| EnclaveError::Internal(e.to_string()))?
                } else {
                    let mut out = Vec::new();
                    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
                    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
                    json.serialize(&mut serializer)
                        .map_err(|e| EnclaveError::Internal(e.to_string()))?;
                    String::from_utf8(out).map_err(|e| EnclaveError::Internal(e.to_string()))?
                };
                self.make_string(text)
            }
        }
    }

    fn call_object(&mut self, name: &str, args: &[Value]) -> Eval<Value> {
        let target = arg(args, 0);
        match name {
            "freeze" => {
                match &target {
                    Value::Object(id) => self.heap.object_mut(*id).frozen = true,
                    Value::Array(id) => self.heap.array_mut(*id).frozen = true,
                    _ => {}
                }
                Ok(target)
            }
            "isFrozen" => Ok(Value::Bool(match &target {
                Value::Object(id) => self.heap.object(*id).frozen,
                Value::Array(id) => self.heap.array(*id).frozen,
                _ => true,
            })),
            "assign" => {
                if !matches!(target, Value::Object(_)) {
                    return Err(self.throw(
                        "TypeError",
                        format!("Object.assign target must be an object, got {}", target.describe()),
                    ));
                }
                for source in &args[1..] {
                    for (key, value) in self.own_entries(source)? {
                        self.set_property(&target, &key, value, false)?;
                    }
                }
                Ok(target)
            }
            "fromEntries" => {
                let mut props = PropertyMap::new();
                for entry in self.iterate(&target)? {
                    let Value::Array(id) = entry else {
                        return Err(self.throw(
                            "TypeError",
                            format!("Iterator value {} is not an entry object", entry.describe()),
                        ));
                    };
                    let pair = &self.heap.array(id).items;
                    let (key, value) = (
                        pair.first().cloned().unwrap_or(Value::Undefined),
                        pair.get(1).cloned().unwrap_or(Value::Undefined),
                    );
                    let key = self.to_property_key(&key)?;
                    self.check_key(&key, false)?;
                    props.insert(key, value);
                }
                self.new_object(props)
            }
            _ => {
                if target.is_nullish() {
                    return Err(self.throw(
                        "TypeError",
                        "Cannot convert undefined or null to object",
                    ));
                }
                let entries = self.own_entries(&target)?;
                let mut items = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    items.push(match name {
                        "keys" => Value::String(key),
                        "values" => value,
                        _ => self.new_array(vec![Value::String(key), value])?,
                    });
                }
                self.new_array(items)
            }
        }
    }

    async fn call_array_static(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "isArray" => Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_))))),
            "of" => self.new_array(args),
            _ => {
                let source = arg(&args, 0);
                let items = match &source {
                    Value::Array(_) | Value::String(_) => self.iterate(&source)?,
                    Value::Object(id) => {
                        let length = self
                            .heap
                            .object(*id)
                            .props
                            .get("length")
                            .cloned()
                            .unwrap_or(Value::Undefined);
                        let n = self.to_number(&length)?;
                        let n = if n.is_nan() || n < 0.0 { 0.0 } else { n.trunc() };
                        if n > self.limits.max_array_length as f64 {
                            return Err(self.throw("RangeError", "Invalid array length"));
                        }
                        vec![Value::Undefined; n as usize]
                    }
                    Value::Undefined | Value::Null => {
                        return Err(self.throw(
                            "TypeError",
                            format!("{} is not iterable", source.describe()),
                        ))
                    }
                    _ => Vec::new(),
                };
                let items = match args.get(1) {
                    Some(map) if map.is_callable() => {
                        let mut out = Vec::with_capacity(items.len());
                        for (i, item) in items.into_iter().enumerate() {
                            out.push(
                                self.call_value(map.clone(), vec![item, Value::Number(i as f64)])
                                    .await?,
                            );
                        }
                        out
                    }
                    _ => items,
                };
                self.new_array(items)
            }
        }
    }

    fn call_number_static(&self, name: &str, args: &[Value]) -> Eval<Value> {
        let number = match args.first() {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        };
        let is_integer = number.is_some_and(|n| n.is_finite() && n.fract() == 0.0);
        Ok(match name {
            "isFinite" => Value::Bool(number.is_some_and(f64::is_finite)),
            "isInteger" => Value::Bool(is_integer),
            "isNaN" => Value::Bool(number.is_some_and(f64::is_nan)),
            "isSafeInteger" => Value::Bool(
                is_integer && number.is_some_and(|n| n.abs() <= 9_007_199_254_740_991.0),
            ),
            "parseFloat" => {
                let s = self.to_display(&arg(args, 0))?;
                Value::Number(parse_float_prefix(&s))
            }
            _ => self.parse_int(args)?,
        })
    }

    fn string_from_char_code(&mut self, args: &[Value]) -> Eval<Value> {
        let mut out = String::with_capacity(args.len());
        for a in args {
            let code = to_uint32(self.to_number(a)?) & 0xFFFF;
            out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        self.make_string(out)
    }

    /// Tool calls settle before `callTool` returns, so these only reshape
    /// values that are already final.
    fn call_promise(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        let value = arg(&args, 0);
        match name {
            "resolve" => Ok(value),
            "all" => {
                let items = self.iterate(&value)?;
                self.new_array(items)
            }
            _ => {
                let items = self.iterate(&value)?;
                let mut settled = Vec::with_capacity(items.len());
                for item in items {
                    let mut props = PropertyMap::new();
                    props.insert(Rc::from("status"), static_str("fulfilled"));
                    props.insert(Rc::from("value"), item);
                    settled.push(self.new_object(props)?);
                }
                self.new_array(settled)
            }
        }
    }

    // ── callTool ─────────────────────────────────────────────────────────

    async fn call_tool(&mut self, args: Vec<Value>) -> Eval<Value> {
        let mut args = args.into_iter();
        let name = args.next().unwrap_or(Value::Undefined);
        let input = args.next().unwrap_or(Value::Undefined);
        let options = args.next().unwrap_or(Value::Undefined);

        let Value::String(name) = name else {
            return Err(self.throw(
                "TypeError",
                format!("callTool: tool name must be a string, got {}", name.type_of()),
            ));
        };
        if self.bridge.is_reserved(&name) {
            tracing::warn!(tool = %name, "script attempted to call a reserved tool");
            return Err(EnclaveError::illegal(
                AccessKind::PermissionDenied,
                format!("tool '{name}' is reserved and cannot be called from a script"),
            ));
        }
        let input = match &input {
            Value::Undefined | Value::Null => JsonValue::Object(Map::new()),
            Value::Object(_) => self
                .to_json(&input, JsonMode::Sanitize)?
                .unwrap_or_else(|| JsonValue::Object(Map::new())),
            other => {
                return Err(self.throw(
                    "TypeError",
                    format!(
                        "callTool: arguments for '{name}' must be an object, got {}",
                        other.type_of()
                    ),
                ))
            }
        };
        let throw_on_error = match &options {
            Value::Object(id) => self
                .heap
                .object(*id)
                .props
                .get("throwOnError")
                .map_or(true, truthy),
            _ => true,
        };

        if let Err(message) = self.bridge.check_allowed(&name) {
            tracing::warn!(tool = %name, "tool call denied by allow-list");
            let failure = ToolFailure {
                tool_name: name.to_string(),
                tool_input: input,
                message,
                code: Some("ACCESS_DENIED".into()),
                details: None,
            };
            return self.tool_failed(failure, throw_on_error);
        }
        let call = self.governor.reserve_tool_call()?;
        self.governor.check_deadline()?;
        if let Err(message) = self.bridge.check_args_size(&input) {
            let failure = ToolFailure {
                tool_name: name.to_string(),
                tool_input: JsonValue::Null,
                message,
                code: Some("ARGS_TOO_LARGE".into()),
                details: None,
            };
            return self.tool_failed(failure, throw_on_error);
        }

        tracing::debug!(tool = %name, call, "calling tool");
        let remaining = self.governor.remaining();
        let outcome = match tokio::time::timeout(remaining, self.bridge.dispatch(&name, input)).await
        {
            Ok(outcome) => outcome,
            Err(_) => return Err(self.governor.wall_clock().into()),
        };
        match outcome {
            Ok(json) => {
                let data = self.from_json(&json, false)?;
                if throw_on_error {
                    return Ok(data);
                }
                let mut props = PropertyMap::new();
                props.insert(Rc::from("success"), Value::Bool(true));
                props.insert(Rc::from("data"), data);
                self.new_object(props)
            }
            Err(failure) => self.tool_failed(failure, throw_on_error),
        }
    }

    /// Propagate a tool failure, or hand it to the script as
    /// `{ success: false, error: { code, message } }`.
    fn tool_failed(&mut self, failure: ToolFailure, throw_on_error: bool) -> Eval<Value> {
        if throw_on_error {
            return Err(EnclaveError::Tool(failure));
        }
        let mut error = PropertyMap::new();
        let code = failure.code.unwrap_or_else(|| "TOOL_ERROR".to_string());
        error.insert(Rc::from("code"), self.make_string(code)?);
        error.insert(Rc::from("message"), self.make_string(failure.message)?);
        if let Some(details) = &failure.details {
            let details = self.from_json(details, false)?;
            error.insert(Rc::from("details"), details);
        }
        let error = self.new_object(error)?;
        let mut props = PropertyMap::new();
        props.insert(Rc::from("success"), Value::Bool(false));
        props.insert(Rc::from("error"), error);
        self.new_object(props)
    }

    // ── prototype methods ────────────────────────────────────────────────

    pub(super) async fn call_method(
        &mut self,
        receiver: &Value,
        name: &'static str,
        args: Vec<Value>,
    ) -> Eval<Value> {
        match receiver {
            Value::Array(id) => self.array_method(*id, name, args).await,
            Value::String(s) => self.string_method(s.clone(), name, args).await,
            Value::Number(n) => self.number_method(*n, name, &args),
            Value::Bool(b) => Ok(static_str(if *b { "true" } else { "false" })),
            other => Err(self.throw(
                "TypeError",
                format!("{name} is not a function on {}", other.describe()),
            )),
        }
    }

    fn callback(&self, args: &[Value]) -> Eval<Value> {
        match args.first() {
            Some(f) if f.is_callable() => Ok(f.clone()),
            other => Err(self.throw(
                "TypeError",
                format!(
                    "{} is not a function",
                    other.map_or_else(|| "undefined".to_string(), Value::describe)
                ),
            )),
        }
    }

    fn ensure_mutable(&self, id: ArrayId) -> Eval<()> {
        if self.heap.array(id).frozen {
            return Err(self.throw("TypeError", "Cannot modify a frozen array"));
        }
        Ok(())
    }

    fn position(&self, args: &[Value], i: usize, len: usize, default: usize) -> Eval<usize> {
        match args.get(i) {
            None | Some(Value::Undefined) => Ok(default),
            Some(v) => Ok(clamp_index(self.to_number(v)?, len)),
        }
    }

    fn flatten_into(&self, items: &[Value], depth: usize, out: &mut Vec<Value>) -> Eval<()> {
        for item in items {
            match item {
                Value::Array(id) if depth > 0 => {
                    let inner = self.heap.array(*id).items.clone();
                    self.flatten_into(&inner, depth - 1, out)?;
                }
                other => out.push(other.clone()),
            }
            self.check_array_length(out.len())?;
        }
        Ok(())
    }

    fn join(&mut self, items: &[Value], separator: &str) -> Eval<Value> {
        let mut out = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            if !item.is_nullish() {
                out.push_str(&self.to_display(item)?);
            }
            self.check_string_length(out.len())?;
        }
        self.make_string(out)
    }

    async fn array_method(&mut self, id: ArrayId, name: &'static str, args: Vec<Value>) -> Eval<Value> {
        let receiver = Value::Array(id);
        let items = self.heap.array(id).items.clone();
        let len = items.len();
        match name {
            "at" => {
                let n = self.to_number(&arg(&args, 0))?;
                let n = if n.is_nan() { 0.0 } else { n.trunc() };
                let i = if n < 0.0 { len as f64 + n } else { n };
                Ok(if i >= 0.0 && i < len as f64 {
                    items[i as usize].clone()
                } else {
                    Value::Undefined
                })
            }
            "concat" => {
                let mut out = items;
                for a in &args {
                    match a {
                        Value::Array(other) => out.extend(self.heap.array(*other).items.iter().cloned()),
                        v => out.push(v.clone()),
                    }
                    self.check_array_length(out.len())?;
                }
                self.new_array(out)
            }
            "every" | "some" | "filter" | "find" | "findIndex" | "forEach" | "map" => {
                let f = self.callback(&args)?;
                let mut mapped = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let r = self
                        .call_value(
                            f.clone(),
                            vec![item.clone(), Value::Number(i as f64), receiver.clone()],
                        )
                        .await?;
                    match name {
                        "every" if !truthy(&r) => return Ok(Value::Bool(false)),
                        "some" if truthy(&r) => return Ok(Value::Bool(true)),
                        "find" if truthy(&r) => return Ok(item),
                        "findIndex" if truthy(&r) => return Ok(Value::Number(i as f64)),
                        "filter" if truthy(&r) => mapped.push(item),
                        "map" => mapped.push(r),
                        _ => {}
                    }
                }
                match name {
                    "every" => Ok(Value::Bool(true)),
                    "some" => Ok(Value::Bool(false)),
                    "findIndex" => Ok(Value::Number(-1.0)),
                    "filter" | "map" => self.new_array(mapped),
                    _ => Ok(Value::Undefined),
                }
            }
            "findLast" | "findLastIndex" => {
                let f = self.callback(&args)?;
                for (i, item) in items.into_iter().enumerate().rev() {
                    let r = self
                        .call_value(
                            f.clone(),
                            vec![item.clone(), Value::Number(i as f64), receiver.clone()],
                        )
                        .await?;
                    if truthy(&r) {
                        return Ok(if name == "findLast" {
                            item
                        } else {
                            Value::Number(i as f64)
                        });
                    }
                }
                Ok(if name == "findLast" {
                    Value::Undefined
                } else {
                    Value::Number(-1.0)
                })
            }
            "fill" => {
                self.ensure_mutable(id)?;
                let value = arg(&args, 0);
                let start = self.position(&args, 1, len, 0)?;
                let end = self.position(&args, 2, len, len)?;
                for slot in self.heap.array_mut(id).items.iter_mut().take(end).skip(start) {
                    *slot = value.clone();
                }
                Ok(receiver)
            }
            "flat" => {
                let depth = match args.first() {
                    None | Some(Value::Undefined) => 1.0,
                    Some(v) => self.to_number(v)?,
                };
                let depth = if depth.is_nan() || depth < 0.0 {
                    0
                } else {
                    depth.min(MAX_JSON_DEPTH as f64) as usize
                };
                let mut out = Vec::with_capacity(len);
                self.flatten_into(&items, depth, &mut out)?;
                self.new_array(out)
            }
            "flatMap" => {
                let f = self.callback(&args)?;
                let mut out = Vec::with_capacity(len);
                for (i, item) in items.into_iter().enumerate() {
                    let r = self
                        .call_value(f.clone(), vec![item, Value::Number(i as f64), receiver.clone()])
                        .await?;
                    self.flatten_into(std::slice::from_ref(&r), 1, &mut out)?;
                }
                self.new_array(out)
            }
            "includes" => {
                let needle = arg(&args, 0);
                let start = self.position(&args, 1, len, 0)?;
                Ok(Value::Bool(items[start..].iter().any(|v| same_value_zero(v, &needle))))
            }
            "indexOf" => {
                let needle = arg(&args, 0);
                let start = self.position(&args, 1, len, 0)?;
                Ok(Value::Number(
                    items[start..]
                        .iter()
                        .position(|v| strict_equals(v, &needle))
                        .map_or(-1.0, |i| (start + i) as f64),
                ))
            }
            "lastIndexOf" => {
                let needle = arg(&args, 0);
                Ok(Value::Number(
                    items
                        .iter()
                        .rposition(|v| strict_equals(v, &needle))
                        .map_or(-1.0, |i| i as f64),
                ))
            }
            "join" | "toString" => {
                let separator = match args.first() {
                    Some(v) if name == "join" && !matches!(v, Value::Undefined) => self.to_display(v)?,
                    _ => ",".to_string(),
                };
                self.join(&items, &separator)
            }
            "push" | "unshift" => {
                self.ensure_mutable(id)?;
                let new_len = len + args.len();
                self.check_array_length(new_len)?;
                self.charge(args.len() * VALUE_SIZE)?;
                let array = &mut self.heap.array_mut(id).items;
                if name == "push" {
                    array.extend(args);
                } else {
                    let tail = std::mem::replace(array, args);
                    array.extend(tail);
                }
                Ok(Value::Number(new_len as f64))
            }
            "pop" | "shift" => {
                self.ensure_mutable(id)?;
                let array = &mut self.heap.array_mut(id).items;
                let removed = if name == "pop" {
                    array.pop()
                } else if array.is_empty() {
                    None
                } else {
                    Some(array.remove(0))
                };
                Ok(removed.unwrap_or(Value::Undefined))
            }
            "reduce" | "reduceRight" => {
                let f = self.callback(&args)?;
                let mut order: Vec<usize> = (0..len).collect();
                if name == "reduceRight" {
                    order.reverse();
                }
                let mut order = order.into_iter();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match order.next() {
                        Some(i) => items[i].clone(),
                        None => {
                            return Err(
                                self.throw("TypeError", "Reduce of empty array with no initial value")
                            )
                        }
                    },
                };
                for i in order {
                    acc = self
                        .call_value(
                            f.clone(),
                            vec![acc, items[i].clone(), Value::Number(i as f64), receiver.clone()],
                        )
                        .await?;
                }
                Ok(acc)
            }
            "reverse" => {
                self.ensure_mutable(id)?;
                self.heap.array_mut(id).items.reverse();
                Ok(receiver)
            }
            "slice" => {
                let start = self.position(&args, 0, len, 0)?;
                let end = self.position(&args, 1, len, len)?;
                let out = if start < end {
                    items[start..end].to_vec()
                } else {
                    Vec::new()
                };
                self.new_array(out)
            }
            "sort" => {
                self.ensure_mutable(id)?;
                let compare = match args.first() {
                    None | Some(Value::Undefined) => None,
                    Some(f) if f.is_callable() => Some(f.clone()),
                    Some(other) => {
                        return Err(self.throw(
                            "TypeError",
                            format!(
                                "The comparison function must be either a function or undefined, got {}",
                                other.describe()
                            ),
                        ))
                    }
                };
                let sorted = self.sort_values(items, compare).await?;
                self.heap.array_mut(id).items = sorted;
                Ok(receiver)
            }
            "splice" => {
                self.ensure_mutable(id)?;
                let start = self.position(&args, 0, len, 0)?;
                let delete = match args.get(1) {
                    None => len - start,
                    Some(v) => {
                        let n = self.to_number(v)?;
                        if n.is_nan() || n < 0.0 {
                            0
                        } else {
                            (n.trunc() as usize).min(len - start)
                        }
                    }
                };
                let inserted: Vec<Value> = args.into_iter().skip(2).collect();
                self.check_array_length(len - delete + inserted.len())?;
                self.charge(inserted.len() * VALUE_SIZE)?;
                let removed: Vec<Value> = self
                    .heap
                    .array_mut(id)
                    .items
                    .splice(start..start + delete, inserted)
                    .collect();
                self.new_array(removed)
            }
            other => Err(self.throw("TypeError", format!("array.{other} is not a function"))),
        }
    }

    /// Stable merge sort; `undefined` always sorts last. Without a comparator
    /// values compare by their string form.
    async fn sort_values(&mut self, items: Vec<Value>, compare: Option<Value>) -> Eval<Vec<Value>> {
        let (mut sorted, undefined): (Vec<Value>, Vec<Value>) = items
            .into_iter()
            .partition(|v| !matches!(v, Value::Undefined));
        let n = sorted.len();
        let mut width = 1;
        while width < n {
            let mut merged = Vec::with_capacity(n);
            let mut start = 0;
            while start < n {
                let mid = (start + width).min(n);
                let end = (start + 2 * width).min(n);
                let (mut i, mut j) = (start, mid);
                while i < mid && j < end {
                    if self.sorts_after(&sorted[i], &sorted[j], &compare).await? {
                        merged.push(sorted[j].clone());
                        j += 1;
                    } else {
                        merged.push(sorted[i].clone());
                        i += 1;
                    }
                }
                merged.extend_from_slice(&sorted[i..mid]);
                merged.extend_from_slice(&sorted[j..end]);
                start = end;
            }
            sorted = merged;
            width *= 2;
        }
        sorted.extend(undefined);
        Ok(sorted)
    }

    async fn sorts_after(&mut self, a: &Value, b: &Value, compare: &Option<Value>) -> Eval<bool> {
        match compare {
            Some(f) => {
                let r = self.call_value(f.clone(), vec![a.clone(), b.clone()]).await?;
                Ok(self.to_number(&r)? > 0.0)
            }
            None => Ok(self.to_display(a)? > self.to_display(b)?),
        }
    }

    async fn string_method(&mut self, s: Rc<str>, name: &'static str, args: Vec<Value>) -> Eval<Value> {
        let text = |i: usize, this: &Self| -> Eval<String> {
            match args.get(i) {
                Some(v) => this.to_display(v),
                None => Ok("undefined".to_string()),
            }
        };
        match name {
            "at" | "charAt" | "charCodeAt" => {
                let len = s.chars().count();
                let n = match args.first() {
                    None | Some(Value::Undefined) => 0.0,
                    Some(v) => self.to_number(v)?,
                };
                let n = if n.is_nan() { 0.0 } else { n.trunc() };
                let i = if name == "at" && n < 0.0 { len as f64 + n } else { n };
                let c = if i >= 0.0 && i < len as f64 {
                    s.chars().nth(i as usize)
                } else {
                    None
                };
                Ok(match (name, c) {
                    ("charCodeAt", Some(c)) => Value::Number(f64::from(c as u32)),
                    ("charCodeAt", None) => Value::Number(f64::NAN),
                    (_, Some(c)) => Value::String(Rc::from(c.to_string())),
                    ("at", None) => Value::Undefined,
                    (_, None) => static_str(""),
                })
            }
            "concat" => {
                let mut out = s.to_string();
                for a in &args {
                    out.push_str(&self.to_display(a)?);
                    self.check_string_length(out.len())?;
                }
                self.make_string(out)
            }
            "endsWith" => {
                let search = text(0, self)?;
                let end = self.position(&args, 1, s.chars().count(), usize::MAX)?;
                let end = if end == usize::MAX { s.len() } else { char_to_byte(&s, end) };
                Ok(Value::Bool(s[..end].ends_with(search.as_str())))
            }
            "startsWith" | "includes" => {
                let search = text(0, self)?;
                let start = self.position(&args, 1, s.chars().count(), 0)?;
                let rest = &s[char_to_byte(&s, start)..];
                Ok(Value::Bool(if name == "includes" {
                    rest.contains(search.as_str())
                } else {
                    rest.starts_with(search.as_str())
                }))
            }
            "indexOf" => {
                let search = text(0, self)?;
                let start = self.position(&args, 1, s.chars().count(), 0)?;
                let offset = char_to_byte(&s, start);
                Ok(Value::Number(match s[offset..].find(search.as_str()) {
                    Some(b) => byte_to_char(&s, offset + b) as f64,
                    None => -1.0,
                }))
            }
            "lastIndexOf" => {
                let search = text(0, self)?;
                Ok(Value::Number(match s.rfind(search.as_str()) {
                    Some(b) => byte_to_char(&s, b) as f64,
                    None => -1.0,
                }))
            }
            "localeCompare" => {
                let other = text(0, self)?;
                Ok(Value::Number(match (*s).cmp(other.as_str()) {
                    std::cmp::Ordering::Less => -1.0,
                    std::cmp::Ordering::Equal => 0.0,
                    std::cmp::Ordering::Greater => 1.0,
                }))
            }
            "padStart" | "padEnd" => {
                let target = self.to_number(&arg(&args, 0))?;
                if target > self.limits.max_string_length as f64 {
                    return Err(self.throw("RangeError", "Invalid string length"));
                }
                let target = if target.is_nan() || target < 0.0 { 0 } else { target as usize };
                let filler = match args.get(1) {
                    None | Some(Value::Undefined) => " ".to_string(),
                    Some(v) => self.to_display(v)?,
                };
                let len = s.chars().count();
                if target <= len || filler.is_empty() {
                    return Ok(Value::String(s));
                }
                let fill: String = filler.chars().cycle().take(target - len).collect();
                let out = if name == "padStart" {
                    fill + &*s
                } else {
                    s.to_string() + &fill
                };
                self.make_string(out)
            }
            "repeat" => {
                let count = self.to_number(&arg(&args, 0))?;
                if count < 0.0 || count.is_infinite() {
                    return Err(self.throw(
                        "RangeError",
                        format!("Invalid count value: {}", number_to_string(count)),
                    ));
                }
                let count = if count.is_nan() { 0 } else { count as usize };
                match s.len().checked_mul(count) {
                    Some(bytes) => self.check_string_length(bytes)?,
                    None => return Err(self.throw("RangeError", "Invalid string length")),
                }
                self.make_string(s.repeat(count))
            }
            "replace" | "replaceAll" => {
                let pattern = text(0, self)?;
                let replacement = arg(&args, 1);
                let matches: Vec<usize> = if name == "replace" {
                    s.find(pattern.as_str()).into_iter().collect()
                } else {
                    s.match_indices(pattern.as_str()).map(|(b, _)| b).collect()
                };
                let literal = if replacement.is_callable() {
                    None
                } else {
                    let r = self.to_display(&replacement)?;
                    let bytes = s.len() - matches.len() * pattern.len() + matches.len() * r.len();
                    self.check_string_length(bytes)?;
                    Some(r)
                };
                let mut out = String::with_capacity(s.len());
                let mut last = 0;
                for b in matches {
                    out.push_str(&s[last..b]);
                    match &literal {
                        Some(r) => out.push_str(r),
                        None => {
                            let r = self
                                .call_value(
                                    replacement.clone(),
                                    vec![
                                        Value::String(Rc::from(pattern.as_str())),
                                        Value::Number(byte_to_char(&s, b) as f64),
                                        Value::String(s.clone()),
                                    ],
                                )
                                .await?;
                            out.push_str(&self.to_display(&r)?);
                            self.check_string_length(out.len())?;
                        }
                    }
                    last = b + pattern.len();
                }
                out.push_str(&s[last..]);
                self.make_string(out)
            }
            "slice" | "substring" => {
                let len = s.chars().count();
                let (start, end) = if name == "slice" {
                    (self.position(&args, 0, len, 0)?, self.position(&args, 1, len, len)?)
                } else {
                    let bound = |v: Option<&Value>, this: &Self, default: usize| -> Eval<usize> {
                        match v {
                            None | Some(Value::Undefined) => Ok(default),
                            Some(v) => {
                                let n = this.to_number(v)?;
                                Ok(if n.is_nan() || n < 0.0 {
                                    0
                                } else {
                                    (n.trunc() as usize).min(len)
                                })
                            }
                        }
                    };
                    let a = bound(args.first(), self, 0)?;
                    let b = bound(args.get(1), self, len)?;
                    (a.min(b), a.max(b))
                };
                if start >= end {
                    return Ok(static_str(""));
                }
                let out = s[char_to_byte(&s, start)..char_to_byte(&s, end)].to_string();
                self.make_string(out)
            }
            "split" => {
                let limit = match args.get(1) {
                    None | Some(Value::Undefined) => usize::MAX,
                    Some(v) => to_uint32(self.to_number(v)?) as usize,
                };
                let parts: Vec<String> = match args.first() {
                    None | Some(Value::Undefined) => vec![s.to_string()],
                    Some(sep) => {
                        let sep = self.to_display(sep)?;
                        if sep.is_empty() {
                            s.chars().take(limit).map(String::from).collect()
                        } else {
                            s.split(sep.as_str()).take(limit).map(String::from).collect()
                        }
                    }
                };
                let parts: Vec<String> = parts.into_iter().take(limit).collect();
                self.check_array_length(parts.len())?;
                let mut values = Vec::with_capacity(parts.len());
                for part in parts {
                    values.push(self.make_string(part)?);
                }
                self.new_array(values)
            }
            "toLowerCase" => self.make_string(s.to_lowercase()),
            "toUpperCase" => self.make_string(s.to_uppercase()),
            "trim" => self.make_string(s.trim().to_string()),
            "trimStart" => self.make_string(s.trim_start().to_string()),
            "trimEnd" => self.make_string(s.trim_end().to_string()),
            "toString" => Ok(Value::String(s)),
            other => Err(self.throw("TypeError", format!("string.{other} is not a function"))),
        }
    }

    fn number_method(&mut self, n: f64, name: &str, args: &[Value]) -> Eval<Value> {
        match name {
            "toFixed" => {
                let digits = match args.first() {
                    None | Some(Value::Undefined) => 0.0,
                    Some(v) => self.to_number(v)?,
                };
                let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
                if !(0.0..=100.0).contains(&digits) {
                    return Err(self.throw(
                        "RangeError",
                        "toFixed() digits argument must be between 0 and 100",
                    ));
                }
                self.make_string(to_fixed(n, digits as usize))
            }
            _ => {
                let radix = match args.first() {
                    None | Some(Value::Undefined) => 10.0,
                    Some(v) => self.to_number(v)?,
                };
                if !(2.0..=36.0).contains(&radix) || radix.fract() != 0.0 {
                    return Err(self.throw(
                        "RangeError",
                        "toString() radix must be between 2 and 36",
                    ));
                }
                self.make_string(number_to_radix_string(n, radix as u32))
            }
        }
    }
}
