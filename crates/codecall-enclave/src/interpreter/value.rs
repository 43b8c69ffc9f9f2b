//! Runtime values.
//!
//! Primitives are stored inline; arrays, objects and closures live in the
//! run's [`Heap`](super::heap::Heap) and are referenced by index. Values are
//! cheap to clone and never cross a run boundary.

use std::rc::Rc;

/// Index of an array in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayId(pub(crate) usize);

/// Index of a plain object in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub(crate) usize);

/// Index of a closure in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureId(pub(crate) usize);

/// Whitelisted intrinsic namespaces.
///
/// A namespace is what a script sees when it names `Math`, `JSON`, `Array`
/// and friends. Members are resolved through the tables in
/// [`intrinsics`](super::intrinsics); anything not listed there is an
/// illegal access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Free functions (`callTool`, `parseInt`, ...). Never bound as a value.
    Global,
    Math,
    Json,
    Object,
    Array,
    Number,
    String,
    Boolean,
    Promise,
    Console,
    Error,
    TypeError,
    RangeError,
}

impl Namespace {
    /// The global name this namespace is bound to.
    pub fn name(self) -> &'static str {
        match self {
            Self::Global => "globalThis",
            Self::Math => "Math",
            Self::Json => "JSON",
            Self::Object => "Object",
            Self::Array => "Array",
            Self::Number => "Number",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Promise => "Promise",
            Self::Console => "console",
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::RangeError => "RangeError",
        }
    }

    /// Whether `Name(...)` is a valid call.
    pub fn is_callable(self) -> bool {
        matches!(
            self,
            Self::Number
                | Self::String
                | Self::Boolean
                | Self::Error
                | Self::TypeError
                | Self::RangeError
        )
    }

    /// Whether `new Name(...)` is a valid construction.
    pub fn is_error_class(self) -> bool {
        matches!(self, Self::Error | Self::TypeError | Self::RangeError)
    }
}

/// A static intrinsic function such as `Math.max` or `callTool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    /// Owning namespace.
    pub namespace: Namespace,
    /// Member name, taken from the whitelist table.
    pub name: &'static str,
}

/// A whitelisted prototype method read off a primitive or array, such as
/// `items.map` or `name.trim`.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    /// The value the method was read from.
    pub receiver: Value,
    /// Method name, taken from the whitelist table.
    pub name: &'static str,
}

/// Anything a script can call.
#[derive(Debug, Clone)]
pub enum Callable {
    /// A script arrow function.
    Closure(ClosureId),
    /// A static intrinsic.
    Builtin(Builtin),
    /// A prototype method bound to its receiver.
    Method(Rc<BoundMethod>),
}

/// A script value.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayId),
    Object(ObjId),
    Function(Callable),
    Namespace(Namespace),
}

impl Value {
    /// `undefined` or `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Whether the value can be called.
    pub fn is_callable(&self) -> bool {
        match self {
            Self::Function(_) => true,
            Self::Namespace(ns) => ns.is_callable(),
            _ => false,
        }
    }

    /// The string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The `typeof` result.
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) | Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Namespace(ns) if ns.is_callable() => "function",
            Self::Namespace(_) => "object",
        }
    }

    /// A short description used in type error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => crate::numeric::number_to_string(*n),
            Self::String(s) => {
                let shown: String = s.chars().take(32).collect();
                format!("\"{shown}\"")
            }
            Self::Array(_) => "array".into(),
            Self::Object(_) => "object".into(),
            Self::Function(_) => "function".into(),
            Self::Namespace(ns) => ns.name().into(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
