//! Async tree-walking evaluator.
//!
//! One [`Interpreter`] lives for exactly one run. Values are plain data in
//! a per-run [`Heap`]; scopes form an index arena ([`Scopes`]). The only
//! suspension point is the tool dispatch inside `callTool`, so evaluation
//! between two tool calls is a straight-line computation that the governor
//! meters at every loop iteration and every closure call.

mod console;
mod heap;
mod intrinsics;
mod ops;
mod scope;
mod value;

use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value as JsonValue;

use crate::ast::*;
use crate::ast_validator::is_banned_global;
use crate::bridge::Bridge;
use crate::error::{AccessKind, Budget, EnclaveError, ScriptError};
use crate::governor::{Governor, Limits};
use crate::sanitize::json_size;

use self::console::LogBuffer;
use self::heap::{Closure, Heap, JsObject, PropertyMap};
use self::ops::{truthy, JsonMode};
use self::scope::{BindingError, ScopeId, Scopes};
use self::value::{Builtin, Callable, Namespace, Value};

type Eval<T> = Result<T, EnclaveError>;

/// Limits that apply to a single run.
#[derive(Debug, Clone)]
pub(crate) struct RunLimits {
    pub governor: Limits,
    pub max_string_length: usize,
    pub max_array_length: usize,
    pub max_allocated_bytes: usize,
    pub max_log_entries: usize,
    pub max_log_entry_len: usize,
    pub max_output_size: usize,
}

/// Everything a run needs from the outside.
pub(crate) struct Environment {
    pub limits: RunLimits,
    pub bridge: Bridge,
    pub context: Option<JsonValue>,
}

/// Terminal state of a run.
#[derive(Debug)]
pub(crate) struct Evaluation {
    pub outcome: Result<JsonValue, EnclaveError>,
    pub logs: Vec<String>,
    pub tool_calls: usize,
}

/// Evaluate a validated program.
pub(crate) async fn evaluate(program: &Program, env: Environment) -> Evaluation {
    let mut interpreter = Interpreter::new(env.limits, env.bridge);
    let outcome = match interpreter.install_globals(env.context) {
        Ok(()) => interpreter.run(program).await,
        Err(e) => Err(e),
    };
    if let Err(EnclaveError::ResourceExhausted(budget)) = &outcome {
        tracing::warn!(budget = %budget, "run aborted: budget exhausted");
    }
    Evaluation {
        outcome,
        tool_calls: interpreter.governor.tool_calls(),
        logs: interpreter.console.into_entries(),
    }
}

/// Namespaces bound in the root scope.
const GLOBAL_NAMESPACES: &[Namespace] = &[
    Namespace::Math,
    Namespace::Json,
    Namespace::Object,
    Namespace::Array,
    Namespace::Number,
    Namespace::String,
    Namespace::Boolean,
    Namespace::Promise,
    Namespace::Console,
    Namespace::Error,
    Namespace::TypeError,
    Namespace::RangeError,
];

/// How a statement finished.
#[derive(Debug)]
enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Whether a pattern declares new bindings or assigns existing ones.
#[derive(Debug, Clone, Copy)]
enum BindMode {
    Declare { mutable: bool },
    Assign,
}

/// Something that can be read and written.
enum Reference<'a> {
    Binding(&'a str),
    Property {
        object: Value,
        key: Rc<str>,
        computed: bool,
    },
}

#[derive(Debug)]
struct CallFrame {
    name: Rc<str>,
    call_site: Span,
}

pub(crate) struct Interpreter<'a> {
    heap: Heap<'a>,
    scopes: Scopes<'a>,
    scope: ScopeId,
    governor: Governor,
    bridge: Bridge,
    limits: RunLimits,
    allocated: usize,
    console: LogBuffer,
    frames: Vec<CallFrame>,
    span: Span,
}

impl<'a> Interpreter<'a> {
    fn new(limits: RunLimits, bridge: Bridge) -> Self {
        let mut scopes = Scopes::new();
        let root = scopes.push(None);
        Self {
            heap: Heap::new(),
            scopes,
            scope: root,
            governor: Governor::new(limits.governor),
            bridge,
            console: LogBuffer::new(limits.max_log_entries, limits.max_log_entry_len),
            limits,
            allocated: 0,
            frames: vec![CallFrame {
                name: Rc::from("<script>"),
                call_site: Span::default(),
            }],
            span: Span::default(),
        }
    }

    fn install_globals(&mut self, context: Option<JsonValue>) -> Eval<()> {
        let root = self.scope;
        for ns in GLOBAL_NAMESPACES {
            self.scopes.declare(root, ns.name(), Value::Namespace(*ns), false);
        }
        for &name in intrinsics::GLOBAL_FUNCTIONS {
            let builtin = Builtin {
                namespace: Namespace::Global,
                name,
            };
            self.scopes
                .declare(root, name, Value::Function(Callable::Builtin(builtin)), false);
        }
        self.scopes.declare(root, "undefined", Value::Undefined, false);
        self.scopes.declare(root, "NaN", Value::Number(f64::NAN), false);
        self.scopes
            .declare(root, "Infinity", Value::Number(f64::INFINITY), false);

        let context = match context {
            Some(json) => self.from_json(&json, true)?,
            None => Value::Object(self.heap.alloc_object(JsObject {
                frozen: true,
                ..JsObject::default()
            })),
        };
        self.scopes.declare(root, "codecallContext", context, false);
        Ok(())
    }

    async fn run(&mut self, program: &'a Program) -> Eval<JsonValue> {
        self.scope = self.scopes.push(Some(self.scope));

        // A script that is a single arrow expression is called with no
        // arguments and its return value is the result.
        let value = match program.body.as_slice() {
            [Stmt {
                kind:
                    StmtKind::Expression(Expr {
                        kind: ExprKind::Arrow(function),
                        ..
                    }),
                span,
            }] => {
                self.span = *span;
                let entry = self.make_closure(function, None)?;
                self.call_value(entry, Vec::new()).await?
            }
            body => match self.exec_body(body).await? {
                Completion::Return(value) => value,
                _ => Value::Undefined,
            },
        };

        let json = self
            .to_json(&value, JsonMode::Sanitize)?
            .unwrap_or(JsonValue::Null);
        if json_size(&json) > self.limits.max_output_size {
            return Err(EnclaveError::OutputTooLarge {
                max: self.limits.max_output_size,
            });
        }
        Ok(json)
    }

    // ── errors ───────────────────────────────────────────────────────────

    /// A script-visible error with a stack built from the call frames.
    fn throw(&self, name: &str, message: impl Into<String>) -> EnclaveError {
        let message = message.into();
        let stack = self.stack_trace(name, &message);
        EnclaveError::Script(ScriptError {
            name: name.to_string(),
            message,
            stack: Some(stack),
        })
    }

    fn stack_trace(&self, name: &str, message: &str) -> String {
        let mut out = format!("{name}: {message}");
        let mut location = self.span;
        for frame in self.frames.iter().rev() {
            out.push_str(&format!("\n    at {} ({location})", frame.name));
            location = frame.call_site;
        }
        out
    }

    fn binding_error(&self, name: &str, err: BindingError) -> EnclaveError {
        match err {
            BindingError::Undeclared => self.throw("ReferenceError", format!("{name} is not defined")),
            BindingError::Uninitialized => self.throw(
                "ReferenceError",
                format!("Cannot access '{name}' before initialization"),
            ),
            BindingError::Constant => self.throw("TypeError", "Assignment to constant variable."),
        }
    }

    /// Charge the run's allocation budget.
    fn charge(&mut self, bytes: usize) -> Eval<()> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > self.limits.max_allocated_bytes {
            return Err(Budget::Memory {
                max: self.limits.max_allocated_bytes,
            }
            .into());
        }
        Ok(())
    }

    // ── bindings ─────────────────────────────────────────────────────────

    fn lookup(&self, name: &str) -> Eval<Value> {
        if is_banned_global(name) {
            return Err(disallowed_global(name));
        }
        self.scopes
            .get(self.scope, name)
            .map_err(|e| self.binding_error(name, e))
    }

    fn assign_binding(&mut self, name: &str, value: Value) -> Eval<()> {
        if is_banned_global(name) {
            return Err(disallowed_global(name));
        }
        let scope = self.scope;
        match self.scopes.set(scope, name, value) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.binding_error(name, e)),
        }
    }

    fn bind_name(&mut self, name: &'a str, value: Value, mode: BindMode) -> Eval<()> {
        match mode {
            BindMode::Declare { mutable } => {
                if is_banned_global(name) {
                    return Err(disallowed_global(name));
                }
                self.scopes.declare(self.scope, name, value, mutable);
                Ok(())
            }
            BindMode::Assign => self.assign_binding(name, value),
        }
    }

    fn bind_pattern<'s>(
        &'s mut self,
        pattern: &'a Pattern,
        value: Value,
        mode: BindMode,
    ) -> LocalBoxFuture<'s, Eval<()>> {
        async move {
            match pattern {
                Pattern::Identifier(name) => self.bind_name(name, value, mode),
                Pattern::Object { properties, rest } => {
                    if value.is_nullish() {
                        return Err(self.throw(
                            "TypeError",
                            format!("Cannot destructure '{}' as it is {}.", value.describe(), value.describe()),
                        ));
                    }
                    let mut used: Vec<Rc<str>> = Vec::with_capacity(properties.len());
                    for property in properties {
                        let (key, computed) = match &property.key {
                            PropertyKey::Static(key) => (Rc::from(key.as_str()), false),
                            PropertyKey::Computed(expr) => {
                                let key = self.eval(expr).await?;
                                (self.to_property_key(&key)?, true)
                            }
                        };
                        let item = self.get_property(&value, &key, computed)?;
                        used.push(key);
                        self.bind_element(&property.value, item, mode).await?;
                    }
                    if let Some(rest) = rest {
                        let mut props = PropertyMap::new();
                        if let Value::Object(id) = &value {
                            for (k, v) in self.heap.object(*id).props.iter() {
                                if !used.iter().any(|u| u == k) {
                                    props.insert(k.clone(), v.clone());
                                }
                            }
                        }
                        let rest_value = self.new_object(props)?;
                        self.bind_name(rest, rest_value, mode)?;
                    }
                    Ok(())
                }
                Pattern::Array { elements, rest } => {
                    let items = self.iterate(&value)?;
                    for (i, element) in elements.iter().enumerate() {
                        if let Some(element) = element {
                            let item = items.get(i).cloned().unwrap_or(Value::Undefined);
                            self.bind_element(element, item, mode).await?;
                        }
                    }
                    if let Some(rest) = rest {
                        let tail: Vec<Value> = items.into_iter().skip(elements.len()).collect();
                        let tail = self.new_array(tail)?;
                        self.bind_pattern(rest, tail, mode).await?;
                    }
                    Ok(())
                }
            }
        }
        .boxed_local()
    }

    async fn bind_element(
        &mut self,
        element: &'a PatternElement,
        value: Value,
        mode: BindMode,
    ) -> Eval<()> {
        let value = match (&value, &element.default) {
            (Value::Undefined, Some(default)) => match &element.target {
                Pattern::Identifier(name) => self.eval_named(default, name).await?,
                _ => self.eval(default).await?,
            },
            _ => value,
        };
        self.bind_pattern(&element.target, value, mode).await
    }

    async fn declare_variables(&mut self, decl: &'a VariableDeclaration) -> Eval<()> {
        let mode = BindMode::Declare {
            mutable: decl.kind.is_mutable(),
        };
        for declarator in &decl.declarations {
            let value = match (&declarator.init, &declarator.target) {
                (Some(init), Pattern::Identifier(name)) => self.eval_named(init, name).await?,
                (Some(init), _) => self.eval(init).await?,
                (None, _) => Value::Undefined,
            };
            self.bind_pattern(&declarator.target, value, mode).await?;
        }
        Ok(())
    }

    /// Reserve every `let`/`const` name declared directly in `stmts`.
    fn hoist(&mut self, stmts: &'a [Stmt]) {
        for stmt in stmts {
            if let StmtKind::VariableDeclaration(decl) = &stmt.kind {
                for declarator in &decl.declarations {
                    for name in declarator.target.bound_names() {
                        self.scopes.hoist(self.scope, name, decl.kind.is_mutable());
                    }
                }
            }
        }
    }

    // ── statements ───────────────────────────────────────────────────────

    async fn exec_body(&mut self, stmts: &'a [Stmt]) -> Eval<Completion> {
        self.hoist(stmts);
        for stmt in stmts {
            match self.exec_stmt(stmt).await? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    async fn exec_block(&mut self, stmts: &'a [Stmt]) -> Eval<Completion> {
        let outer = self.scope;
        let block = self.scopes.push(Some(outer));
        self.scope = block;
        let completion = self.exec_body(stmts).await;
        self.scopes.pop(block);
        self.scope = outer;
        completion
    }

    fn exec_stmt<'s>(&'s mut self, stmt: &'a Stmt) -> LocalBoxFuture<'s, Eval<Completion>> {
        async move {
            self.span = stmt.span;
            match &stmt.kind {
                StmtKind::VariableDeclaration(decl) => {
                    self.declare_variables(decl).await?;
                    Ok(Completion::Normal)
                }
                StmtKind::Expression(expr) => {
                    self.eval(expr).await?;
                    Ok(Completion::Normal)
                }
                StmtKind::Block(stmts) => self.exec_block(stmts).await,
                StmtKind::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    let test = self.eval(test).await?;
                    if truthy(&test) {
                        self.exec_stmt(consequent).await
                    } else if let Some(alternate) = alternate {
                        self.exec_stmt(alternate).await
                    } else {
                        Ok(Completion::Normal)
                    }
                }
                StmtKind::For(for_stmt) => self.exec_for(for_stmt).await,
                StmtKind::ForOf(for_of) => self.exec_for_of(for_of).await,
                StmtKind::Return(argument) => {
                    let value = match argument {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::Undefined,
                    };
                    Ok(Completion::Return(value))
                }
                StmtKind::Throw(argument) => {
                    let value = self.eval(argument).await?;
                    self.span = stmt.span;
                    Err(self.thrown(&value))
                }
                StmtKind::Break => Ok(Completion::Break),
                StmtKind::Continue => Ok(Completion::Continue),
                StmtKind::Empty => Ok(Completion::Normal),
                StmtKind::While { .. } => Err(forbidden("'while' loops")),
                StmtKind::DoWhile { .. } => Err(forbidden("'do...while' loops")),
                StmtKind::FunctionDeclaration(_) => Err(forbidden("function declarations")),
            }
        }
        .boxed_local()
    }

    async fn exec_for(&mut self, for_stmt: &'a ForStatement) -> Eval<Completion> {
        let outer = self.scope;
        let mut iteration_scope = self.scopes.push(Some(outer));
        self.scope = iteration_scope;
        match &for_stmt.init {
            Some(ForInit::Declaration(decl)) => self.declare_variables(decl).await?,
            Some(ForInit::Expression(expr)) => {
                self.eval(expr).await?;
            }
            None => {}
        }

        let mut iteration = 0u64;
        let completion = loop {
            if let Some(test) = &for_stmt.test {
                let test = self.eval(test).await?;
                if !truthy(&test) {
                    break Completion::Normal;
                }
            }
            iteration += 1;
            self.governor.tick_loop(iteration)?;
            match self.exec_stmt(&for_stmt.body).await? {
                Completion::Break => break Completion::Normal,
                Completion::Return(value) => break Completion::Return(value),
                Completion::Normal | Completion::Continue => {}
            }
            // Closures created in the body keep this iteration's bindings;
            // the next iteration continues on a copy.
            if self.scopes.is_captured(iteration_scope) {
                let next = self.scopes.fork(iteration_scope);
                self.scopes.pop(iteration_scope);
                iteration_scope = next;
                self.scope = next;
            }
            if let Some(update) = &for_stmt.update {
                self.eval(update).await?;
            }
        };

        self.scopes.pop(iteration_scope);
        self.scope = outer;
        Ok(completion)
    }

    async fn exec_for_of(&mut self, for_of: &'a ForOfStatement) -> Eval<Completion> {
        let iterable = self.eval(&for_of.iterable).await?;
        let items = self.iterate(&iterable)?;
        let mode = BindMode::Declare {
            mutable: for_of.kind.is_mutable(),
        };
        let outer = self.scope;
        for (i, item) in items.into_iter().enumerate() {
            self.governor.tick_loop(i as u64 + 1)?;
            let scope = self.scopes.push(Some(outer));
            self.scope = scope;
            self.bind_pattern(&for_of.target, item, mode).await?;
            let completion = self.exec_stmt(&for_of.body).await?;
            self.scopes.pop(scope);
            self.scope = outer;
            match completion {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    /// The error a `throw` statement raises.
    fn thrown(&self, value: &Value) -> EnclaveError {
        if let Value::Object(id) = value {
            let props = &self.heap.object(*id).props;
            if let Some(Value::String(message)) = props.get("message") {
                let name = match props.get("name") {
                    Some(Value::String(name)) => name.to_string(),
                    _ => "Error".to_string(),
                };
                return self.throw(&name, message.to_string());
            }
        }
        match value {
            Value::String(message) => self.throw("Error", message.to_string()),
            other => self.throw("Error", self.inspect(other)),
        }
    }

    // ── expressions ──────────────────────────────────────────────────────

    fn eval<'s>(&'s mut self, expr: &'a Expr) -> LocalBoxFuture<'s, Eval<Value>> {
        async move {
            match &expr.kind {
                ExprKind::Number(n) => Ok(Value::Number(*n)),
                ExprKind::String(s) => Ok(Value::String(Rc::from(s.as_str()))),
                ExprKind::Bool(b) => Ok(Value::Bool(*b)),
                ExprKind::Null => Ok(Value::Null),
                ExprKind::Template {
                    quasis,
                    expressions,
                } => {
                    let mut out = String::new();
                    for (i, quasi) in quasis.iter().enumerate() {
                        out.push_str(quasi);
                        if let Some(expr) = expressions.get(i) {
                            let value = self.eval(expr).await?;
                            out.push_str(&self.to_display(&value)?);
                            self.check_string_length(out.len())?;
                        }
                    }
                    self.make_string(out)
                }
                ExprKind::Identifier(name) => self.lookup(name),
                ExprKind::Array(elements) => {
                    let mut items = Vec::with_capacity(elements.len());
                    for element in elements {
                        match element {
                            ArrayElement::Expr(expr) => items.push(self.eval(expr).await?),
                            ArrayElement::Spread(expr) => {
                                let value = self.eval(expr).await?;
                                items.extend(self.iterate(&value)?);
                                self.check_array_length(items.len())?;
                            }
                            ArrayElement::Hole => items.push(Value::Undefined),
                        }
                    }
                    self.new_array(items)
                }
                ExprKind::Object(members) => self.eval_object(members).await,
                ExprKind::Arrow(function) => self.make_closure(function, None),
                ExprKind::Unary { op, argument } => self.eval_unary(*op, argument).await,
                ExprKind::Update {
                    op,
                    prefix,
                    target,
                } => {
                    let reference = self.reference(target).await?;
                    let old = self.read(&reference)?;
                    let old = self.to_number(&old)?;
                    let new = match op {
                        UpdateOp::Increment => old + 1.0,
                        UpdateOp::Decrement => old - 1.0,
                    };
                    self.write(&reference, Value::Number(new))?;
                    Ok(Value::Number(if *prefix { new } else { old }))
                }
                ExprKind::Binary { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    self.binary(*op, &left, &right)
                }
                ExprKind::Logical { op, left, right } => {
                    let left = self.eval(left).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !truthy(&left),
                        LogicalOp::Or => truthy(&left),
                        LogicalOp::Nullish => !left.is_nullish(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(right).await
                    }
                }
                ExprKind::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    let test = self.eval(test).await?;
                    if truthy(&test) {
                        self.eval(consequent).await
                    } else {
                        self.eval(alternate).await
                    }
                }
                ExprKind::Assign { op, target, value } => self.eval_assign(*op, target, value).await,
                ExprKind::Member { .. } | ExprKind::Call { .. } => {
                    Ok(self.eval_chain(expr).await?.unwrap_or(Value::Undefined))
                }
                ExprKind::New { callee, arguments } => {
                    let constructor = self.eval(callee).await?;
                    let args = self.eval_arguments(arguments).await?;
                    self.span = expr.span;
                    match constructor {
                        Value::Namespace(ns) if ns.is_error_class() => self.construct_error(ns, &args),
                        _ => Err(self.throw(
                            "TypeError",
                            format!("{} is not a constructor", describe_callee(callee)),
                        )),
                    }
                }
                // Tool calls complete before `callTool` returns, so there is
                // never a pending value to wait for.
                ExprKind::Await(argument) => self.eval(argument).await,
            }
        }
        .boxed_local()
    }

    /// Evaluate `expr`, naming it after `name` when it is an arrow function.
    async fn eval_named(&mut self, expr: &'a Expr, name: &str) -> Eval<Value> {
        match &expr.kind {
            ExprKind::Arrow(function) => self.make_closure(function, Some(Rc::from(name))),
            _ => self.eval(expr).await,
        }
    }

    fn make_closure(&mut self, function: &'a ArrowFunction, name: Option<Rc<str>>) -> Eval<Value> {
        self.charge(ops::OBJECT_OVERHEAD)?;
        self.scopes.capture(self.scope);
        let id = self.heap.alloc_closure(Closure {
            function,
            scope: self.scope,
            name,
        });
        Ok(Value::Function(Callable::Closure(id)))
    }

    async fn eval_object(&mut self, members: &'a [ObjectMember]) -> Eval<Value> {
        let mut props = PropertyMap::new();
        for member in members {
            match member {
                ObjectMember::Property { key, value } => {
                    let key: Rc<str> = match key {
                        PropertyKey::Static(key) => Rc::from(key.as_str()),
                        PropertyKey::Computed(expr) => {
                            let key = self.eval(expr).await?;
                            let key = self.to_property_key(&key)?;
                            self.check_key(&key, true)?;
                            key
                        }
                    };
                    let value = self.eval_named(value, &key).await?;
                    props.insert(key, value);
                }
                ObjectMember::Spread(expr) => {
                    let source = self.eval(expr).await?;
                    for (key, value) in self.own_entries(&source)? {
                        props.insert(key, value);
                    }
                }
            }
        }
        self.new_object(props)
    }

    async fn eval_unary(&mut self, op: UnaryOp, argument: &'a Expr) -> Eval<Value> {
        if op == UnaryOp::TypeOf {
            if let ExprKind::Identifier(name) = &argument.kind {
                if !is_banned_global(name) && !self.scopes.is_declared(self.scope, name) {
                    return Ok(Value::String(Rc::from("undefined")));
                }
            }
        }
        let value = self.eval(argument).await?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!truthy(&value)),
            UnaryOp::Minus => Value::Number(-self.to_number(&value)?),
            UnaryOp::Plus => Value::Number(self.to_number(&value)?),
            UnaryOp::BitNot => {
                Value::Number(f64::from(!crate::numeric::to_int32(self.to_number(&value)?)))
            }
            UnaryOp::TypeOf => Value::String(Rc::from(value.type_of())),
            UnaryOp::Void => Value::Undefined,
        })
    }

    async fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &'a AssignTarget,
        value: &'a Expr,
    ) -> Eval<Value> {
        let reference = match target {
            AssignTarget::Pattern(pattern) => {
                let value = self.eval(value).await?;
                self.bind_pattern(pattern, value.clone(), BindMode::Assign)
                    .await?;
                return Ok(value);
            }
            AssignTarget::Identifier(name) => Reference::Binding(name),
            AssignTarget::Member { object, property } => {
                let object = self.eval(object).await?;
                let (key, computed) = self.member_key(property).await?;
                Reference::Property {
                    object,
                    key,
                    computed,
                }
            }
        };

        let result = match op {
            AssignOp::Assign => match &reference {
                Reference::Binding(name) => self.eval_named(value, name).await?,
                Reference::Property { .. } => self.eval(value).await?,
            },
            AssignOp::Compound(binary) => {
                let current = self.read(&reference)?;
                let rhs = self.eval(value).await?;
                self.binary(binary, &current, &rhs)?
            }
            AssignOp::Logical(logical) => {
                let current = self.read(&reference)?;
                let keep = match logical {
                    LogicalOp::And => !truthy(&current),
                    LogicalOp::Or => truthy(&current),
                    LogicalOp::Nullish => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                self.eval(value).await?
            }
        };
        self.write(&reference, result.clone())?;
        Ok(result)
    }

    async fn reference(&mut self, target: &'a Expr) -> Eval<Reference<'a>> {
        match &target.kind {
            ExprKind::Identifier(name) => Ok(Reference::Binding(name)),
            ExprKind::Member {
                object,
                property,
                optional: false,
            } => {
                let object = self.eval(object).await?;
                let (key, computed) = self.member_key(property).await?;
                Ok(Reference::Property {
                    object,
                    key,
                    computed,
                })
            }
            _ => Err(self.throw("SyntaxError", "Invalid left-hand side expression")),
        }
    }

    fn read(&self, reference: &Reference<'a>) -> Eval<Value> {
        match reference {
            Reference::Binding(name) => self.lookup(name),
            Reference::Property {
                object,
                key,
                computed,
            } => self.get_property(object, key, *computed),
        }
    }

    fn write(&mut self, reference: &Reference<'a>, value: Value) -> Eval<()> {
        match reference {
            Reference::Binding(name) => self.assign_binding(name, value),
            Reference::Property {
                object,
                key,
                computed,
            } => self.set_property(object, key, value, *computed),
        }
    }

    async fn member_key(&mut self, property: &'a MemberProperty) -> Eval<(Rc<str>, bool)> {
        match property {
            MemberProperty::Static(name) => Ok((Rc::from(name.as_str()), false)),
            MemberProperty::Computed(expr) => {
                let key = self.eval(expr).await?;
                Ok((self.to_property_key(&key)?, true))
            }
        }
    }

    /// Member and call chains. `None` means an optional link short-circuited
    /// the rest of the chain.
    fn eval_chain<'s>(&'s mut self, expr: &'a Expr) -> LocalBoxFuture<'s, Eval<Option<Value>>> {
        async move {
            match &expr.kind {
                ExprKind::Member {
                    object,
                    property,
                    optional,
                } => {
                    let Some(target) = self.eval_chain(object).await? else {
                        return Ok(None);
                    };
                    if *optional && target.is_nullish() {
                        return Ok(None);
                    }
                    let (key, computed) = self.member_key(property).await?;
                    self.span = expr.span;
                    self.get_property(&target, &key, computed).map(Some)
                }
                ExprKind::Call {
                    callee,
                    arguments,
                    optional,
                } => {
                    let Some(function) = self.eval_chain(callee).await? else {
                        return Ok(None);
                    };
                    if *optional && function.is_nullish() {
                        return Ok(None);
                    }
                    let args = self.eval_arguments(arguments).await?;
                    self.span = expr.span;
                    if !function.is_callable() {
                        return Err(self.throw(
                            "TypeError",
                            format!("{} is not a function", describe_callee(callee)),
                        ));
                    }
                    self.call_value(function, args).await.map(Some)
                }
                _ => self.eval(expr).await.map(Some),
            }
        }
        .boxed_local()
    }

    async fn eval_arguments(&mut self, arguments: &'a [Argument]) -> Eval<Vec<Value>> {
        let mut out = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match argument {
                Argument::Expr(expr) => out.push(self.eval(expr).await?),
                Argument::Spread(expr) => {
                    let value = self.eval(expr).await?;
                    out.extend(self.iterate(&value)?);
                    self.check_array_length(out.len())?;
                }
            }
        }
        Ok(out)
    }

    // ── calls ────────────────────────────────────────────────────────────

    fn call_value<'s>(&'s mut self, function: Value, args: Vec<Value>) -> LocalBoxFuture<'s, Eval<Value>> {
        async move {
            match function {
                Value::Function(Callable::Closure(id)) => {
                    let closure = self.heap.closure(id).clone();
                    self.call_closure(closure, args).await
                }
                Value::Function(Callable::Builtin(builtin)) => self.call_builtin(builtin, args).await,
                Value::Function(Callable::Method(method)) => {
                    self.call_method(&method.receiver, method.name, args).await
                }
                Value::Namespace(ns) if ns.is_callable() => self.call_namespace(ns, &args),
                other => Err(self.throw("TypeError", format!("{} is not a function", other.describe()))),
            }
        }
        .boxed_local()
    }

    async fn call_closure(&mut self, closure: Closure<'a>, args: Vec<Value>) -> Eval<Value> {
        self.governor.tick_callback()?;
        if !self.governor.enter_call() {
            return Err(self.throw("RangeError", "Maximum call stack size exceeded"));
        }
        let saved_scope = self.scope;
        let saved_span = self.span;
        self.frames.push(CallFrame {
            name: closure.name.clone().unwrap_or_else(|| Rc::from("<anonymous>")),
            call_site: self.span,
        });
        let scope = self.scopes.push(Some(closure.scope));
        self.scope = scope;

        let result = self.invoke(closure.function, args).await;

        self.scopes.pop(scope);
        self.scope = saved_scope;
        self.span = saved_span;
        self.frames.pop();
        self.governor.exit_call();
        result
    }

    async fn invoke(&mut self, function: &'a ArrowFunction, args: Vec<Value>) -> Eval<Value> {
        let mode = BindMode::Declare { mutable: true };
        let mut args = args.into_iter();
        for param in &function.params {
            let arg = args.next().unwrap_or(Value::Undefined);
            self.bind_element(param, arg, mode).await?;
        }
        if let Some(rest) = &function.rest {
            let rest_value = self.new_array(args.collect())?;
            self.bind_pattern(rest, rest_value, mode).await?;
        }
        match &function.body {
            ArrowBody::Expression(expr) => self.eval(expr).await,
            ArrowBody::Block(stmts) => match self.exec_body(stmts).await? {
                Completion::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
        }
    }
}

fn disallowed_global(name: &str) -> EnclaveError {
    EnclaveError::illegal(
        AccessKind::DisallowedGlobal,
        format!("'{name}' is not available in the enclave; use callTool() to reach external systems"),
    )
}

fn forbidden(what: &str) -> EnclaveError {
    EnclaveError::illegal(
        AccessKind::ForbiddenConstruct,
        format!("{what} are not supported in the enclave"),
    )
}

/// Source-like name of a callee for error messages.
fn describe_callee(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Identifier(name) => name.clone(),
        ExprKind::Member {
            object,
            property: MemberProperty::Static(name),
            ..
        } => format!("{}.{name}", describe_callee(object)),
        ExprKind::Member { object, .. } => format!("{}[...]", describe_callee(object)),
        ExprKind::Call { callee, .. } => format!("{}(...)", describe_callee(callee)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::governor::Limits;
    use crate::FnToolHandler;

    pub(super) fn limits() -> RunLimits {
        RunLimits {
            governor: Limits::default(),
            max_string_length: 1 << 20,
            max_array_length: 100_000,
            max_allocated_bytes: 64 << 20,
            max_log_entries: 100,
            max_log_entry_len: 4096,
            max_output_size: 1 << 20,
        }
    }

    pub(super) async fn eval_with(src: &str, limits: RunLimits) -> Evaluation {
        let program = crate::parser::parse(src).expect("test script must parse");
        let handler = Arc::new(FnToolHandler::new(|name, args| {
            Ok(json!({"tool": name, "args": args}))
        }));
        let env = Environment {
            limits,
            bridge: Bridge::new(handler, None, vec!["codecall:".into()], 1 << 20),
            context: Some(json!({"user": {"id": 7}})),
        };
        evaluate(&program, env).await
    }

    pub(super) async fn eval_ok(src: &str) -> JsonValue {
        match eval_with(src, limits()).await.outcome {
            Ok(value) => value,
            Err(e) => panic!("script failed: {e:?}\n{src}"),
        }
    }

    pub(super) async fn eval_err(src: &str) -> EnclaveError {
        match eval_with(src, limits()).await.outcome {
            Ok(value) => panic!("expected failure, got {value}\n{src}"),
            Err(e) => e,
        }
    }

    fn script_error(err: EnclaveError) -> ScriptError {
        match err {
            EnclaveError::Script(e) => e,
            other => panic!("expected script error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn arithmetic_and_return() {
        assert_eq!(eval_ok("return 1 + 2;").await, json!(3));
        assert_eq!(eval_ok("return '1' + 2;").await, json!("12"));
        assert_eq!(eval_ok("return 7 % 3 * 2 ** 3;").await, json!(8));
        assert_eq!(eval_ok("const x = 1;").await, JsonValue::Null);
    }

    #[tokio::test]
    async fn entry_arrow_is_called() {
        assert_eq!(eval_ok("async () => { return 5; }").await, json!(5));
        assert_eq!(eval_ok("() => [1, 2]").await, json!([1, 2]));
    }

    #[tokio::test]
    async fn closures_capture_per_iteration_bindings() {
        let src = "
            const fns = [];
            for (let i = 0; i < 3; i++) { fns.push(() => i); }
            return fns.map(f => f());
        ";
        assert_eq!(eval_ok(src).await, json!([0, 1, 2]));
    }

    #[tokio::test]
    async fn destructuring_with_defaults_and_rest() {
        let src = "
            const { a, b: { c = 3 } = {}, ...rest } = { a: 1, d: 4, e: 5 };
            const [x, , y = 9, ...tail] = [1, 2, undefined, 4, 5];
            return [a, c, rest, x, y, tail];
        ";
        assert_eq!(
            eval_ok(src).await,
            json!([1, 3, {"d": 4, "e": 5}, 1, 9, [4, 5]])
        );
    }

    #[tokio::test]
    async fn optional_chaining_short_circuits() {
        assert_eq!(
            eval_ok("const o = null; return [o?.a.b.c, o?.f(), codecallContext.user?.id];").await,
            json!([null, null, 7])
        );
    }

    #[tokio::test]
    async fn context_is_frozen() {
        let err = script_error(eval_err("codecallContext.user.id = 1;").await);
        assert_eq!(err.name, "TypeError");
    }

    #[tokio::test]
    async fn const_assignment_and_tdz() {
        let err = script_error(eval_err("const a = 1; a = 2;").await);
        assert_eq!(err.message, "Assignment to constant variable.");
        let err = script_error(eval_err("const f = () => later; f(); const later = 1;").await);
        assert_eq!(err.name, "ReferenceError");
        let err = script_error(eval_err("return missing;").await);
        assert_eq!(err.message, "missing is not defined");
    }

    #[tokio::test]
    async fn typeof_undeclared_is_undefined() {
        assert_eq!(eval_ok("return typeof nothing;").await, json!("undefined"));
    }

    #[tokio::test]
    async fn stack_traces_name_script_frames() {
        let src = "const inner = () => null.x;\nconst outer = () => inner();\nouter();";
        let err = script_error(eval_err(src).await);
        assert_eq!(err.name, "TypeError");
        let stack = err.stack.unwrap();
        let lines: Vec<&str> = stack.lines().collect();
        assert!(lines[0].starts_with("TypeError: Cannot read properties of null"), "{stack}");
        assert!(lines[1].starts_with("    at inner (1:"), "{stack}");
        assert!(lines[2].starts_with("    at outer (2:"), "{stack}");
        assert!(lines[3].starts_with("    at <script> (3:"), "{stack}");
    }

    #[tokio::test]
    async fn throw_uses_error_name_and_message() {
        let err = script_error(eval_err("throw new RangeError('too far');").await);
        assert_eq!((err.name.as_str(), err.message.as_str()), ("RangeError", "too far"));
        let err = script_error(eval_err("throw 'plain';").await);
        assert_eq!((err.name.as_str(), err.message.as_str()), ("Error", "plain"));
    }

    #[tokio::test]
    async fn loop_budget_aborts() {
        let err = eval_err("for (let i = 0; i < 1e9; i++) {}").await;
        assert!(matches!(
            err,
            EnclaveError::ResourceExhausted(Budget::LoopIterations { max: 10_000 })
        ));
    }

    #[tokio::test]
    async fn break_and_continue() {
        let src = "
            const out = [];
            for (let i = 0; i < 10; i++) {
                if (i % 2) continue;
                if (i > 6) break;
                out.push(i);
            }
            for (const x of [1, 2, 3]) { if (x === 2) break; out.push(x * 10); }
            return out;
        ";
        assert_eq!(eval_ok(src).await, json!([0, 2, 4, 6, 10]));
    }

    #[tokio::test]
    async fn call_depth_is_bounded() {
        // Mutual recursion through an object slips past the static check.
        let src = "
            const o = {};
            o.f = (n) => o.g(n + 1);
            o.g = (n) => o.f(n + 1);
            return o.f(0);
        ";
        let mut shallow = limits();
        shallow.governor.max_call_depth = 16;
        let err = script_error(eval_with(src, shallow).await.outcome.unwrap_err());
        assert_eq!(err.name, "RangeError");
        assert_eq!(err.message, "Maximum call stack size exceeded");
    }

    #[tokio::test]
    async fn cycles_are_stripped_from_results() {
        let src = "const a = { n: 1 }; a.self = a; a.f = () => 1; return a;";
        assert_eq!(eval_ok(src).await, json!({"n": 1}));
    }

    #[tokio::test]
    async fn console_output_is_captured() {
        let eval = eval_with(
            "console.log('a', 1, [1, 2]); console.warn({ k: 'v' }); return null;",
            limits(),
        )
        .await;
        assert_eq!(eval.logs, ["a 1 [1,2]", "[warn] {\"k\":\"v\"}"]);
    }

    #[tokio::test]
    async fn while_is_refused_if_reached() {
        let program = crate::parser::parse_with_options(
            "while (true) {}",
            crate::parser::ParseOptions { permissive: true },
        )
        .unwrap();
        let handler = Arc::new(FnToolHandler::new(|_, args| Ok(args)));
        let env = Environment {
            limits: limits(),
            bridge: Bridge::new(handler, None, Vec::new(), 1024),
            context: None,
        };
        let err = evaluate(&program, env).await.outcome.unwrap_err();
        assert!(matches!(
            err,
            EnclaveError::IllegalAccess {
                kind: AccessKind::ForbiddenConstruct,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn memory_budget_aborts() {
        let mut small = limits();
        small.max_allocated_bytes = 4096;
        let src = "const out = []; for (let i = 0; i < 1000; i++) { out.push('item-' + i); } return out.length;";
        let err = eval_with(src, small).await.outcome.unwrap_err();
        assert!(matches!(
            err,
            EnclaveError::ResourceExhausted(Budget::Memory { max: 4096 })
        ));
    }

    #[tokio::test]
    async fn output_size_is_bounded() {
        let mut small = limits();
        small.max_output_size = 16;
        let err = eval_with("return 'x'.repeat(100);", small)
            .await
            .outcome
            .unwrap_err();
        assert!(matches!(err, EnclaveError::OutputTooLarge { max: 16 }));
    }
}
