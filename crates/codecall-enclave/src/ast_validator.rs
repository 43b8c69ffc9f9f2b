//! Static validator over the parsed AST.
//!
//! Walks every node before evaluation and fails fast on denylisted globals,
//! reflective member names, forbidden constructs, self-recursive arrows and
//! excessive nesting. This is a cheap first layer: the interpreter repeats
//! the global and member checks at runtime, where computed keys are known.
//! False positives are acceptable here, false negatives are not.

use crate::ast::*;
use crate::error::{AccessKind, EnclaveError};
use crate::numeric::number_to_string;

/// Default maximum statement/expression nesting depth.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Globals a script may never name, declare or reach through a computed key.
pub const BANNED_GLOBALS: &[&str] = &[
    "process",
    "require",
    "module",
    "exports",
    "global",
    "globalThis",
    "window",
    "self",
    "document",
    "navigator",
    "location",
    "localStorage",
    "sessionStorage",
    "indexedDB",
    "eval",
    "Function",
    "AsyncFunction",
    "GeneratorFunction",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "clearTimeout",
    "clearInterval",
    "queueMicrotask",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "Worker",
    "importScripts",
    "Deno",
    "Bun",
    "Buffer",
    "Reflect",
    "Proxy",
    "Symbol",
    "WebAssembly",
    "SharedArrayBuffer",
    "Atomics",
    "arguments",
    "__dirname",
    "__filename",
];

/// Member names that reach prototypes or the function machinery.
pub const BANNED_PROPERTIES: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
    "caller",
    "callee",
];

/// Constructors `new` may be applied to.
pub const CONSTRUCTIBLE: &[&str] = &["Error", "TypeError", "RangeError"];

/// Whether `name` is a denylisted global.
pub fn is_banned_global(name: &str) -> bool {
    BANNED_GLOBALS.contains(&name)
}

/// Whether `name` is a denylisted member name.
pub fn is_banned_property(name: &str) -> bool {
    BANNED_PROPERTIES.contains(&name)
}

/// A violation found by the static validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstViolation {
    /// Which rule fired.
    pub kind: AccessKind,
    /// Human-readable description of the violation.
    pub message: String,
}

impl std::fmt::Display for AstViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<AstViolation> for EnclaveError {
    fn from(v: AstViolation) -> Self {
        EnclaveError::IllegalAccess {
            kind: v.kind,
            message: v.message,
        }
    }
}

/// Validate a parsed program.
///
/// Returns `Ok(())` if the program is acceptable, or the first violation
/// found in source order.
pub fn validate(program: &Program, max_nesting_depth: usize) -> Result<(), AstViolation> {
    let mut walker = AstWalker {
        violations: vec![],
        depth: 0,
        max_depth: max_nesting_depth,
    };
    for stmt in &program.body {
        walker.walk_statement(stmt);
        if walker.has_violation() {
            return Err(walker.violations.remove(0));
        }
    }
    Ok(())
}

/// Fold a computed key built only from literals into its string value.
///
/// Handles string and number literals, expression-free templates,
/// templates whose holes fold, and `+` of foldable operands where at least
/// one side is a string.
pub fn fold_constant_key(expr: &Expr) -> Option<String> {
    fold(expr).map(|(text, _)| text)
}

fn fold(expr: &Expr) -> Option<(String, bool)> {
    match &expr.kind {
        ExprKind::String(s) => Some((s.clone(), true)),
        ExprKind::Number(n) => Some((number_to_string(*n), false)),
        ExprKind::Template {
            quasis,
            expressions,
        } => {
            let mut out = String::new();
            for (i, quasi) in quasis.iter().enumerate() {
                out.push_str(quasi);
                if let Some(e) = expressions.get(i) {
                    out.push_str(&fold(e)?.0);
                }
            }
            Some((out, true))
        }
        ExprKind::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => {
            let (l, ls) = fold(left)?;
            let (r, rs) = fold(right)?;
            if ls || rs {
                Some((l + &r, true))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Recursive AST walker that collects violations.
struct AstWalker {
    violations: Vec<AstViolation>,
    depth: usize,
    max_depth: usize,
}

impl AstWalker {
    fn report(&mut self, kind: AccessKind, message: impl Into<String>) {
        self.violations.push(AstViolation {
            kind,
            message: message.into(),
        });
    }

    fn has_violation(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Enter one nesting level. Returns false (after reporting) when the
    /// limit is exceeded.
    fn enter(&mut self) -> bool {
        self.depth += 1;
        if self.depth > self.max_depth {
            let (depth, max) = (self.depth, self.max_depth);
            self.report(
                AccessKind::NestingTooDeep,
                format!("nesting depth {depth} exceeds maximum {max}"),
            );
            return false;
        }
        true
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // --- checks ---

    fn check_identifier(&mut self, name: &str) {
        if is_banned_global(name) {
            self.report(
                AccessKind::DisallowedGlobal,
                format!("'{name}' is not available in the enclave; use callTool() to reach external systems"),
            );
        }
    }

    fn check_binding(&mut self, name: &str) {
        if is_banned_global(name) {
            self.report(
                AccessKind::DisallowedGlobal,
                format!("cannot declare '{name}': the name is reserved"),
            );
        }
    }

    fn check_member_name(&mut self, name: &str, computed: bool) {
        if is_banned_property(name) {
            self.report(
                AccessKind::IllegalBuiltinAccess,
                format!("access to '{name}' is not allowed"),
            );
        } else if computed && is_banned_global(name) {
            self.report(
                AccessKind::IllegalBuiltinAccess,
                format!("computed access to '{name}' is not allowed"),
            );
        }
    }

    fn check_pattern(&mut self, pattern: &Pattern) {
        for name in pattern.bound_names() {
            self.check_binding(name);
            if self.has_violation() {
                return;
            }
        }
        self.walk_pattern_expressions(pattern);
    }

    /// Walk defaults and computed keys inside a binding pattern.
    fn walk_pattern_expressions(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Identifier(_) => {}
            Pattern::Object { properties, .. } => {
                for prop in properties {
                    match &prop.key {
                        PropertyKey::Static(name) => self.check_member_name(name, false),
                        PropertyKey::Computed(expr) => {
                            if let Some(name) = fold_constant_key(expr) {
                                self.check_member_name(&name, true);
                            }
                            self.walk_expression(expr);
                        }
                    }
                    self.walk_element(&prop.value);
                    if self.has_violation() {
                        return;
                    }
                }
            }
            Pattern::Array { elements, rest } => {
                for element in elements.iter().flatten() {
                    self.walk_element(element);
                    if self.has_violation() {
                        return;
                    }
                }
                if let Some(rest) = rest {
                    self.walk_pattern_expressions(rest);
                }
            }
        }
    }

    fn walk_element(&mut self, element: &PatternElement) {
        self.walk_pattern_expressions(&element.target);
        if let Some(default) = &element.default {
            self.walk_expression(default);
        }
    }

    fn check_recursive_binding(&mut self, target: &Pattern, init: &Expr) {
        let (Pattern::Identifier(name), ExprKind::Arrow(arrow)) = (target, &init.kind) else {
            return;
        };
        if arrow_references(arrow, name) {
            self.report(
                AccessKind::RecursiveFunction,
                format!("function '{name}' calls itself; recursion is not allowed in the enclave"),
            );
        }
    }

    // --- walk methods ---

    fn walk_statements(&mut self, stmts: &[Stmt]) {
        for s in stmts {
            self.walk_statement(s);
            if self.has_violation() {
                return;
            }
        }
    }

    fn walk_declaration(&mut self, decl: &VariableDeclaration) {
        for declarator in &decl.declarations {
            self.check_pattern(&declarator.target);
            if self.has_violation() {
                return;
            }
            if let Some(init) = &declarator.init {
                self.check_recursive_binding(&declarator.target, init);
                if self.has_violation() {
                    return;
                }
                self.walk_expression(init);
                if self.has_violation() {
                    return;
                }
            }
        }
    }

    fn walk_statement(&mut self, stmt: &Stmt) {
        if self.has_violation() {
            return;
        }
        if !self.enter() {
            return;
        }
        match &stmt.kind {
            StmtKind::Expression(expr) => self.walk_expression(expr),
            StmtKind::VariableDeclaration(decl) => self.walk_declaration(decl),
            StmtKind::Block(body) => self.walk_statements(body),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.walk_expression(test);
                self.walk_statement(consequent);
                if let Some(alt) = alternate {
                    self.walk_statement(alt);
                }
            }
            StmtKind::For(fors) => {
                match &fors.init {
                    Some(ForInit::Declaration(decl)) => self.walk_declaration(decl),
                    Some(ForInit::Expression(expr)) => self.walk_expression(expr),
                    None => {}
                }
                if let Some(test) = &fors.test {
                    self.walk_expression(test);
                }
                if let Some(update) = &fors.update {
                    self.walk_expression(update);
                }
                self.walk_statement(&fors.body);
            }
            StmtKind::ForOf(fos) => {
                self.check_pattern(&fos.target);
                self.walk_expression(&fos.iterable);
                self.walk_statement(&fos.body);
            }
            StmtKind::Return(arg) => {
                if let Some(arg) = arg {
                    self.walk_expression(arg);
                }
            }
            StmtKind::Throw(arg) => self.walk_expression(arg),
            StmtKind::Break | StmtKind::Continue | StmtKind::Empty => {}
            StmtKind::While { .. } => self.report(
                AccessKind::ForbiddenConstruct,
                "while loops are not allowed; use for or for...of",
            ),
            StmtKind::DoWhile { .. } => self.report(
                AccessKind::ForbiddenConstruct,
                "do...while loops are not allowed; use for or for...of",
            ),
            StmtKind::FunctionDeclaration(f) => self.report(
                AccessKind::ForbiddenConstruct,
                format!("function declaration '{}' is not allowed; use arrow functions", f.name),
            ),
        }
        self.leave();
    }

    fn walk_expression(&mut self, expr: &Expr) {
        if self.has_violation() {
            return;
        }
        if !self.enter() {
            return;
        }
        self.walk_expression_kind(expr);
        self.leave();
    }

    /// Walk the head of a left-associated chain without adding a level.
    fn walk_chain_head(&mut self, expr: &Expr) {
        if self.has_violation() {
            return;
        }
        self.walk_expression_kind(expr);
    }

    fn walk_expression_kind(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::String(_) | ExprKind::Bool(_) | ExprKind::Null => {}
            ExprKind::Identifier(name) => self.check_identifier(name),
            ExprKind::Template { expressions, .. } => {
                for e in expressions {
                    self.walk_expression(e);
                }
            }
            ExprKind::Array(elements) => {
                for element in elements {
                    match element {
                        ArrayElement::Expr(e) | ArrayElement::Spread(e) => self.walk_expression(e),
                        ArrayElement::Hole => {}
                    }
                }
            }
            ExprKind::Object(members) => {
                for member in members {
                    match member {
                        ObjectMember::Property { key, value } => {
                            match key {
                                PropertyKey::Static(name) if name == "__proto__" => {
                                    self.check_member_name(name, false)
                                }
                                PropertyKey::Static(_) => {}
                                PropertyKey::Computed(k) => {
                                    if let Some(name) = fold_constant_key(k) {
                                        self.check_member_name(&name, true);
                                    }
                                    self.walk_expression(k);
                                }
                            }
                            self.walk_expression(value);
                        }
                        ObjectMember::Spread(e) => self.walk_expression(e),
                    }
                }
            }
            ExprKind::Arrow(arrow) => {
                for param in &arrow.params {
                    self.check_pattern(&param.target);
                    if let Some(default) = &param.default {
                        self.walk_expression(default);
                    }
                }
                if let Some(rest) = &arrow.rest {
                    self.check_pattern(rest);
                }
                match &arrow.body {
                    ArrowBody::Expression(e) => self.walk_expression(e),
                    ArrowBody::Block(body) => self.walk_statements(body),
                }
            }
            ExprKind::Unary { argument, .. } => self.walk_expression(argument),
            ExprKind::Await(argument) => self.walk_expression(argument),
            ExprKind::Update { target, .. } => self.walk_expression(target),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.walk_chain_head(left);
                self.walk_expression(right);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.walk_expression(test);
                self.walk_expression(consequent);
                self.walk_expression(alternate);
            }
            ExprKind::Assign { target, value, .. } => {
                match target.as_ref() {
                    AssignTarget::Identifier(name) => self.check_identifier(name),
                    AssignTarget::Member { object, property } => {
                        self.walk_chain_head(object);
                        self.walk_member_property(property);
                    }
                    AssignTarget::Pattern(pattern) => self.check_pattern(pattern),
                }
                self.walk_expression(value);
            }
            ExprKind::Member {
                object, property, ..
            } => {
                self.walk_chain_head(object);
                self.walk_member_property(property);
            }
            ExprKind::Call {
                callee, arguments, ..
            } => {
                self.walk_chain_head(callee);
                self.walk_arguments(arguments);
            }
            ExprKind::New { callee, arguments } => {
                match &callee.kind {
                    ExprKind::Identifier(name) if CONSTRUCTIBLE.contains(&name.as_str()) => {}
                    ExprKind::Identifier(name) if is_banned_global(name) => {
                        self.check_identifier(name)
                    }
                    _ => self.report(
                        AccessKind::IllegalBuiltinAccess,
                        "'new' is only supported for Error, TypeError and RangeError",
                    ),
                }
                self.walk_arguments(arguments);
            }
        }
    }

    fn walk_member_property(&mut self, property: &MemberProperty) {
        match property {
            MemberProperty::Static(name) => self.check_member_name(name, false),
            MemberProperty::Computed(key) => {
                if let Some(name) = fold_constant_key(key) {
                    self.check_member_name(&name, true);
                }
                self.walk_expression(key);
            }
        }
    }

    fn walk_arguments(&mut self, arguments: &[Argument]) {
        for arg in arguments {
            match arg {
                Argument::Expr(e) | Argument::Spread(e) => self.walk_expression(e),
            }
        }
    }
}

/// Whether `name` appears as an identifier anywhere inside `arrow`.
///
/// Shadowing is ignored, so a parameter with the same name also counts.
fn arrow_references(arrow: &ArrowFunction, name: &str) -> bool {
    let mut finder = ReferenceFinder { name, found: false };
    for param in &arrow.params {
        if let Some(default) = &param.default {
            finder.expr(default);
        }
    }
    match &arrow.body {
        ArrowBody::Expression(e) => finder.expr(e),
        ArrowBody::Block(body) => finder.stmts(body),
    }
    finder.found
}

struct ReferenceFinder<'n> {
    name: &'n str,
    found: bool,
}

impl ReferenceFinder<'_> {
    fn stmts(&mut self, stmts: &[Stmt]) {
        for s in stmts {
            self.stmt(s);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        if self.found {
            return;
        }
        match &stmt.kind {
            StmtKind::Expression(e) | StmtKind::Throw(e) => self.expr(e),
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            StmtKind::VariableDeclaration(decl) => self.decl(decl),
            StmtKind::Block(body) => self.stmts(body),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.stmt(consequent);
                if let Some(alt) = alternate {
                    self.stmt(alt);
                }
            }
            StmtKind::For(f) => {
                match &f.init {
                    Some(ForInit::Declaration(decl)) => self.decl(decl),
                    Some(ForInit::Expression(e)) => self.expr(e),
                    None => {}
                }
                for e in f.test.iter().chain(f.update.iter()) {
                    self.expr(e);
                }
                self.stmt(&f.body);
            }
            StmtKind::ForOf(f) => {
                self.expr(&f.iterable);
                self.stmt(&f.body);
            }
            StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                self.expr(test);
                self.stmt(body);
            }
            StmtKind::FunctionDeclaration(f) => self.stmts(&f.body),
            StmtKind::Break | StmtKind::Continue | StmtKind::Empty => {}
        }
    }

    fn decl(&mut self, decl: &VariableDeclaration) {
        for d in &decl.declarations {
            if let Some(init) = &d.init {
                self.expr(init);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        if self.found {
            return;
        }
        match &expr.kind {
            ExprKind::Identifier(n) => self.found = n == self.name,
            ExprKind::Number(_) | ExprKind::String(_) | ExprKind::Bool(_) | ExprKind::Null => {}
            ExprKind::Template { expressions, .. } => {
                for e in expressions {
                    self.expr(e);
                }
            }
            ExprKind::Array(elements) => {
                for el in elements {
                    if let ArrayElement::Expr(e) | ArrayElement::Spread(e) = el {
                        self.expr(e);
                    }
                }
            }
            ExprKind::Object(members) => {
                for m in members {
                    match m {
                        ObjectMember::Property { key, value } => {
                            if let PropertyKey::Computed(k) = key {
                                self.expr(k);
                            }
                            self.expr(value);
                        }
                        ObjectMember::Spread(e) => self.expr(e),
                    }
                }
            }
            ExprKind::Arrow(inner) => {
                for p in &inner.params {
                    if let Some(d) = &p.default {
                        self.expr(d);
                    }
                }
                match &inner.body {
                    ArrowBody::Expression(e) => self.expr(e),
                    ArrowBody::Block(body) => self.stmts(body),
                }
            }
            ExprKind::Unary { argument, .. } | ExprKind::Await(argument) => self.expr(argument),
            ExprKind::Update { target, .. } => self.expr(target),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            ExprKind::Assign { target, value, .. } => {
                if let AssignTarget::Member { object, property } = target.as_ref() {
                    self.expr(object);
                    if let MemberProperty::Computed(k) = property {
                        self.expr(k);
                    }
                }
                self.expr(value);
            }
            ExprKind::Member {
                object, property, ..
            } => {
                self.expr(object);
                if let MemberProperty::Computed(k) = property {
                    self.expr(k);
                }
            }
            ExprKind::Call {
                callee, arguments, ..
            }
            | ExprKind::New { callee, arguments } => {
                self.expr(callee);
                for a in arguments {
                    match a {
                        Argument::Expr(e) | Argument::Spread(e) => self.expr(e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, parse_with_options, ParseOptions};

    fn check(code: &str) -> Result<(), AstViolation> {
        let program = parse(code).expect("test code should parse");
        validate(&program, DEFAULT_MAX_NESTING_DEPTH)
    }

    fn kind_of(code: &str) -> AccessKind {
        check(code).expect_err("expected a violation").kind
    }

    #[test]
    fn ast_01_detects_eval_call() {
        assert_eq!(kind_of(r#"eval("1+1")"#), AccessKind::DisallowedGlobal);
    }

    #[test]
    fn ast_02_detects_bare_process_reference() {
        assert_eq!(kind_of("return process.env.SECRET"), AccessKind::DisallowedGlobal);
    }

    #[test]
    fn ast_03_detects_global_this_and_friends() {
        for code in [
            "globalThis.x",
            "const w = window",
            "require('fs')",
            "setTimeout(() => 1, 10)",
            "fetch('http://x')",
            "new XMLHttpRequest()",
            "const f = Function",
            "typeof document",
        ] {
            assert_eq!(kind_of(code), AccessKind::DisallowedGlobal, "{code}");
        }
    }

    #[test]
    fn ast_04_detects_constructor_chain() {
        assert_eq!(
            kind_of(r#"return "".constructor.constructor("return this")()"#),
            AccessKind::IllegalBuiltinAccess
        );
    }

    #[test]
    fn ast_05_detects_computed_constructor_access() {
        assert_eq!(kind_of(r#"obj["constructor"]"#), AccessKind::IllegalBuiltinAccess);
        assert_eq!(kind_of(r#"obj[`__proto__`]"#), AccessKind::IllegalBuiltinAccess);
    }

    #[test]
    fn ast_06_folds_literal_concatenation_in_keys() {
        assert_eq!(kind_of(r#"obj["con" + "structor"]"#), AccessKind::IllegalBuiltinAccess);
        assert_eq!(kind_of(r#"data['pro' + 'cess']"#), AccessKind::IllegalBuiltinAccess);
        assert_eq!(kind_of(r#"data[`ev${"al"}`]"#), AccessKind::IllegalBuiltinAccess);
    }

    #[test]
    fn ast_07_detects_proto_in_object_literal() {
        assert_eq!(kind_of(r#"const o = { __proto__: null }"#), AccessKind::IllegalBuiltinAccess);
    }

    #[test]
    fn ast_08_detects_destructured_constructor() {
        assert_eq!(
            kind_of(r#"const { constructor } = "abc""#),
            AccessKind::IllegalBuiltinAccess
        );
    }

    #[test]
    fn ast_09_detects_banned_bindings() {
        assert_eq!(kind_of("const eval = 1"), AccessKind::DisallowedGlobal);
        assert_eq!(kind_of("const f = (process) => process"), AccessKind::DisallowedGlobal);
        assert_eq!(kind_of("for (const fetch of xs) {}"), AccessKind::DisallowedGlobal);
    }

    #[test]
    fn ast_10_detects_new_on_non_error() {
        assert_eq!(kind_of("new Map()"), AccessKind::IllegalBuiltinAccess);
        assert_eq!(kind_of("new Proxy({}, {})"), AccessKind::DisallowedGlobal);
        assert!(check("throw new TypeError('bad')").is_ok());
    }

    #[test]
    fn ast_11_detects_self_recursive_arrow() {
        let code = "const fact = (n) => n <= 1 ? 1 : n * fact(n - 1); return fact(5);";
        assert_eq!(kind_of(code), AccessKind::RecursiveFunction);
    }

    #[test]
    fn ast_12_forbidden_constructs_in_permissive_parse() {
        let options = ParseOptions { permissive: true };
        for code in [
            "while (true) {}",
            "do { x++ } while (x < 3)",
            "function f() { return 1 }",
        ] {
            let program = parse_with_options(code, options).unwrap();
            let err = validate(&program, DEFAULT_MAX_NESTING_DEPTH).unwrap_err();
            assert_eq!(err.kind, AccessKind::ForbiddenConstruct, "{code}");
        }
    }

    #[test]
    fn ast_13_detects_deep_nesting() {
        let mut code = String::new();
        for _ in 0..DEFAULT_MAX_NESTING_DEPTH + 1 {
            code.push_str("if (x) { ");
        }
        code.push_str("y;");
        for _ in 0..DEFAULT_MAX_NESTING_DEPTH + 1 {
            code.push('}');
        }
        assert_eq!(kind_of(&code), AccessKind::NestingTooDeep);
    }

    #[test]
    fn ast_14_long_operator_chains_do_not_count_as_nesting() {
        let code = format!("return {};", vec!["'a'"; 200].join(" + "));
        assert!(check(&code).is_ok());
        let chain = format!("return xs{};", ".slice(0)".repeat(100));
        assert!(check(&chain).is_ok());
    }

    #[test]
    fn ast_15_allows_data_process_status() {
        assert!(check("return data.process.status;").is_ok());
    }

    #[test]
    fn ast_16_allows_strings_mentioning_banned_words() {
        assert!(check(r#"return `eval is banned, so is process.env`;"#).is_ok());
        assert!(check(r#"return { note: "constructor" };"#).is_ok());
    }

    #[test]
    fn ast_17_allows_ordinary_orchestration() {
        let code = r#"
            const users = await callTool("users:list", { limit: 5 });
            const names = users.map(u => u.name).filter(Boolean);
            let total = 0;
            for (const u of users) { total += u.score ?? 0; }
            return { names, total, avg: Math.round(total / users.length) };
        "#;
        assert!(check(code).is_ok());
    }

    #[test]
    fn fold_constant_key_cases() {
        let program = parse("x['a' + 1 + `b`]").unwrap();
        let StmtKind::Expression(Expr {
            kind: ExprKind::Member {
                property: MemberProperty::Computed(key),
                ..
            },
            ..
        }) = &program.body[0].kind
        else {
            panic!("expected computed member");
        };
        assert_eq!(fold_constant_key(key).as_deref(), Some("a1b"));

        let program = parse("x[k + 'y']").unwrap();
        let StmtKind::Expression(Expr {
            kind: ExprKind::Member {
                property: MemberProperty::Computed(key),
                ..
            },
            ..
        }) = &program.body[0].kind
        else {
            panic!("expected computed member");
        };
        assert_eq!(fold_constant_key(key), None);
    }
}
