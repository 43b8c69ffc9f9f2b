//! Abstract syntax tree for the enclave's script language.
//!
//! The tree is built once per run by [`crate::parser`] and borrowed by the
//! validator and the interpreter; no node outlives one execution. Every
//! statement and expression carries the [`Span`] of its first token so
//! errors can point back into the script.

use serde::{Deserialize, Serialize};

/// A 1-based line/column position in the script source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Line number, starting at 1.
    pub line: u32,
    /// Column number (in characters), starting at 1.
    pub column: u32,
}

impl Span {
    /// Create a span at the given line and column.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements in source order.
    pub body: Vec<Stmt>,
}

/// A statement with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// The statement itself.
    pub kind: StmtKind,
    /// Position of the statement's first token.
    pub span: Span,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `const` / `let` declaration.
    VariableDeclaration(VariableDeclaration),
    /// An expression evaluated for its effects.
    Expression(Expr),
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// `if (test) consequent else alternate`
    If {
        /// Condition.
        test: Expr,
        /// Taken when the condition is truthy.
        consequent: Box<Stmt>,
        /// Taken otherwise.
        alternate: Option<Box<Stmt>>,
    },
    /// `for (init; test; update) body`
    For(ForStatement),
    /// `for (const x of iterable) body`
    ForOf(ForOfStatement),
    /// `return expr?`
    Return(Option<Expr>),
    /// `throw expr`
    Throw(Expr),
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// A lone `;`.
    Empty,
    /// `while (test) body`. Only produced in permissive parse mode.
    While {
        /// Condition.
        test: Expr,
        /// Loop body.
        body: Box<Stmt>,
    },
    /// `do body while (test)`. Only produced in permissive parse mode.
    DoWhile {
        /// Loop body.
        body: Box<Stmt>,
        /// Condition.
        test: Expr,
    },
    /// `function name(...) { ... }`. Only produced in permissive parse mode.
    FunctionDeclaration(FunctionDeclaration),
}

/// Binding kind of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// `const`
    Const,
    /// `let`
    Let,
}

impl DeclKind {
    /// Whether bindings of this kind may be reassigned.
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::Let)
    }
}

/// `const a = 1, { b } = obj;`
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    /// `const` or `let`.
    pub kind: DeclKind,
    /// One entry per comma-separated declarator.
    pub declarations: Vec<Declarator>,
}

/// A single `target = init` in a declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    /// The binding pattern.
    pub target: Pattern,
    /// Initializer, if any.
    pub init: Option<Expr>,
}

/// Classic three-clause `for` loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    /// Runs once before the first iteration.
    pub init: Option<ForInit>,
    /// Checked before every iteration; absent means `true`.
    pub test: Option<Expr>,
    /// Runs after every iteration.
    pub update: Option<Expr>,
    /// Loop body.
    pub body: Box<Stmt>,
}

/// The init clause of a `for` loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    /// `let i = 0`
    Declaration(VariableDeclaration),
    /// `i = 0`
    Expression(Expr),
}

/// `for (const item of items) body`
#[derive(Debug, Clone, PartialEq)]
pub struct ForOfStatement {
    /// `const` or `let`.
    pub kind: DeclKind,
    /// Per-iteration binding pattern.
    pub target: Pattern,
    /// The iterated value.
    pub iterable: Expr,
    /// Loop body.
    pub body: Box<Stmt>,
}

/// A named function declaration (permissive parse mode only).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    /// Declared name.
    pub name: String,
    /// Parameters.
    pub params: Vec<Param>,
    /// Body statements.
    pub body: Vec<Stmt>,
}

/// A binding target.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `x`
    Identifier(String),
    /// `{ a, b: c, d = 1, ...rest }`
    Object {
        /// Named properties.
        properties: Vec<ObjectPatternProperty>,
        /// `...rest` binding, if any.
        rest: Option<String>,
    },
    /// `[a, , b = 2, ...rest]`
    Array {
        /// Elements; `None` is a hole.
        elements: Vec<Option<PatternElement>>,
        /// `...rest` pattern, if any.
        rest: Option<Box<Pattern>>,
    },
}

impl Pattern {
    /// Every identifier this pattern binds, in source order.
    pub fn bound_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'p>(&'p self, out: &mut Vec<&'p str>) {
        match self {
            Pattern::Identifier(name) => out.push(name),
            Pattern::Object { properties, rest } => {
                for prop in properties {
                    prop.value.target.collect_names(out);
                }
                if let Some(rest) = rest {
                    out.push(rest);
                }
            }
            Pattern::Array { elements, rest } => {
                for element in elements.iter().flatten() {
                    element.target.collect_names(out);
                }
                if let Some(rest) = rest {
                    rest.collect_names(out);
                }
            }
        }
    }
}

/// A pattern with an optional default value.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternElement {
    /// Where the value is bound.
    pub target: Pattern,
    /// Used when the incoming value is `undefined`.
    pub default: Option<Expr>,
}

/// One `key: pattern = default` entry of an object pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPatternProperty {
    /// The property read from the source object.
    pub key: PropertyKey,
    /// Where (and with what default) it is bound.
    pub value: PatternElement,
}

/// Function parameter.
pub type Param = PatternElement;

/// Arrow function literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrowFunction {
    /// Positional parameters.
    pub params: Vec<Param>,
    /// `...rest` parameter.
    pub rest: Option<Pattern>,
    /// Body.
    pub body: ArrowBody,
    /// Declared with the `async` keyword.
    pub is_async: bool,
}

/// Body of an arrow function.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    /// `x => x + 1`
    Expression(Box<Expr>),
    /// `x => { ... }`
    Block(Vec<Stmt>),
}

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The expression itself.
    pub kind: ExprKind,
    /// Position of the expression's first token.
    pub span: Span,
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Numeric literal.
    Number(f64),
    /// String literal.
    String(String),
    /// `true` / `false`
    Bool(bool),
    /// `null`
    Null,
    /// `` `a${b}c` ``; `quasis.len() == expressions.len() + 1`.
    Template {
        /// Cooked string chunks.
        quasis: Vec<String>,
        /// Interpolated expressions.
        expressions: Vec<Expr>,
    },
    /// Identifier reference.
    Identifier(String),
    /// `[a, ...b, , c]`
    Array(Vec<ArrayElement>),
    /// `{ a, b: 1, [k]: v, ...rest }`
    Object(Vec<ObjectMember>),
    /// Arrow function literal.
    Arrow(Box<ArrowFunction>),
    /// `!x`, `-x`, `typeof x`, ...
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        argument: Box<Expr>,
    },
    /// `++x`, `x--`
    Update {
        /// Increment or decrement.
        op: UpdateOp,
        /// Prefix (`++x`) or postfix (`x++`).
        prefix: bool,
        /// Identifier or member target.
        target: Box<Expr>,
    },
    /// Arithmetic, comparison, equality and bitwise operators.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Short-circuiting `&&`, `||`, `??`.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand (evaluated lazily).
        right: Box<Expr>,
    },
    /// `test ? consequent : alternate`
    Conditional {
        /// Condition.
        test: Box<Expr>,
        /// Value when truthy.
        consequent: Box<Expr>,
        /// Value when falsy.
        alternate: Box<Expr>,
    },
    /// `target op= value`
    Assign {
        /// Operator.
        op: AssignOp,
        /// Assignment target.
        target: Box<AssignTarget>,
        /// Right-hand side.
        value: Box<Expr>,
    },
    /// `object.property`, `object[expr]`, `object?.property`
    Member {
        /// Receiver.
        object: Box<Expr>,
        /// Accessed property.
        property: MemberProperty,
        /// `?.` access.
        optional: bool,
    },
    /// `callee(args)`, `callee?.(args)`
    Call {
        /// Called expression.
        callee: Box<Expr>,
        /// Arguments.
        arguments: Vec<Argument>,
        /// `?.()` call.
        optional: bool,
    },
    /// `new Callee(args)`
    New {
        /// Constructor expression.
        callee: Box<Expr>,
        /// Arguments.
        arguments: Vec<Argument>,
    },
    /// `await expr`
    Await(Box<Expr>),
}

/// Property part of a member expression.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    /// `.name`
    Static(String),
    /// `[expr]`
    Computed(Box<Expr>),
}

/// Key of an object literal member or object pattern property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    /// Identifier, string or number key, normalized to a string.
    Static(String),
    /// `[expr]`
    Computed(Box<Expr>),
}

/// Element of an array literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElement {
    /// Plain element.
    Expr(Expr),
    /// `...expr`
    Spread(Expr),
    /// Elision (`[a, , b]`).
    Hole,
}

/// Member of an object literal.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectMember {
    /// `key: value` (shorthand `{ a }` is `a: a`).
    Property {
        /// Property key.
        key: PropertyKey,
        /// Property value.
        value: Expr,
    },
    /// `...expr`
    Spread(Expr),
}

/// Call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Plain argument.
    Expr(Expr),
    /// `...expr`
    Spread(Expr),
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// `x = ...`
    Identifier(String),
    /// `obj.prop = ...` / `obj[key] = ...`
    Member {
        /// Receiver.
        object: Expr,
        /// Property.
        property: MemberProperty,
    },
    /// `[a, b] = ...` / `({ a } = ...)` (plain `=` only).
    Pattern(Pattern),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Minus,
    /// `+`
    Plus,
    /// `~`
    BitNot,
    /// `typeof`
    TypeOf,
    /// `void`
    Void,
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
}

impl BinaryOp {
    /// Source spelling, used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Exp => "**",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::StrictEq => "===",
            Self::StrictNotEq => "!==",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::UShr => ">>>",
            Self::In => "in",
        }
    }
}

/// Short-circuit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Nullish,
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `op=` for an arithmetic or bitwise operator.
    Compound(BinaryOp),
    /// `&&=`, `||=`, `??=`
    Logical(LogicalOp),
}
