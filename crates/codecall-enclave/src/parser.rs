//! Recursive-descent parser for the enclave's script language.
//!
//! Accepts a deliberately small JavaScript subset (see the crate docs) and
//! rejects everything else as a syntax error with a position. Every
//! recursive production goes through a depth guard, so hostile input can
//! never exhaust the host stack.

use crate::ast::*;
use crate::error::EnclaveError;
use crate::lexer::{tokenize, Punct, TemplateToken, Token, TokenKind};
use crate::numeric::number_to_string;

/// Hard limit on parser recursion and on the length of left-associated
/// operator and member chains.
pub const MAX_PARSE_DEPTH: usize = 256;

/// Parser switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Accept `while`, `do...while` and `function` declarations into the AST
    /// so the static validator reports them instead of the parser.
    pub permissive: bool,
}

/// Parse a script with default options.
pub fn parse(source: &str) -> Result<Program, EnclaveError> {
    parse_with_options(source, ParseOptions::default())
}

/// Parse a script.
pub fn parse_with_options(source: &str, options: ParseOptions) -> Result<Program, EnclaveError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, options, 0);
    parser.parse_program()
}

/// Words that can never be used as identifier references or bindings.
const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

fn unsupported_keyword(word: &str) -> Option<&'static str> {
    Some(match word {
        "var" => "'var' declarations are not supported; use const or let",
        "class" | "extends" | "super" => "classes are not supported",
        "try" | "catch" | "finally" => "try/catch is not supported; errors end the run",
        "switch" | "case" | "default" => "switch statements are not supported; use if/else",
        "with" => "'with' statements are not supported",
        "import" | "export" => "modules are not available in the enclave",
        "debugger" => "'debugger' is not supported",
        "this" => "'this' is not supported",
        "delete" => "'delete' is not supported",
        "yield" => "generators are not supported",
        "instanceof" => "'instanceof' is not supported",
        "function" => "function declarations are not supported; use arrow functions",
        "while" => "while loops are not supported; use for or for...of",
        "do" => "do...while loops are not supported; use for or for...of",
        _ => return None,
    })
}

fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    options: ParseOptions,
    depth: usize,
    loop_depth: usize,
    in_async: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, options: ParseOptions, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            options,
            depth,
            loop_depth: 0,
            in_async: true,
        }
    }

    // --- token helpers ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !matches!(tok.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        tok
    }

    fn is_punct(&self, p: Punct) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(q) if q == p)
    }

    fn nth_is_punct(&self, n: usize, p: Punct) -> bool {
        matches!(self.peek_nth(n).kind, TokenKind::Punct(q) if q == p)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct) -> Result<Span, EnclaveError> {
        if self.is_punct(p) {
            Ok(self.advance().span)
        } else {
            Err(self.error_here(format!(
                "Unexpected {}; expected '{}'",
                self.peek().describe(),
                p.as_str()
            )))
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == word)
    }

    fn nth_is_word(&self, n: usize, word: &str) -> bool {
        matches!(&self.peek_nth(n).kind, TokenKind::Ident(name) if name == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> EnclaveError {
        EnclaveError::syntax_at(message, self.peek().span)
    }

    fn unexpected(&self) -> EnclaveError {
        let tok = self.peek();
        if let TokenKind::Ident(word) = &tok.kind {
            if let Some(message) = unsupported_keyword(word) {
                return EnclaveError::syntax_at(message, tok.span);
            }
        }
        match tok.kind {
            TokenKind::Eof => self.error_here("Unexpected end of input"),
            TokenKind::Punct(Punct::Slash | Punct::SlashAssign) => {
                self.error_here("regular expression literals are not supported")
            }
            _ => self.error_here(format!("Unexpected token {}", tok.describe())),
        }
    }

    /// Statement terminator with automatic semicolon insertion.
    fn consume_semicolon(&mut self) -> Result<(), EnclaveError> {
        if self.eat_punct(Punct::Semicolon) {
            return Ok(());
        }
        let tok = self.peek();
        if tok.newline_before
            || matches!(tok.kind, TokenKind::Eof | TokenKind::Punct(Punct::RBrace))
        {
            return Ok(());
        }
        Err(self.unexpected())
    }

    fn descend(&mut self) -> Result<(), EnclaveError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(self.error_here(format!(
                "code is nested too deeply (maximum depth {MAX_PARSE_DEPTH})"
            )));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn binding_identifier(&mut self) -> Result<String, EnclaveError> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !is_reserved(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    // --- statements ---

    fn parse_program(&mut self) -> Result<Program, EnclaveError> {
        let mut body = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, EnclaveError> {
        self.descend()?;
        let result = self.parse_statement_inner();
        self.ascend();
        result
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, EnclaveError> {
        let span = self.peek().span;
        let kind = match self.peek().kind.clone() {
            TokenKind::Punct(Punct::LBrace) => StmtKind::Block(self.parse_block()?),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Ident(word) => match word.as_str() {
                "const" | "let" => {
                    let decl = self.parse_variable_declaration()?;
                    self.consume_semicolon()?;
                    StmtKind::VariableDeclaration(decl)
                }
                "if" => self.parse_if()?,
                "for" => self.parse_for()?,
                "return" => {
                    self.advance();
                    let argument = if self.is_punct(Punct::Semicolon)
                        || self.is_punct(Punct::RBrace)
                        || self.peek().newline_before
                        || matches!(self.peek().kind, TokenKind::Eof)
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.consume_semicolon()?;
                    StmtKind::Return(argument)
                }
                "throw" => {
                    self.advance();
                    if self.peek().newline_before {
                        return Err(self.error_here("Illegal newline after throw"));
                    }
                    let argument = self.parse_expression()?;
                    self.consume_semicolon()?;
                    StmtKind::Throw(argument)
                }
                "break" | "continue" => {
                    self.advance();
                    if self.loop_depth == 0 {
                        return Err(EnclaveError::syntax_at(
                            format!("Illegal {word} statement: not inside a loop"),
                            span,
                        ));
                    }
                    if matches!(self.peek().kind, TokenKind::Ident(_)) && !self.peek().newline_before {
                        return Err(self.error_here("labeled statements are not supported"));
                    }
                    self.consume_semicolon()?;
                    if word == "break" {
                        StmtKind::Break
                    } else {
                        StmtKind::Continue
                    }
                }
                "while" if self.options.permissive => self.parse_while()?,
                "do" if self.options.permissive => self.parse_do_while()?,
                "function" if self.options.permissive => self.parse_function_declaration()?,
                "async" if self.nth_is_word(1, "function") => {
                    if self.options.permissive {
                        self.advance();
                        self.parse_function_declaration()?
                    } else {
                        return Err(self.error_here(
                            "function declarations are not supported; use arrow functions",
                        ));
                    }
                }
                _ if unsupported_keyword(&word).is_some() => return Err(self.unexpected()),
                _ if !is_reserved(&word) && self.nth_is_punct(1, Punct::Colon) => {
                    return Err(self.error_here("labeled statements are not supported"));
                }
                _ => self.parse_expression_statement()?,
            },
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, span })
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind, EnclaveError> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(StmtKind::Expression(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, EnclaveError> {
        self.expect_punct(Punct::LBrace)?;
        let mut body = Vec::new();
        while !self.is_punct(Punct::RBrace) {
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<StmtKind, EnclaveError> {
        self.advance();
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_word("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_loop_body(&mut self) -> Result<Box<Stmt>, EnclaveError> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        Ok(Box::new(body?))
    }

    fn parse_decl_kind(&mut self) -> Option<DeclKind> {
        if self.eat_word("const") {
            Some(DeclKind::Const)
        } else if self.eat_word("let") {
            Some(DeclKind::Let)
        } else {
            None
        }
    }

    fn parse_variable_declaration(&mut self) -> Result<VariableDeclaration, EnclaveError> {
        let kind = self
            .parse_decl_kind()
            .ok_or_else(|| self.unexpected())?;
        let mut declarations = Vec::new();
        loop {
            declarations.push(self.parse_declarator(kind)?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(VariableDeclaration { kind, declarations })
    }

    fn parse_declarator(&mut self, kind: DeclKind) -> Result<Declarator, EnclaveError> {
        let span = self.peek().span;
        let target = self.parse_binding_pattern()?;
        let init = if self.eat_punct(Punct::Assign) {
            Some(self.parse_assignment()?)
        } else {
            None
        };
        if init.is_none() {
            if kind == DeclKind::Const {
                return Err(EnclaveError::syntax_at(
                    "Missing initializer in const declaration",
                    span,
                ));
            }
            if !matches!(target, Pattern::Identifier(_)) {
                return Err(EnclaveError::syntax_at(
                    "Missing initializer in destructuring declaration",
                    span,
                ));
            }
        }
        Ok(Declarator { target, init })
    }

    fn parse_for(&mut self) -> Result<StmtKind, EnclaveError> {
        self.advance();
        if self.is_word("await") {
            return Err(self.error_here("'for await' is not supported"));
        }
        self.expect_punct(Punct::LParen)?;

        let init = if self.is_word("const") || self.is_word("let") {
            let decl_span = self.peek().span;
            let kind = self.parse_decl_kind().ok_or_else(|| self.unexpected())?;
            let target = self.parse_binding_pattern()?;
            if self.eat_word("of") {
                let iterable = self.parse_assignment()?;
                self.expect_punct(Punct::RParen)?;
                let body = self.parse_loop_body()?;
                return Ok(StmtKind::ForOf(ForOfStatement {
                    kind,
                    target,
                    iterable,
                    body,
                }));
            }
            if self.is_word("in") {
                return Err(self.error_here(
                    "for...in is not supported; use for...of with Object.keys()",
                ));
            }
            let first_init = if self.eat_punct(Punct::Assign) {
                Some(self.parse_assignment()?)
            } else if kind == DeclKind::Const {
                return Err(EnclaveError::syntax_at(
                    "Missing initializer in const declaration",
                    decl_span,
                ));
            } else {
                None
            };
            let mut declarations = vec![Declarator {
                target,
                init: first_init,
            }];
            while self.eat_punct(Punct::Comma) {
                declarations.push(self.parse_declarator(kind)?);
            }
            Some(ForInit::Declaration(VariableDeclaration { kind, declarations }))
        } else if self.is_punct(Punct::Semicolon) {
            None
        } else {
            let expr = self.parse_expression()?;
            if self.is_word("of") || self.is_word("in") {
                return Err(self.error_here("for...of requires a const or let declaration"));
            }
            Some(ForInit::Expression(expr))
        };

        self.expect_punct(Punct::Semicolon)?;
        let test = if self.is_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::Semicolon)?;
        let update = if self.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_loop_body()?;
        Ok(StmtKind::For(ForStatement {
            init,
            test,
            update,
            body,
        }))
    }

    fn parse_while(&mut self) -> Result<StmtKind, EnclaveError> {
        self.advance();
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        let body = self.parse_loop_body()?;
        Ok(StmtKind::While { test, body })
    }

    fn parse_do_while(&mut self) -> Result<StmtKind, EnclaveError> {
        self.advance();
        let body = self.parse_loop_body()?;
        if !self.eat_word("while") {
            return Err(self.unexpected());
        }
        self.expect_punct(Punct::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punct::RParen)?;
        self.eat_punct(Punct::Semicolon);
        Ok(StmtKind::DoWhile { body, test })
    }

    fn parse_function_declaration(&mut self) -> Result<StmtKind, EnclaveError> {
        self.advance();
        self.eat_punct(Punct::Star);
        let name = self.binding_identifier()?;
        let (params, _rest) = self.parse_params()?;
        let saved = (self.loop_depth, self.in_async);
        self.loop_depth = 0;
        self.in_async = true;
        let body = self.parse_block();
        (self.loop_depth, self.in_async) = saved;
        Ok(StmtKind::FunctionDeclaration(FunctionDeclaration {
            name,
            params,
            body: body?,
        }))
    }

    // --- patterns ---

    fn parse_binding_pattern(&mut self) -> Result<Pattern, EnclaveError> {
        self.descend()?;
        let result = self.parse_binding_pattern_inner();
        self.ascend();
        result
    }

    fn parse_binding_pattern_inner(&mut self) -> Result<Pattern, EnclaveError> {
        if self.eat_punct(Punct::LBrace) {
            let mut properties = Vec::new();
            let mut rest = None;
            while !self.eat_punct(Punct::RBrace) {
                if self.eat_punct(Punct::Ellipsis) {
                    rest = Some(self.binding_identifier()?);
                    self.eat_punct(Punct::Comma);
                    self.expect_punct(Punct::RBrace)?;
                    break;
                }
                let key_is_plain_ident =
                    matches!(&self.peek().kind, TokenKind::Ident(name) if !is_reserved(name));
                let key = self.parse_property_key()?;
                let target = if self.eat_punct(Punct::Colon) {
                    self.parse_binding_pattern()?
                } else {
                    match (&key, key_is_plain_ident) {
                        (PropertyKey::Static(name), true) => Pattern::Identifier(name.clone()),
                        _ => return Err(self.unexpected()),
                    }
                };
                let default = self.parse_default()?;
                properties.push(ObjectPatternProperty {
                    key,
                    value: PatternElement { target, default },
                });
                if !self.is_punct(Punct::RBrace) {
                    self.expect_punct(Punct::Comma)?;
                }
            }
            return Ok(Pattern::Object { properties, rest });
        }

        if self.eat_punct(Punct::LBracket) {
            let mut elements = Vec::new();
            let mut rest = None;
            while !self.eat_punct(Punct::RBracket) {
                if self.eat_punct(Punct::Comma) {
                    elements.push(None);
                    continue;
                }
                if self.eat_punct(Punct::Ellipsis) {
                    rest = Some(Box::new(self.parse_binding_pattern()?));
                    self.expect_punct(Punct::RBracket)?;
                    break;
                }
                let target = self.parse_binding_pattern()?;
                let default = self.parse_default()?;
                elements.push(Some(PatternElement { target, default }));
                if !self.is_punct(Punct::RBracket) {
                    self.expect_punct(Punct::Comma)?;
                }
            }
            return Ok(Pattern::Array { elements, rest });
        }

        Ok(Pattern::Identifier(self.binding_identifier()?))
    }

    fn parse_default(&mut self) -> Result<Option<Expr>, EnclaveError> {
        if self.eat_punct(Punct::Assign) {
            Ok(Some(self.parse_assignment()?))
        } else {
            Ok(None)
        }
    }

    fn parse_property_key(&mut self) -> Result<PropertyKey, EnclaveError> {
        let key = match &self.peek().kind {
            TokenKind::Ident(name) => PropertyKey::Static(name.clone()),
            TokenKind::String(s) => PropertyKey::Static(s.clone()),
            TokenKind::Number(n) => PropertyKey::Static(number_to_string(*n)),
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let expr = self.parse_assignment()?;
                self.expect_punct(Punct::RBracket)?;
                return Ok(PropertyKey::Computed(Box::new(expr)));
            }
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(key)
    }

    /// Convert an already-parsed expression into a destructuring target.
    fn expr_to_pattern(&self, expr: Expr) -> Result<Pattern, EnclaveError> {
        let span = expr.span;
        let invalid = || EnclaveError::syntax_at("Invalid destructuring assignment target", span);
        match expr.kind {
            ExprKind::Identifier(name) => Ok(Pattern::Identifier(name)),
            ExprKind::Object(members) => {
                let mut properties = Vec::new();
                let mut rest = None;
                let count = members.len();
                for (i, member) in members.into_iter().enumerate() {
                    match member {
                        ObjectMember::Property { key, value } => {
                            properties.push(ObjectPatternProperty {
                                key,
                                value: self.expr_to_element(value)?,
                            });
                        }
                        ObjectMember::Spread(Expr {
                            kind: ExprKind::Identifier(name),
                            ..
                        }) if i + 1 == count => rest = Some(name),
                        ObjectMember::Spread(_) => return Err(invalid()),
                    }
                }
                Ok(Pattern::Object { properties, rest })
            }
            ExprKind::Array(items) => {
                let mut elements = Vec::new();
                let mut rest = None;
                let count = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    match item {
                        ArrayElement::Hole => elements.push(None),
                        ArrayElement::Expr(e) => elements.push(Some(self.expr_to_element(e)?)),
                        ArrayElement::Spread(e) if i + 1 == count => {
                            rest = Some(Box::new(self.expr_to_pattern(e)?));
                        }
                        ArrayElement::Spread(_) => return Err(invalid()),
                    }
                }
                Ok(Pattern::Array { elements, rest })
            }
            _ => Err(invalid()),
        }
    }

    fn expr_to_element(&self, expr: Expr) -> Result<PatternElement, EnclaveError> {
        match expr.kind {
            ExprKind::Assign {
                op: AssignOp::Assign,
                target,
                value,
            } => {
                let target = match *target {
                    AssignTarget::Identifier(name) => Pattern::Identifier(name),
                    AssignTarget::Pattern(p) => p,
                    AssignTarget::Member { .. } => {
                        return Err(EnclaveError::syntax_at(
                            "Invalid destructuring assignment target",
                            expr.span,
                        ))
                    }
                };
                Ok(PatternElement {
                    target,
                    default: Some(*value),
                })
            }
            kind => Ok(PatternElement {
                target: self.expr_to_pattern(Expr {
                    kind,
                    span: expr.span,
                })?,
                default: None,
            }),
        }
    }

    // --- expressions ---

    fn parse_expression(&mut self) -> Result<Expr, EnclaveError> {
        let expr = self.parse_assignment()?;
        if self.is_punct(Punct::Comma) {
            return Err(self.error_here("comma expressions are not supported"));
        }
        Ok(expr)
    }

    fn parse_assignment(&mut self) -> Result<Expr, EnclaveError> {
        self.descend()?;
        let result = self.parse_assignment_inner();
        self.ascend();
        result
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, EnclaveError> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }

        let left = self.parse_conditional()?;
        let op = match self.peek().kind {
            TokenKind::Punct(p) => match assign_op(p) {
                Some(op) => op,
                None => return Ok(left),
            },
            _ => return Ok(left),
        };
        self.advance();

        let span = left.span;
        let target = match left.kind {
            ExprKind::Identifier(name) if !is_reserved(&name) => AssignTarget::Identifier(name),
            ExprKind::Member {
                object,
                property,
                optional: false,
            } if !contains_optional(&object) => AssignTarget::Member {
                object: *object,
                property,
            },
            ExprKind::Object(_) | ExprKind::Array(_) if op == AssignOp::Assign => {
                AssignTarget::Pattern(self.expr_to_pattern(left)?)
            }
            _ => {
                return Err(EnclaveError::syntax_at(
                    "Invalid left-hand side in assignment",
                    span,
                ))
            }
        };
        let value = self.parse_assignment()?;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    /// Parse an arrow function if one starts at the current token.
    fn try_parse_arrow(&mut self) -> Result<Option<Expr>, EnclaveError> {
        let span = self.peek().span;
        let mut offset = 0;
        let is_async = self.is_word("async")
            && !self.peek_nth(1).newline_before
            && ((matches!(&self.peek_nth(1).kind, TokenKind::Ident(n) if !is_reserved(n))
                && self.nth_is_punct(2, Punct::Arrow))
                || (self.nth_is_punct(1, Punct::LParen) && self.arrow_after_parens(1)));
        if is_async {
            offset = 1;
        }

        let single_param = matches!(&self.peek_nth(offset).kind, TokenKind::Ident(n) if !is_reserved(n))
            && self.nth_is_punct(offset + 1, Punct::Arrow);
        let parenthesized = self.nth_is_punct(offset, Punct::LParen) && self.arrow_after_parens(offset);
        if !single_param && !parenthesized {
            return Ok(None);
        }

        if is_async {
            self.advance();
        }
        let (params, rest) = if single_param {
            let name = self.binding_identifier()?;
            (
                vec![PatternElement {
                    target: Pattern::Identifier(name),
                    default: None,
                }],
                None,
            )
        } else {
            self.parse_params()?
        };
        if self.peek().newline_before {
            return Err(self.error_here("Line terminator not permitted before arrow"));
        }
        self.expect_punct(Punct::Arrow)?;

        let saved = (self.loop_depth, self.in_async);
        self.loop_depth = 0;
        self.in_async = is_async;
        let body = if self.is_punct(Punct::LBrace) {
            self.parse_block().map(ArrowBody::Block)
        } else {
            self.parse_assignment()
                .map(|e| ArrowBody::Expression(Box::new(e)))
        };
        (self.loop_depth, self.in_async) = saved;

        Ok(Some(Expr {
            kind: ExprKind::Arrow(Box::new(ArrowFunction {
                params,
                rest,
                body: body?,
                is_async,
            })),
            span,
        }))
    }

    /// Whether the `(` at `offset` is closed by a `)` immediately followed by `=>`.
    fn arrow_after_parens(&self, offset: usize) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos + offset;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Punct(Punct::LParen | Punct::LBracket | Punct::LBrace) => depth += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBracket | Punct::RBrace) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| &t.kind),
                            Some(TokenKind::Punct(Punct::Arrow))
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_params(&mut self) -> Result<(Vec<Param>, Option<Pattern>), EnclaveError> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        let mut rest = None;
        while !self.eat_punct(Punct::RParen) {
            if self.eat_punct(Punct::Ellipsis) {
                rest = Some(self.parse_binding_pattern()?);
                self.expect_punct(Punct::RParen)?;
                break;
            }
            let target = self.parse_binding_pattern()?;
            let default = self.parse_default()?;
            params.push(PatternElement { target, default });
            if !self.is_punct(Punct::RParen) {
                self.expect_punct(Punct::Comma)?;
            }
        }
        Ok((params, rest))
    }

    fn parse_conditional(&mut self) -> Result<Expr, EnclaveError> {
        let test = self.parse_binary(0)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(Punct::Colon)?;
        let alternate = self.parse_assignment()?;
        let span = test.span;
        Ok(Expr {
            kind: ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        })
    }

    /// Precedence climbing over binary and logical operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, EnclaveError> {
        let mut left = self.parse_unary()?;
        let mut chain = 0usize;
        loop {
            if self.is_word("instanceof") {
                return Err(self.unexpected());
            }
            let Some((op, prec)) = self.peek_binary_op() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            chain += 1;
            if chain > MAX_PARSE_DEPTH {
                return Err(self.error_here(format!(
                    "expression is too long (maximum {MAX_PARSE_DEPTH} chained operators)"
                )));
            }
            // `**` is right-associative; everything else is left-associative.
            let next_min = if matches!(op, BinOrLogical::Binary(BinaryOp::Exp)) {
                prec
            } else {
                prec + 1
            };
            self.descend()?;
            let right = self.parse_binary(next_min);
            self.ascend();
            let right = right?;
            let span = left.span;
            let kind = match op {
                BinOrLogical::Binary(op) => ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                BinOrLogical::Logical(op) => ExprKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
            left = Expr { kind, span };
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinOrLogical, u8)> {
        use BinOrLogical::{Binary as B, Logical as L};
        let op = match &self.peek().kind {
            TokenKind::Ident(word) if word == "in" => (B(BinaryOp::In), 8),
            TokenKind::Punct(p) => match p {
                Punct::QuestionQuestion => (L(LogicalOp::Nullish), 1),
                Punct::PipePipe => (L(LogicalOp::Or), 2),
                Punct::AmpAmp => (L(LogicalOp::And), 3),
                Punct::Pipe => (B(BinaryOp::BitOr), 4),
                Punct::Caret => (B(BinaryOp::BitXor), 5),
                Punct::Amp => (B(BinaryOp::BitAnd), 6),
                Punct::EqEq => (B(BinaryOp::Eq), 7),
                Punct::NotEq => (B(BinaryOp::NotEq), 7),
                Punct::EqEqEq => (B(BinaryOp::StrictEq), 7),
                Punct::NotEqEq => (B(BinaryOp::StrictNotEq), 7),
                Punct::Lt => (B(BinaryOp::Lt), 8),
                Punct::Gt => (B(BinaryOp::Gt), 8),
                Punct::LtEq => (B(BinaryOp::LtEq), 8),
                Punct::GtEq => (B(BinaryOp::GtEq), 8),
                Punct::Shl => (B(BinaryOp::Shl), 9),
                Punct::Shr => (B(BinaryOp::Shr), 9),
                Punct::UShr => (B(BinaryOp::UShr), 9),
                Punct::Plus => (B(BinaryOp::Add), 10),
                Punct::Minus => (B(BinaryOp::Sub), 10),
                Punct::Star => (B(BinaryOp::Mul), 11),
                Punct::Slash => (B(BinaryOp::Div), 11),
                Punct::Percent => (B(BinaryOp::Rem), 11),
                Punct::StarStar => (B(BinaryOp::Exp), 12),
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, EnclaveError> {
        self.descend()?;
        let result = self.parse_unary_inner();
        self.ascend();
        result
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, EnclaveError> {
        let span = self.peek().span;
        let unary = match &self.peek().kind {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Minus),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Ident(w) if w == "typeof" => Some(UnaryOp::TypeOf),
            TokenKind::Ident(w) if w == "void" => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let argument = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    argument: Box::new(argument),
                },
                span,
            });
        }

        if self.is_word("await") {
            if !self.in_async {
                return Err(self.error_here(
                    "await is only valid in async functions and at the top level",
                ));
            }
            self.advance();
            let argument = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Await(Box::new(argument)),
                span,
            });
        }

        let update = if self.is_punct(Punct::PlusPlus) {
            Some(UpdateOp::Increment)
        } else if self.is_punct(Punct::MinusMinus) {
            Some(UpdateOp::Decrement)
        } else {
            None
        };
        if let Some(op) = update {
            self.advance();
            let target = self.parse_unary()?;
            check_update_target(&target)?;
            return Ok(Expr {
                kind: ExprKind::Update {
                    op,
                    prefix: true,
                    target: Box::new(target),
                },
                span,
            });
        }

        let expr = self.parse_call_member()?;
        let postfix = match self.peek().kind {
            TokenKind::Punct(Punct::PlusPlus) if !self.peek().newline_before => {
                Some(UpdateOp::Increment)
            }
            TokenKind::Punct(Punct::MinusMinus) if !self.peek().newline_before => {
                Some(UpdateOp::Decrement)
            }
            _ => None,
        };
        if let Some(op) = postfix {
            self.advance();
            check_update_target(&expr)?;
            return Ok(Expr {
                kind: ExprKind::Update {
                    op,
                    prefix: false,
                    target: Box::new(expr),
                },
                span,
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr, EnclaveError> {
        let mut expr = if self.is_word("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        let mut chain = 0usize;
        loop {
            let span = expr.span;
            let kind = if self.eat_punct(Punct::Dot) {
                ExprKind::Member {
                    object: Box::new(expr),
                    property: MemberProperty::Static(self.parse_member_name()?),
                    optional: false,
                }
            } else if self.eat_punct(Punct::QuestionDot) {
                if self.is_punct(Punct::LParen) {
                    ExprKind::Call {
                        callee: Box::new(expr),
                        arguments: self.parse_arguments()?,
                        optional: true,
                    }
                } else if self.eat_punct(Punct::LBracket) {
                    let property = self.parse_expression()?;
                    self.expect_punct(Punct::RBracket)?;
                    ExprKind::Member {
                        object: Box::new(expr),
                        property: MemberProperty::Computed(Box::new(property)),
                        optional: true,
                    }
                } else {
                    ExprKind::Member {
                        object: Box::new(expr),
                        property: MemberProperty::Static(self.parse_member_name()?),
                        optional: true,
                    }
                }
            } else if self.eat_punct(Punct::LBracket) {
                let property = self.parse_expression()?;
                self.expect_punct(Punct::RBracket)?;
                ExprKind::Member {
                    object: Box::new(expr),
                    property: MemberProperty::Computed(Box::new(property)),
                    optional: false,
                }
            } else if self.is_punct(Punct::LParen) {
                ExprKind::Call {
                    callee: Box::new(expr),
                    arguments: self.parse_arguments()?,
                    optional: false,
                }
            } else if matches!(self.peek().kind, TokenKind::Template(_)) {
                return Err(self.error_here("tagged templates are not supported"));
            } else {
                break;
            };
            chain += 1;
            if chain > MAX_PARSE_DEPTH {
                return Err(self.error_here(format!(
                    "expression is too long (maximum {MAX_PARSE_DEPTH} chained accesses)"
                )));
            }
            expr = Expr { kind, span };
        }
        Ok(expr)
    }

    fn parse_member_name(&mut self) -> Result<String, EnclaveError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_new(&mut self) -> Result<Expr, EnclaveError> {
        let span = self.advance().span;
        if self.is_punct(Punct::Dot) {
            return Err(self.error_here("'new.target' is not supported"));
        }
        let mut callee = self.parse_primary()?;
        while self.eat_punct(Punct::Dot) {
            let cspan = callee.span;
            callee = Expr {
                kind: ExprKind::Member {
                    object: Box::new(callee),
                    property: MemberProperty::Static(self.parse_member_name()?),
                    optional: false,
                },
                span: cspan,
            };
        }
        let arguments = if self.is_punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr {
            kind: ExprKind::New {
                callee: Box::new(callee),
                arguments,
            },
            span,
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>, EnclaveError> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            if self.eat_punct(Punct::Ellipsis) {
                args.push(Argument::Spread(self.parse_assignment()?));
            } else {
                args.push(Argument::Expr(self.parse_assignment()?));
            }
            if !self.is_punct(Punct::RParen) {
                self.expect_punct(Punct::Comma)?;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, EnclaveError> {
        let tok = self.peek().clone();
        let span = tok.span;
        let kind = match tok.kind {
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::String(s) => {
                self.advance();
                ExprKind::String(s)
            }
            TokenKind::Template(template) => {
                self.advance();
                self.parse_template(template)?
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" => {
                    self.advance();
                    ExprKind::Bool(true)
                }
                "false" => {
                    self.advance();
                    ExprKind::Bool(false)
                }
                "null" => {
                    self.advance();
                    ExprKind::Null
                }
                "function" => {
                    return Err(self.error_here(
                        "function expressions are not supported; use arrow functions",
                    ))
                }
                w if is_reserved(w) => return Err(self.unexpected()),
                _ => {
                    self.advance();
                    ExprKind::Identifier(word)
                }
            },
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let mut inner = self.parse_expression()?;
                self.expect_punct(Punct::RParen)?;
                inner.span = span;
                return Ok(inner);
            }
            TokenKind::Punct(Punct::LBracket) => self.parse_array_literal()?,
            TokenKind::Punct(Punct::LBrace) => self.parse_object_literal()?,
            _ => return Err(self.unexpected()),
        };
        Ok(Expr { kind, span })
    }

    fn parse_template(&mut self, template: TemplateToken) -> Result<ExprKind, EnclaveError> {
        let mut expressions = Vec::with_capacity(template.expressions.len());
        for tokens in template.expressions {
            let mut sub = Parser::new(tokens, self.options, self.depth + 1);
            sub.in_async = self.in_async;
            if matches!(sub.peek().kind, TokenKind::Eof) {
                return Err(sub.error_here("empty template expression"));
            }
            let expr = sub.parse_expression()?;
            if !matches!(sub.peek().kind, TokenKind::Eof) {
                return Err(sub.unexpected());
            }
            expressions.push(expr);
        }
        Ok(ExprKind::Template {
            quasis: template.quasis,
            expressions,
        })
    }

    fn parse_array_literal(&mut self) -> Result<ExprKind, EnclaveError> {
        self.expect_punct(Punct::LBracket)?;
        let mut elements = Vec::new();
        while !self.eat_punct(Punct::RBracket) {
            if self.eat_punct(Punct::Comma) {
                elements.push(ArrayElement::Hole);
                continue;
            }
            if self.eat_punct(Punct::Ellipsis) {
                elements.push(ArrayElement::Spread(self.parse_assignment()?));
            } else {
                elements.push(ArrayElement::Expr(self.parse_assignment()?));
            }
            if !self.is_punct(Punct::RBracket) {
                self.expect_punct(Punct::Comma)?;
            }
        }
        Ok(ExprKind::Array(elements))
    }

    fn parse_object_literal(&mut self) -> Result<ExprKind, EnclaveError> {
        self.expect_punct(Punct::LBrace)?;
        let mut members = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            if self.eat_punct(Punct::Ellipsis) {
                members.push(ObjectMember::Spread(self.parse_assignment()?));
            } else {
                let key_token = self.peek().clone();
                if let TokenKind::Ident(word) = &key_token.kind {
                    let next_is_key = matches!(
                        self.peek_nth(1).kind,
                        TokenKind::Ident(_) | TokenKind::String(_) | TokenKind::Number(_)
                    ) || self.nth_is_punct(1, Punct::LBracket);
                    if matches!(word.as_str(), "get" | "set") && next_is_key {
                        return Err(self.error_here("getters and setters are not supported"));
                    }
                    if word == "async" && next_is_key {
                        return Err(self.error_here(
                            "method shorthand is not supported; use `key: async () => ...`",
                        ));
                    }
                }
                let key = self.parse_property_key()?;
                if self.eat_punct(Punct::Colon) {
                    let value = self.parse_assignment()?;
                    members.push(ObjectMember::Property { key, value });
                } else if self.is_punct(Punct::LParen) {
                    return Err(self.error_here(
                        "method shorthand is not supported; use `key: () => ...`",
                    ));
                } else {
                    match (&key_token.kind, key) {
                        (TokenKind::Ident(name), PropertyKey::Static(_)) if !is_reserved(name) => {
                            members.push(ObjectMember::Property {
                                key: PropertyKey::Static(name.clone()),
                                value: Expr {
                                    kind: ExprKind::Identifier(name.clone()),
                                    span: key_token.span,
                                },
                            });
                        }
                        _ => return Err(self.unexpected()),
                    }
                }
            }
            if !self.is_punct(Punct::RBrace) {
                self.expect_punct(Punct::Comma)?;
            }
        }
        Ok(ExprKind::Object(members))
    }
}

#[derive(Debug, Clone, Copy)]
enum BinOrLogical {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn assign_op(p: Punct) -> Option<AssignOp> {
    Some(match p {
        Punct::Assign => AssignOp::Assign,
        Punct::PlusAssign => AssignOp::Compound(BinaryOp::Add),
        Punct::MinusAssign => AssignOp::Compound(BinaryOp::Sub),
        Punct::StarAssign => AssignOp::Compound(BinaryOp::Mul),
        Punct::SlashAssign => AssignOp::Compound(BinaryOp::Div),
        Punct::PercentAssign => AssignOp::Compound(BinaryOp::Rem),
        Punct::StarStarAssign => AssignOp::Compound(BinaryOp::Exp),
        Punct::AmpAssign => AssignOp::Compound(BinaryOp::BitAnd),
        Punct::PipeAssign => AssignOp::Compound(BinaryOp::BitOr),
        Punct::CaretAssign => AssignOp::Compound(BinaryOp::BitXor),
        Punct::ShlAssign => AssignOp::Compound(BinaryOp::Shl),
        Punct::ShrAssign => AssignOp::Compound(BinaryOp::Shr),
        Punct::UShrAssign => AssignOp::Compound(BinaryOp::UShr),
        Punct::AmpAmpAssign => AssignOp::Logical(LogicalOp::And),
        Punct::PipePipeAssign => AssignOp::Logical(LogicalOp::Or),
        Punct::QuestionQuestionAssign => AssignOp::Logical(LogicalOp::Nullish),
        _ => return None,
    })
}

fn contains_optional(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Member {
            object, optional, ..
        } => *optional || contains_optional(object),
        ExprKind::Call {
            callee, optional, ..
        } => *optional || contains_optional(callee),
        _ => false,
    }
}

fn check_update_target(expr: &Expr) -> Result<(), EnclaveError> {
    match &expr.kind {
        ExprKind::Identifier(_) => Ok(()),
        ExprKind::Member { .. } if !contains_optional(expr) => Ok(()),
        _ => Err(EnclaveError::syntax_at(
            "Invalid left-hand side expression in update operation",
            expr.span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        match parse(src) {
            Ok(p) => p,
            Err(e) => panic!("expected {src:?} to parse, got {e}"),
        }
    }

    fn parse_err(src: &str) -> String {
        match parse(src) {
            Ok(p) => panic!("expected {src:?} to fail, got {p:?}"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn parses_tool_orchestration_script() {
        let program = parse_ok(
            r#"
            const users = await callTool("users:list", { limit: 10 });
            const active = users.filter(u => u.active).map(({ id, name }) => ({ id, name }));
            for (const u of active) {
                console.log(`user ${u.name}`);
            }
            return { count: active.length, first: active[0]?.name ?? null };
            "#,
        );
        assert_eq!(program.body.len(), 4);
    }

    #[test]
    fn asi_handles_newlines() {
        let program = parse_ok("let a = 1\nlet b = 2\na + b");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn return_followed_by_newline_returns_undefined() {
        let program = parse_ok("return\n42");
        assert!(matches!(program.body[0].kind, StmtKind::Return(None)));
    }

    #[test]
    fn operator_precedence() {
        let program = parse_ok("1 + 2 * 3 ** 2 ** 2");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn arrow_forms() {
        parse_ok("const f = x => x + 1");
        parse_ok("const g = async ({ a, b = 2 }, ...rest) => { return a + b + rest.length; }");
        parse_ok("const h = () => ({ ok: true })");
        parse_ok("const k = async x => await x");
    }

    #[test]
    fn destructuring_assignment() {
        let program = parse_ok("let a = 1, b = 2; [a, b] = [b, a];");
        let StmtKind::Expression(expr) = &program.body[1].kind else {
            panic!("expected expression");
        };
        assert!(matches!(
            &expr.kind,
            ExprKind::Assign { target, .. } if matches!(**target, AssignTarget::Pattern(_))
        ));
    }

    #[test]
    fn optional_chaining_and_nullish_assign() {
        parse_ok("let x = a?.b?.[c]?.(d); x ??= 1; x ||= 2; x &&= 3;");
    }

    #[test]
    fn positions_are_one_based() {
        let err = parse("const a = 1;\nconst b = ;").unwrap_err();
        match err {
            EnclaveError::Syntax { location, .. } => {
                assert_eq!(location, Some(Span::new(2, 11)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_constructs() {
        assert!(parse_err("var x = 1").contains("var"));
        assert!(parse_err("while (true) {}").contains("while"));
        assert!(parse_err("do { } while (x)").contains("do"));
        assert!(parse_err("function f() {}").contains("arrow functions"));
        assert!(parse_err("class A {}").contains("classes"));
        assert!(parse_err("try { x() } catch (e) {}").contains("try"));
        assert!(parse_err("switch (x) {}").contains("switch"));
        assert!(parse_err("import fs from 'fs'").contains("modules"));
        assert!(parse_err("const a = this").contains("this"));
        assert!(parse_err("delete obj.a").contains("delete"));
        assert!(parse_err("a instanceof B").contains("instanceof"));
        assert!(parse_err("const r = /abc/g").contains("regular expression"));
        assert!(parse_err("String.raw`x`").contains("tagged"));
        assert!(parse_err("for (const k in obj) {}").contains("for...in"));
        assert!(parse_err("outer: for (;;) {}").contains("labeled"));
    }

    #[test]
    fn break_outside_loop_is_error() {
        assert!(parse_err("break").contains("not inside a loop"));
        assert!(parse_err("for (;;) { const f = () => { break; }; }").contains("not inside a loop"));
        parse_ok("for (let i = 0; i < 3; i++) { if (i) break; continue; }");
    }

    #[test]
    fn await_outside_async_arrow_is_error() {
        assert!(parse_err("const f = () => await x").contains("await"));
        parse_ok("const f = async () => await x");
        parse_ok("await x");
    }

    #[test]
    fn const_requires_initializer() {
        assert!(parse_err("const a;").contains("initializer"));
        parse_ok("let a;");
    }

    #[test]
    fn permissive_mode_admits_forbidden_forms() {
        let options = ParseOptions { permissive: true };
        let program = parse_with_options("while (x) { x-- }", options).unwrap();
        assert!(matches!(program.body[0].kind, StmtKind::While { .. }));
        let program = parse_with_options("function f(a) { return a }", options).unwrap();
        assert!(matches!(program.body[0].kind, StmtKind::FunctionDeclaration(_)));
    }

    #[test]
    fn deep_unary_nesting_is_syntax_error() {
        let src = format!("{}1", "!".repeat(MAX_PARSE_DEPTH + 10));
        assert!(parse_err(&src).contains("nested too deeply"));
    }

    #[test]
    fn long_operator_chain_is_syntax_error() {
        let src = vec!["1"; MAX_PARSE_DEPTH + 2].join(" + ");
        assert!(parse_err(&src).contains("too long"));
        let ok = vec!["1"; 100].join(" + ");
        parse_ok(&ok);
    }

    #[test]
    fn template_literals_parse_holes() {
        let program = parse_ok("`a${1 + 2}b${`nested ${x}`}c`");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression");
        };
        let ExprKind::Template { quasis, expressions } = &expr.kind else {
            panic!("expected template");
        };
        assert_eq!(quasis.len(), 3);
        assert_eq!(expressions.len(), 2);
    }

    #[test]
    fn object_literal_keys() {
        let program = parse_ok("({ a, 'b-c': 1, 2: 3, [k]: 4, ...rest })");
        let StmtKind::Expression(expr) = &program.body[0].kind else {
            panic!("expected expression");
        };
        let ExprKind::Object(members) = &expr.kind else {
            panic!("expected object");
        };
        assert_eq!(members.len(), 5);
        assert!(matches!(
            &members[2],
            ObjectMember::Property { key: PropertyKey::Static(k), .. } if k == "2"
        ));
    }

    #[test]
    fn new_expression() {
        parse_ok("throw new Error('boom')");
        parse_ok("const e = new TypeError");
    }
}
