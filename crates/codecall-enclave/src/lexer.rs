//! Tokenizer for the enclave's script language.
//!
//! Produces a flat token vector. Template literals are lexed eagerly: each
//! `${ ... }` hole is tokenized into its own sub-stream which the parser
//! parses with a nested parser.

use crate::ast::Span;
use crate::error::EnclaveError;

/// Punctuators and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    Ellipsis,
    Question,
    QuestionDot,
    Colon,
    Arrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    StarStarAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    UShrAssign,
    AmpAmpAssign,
    PipePipeAssign,
    QuestionQuestionAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AmpAmp,
    PipePipe,
    QuestionQuestion,
    Shl,
    Shr,
    UShr,
}

impl Punct {
    /// Source spelling.
    pub fn as_str(self) -> &'static str {
        PUNCTUATORS
            .iter()
            .find(|(_, p)| *p == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

// Longest spellings first so greedy matching picks `>>>=` over `>>`.
const PUNCTUATORS: &[(&str, Punct)] = &[
    (">>>=", Punct::UShrAssign),
    ("...", Punct::Ellipsis),
    ("===", Punct::EqEqEq),
    ("!==", Punct::NotEqEq),
    ("**=", Punct::StarStarAssign),
    ("<<=", Punct::ShlAssign),
    (">>=", Punct::ShrAssign),
    (">>>", Punct::UShr),
    ("&&=", Punct::AmpAmpAssign),
    ("||=", Punct::PipePipeAssign),
    ("??=", Punct::QuestionQuestionAssign),
    ("=>", Punct::Arrow),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("<=", Punct::LtEq),
    (">=", Punct::GtEq),
    ("+=", Punct::PlusAssign),
    ("-=", Punct::MinusAssign),
    ("*=", Punct::StarAssign),
    ("/=", Punct::SlashAssign),
    ("%=", Punct::PercentAssign),
    ("&=", Punct::AmpAssign),
    ("|=", Punct::PipeAssign),
    ("^=", Punct::CaretAssign),
    ("**", Punct::StarStar),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("<<", Punct::Shl),
    (">>", Punct::Shr),
    ("&&", Punct::AmpAmp),
    ("||", Punct::PipePipe),
    ("??", Punct::QuestionQuestion),
    ("?.", Punct::QuestionDot),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    (";", Punct::Semicolon),
    (",", Punct::Comma),
    (".", Punct::Dot),
    ("?", Punct::Question),
    (":", Punct::Colon),
    ("=", Punct::Assign),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("<", Punct::Lt),
    (">", Punct::Gt),
    ("&", Punct::Amp),
    ("|", Punct::Pipe),
    ("^", Punct::Caret),
    ("~", Punct::Tilde),
    ("!", Punct::Bang),
];

/// A lexed template literal.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateToken {
    /// Cooked text chunks; one more than `expressions`.
    pub quasis: Vec<String>,
    /// Token streams of the `${ ... }` holes, each terminated by `Eof`.
    pub expressions: Vec<Vec<Token>>,
}

/// Token payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Ident(String),
    /// Numeric literal.
    Number(f64),
    /// String literal (escapes already processed).
    String(String),
    /// Template literal.
    Template(TemplateToken),
    /// Operator or punctuation.
    Punct(Punct),
    /// End of input.
    Eof,
}

/// A token with position and line-break information.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Payload.
    pub kind: TokenKind,
    /// Position of the first character.
    pub span: Span,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

impl Token {
    /// Short description used in "Unexpected token" messages.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Number(_) => "number".to_string(),
            TokenKind::String(_) => "string".to_string(),
            TokenKind::Template(_) => "template literal".to_string(),
            TokenKind::Punct(p) => format!("'{}'", p.as_str()),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// Tokenize a complete script.
pub fn tokenize(source: &str) -> Result<Vec<Token>, EnclaveError> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.lex_tokens(false)?;
    Ok(tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn error(&self, span: Span, message: impl Into<String>) -> EnclaveError {
        EnclaveError::syntax_at(message, span)
    }

    /// Lex until end of input, or (inside a template hole) until the `}`
    /// closing the hole.
    fn lex_tokens(&mut self, in_template_hole: bool) -> Result<Vec<Token>, EnclaveError> {
        let mut tokens = Vec::new();
        let mut brace_depth = 0usize;
        loop {
            let newline_before = self.skip_trivia()?;
            let span = self.span();
            let Some(c) = self.peek() else {
                if in_template_hole {
                    return Err(self.error(span, "Unterminated template literal"));
                }
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span,
                    newline_before,
                });
                return Ok(tokens);
            };

            if in_template_hole && c == '}' && brace_depth == 0 {
                self.bump();
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span,
                    newline_before,
                });
                return Ok(tokens);
            }

            let kind = if is_ident_start(c) {
                TokenKind::Ident(self.lex_identifier()?)
            } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
                TokenKind::Number(self.lex_number()?)
            } else if c == '"' || c == '\'' {
                TokenKind::String(self.lex_string(c)?)
            } else if c == '`' {
                TokenKind::Template(self.lex_template()?)
            } else if c == '\\' {
                return Err(self.error(span, "Unicode escape sequences are not allowed in identifiers"));
            } else {
                let punct = self.lex_punct()?;
                match punct {
                    Punct::LBrace => brace_depth += 1,
                    Punct::RBrace => brace_depth = brace_depth.saturating_sub(1),
                    _ => {}
                }
                TokenKind::Punct(punct)
            };
            tokens.push(Token {
                kind,
                span,
                newline_before,
            });
        }
    }

    /// Skip whitespace and comments. Returns whether a line break was seen.
    fn skip_trivia(&mut self) -> Result<bool, EnclaveError> {
        let mut newline = false;
        while let Some(c) = self.peek() {
            match c {
                '\n' | '\r' | '\u{2028}' | '\u{2029}' => {
                    newline = true;
                    self.bump();
                }
                c if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    let start = self.span();
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                            None => return Err(self.error(start, "Unterminated comment")),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(newline)
    }

    fn lex_identifier(&mut self) -> Result<String, EnclaveError> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_ident_part(c) {
                name.push(c);
                self.bump();
            } else if c == '\\' {
                return Err(self.error(
                    self.span(),
                    "Unicode escape sequences are not allowed in identifiers",
                ));
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn lex_number(&mut self) -> Result<f64, EnclaveError> {
        let start = self.span();
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut value = 0f64;
                let mut digits = 0;
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.bump();
                        continue;
                    }
                    let Some(d) = c.to_digit(radix) else { break };
                    value = value * f64::from(radix) + f64::from(d);
                    digits += 1;
                    self.bump();
                }
                if digits == 0 {
                    return Err(self.error(start, "Invalid or unexpected token"));
                }
                self.reject_number_suffix(start)?;
                return Ok(value);
            }
        }

        let mut text = String::new();
        self.take_digits(&mut text);
        if self.peek() == Some('.') {
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1);
            let has_digits = match sign {
                Some('+' | '-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if !has_digits {
                return Err(self.error(start, "Invalid or unexpected token"));
            }
            text.push('e');
            self.bump();
            if let Some(s @ ('+' | '-')) = self.peek() {
                text.push(s);
                self.bump();
            }
            self.take_digits(&mut text);
        }
        self.reject_number_suffix(start)?;
        text.parse::<f64>()
            .map_err(|_| self.error(start, "Invalid or unexpected token"))
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn reject_number_suffix(&self, start: Span) -> Result<(), EnclaveError> {
        match self.peek() {
            Some('n') => Err(self.error(start, "BigInt literals are not supported")),
            Some(c) if is_ident_start(c) || c.is_ascii_digit() => {
                Err(self.error(start, "Invalid or unexpected token"))
            }
            _ => Ok(()),
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<String, EnclaveError> {
        let start = self.span();
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error(start, "Unterminated string literal")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.lex_escape(&mut out, start)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_escape(&mut self, out: &mut String, start: Span) -> Result<(), EnclaveError> {
        let Some(c) = self.bump() else {
            return Err(self.error(start, "Unterminated string literal"));
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|d| d.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let code = self.hex_digits(2, start)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let code = self.unicode_escape(start)?;
                if (0xD800..0xDC00).contains(&code)
                    && self.peek() == Some('\\')
                    && self.peek_at(1) == Some('u')
                {
                    // Surrogate pair spelled as two escapes.
                    let save = (self.pos, self.line, self.column);
                    self.bump();
                    self.bump();
                    let low = self.unicode_escape(start)?;
                    if (0xDC00..0xE000).contains(&low) {
                        let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                        out.push(char::from_u32(combined).unwrap_or('\u{fffd}'));
                        return Ok(());
                    }
                    (self.pos, self.line, self.column) = save;
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            '\r' => {
                if self.peek() == Some('\n') {
                    self.bump();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            c if c.is_ascii_digit() => {
                return Err(self.error(start, "Octal escape sequences are not allowed"));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn unicode_escape(&mut self, start: Span) -> Result<u32, EnclaveError> {
        if self.peek() == Some('{') {
            self.bump();
            let mut code = 0u32;
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c == '}' {
                    break;
                }
                let d = c
                    .to_digit(16)
                    .ok_or_else(|| self.error(start, "Invalid Unicode escape sequence"))?;
                code = code.saturating_mul(16).saturating_add(d);
                digits += 1;
                self.bump();
            }
            if self.bump() != Some('}') || digits == 0 || code > 0x10FFFF {
                return Err(self.error(start, "Invalid Unicode escape sequence"));
            }
            Ok(code)
        } else {
            self.hex_digits(4, start)
        }
    }

    fn hex_digits(&mut self, count: usize, start: Span) -> Result<u32, EnclaveError> {
        let mut code = 0u32;
        for _ in 0..count {
            let d = self
                .peek()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error(start, "Invalid hexadecimal escape sequence"))?;
            code = code * 16 + d;
            self.bump();
        }
        Ok(code)
    }

    fn lex_template(&mut self) -> Result<TemplateToken, EnclaveError> {
        let start = self.span();
        self.bump();
        let mut quasis = Vec::new();
        let mut expressions = Vec::new();
        let mut current = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(start, "Unterminated template literal")),
                Some('`') => {
                    quasis.push(current);
                    return Ok(TemplateToken {
                        quasis,
                        expressions,
                    });
                }
                Some('\\') => self.lex_escape(&mut current, start)?,
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    quasis.push(std::mem::take(&mut current));
                    expressions.push(self.lex_tokens(true)?);
                }
                Some('\r') => {
                    if self.peek() == Some('\n') {
                        self.bump();
                    }
                    current.push('\n');
                }
                Some(c) => current.push(c),
            }
        }
    }

    fn lex_punct(&mut self) -> Result<Punct, EnclaveError> {
        let span = self.span();
        for (spelling, punct) in PUNCTUATORS {
            let matches = spelling
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if !matches {
                continue;
            }
            // `a?.5:b` is a conditional, not optional chaining.
            if *punct == Punct::QuestionDot && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            for _ in 0..spelling.len() {
                self.bump();
            }
            return Ok(*punct);
        }
        let c = self.peek().unwrap_or('\0');
        Err(self.error(span, format!("Invalid or unexpected token '{c}'")))
    }
}

fn is_ident_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_ascii_alphabetic() || (!c.is_ascii() && c.is_alphabetic())
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '\u{200c}' || c == '\u{200d}'
}
