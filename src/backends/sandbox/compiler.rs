// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Expression front end: tokenizer, parser and WebAssembly text generator.
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := INTEGER | "(" expr ")" | IDENT "(" [arg ("," arg)*] ")"
//! arg     := expr | STRING
//! ```
//!
//! The generated module exports one function, `evaluate: [] -> [i64]`.
//! String arguments are laid out in an active data segment at the start
//! of linear memory and passed to host imports as `(offset, length)` pairs.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::backends::sandbox::error::{ExecutionError, ExecutionResult};
use crate::engine::capability::Capability;

/// Largest expression accepted, in bytes.
pub const MAX_EXPRESSION_BYTES: usize = 64 * 1024;

/// Deepest parenthesis / unary nesting accepted.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Module name every host import lives under.
pub const HOST_MODULE: &str = "host";

const WASM_PAGE_BYTES: usize = 64 * 1024;

/// Functions callable from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Builtin {
    SumTo,
    FileLen,
    AppendFile,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Int,
    Str,
}

impl Builtin {
    pub const ALL: [Builtin; 4] = [
        Builtin::SumTo,
        Builtin::FileLen,
        Builtin::AppendFile,
        Builtin::Exit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::SumTo => "sum_to",
            Builtin::FileLen => "file_len",
            Builtin::AppendFile => "append_file",
            Builtin::Exit => "exit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|builtin| builtin.name() == name)
    }

    /// Capability the builtin needs; `None` for pure guest code.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Builtin::SumTo => None,
            Builtin::FileLen => Some(Capability::ReadFs),
            Builtin::AppendFile => Some(Capability::WriteFs),
            Builtin::Exit => Some(Capability::ProcessExit),
        }
    }

    fn signature(&self) -> &'static [ArgKind] {
        match self {
            Builtin::SumTo => &[ArgKind::Int],
            Builtin::FileLen => &[ArgKind::Str],
            Builtin::AppendFile => &[ArgKind::Str, ArgKind::Str],
            Builtin::Exit => &[ArgKind::Int],
        }
    }

    fn describe_signature(&self) -> String {
        let params: Vec<&str> = self
            .signature()
            .iter()
            .map(|kind| match kind {
                ArgKind::Int => "integer",
                ArgKind::Str => "string",
            })
            .collect();
        format!("{}({})", self.name(), params.join(", "))
    }

    /// The `(import ...)` line for builtins backed by the host.
    fn import_declaration(&self) -> Option<String> {
        let params = match self {
            Builtin::SumTo => return None,
            Builtin::FileLen => "(param i32 i32)",
            Builtin::AppendFile => "(param i32 i32 i32 i32)",
            Builtin::Exit => "(param i64)",
        };
        Some(format!(
            "  (import \"{}\" \"{}\" (func ${} {} (result i64)))\n",
            HOST_MODULE,
            self.name(),
            self.name(),
            params
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn instruction(&self) -> &'static str {
        match self {
            BinaryOp::Add => "i64.add",
            BinaryOp::Sub => "i64.sub",
            BinaryOp::Mul => "i64.mul",
            BinaryOp::Div => "i64.div_s",
            BinaryOp::Rem => "i64.rem_s",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Neg(Box<Expr>),
    /// `first op x op y ...`, applied left to right. Kept flat so long
    /// operator chains do not turn into deep trees.
    Chain {
        first: Box<Expr>,
        rest: Vec<(BinaryOp, Expr)>,
    },
    Call {
        builtin: Builtin,
        args: Vec<Arg>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Expr(Expr),
    Str(String),
}

/// A compiled expression, ready to assemble.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub wat: String,
    pub builtins: BTreeSet<Builtin>,
}

impl CompiledExpression {
    /// Capabilities the expression needs, in a stable order.
    pub fn required_capabilities(&self) -> Vec<Capability> {
        let set: BTreeSet<Capability> = self
            .builtins
            .iter()
            .filter_map(Builtin::required_capability)
            .collect();
        set.into_iter().collect()
    }
}

/// Parse `source` and generate its module text.
pub fn compile(source: &str) -> ExecutionResult<CompiledExpression> {
    if source.len() > MAX_EXPRESSION_BYTES {
        return Err(ExecutionError::Fault(format!(
            "expression is {} bytes, limit is {}",
            source.len(),
            MAX_EXPRESSION_BYTES
        )));
    }
    let expr = parse(source)?;
    Ok(Generator::default().generate(&expr))
}

pub fn parse(source: &str) -> ExecutionResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(syntax(format!("unexpected {} after expression", token))),
    }
}

fn syntax(message: impl Into<String>) -> ExecutionError {
    ExecutionError::Fault(format!("syntax error: {}", message.into()))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Ident(String),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(value) => write!(f, "integer {}", value),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Str(_) => f.write_str("string literal"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn tokenize(source: &str) -> ExecutionResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '0'..='9' => {
                let mut end = start + 1;
                while let Some((index, next)) = chars.peek().copied() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                    end = index + 1;
                    chars.next();
                }
                let digits = &source[start..end];
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| syntax(format!("integer literal {} is out of range", digits)))?;
                Token::Int(value)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start + 1;
                while let Some((index, next)) = chars.peek().copied() {
                    if !(next.is_ascii_alphanumeric() || next == '_') {
                        break;
                    }
                    end = index + 1;
                    chars.next();
                }
                Token::Ident(source[start..end].to_string())
            }
            '"' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, '"')) => value.push('"'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, other)) => {
                                return Err(syntax(format!("unknown escape '\\{}'", other)))
                            }
                            None => return Err(syntax("unterminated string literal")),
                        },
                        Some((_, other)) => value.push(other),
                        None => return Err(syntax("unterminated string literal")),
                    }
                }
                Token::Str(value)
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

fn chain(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    if rest.is_empty() {
        first
    } else {
        Expr::Chain {
            first: Box::new(first),
            rest,
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> ExecutionResult<()> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(syntax(format!("expected {}, found {}", expected, token))),
            None => Err(syntax(format!("expected {}, found end of input", expected))),
        }
    }

    fn descend(&mut self) -> ExecutionResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(syntax(format!(
                "expression nests deeper than {}",
                MAX_NESTING_DEPTH
            )));
        }
        Ok(())
    }

    fn expr(&mut self) -> ExecutionResult<Expr> {
        let first = self.term()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(chain(first, rest)),
            };
            self.advance();
            rest.push((op, self.term()?));
        }
    }

    fn term(&mut self) -> ExecutionResult<Expr> {
        let first = self.unary()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(chain(first, rest)),
            };
            self.advance();
            rest.push((op, self.unary()?));
        }
    }

    fn unary(&mut self) -> ExecutionResult<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            self.descend()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ExecutionResult<Expr> {
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Int(value)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.call(&name),
            Some(Token::Str(_)) => Err(syntax("string literals are only allowed as builtin arguments")),
            Some(token) => Err(syntax(format!("unexpected {}", token))),
            None => Err(syntax("unexpected end of input")),
        }
    }

    fn call(&mut self, name: &str) -> ExecutionResult<Expr> {
        let builtin = Builtin::from_name(name)
            .ok_or_else(|| ExecutionError::Fault(format!("unknown builtin '{}'", name)))?;
        self.expect(Token::LParen)?;
        self.descend()?;

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.arg()?);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.advance();
                    }
                    _ => break,
                }
            }
        }
        self.expect(Token::RParen)?;
        self.depth -= 1;

        let kinds: Vec<ArgKind> = args
            .iter()
            .map(|arg| match arg {
                Arg::Expr(_) => ArgKind::Int,
                Arg::Str(_) => ArgKind::Str,
            })
            .collect();
        if kinds != builtin.signature() {
            return Err(ExecutionError::Fault(format!(
                "builtin {} called with {} argument(s) of the wrong shape",
                builtin.describe_signature(),
                args.len()
            )));
        }

        Ok(Expr::Call { builtin, args })
    }

    fn arg(&mut self) -> ExecutionResult<Arg> {
        if let Some(Token::Str(value)) = self.peek() {
            let value = value.clone();
            self.advance();
            return Ok(Arg::Str(value));
        }
        Ok(Arg::Expr(self.expr()?))
    }
}

#[derive(Default)]
struct Generator {
    data: Vec<u8>,
    builtins: BTreeSet<Builtin>,
}

impl Generator {
    fn generate(mut self, expr: &Expr) -> CompiledExpression {
        let mut body = String::new();
        self.emit(expr, &mut body);

        let mut wat = String::from("(module\n");
        for builtin in &self.builtins {
            if let Some(import) = builtin.import_declaration() {
                wat.push_str(&import);
            }
        }

        let pages = self.data.len() / WASM_PAGE_BYTES + 1;
        let _ = writeln!(wat, "  (memory (export \"memory\") {})", pages);
        if !self.data.is_empty() {
            wat.push_str("  (data (i32.const 0) \"");
            for byte in &self.data {
                let _ = write!(wat, "\\{:02x}", byte);
            }
            wat.push_str("\")\n");
        }

        if self.builtins.contains(&Builtin::SumTo) {
            wat.push_str(SUM_TO_FUNCTION);
        }

        wat.push_str("  (func (export \"evaluate\") (result i64)\n");
        wat.push_str(&body);
        wat.push_str("  )\n");
        wat.push_str(")\n");

        CompiledExpression {
            wat,
            builtins: self.builtins,
        }
    }

    /// Emit `expr` in flat stack form; each instruction on its own line.
    fn emit(&mut self, expr: &Expr, out: &mut String) {
        match expr {
            Expr::Int(value) => {
                let _ = writeln!(out, "    i64.const {}", value);
            }
            Expr::Neg(operand) => {
                out.push_str("    i64.const 0\n");
                self.emit(operand, out);
                out.push_str("    i64.sub\n");
            }
            Expr::Chain { first, rest } => {
                self.emit(first, out);
                for (op, operand) in rest {
                    self.emit(operand, out);
                    let _ = writeln!(out, "    {}", op.instruction());
                }
            }
            Expr::Call { builtin, args } => {
                self.builtins.insert(*builtin);
                for arg in args {
                    match arg {
                        Arg::Expr(inner) => self.emit(inner, out),
                        Arg::Str(value) => {
                            let offset = self.intern(value);
                            let _ = writeln!(out, "    i32.const {}", offset);
                            let _ = writeln!(out, "    i32.const {}", value.len());
                        }
                    }
                }
                let _ = writeln!(out, "    call ${}", builtin.name());
            }
        }
    }

    fn intern(&mut self, value: &str) -> usize {
        let offset = self.data.len();
        self.data.extend_from_slice(value.as_bytes());
        offset
    }
}

/// `sum_to(n)`: 0 + 1 + ... + n, computed by looping so it burns fuel.
const SUM_TO_FUNCTION: &str = r#"  (func $sum_to (param $n i64) (result i64)
    (local $i i64)
    (local $acc i64)
    (block $done
      (loop $next
        (br_if $done (i64.gt_s (local.get $i) (local.get $n)))
        (local.set $acc (i64.add (local.get $acc) (local.get $i)))
        (local.set $i (i64.add (local.get $i) (i64.const 1)))
        (br $next)))
    (local.get $acc))
"#;
