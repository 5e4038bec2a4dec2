//! Recursive descent parser for the strategy language.
//!
//! Statement dispatch is keyword driven; expressions use precedence climbing:
//! or → and → equality → comparison → additive → multiplicative → unary →
//! call/member/index → primary. The first unexpected token aborts the parse
//! with a located error; there is no recovery.

use std::collections::BTreeSet;

use crate::domain::ast::{
    AssignOp, BinaryOp, EventHandler, EventKind, Expr, ExprKind, FunctionDecl, Program, Stmt,
    StmtKind, UnaryOp,
};
use crate::domain::error::{CompileError, ParseError};
use crate::domain::lexer::tokenize;
use crate::domain::token::{Token, TokenKind};

/// Combined depth of nested expressions and blocks. Keeps the parser and the
/// tree-walking evaluator well inside the thread stack.
pub const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
    fn_depth: usize,
    nesting: usize,
    handlers: BTreeSet<EventKind>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            loop_depth: 0,
            fn_depth: 0,
            nesting: 0,
            handlers: BTreeSet::new(),
        }
    }

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, token: &Token, message: String) -> ParseError {
        ParseError {
            message,
            line: token.line,
            column: token.column,
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        self.error_at(token, format!("Expected {}, found {}", expected, token.kind))
    }

    /// Run `f` one nesting level deeper, failing at the current token once
    /// `MAX_NESTING` is reached.
    fn nested<T>(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.nesting >= MAX_NESTING {
            let token = self.peek().clone();
            return Err(self.error_at(&token, format!("{} nested too deeply", what)));
        }
        let base = self.nesting;
        self.nesting += 1;
        let result = f(self);
        self.nesting = base;
        result
    }

    /// One more link in a left-associative chain. Chains build trees as deep
    /// as explicit nesting, so they share the same budget; the caller resets
    /// `nesting` when the chain ends.
    fn deepen(&mut self) -> Result<(), ParseError> {
        if self.nesting >= MAX_NESTING {
            let token = self.peek().clone();
            return Err(self.error_at(&token, "Expression nested too deeply".to_string()));
        }
        self.nesting += 1;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn expect_statement_end(&self) -> Result<(), ParseError> {
        if self.at_statement_end() {
            Ok(())
        } else {
            Err(self.unexpected("newline or ';' after statement"))
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.check(&TokenKind::Eof) {
                break;
            }
            if self.check(&TokenKind::RBrace) {
                return Err(self.unexpected("statement"));
            }
            statements.push(self.parse_statement(true)?);
            self.expect_statement_end()?;
        }
        Ok(Program { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested("Block", Self::parse_block_inner)
    }

    fn parse_block_inner(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.consume(&TokenKind::RBrace) {
                return Ok(statements);
            }
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("'}'"));
            }
            statements.push(self.parse_statement(false)?);
            self.expect_statement_end()?;
        }
    }

    /// Parse a function or handler body: loops do not extend into it and
    /// `return` becomes legal.
    fn parse_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.fn_depth += 1;
        let body = self.parse_block();
        self.fn_depth -= 1;
        self.loop_depth = saved_loops;
        body
    }

    fn parse_loop_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        if self.consume(&TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            self.skip_newlines();
            let token = self.peek().clone();
            let name = self.expect_ident("parameter name")?;
            if params.contains(&name) {
                return Err(self.error_at(&token, format!("Duplicate parameter '{}'", name)));
            }
            params.push(name);
            self.skip_newlines();
            if self.consume(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen)?;
            return Ok(params);
        }
    }

    fn parse_statement(&mut self, top_level: bool) -> Result<Stmt, ParseError> {
        let start = self.peek().clone();
        let kind = match &start.kind {
            TokenKind::Indicator => {
                if !top_level {
                    return Err(self.error_at(
                        &start,
                        "'indicator' is only allowed at top level".to_string(),
                    ));
                }
                self.parse_indicator()?
            }
            TokenKind::Fn => self.parse_function()?,
            TokenKind::OnStart
            | TokenKind::OnBar
            | TokenKind::OnTick
            | TokenKind::OnEnd
            | TokenKind::OnOrderFill
            | TokenKind::OnPositionChange => {
                if !top_level {
                    return Err(self.error_at(
                        &start,
                        format!("{} handler is only allowed at top level", start.kind),
                    ));
                }
                self.parse_handler()?
            }
            TokenKind::Let | TokenKind::Const => self.parse_var_decl()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::Break | TokenKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.error_at(&start, format!("{} outside of loop", start.kind)));
                }
                self.advance();
                if start.kind == TokenKind::Break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            TokenKind::Return => {
                if self.fn_depth == 0 {
                    return Err(self.error_at(&start, "'return' outside of function".to_string()));
                }
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expression()?))
                }
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt {
            kind,
            line: start.line,
            column: start.column,
        })
    }

    fn parse_indicator(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::Indicator)?;
        self.expect(TokenKind::LParen)?;
        let name = match self.peek_kind().clone() {
            TokenKind::Str(s) => {
                self.advance();
                s
            }
            _ => return Err(self.unexpected("indicator name string")),
        };
        self.expect(TokenKind::RParen)?;
        Ok(StmtKind::Indicator { name })
    }

    fn parse_function(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::Fn)?;
        let name = self.expect_ident("function name")?;
        let params = self.parse_params()?;
        let body = self.parse_body()?;
        Ok(StmtKind::Function(FunctionDecl { name, params, body }))
    }

    fn parse_handler(&mut self) -> Result<StmtKind, ParseError> {
        let token = self.advance();
        let event = match token.kind {
            TokenKind::OnStart => EventKind::Start,
            TokenKind::OnBar => EventKind::Bar,
            TokenKind::OnTick => EventKind::Tick,
            TokenKind::OnEnd => EventKind::End,
            TokenKind::OnOrderFill => EventKind::OrderFill,
            _ => EventKind::PositionChange,
        };
        if !self.handlers.insert(event) {
            return Err(self.error_at(&token, format!("Duplicate '{}' handler", event)));
        }
        let params = if self.check(&TokenKind::LParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let body = self.parse_body()?;
        Ok(StmtKind::EventHandler(EventHandler {
            event,
            params,
            body,
        }))
    }

    fn parse_var_decl(&mut self) -> Result<StmtKind, ParseError> {
        let keyword = self.advance();
        let constant = keyword.kind == TokenKind::Const;
        let name_token = self.peek().clone();
        let name = self.expect_ident("variable name")?;
        let value = if self.consume(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if constant && value.is_none() {
            return Err(self.error_at(
                &name_token,
                format!("Constant '{}' must be initialized", name),
            ));
        }
        Ok(StmtKind::VarDecl {
            name,
            constant,
            value,
        })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::If)?;
        let condition = self.parse_expression()?;
        let then_branch = self.parse_block()?;

        // `else` may sit on the line after the closing brace.
        let mut lookahead = self.pos;
        while self.tokens[lookahead].kind == TokenKind::Newline {
            lookahead += 1;
        }
        if self.tokens[lookahead].kind != TokenKind::Else {
            return Ok(StmtKind::If {
                condition,
                then_branch,
                else_branch: None,
            });
        }
        self.pos = lookahead;
        self.advance();

        let else_branch = if self.check(&TokenKind::If) {
            let start = self.peek().clone();
            let nested = self.nested("Block", Self::parse_if)?;
            vec![Stmt {
                kind: nested,
                line: start.line,
                column: start.column,
            }]
        } else {
            self.parse_block()?
        };
        Ok(StmtKind::If {
            condition,
            then_branch,
            else_branch: Some(else_branch),
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::For)?;
        let variable = self.expect_ident("loop variable")?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_loop_body()?;
        Ok(StmtKind::For {
            variable,
            iterable,
            body,
        })
    }

    fn parse_while(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::While)?;
        let condition = self.parse_expression()?;
        let body = self.parse_loop_body()?;
        Ok(StmtKind::While { condition, body })
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind, ParseError> {
        let target = self.parse_expression()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => AssignOp::Set,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Sub,
            TokenKind::StarAssign => AssignOp::Mul,
            TokenKind::SlashAssign => AssignOp::Div,
            _ => return Ok(StmtKind::Expr(target)),
        };
        if !is_assignable(&target) {
            let token = self.peek().clone();
            return Err(self.error_at(&token, "Invalid assignment target".to_string()));
        }
        self.advance();
        let value = self.parse_expression()?;
        Ok(StmtKind::Assign { target, op, value })
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.nested("Expression", Self::parse_or)
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let (line, column) = (left.line, left.column);
        Expr {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            line,
            column,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        let base = self.nesting;
        while matches!(self.peek_kind(), TokenKind::Or | TokenKind::OrOr) {
            self.advance();
            self.deepen()?;
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        self.nesting = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        let base = self.nesting;
        while matches!(self.peek_kind(), TokenKind::And | TokenKind::AndAnd) {
            self.advance();
            self.deepen()?;
            let right = self.parse_equality()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        self.nesting = base;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        let base = self.nesting;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::BangEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_comparison()?;
            left = Self::binary(op, left, right);
        }
        self.nesting = base;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        let base = self.nesting;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_additive()?;
            left = Self::binary(op, left, right);
        }
        self.nesting = base;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        let base = self.nesting;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
        self.nesting = base;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        let base = self.nesting;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
        self.nesting = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang | TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let token = self.advance();
        let operand = self.nested("Expression", Self::parse_unary)?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line: token.line,
            column: token.column,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        let base = self.nesting;
        loop {
            if matches!(
                self.peek_kind(),
                TokenKind::LParen | TokenKind::Dot | TokenKind::LBracket
            ) {
                self.deepen()?;
            }
            match self.peek_kind() {
                TokenKind::LParen => {
                    let callee = match &expr.kind {
                        ExprKind::Identifier(name) => name.clone(),
                        _ => {
                            let token = self.peek().clone();
                            return Err(self.error_at(
                                &token,
                                "Only named functions can be called".to_string(),
                            ));
                        }
                    };
                    let args = self.parse_arguments()?;
                    let (line, column) = (expr.line, expr.column);
                    expr = Expr {
                        kind: ExprKind::Call { callee, args },
                        line,
                        column,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect_ident("property name after '.'")?;
                    let (line, column) = (expr.line, expr.column);
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        line,
                        column,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.skip_newlines();
                    let index = self.parse_expression()?;
                    self.skip_newlines();
                    self.expect(TokenKind::RBracket)?;
                    let (line, column) = (expr.line, expr.column);
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                        column,
                    };
                }
                _ => break,
            }
        }
        self.nesting = base;
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        self.skip_newlines();
        if self.consume(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            self.skip_newlines();
            args.push(self.parse_expression()?);
            self.skip_newlines();
            if self.consume(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen)?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::Str(ref s) => {
                self.advance();
                ExprKind::Str(s.clone())
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Ident(ref name) => {
                self.advance();
                ExprKind::Identifier(name.clone())
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.parse_expression()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => self.parse_array()?,
            TokenKind::LBrace => self.parse_dict()?,
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr {
            kind,
            line: token.line,
            column: token.column,
        })
    }

    fn parse_array(&mut self) -> Result<ExprKind, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let mut elements = Vec::new();
        loop {
            self.skip_newlines();
            if self.consume(&TokenKind::RBracket) {
                return Ok(ExprKind::Array(elements));
            }
            elements.push(self.parse_expression()?);
            self.skip_newlines();
            if !self.consume(&TokenKind::Comma) {
                self.expect(TokenKind::RBracket)?;
                return Ok(ExprKind::Array(elements));
            }
        }
    }

    fn parse_dict(&mut self) -> Result<ExprKind, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut entries: Vec<(String, Expr)> = Vec::new();
        loop {
            self.skip_newlines();
            if self.consume(&TokenKind::RBrace) {
                return Ok(ExprKind::Dict(entries));
            }
            let key = match self.peek_kind().clone() {
                TokenKind::Ident(name) | TokenKind::Str(name) => {
                    self.advance();
                    name
                }
                _ => return Err(self.unexpected("dictionary key")),
            };
            self.skip_newlines();
            self.expect(TokenKind::Colon)?;
            self.skip_newlines();
            let value = self.parse_expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if !self.consume(&TokenKind::Comma) {
                self.skip_newlines();
                self.expect(TokenKind::RBrace)?;
                return Ok(ExprKind::Dict(entries));
            }
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Identifier(_) => true,
        ExprKind::Member { object, .. } | ExprKind::Index { object, .. } => is_assignable(object),
        _ => false,
    }
}

/// Parse an already tokenized program.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Program, ParseError> {
    if tokens.is_empty() {
        return Ok(Program {
            statements: Vec::new(),
        });
    }
    Parser::new(tokens).parse_program()
}

/// Compile source text into a program: tokenize, then parse.
pub fn parse(source: &str) -> Result<Program, CompileError> {
    let tokens = tokenize(source)?;
    Ok(parse_tokens(tokens)?)
}
