//! Tree-walking interpreter.
//!
//! `Interpreter` holds only configuration. Each `execute` call builds a fresh
//! `Execution` (scope tree, function registry, limiter, outputs), so runs
//! never observe each other and an `Interpreter` can be shared freely.
//!
//! An execution hoists top-level functions and handlers, runs the top-level
//! statements once in the global scope, then drives the registered handlers
//! (see `events`). The first runtime error aborts the run; it is recorded in
//! the result rather than returned.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use crate::domain::ast::{
    AssignOp, BinaryOp, EventKind, Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind,
};
use crate::domain::builtins::{self, CallSite};
use crate::domain::error::RuntimeError;
use crate::domain::events::Handlers;
use crate::domain::limiter::{LimitExceeded, Limiter, Limits};
use crate::domain::ohlcv::{field_series, Bar, PriceField};
use crate::domain::operators::{evaluate_binary, evaluate_unary};
use crate::domain::output::{InterpreterResult, OverlaySet, Signal};
use crate::domain::parser::parse;
use crate::domain::scope::{Scope, ScopeRef};
use crate::domain::value::{format_number, Value};

const PRICE_FIELDS: [(&str, PriceField); 5] = [
    ("open", PriceField::Open),
    ("high", PriceField::High),
    ("low", PriceField::Low),
    ("close", PriceField::Close),
    ("volume", PriceField::Volume),
];

/// Globals bound by the interpreter itself; left out of the variable snapshot.
const PREBOUND: [&str; 9] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "symbol",
    "bar_count",
    "bar_index",
    "bar",
];

/// Read-only bars of every symbol visible to one execution.
#[derive(Debug, Clone, Default)]
pub struct DataFeed<'a> {
    symbols: BTreeMap<&'a str, &'a [Bar]>,
}

impl<'a> DataFeed<'a> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(map: &'a BTreeMap<String, Vec<Bar>>) -> Self {
        Self {
            symbols: map
                .iter()
                .map(|(symbol, bars)| (symbol.as_str(), bars.as_slice()))
                .collect(),
        }
    }

    pub fn insert(&mut self, symbol: &'a str, bars: &'a [Bar]) {
        self.symbols.insert(symbol, bars);
    }

    pub fn get(&self, symbol: &str) -> Option<&'a [Bar]> {
        self.symbols.get(symbol).copied()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.symbols.keys().copied()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter {
    limits: Limits,
}

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run a compiled program over `bars` (the primary symbol) with `feed`
    /// giving access to other symbols.
    pub fn execute(&self, program: &Program, bars: &[Bar], feed: &DataFeed<'_>) -> InterpreterResult {
        let mut execution = Execution::new(bars, feed, self.limits);
        let outcome = execution.run(program);
        execution.finish(outcome)
    }

    /// Compile and run. Compile errors produce a failed result.
    pub fn execute_source(&self, source: &str, bars: &[Bar], feed: &DataFeed<'_>) -> InterpreterResult {
        match parse(source) {
            Ok(program) => self.execute(&program, bars, feed),
            Err(e) => InterpreterResult::failure(e.to_string()),
        }
    }
}

/// Result of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Closure<'p> {
    decl: &'p FunctionDecl,
    env: ScopeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    TopLevel,
    Handler(EventKind),
}

pub(crate) struct Execution<'p, 'd> {
    pub(crate) bars: &'d [Bar],
    pub(crate) feed: &'d DataFeed<'d>,
    pub(crate) globals: ScopeRef,
    scope: ScopeRef,
    functions: HashMap<&'p str, Rc<Closure<'p>>>,
    pub(crate) handlers: Handlers<'p>,
    pub(crate) limiter: Limiter,
    pub(crate) current_bar: Option<usize>,
    pub(crate) phase: Phase,
    pub(crate) overlays: OverlaySet,
    pub(crate) signals: Vec<Signal>,
    pub(crate) logs: Vec<String>,
    title: Option<String>,
}

fn located(message: impl Into<String>, expr: &Expr) -> RuntimeError {
    RuntimeError::new(message, expr.line, expr.column)
}

pub(crate) fn limit_error(e: LimitExceeded, line: usize, column: usize) -> RuntimeError {
    tracing::warn!(error = %e, line, column, "script stopped by runtime limit");
    RuntimeError::new(e.to_string(), line, column)
}

impl<'p, 'd> Execution<'p, 'd> {
    fn new(bars: &'d [Bar], feed: &'d DataFeed<'d>, limits: Limits) -> Self {
        let globals = Scope::root();
        {
            let mut g = globals.borrow_mut();
            for (name, field) in PRICE_FIELDS {
                g.define(name, Value::series(field_series(bars, field)), false);
            }
            let symbol = bars.first().map(|b| b.symbol.as_str()).unwrap_or("");
            g.define("symbol", Value::string(symbol), false);
            g.define("bar_count", Value::Number(bars.len() as f64), false);
        }
        Self {
            bars,
            feed,
            scope: Rc::clone(&globals),
            globals,
            functions: HashMap::new(),
            handlers: Handlers::default(),
            limiter: Limiter::new(limits),
            current_bar: None,
            phase: Phase::TopLevel,
            overlays: OverlaySet::default(),
            signals: Vec::new(),
            logs: Vec::new(),
            title: None,
        }
    }

    fn run(&mut self, program: &'p Program) -> Result<(), RuntimeError> {
        self.title = program.title().map(str::to_string);
        for decl in program.functions() {
            self.register_function(decl);
        }
        self.handlers = Handlers::collect(program);

        self.exec_statements(&program.statements)?;
        self.dispatch_events()
    }

    fn finish(self, outcome: Result<(), RuntimeError>) -> InterpreterResult {
        let errors: Vec<String> = match outcome {
            Ok(()) => Vec::new(),
            Err(e) => vec![e.to_string()],
        };
        let variables = self
            .globals
            .borrow()
            .snapshot()
            .into_iter()
            .filter(|(name, _)| !PREBOUND.contains(&name.as_str()))
            .collect();

        tracing::debug!(
            steps = self.limiter.steps(),
            signals = self.signals.len(),
            overlays = self.overlays.len(),
            errors = errors.len(),
            "execution finished"
        );

        InterpreterResult {
            success: errors.is_empty(),
            title: self.title,
            overlays: self.overlays.into_vec(),
            signals: self.signals,
            errors,
            logs: self.logs,
            variables,
            steps: self.limiter.steps(),
        }
    }

    /// The bar a series is read at: the dispatched bar, else the last one.
    pub(crate) fn current_index(&self) -> usize {
        self.current_bar
            .unwrap_or_else(|| self.bars.len().saturating_sub(1))
    }

    fn register_function(&mut self, decl: &'p FunctionDecl) {
        let closure = Closure {
            decl,
            env: Rc::clone(&self.scope),
        };
        self.functions.insert(decl.name.as_str(), Rc::new(closure));
    }

    fn with_scope<T>(&mut self, scope: ScopeRef, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.scope, scope);
        let out = f(self);
        self.scope = saved;
        out
    }

    fn exec_statements(&mut self, statements: &'p [Stmt]) -> Result<Flow, RuntimeError> {
        for stmt in statements {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(&mut self, statements: &'p [Stmt]) -> Result<Flow, RuntimeError> {
        let child = Scope::child(&self.scope);
        self.with_scope(child, |this| this.exec_statements(statements))
    }

    /// Run a function or handler body in a child of `env` with `params`
    /// bound positionally; missing arguments are `null`.
    pub(crate) fn invoke(
        &mut self,
        params: &'p [String],
        body: &'p [Stmt],
        env: &ScopeRef,
        args: Vec<Value>,
        line: usize,
        column: usize,
    ) -> Result<Value, RuntimeError> {
        self.limiter
            .enter_call()
            .map_err(|e| limit_error(e, line, column))?;
        let scope = Scope::child(env);
        {
            let mut frame = scope.borrow_mut();
            let mut args = args.into_iter();
            for param in params {
                frame.define(param, args.next().unwrap_or(Value::Null), false);
            }
        }
        let flow = self.with_scope(scope, |this| this.exec_statements(body));
        self.limiter.exit_call();
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }

    fn exec_stmt(&mut self, stmt: &'p Stmt) -> Result<Flow, RuntimeError> {
        match &stmt.kind {
            StmtKind::Indicator { .. } | StmtKind::EventHandler(_) => Ok(Flow::Normal),
            StmtKind::Function(decl) => {
                self.register_function(decl);
                Ok(Flow::Normal)
            }
            StmtKind::VarDecl {
                name,
                constant,
                value,
            } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                if self.scope.borrow().is_local_constant(name) {
                    return Err(RuntimeError::new(
                        format!("Cannot redeclare constant '{}'", name),
                        stmt.line,
                        stmt.column,
                    ));
                }
                self.scope.borrow_mut().define(name, value.clone(), *constant);
                self.auto_overlay(name, &value);
                Ok(Flow::Normal)
            }
            StmtKind::Assign { target, op, value } => {
                self.exec_assign(target, *op, value)?;
                Ok(Flow::Normal)
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.eval(condition)?;
                if condition.truthy(self.current_index()) {
                    self.exec_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::For {
                variable,
                iterable,
                body,
            } => self.exec_for(variable, iterable, body, stmt),
            StmtKind::While { condition, body } => {
                loop {
                    let test = self.eval(condition)?;
                    if !test.truthy(self.current_index()) {
                        break;
                    }
                    self.limiter
                        .step()
                        .map_err(|e| limit_error(e, stmt.line, stmt.column))?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_for(
        &mut self,
        variable: &'p str,
        iterable: &'p Expr,
        body: &'p [Stmt],
        stmt: &'p Stmt,
    ) -> Result<Flow, RuntimeError> {
        let items: Vec<Value> = match self.eval(iterable)? {
            Value::Array(items) => items.iter().cloned().collect(),
            Value::Series(values) => values.iter().map(|v| Value::Number(*v)).collect(),
            Value::Dict(entries) => entries.keys().map(Value::string).collect(),
            Value::Str(s) => s.chars().map(|c| Value::string(c.to_string())).collect(),
            other => {
                return Err(located(
                    format!("Cannot iterate over {}", other.type_name()),
                    iterable,
                ));
            }
        };

        for item in items {
            self.limiter
                .step()
                .map_err(|e| limit_error(e, stmt.line, stmt.column))?;
            let scope = Scope::child(&self.scope);
            scope.borrow_mut().define(variable, item, false);
            match self.with_scope(scope, |this| this.exec_statements(body))? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_assign(&mut self, target: &'p Expr, op: AssignOp, value: &'p Expr) -> Result<(), RuntimeError> {
        let rhs = self.eval(value)?;

        if let ExprKind::Identifier(name) = &target.kind {
            let updated = match op.binary_op() {
                None => rhs,
                Some(bin) => {
                    let current = self.lookup(name, target)?;
                    evaluate_binary(bin, &current, &rhs).map_err(|m| located(m, target))?
                }
            };
            let defined = self.scope.borrow().is_defined(name);
            if defined {
                self.scope
                    .borrow_mut()
                    .assign(name, updated.clone())
                    .map_err(|e| located(e.to_string(), target))?;
            } else {
                self.scope.borrow_mut().define(name, updated.clone(), false);
            }
            self.auto_overlay(name, &updated);
            return Ok(());
        }

        let (root, path) = self.assignment_path(target)?;
        let current = self.lookup(root, target)?;
        let updated = set_path(current, &path, op, rhs).map_err(|m| located(m, target))?;
        self.scope
            .borrow_mut()
            .assign(root, updated)
            .map_err(|e| located(e.to_string(), target))
    }

    /// Split `a.b[i]` into the root variable and the evaluated keys.
    fn assignment_path(&mut self, expr: &'p Expr) -> Result<(&'p str, Vec<Value>), RuntimeError> {
        match &expr.kind {
            ExprKind::Identifier(name) => Ok((name.as_str(), Vec::new())),
            ExprKind::Member { object, property } => {
                let (root, mut path) = self.assignment_path(object)?;
                path.push(Value::string(property));
                Ok((root, path))
            }
            ExprKind::Index { object, index } => {
                let (root, mut path) = self.assignment_path(object)?;
                path.push(self.eval(index)?);
                Ok((root, path))
            }
            _ => Err(located("Invalid assignment target", expr)),
        }
    }

    fn auto_overlay(&mut self, name: &str, value: &Value) {
        if self.phase == Phase::TopLevel && self.limiter.depth() == 0 {
            self.overlays.register(name, value, self.bars, None);
        }
    }

    fn lookup(&self, name: &str, expr: &Expr) -> Result<Value, RuntimeError> {
        self.scope
            .borrow()
            .lookup(name)
            .ok_or_else(|| located(format!("Undefined variable: {}", name), expr))
    }

    fn eval(&mut self, expr: &'p Expr) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::string(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Identifier(name) => self.lookup(name, expr),
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::Dict(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                evaluate_unary(*op, &value).map_err(|m| located(m, expr))
            }
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, expr),
            ExprKind::Member { object, property } => {
                let object = self.eval(object)?;
                member(&object, property).map_err(|m| located(m, expr))
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                index_value(&object, &index).map_err(|m| located(m, expr))
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, expr),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &'p Expr,
        right: &'p Expr,
        expr: &'p Expr,
    ) -> Result<Value, RuntimeError> {
        let left = self.eval(left)?;

        if matches!(op, BinaryOp::And | BinaryOp::Or) && !matches!(left, Value::Series(_)) {
            let at = self.current_index();
            let left_truthy = left.truthy(at);
            match op {
                BinaryOp::And if !left_truthy => return Ok(Value::Bool(false)),
                BinaryOp::Or if left_truthy => return Ok(Value::Bool(true)),
                _ => {}
            }
            let right = self.eval(right)?;
            if matches!(right, Value::Series(_)) {
                return evaluate_binary(op, &Value::Bool(left_truthy), &right)
                    .map_err(|m| located(m, expr));
            }
            return Ok(Value::Bool(right.truthy(at)));
        }

        let right = self.eval(right)?;
        evaluate_binary(op, &left, &right).map_err(|m| located(m, expr))
    }

    fn eval_call(&mut self, callee: &'p str, args: &'p [Expr], expr: &'p Expr) -> Result<Value, RuntimeError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        if let Some(closure) = self.functions.get(callee).cloned() {
            let decl = closure.decl;
            if values.len() != decl.params.len() {
                return Err(located(
                    format!(
                        "Function '{}' expects {} argument(s), got {}",
                        callee,
                        decl.params.len(),
                        values.len()
                    ),
                    expr,
                ));
            }
            self.limiter
                .step()
                .map_err(|e| limit_error(e, expr.line, expr.column))?;
            return self.invoke(&decl.params, &decl.body, &closure.env, values, expr.line, expr.column);
        }

        let site = CallSite {
            line: expr.line,
            column: expr.column,
        };
        match builtins::call(self, callee, &values, site) {
            Some(result) => result.map_err(|m| located(m, expr)),
            None => Err(located(format!("Unknown function: {}", callee), expr)),
        }
    }
}

fn member(object: &Value, property: &str) -> Result<Value, String> {
    if let Value::Dict(entries) = object {
        if let Some(value) = entries.get(property) {
            return Ok(value.clone());
        }
        if property != "length" {
            return Ok(Value::Null);
        }
    }
    match object.length() {
        Some(len) if property == "length" => Ok(Value::Number(len as f64)),
        _ => Err(format!(
            "Cannot read property '{}' of {}",
            property,
            object.type_name()
        )),
    }
}

/// Resolve a possibly negative integer index against `len`.
pub(crate) fn resolve_index(index: &Value, len: usize) -> Result<usize, String> {
    let n = match index {
        Value::Number(n) if n.fract() == 0.0 => *n,
        Value::Number(_) => return Err("Index must be an integer".to_string()),
        other => return Err(format!("Index must be a number, got {}", other.type_name())),
    };
    let resolved = if n < 0.0 { len as f64 + n } else { n };
    if resolved < 0.0 || resolved >= len as f64 {
        return Err(format!(
            "Index {} out of range (length {})",
            format_number(n),
            len
        ));
    }
    Ok(resolved as usize)
}

fn index_value(object: &Value, index: &Value) -> Result<Value, String> {
    match object {
        Value::Array(items) => Ok(items[resolve_index(index, items.len())?].clone()),
        Value::Series(values) => Ok(Value::Number(values[resolve_index(index, values.len())?])),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = resolve_index(index, chars.len())?;
            Ok(Value::string(chars[i].to_string()))
        }
        Value::Dict(entries) => match index {
            Value::Str(key) => Ok(entries.get(&**key).cloned().unwrap_or(Value::Null)),
            other => Err(format!(
                "Dictionary keys must be strings, got {}",
                other.type_name()
            )),
        },
        other => Err(format!("Cannot index into {}", other.type_name())),
    }
}

/// Write `rhs` (or `current op rhs`) at `path` inside `container`, returning
/// the updated container. Shared containers are copied first.
fn set_path(container: Value, path: &[Value], op: AssignOp, rhs: Value) -> Result<Value, String> {
    let Some((key, rest)) = path.split_first() else {
        return match op.binary_op() {
            None => Ok(rhs),
            Some(bin) => evaluate_binary(bin, &container, &rhs),
        };
    };

    match container {
        Value::Array(mut items) => {
            let i = resolve_index(key, items.len())?;
            let slot = &mut Arc::make_mut(&mut items)[i];
            let child = std::mem::replace(slot, Value::Null);
            *slot = set_path(child, rest, op, rhs)?;
            Ok(Value::Array(items))
        }
        Value::Dict(mut entries) => {
            let key = match key {
                Value::Str(key) => key.to_string(),
                other => {
                    return Err(format!(
                        "Dictionary keys must be strings, got {}",
                        other.type_name()
                    ));
                }
            };
            let map = Arc::make_mut(&mut entries);
            let child = map.remove(&key).unwrap_or(Value::Null);
            let updated = set_path(child, rest, op, rhs)?;
            map.insert(key, updated);
            Ok(Value::Dict(entries))
        }
        other => Err(format!("Cannot assign into {}", other.type_name())),
    }
}

impl std::fmt::Debug for Execution<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("bars", &self.bars.len())
            .field("current_bar", &self.current_bar)
            .field("phase", &self.phase)
            .field("steps", &self.limiter.steps())
            .finish_non_exhaustive()
    }
}
