//! Domain error types.
//!
//! Compile-time errors (`LexError`, `ParseError`) abort a compile. `RuntimeError`
//! aborts one execution and is collected into the result, never thrown to the
//! host. All three render as `[Line L:C] message`.

/// Tokenization failure: unterminated string or illegal character.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[Line {line}:{column}] {message}")]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Unexpected token during parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[Line {line}:{column}] {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Failure while executing a compiled program.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[Line {line}:{column}] {message}")]
pub struct RuntimeError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        RuntimeError {
            message: message.into(),
            line,
            column,
        }
    }
}

impl ParseError {
    /// Format the error with the offending source line and a caret under the column.
    pub fn display_with_context(&self, source: &str) -> String {
        with_context(&self.to_string(), source, self.line, self.column)
    }
}

impl LexError {
    pub fn display_with_context(&self, source: &str) -> String {
        with_context(&self.to_string(), source, self.line, self.column)
    }
}

fn with_context(err: &str, source: &str, line: usize, column: usize) -> String {
    let text = source.lines().nth(line.saturating_sub(1)).unwrap_or("");
    let caret = " ".repeat(column.saturating_sub(1)) + "^";
    format!("{text}\n{caret}\n{err}")
}

/// Either compile-phase failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Syntax(#[from] ParseError),
}

impl CompileError {
    pub fn display_with_context(&self, source: &str) -> String {
        match self {
            CompileError::Lex(e) => e.display_with_context(source),
            CompileError::Syntax(e) => e.display_with_context(source),
        }
    }
}

/// Top-level error type for the host surface (config, data, CLI).
#[derive(Debug, thiserror::Error)]
pub enum SamscriptError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&SamscriptError> for std::process::ExitCode {
    fn from(err: &SamscriptError) -> Self {
        let code: u8 = match err {
            SamscriptError::Io(_) => 1,
            SamscriptError::ConfigParse { .. }
            | SamscriptError::ConfigMissing { .. }
            | SamscriptError::ConfigInvalid { .. } => 2,
            SamscriptError::Data { .. } => 3,
            SamscriptError::Compile(_) => 4,
            SamscriptError::NoData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
