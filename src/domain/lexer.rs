//! Lexer for the strategy language.
//!
//! Converts source text into a token stream terminated by `Eof`. Newlines are
//! significant (statement separators) and emitted as tokens; `//` comments are
//! skipped. The first bad character or unterminated string aborts tokenization.

use crate::domain::error::LexError;
use crate::domain::token::{Token, TokenKind};

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn consume_if(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn error(&self, message: String, line: usize, column: usize) -> LexError {
        LexError {
            message,
            line,
            column,
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn lex_number(&mut self, first: char) -> Result<TokenKind, LexError> {
        let (line, column) = (self.line, self.column - 1);
        let mut text = String::new();
        text.push(first);
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                // `1.foo` is a member access on 1, not a decimal.
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if !lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                    break;
                }
                has_dot = true;
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("Invalid number: {}", text), line, column))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, LexError> {
        let (line, column) = (self.line, self.column - 1);
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(TokenKind::Str(text));
                }
                Some('\n') | None => {
                    return Err(self.error("Unterminated string".to_string(), line, column));
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn lex_word(&mut self, first: char) -> TokenKind {
        let mut word = String::new();
        word.push(first);
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::keyword(&word).unwrap_or(TokenKind::Ident(word))
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while let Some(ch) = self.advance() {
            let line = self.line;
            // `advance` already moved past `ch`; newlines reset the column.
            let column = if ch == '\n' { 0 } else { self.column - 1 };

            let kind = match ch {
                ' ' | '\t' | '\r' => continue,
                '\n' => {
                    self.push(TokenKind::Newline, line - 1, column.max(1));
                    continue;
                }
                '/' if self.peek() == Some('/') => {
                    self.skip_comment();
                    continue;
                }
                '0'..='9' => self.lex_number(ch)?,
                '"' | '\'' => self.lex_string(ch)?,
                c if c.is_alphabetic() || c == '_' => self.lex_word(c),
                '+' if self.consume_if('=') => TokenKind::PlusAssign,
                '-' if self.consume_if('=') => TokenKind::MinusAssign,
                '*' if self.consume_if('=') => TokenKind::StarAssign,
                '/' if self.consume_if('=') => TokenKind::SlashAssign,
                '=' if self.consume_if('=') => TokenKind::EqEq,
                '!' if self.consume_if('=') => TokenKind::BangEq,
                '<' if self.consume_if('=') => TokenKind::LtEq,
                '>' if self.consume_if('=') => TokenKind::GtEq,
                '&' if self.consume_if('&') => TokenKind::AndAnd,
                '|' if self.consume_if('|') => TokenKind::OrOr,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '=' => TokenKind::Assign,
                '!' => TokenKind::Bang,
                '<' => TokenKind::Lt,
                '>' => TokenKind::Gt,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                other => {
                    return Err(self.error(
                        format!("Unexpected character '{}'", other),
                        line,
                        column,
                    ));
                }
            };
            self.push(kind, line, column);
        }

        let (line, column) = (self.line, self.column);
        self.push(TokenKind::Eof, line, column);
        Ok(self.tokens)
    }
}

/// Tokenize `input`. The returned stream always ends with `TokenKind::Eof`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(input).run()
}
