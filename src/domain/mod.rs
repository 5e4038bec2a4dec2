//! Core domain: the scripting language, its interpreter and the backtest
//! engine built on top of it.

pub mod ast;
pub mod backtest;
pub(crate) mod builtins;
pub mod config_validation;
pub mod error;
pub(crate) mod events;
pub mod execution;
pub mod indicator;
pub mod interpreter;
pub mod lexer;
pub mod limiter;
pub mod metrics;
pub mod ohlcv;
pub mod operators;
pub mod output;
pub mod parser;
pub mod portfolio;
pub mod position;
pub mod scope;
pub mod timeline;
pub mod token;
pub mod value;
