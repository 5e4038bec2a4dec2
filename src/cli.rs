//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::ast::Program;
use crate::domain::backtest::{self as backtest_engine, BacktestResult};
use crate::domain::config_validation::load_backtest_config;
use crate::domain::error::SamscriptError;
use crate::domain::interpreter::{DataFeed, Interpreter};
use crate::domain::limiter::Limits;
use crate::domain::ohlcv::{format_timestamp, Bar};
use crate::domain::output::InterpreterResult;
use crate::domain::parser::parse;
use crate::domain::timeline::DateRange;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

/// Exit status when a script compiled but failed while running.
const EXIT_SCRIPT_FAILED: u8 = 6;

#[derive(Parser, Debug)]
#[command(name = "samscript", about = "Strategy scripting language and backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a script and summarize it
    Check {
        #[arg(short, long)]
        script: PathBuf,
    },
    /// Execute a script once over a symbol's full history
    Run {
        #[arg(short, long)]
        script: PathBuf,
        /// Directory of SYMBOL.csv files
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        symbol: String,
        /// Extra symbols made available through feed()
        #[arg(long, value_delimiter = ',')]
        feed: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run a backtest described by an INI config
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        script: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List symbols available in a data directory
    Symbols {
        #[arg(short, long)]
        data: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Check { script } => run_check(&script),
        Command::Run {
            script,
            data,
            symbol,
            feed,
            json,
        } => run_script(&script, &data, &symbol, &feed, json),
        Command::Backtest {
            config,
            script,
            json,
        } => run_backtest(&config, script.as_deref(), json),
        Command::Symbols { data } => run_symbols(&data),
    }
}

fn fail(err: SamscriptError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(&err)
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

fn read_script(path: &Path) -> Result<String, ExitCode> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("error: failed to read {}: {}", path.display(), e);
        ExitCode::from(&SamscriptError::Io(e))
    })
}

fn compile(path: &Path, source: &str) -> Result<Program, ExitCode> {
    parse(source).map_err(|e| {
        eprintln!(
            "error: failed to compile {}:\n{}",
            path.display(),
            e.display_with_context(source)
        );
        ExitCode::from(&SamscriptError::Compile(e))
    })
}

fn load_symbol(data_port: &dyn DataPort, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, SamscriptError> {
    let bars = data_port.fetch_bars(symbol, range)?;
    if bars.is_empty() {
        return Err(SamscriptError::NoData {
            symbol: symbol.to_string(),
        });
    }
    Ok(bars)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ExitCode> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: failed to serialize output: {e}");
            Err(ExitCode::FAILURE)
        }
    }
}

fn run_check(script_path: &Path) -> ExitCode {
    eprintln!("Checking {}", script_path.display());
    let source = match read_script(script_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let program = match compile(script_path, &source) {
        Ok(p) => p,
        Err(code) => return code,
    };

    println!("title:     {}", program.title().unwrap_or("(none)"));
    let functions: Vec<String> = program
        .functions()
        .map(|f| format!("{}({})", f.name, f.params.join(", ")))
        .collect();
    println!(
        "functions: {}",
        if functions.is_empty() { "(none)".to_string() } else { functions.join(", ") }
    );
    let handlers: Vec<String> = program.handlers().map(|h| h.event.to_string()).collect();
    println!(
        "handlers:  {}",
        if handlers.is_empty() { "(none)".to_string() } else { handlers.join(", ") }
    );
    eprintln!("Script compiles cleanly");
    ExitCode::SUCCESS
}

fn run_script(script_path: &Path, data_dir: &Path, symbol: &str, feed_symbols: &[String], json: bool) -> ExitCode {
    let source = match read_script(script_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let program = match compile(script_path, &source) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let data_port = CsvAdapter::new(data_dir);
    let range = DateRange::unbounded();
    let bars = match load_symbol(&data_port, symbol, &range) {
        Ok(b) => b,
        Err(e) => return fail(e),
    };

    let mut extra: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for name in feed_symbols.iter().filter(|s| s.as_str() != symbol) {
        match load_symbol(&data_port, name, &range) {
            Ok(b) => {
                extra.insert(name.clone(), b);
            }
            Err(e) => return fail(e),
        }
    }
    let mut feed = DataFeed::from_map(&extra);
    feed.insert(symbol, &bars);

    eprintln!("Running {} over {} bars of {}", script_path.display(), bars.len(), symbol);
    let result = Interpreter::new(Limits::default()).execute(&program, &bars, &feed);

    if json {
        if let Err(code) = print_json(&result) {
            return code;
        }
    } else {
        print_execution(&result);
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_SCRIPT_FAILED)
    }
}

fn print_execution(result: &InterpreterResult) {
    if let Some(title) = &result.title {
        println!("=== {} ===", title);
    }
    for overlay in &result.overlays {
        let points: usize = overlay.lines.iter().map(|l| l.points.len()).sum();
        println!("overlay {} ({} lines, {} points)", overlay.name, overlay.lines.len(), points);
    }
    for signal in &result.signals {
        println!(
            "signal  {} {} @ {} on {}",
            signal.action,
            signal.symbol,
            signal.price,
            format_timestamp(signal.timestamp)
        );
    }
    for line in &result.logs {
        println!("log     {}", line);
    }
    for error in &result.errors {
        eprintln!("error: {}", error);
    }
}

/// Relative paths in a config file are resolved against its directory.
fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value.trim());
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn run_backtest(config_path: &Path, script_override: Option<&Path>, json: bool) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let bt_config = match load_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));

    let script_path = match script_override {
        Some(p) => p.to_path_buf(),
        None => match adapter.get_string("script", "path") {
            Some(p) if !p.trim().is_empty() => resolve(base, &p),
            _ => {
                return fail(SamscriptError::ConfigMissing {
                    section: "script".into(),
                    key: "path".into(),
                })
            }
        },
    };
    let source = match read_script(&script_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    // compile up front so syntax errors exit before any data is read
    if let Err(code) = compile(&script_path, &source) {
        return code;
    }

    let data_dir = adapter
        .get_string("backtest", "data_dir")
        .map(|d| resolve(base, &d))
        .unwrap_or_else(|| base.to_path_buf());
    let data_port = CsvAdapter::new(data_dir);

    let symbols = adapter.get_list("backtest", "symbols");
    let mut symbol_data: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
    for symbol in &symbols {
        match load_symbol(&data_port, symbol, &bt_config.date_range) {
            Ok(bars) => {
                symbol_data.insert(symbol.clone(), bars);
            }
            Err(e) => eprintln!("warning: skipping {} ({})", symbol, e),
        }
    }

    let primary = bt_config.primary_symbol.clone().unwrap_or_default();
    if !symbol_data.contains_key(&primary) {
        return fail(SamscriptError::NoData { symbol: primary });
    }

    eprintln!(
        "Running backtest: {} symbols, primary {}",
        symbol_data.len(),
        primary
    );
    let result = backtest_engine::run(&source, &symbol_data, &bt_config);

    print_summary(&result);
    if json {
        if let Err(code) = print_json(&result) {
            return code;
        }
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_SCRIPT_FAILED)
    }
}

fn print_summary(result: &BacktestResult) {
    let metrics = &result.metrics;
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Ticks:            {}", result.ticks);
    eprintln!("Final Equity:     {:.2}", metrics.final_equity);
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", metrics.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", metrics.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", metrics.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", metrics.total_trades);
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", metrics.profit_factor);

    if !result.open_positions.is_empty() {
        eprintln!("\n=== Open Positions ===");
        for pos in &result.open_positions {
            eprintln!("  {}: {} @ {:.2}", pos.symbol, pos.quantity, pos.avg_price);
        }
    }
    if let Some(reason) = &result.halted {
        eprintln!("\nHalted: {}", reason);
    }
    for error in &result.errors {
        eprintln!("error: {}", error);
    }
}

fn run_symbols(data_dir: &Path) -> ExitCode {
    let symbols = match CsvAdapter::new(data_dir).list_symbols() {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    if symbols.is_empty() {
        eprintln!("No symbols found in {}", data_dir.display());
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}
