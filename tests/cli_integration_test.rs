//! CLI integration tests with real files on disk.
//!
//! Each test lays out a temporary directory with a script, CSV data and
//! (for `backtest`) an INI config, then dispatches through `cli::run`.

mod common;

use clap::Parser;
use common::*;
use samscript::cli::{self, Cli};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tempfile::TempDir;

const SCRIPT: &str = r#"
indicator("Cross")
let fast = sma(2)
let slow = sma(4)
on_bar {
    if crossover(fast, slow) { signal("buy") }
    if crossunder(fast, slow) { signal("sell") }
}
"#;

fn dispatch(args: &[&str]) -> ExitCode {
    let mut argv = vec!["samscript"];
    argv.extend_from_slice(args);
    cli::run(Cli::parse_from(argv))
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("cross.sam"), SCRIPT).unwrap();
    write_csv(
        dir.path(),
        "BHP",
        &bars_from_closes("BHP", "2024-01-01", &[1.0, 2.0, 3.0, 10.0, 2.0, 1.0]),
    );
    write_csv(dir.path(), "CBA", &generate_bars("CBA", "2024-01-01", 6, 50.0));
    dir
}

mod check {
    use super::*;

    #[test]
    fn valid_script_succeeds() {
        let dir = workspace();
        let code = dispatch(&["check", "--script", path(&dir.path().join("cross.sam"))]);
        assert!(exit_is(code, 0));
    }

    #[test]
    fn syntax_error_exits_with_compile_code() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("bad.sam");
        fs::write(&script, "let = 3\n").unwrap();
        assert!(exit_is(dispatch(&["check", "--script", path(&script)]), 4));
    }

    #[test]
    fn missing_script_is_an_io_error() {
        assert!(exit_is(dispatch(&["check", "--script", "/nonexistent/x.sam"]), 1));
    }
}

mod run_command {
    use super::*;

    #[test]
    fn runs_over_csv_history() {
        let dir = workspace();
        let code = dispatch(&[
            "run",
            "--script",
            path(&dir.path().join("cross.sam")),
            "--data",
            path(dir.path()),
            "--symbol",
            "BHP",
            "--json",
        ]);
        assert!(exit_is(code, 0));
    }

    #[test]
    fn feed_symbols_are_loaded() {
        let dir = workspace();
        let script = dir.path().join("feed.sam");
        fs::write(&script, "let spread = feed('CBA') - close\n").unwrap();
        let base = [
            "run",
            "--script",
            path(&script),
            "--data",
            path(dir.path()),
            "--symbol",
            "BHP",
        ];

        let mut with_feed = base.to_vec();
        with_feed.extend(["--feed", "CBA"]);
        assert!(exit_is(dispatch(&with_feed), 0));

        // without --feed the script fails at runtime
        assert!(exit_is(dispatch(&base), 6));
    }

    #[test]
    fn unknown_symbol_is_a_data_error() {
        let dir = workspace();
        let code = dispatch(&[
            "run",
            "--script",
            path(&dir.path().join("cross.sam")),
            "--data",
            path(dir.path()),
            "--symbol",
            "XYZ",
        ]);
        assert!(exit_is(code, 3));
    }

    #[test]
    fn empty_csv_is_no_data() {
        let dir = workspace();
        fs::write(dir.path().join("EMPTY.csv"), "timestamp,open,high,low,close,volume\n").unwrap();
        let code = dispatch(&[
            "run",
            "--script",
            path(&dir.path().join("cross.sam")),
            "--data",
            path(dir.path()),
            "--symbol",
            "EMPTY",
        ]);
        assert!(exit_is(code, 5));
    }
}

mod backtest {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let file = dir.join("backtest.ini");
        fs::write(&file, body).unwrap();
        file
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = workspace();
        let config = write_config(
            dir.path(),
            "[backtest]\ninitial_capital = 1000\nsymbols = BHP, CBA\ndata_dir = .\n\n[script]\npath = cross.sam\n",
        );
        assert!(exit_is(dispatch(&["backtest", "--config", path(&config), "--json"]), 0));
    }

    #[test]
    fn script_flag_overrides_config() {
        let dir = workspace();
        let other = dir.path().join("other.sam");
        fs::write(&other, "let x = 1\n").unwrap();
        let config = write_config(
            dir.path(),
            "[backtest]\nsymbols = BHP\n\n[script]\npath = missing.sam\n",
        );
        assert!(exit_is(
            dispatch(&["backtest", "--config", path(&config), "--script", path(&other)]),
            0
        ));
    }

    #[test]
    fn missing_script_path_is_a_config_error() {
        let dir = workspace();
        let config = write_config(dir.path(), "[backtest]\nsymbols = BHP\n");
        assert!(exit_is(dispatch(&["backtest", "--config", path(&config)]), 2));
    }

    #[test]
    fn invalid_config_value_is_a_config_error() {
        let dir = workspace();
        let config = write_config(
            dir.path(),
            "[backtest]\nsymbols = BHP\nposition_size = 2\n\n[script]\npath = cross.sam\n",
        );
        assert!(exit_is(dispatch(&["backtest", "--config", path(&config)]), 2));
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        assert!(exit_is(dispatch(&["backtest", "--config", "/nonexistent/backtest.ini"]), 2));
    }

    #[test]
    fn compile_error_stops_before_data() {
        let dir = workspace();
        fs::write(dir.path().join("broken.sam"), "on_bar {\n").unwrap();
        let config = write_config(
            dir.path(),
            "[backtest]\nsymbols = NOPE\n\n[script]\npath = broken.sam\n",
        );
        assert!(exit_is(dispatch(&["backtest", "--config", path(&config)]), 4));
    }

    #[test]
    fn primary_without_data_is_no_data() {
        let dir = workspace();
        let config = write_config(
            dir.path(),
            "[backtest]\nsymbols = NOPE, BHP\n\n[script]\npath = cross.sam\n",
        );
        assert!(exit_is(dispatch(&["backtest", "--config", path(&config)]), 5));
    }

    #[test]
    fn script_failure_during_backtest() {
        let dir = workspace();
        fs::write(dir.path().join("fails.sam"), "foobar()\n").unwrap();
        let config = write_config(
            dir.path(),
            "[backtest]\nsymbols = BHP\n\n[script]\npath = fails.sam\n",
        );
        assert!(exit_is(dispatch(&["backtest", "--config", path(&config)]), 6));
    }
}

mod symbols {
    use super::*;

    #[test]
    fn lists_csv_files() {
        let dir = workspace();
        assert!(exit_is(dispatch(&["symbols", "--data", path(dir.path())]), 0));
    }

    #[test]
    fn missing_directory_is_a_data_error() {
        assert!(exit_is(dispatch(&["symbols", "--data", "/nonexistent/dir"]), 3));
    }
}
