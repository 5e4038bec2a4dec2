//! Configuration validation and loading.
//!
//! Every field is checked before a backtest runs. Numeric keys are read as
//! strings so that a value which does not parse is reported instead of
//! silently replaced by its default.

use std::time::Duration;

use chrono::NaiveDate;

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::SamscriptError;
use crate::domain::limiter::{
    Limits, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_DURATION, DEFAULT_MAX_ITERATIONS,
};
use crate::domain::timeline::DateRange;
use crate::ports::config_port::ConfigPort;

const BACKTEST: &str = "backtest";
const LIMITS: &str = "limits";

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    validate_initial_capital(config)?;
    validate_costs(config)?;
    validate_max_drawdown(config)?;
    validate_position_size(config)?;
    validate_risk_free_rate(config)?;
    date_range(config)?;
    validate_symbols(config)?;
    Ok(())
}

pub fn validate_limits_config(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    let defaults = [
        ("max_iterations", DEFAULT_MAX_ITERATIONS as i64),
        ("max_call_depth", DEFAULT_MAX_CALL_DEPTH as i64),
        ("max_execution_ms", DEFAULT_MAX_DURATION.as_millis() as i64),
    ];
    for (key, default) in defaults {
        if integer(config, LIMITS, key, default)? < 1 {
            return Err(invalid(LIMITS, key, &format!("{} must be at least 1", key)));
        }
    }
    Ok(())
}

/// Validate and build the run configuration from `[backtest]` and `[limits]`.
pub fn load_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, SamscriptError> {
    validate_backtest_config(config)?;
    validate_limits_config(config)?;

    let defaults = BacktestConfig::default();
    let symbols = config.get_list(BACKTEST, "symbols");
    let primary_symbol = config
        .get_string(BACKTEST, "primary_symbol")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| symbols.first().cloned());

    Ok(BacktestConfig {
        initial_capital: number(config, BACKTEST, "initial_capital", defaults.initial_capital)?,
        slippage_pct: number(config, BACKTEST, "slippage_pct", defaults.slippage_pct)?,
        commission_per_trade: number(config, BACKTEST, "commission_per_trade", defaults.commission_per_trade)?,
        commission_pct: number(config, BACKTEST, "commission_pct", defaults.commission_pct)?,
        max_drawdown_pct: number(config, BACKTEST, "max_drawdown_pct", defaults.max_drawdown_pct)?,
        position_size: number(config, BACKTEST, "position_size", defaults.position_size)?,
        allow_shorting: config.get_bool(BACKTEST, "allow_shorting", defaults.allow_shorting),
        risk_free_rate: number(config, BACKTEST, "risk_free_rate", defaults.risk_free_rate)?,
        date_range: date_range(config)?,
        primary_symbol,
        limits: load_limits(config)?,
    })
}

pub fn load_limits(config: &dyn ConfigPort) -> Result<Limits, SamscriptError> {
    let defaults = Limits::default();
    let millis = integer(
        config,
        LIMITS,
        "max_execution_ms",
        defaults.max_duration.as_millis() as i64,
    )?;
    Ok(Limits {
        max_iterations: integer(config, LIMITS, "max_iterations", defaults.max_iterations as i64)?.max(0)
            as u64,
        max_call_depth: integer(config, LIMITS, "max_call_depth", defaults.max_call_depth as i64)?.max(0)
            as usize,
        max_duration: Duration::from_millis(millis.max(0) as u64),
    })
}

fn invalid(section: &str, key: &str, reason: &str) -> SamscriptError {
    SamscriptError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn number(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, SamscriptError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(invalid(section, key, &format!("{} must be a number", key))),
        },
    }
}

fn integer(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64, SamscriptError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(section, key, &format!("{} must be an integer", key))),
    }
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    let value = number(config, BACKTEST, "initial_capital", 100_000.0)?;
    if value <= 0.0 {
        return Err(invalid(BACKTEST, "initial_capital", "initial_capital must be positive"));
    }
    Ok(())
}

fn validate_costs(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    for key in ["commission_per_trade", "commission_pct", "slippage_pct"] {
        if number(config, BACKTEST, key, 0.0)? < 0.0 {
            return Err(invalid(BACKTEST, key, &format!("{} must be non-negative", key)));
        }
    }
    Ok(())
}

fn validate_max_drawdown(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    let value = number(config, BACKTEST, "max_drawdown_pct", 0.0)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(invalid(
            BACKTEST,
            "max_drawdown_pct",
            "max_drawdown_pct must be between 0 and 100",
        ));
    }
    Ok(())
}

fn validate_position_size(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    let value = number(config, BACKTEST, "position_size", 1.0)?;
    if value <= 0.0 || value > 1.0 {
        return Err(invalid(
            BACKTEST,
            "position_size",
            "position_size must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    let value = number(config, BACKTEST, "risk_free_rate", 0.0)?;
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            BACKTEST,
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn date_range(config: &dyn ConfigPort) -> Result<DateRange, SamscriptError> {
    let start = parse_date(config.get_string(BACKTEST, "start_date").as_deref(), "start_date")?;
    let end = parse_date(config.get_string(BACKTEST, "end_date").as_deref(), "end_date")?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(invalid(BACKTEST, "start_date", "start_date must not be after end_date"));
        }
    }
    Ok(DateRange::new(start, end))
}

fn parse_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, SamscriptError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                invalid(
                    BACKTEST,
                    field,
                    &format!("invalid {} format, expected YYYY-MM-DD", field),
                )
            }),
    }
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<(), SamscriptError> {
    let symbols = config.get_list(BACKTEST, "symbols");
    if symbols.is_empty() {
        return Err(SamscriptError::ConfigMissing {
            section: BACKTEST.to_string(),
            key: "symbols".to_string(),
        });
    }
    if let Some(primary) = config.get_string(BACKTEST, "primary_symbol") {
        let primary = primary.trim();
        if !primary.is_empty() && !symbols.iter().any(|s| s == primary) {
            return Err(invalid(
                BACKTEST,
                "primary_symbol",
                &format!("primary_symbol '{}' is not listed in symbols", primary),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use approx::assert_relative_eq;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn backtest_err(content: &str) -> SamscriptError {
        validate_backtest_config(&make_config(content)).unwrap_err()
    }

    #[test]
    fn valid_backtest_config_passes() {
        let config = make_config(
            r#"
[backtest]
initial_capital = 50000.0
commission_per_trade = 10.0
commission_pct = 0.1
slippage_pct = 0.05
max_drawdown_pct = 25
position_size = 0.5
allow_shorting = yes
risk_free_rate = 0.05
start_date = 2020-01-01
end_date = 2024-12-31
symbols = CBA, BHP
primary_symbol = BHP

[limits]
max_iterations = 5000
max_call_depth = 16
max_execution_ms = 250
"#,
        );
        let loaded = load_backtest_config(&config).unwrap();
        assert_relative_eq!(loaded.initial_capital, 50_000.0);
        assert_relative_eq!(loaded.commission_pct, 0.1);
        assert_relative_eq!(loaded.max_drawdown_pct, 25.0);
        assert_relative_eq!(loaded.position_size, 0.5);
        assert!(loaded.allow_shorting);
        assert_eq!(loaded.primary_symbol.as_deref(), Some("BHP"));
        assert_eq!(loaded.date_range.start, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(loaded.limits.max_iterations, 5000);
        assert_eq!(loaded.limits.max_call_depth, 16);
        assert_eq!(loaded.limits.max_duration, Duration::from_millis(250));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let loaded = load_backtest_config(&make_config("[backtest]\nsymbols = CBA\n")).unwrap();
        assert_relative_eq!(loaded.initial_capital, 100_000.0);
        assert_relative_eq!(loaded.position_size, 1.0);
        assert!(!loaded.allow_shorting);
        assert_eq!(loaded.primary_symbol.as_deref(), Some("CBA"));
        assert_eq!(loaded.date_range, DateRange::unbounded());
        assert_eq!(loaded.limits, Limits::default());
    }

    #[test]
    fn initial_capital_must_be_positive() {
        for value in ["-100", "0"] {
            let err = backtest_err(&format!("[backtest]\ninitial_capital = {}\nsymbols = CBA\n", value));
            assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "initial_capital"));
        }
    }

    #[test]
    fn non_numeric_value_is_reported() {
        let err = backtest_err("[backtest]\ninitial_capital = lots\nsymbols = CBA\n");
        assert!(
            matches!(err, SamscriptError::ConfigInvalid { key, reason, .. } if key == "initial_capital" && reason.contains("number"))
        );
    }

    #[test]
    fn negative_costs_fail() {
        for key in ["commission_per_trade", "commission_pct", "slippage_pct"] {
            let err = backtest_err(&format!("[backtest]\n{} = -1\nsymbols = CBA\n", key));
            assert!(matches!(err, SamscriptError::ConfigInvalid { key: k, .. } if k == key));
        }
    }

    #[test]
    fn max_drawdown_out_of_range_fails() {
        let err = backtest_err("[backtest]\nmax_drawdown_pct = 150\nsymbols = CBA\n");
        assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "max_drawdown_pct"));
    }

    #[test]
    fn position_size_bounds() {
        for value in ["0", "1.5"] {
            let err = backtest_err(&format!("[backtest]\nposition_size = {}\nsymbols = CBA\n", value));
            assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "position_size"));
        }
    }

    #[test]
    fn risk_free_rate_out_of_range_fails() {
        for value in ["1.5", "-0.05"] {
            let err = backtest_err(&format!("[backtest]\nrisk_free_rate = {}\nsymbols = CBA\n", value));
            assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "risk_free_rate"));
        }
    }

    #[test]
    fn invalid_date_format_fails() {
        let err = backtest_err("[backtest]\nstart_date = 2020/01/01\nsymbols = CBA\n");
        assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn start_after_end_fails_but_same_day_is_allowed() {
        let err = backtest_err("[backtest]\nstart_date = 2024-12-31\nend_date = 2020-01-01\nsymbols = CBA\n");
        assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "start_date"));

        let config = make_config("[backtest]\nstart_date = 2024-01-02\nend_date = 2024-01-02\nsymbols = CBA\n");
        assert!(validate_backtest_config(&config).is_ok());
    }

    #[test]
    fn only_one_date_is_fine() {
        let loaded = load_backtest_config(&make_config("[backtest]\nend_date = 2021-06-30\nsymbols = CBA\n")).unwrap();
        assert_eq!(loaded.date_range.start, None);
        assert_eq!(loaded.date_range.end, NaiveDate::from_ymd_opt(2021, 6, 30));
    }

    #[test]
    fn missing_symbols_fails() {
        let err = backtest_err("[backtest]\ninitial_capital = 100\n");
        assert!(matches!(err, SamscriptError::ConfigMissing { key, .. } if key == "symbols"));
        let err = backtest_err("[backtest]\nsymbols = , ,\n");
        assert!(matches!(err, SamscriptError::ConfigMissing { key, .. } if key == "symbols"));
    }

    #[test]
    fn primary_symbol_must_be_listed() {
        let err = backtest_err("[backtest]\nsymbols = CBA,BHP\nprimary_symbol = WBC\n");
        assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "primary_symbol"));
    }

    #[test]
    fn limits_must_be_positive_integers() {
        let err = validate_limits_config(&make_config("[limits]\nmax_iterations = 0\n")).unwrap_err();
        assert!(matches!(err, SamscriptError::ConfigInvalid { key, .. } if key == "max_iterations"));

        let err = validate_limits_config(&make_config("[limits]\nmax_call_depth = deep\n")).unwrap_err();
        assert!(
            matches!(err, SamscriptError::ConfigInvalid { key, reason, .. } if key == "max_call_depth" && reason.contains("integer"))
        );

        assert!(validate_limits_config(&make_config("[limits]\n")).is_ok());
    }
}
