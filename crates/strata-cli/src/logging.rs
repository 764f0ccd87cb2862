use anyhow::{anyhow, bail, Result};
use strata_apply::config::LoggingConfig;
use twyg::{LogLevel, OptsBuilder};

/// Install the twyg logger.
///
/// Each `-v` raises the configured level by one step.
pub fn setup(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let level = raise(parse_level(&config.level)?, verbose);

    let opts = OptsBuilder::new()
        .coloured(config.coloured)
        .level(level)
        .report_caller(config.report_caller)
        .build()
        .map_err(|e| anyhow!("Invalid logging options: {e}"))?;

    twyg::setup(opts).map_err(|e| anyhow!("Failed to set up logging: {e}"))?;
    Ok(())
}

fn parse_level(level: &str) -> Result<LogLevel> {
    Ok(match level.to_ascii_lowercase().as_str() {
        "trace" => LogLevel::Trace,
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" | "warning" => LogLevel::Warn,
        "error" => LogLevel::Error,
        other => bail!("Unknown log level {other:?} (expected trace, debug, info, warn or error)"),
    })
}

fn raise(level: LogLevel, steps: u8) -> LogLevel {
    (0..steps).fold(level, |level, _| match level {
        LogLevel::Error => LogLevel::Warn,
        LogLevel::Warn => LogLevel::Info,
        LogLevel::Info => LogLevel::Debug,
        _ => LogLevel::Trace,
    })
}
