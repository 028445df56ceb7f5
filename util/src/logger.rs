//! Terminal and session log file setup
//!
//! Every record goes to stdout and to the session's log file, prefixed with the seconds since
//! the session epoch and a three letter level tag. Records above `Info` also carry their target
//! so solver traces can be told apart from the executable's own messages.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use colored::{ColoredString, Colorize};
use log::{info, Level};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

// Internal
use crate::session::{self, Session};

pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Log target of the NLP solver crate.
const SOLVER_TARGET: &str = "nlp";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Logging section of an executable's parameter file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Most verbose level recorded, one of `info`, `debug` or `trace`.
    pub level: String,

    /// Most verbose level recorded from the NLP solver, which logs every iteration at `debug`.
    pub solver_level: String,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Unknown log level `{0}`")]
    UnknownLevel(String),

    #[error("Logging must record at least `info`, found `{0}`")]
    LevelTooQuiet(LevelFilter),

    #[error("Cannot open the session log file: {0}")]
    LogFileError(std::io::Error),

    #[error("A logger has already been installed: {0}")]
    AlreadyInstalled(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".into(),
            solver_level: "info".into(),
        }
    }
}

impl LogConfig {
    /// The executable and solver levels, checking both are known and at least `info`.
    pub fn levels(&self) -> Result<(LevelFilter, LevelFilter), LoggerInitError> {
        Ok((parse_level(&self.level)?, parse_level(&self.solver_level)?))
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Install the global logger for this session.
///
/// Only the first call in a process can succeed.
pub fn logger_init(config: &LogConfig, session: &Session) -> Result<(), LoggerInitError> {
    let (level, solver_level) = config.levels()?;

    let log_file = fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFileError)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}{}",
                prefix(session::get_elapsed_seconds(), record.level(), record.target()),
                message
            ))
        })
        .level(level)
        .level_for(SOLVER_TARGET, solver_level.min(level))
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::AlreadyInstalled)?;

    info!("Logging to {:?}", session.log_file_path);
    if let Some(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Levels: {:?}, solver {:?}", level, solver_level.min(level));

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn parse_level(name: &str) -> Result<LevelFilter, LoggerInitError> {
    let level =
        LevelFilter::from_str(name).map_err(|_| LoggerInitError::UnknownLevel(name.into()))?;

    if level < Level::Info {
        Err(LoggerInitError::LevelTooQuiet(level))
    } else {
        Ok(level)
    }
}

/// Text written before each message.
fn prefix(elapsed_s: f64, level: Level, target: &str) -> String {
    if level > Level::Info {
        format!("[{:10.6} {}] {}: ", elapsed_s, tag(level), target)
    } else {
        format!("[{:10.6} {}] ", elapsed_s, tag(level))
    }
}

fn tag(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERR".red().bold(),
        Level::Warn => "WRN".yellow(),
        Level::Info => "INF".normal(),
        Level::Debug => "DBG".dimmed(),
        Level::Trace => "TRC".dimmed().italic(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let config = LogConfig::default();
        assert_eq!(
            config.levels().unwrap(),
            (LevelFilter::Debug, LevelFilter::Info)
        );

        let config = LogConfig {
            level: "TRACE".into(),
            solver_level: "debug".into(),
        };
        assert_eq!(
            config.levels().unwrap(),
            (LevelFilter::Trace, LevelFilter::Debug)
        );

        let config = LogConfig {
            solver_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.levels(),
            Err(LoggerInitError::UnknownLevel(l)) if l == "loud"
        ));
    }

    #[test]
    fn test_rejects_quiet_levels() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("logger_test", dir.path()).unwrap();

        let config = LogConfig {
            level: "warn".into(),
            ..Default::default()
        };
        assert!(matches!(
            logger_init(&config, &session),
            Err(LoggerInitError::LevelTooQuiet(LevelFilter::Warn))
        ));
    }

    #[test]
    fn test_prefix_names_target_when_verbose() {
        let line = prefix(1.5, Level::Debug, "nlp::ipm");
        assert!(line.contains("1.500000"));
        assert!(line.ends_with("nlp::ipm: "));

        let line = prefix(1.5, Level::Info, "nlp::ipm");
        assert!(!line.contains("nlp::ipm"));
    }
}
