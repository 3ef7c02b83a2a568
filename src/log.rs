//! Initialisation of the program logger.
//!
//! Messages are coloured when written to a terminal. The level comes from an environment
//! variable, the settings file or a default, in that order. Runs also log to two files in their
//! output folder: one for progress and one for warnings and errors.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback, Output};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::Arguments;
use std::fs::File;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The level used when neither the environment nor the settings file gives one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The environment variable overriding the log level
pub const LOG_LEVEL_ENV_VAR: &str = "FLEET_EFFECTS_LOG_LEVEL";

const LOG_INFO_FILE_NAME: &str = "fleet_effects_info.log";
const LOG_ERROR_FILE_NAME: &str = "fleet_effects_error.log";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Convert a level name, in any case, to a filter
fn parse_level(name: &str) -> Result<LevelFilter> {
    Ok(match name.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    })
}

/// The level name to use: the environment first, then settings, then the default
fn resolve_level_name(from_env: Option<String>, from_settings: Option<&str>) -> String {
    from_env.unwrap_or_else(|| from_settings.unwrap_or(DEFAULT_LOG_LEVEL).to_string())
}

/// Whether a record is a warning or an error
fn is_problem(metadata: &log::Metadata) -> bool {
    metadata.level() <= LevelFilter::Warn
}

/// The log files of a run
struct LogFiles {
    info: File,
    error: File,
}

impl LogFiles {
    /// Create (or truncate) both log files in `dir`
    fn create(dir: &Path) -> Result<Self> {
        let create = |name: &str| {
            let path = dir.join(name);
            File::create(&path)
                .with_context(|| format!("Could not create log file {}", path.display()))
        };

        Ok(Self {
            info: create(LOG_INFO_FILE_NAME)?,
            error: create(LOG_ERROR_FILE_NAME)?,
        })
    }

    /// Add the file chains to `dispatch`. Progress messages are always logged to file.
    fn chain_into(self, dispatch: Dispatch, level: LevelFilter) -> Dispatch {
        dispatch
            .chain(
                Dispatch::new()
                    .filter(|metadata| !is_problem(metadata))
                    .format(|out, message, record| format_record(out, message, record, None))
                    .level(level.max(LevelFilter::Info))
                    .chain(self.info),
            )
            .chain(
                Dispatch::new()
                    .format(|out, message, record| format_record(out, message, record, None))
                    .level(LevelFilter::Warn)
                    .chain(self.error),
            )
    }
}

/// A console chain, coloured if `is_terminal`
fn console_chain(
    output: impl Into<Output>,
    is_terminal: bool,
    level: LevelFilter,
    problems: bool,
) -> Dispatch {
    let colours = is_terminal.then(|| {
        ColoredLevelConfig::new()
            .error(Color::Red)
            .warn(Color::Yellow)
            .info(Color::Green)
            .debug(Color::Blue)
            .trace(Color::Magenta)
    });

    Dispatch::new()
        .filter(move |metadata| is_problem(metadata) == problems)
        .format(move |out, message, record| {
            format_record(out, message, record, colours.as_ref());
        })
        .level(level)
        .chain(output)
}

/// Initialise the program logger.
///
/// Non-error messages go to stdout and warnings and errors to stderr. When `log_dir` is given,
/// both streams are also written to log files there. Fails if the level is unknown or the
/// logger was already initialised.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level given in `settings.toml`
/// * `log_dir`: The folder for log files, if any
pub fn init(log_level_from_settings: Option<&str>, log_dir: Option<&Path>) -> Result<()> {
    let level = parse_level(&resolve_level_name(
        env::var(LOG_LEVEL_ENV_VAR).ok(),
        log_level_from_settings,
    ))?;

    let mut dispatch = Dispatch::new()
        .chain(console_chain(
            std::io::stdout(),
            std::io::stdout().is_terminal(),
            level,
            false,
        ))
        .chain(console_chain(
            std::io::stderr(),
            std::io::stderr().is_terminal(),
            level.min(LevelFilter::Warn),
            true,
        ));

    if let Some(log_dir) = log_dir {
        dispatch = LogFiles::create(log_dir)?.chain_into(dispatch, level);
    }

    dispatch.apply()?;
    let _ = LOGGER_INIT.set(());

    Ok(())
}

/// Write a record as `[time level target] message`
fn format_record(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    let timestamp = Local::now().format("%H:%M:%S");
    let target = record.target();
    match colours {
        Some(colours) => out.finish(format_args!(
            "[{timestamp} {} {target}] {message}",
            colours.color(record.level())
        )),
        None => out.finish(format_args!(
            "[{timestamp} {} {target}] {message}",
            record.level()
        )),
    }
}
