//! Logging setup on top of `log4rs`.
//!
//! Everything logs through the `log` facade. Execution records go to the
//! [`AUDIT_TARGET`] target, which gets its own rolling file when a log directory is
//! configured.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::path::Path;

/// Target for per-query execution records.
pub const AUDIT_TARGET: &str = "querylab::audit";

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: u32 = 7;

/// Initializes the logging system from a log4rs YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read or a logger is already installed.
pub fn init_path(path: &Path) -> Result<(), Box<dyn Error>> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

/// Maps `error|warn|info|debug|trace|off` to a level filter; anything else is `Info`.
#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(dir: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, Box<dyn Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{stem}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(dir.join(format!("{stem}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Builds the logging configuration: stderr always, plus `querylab.log` and
/// `querylab_audit.log` rolling files under `dir` when one is given.
///
/// # Errors
/// Returns an error if the directory or log files cannot be created.
pub fn build_config(
    dir: Option<&Path>,
    level: LevelFilter,
    retention: Option<u32>,
) -> Result<Config, Box<dyn Error>> {
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let mut builder =
        Config::builder().appender(Appender::builder().build("console", Box::new(console)));
    let mut root = Root::builder().appender("console");

    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)?;
        let keep = retention.unwrap_or(DEFAULT_RETENTION);
        builder = builder
            .appender(Appender::builder().build("app", Box::new(rolling(dir, "querylab", keep)?)))
            .appender(
                Appender::builder().build("audit", Box::new(rolling(dir, "querylab_audit", keep)?)),
            )
            .logger(
                Logger::builder()
                    .appender("audit")
                    .appender("console")
                    .additive(false)
                    .build(AUDIT_TARGET, level),
            );
        root = root.appender("app");
    }

    Ok(builder.build(root.build(level))?)
}

/// Installs the process-wide logger.
///
/// # Errors
/// Returns an error if the configuration cannot be built or a logger is already set.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    let config = build_config(dir, parse_level(level), retention)?;
    log4rs::init_config(config)?;
    Ok(())
}
