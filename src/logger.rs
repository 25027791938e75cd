use std::path::{Path, PathBuf};

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;

use crate::error::{logging, Result};

const LOG_FILE: &str = "steamserver.log";
const ROLL_PATTERN: &str = "steamserver.{}.log";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const ROLL_COUNT: u32 = 5;

/// `<local data dir>/steamserver/logs`
pub fn log_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("steamserver").join("logs"))
        .ok_or_else(|| logging("no local data directory for this user"))
}

fn file_appender(logs_dir: &Path) -> Result<RollingFileAppender> {
    let roller = FixedWindowRoller::builder()
        .build(&logs_dir.join(ROLL_PATTERN).to_string_lossy(), ROLL_COUNT)
        .map_err(|e| logging(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));

    RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {M} - {m}{n}",
        )))
        .build(logs_dir.join(LOG_FILE), Box::new(policy))
        .map_err(|e| logging(e.to_string()))
}

/// File logging at `Info`, plus warnings on stderr when `echo_warnings`.
fn build_config(logs_dir: &Path, echo_warnings: bool) -> Result<Config> {
    let mut config =
        Config::builder().appender(Appender::builder().build("file", Box::new(file_appender(logs_dir)?)));
    let mut root = Root::builder().appender("file");

    if echo_warnings {
        let stderr = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
            .build();
        config = config.appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(LevelFilter::Warn)))
                .build("stderr", Box::new(stderr)),
        );
        root = root.appender("stderr");
    }

    config
        .build(root.build(LevelFilter::Info))
        .map_err(|e| logging(e.to_string()))
}

/// Routes `log` records to a rolling file and returns its path.
///
/// The terminal belongs to the prompt and progress bar, so only debug builds
/// echo warnings there.
pub fn init() -> Result<PathBuf> {
    let logs_dir = log_dir()?;
    std::fs::create_dir_all(&logs_dir)?;

    let config = build_config(&logs_dir, cfg!(debug_assertions))?;
    log4rs::init_config(config).map_err(|e| logging(e.to_string()))?;

    std::panic::set_hook(Box::new(|info| {
        log::error!("panic: {info}");
    }));

    let log_file = logs_dir.join(LOG_FILE);
    log::info!("logging to {}", log_file.display());
    Ok(log_file)
}
