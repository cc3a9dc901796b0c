//! Logging setup (§5, ambient concern): rolling file appenders via `log4rs`,
//! scoped to a single open database directory.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const ENCODER_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: u32 = 5;

/// Initializes logging into `{base_dir}/{db_name}_logs/{db_name}.log`,
/// rolling at 10MiB with `retention` kept generations. Safe to call more
/// than once per process only the first call takes effect; `log4rs`
/// returns an error on a second `init_config`, which is swallowed here
/// since a database re-open in the same process should not crash on it.
pub fn init_for_db_in(base_dir: &Path, db_name: &str, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = base_dir.to_path_buf();
    dir.push(format!("{db_name}_logs"));
    std::fs::create_dir_all(&dir)?;

    let log_path = dir.join(format!("{db_name}.log"));
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{db_name}.{{}}.log")).display()), DEFAULT_RETENTION)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(ENCODER_PATTERN)))
        .build(log_path, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("db", Box::new(appender)))
        .build(Root::builder().appender("db").build(level))?;
    let _ = log4rs::init_config(config);
    Ok(())
}

/// Reads `BLITE_LOG_DIR`/`BLITE_LOG_LEVEL` and initializes logging if
/// `BLITE_LOG_DIR` is set; a no-op otherwise so embedding applications keep
/// control of their own logger by default.
pub fn configure_from_env(db_name: &str) {
    let Ok(dir) = std::env::var("BLITE_LOG_DIR") else { return };
    let level = std::env::var("BLITE_LOG_LEVEL")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let _ = init_for_db_in(Path::new(&dir), db_name, level);
}
