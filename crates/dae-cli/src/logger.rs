use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;

/// Pick the log level: explicit flag first, then `RUST_LOG`, then `warn`.
fn level_filter(level: Option<&str>, env: Option<&str>) -> LevelFilter {
    level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .or_else(|| env.and_then(|v| v.parse::<LevelFilter>().ok()))
        .unwrap_or(LevelFilter::Warn)
}

/// Install the stderr logger. Stdout is reserved for results.
pub fn init_logging(level: Option<&str>) {
    let env = std::env::var("RUST_LOG").ok();
    let log_level = level_filter(level, env.as_deref());

    Builder::new()
        .filter_level(log_level)
        .target(Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:5} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    log::debug!("logging initialised at {}", log_level.to_string().to_uppercase());
}
