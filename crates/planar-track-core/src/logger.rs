//! Stderr logger for examples, benches, and host applications.
//!
//! Library code only ever emits through the `log` facade; installing this
//! (or any other) logger is the host's choice. Lines carry the elapsed time
//! since install and the emitting module, which is what distinguishes the
//! detection and tracking stages in a mixed trace:
//!
//! ```text
//! [  0.042s DEBUG planar_track::detect] target `poster`: 151/204 inliers
//! [  0.049s DEBUG planar_track::flow] tracked 1 of 1 targets
//! ```

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger {
    min: LevelFilter,
    epoch: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.min
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let elapsed = self.epoch.elapsed().as_secs_f64();
        let _ = writeln!(
            std::io::stderr(),
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Installs the stderr logger at `Info`.
pub fn init() -> Result<(), log::SetLoggerError> {
    init_with_level(LevelFilter::Info)
}

/// Installs the stderr logger at `level`. After the first successful
/// installation further calls keep the original level and return `Ok`.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            min: level,
            epoch: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Installs the stderr logger at the level named by the `PLANAR_TRACK_LOG`
/// environment variable (`error` through `trace`), defaulting to `info`
/// when the variable is unset or unrecognized.
pub fn init_from_env() -> Result<(), log::SetLoggerError> {
    let level = std::env::var("PLANAR_TRACK_LOG")
        .ok()
        .and_then(|raw| raw_level(&raw))
        .unwrap_or(LevelFilter::Info);
    init_with_level(level)
}

fn raw_level(raw: &str) -> Option<LevelFilter> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Installs a `tracing` subscriber instead of the plain logger, honouring
/// `RUST_LOG` and defaulting to `info`. Spans opened by the pipeline (one
/// per processed frame) close with their timing attached; `json = true`
/// switches to one flattened JSON object per event for log shippers.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    if json {
        let _ = builder.json().flatten_event(true).finish().try_init();
    } else {
        let _ = builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
