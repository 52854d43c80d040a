//! Stderr logger for the matching stages.
//!
//! Lines read `[elapsed LEVEL stage] message`, where `stage` is the last
//! segment of the record's module path (`spacing`, `builder`, ...). Records
//! from other crates are only shown at `warn` and above so that dependency
//! chatter stays out of `--verbose` output.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_PREFIX: &str = "gridmatch";

fn is_own(target: &str) -> bool {
    target.starts_with(OWN_PREFIX)
}

/// Last `::` segment of a log target.
fn stage_of(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

struct StageLogger {
    level: LevelFilter,
    started: Instant,
}

impl StageLogger {
    fn admits(&self, level: Level, target: &str) -> bool {
        let ceiling = if is_own(target) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        };
        level <= ceiling
    }
}

impl Log for StageLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.admits(metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{:7.3}s {:>5} {}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            stage_of(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StageLogger> = OnceLock::new();

/// Install the stage logger. Later calls keep the first level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| StageLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber. `RUST_LOG` wins; otherwise the matching
/// crates log at `info` and everything else at `warn`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,gridmatch=info,gridmatch_core=info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
