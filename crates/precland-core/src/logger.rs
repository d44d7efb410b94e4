//! Stderr logger for the `log` facade.
//!
//! Lines look like `[  12.345s  INFO precland::pipeline] message`: seconds
//! since installation, level, and the emitting module. The frame loop logs
//! one line per frame at `debug` and the telemetry link logs every skipped
//! message at `trace`, so [`LogConfig`] lets a module prefix run at its own
//! level (for example `precland_link` at `info` while frames are at `debug`).

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Global level plus per-module overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LevelFilter,
    /// `(target prefix, level)`; the longest matching prefix wins.
    pub modules: Vec<(String, LevelFilter)>,
}

impl LogConfig {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, prefix: impl Into<String>, level: LevelFilter) -> Self {
        self.modules.push((prefix.into(), level));
        self
    }

    /// Level that applies to records from `target`.
    pub fn level_for(&self, target: &str) -> LevelFilter {
        self.modules
            .iter()
            .filter(|(prefix, _)| {
                target
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(self.level, |(_, level)| *level)
    }

    /// Most verbose level any target can reach.
    pub fn max_level(&self) -> LevelFilter {
        self.modules
            .iter()
            .map(|(_, level)| *level)
            .fold(self.level, Ord::max)
    }

    /// `EnvFilter` directive string, e.g. `info,precland_link=warn`.
    pub fn directives(&self) -> String {
        let mut out = self.level.as_str().to_ascii_lowercase();
        for (prefix, level) in &self.modules {
            out.push_str(&format!(",{prefix}={}", level.as_str().to_ascii_lowercase()));
        }
        out
    }
}

struct StderrLogger {
    config: LogConfig,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.config.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:8.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. Only the first call installs.
pub fn init(config: LogConfig) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let max = config.max_level();
        let logger = LOGGER.get_or_init(|| StderrLogger {
            config,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(max);
    }
    Ok(())
}

/// [`init`] with one level for every module.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    init(LogConfig::new(level))
}

/// Install a `tracing` subscriber; `RUST_LOG` overrides `config`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
