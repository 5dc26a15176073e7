//! # docbase-telemetry
//!
//! Process-wide structured logging for docbase binaries.
//!
//! All initialisers honour `RUST_LOG` when it is set and are idempotent: the
//! first call installs the global subscriber, later and concurrent calls wait
//! for it and return its outcome.
//!
//! ```rust,ignore
//! docbase_telemetry::init_telemetry("docbase")?;
//! tracing::info!(document.id = %id, chunk_count, "ingested document");
//! ```

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Error returned when a global subscriber cannot be installed.
pub type TelemetryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of the one installation attempt: the service name, or the error text.
static INSTALLED: OnceLock<Result<String, String>> = OnceLock::new();

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines for terminals.
    #[default]
    Pretty,
    /// One JSON object per event, with the current span list.
    Json,
}

/// Install human-readable logging at `info` level.
///
/// # Errors
///
/// Returns an error if another crate already installed a global subscriber.
pub fn init_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    init_with_level(service_name, Level::INFO)
}

/// Install human-readable logging with `level` as the default filter.
///
/// # Errors
///
/// Returns an error if another crate already installed a global subscriber.
pub fn init_with_level(service_name: &str, level: Level) -> Result<(), TelemetryError> {
    init(service_name, level, LogFormat::Pretty)
}

/// Install JSON logging at `info` level, for log shippers.
///
/// # Errors
///
/// Returns an error if another crate already installed a global subscriber.
pub fn init_json(service_name: &str) -> Result<(), TelemetryError> {
    init(service_name, Level::INFO, LogFormat::Json)
}

/// Install logging with an explicit level and format.
///
/// # Errors
///
/// Returns an error if another crate already installed a global subscriber.
pub fn init(service_name: &str, level: Level, format: LogFormat) -> Result<(), TelemetryError> {
    let installed = INSTALLED.get_or_init(|| {
        install(level, format).map_err(|e| e.to_string())?;
        tracing::debug!(service.name = service_name, ?format, "telemetry initialised");
        Ok(service_name.to_string())
    });
    match installed {
        Ok(_) => Ok(()),
        Err(message) => Err(message.clone().into()),
    }
}

fn install(level: Level, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = default_filter(level);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }
    Ok(())
}

/// The service name passed to the first successful initialiser, if any.
pub fn service_name() -> Option<&'static str> {
    INSTALLED.get().and_then(|installed| installed.as_deref().ok())
}

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialisation_is_idempotent() {
        init_with_level("docbase-test", Level::DEBUG).unwrap();
        init_telemetry("docbase-test").unwrap();
        init_json("docbase-test").unwrap();
        assert_eq!(service_name(), Some("docbase-test"));
        tracing::info!(chunk_count = 3, "logging after initialisation does not panic");
    }

    #[test]
    fn concurrent_initialisation_installs_once() {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    let format = if i % 2 == 0 { LogFormat::Pretty } else { LogFormat::Json };
                    init("docbase-test", Level::INFO, format)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert!(service_name().is_some());
    }

    #[test]
    fn default_filter_uses_the_level_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(default_filter(Level::WARN).to_string(), "warn");
        }
    }
}
