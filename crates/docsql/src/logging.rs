//! Structured logging setup for applications embedding the driver
//!
//! The driver itself only emits `tracing` events. `init` installs a global
//! subscriber configured from the environment.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "docsql.log";

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production (structured logging)
    Json,
    /// Compact format for testing
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }

    /// Read `DOCSQL_LOG_FORMAT`; defaults to pretty.
    pub fn from_env() -> Self {
        std::env::var("DOCSQL_LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or(LogFormat::Pretty)
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl LogOutput {
    pub fn parse(value: &str) -> Self {
        match value {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }

    /// Read `DOCSQL_LOG_OUTPUT`; defaults to stdout.
    pub fn from_env() -> Self {
        std::env::var("DOCSQL_LOG_OUTPUT")
            .map(|v| Self::parse(&v))
            .unwrap_or(LogOutput::Stdout)
    }
}

fn log_dir() -> String {
    std::env::var("DOCSQL_LOG_DIR").unwrap_or_else(|_| "./logs".to_string())
}

fn file_appender() -> RollingFileAppender {
    let dir = log_dir();
    std::fs::create_dir_all(&dir).ok();
    RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX)
}

/// Install the global subscriber.
///
/// Environment variables:
/// - `RUST_LOG`: filter directives (e.g. "info", "docsql=debug")
/// - `DOCSQL_LOG_FORMAT`: "pretty", "json" or "compact"
/// - `DOCSQL_LOG_OUTPUT`: "stdout", "file" or "both"
/// - `DOCSQL_LOG_DIR`: directory for daily log files (default "./logs")
///
/// Fails without side effects when a global subscriber is already set.
pub fn init() -> Result<(), TryInitError> {
    let format = LogFormat::from_env();
    let output = LogOutput::from_env();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = match output {
        LogOutput::File => None,
        LogOutput::Stdout | LogOutput::Both => Some(match format {
            LogFormat::Pretty => fmt::layer().pretty().with_thread_ids(true).with_target(true).boxed(),
            LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
            LogFormat::Compact => fmt::layer().compact().boxed(),
        }),
    };
    let file_layer = match output {
        LogOutput::Stdout => None,
        LogOutput::File | LogOutput::Both => Some(
            fmt::layer()
                .with_writer(file_appender())
                .with_ansi(false)
                .boxed(),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(format = ?format, output = ?output, "Logging initialized");
    if matches!(output, LogOutput::File | LogOutput::Both) {
        tracing::debug!(directory = %log_dir(), "Writing daily log files");
    }
    Ok(())
}

/// Emit an event with an `event` name and debug-formatted fields.
///
/// ```ignore
/// log_event!(
///     level: tracing::Level::DEBUG,
///     event: "statement_executed",
///     collection: "users",
///     rowcount: 3
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}
