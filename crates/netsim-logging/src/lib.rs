//! Structured logging for netsim
//!
//! Builds a `tracing` subscriber from a serde-friendly [`LogConfig`].
//! Records are stamped with simulated time by default.
//!
//! # Quick Start
//!
//! ```ignore
//! use netsim_logging::{NetsimSubscriberBuilder, LogConfig};
//!
//! // Pretty console output at info level
//! let _guard = NetsimSubscriberBuilder::new().try_init()?;
//!
//! // Development mode, debug level
//! let _guard = NetsimSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//! ```
//!
//! `RUST_LOG`, when set, replaces the configured filter.

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fmt;
use std::fs::{self, File};
use std::path::PathBuf;

use netsim_core::current_sim_time;
use thiserror::Error;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Timer printing the current simulated time
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTimer;

impl FormatTime for SimTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", current_sim_time())
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the netsim logging subscriber
pub struct NetsimSubscriberBuilder {
    config: LogConfig,
}

impl NetsimSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Switch console output between pretty text and JSONL
    pub fn with_json(mut self, json: bool) -> Self {
        self.config.console.pretty = !json;
        self
    }

    /// Configure file output (always JSONL)
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Filter from `RUST_LOG` if set, else from the configuration
    pub fn build_filter(&self) -> Result<EnvFilter, LoggingError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(self.config.filter_directives())?),
        }
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes the file writer on drop and must be kept
    /// alive for as long as logging is needed.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = self.build_filter()?;
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        let console = &self.config.console;
        if console.enabled {
            layers.push(match (console.pretty, console.sim_time) {
                (true, true) => tracing_subscriber::fmt::layer()
                    .with_ansi(console.ansi)
                    .with_target(true)
                    .with_timer(SimTimer)
                    .boxed(),
                (true, false) => tracing_subscriber::fmt::layer()
                    .with_ansi(console.ansi)
                    .with_target(true)
                    .boxed(),
                (false, _) => self.json_layer(std::io::stdout),
            });
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(self.json_layer(writer));
        }

        Registry::default().with(layers).with(filter).try_init()?;
        Ok(guard)
    }

    fn json_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(SimTimer)
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_writer(writer)
            .boxed()
    }
}

impl Default for NetsimSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let io_error = |source| LoggingError::File {
        path: config.directory.clone(),
        source,
    };
    fs::create_dir_all(&config.directory).map_err(io_error)?;
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            // single file, truncated on every run
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(&path).map_err(|source| LoggingError::File { path, source })?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };
    let appender = RollingFileAppender::new(rotation, &config.directory, &config.prefix);
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging for tests (warn level, ignores repeated calls)
pub fn init_testing() {
    let _ = NetsimSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
