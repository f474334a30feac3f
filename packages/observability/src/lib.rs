//! # Observability
//!
//! Logging setup for the subtitle server processes.
//!
//! Binaries call [`init`] or [`init_with_config`] once at startup and use
//! `tracing` macros everywhere else. Library crates never install a
//! subscriber.
//!
//! Output goes to stderr (compact, human readable) and optionally to a JSONL
//! file, one object per line:
//!
//! ```text
//! {"timestamp":"...","level":"INFO","service":"subtitle-server","pid":4242,
//!  "thread":"subtitle-dispatch","target":"subtitle_dispatch::queue",
//!  "message":"Dispatch queue stopped","fields":{"delivered":12,"dropped":0}}
//! ```
//!
//! `RUST_LOG` overrides the configured level for both outputs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "subtitle-server".into(),
//!         default_level: "debug".into(),
//!         file_output: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

mod file;
mod json_layer;

use std::io;
use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file::{LogFileWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogLine};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL line.
    pub service_name: String,

    /// Default level filter (e.g. "debug", "info"). `RUST_LOG` wins.
    pub default_level: String,

    /// JSONL file path. Defaults to `~/.subtitle-server/logs/<service>.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Emit compact logs to stderr.
    pub also_stderr: bool,

    /// Write the JSONL file.
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
            file_output: false,
        }
    }
}

impl LogConfig {
    /// Where the JSONL file goes, if anywhere can be found.
    pub fn resolved_log_path(&self) -> Option<PathBuf> {
        self.log_path
            .clone()
            .or_else(|| default_log_path(&self.service_name))
    }
}

fn default_log_path(service_name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".subtitle-server")
            .join("logs")
            .join(format!("{service_name}.jsonl"))
    })
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging.
///
/// If the log file cannot be opened, logging continues on stderr and the
/// failure is reported there. Calling this twice is a no-op.
pub fn init_with_config(config: LogConfig) {
    let mut file_error = None;

    let json_layer = if config.file_output {
        match config.resolved_log_path() {
            Some(path) => match LogFileWriter::open(&path) {
                Ok(writer) => Some(
                    JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
                        .with_filter(env_filter(&config.default_level)),
                ),
                Err(e) => {
                    file_error = Some(format!("{}: {e}", path.display()));
                    None
                }
            },
            None => {
                file_error = Some("no home directory for the default log path".to_string());
                None
            }
        }
    } else {
        None
    };

    let stderr_layer = (config.also_stderr || json_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }
    if let Some(error) = file_error {
        tracing::warn!(error = %error, "Log file unavailable, logging to stderr only");
    }
    tracing::debug!(service = %config.service_name, "Logging initialized");
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
