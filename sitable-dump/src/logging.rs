//! Console and rolling-file logging.
//!
//! Console output goes to stderr so that stdout only carries the dumped
//! tables. When a log directory is configured, a daily-rotated file is
//! written as well and files older than the retention period are removed
//! at start-up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// File name prefix of the rolling log files.
const LOG_FILE_NAME: &str = "sitable-dump.log";

/// Resolved logging options.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Directory for log files; console only when unset.
    pub dir: Option<PathBuf>,
    /// Days to keep old log files.
    pub retention_days: u64,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
    pub verbose: bool,
}

impl LogOptions {
    fn default_filter(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            self.level.as_deref().unwrap_or("info")
        }
    }
}

/// Install the global subscriber and bridge `log` records into it.
pub fn init_logging(options: &LogOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_filter()));

    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .with_timer(LocalTimeTimer);

    let file = match &options.dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            clean_old_logs(dir, options.retention_days)?;

            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // Flushes on drop, so it has to live until exit.
            std::mem::forget(guard);

            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_timer(LocalTimeTimer),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set default subscriber: {}", e))?;

    tracing_log::LogTracer::init().map_err(|e| format!("Failed to initialize LogTracer: {}", e))?;

    Ok(())
}

/// Remove log files last modified more than `retention_days` ago.
fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_ours = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_NAME));
        if !is_ours {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let modified: chrono::DateTime<Local> = modified.into();
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
            }
        }
    }

    Ok(removed)
}

/// Local time formatting for log lines.
#[derive(Debug, Clone, Copy)]
struct LocalTimeTimer;

impl fmt::time::FormatTime for LocalTimeTimer {
    fn format_time(&self, w: &mut fmt::format::Writer) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}
