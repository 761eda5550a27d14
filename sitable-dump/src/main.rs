//! sitable-dump: print PSI/SI tables found in an MPEG-TS file or pipe.
//!
//! Every requested table is read through a demultiplexer fed from the
//! input, reassembled, and printed once complete. Tables that do not
//! complete before the timeout or the end of the input are reported as
//! unavailable.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::{error, info};

mod dump;
mod logging;
mod report;
mod selection;

use dump::Mode;
use logging::LogOptions;
use selection::TableSelection;

/// Config file looked up in the working directory.
const DEFAULT_CONFIG: &str = "sitable-dump.toml";

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Exit status when at least one table was not obtained.
const EXIT_INCOMPLETE: i32 = 2;

/// sitable-dump - Dump PSI/SI tables from an MPEG-TS stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input transport stream, or "-" for stdin
    input: PathBuf,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// How long to wait for each table, in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Reader flavour
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Table to read: pat, sdt or raw:PID[:KIND] (repeatable)
    #[arg(long = "table")]
    tables: Vec<TableSelection>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    log_retention_days: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    reader: ReaderSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ReaderSection {
    timeout_ms: Option<u64>,
    mode: Option<Mode>,
    tables: Option<Vec<String>>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Effective settings after merging the command line over the config file.
#[derive(Debug)]
struct Settings {
    timeout: Duration,
    mode: Mode,
    tables: Vec<TableSelection>,
    log: LogOptions,
}

impl Settings {
    fn merge(args: &Args, file: ConfigFile) -> Result<Self, Box<dyn std::error::Error>> {
        let tables = if !args.tables.is_empty() {
            args.tables.clone()
        } else if let Some(names) = &file.reader.tables {
            names
                .iter()
                .map(|name| name.parse::<TableSelection>())
                .collect::<Result<Vec<_>, _>>()?
        } else {
            TableSelection::defaults()
        };

        let timeout_ms = args
            .timeout_ms
            .or(file.reader.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Ok(Self {
            timeout: Duration::from_millis(timeout_ms),
            mode: args.mode.or(file.reader.mode).unwrap_or_default(),
            tables,
            log: LogOptions {
                dir: args
                    .log_dir
                    .clone()
                    .or_else(|| file.logging.log_dir.map(PathBuf::from)),
                retention_days: args
                    .log_retention_days
                    .or(file.logging.retention_days)
                    .unwrap_or(DEFAULT_RETENTION_DAYS),
                level: file.logging.level,
                verbose: args.verbose,
            },
        })
    }
}

fn open_input(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    if path == Path::new("-") {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    let settings = Settings::merge(&args, file_config)?;
    logging::init_logging(&settings.log)?;

    info!(
        "Reading {} table(s) from {} ({:?} mode, timeout {:?})",
        settings.tables.len(),
        args.input.display(),
        settings.mode,
        settings.timeout
    );

    let input = open_input(&args.input).map_err(|e| {
        error!("Cannot open {}: {}", args.input.display(), e);
        e
    })?;

    let demux = sitable_reader::Demux::new();
    let pump = {
        let demux = demux.clone();
        move |eof| dump::spawn_pump(demux, input, eof)
    };

    let reports = match settings.mode {
        Mode::Blocking => {
            let demux = demux.clone();
            let selections = settings.tables.clone();
            let timeout = settings.timeout;
            tokio::task::spawn_blocking(move || dump::run_blocking(&demux, &selections, timeout, pump))
                .await??
        }
        Mode::Async => dump::run_async(&demux, &settings.tables, settings.timeout, pump).await?,
    };
    demux.close();

    let mut stdout = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &reports)?;
        writeln!(stdout)?;
    } else {
        for report in &reports {
            write!(stdout, "{}", report.to_text())?;
        }
    }
    stdout.flush()?;

    let missing = reports.iter().filter(|r| !r.complete).count();
    if missing > 0 {
        info!("{} of {} table(s) unavailable", missing, reports.len());
        std::process::exit(EXIT_INCOMPLETE);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sitable-dump"];
        argv.extend_from_slice(extra);
        argv.push("input.ts");
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_config() {
        let settings = Settings::merge(&args(&[]), ConfigFile::default()).unwrap();
        assert_eq!(settings.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(settings.mode, Mode::Blocking);
        assert_eq!(settings.tables, TableSelection::defaults());
        assert!(settings.log.dir.is_none());
        assert_eq!(settings.log.retention_days, DEFAULT_RETENTION_DAYS);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [reader]
            timeout_ms = 2500
            mode = "async"
            tables = ["sdt", "raw:0x12:extended"]

            [logging]
            log_dir = "logs"
            retention_days = 3
            level = "warn"
            "#,
        )
        .unwrap();

        let settings = Settings::merge(&args(&[]), file).unwrap();
        assert_eq!(settings.timeout, Duration::from_millis(2500));
        assert_eq!(settings.mode, Mode::Async);
        assert_eq!(settings.tables.len(), 2);
        assert_eq!(settings.tables[1].pid(), 0x12);
        assert_eq!(settings.log.dir, Some(PathBuf::from("logs")));
        assert_eq!(settings.log.retention_days, 3);
        assert_eq!(settings.log.level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_command_line_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [reader]
            timeout_ms = 2500
            mode = "async"
            tables = ["sdt"]
            "#,
        )
        .unwrap();

        let settings = Settings::merge(
            &args(&["--timeout-ms", "100", "--mode", "blocking", "--table", "pat", "--table", "raw:20"]),
            file,
        )
        .unwrap();
        assert_eq!(settings.timeout, Duration::from_millis(100));
        assert_eq!(settings.mode, Mode::Blocking);
        assert_eq!(settings.tables[0], TableSelection::Pat);
        assert_eq!(settings.tables[1].pid(), 20);
    }

    #[test]
    fn test_bad_table_in_file() {
        let file: ConfigFile = toml::from_str("[reader]\ntables = [\"eit\"]\n").unwrap();
        assert!(Settings::merge(&args(&[]), file).is_err());
    }

    #[test]
    fn test_bad_table_on_command_line() {
        let argv = ["sitable-dump", "--table", "raw:0x2000", "input.ts"];
        assert!(Args::try_parse_from(argv).is_err());
    }
}
