//! Rolling file logs for the store's `event=... module=... status=...` records.
//!
//! # Invariants
//! - The backend is started at most once per process.
//! - A second initialization must name the same directory and level.

use flexi_logger::{
    Cleanup, Criterion, FileSpec, LogSpecification, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{info, LevelFilter};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "docrow";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static ACTIVE_LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Where and how verbosely the store writes its log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    /// Absolute directory receiving `docrow*.log` files.
    pub dir: PathBuf,
}

impl LogSettings {
    /// Parses `level` (`trace`..`error`, case-insensitive) for `dir`.
    pub fn new(level: &str, dir: impl Into<PathBuf>) -> Result<Self, LoggingError> {
        let level = level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| LoggingError::UnsupportedLevel(level.trim().to_string()))?;
        Ok(Self {
            level,
            dir: dir.into(),
        })
    }

    /// `debug` in debug builds, `info` otherwise.
    pub fn default_level() -> LevelFilter {
        if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

#[derive(Debug)]
pub enum LoggingError {
    UnsupportedLevel(String),
    RelativeDir(PathBuf),
    CreateDir { dir: PathBuf, source: std::io::Error },
    Backend(flexi_logger::FlexiLoggerError),
    /// Logging already runs with other settings.
    Conflict { active: LogSettings },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(f, "unsupported log level `{level}`"),
            Self::RelativeDir(dir) => {
                write!(f, "log directory must be absolute, got `{}`", dir.display())
            }
            Self::CreateDir { dir, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                dir.display()
            ),
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::Conflict { active } => write!(
                f,
                "logging already active at `{}` with level {}",
                active.dir.display(),
                active.level
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// Starts the rolling file logger, or confirms it already runs with
/// `settings`.
pub fn init_logging(settings: &LogSettings) -> Result<(), LoggingError> {
    if !settings.dir.is_absolute() {
        return Err(LoggingError::RelativeDir(settings.dir.clone()));
    }

    let active = ACTIVE_LOGGER.get_or_try_init(|| start_backend(settings))?;
    if active.settings != *settings {
        return Err(LoggingError::Conflict {
            active: active.settings.clone(),
        });
    }
    Ok(())
}

/// Settings of the running logger, if any.
pub fn logging_status() -> Option<LogSettings> {
    ACTIVE_LOGGER.get().map(|active| active.settings.clone())
}

fn start_backend(settings: &LogSettings) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&settings.dir).map_err(|source| LoggingError::CreateDir {
        dir: settings.dir.clone(),
        source,
    })?;

    let handle = Logger::with(
        LogSpecification::builder()
            .default(settings.level)
            .build(),
    )
    .log_to_file(file_spec(&settings.dir))
    .rotate(
        Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
        Naming::Numbers,
        Cleanup::KeepLogFiles(MAX_LOG_FILES),
    )
    .write_mode(WriteMode::BufferAndFlush)
    .append()
    .format_for_files(flexi_logger::detailed_format)
    .start()
    .map_err(LoggingError::Backend)?;

    info!(
        "event=logging_init module=logging status=ok level={} log_dir={} version={}",
        settings.level,
        settings.dir.display(),
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        settings: settings.clone(),
        _handle: handle,
    })
}

fn file_spec(dir: &Path) -> FileSpec {
    FileSpec::default()
        .directory(dir)
        .basename(LOG_FILE_BASENAME)
}
