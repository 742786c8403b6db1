use alloc::vec::Vec;
use core::fmt::Display;

#[cfg(std_io)]
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Configuration for logging in gpuvm, parameterized by a log level type.
///
/// Note that multiple outputs can be enabled at the same time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    #[cfg(std_io)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional crate-level logging configuration (e.g., info, debug, trace).
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this logger, determining verbosity.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            #[cfg(std_io)]
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

/// Log levels using the `log` crate.
///
/// This enum defines verbosity levels for crate-level logging.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    /// Logs informational messages.
    #[default]
    #[serde(rename = "info")]
    Info,

    /// Logs debugging messages.
    #[serde(rename = "debug")]
    Debug,

    /// Logs trace-level messages.
    #[serde(rename = "trace")]
    Trace,
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in `LoggerConfig`.
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Verbosity of the request logger.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RequestLogLevel {
    /// Requests are not logged.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Only open, open-as and close requests are logged.
    #[serde(rename = "basic")]
    Basic,

    /// Every request and its reply is logged.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for RequestLogLevel {}

/// Writes messages to every output enabled in a [LoggerConfig].
#[derive(Debug)]
pub struct Logger {
    outputs: Vec<LoggerKind>,
}

impl Logger {
    /// Creates a logger writing to the outputs of the given config.
    ///
    /// Returns a logger without outputs when the config's level is `disabled`, as decided
    /// by `enabled`.
    pub fn new<L: LogLevel>(config: &LoggerConfig<L>, enabled: bool) -> Self {
        let mut outputs = Vec::new();

        if !enabled {
            return Self { outputs };
        }

        #[cfg(std_io)]
        if let Some(file) = &config.file {
            match FileLogger::new(file, config.append) {
                Ok(logger) => outputs.push(LoggerKind::File(logger)),
                Err(err) => log::warn!("Can't open log file {}: {err}", file.display()),
            }
        }

        if config.stdout {
            outputs.push(LoggerKind::Stdout);
        }

        if config.stderr {
            outputs.push(LoggerKind::Stderr);
        }

        if let Some(level) = config.log {
            outputs.push(LoggerKind::Log(level));
        }

        Self { outputs }
    }

    /// Whether at least one output is enabled.
    pub fn is_active(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Logs a message to every output.
    pub fn log<S: Display>(&mut self, msg: &S) {
        for output in self.outputs.iter_mut() {
            output.log(msg);
        }
    }
}

/// Represents different types of loggers.
#[derive(Debug)]
enum LoggerKind {
    /// Logs to a file.
    #[cfg(std_io)]
    File(FileLogger),

    /// Logs to standard output.
    Stdout,

    /// Logs to standard error.
    Stderr,

    /// Logs using the `log` crate with a specified level.
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            #[cfg(std_io)]
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

/// Logger that writes messages to a file.
#[derive(Debug)]
#[cfg(std_io)]
struct FileLogger {
    writer: BufWriter<File>,
}

#[cfg(std_io)]
impl FileLogger {
    fn new(path: &PathBuf, append: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .create(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    // Logs a message to the file, flushing the buffer to ensure immediate write.
    fn log<S: Display>(&mut self, msg: &S) {
        let result = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());
        if let Err(err) = result {
            log::warn!("Failed to write to the log file: {err}");
        }
    }
}
