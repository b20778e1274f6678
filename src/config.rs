//! Server configuration: a line-oriented `KEY=VALUE` file, loaded once at
//! startup (spec §6).
//!
//! Grounded on the original C loader (`config.c`): comments (`#`) and blank
//! lines are skipped, `key=value` pairs are split on the first `=`, and
//! unrecognized keys are warned about rather than rejected. Numeric keys are
//! range-checked on load so a misconfigured server fails fast instead of
//! panicking or silently clamping later.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

/// A single malformed or out-of-range configuration entry.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `key` had no `=` separator.
    MalformedLine { line: usize },
    /// `key`'s value was empty or not an integer where one was required.
    InvalidInteger { key: &'static str, line: usize },
    /// `key`'s value parsed but fell outside its valid range.
    OutOfRange {
        key: &'static str,
        line: usize,
        min: i64,
        max: i64,
    },
    /// The configuration file could not be opened.
    Io(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MalformedLine { line } => {
                write!(f, "line {line}: expected KEY=VALUE")
            }
            ConfigError::InvalidInteger { key, line } => {
                write!(f, "line {line}: {key} requires an integer value")
            }
            ConfigError::OutOfRange { key, line, min, max } => {
                write!(f, "line {line}: {key} must be between {min} and {max}")
            }
            ConfigError::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration, as loaded from a config file or defaulted.
///
/// Every field has a documented default (spec §6) so a missing file, or a
/// file that sets only a handful of keys, still yields a runnable server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Listening port. Range 1–65535, default 8080.
    pub port: u16,
    /// Root directory static files are served from. Default `./www`.
    pub document_root: PathBuf,
    /// Number of worker runtimes in the pool. Range 1–64, default 4.
    pub num_workers: u32,
    /// Threads per worker's internal pool. Range 1–256, default 10.
    pub threads_per_worker: u32,
    /// Admission queue capacity, shared across all workers. Range 1–10000,
    /// default 100.
    pub max_queue_size: u32,
    /// Access log path. Default `access.log`.
    pub log_file: PathBuf,
    /// Per-worker cache budget in megabytes. Range 0–1024, default 10.
    pub cache_size_mb: u32,
    /// Idle connection timeout, in seconds. Range 1–3600, default 30.
    pub timeout_seconds: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            document_root: PathBuf::from("./www"),
            num_workers: 4,
            threads_per_worker: 10,
            max_queue_size: 100,
            log_file: PathBuf::from("access.log"),
            cache_size_mb: 10,
            timeout_seconds: 30,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, applying defaults for any key the
    /// file doesn't set.
    ///
    /// A missing file is not an error — callers that want strict behavior
    /// should check the file exists first; this mirrors the original
    /// loader's habit of running happily off an all-defaults config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Ok(Config::default()),
        };
        Self::parse(&text)
    }

    /// Parses configuration text directly — the part of [`Config::load`]
    /// that doesn't touch the filesystem, split out for testing.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::MalformedLine { line_no })?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "PORT" => config.port = parse_ranged(key, value, line_no, 1, 65535)? as u16,
                "DOCUMENT_ROOT" => config.document_root = PathBuf::from(value),
                "NUM_WORKERS" => config.num_workers = parse_ranged(key, value, line_no, 1, 64)? as u32,
                "THREADS_PER_WORKER" => {
                    config.threads_per_worker = parse_ranged(key, value, line_no, 1, 256)? as u32
                }
                "MAX_QUEUE_SIZE" => {
                    config.max_queue_size = parse_ranged(key, value, line_no, 1, 10000)? as u32
                }
                "LOG_FILE" => config.log_file = PathBuf::from(value),
                "CACHE_SIZE_MB" => {
                    config.cache_size_mb = parse_ranged(key, value, line_no, 0, 1024)? as u32
                }
                "TIMEOUT_SECONDS" => {
                    config.timeout_seconds = parse_ranged(key, value, line_no, 1, 3600)? as u32
                }
                other => {
                    log::warn!("line {line_no}: ignoring unknown config key '{other}'");
                }
            }
        }

        Ok(config)
    }
}

/// Parses `value` as an integer in `[min, max]`, mapping the static `key`
/// name into whichever [`ConfigError`] variant applies.
///
/// `key` is `&'static str` even though it's compared against a borrowed
/// `&str` above — every call site passes one of the match arms' own string
/// literals, so the `'static` bound always holds; it just saves the error
/// variant from having to own a `String` for the common case.
fn parse_ranged(
    key: &'static str,
    value: &str,
    line: usize,
    min: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidInteger { key, line });
    }
    let parsed: i64 = value
        .parse()
        .map_err(|_| ConfigError::InvalidInteger { key, line })?;
    if parsed < min || parsed > max {
        return Err(ConfigError::OutOfRange { key, line, min, max });
    }
    Ok(parsed)
}
