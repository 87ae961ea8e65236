//! Structured logging for the embedq embedding queue.
//!
//! Every member crate logs through the macros exported here, so one set of
//! environment variables controls the verbosity of the whole workspace.
//!
//! # Usage
//!
//! ```rust
//! use embedq_log::{debug, info, warn, error, trace};
//!
//! info!("Worker started");
//! debug!("Tick interval: {}ms", 500);
//!
//! // Structured fields go in a leading `{ ... }` block
//! let job_id = "post_indexing_1700000000000_a1b2c3d4e";
//! info!({ job_id = job_id, priority = 2 }, "Job enqueued");
//!
//! // Explicit target
//! warn!(target: "embedq::ratelimit", { operation = "ml_analysis" }, "Rate limit exceeded");
//! ```
//!
//! # Environment Variables
//!
//! - `EMBEDQ_DEBUG=1` - Enable debug logging
//! - `EMBEDQ_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `EMBEDQ_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `EMBEDQ_LOG_COLOR=1|0` - Enable/disable colors
//! - `EMBEDQ_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `EMBEDQ_LOG_MODULE=1|0` - Include the log target

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ============================================================================
// Log Levels
// ============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level (least verbose)
    Error = 4,
    /// Off (no logging)
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Get level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }

    #[cfg(feature = "color")]
    fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Level::Trace => "TRACE".magenta(),
            Level::Debug => "DEBUG".blue(),
            Level::Info => "INFO".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERROR".red().bold(),
            Level::Off => "OFF".white(),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-column human format
    Pretty,
    /// Compact single-line format
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Global Configuration
// ============================================================================

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include the log target
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Create config from the process environment and apply it globally.
    pub fn from_env() -> Self {
        let config = Self::from_lookup(|key| env::var(key).ok());

        DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
        LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);

        config
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Does not touch the global level; [`LogConfig::from_env`] does.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("EMBEDQ_DEBUG").unwrap_or(false);

        let level = lookup("EMBEDQ_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("EMBEDQ_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = flag("EMBEDQ_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            debug,
            level,
            format,
            color,
            timestamps: flag("EMBEDQ_LOG_TIMESTAMPS").unwrap_or(true),
            module_path: flag("EMBEDQ_LOG_MODULE").unwrap_or(true),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize the logging system.
///
/// Runs automatically on the first emitted record; call it for eager
/// initialization.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Check if debug logging is enabled.
#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Check if a log level is enabled.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Get current log level.
pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level at runtime.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Enable or disable debug mode at runtime.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Record Output
// ============================================================================

/// A structured field attached to a record.
pub type Field<'a> = (&'a str, String);

/// Emit a record without fields.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    log_fields(level, target, message, &[]);
}

/// Emit a record with structured fields.
#[doc(hidden)]
pub fn log_fields(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    let config = config();
    if !is_level_enabled(level) {
        return;
    }

    #[cfg(feature = "tracing")]
    {
        let _ = config;
        forward_to_tracing(level, target, message, fields);
    }

    #[cfg(not(feature = "tracing"))]
    match config.format {
        Format::Pretty => write_pretty(level, target, message, fields, config),
        Format::Compact => write_compact(level, target, message, fields, config),
        Format::Json => write_json(level, target, message, fields),
    }
}

/// Render fields as `key=value` pairs separated by spaces.
pub fn render_fields(fields: &[Field<'_>]) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            if value.contains(char::is_whitespace) {
                format!("{}={:?}", key, value)
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(not(feature = "tracing"))]
fn write_pretty(level: Level, target: &str, message: &str, fields: &[Field<'_>], config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Local::now();
        let _ = write!(stderr, "{} ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
    }

    #[cfg(feature = "color")]
    if config.color {
        let _ = write!(stderr, "{:5} ", level.colored());
    } else {
        let _ = write!(stderr, "{:5} ", level.as_str());
    }

    #[cfg(not(feature = "color"))]
    let _ = write!(stderr, "{:5} ", level.as_str());

    if config.module_path && !target.is_empty() {
        let _ = write!(stderr, "[{}] ", target);
    }

    if fields.is_empty() {
        let _ = writeln!(stderr, "{}", message);
    } else {
        let _ = writeln!(stderr, "{} {}", message, render_fields(fields));
    }
}

#[cfg(not(feature = "tracing"))]
fn write_compact(level: Level, target: &str, message: &str, fields: &[Field<'_>], config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Local::now();
        let _ = write!(stderr, "{} ", now.format("%H:%M:%S"));
    }

    let _ = write!(stderr, "{} ", level.as_str().chars().next().unwrap_or('?'));

    if config.module_path && !target.is_empty() {
        let _ = write!(stderr, "{}: ", target);
    }

    if fields.is_empty() {
        let _ = writeln!(stderr, "{}", message);
    } else {
        let _ = writeln!(stderr, "{} {}", message, render_fields(fields));
    }
}

#[cfg(all(feature = "json", not(feature = "tracing")))]
fn write_json(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    if let Some(line) = json_line(level, target, message, fields) {
        eprintln!("{}", line);
    }
}

/// Serialize one record as a JSON line.
#[cfg(feature = "json")]
pub fn json_line(level: Level, target: &str, message: &str, fields: &[Field<'_>]) -> Option<String> {
    use serde::Serialize;

    #[derive(Serialize)]
    struct Entry<'a> {
        timestamp: String,
        level: &'a str,
        target: &'a str,
        message: &'a str,
        #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
        fields: serde_json::Map<String, serde_json::Value>,
    }

    let fields = fields
        .iter()
        .map(|(key, value)| (key.to_string(), serde_json::Value::String(value.clone())))
        .collect();

    let entry = Entry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: level.as_str(),
        target,
        message,
        fields,
    };

    serde_json::to_string(&entry).ok()
}

#[cfg(all(not(feature = "json"), not(feature = "tracing")))]
fn write_json(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    let mut line = format!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}""#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        escape_json(target),
        escape_json(message)
    );
    if !fields.is_empty() {
        let rendered: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!(r#""{}":"{}""#, escape_json(k), escape_json(v)))
            .collect();
        line.push_str(&format!(r#","fields":{{{}}}"#, rendered.join(",")));
    }
    line.push('}');
    eprintln!("{}", line);
}

#[cfg(all(not(feature = "json"), not(feature = "tracing")))]
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

#[cfg(feature = "tracing")]
fn forward_to_tracing(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    let rendered = render_fields(fields);
    match level {
        Level::Trace => tracing::trace!(source = target, fields = %rendered, "{}", message),
        Level::Debug => tracing::debug!(source = target, fields = %rendered, "{}", message),
        Level::Info => tracing::info!(source = target, fields = %rendered, "{}", message),
        Level::Warn => tracing::warn!(source = target, fields = %rendered, "{}", message),
        Level::Error => tracing::error!(source = target, fields = %rendered, "{}", message),
        Level::Off => {}
    }
}

// ============================================================================
// Macros
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __emit {
    ($level:expr, $target:expr, { $($key:ident = $value:expr),* $(,)? }, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log_fields(
                $level,
                $target,
                &format!($($arg)+),
                &[$((stringify!($key), format!("{}", $value))),*],
            );
        }
    };
    ($level:expr, $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log($level, $target, &format!($($arg)+));
        }
    };
}

/// Log a trace record.
#[macro_export]
macro_rules! trace {
    (target: $target:expr, { $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Trace, $target, { $($fields)* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Trace, $target, $($arg)+)
    };
    ({ $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Trace, module_path!(), { $($fields)* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__emit!($crate::Level::Trace, module_path!(), $($arg)+)
    };
}

/// Log a debug record.
///
/// Enabled by `EMBEDQ_DEBUG=1` or `EMBEDQ_LOG_LEVEL=debug`.
///
/// ```rust
/// use embedq_log::debug;
///
/// let hash = "3k9x1";
/// debug!({ cache_key = hash }, "Cache hit");
/// ```
#[macro_export]
macro_rules! debug {
    (target: $target:expr, { $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Debug, $target, { $($fields)* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Debug, $target, $($arg)+)
    };
    ({ $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Debug, module_path!(), { $($fields)* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__emit!($crate::Level::Debug, module_path!(), $($arg)+)
    };
}

/// Log an info record.
#[macro_export]
macro_rules! info {
    (target: $target:expr, { $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Info, $target, { $($fields)* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Info, $target, $($arg)+)
    };
    ({ $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Info, module_path!(), { $($fields)* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__emit!($crate::Level::Info, module_path!(), $($arg)+)
    };
}

/// Log a warning record.
#[macro_export]
macro_rules! warn {
    (target: $target:expr, { $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Warn, $target, { $($fields)* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Warn, $target, $($arg)+)
    };
    ({ $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Warn, module_path!(), { $($fields)* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__emit!($crate::Level::Warn, module_path!(), $($arg)+)
    };
}

/// Log an error record.
#[macro_export]
macro_rules! error {
    (target: $target:expr, { $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Error, $target, { $($fields)* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Error, $target, $($arg)+)
    };
    ({ $($fields:tt)* }, $($arg:tt)+) => {
        $crate::__emit!($crate::Level::Error, module_path!(), { $($fields)* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__emit!($crate::Level::Error, module_path!(), $($arg)+)
    };
}

// ============================================================================
// Tracing Integration
// ============================================================================

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Tracing subscriber honouring the embedq log configuration.

    use super::*;

    /// Create a tracing subscriber filtered at the configured level.
    ///
    /// `RUST_LOG` takes precedence when set.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let config = config();
        let level = config.level.as_str().to_lowercase();

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}

// ============================================================================
// Tests
// ============================================================================
