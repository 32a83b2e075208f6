//! Tracing subscriber setup.
//!
//! Workspace crates log at the configured level; everything else stays at
//! `warn` unless `RUST_LOG` says otherwise.

use std::fmt;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Crates whose events follow the configured level.
const WORKSPACE_CRATES: &[&str] = &[
    "mcplink",
    "mcplink_client",
    "mcplink_core",
    "mcplink_mcp",
    "mcplink_server",
    "mcplink_storage",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Case-insensitive; `warning` is accepted for `warn`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the workspace crates.
    pub level: LogLevel,
    /// Let `tower_http` request spans through at `level`.
    pub http_requests: bool,
    /// Include file and line of each event.
    pub include_location: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            http_requests: false,
            include_location: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Settings for the long-running server.
    pub fn server(level: LogLevel) -> Self {
        Self {
            level,
            http_requests: true,
            ..Self::default()
        }
    }

    /// Settings for one-shot commands.
    pub fn command(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        let mut directives = vec![LogLevel::Warn.as_str().to_string()];
        directives.extend(
            WORKSPACE_CRATES
                .iter()
                .map(|krate| format!("{krate}={}", self.level)),
        );
        if self.http_requests {
            directives.push(format!("tower_http={}", self.level));
        }
        directives.join(",")
    }
}

/// Install the global subscriber. Events go to stderr.
///
/// Call once at startup; `RUST_LOG` overrides the configured directives.
pub fn init(config: LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let layer = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.level <= LogLevel::Debug)
        .with_ansi(config.ansi)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    tracing_subscriber::registry().with(filter).with(layer).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
    }

    #[test]
    fn test_command_directives() {
        let directives = LogConfig::command(LogLevel::Debug).directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("mcplink_client=debug"));
        assert!(!directives.contains("tower_http"));
    }

    #[test]
    fn test_server_directives_include_requests() {
        let directives = LogConfig::server(LogLevel::Debug).directives();
        assert!(directives.contains("mcplink_server=debug"));
        assert!(directives.ends_with("tower_http=debug"));
    }
}
