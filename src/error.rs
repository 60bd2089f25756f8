//! Error types for chat-probe
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Connection errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    ConnectionRefused = 302,
    ConnectionLost = 303,

    // Protocol errors (4xx)
    InvalidUrl = 400,
    HandshakeRejected = 401,
    ProtocolViolation = 402,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10,
            200..=299 => 20,
            300..=399 => 30,
            400..=499 => 40,
            900..=999 => 90,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the probe
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────

    /// Handshake did not complete in time
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// WebSocket transport error on an open connection
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────

    /// URL is not a usable WebSocket URL
    #[error("Invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Server answered the upgrade with a non-101 status
    #[error("Server rejected the WebSocket handshake with HTTP {status}")]
    HandshakeRejected { status: u16 },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::WebSocket(e) => match e {
                WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                    ErrorCode::ConnectionRefused
                }
                WsError::Protocol(_) | WsError::Capacity(_) | WsError::Utf8 => {
                    ErrorCode::ProtocolViolation
                }
                WsError::ConnectionClosed | WsError::AlreadyClosed => ErrorCode::ConnectionLost,
                _ => ErrorCode::ConnectionFailed,
            },

            Error::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Error::HandshakeRejected { .. } => ErrorCode::HandshakeRejected,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is transient (the same attempt could succeed later)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionRefused
                | ErrorCode::ConnectionLost
        )
    }

    /// Check if the error is caused by the user's input rather than the network
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Config(_)
                | Error::InvalidUrl { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self.code() {
            ErrorCode::ConfigNotFound => Some(
                "Run 'chat-probe config init' to create a default configuration file.",
            ),
            ErrorCode::ConfigParseError => Some(
                "Check your configuration file syntax. Run 'chat-probe config validate' to see details.",
            ),
            ErrorCode::ConfigValidation => Some(
                "Review the configuration file and fix the invalid values.",
            ),
            ErrorCode::ConnectionRefused => Some(
                "Nothing is listening at that address. Is the chat server running?",
            ),
            ErrorCode::ConnectionFailed => Some(
                "Check your network connection and verify the server URL is correct.",
            ),
            ErrorCode::ConnectionTimeout => Some(
                "The server may be down or unreachable. Raise 'connect_timeout_ms' or check your firewall.",
            ),
            ErrorCode::InvalidUrl => Some(
                "Use a URL of the form ws://host:port/path or wss://host:port/path.",
            ),
            ErrorCode::HandshakeRejected => Some(
                "The server is reachable but the path does not accept WebSocket upgrades.",
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            self.code().as_str(),
            self
        );

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn connection_timeout(url: impl Into<String>, timeout_ms: u64) -> Self {
        Error::ConnectionTimeout {
            url: url.into(),
            timeout_ms,
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
