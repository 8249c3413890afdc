//! Error types and process exit statuses.
//!
//! Exit statuses follow the sysexits convention. HTTP 4xx responses map to
//! `status - 390`, so a 404 exits with 14 and a 409 with 19.
use thiserror::Error;

/// Exit status codes
pub mod exit_code {
    /// Incorrect command, option, DSN or unparseable configuration.
    pub const USAGE: i32 = 2;
    /// The server answered with a status above 500 (usually a proxy).
    pub const UNKNOWN: i32 = 3;
    /// The server answered 500.
    pub const INTERNAL_SERVER_ERROR: i32 = 4;
    /// Malformed input data, such as invalid JSON.
    pub const DATA: i32 = 65;
    /// An input file does not exist or cannot be read.
    pub const NO_INPUT: i32 = 66;
    /// The server could not be reached.
    pub const UNAVAILABLE: i32 = 69;
    /// I/O error writing output.
    pub const IO: i32 = 74;
    /// The server returned something other than the expected JSON.
    pub const PROTOCOL: i32 = 76;
}

/// Result alias used throughout the crate
pub type CliResult<T> = Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("{reason}")]
    Http { status: u16, reason: String },

    #[error("server unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("invalid server response: {0}")]
    Protocol(String),

    #[error("invalid input data: {0}")]
    Data(#[from] serde_json::Error),

    #[error("cannot read input {path}: {source}")]
    NoInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        CliError::Usage(message.into())
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, CliError::Usage(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => exit_code::USAGE,
            CliError::Http { status, .. } => from_http_status(*status),
            CliError::Unavailable(_) => exit_code::UNAVAILABLE,
            CliError::Protocol(_) => exit_code::PROTOCOL,
            CliError::Data(_) => exit_code::DATA,
            CliError::NoInput { .. } => exit_code::NO_INPUT,
            CliError::Io(_) => exit_code::IO,
        }
    }
}

fn from_http_status(status: u16) -> i32 {
    match status {
        500 => exit_code::INTERNAL_SERVER_ERROR,
        400..=499 => i32::from(status) - 390,
        _ => exit_code::UNKNOWN,
    }
}
