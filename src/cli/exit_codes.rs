//! CLI Exit Codes
//!
//! Process exit codes for the `phonelink` binary. Phone error codes are
//! negative and don't fit an exit status, so each one is folded into one of
//! the classes below.

use crate::core::session::PhoneError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Port could not be opened
    pub const CONNECTION_FAILED: u8 = 3;

    /// Phone did not answer
    pub const TIMEOUT: u8 = 4;

    /// File not found or unreadable
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Phone rejected a command or sent something unparseable
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Upload or download failed
    pub const TRANSFER_FAILED: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Exit code for a phone error code
    pub fn from_phone_code(code: i32) -> u8 {
        match code {
            0 => Self::SUCCESS,
            -7..=-1 | -10 | -11 => Self::TRANSFER_FAILED,
            -8 => Self::TIMEOUT,
            -9 | -20 => Self::PROTOCOL_ERROR,
            -12 | -13 | -16 => Self::FILE_NOT_FOUND,
            -14 | -15 => Self::INVALID_ARGS,
            -17 | -18 => Self::CONNECTION_FAILED,
            -19 => Self::CANCELLED,
            _ => Self::ERROR,
        }
    }
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success carrying a message for the user
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit exit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&PhoneError> for CliResult {
    fn from(err: &PhoneError) -> Self {
        let code = match err {
            PhoneError::Port(TransportError::PortNotFound(_)) => ExitCodes::PORT_NOT_FOUND,
            PhoneError::Port(TransportError::InvalidConfiguration(_)) => ExitCodes::CONFIG_ERROR,
            other => ExitCodes::from_phone_code(other.code()),
        };
        Self::Error(code, err.to_string())
    }
}

impl From<PhoneError> for CliResult {
    fn from(err: PhoneError) -> Self {
        Self::from(&err)
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "No answer from the phone",
        6 => "File not found",
        8 => "Configuration error",
        9 => "Protocol error",
        10 => "Transfer failed",
        11 => "Operation cancelled",
        14 => "Port not found",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 6, 8, 9, 10, 11, 14, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
