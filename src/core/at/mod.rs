//! AT command layer
//!
//! - [`commands`]: command line builders
//! - [`ResponseReader`]: drains the channel until a reply is complete
//! - [`CommandExecutor`]: one command per call, with settle delay and retry

pub mod commands;
mod executor;
mod reader;

pub use commands::DialMode;
pub use executor::{CommandExecutor, ExchangeSettings};
pub use reader::{latin1_to_string, string_to_latin1, RawReply, ResponseReader};
