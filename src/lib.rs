//! # Phonelink Core Library
//!
//! Talks to a mobile handset over a serial line using the AT command set:
//! - File element listing, download, upload and deletion
//! - Alarm management
//! - SMS listing, reading, sending and deletion
//! - Dial / hangup, signal strength, PIN handling, power off
//! - Capability and device information queries
//!
//! ## Features
//!
//! - Retrying command executor that reopens the port between trials
//! - Signature based payload extraction for binary downloads
//! - Background orchestrator with a single handset lock and cancellation
//! - Virtual handset for tests and dry runs
//! - CLI with exit codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use phonelink_core::{ExchangeSettings, PhoneSession, PortConfig, SerialPortChannel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut session = PhoneSession::new(SerialPortChannel::new(), ExchangeSettings::default());
//!     session.open(PortConfig::new("/dev/ttyUSB0", 115200))?;
//!
//!     for element in session.list_elements("PICTURES")? {
//!         println!("{} {}", element.id, element.display_name);
//!     }
//!
//!     session.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::ExitCodes;
pub use crate::config::AppConfig;
pub use crate::core::at::{CommandExecutor, DialMode, ExchangeSettings, RawReply};
pub use crate::core::orchestrator::{OperationHandle, OperationReport, Orchestrator};
pub use crate::core::phone::{
    DeviceInfo, PhoneAlarm, PhoneElement, PhoneMessage, PinStatus, SignalQuality,
};
pub use crate::core::protocol::{Frame, FrameExtractor};
pub use crate::core::session::{PhoneError, PhoneSession, SessionState};
pub use crate::core::simulator::VirtualPhone;
pub use crate::core::transfer::{BatchReport, CancelToken, UploadReport, UploadStage};
pub use crate::core::transport::{
    PortConfig, SerialChannel, SerialFlowControl, SerialParity, SerialPortChannel,
    SerialStopBits, TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
