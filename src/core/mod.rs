//! Core module containing the handset protocol engine
//!
//! This module provides:
//! - Transport layer over a serial channel (real driver or virtual phone)
//! - AT command execution with retry and port reopen
//! - Binary payload extraction from retrieval replies
//! - Reply parsers for elements, alarms, messages and status queries
//! - The phone session façade and its error code space
//! - Upload handshake and batch download helpers
//! - A background orchestrator serializing access to the handset

pub mod at;
pub mod orchestrator;
pub mod phone;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod transfer;
pub mod transport;
