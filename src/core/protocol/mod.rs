//! Wire payload handling
//!
//! - [`FrameExtractor`]: locate binary payloads inside `CONNECT` / `NO CARRIER` envelopes

pub mod frame;

pub use frame::{Frame, FrameExtractor, Signature, ENVELOPE_END, ENVELOPE_START, SIGNATURES};
