//! Handset records and the parsers that build them from AT replies
//!
//! Parsers are pure functions over reply text. They return `None` (or skip
//! the line) when a required field doesn't parse and never panic on
//! malformed device output.

mod alarm;
mod element;
mod message;
mod status;

pub use alarm::{normalize_year, parse_alarm_slots, AlarmError, PhoneAlarm, ALL_DAYS, WEEK_DAYS};
pub use element::{extension_for_type, sanitize_name, upload_type_for_extension, PhoneElement};
pub use message::{parse_send_reference, PhoneMessage};
pub use status::{
    parse_capabilities, parse_info_line, parse_pin_reply, parse_subscriber_numbers, DeviceInfo,
    PinStatus, SignalQuality,
};
