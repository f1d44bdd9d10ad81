//! AT command builders
//!
//! Commands are returned without the trailing carriage return; the executor
//! appends it on the wire.

use serde::{Deserialize, Serialize};

/// Alive test
pub const ATTENTION: &str = "AT";
/// Switch the character set to ISO-8859-1
pub const CHARSET_LATIN1: &str = "AT+CSCS=\"8859-1\"";
/// Reset the object transfer state
pub const TRANSFER_RESET: &str = "AT+KDOBJ=1,0";
/// Start an object transfer
pub const TRANSFER_INIT: &str = "AT+KDOBJ=1,1";
/// Close an object transfer
pub const TRANSFER_CLOSE: &str = "AT+KDOBJ=1,0";
/// Firmware version
pub const FIRMWARE_VERSION: &str = "AT+KPSV";
/// Device type
pub const DEVICE_TYPE: &str = "ATIMEI";
/// Extra type / revision
pub const REVISION: &str = "AT+CGMR";
/// Serial number (IMEI)
pub const SERIAL_NUMBER: &str = "AT+CGSN";
/// Subscriber numbers
pub const SUBSCRIBER_NUMBERS: &str = "AT+CNUM";
/// Switch the handset off
pub const POWER_OFF: &str = "AT*PSCPOF";
/// PIN state query
pub const PIN_QUERY: &str = "AT+CPIN?";
/// Supported alarm parameters
pub const ALARM_TEST: &str = "AT+CALA=?";
/// Read all alarms
pub const ALARM_LIST: &str = "AT+CALA?";
/// SMS text mode
pub const SMS_TEXT_MODE: &str = "AT+CMGF=1";
/// List every stored SMS
pub const SMS_LIST: &str = "AT+CMGL=\"ALL\"";
/// Signal quality
pub const SIGNAL_QUALITY: &str = "AT+CSQ";
/// Hang up
pub const HANGUP: &str = "ATH";

/// Ctrl-Z, ends an SMS body
pub const CTRL_Z: u8 = 0x1A;
/// Prompt the handset shows before an SMS body
pub const SMS_PROMPT: &str = ">";
/// Handshake marker before raw transfer data
pub const CONNECT: &str = "CONNECT";

/// Dialing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialMode {
    /// Let the handset decide (ATD)
    #[default]
    Default,
    /// Tone dialing (ATDT)
    Tone,
    /// Pulse dialing (ATDP)
    Pulse,
}

/// List the elements of one category
pub fn list_elements(category: &str) -> String {
    format!("AT+KPSL=\"{category}\",1")
}

/// Retrieve one element
pub fn retrieve_element(id: &str) -> String {
    format!("AT+KPSR=\"{id}\"")
}

/// Delete one element
pub fn delete_element(id: &str) -> String {
    format!("AT+KPSD=\"{id}\"")
}

/// Announce the length of the object name
pub fn transfer_name_length(len: usize) -> String {
    format!("AT+KDOBJ=2,1,3,0,{len}")
}

/// Announce the object type and content length
pub fn transfer_content_header(object_type: &str, len: u64) -> String {
    format!("AT+KDOBJ=2,1,0,{object_type},{len}")
}

/// Capabilities of one element type
pub fn capabilities(element_type: &str) -> String {
    format!("AT+KPSCAP=\"{element_type}\"")
}

/// Enter a PIN, optionally replacing it (PUK flow)
pub fn enter_pin(pin: &str, new_pin: Option<&str>) -> String {
    match new_pin {
        Some(new_pin) => format!("AT+CPIN={pin},{new_pin}"),
        None => format!("AT+CPIN={pin}"),
    }
}

/// Set an alarm from its wire form
pub fn set_alarm(spec: &str) -> String {
    format!("AT+CALA={spec}")
}

/// Delete alarm `n`
pub fn delete_alarm(n: u32) -> String {
    format!("AT+CALD={n}")
}

/// Read SMS `n`
pub fn read_message(n: u32) -> String {
    format!("AT+CMGR={n}")
}

/// Start sending an SMS to `number`
pub fn send_message(number: &str) -> String {
    format!("AT+CMGS=\"{number}\"")
}

/// Delete SMS `n`
pub fn delete_message(n: u32) -> String {
    format!("AT+CMGD={n}")
}

/// Dial `number`; voice calls end with `;`
pub fn dial(number: &str, voice: bool, mode: DialMode) -> String {
    let prefix = match mode {
        DialMode::Default => "ATD",
        DialMode::Tone => "ATDT",
        DialMode::Pulse => "ATDP",
    };
    if voice {
        format!("{prefix}{number};")
    } else {
        format!("{prefix}{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_commands() {
        assert_eq!(list_elements("PICTURES"), "AT+KPSL=\"PICTURES\",1");
        assert_eq!(retrieve_element("0012"), "AT+KPSR=\"0012\"");
        assert_eq!(delete_element("0012"), "AT+KPSD=\"0012\"");
    }

    #[test]
    fn test_transfer_commands() {
        assert_eq!(transfer_name_length(9), "AT+KDOBJ=2,1,3,0,9");
        assert_eq!(transfer_content_header("JPEG", 2048), "AT+KDOBJ=2,1,0,JPEG,2048");
    }

    #[test]
    fn test_dial() {
        assert_eq!(dial("123", true, DialMode::Default), "ATD123;");
        assert_eq!(dial("123", false, DialMode::Tone), "ATDT123");
        assert_eq!(dial("123", true, DialMode::Pulse), "ATDP123;");
    }

    #[test]
    fn test_pin() {
        assert_eq!(enter_pin("1234", None), "AT+CPIN=1234");
        assert_eq!(enter_pin("12345678", Some("0000")), "AT+CPIN=12345678,0000");
    }
}
