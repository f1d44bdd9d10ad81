//! Handset status records: PIN state, signal quality, identity

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static SIGNAL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+CSQ:\s*(\d+)\s*,\s*(\d+)").expect("signal regex"));

static PIN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+CPIN:\s*(.+)").expect("pin regex"));

// +CNUM: ["alpha"],"number",type
static NUMBER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\+CNUM:\s*(?:"[^"]*"\s*)?,\s*"([^"]+)""#).expect("subscriber regex")
});

static RESULT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[A-Z]+:\s*").expect("prefix regex"));

/// SIM lock state reported by `AT+CPIN?`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PinStatus {
    Ready,
    SimPin,
    SimPuk,
    SimPin2,
    SimPuk2,
    PhNetPin,
}

impl PinStatus {
    /// All states, in the order they are matched
    pub const ALL: [PinStatus; 6] = [
        PinStatus::Ready,
        PinStatus::SimPin,
        PinStatus::SimPuk,
        PinStatus::SimPin2,
        PinStatus::SimPuk2,
        PinStatus::PhNetPin,
    ];

    /// Device token for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            PinStatus::Ready => "READY",
            PinStatus::SimPin => "SIM PIN",
            PinStatus::SimPuk => "SIM PUK",
            PinStatus::SimPin2 => "SIM PIN2",
            PinStatus::SimPuk2 => "SIM PUK2",
            PinStatus::PhNetPin => "PH-NET PIN",
        }
    }

    /// Loose match of a free-text token. Unknown tokens give `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        let wanted = normalize_token(token);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|status| normalize_token(status.as_str()) == wanted)
    }

    /// A code has to be entered before the handset is usable
    pub fn needs_code(&self) -> bool {
        *self != PinStatus::Ready
    }
}

impl fmt::Display for PinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase and drop everything but letters and digits
fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// PIN state from an `AT+CPIN?` reply
pub fn parse_pin_reply(text: &str) -> Option<PinStatus> {
    let caps = PIN_LINE.captures(text)?;
    let token = caps[1].lines().next().unwrap_or_default();
    PinStatus::from_token(token.trim_matches(|c: char| c == '"' || c.is_whitespace()))
}

/// Received signal strength (`AT+CSQ`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalQuality {
    /// 0..=31, 99 when unknown
    pub rssi: u8,
    /// Bit error rate class 0..=7, 99 when unknown
    pub ber: u8,
}

impl SignalQuality {
    pub const UNKNOWN: u8 = 99;

    /// Parse a `+CSQ: <rssi>,<ber>` reply
    pub fn parse(text: &str) -> Option<Self> {
        let caps = SIGNAL_LINE.captures(text)?;
        Some(Self {
            rssi: caps[1].parse().ok()?,
            ber: caps[2].parse().ok()?,
        })
    }

    /// Signal strength in dBm, `None` when the handset doesn't know
    pub fn dbm(&self) -> Option<i32> {
        if self.rssi == Self::UNKNOWN {
            return None;
        }
        Some(-113 + 2 * i32::from(self.rssi.min(31)))
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dbm() {
            Some(dbm) => write!(f, "{} dBm (rssi {}, ber {})", dbm, self.rssi, self.ber),
            None => write!(f, "unknown (ber {})", self.ber),
        }
    }
}

/// Handset identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware: Option<String>,
    pub model: Option<String>,
    pub revision: Option<String>,
    pub imei: Option<String>,
    pub subscriber_numbers: Vec<String>,
}

/// First payload line of an identity reply, without echo, result prefix
/// or final status
pub fn parse_info_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("AT"))
        .take_while(|line| *line != "OK" && !line.contains("ERROR"))
        .map(|line| RESULT_PREFIX.replace(line, "").trim_matches('"').to_string())
        .find(|line| !line.is_empty())
}

/// Numbers from an `AT+CNUM` reply
pub fn parse_subscriber_numbers(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| NUMBER_LINE.captures(line.trim()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Capability lines from an `AT+KPSCAP` reply. The envelope markers, echo
/// and result prefix are stripped.
pub fn parse_capabilities(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("AT")
                && !matches!(*line, "OK" | "CONNECT" | "NO CARRIER")
        })
        .map(|line| RESULT_PREFIX.replace(line, "").to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_loose_matching() {
        assert_eq!(PinStatus::from_token("READY"), Some(PinStatus::Ready));
        assert_eq!(PinStatus::from_token("sim pin"), Some(PinStatus::SimPin));
        assert_eq!(PinStatus::from_token("SIM_PUK2"), Some(PinStatus::SimPuk2));
        assert_eq!(PinStatus::from_token("ph-net pin"), Some(PinStatus::PhNetPin));
        assert_eq!(PinStatus::from_token("SIMPIN2"), Some(PinStatus::SimPin2));
        assert_eq!(PinStatus::from_token("BLOCKED"), None);
        assert_eq!(PinStatus::from_token(""), None);
    }

    #[test]
    fn test_parse_pin_reply() {
        assert_eq!(
            parse_pin_reply("AT+CPIN?\r\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n"),
            Some(PinStatus::SimPin)
        );
        assert_eq!(parse_pin_reply("+CPIN: \"READY\"\r\nOK"), Some(PinStatus::Ready));
        assert_eq!(parse_pin_reply("\r\nERROR\r\n"), None);
    }

    #[test]
    fn test_signal_quality() {
        let quality = SignalQuality::parse("AT+CSQ\r\r\n+CSQ: 17,99\r\n\r\nOK").unwrap();
        assert_eq!(quality.rssi, 17);
        assert_eq!(quality.ber, 99);
        assert_eq!(quality.dbm(), Some(-79));

        let unknown = SignalQuality::parse("+CSQ: 99,99").unwrap();
        assert_eq!(unknown.dbm(), None);
        assert!(SignalQuality::parse("OK").is_none());
    }

    #[test]
    fn test_info_line() {
        assert_eq!(
            parse_info_line("AT+CGSN\r\r\n351234567890123\r\n\r\nOK\r\n").as_deref(),
            Some("351234567890123")
        );
        assert_eq!(
            parse_info_line("+KPSV: \"V1.2.3\"\r\nOK").as_deref(),
            Some("V1.2.3")
        );
        assert_eq!(parse_info_line("\r\nERROR\r\n"), None);
    }

    #[test]
    fn test_subscriber_numbers() {
        let reply = "+CNUM: \"Me\",\"+48600100200\",145\r\n+CNUM: ,\"600300400\",129\r\nOK";
        assert_eq!(
            parse_subscriber_numbers(reply),
            vec!["+48600100200".to_string(), "600300400".to_string()]
        );
    }

    #[test]
    fn test_capabilities() {
        let reply = "AT+KPSCAP=\"PICTURES\"\r\r\nCONNECT\r\n+KPSCAP: \"JPEG\",\"FGIF\"\r\nmax=65536\r\nNO CARRIER\r\n";
        assert_eq!(
            parse_capabilities(reply),
            vec!["\"JPEG\",\"FGIF\"".to_string(), "max=65536".to_string()]
        );
    }
}
