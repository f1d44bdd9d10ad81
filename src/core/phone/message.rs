//! SMS in text mode (`AT+CMGF=1`)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const DATETIME: &str = r"\d{2}/\d{2}/\d{2},\d{2}:\d{2}:\d{2}(?:[+-]\d{1,2})?";

// +CMGL: id,"status","number",["alpha"],"datetime"   (standard)
// +CMGL: id,"status","number","datetime",...          (abbreviated)
static LIST_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"^\+CMGL:\s*(\d+)\s*,\s*"([^"]*)"\s*,\s*"([^"]*)"\s*,(?:\s*(?:"[^"]*")?\s*,)?\s*"({DATETIME})""#
    ))
    .expect("sms list regex")
});

static READ_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"^\+CMGR:\s*"([^"]*)"\s*,\s*"([^"]*)"\s*,(?:\s*(?:"[^"]*")?\s*,)?\s*"({DATETIME})""#
    ))
    .expect("sms read regex")
});

static SEND_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+CMGS:\s*(\d+)").expect("sms reference regex"));

/// One SMS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneMessage {
    /// Storage index
    pub id: Option<u32>,
    /// Storage status (e.g. "REC UNREAD")
    pub status: Option<String>,
    /// Recipient for outgoing, sender for incoming messages
    pub recipient_or_sender: Option<String>,
    /// Service centre timestamp as sent by the handset
    pub datetime: Option<String>,
    /// Message text
    pub body: Option<String>,
}

impl PhoneMessage {
    /// Message to send
    pub fn outgoing(recipient: &str, body: &str) -> Self {
        Self {
            recipient_or_sender: Some(recipient.to_string()),
            body: Some(body.to_string()),
            ..Self::default()
        }
    }

    /// Parse an `AT+CMGL` reply. Entries whose header can't be read are
    /// skipped; their body lines are dropped with them.
    pub fn parse_list(text: &str) -> Vec<Self> {
        let mut messages = Vec::new();
        let mut current: Option<(Self, Vec<&str>)> = None;

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let trimmed = line.trim();

            if trimmed.starts_with("+CMGL:") {
                if let Some(done) = current.take() {
                    messages.push(finish(done));
                }
                current = parse_list_header(trimmed).map(|m| (m, Vec::new()));
                continue;
            }

            if trimmed == "OK" || trimmed == "ERROR" {
                break;
            }

            if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }

        if let Some(done) = current.take() {
            messages.push(finish(done));
        }
        messages
    }

    /// Parse an `AT+CMGR=<id>` reply
    pub fn parse_read(id: u32, text: &str) -> Option<Self> {
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
        let caps = lines
            .by_ref()
            .find_map(|line| READ_HEADER.captures(line.trim()))?;

        let message = Self {
            id: Some(id),
            status: Some(caps[1].to_string()),
            recipient_or_sender: Some(caps[2].to_string()),
            datetime: Some(caps[3].to_string()),
            body: None,
        };
        let body: Vec<&str> = lines
            .take_while(|l| !matches!(l.trim(), "OK" | "ERROR"))
            .collect();
        Some(finish((message, body)))
    }
}

/// Message reference from a `+CMGS: <ref>` reply
pub fn parse_send_reference(text: &str) -> Option<u32> {
    SEND_REFERENCE.captures(text)?[1].parse().ok()
}

fn parse_list_header(line: &str) -> Option<PhoneMessage> {
    let caps = LIST_HEADER.captures(line)?;
    Some(PhoneMessage {
        id: Some(caps[1].parse().ok()?),
        status: Some(caps[2].to_string()),
        recipient_or_sender: Some(caps[3].to_string()),
        datetime: Some(caps[4].to_string()),
        body: None,
    })
}

fn finish((mut message, mut body): (PhoneMessage, Vec<&str>)) -> PhoneMessage {
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    message.body = Some(body.join("\n"));
    message
}
