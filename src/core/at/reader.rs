//! Reply accumulation
//!
//! [`ResponseReader`] drains a [`SerialChannel`] until the reply looks
//! complete or the line stays silent for the read timeout.

use crate::core::transport::SerialChannel;
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

/// Longest built-in marker, used as the overlap window for split markers
const MARKER_OVERLAP: usize = 16;

/// Markers that end a reply wherever they appear
const CONTAINED_TERMINATORS: &[&str] = &["NO CARRIER", "+CME ERROR", "+CMS ERROR"];

/// Decode ISO-8859-1 bytes. Never fails, so binary payloads survive.
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Encode text as ISO-8859-1, replacing characters outside the set with `?`
pub fn string_to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Bytes received for one command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawReply {
    bytes: Bytes,
}

impl RawReply {
    /// Wrap received bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Text decoding of the reply
    pub fn text(&self) -> String {
        latin1_to_string(&self.bytes)
    }

    /// Nothing but whitespace arrived
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }

    /// Substring test on the decoded text
    pub fn contains(&self, marker: &str) -> bool {
        self.text().contains(marker)
    }

    /// The handset acknowledged with `OK`
    pub fn is_ok(&self) -> bool {
        self.contains("OK")
    }

    /// The handset answered `ERROR` (including `+CME ERROR` / `+CMS ERROR`)
    pub fn is_error(&self) -> bool {
        self.contains("ERROR")
    }

    /// Number of bytes received
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// No bytes received at all
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reads one reply from a channel
pub struct ResponseReader<'a, C: SerialChannel + ?Sized> {
    channel: &'a mut C,
    timeout: Duration,
    terminators: &'a [&'a str],
}

impl<'a, C: SerialChannel + ?Sized> ResponseReader<'a, C> {
    /// Create a reader. `terminators` are caller-supplied extra markers such
    /// as the SMS prompt or `CONNECT`.
    pub fn new(channel: &'a mut C, timeout: Duration, terminators: &'a [&'a str]) -> Self {
        Self {
            channel,
            timeout,
            terminators,
        }
    }

    /// Accumulate bytes until a terminator shows up or the line is idle for
    /// the whole timeout. Silence is not an error: the returned reply may be
    /// empty.
    pub fn read(self) -> RawReply {
        let mut acc = BytesMut::new();
        let mut buf = vec![0u8; 4096];
        let mut idle_deadline = Instant::now() + self.timeout;

        loop {
            let available = match self.channel.bytes_available() {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("Channel poll failed: {}", e);
                    break;
                }
            };

            if available == 0 {
                let now = Instant::now();
                if now >= idle_deadline {
                    break;
                }
                // A false return is either a timeout or a spurious wakeup;
                // the deadline check above tells them apart.
                self.channel.wait_for_data(idle_deadline - now);
                continue;
            }

            let want = available.min(buf.len());
            let n = match self.channel.read(&mut buf[..want]) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("Channel read failed: {}", e);
                    break;
                }
            };
            if n == 0 {
                continue;
            }

            let chunk_start = acc.len();
            acc.extend_from_slice(&buf[..n]);
            idle_deadline = Instant::now() + self.timeout;

            if is_terminated(&acc, chunk_start, self.terminators) {
                break;
            }
        }

        tracing::trace!("Reply {} bytes: {}", acc.len(), hex_prefix(&acc));
        RawReply::new(acc.freeze())
    }
}

/// First match wins: the new chunk starts or ends with `OK`/`ERROR`, or the
/// new chunk (plus a short overlap with the previous one) contains
/// `NO CARRIER` or an extra terminator.
fn is_terminated(acc: &[u8], chunk_start: usize, extra: &[&str]) -> bool {
    let chunk = latin1_to_string(&acc[chunk_start..]);
    let chunk = chunk.trim();
    if chunk.starts_with("OK")
        || chunk.ends_with("OK")
        || chunk.starts_with("ERROR")
        || chunk.ends_with("ERROR")
    {
        return true;
    }

    let overlap = extra
        .iter()
        .map(|t| t.len())
        .max()
        .unwrap_or(0)
        .max(MARKER_OVERLAP);
    let window = latin1_to_string(&acc[chunk_start.saturating_sub(overlap)..]);
    CONTAINED_TERMINATORS
        .iter()
        .chain(extra.iter())
        .any(|marker| !marker.is_empty() && window.contains(marker))
}

fn hex_prefix(bytes: &[u8]) -> String {
    let end = bytes.len().min(32);
    hex::encode(&bytes[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::VirtualPhone;
    use crate::core::transport::{PortConfig, SerialChannel};

    fn open_phone() -> VirtualPhone {
        let mut phone = VirtualPhone::new();
        phone.open(&PortConfig::new("virtual", 115_200)).unwrap();
        phone
    }

    #[test]
    fn test_terminates_on_ok() {
        assert!(is_terminated(b"AT\r\r\nOK\r\n", 0, &[]));
        assert!(is_terminated(b"OK\r\n+CSQ: 1,2", 0, &[]));
        assert!(is_terminated(b"\r\nERROR\r\n", 0, &[]));
        assert!(!is_terminated(b"+CSQ: 15,99\r\n", 0, &[]));
    }

    #[test]
    fn test_terminates_on_split_marker() {
        let acc = b"\xff\xd8 payload \r\nNO CAR";
        assert!(!is_terminated(acc, 0, &[]));
        let mut acc = acc.to_vec();
        let start = acc.len();
        acc.extend_from_slice(b"RIER\r\n");
        assert!(is_terminated(&acc, start, &[]));
    }

    #[test]
    fn test_extra_terminator() {
        assert!(is_terminated(b"\r\n> ", 0, &[">"]));
        assert!(!is_terminated(b"\r\n> ", 0, &[]));
        assert!(is_terminated(b"\r\nCONNECT\r\n", 0, &["CONNECT"]));
    }

    #[test]
    fn test_reads_until_ok() {
        let mut phone = open_phone();
        phone.push_incoming(b"+CSQ: 17,99\r\n");
        phone.push_incoming(b"\r\nOK\r\n");
        phone.push_incoming(b"late bytes");

        let reply = ResponseReader::new(&mut phone, Duration::from_millis(20), &[]).read();
        assert_eq!(reply.text(), "+CSQ: 17,99\r\n\r\nOK\r\n");
        assert!(reply.is_ok());
    }

    #[test]
    fn test_silence_returns_empty() {
        let mut phone = open_phone();
        let reply = ResponseReader::new(&mut phone, Duration::from_millis(10), &[]).read();
        assert!(reply.is_empty());
        assert!(reply.is_blank());
    }

    #[test]
    fn test_latin1_roundtrip_is_lossless_for_bytes() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(string_to_latin1(&latin1_to_string(&bytes)), bytes);
        assert_eq!(string_to_latin1("Zażółć"), b"Za?\xf3??".to_vec());
    }
}
