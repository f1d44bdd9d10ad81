//! Binary payload extraction
//!
//! A retrieval reply looks like
//!
//! ```text
//! AT+KPSR="0011"\r\r\nCONNECT\r\n<binary payload>\r\nNO CARRIER\r\n
//! ```
//!
//! The envelope markers may legally occur inside the payload, so the start
//! is located by searching for a known file signature. Signatures are tried
//! in table order and the first one found wins, which is why short and
//! generic markers sit at the end. Two-byte markers that also occur inside
//! ordinary headers are anchored: they only count at the first payload
//! byte. The payload always ends at the last `\r\nNO CARRIER`.

use once_cell::sync::Lazy;

/// Marker in front of the payload
pub const ENVELOPE_START: &[u8] = b"CONNECT";
/// Marker behind the payload
pub const ENVELOPE_END: &[u8] = b"\r\nNO CARRIER";

/// A file signature
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    /// Format name reported with the frame
    pub name: &'static str,
    /// Bytes to look for
    pub magic: &'static [u8],
    /// Optional per-byte mask applied to the buffer before comparing
    pub mask: Option<&'static [u8]>,
    /// Payload start relative to the match
    pub offset: isize,
    /// Only match at the first payload byte
    pub anchored: bool,
}

impl Signature {
    const fn new(name: &'static str, magic: &'static [u8]) -> Self {
        Self {
            name,
            magic,
            mask: None,
            offset: 0,
            anchored: false,
        }
    }

    const fn anchored(mut self) -> Self {
        self.anchored = true;
        self
    }

    const fn at(mut self, offset: isize) -> Self {
        self.offset = offset;
        self
    }

    const fn masked(mut self, mask: &'static [u8]) -> Self {
        self.mask = Some(mask);
        self
    }

    fn matches_at(&self, haystack: &[u8], pos: usize) -> bool {
        let Some(window) = haystack.get(pos..pos + self.magic.len()) else {
            return false;
        };
        match self.mask {
            Some(mask) => window
                .iter()
                .zip(mask)
                .zip(self.magic)
                .all(|((b, m), want)| b & m == *want),
            None => window == self.magic,
        }
    }

    fn find_from(&self, haystack: &[u8], from: usize) -> Option<usize> {
        if self.magic.is_empty() || haystack.len() < self.magic.len() {
            return None;
        }
        if self.anchored {
            return self.matches_at(haystack, from).then_some(from);
        }
        (from..=haystack.len() - self.magic.len()).find(|&pos| self.matches_at(haystack, pos))
    }
}

const JPEG: &str = "jpeg";

/// Ordered signature table. WBMP's one-byte marker must stay last.
pub static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        Signature::new(JPEG, &[0xFF, 0xD8]),
        Signature::new("midi", b"MThd"),
        Signature::new("amr", b"#!AMR"),
        Signature::new("wav", b"RIFF"),
        Signature::new("gif", b"GIF8"),
        Signature::new("png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        Signature::new("mng", &[0x8A, b'M', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        Signature::new("aiff", b"FORM"),
        Signature::new("imelody", b"BEGIN:IMELODY"),
        Signature::new("mp4", b"ftyp").at(-4),
        Signature::new("gzip", &[0x1F, 0x8B]),
        Signature::new("zip", b"PK\x03\x04"),
        Signature::new("mp3", &[0xFF, 0xFB]),
        Signature::new("mp3", &[0xFF, 0xF3]),
        Signature::new("mp3", &[0xFF, 0xF2]),
        Signature::new("wmv", &[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11]),
        Signature::new("xml", b"<?xml"),
        Signature::new("xml", b"<!DOCTYPE"),
        Signature::new("svg", b"<svg"),
        Signature::new("wmf", &[0xD7, 0xCD, 0xC6, 0x9A]),
        Signature::new("ps", b"%!PS"),
        Signature::new("tiff", b"II*\x00"),
        Signature::new("jad", b"MIDlet-"),
        Signature::new("cgm", b"BEGMF"),
        Signature::new("cgm", &[0x00, 0x20])
            .masked(&[0xFF, 0xE0])
            .anchored(),
        Signature::new("cgm", &[0x30, 0x20]).anchored(),
        Signature::new("vcs", b"BEGIN:VCALENDAR"),
        Signature::new("vcf", b"BEGIN:VCARD"),
        Signature::new("bmp", b"BM").anchored(),
        // Marker plus four header bytes, so the image starts at match + 5
        Signature::new("wbmp", &[0x24]).at(5),
    ]
});

/// Payload located in a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Format of the matched signature, `"raw"` for the envelope fallback
    pub format: &'static str,
    /// Payload bytes
    pub payload: &'a [u8],
}

/// Locates payloads in retrieval replies
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameExtractor;

impl FrameExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Slice the payload out of `reply`. `None` when no end marker, no
    /// signature and no envelope start can be found.
    pub fn extract<'a>(&self, reply: &'a [u8]) -> Option<Frame<'a>> {
        let end = rfind(reply, ENVELOPE_END)?;
        let envelope = find(&reply[..end], ENVELOPE_START).map(|pos| skip_line_end(reply, pos));
        let scan_start = envelope.unwrap_or(0);
        let body = &reply[..end];

        for signature in SIGNATURES.iter() {
            let Some(found) = signature.find_from(body, scan_start) else {
                continue;
            };

            let found = if signature.name == JPEG {
                second_jpeg_start(body, found).unwrap_or(found)
            } else {
                found
            };

            let Some(start) = found.checked_add_signed(signature.offset) else {
                continue;
            };
            if start < scan_start || start > end {
                continue;
            }

            tracing::trace!("Payload {} at {}..{}", signature.name, start, end);
            return Some(Frame {
                format: signature.name,
                payload: &reply[start..end],
            });
        }

        envelope.map(|start| Frame {
            format: "raw",
            payload: &reply[start..end],
        })
    }
}

/// Some handsets wrap a JPEG twice; the inner image starts at the second
/// SOI when that one is followed by another marker byte.
fn second_jpeg_start(body: &[u8], first: usize) -> Option<usize> {
    let soi = &SIGNATURES[0];
    let second = soi.find_from(body, first + soi.magic.len())?;
    (body.get(second + soi.magic.len()) == Some(&0xFF)).then_some(second)
}

fn skip_line_end(reply: &[u8], marker: usize) -> usize {
    let after = marker + ENVELOPE_START.len();
    if reply[after..].starts_with(b"\r\n") {
        after + 2
    } else {
        after
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
