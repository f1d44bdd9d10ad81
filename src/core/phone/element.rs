//! Stored handset objects (pictures, ringtones, contacts, ...)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handset format tag → file extension. Tags missing here fall back to
/// their lowercased form.
static ELEMENT_EXTENSIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("FGIF", "gif"),
        ("GIF", "gif"),
        ("JPEG", "jpg"),
        ("JPG", "jpg"),
        ("FPNG", "png"),
        ("PNG", "png"),
        ("BMP", "bmp"),
        ("FBMP", "bmp"),
        ("WBMP", "wbmp"),
        ("MNG", "mng"),
        ("SVG", "svg"),
        ("WMF", "wmf"),
        ("TIFF", "tif"),
        ("CGM", "cgm"),
        ("MIDI", "mid"),
        ("SMID", "mid"),
        ("AMR", "amr"),
        ("WAV", "wav"),
        ("AIFF", "aif"),
        ("IMY", "imy"),
        ("EMEL", "emy"),
        ("MP3", "mp3"),
        ("AAC", "aac"),
        ("MP4", "mp4"),
        ("3GP", "3gp"),
        ("WMV", "wmv"),
        ("VCRD", "vcf"),
        ("VCAL", "vcs"),
        ("JAVA", "jar"),
        ("JAD", "jad"),
        ("ZIP", "zip"),
        ("GZIP", "gz"),
        ("XML", "xml"),
        ("PS", "ps"),
        ("TEXT", "txt"),
    ])
});

/// File extension → type tag announced in the upload handshake
const UPLOAD_TYPES: &[(&str, &str)] = &[
    ("gif", "GIF"),
    ("jpg", "JPEG"),
    ("jpeg", "JPEG"),
    ("png", "PNG"),
    ("bmp", "BMP"),
    ("wbmp", "WBMP"),
    ("mid", "MIDI"),
    ("midi", "MIDI"),
    ("amr", "AMR"),
    ("wav", "WAV"),
    ("imy", "IMY"),
    ("mp3", "MP3"),
    ("aac", "AAC"),
    ("3gp", "3GP"),
    ("mp4", "MP4"),
    ("vcf", "VCRD"),
    ("vcs", "VCAL"),
    ("jar", "JAVA"),
    ("jad", "JAD"),
    ("txt", "TEXT"),
];

// ID,hiddenFlag,length,"CATEGORY","CONTENT",location,flag,"NAME"
static LISTING_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:\+KPSL:\s*)?"?([^",\s]+)"?\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*"([^"]*)"\s*,\s*"([^"]*)"\s*,\s*(-?\d+)\s*,\s*(-?\d+)\s*,\s*"([^"]*)""#,
    )
    .expect("listing regex")
});

/// File extension for a handset format tag
pub fn extension_for_type(element_type: &str) -> String {
    let tag = element_type.trim().to_uppercase();
    ELEMENT_EXTENSIONS
        .get(tag.as_str())
        .map_or_else(|| tag.to_lowercase(), |ext| (*ext).to_string())
}

/// Upload type tag for a file extension, `None` when the handset can't take it
pub fn upload_type_for_extension(extension: &str) -> Option<&'static str> {
    let extension = extension.to_lowercase();
    UPLOAD_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, tag)| *tag)
}

/// Replace everything outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One object stored on the handset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneElement {
    /// Handset object id
    pub id: String,
    /// Handset format tag (e.g. "JPEG", "VCRD")
    pub element_type: String,
    /// Filesystem-safe name
    pub display_name: String,
}

impl PhoneElement {
    /// Create an element; the display name is sanitized, and an empty name
    /// falls back to the id.
    pub fn new(id: &str, element_type: &str, name: &str) -> Self {
        let source = if name.trim().is_empty() { id } else { name.trim() };
        Self {
            id: id.to_string(),
            element_type: element_type.to_string(),
            display_name: sanitize_name(source),
        }
    }

    /// File extension derived from the format tag
    pub fn extension(&self) -> String {
        extension_for_type(&self.element_type)
    }

    /// Suggested local file name
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.display_name, self.extension())
    }

    /// Parse one listing line. Returns the element and whether it is hidden.
    pub fn parse_line(line: &str) -> Option<(Self, bool)> {
        let caps = LISTING_LINE.captures(line.trim())?;
        let hidden = &caps[2] != "0";
        Some((Self::new(&caps[1], &caps[5], &caps[8]), hidden))
    }

    /// Parse a full listing reply, keeping only visible elements
    pub fn parse_listing(text: &str) -> Vec<Self> {
        text.lines()
            .filter_map(Self::parse_line)
            .filter(|(_, hidden)| !hidden)
            .map(|(element, _)| element)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup() {
        assert_eq!(extension_for_type("FGIF"), "gif");
        assert_eq!(extension_for_type("jpeg"), "jpg");
        assert_eq!(extension_for_type("VCRD"), "vcf");
        assert_eq!(extension_for_type("XYZW"), "xyzw");
    }

    #[test]
    fn test_upload_types() {
        assert_eq!(upload_type_for_extension("JPG"), Some("JPEG"));
        assert_eq!(upload_type_for_extension("mid"), Some("MIDI"));
        assert_eq!(upload_type_for_extension("exe"), None);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_name("My Pic/ü.1"), "My_Pic___1");
        assert_eq!(sanitize_name("ring-tone_2"), "ring-tone_2");
    }

    #[test]
    fn test_hidden_elements_filtered() {
        let listing = "AT+KPSL=\"PICTURES\",1\r\r\n\
            +KPSL: 0010,1,2048,\"PICTURES\",\"JPEG\",-1,0,\"system\"\r\n\
            +KPSL: 0011,0,1024,\"PICTURES\",\"FGIF\",1,0,\"Holiday pic\"\r\n\
            \r\nOK\r\n";
        let elements = PhoneElement::parse_listing(listing);
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].id, "0011");
        assert_eq!(elements[0].element_type, "FGIF");
        assert_eq!(elements[0].display_name, "Holiday_pic");
        assert_eq!(elements[0].file_name(), "Holiday_pic.gif");
    }

    #[test]
    fn test_quoted_id_and_empty_name() {
        let (element, hidden) =
            PhoneElement::parse_line("\"A1\",0,10,\"SOUNDS\",\"MIDI\",2,1,\"\"").unwrap();
        assert!(!hidden);
        assert_eq!(element.id, "A1");
        assert_eq!(element.file_name(), "A1.mid");
    }

    #[test]
    fn test_malformed_line() {
        assert!(PhoneElement::parse_line("OK").is_none());
        assert!(PhoneElement::parse_line("0011,0,abc,\"P\",\"JPEG\",1,0,\"x\"").is_none());
    }
}
