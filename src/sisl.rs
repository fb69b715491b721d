//! Decoder for the SISL descriptor carried by a terminator frame.
//!
//! The descriptor is a small textual object of the form
//! `{name: !str "FILENAME"}`. Anything that fails to parse or validate
//! yields "no filename" rather than an error; the transfer is then
//! finalized under the sentinel name instead.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// Sentinel stored name used when the descriptor is missing or rejected.
pub const REJECTED_NAME: &str = "rejected.";

/// Longest stored filename accepted from a descriptor.
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 65;

/// Longest descriptor accepted before parsing is attempted.
pub const DEFAULT_MAX_SISL_LENGTH: usize = 1024;

lazy_static! {
    static ref FILENAME_FILTER: Regex =
        Regex::new(r"^[a-zA-Z0-9._\-]+$").expect("filename filter pattern is valid");
}

/// True when `name` contains only the characters allowed in a stored
/// filename. Shared by the sender's pre-flight check and the receiver's
/// descriptor validation.
pub fn valid_filename(name: &str) -> bool {
    FILENAME_FILTER.is_match(name)
}

#[derive(Debug, Error)]
pub enum SislError {
    #[error("descriptor is not a braced object")]
    NotAnObject,

    #[error("expected a key at offset {0}")]
    ExpectedKey(usize),

    #[error("expected a !type tag at offset {0}")]
    ExpectedTag(usize),

    #[error("expected a quoted value at offset {0}")]
    ExpectedValue(usize),

    #[error("unterminated quoted value")]
    UnterminatedValue,

    #[error("trailing characters after the closing brace")]
    TrailingGarbage,
}

/// Parse a SISL object into its key/value pairs. Type tags are checked for
/// shape but not interpreted; every value is returned as a string.
pub fn parse_sisl(text: &str) -> Result<Vec<(String, String)>, SislError> {
    let bytes = text.trim().as_bytes();
    let mut pos = 0usize;
    let mut fields = Vec::new();

    if bytes.first() != Some(&b'{') {
        return Err(SislError::NotAnObject);
    }
    pos += 1;
    skip_whitespace(bytes, &mut pos);

    if bytes.get(pos) != Some(&b'}') {
        loop {
            let key = take_key(bytes, &mut pos)?;
            skip_whitespace(bytes, &mut pos);
            if bytes.get(pos) != Some(&b':') {
                return Err(SislError::ExpectedTag(pos));
            }
            pos += 1;
            skip_whitespace(bytes, &mut pos);
            take_tag(bytes, &mut pos)?;
            skip_whitespace(bytes, &mut pos);
            let value = take_quoted(bytes, &mut pos)?;
            fields.push((key, value));

            skip_whitespace(bytes, &mut pos);
            match bytes.get(pos) {
                Some(&b',') => {
                    pos += 1;
                    skip_whitespace(bytes, &mut pos);
                }
                Some(&b'}') => break,
                _ => return Err(SislError::NotAnObject),
            }
        }
    }
    pos += 1;

    if pos != bytes.len() {
        return Err(SislError::TrailingGarbage);
    }
    Ok(fields)
}

fn skip_whitespace(bytes: &[u8], pos: &mut usize) {
    while bytes.get(*pos).is_some_and(|b| b.is_ascii_whitespace()) {
        *pos += 1;
    }
}

fn take_key(bytes: &[u8], pos: &mut usize) -> Result<String, SislError> {
    let start = *pos;
    while bytes
        .get(*pos)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
    {
        *pos += 1;
    }
    if *pos == start {
        return Err(SislError::ExpectedKey(start));
    }
    Ok(String::from_utf8_lossy(&bytes[start..*pos]).into_owned())
}

fn take_tag(bytes: &[u8], pos: &mut usize) -> Result<(), SislError> {
    if bytes.get(*pos) != Some(&b'!') {
        return Err(SislError::ExpectedTag(*pos));
    }
    *pos += 1;
    let start = *pos;
    while bytes.get(*pos).is_some_and(|b| b.is_ascii_alphanumeric()) {
        *pos += 1;
    }
    if *pos == start {
        return Err(SislError::ExpectedTag(start));
    }
    Ok(())
}

fn take_quoted(bytes: &[u8], pos: &mut usize) -> Result<String, SislError> {
    if bytes.get(*pos) != Some(&b'"') {
        return Err(SislError::ExpectedValue(*pos));
    }
    *pos += 1;
    let start = *pos;
    while let Some(&b) = bytes.get(*pos) {
        if b == b'"' {
            let value = String::from_utf8_lossy(&bytes[start..*pos]).into_owned();
            *pos += 1;
            return Ok(value);
        }
        *pos += 1;
    }
    Err(SislError::UnterminatedValue)
}

/// Extracts and validates the stored filename from a terminator payload.
#[derive(Debug, Clone, Copy)]
pub struct SislFilename {
    max_sisl_length: usize,
    max_filename_length: usize,
}

impl SislFilename {
    pub fn new(max_filename_length: usize) -> Self {
        SislFilename {
            max_sisl_length: DEFAULT_MAX_SISL_LENGTH,
            max_filename_length,
        }
    }

    pub fn with_limits(max_sisl_length: usize, max_filename_length: usize) -> Self {
        SislFilename {
            max_sisl_length,
            max_filename_length,
        }
    }

    /// Returns the filename named by the descriptor, or `None` when the
    /// descriptor is oversized, unparseable, missing the `name` key, or the
    /// value fails the character or length bounds.
    pub fn extract(&self, descriptor: &[u8]) -> Option<String> {
        if descriptor.len() > self.max_sisl_length {
            warn!(len = descriptor.len(), "descriptor too long");
            return None;
        }
        let Ok(text) = std::str::from_utf8(descriptor) else {
            warn!("descriptor is not valid UTF-8");
            return None;
        };
        let fields = match parse_sisl(text) {
            Ok(fields) => fields,
            Err(error) => {
                warn!(%error, "unable to parse descriptor");
                return None;
            }
        };
        let name = fields.into_iter().find(|(key, _)| key == "name")?.1;
        if name.len() > self.max_filename_length {
            warn!(len = name.len(), "filename too long");
            return None;
        }
        valid_filename(&name).then_some(name)
    }
}

impl Default for SislFilename {
    fn default() -> Self {
        SislFilename::new(DEFAULT_MAX_FILENAME_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_plain_filename() {
        let decoder = SislFilename::default();
        assert_eq!(
            decoder.extract(b"{name: !str \"transfer-1.bin\"}"),
            Some("transfer-1.bin".to_string())
        );
    }

    #[test]
    fn tolerates_surrounding_whitespace_and_extra_keys() {
        let decoder = SislFilename::default();
        assert_eq!(
            decoder.extract(b"  { origin: !str \"edge\" , name: !str \"a.txt\" }  "),
            Some("a.txt".to_string())
        );
    }

    #[test]
    fn garbage_yields_no_filename() {
        let decoder = SislFilename::default();
        assert_eq!(decoder.extract(b"garbage"), None);
        assert_eq!(decoder.extract(b"{name: !str \"unterminated}"), None);
        assert_eq!(decoder.extract(&[0xff, 0xfe, 0x01]), None);
    }

    #[test]
    fn missing_name_key_yields_no_filename() {
        let decoder = SislFilename::default();
        assert_eq!(decoder.extract(b"{file: !str \"a.txt\"}"), None);
        assert_eq!(decoder.extract(b"{}"), None);
    }

    #[test]
    fn disallowed_characters_are_rejected() {
        let decoder = SislFilename::default();
        assert_eq!(decoder.extract(b"{name: !str \"../etc/passwd\"}"), None);
        assert_eq!(decoder.extract(b"{name: !str \"a b.txt\"}"), None);
        assert_eq!(decoder.extract(b"{name: !str \"\"}"), None);
    }

    #[test]
    fn overlong_filename_is_rejected() {
        let decoder = SislFilename::default();
        let just_fits = "a".repeat(DEFAULT_MAX_FILENAME_LENGTH);
        let descriptor = format!("{{name: !str \"{just_fits}\"}}");
        assert_eq!(decoder.extract(descriptor.as_bytes()), Some(just_fits));

        let too_long = "a".repeat(DEFAULT_MAX_FILENAME_LENGTH + 1);
        let descriptor = format!("{{name: !str \"{too_long}\"}}");
        assert_eq!(decoder.extract(descriptor.as_bytes()), None);
    }

    #[test]
    fn overlong_descriptor_is_rejected_before_parsing() {
        let decoder = SislFilename::with_limits(16, DEFAULT_MAX_FILENAME_LENGTH);
        assert_eq!(decoder.extract(b"{name: !str \"abcdefgh.bin\"}"), None);
    }
}
