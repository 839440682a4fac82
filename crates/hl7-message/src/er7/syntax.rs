//! ER7 delimiters and the escape alphabet
//!
//! The five delimiter roles are declared by the MSH header: the field
//! separator is the fourth byte of the segment, the next four bytes are the
//! component, repetition, escape, and subcomponent separators in that order.
//! The segment terminator is fixed: `\r` on output, with `\n` and `\r\n`
//! accepted on input.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// The record terminator emitted between segments
pub const SEGMENT_TERMINATOR: u8 = b'\r';

/// The five-role delimiter set of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    /// Field separator (default `|`)
    pub field: u8,
    /// Component separator (default `^`)
    pub component: u8,
    /// Subcomponent separator (default `&`)
    pub subcomponent: u8,
    /// Repetition separator (default `~`)
    pub repetition: u8,
    /// Escape character (default `\`)
    pub escape: u8,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: b'|',
            component: b'^',
            subcomponent: b'&',
            repetition: b'~',
            escape: b'\\',
        }
    }
}

impl Delimiters {
    /// Build a delimiter set, rejecting colliding or alphanumeric characters
    pub fn new(field: u8, component: u8, subcomponent: u8, repetition: u8, escape: u8) -> Result<Self> {
        let set = Self {
            field,
            component,
            subcomponent,
            repetition,
            escape,
        };
        set.check()?;
        Ok(set)
    }

    fn check(&self) -> Result<()> {
        let all = [
            self.field,
            self.component,
            self.repetition,
            self.escape,
            self.subcomponent,
        ];
        for (i, b) in all.iter().enumerate() {
            if b.is_ascii_alphanumeric() || !b.is_ascii() || b.is_ascii_whitespace() {
                return Err(Error::InvalidEncodingChars(format!(
                    "delimiter {:?} is not a valid separator",
                    *b as char
                )));
            }
            if all[i + 1..].contains(b) {
                return Err(Error::InvalidEncodingChars(format!(
                    "duplicate delimiter {:?}",
                    *b as char
                )));
            }
        }
        Ok(())
    }

    /// Extract the delimiter set from the start of an MSH segment
    ///
    /// `data` must begin `MSH` followed by the field separator and exactly
    /// four encoding characters.
    pub fn from_msh_prefix(data: &[u8]) -> Result<Self> {
        if data.len() < 8 || &data[0..3] != b"MSH" {
            return Err(Error::InvalidEncodingChars(
                "message header shorter than MSH plus delimiters".to_string(),
            ));
        }
        let field = data[3];
        // The encoding characters run to the next field separator (or the
        // end of the segment for a delimiter-only MSH).
        let tail = &data[4..];
        let end = tail
            .iter()
            .position(|&b| b == field || b == b'\r' || b == b'\n')
            .unwrap_or(tail.len());
        let enc = &tail[..end];
        if enc.len() != 4 {
            return Err(Error::InvalidEncodingChars(format!(
                "expected 4 encoding characters, found {}",
                enc.len()
            )));
        }
        Self::new(field, enc[0], enc[3], enc[1], enc[2])
    }

    /// The MSH-2 literal for this set: component, repetition, escape,
    /// subcomponent
    pub fn encoding_chars(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .map(|&b| b as char)
            .collect()
    }

    /// Whether a byte is one of the five reserved characters
    pub fn is_reserved(&self, byte: u8) -> bool {
        byte == self.field
            || byte == self.component
            || byte == self.subcomponent
            || byte == self.repetition
            || byte == self.escape
    }

    /// Decode the escape sequences of a wire value
    ///
    /// `\F\ \S\ \T\ \R\ \E\` become the corresponding delimiter characters
    /// and `\Xhh..\` becomes the named bytes. Formatting (`\.br\`), local
    /// (`\Z..\`), and unrecognised sequences are preserved verbatim.
    pub fn decode(&self, raw: &str) -> String {
        let bytes = raw.as_bytes();
        if !bytes.contains(&self.escape) {
            return raw.to_string();
        }

        let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != self.escape {
                out.push(bytes[i]);
                i += 1;
                continue;
            }
            let Some(close) = bytes[i + 1..].iter().position(|&b| b == self.escape) else {
                // Unterminated sequence, keep the rest as-is
                out.extend_from_slice(&bytes[i..]);
                break;
            };
            let close = i + 1 + close;
            let body = &bytes[i + 1..close];
            match body {
                b"F" => out.push(self.field),
                b"S" => out.push(self.component),
                b"T" => out.push(self.subcomponent),
                b"R" => out.push(self.repetition),
                b"E" => out.push(self.escape),
                [b'X', hex @ ..] if !hex.is_empty() && hex.len() % 2 == 0 => {
                    match decode_hex(hex) {
                        Some(decoded) => out.extend_from_slice(&decoded),
                        None => out.extend_from_slice(&bytes[i..=close]),
                    }
                }
                // Formatting, local, and unknown sequences pass through
                _ => out.extend_from_slice(&bytes[i..=close]),
            }
            i = close + 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Escape a value for the wire under this delimiter set
    ///
    /// Each reserved character becomes its `\F\`-family sequence and segment
    /// terminator bytes become hex escapes. Formatting and local sequences
    /// already present in the value (`\.br\`, `\Z..\`) are emitted verbatim
    /// so that decode and encode stay exact inverses.
    pub fn encode(&self, value: &str) -> String {
        let bytes = value.as_bytes();
        if !bytes
            .iter()
            .any(|&b| self.is_reserved(b) || b == b'\r' || b == b'\n')
        {
            return value.to_string();
        }

        let mut out: Vec<u8> = Vec::with_capacity(bytes.len() + 8);
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == self.escape {
                if let Some(end) = passthrough_end(bytes, i, self.escape) {
                    out.extend_from_slice(&bytes[i..=end]);
                    i = end + 1;
                    continue;
                }
                out.extend_from_slice(&[self.escape, b'E', self.escape]);
            } else if b == self.field {
                out.extend_from_slice(&[self.escape, b'F', self.escape]);
            } else if b == self.component {
                out.extend_from_slice(&[self.escape, b'S', self.escape]);
            } else if b == self.subcomponent {
                out.extend_from_slice(&[self.escape, b'T', self.escape]);
            } else if b == self.repetition {
                out.extend_from_slice(&[self.escape, b'R', self.escape]);
            } else if b == b'\r' {
                out.extend_from_slice(&[self.escape, b'X', b'0', b'D', self.escape]);
            } else if b == b'\n' {
                out.extend_from_slice(&[self.escape, b'X', b'0', b'A', self.escape]);
            } else {
                out.push(b);
            }
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// If `bytes[start]` opens a formatting or local sequence, the index of its
/// closing escape character
fn passthrough_end(bytes: &[u8], start: usize, escape: u8) -> Option<usize> {
    let first = *bytes.get(start + 1)?;
    if first != b'.' && first != b'Z' {
        return None;
    }
    bytes[start + 2..]
        .iter()
        .position(|&b| b == escape)
        .map(|p| start + 2 + p)
}

fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    fn nibble(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'A'..=b'F' => Some(b - b'A' + 10),
            b'a'..=b'f' => Some(b - b'a' + 10),
            _ => None,
        }
    }
    hex.chunks(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}
