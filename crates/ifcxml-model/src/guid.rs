// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Globally unique identifiers tagging ifcXML entities
//!
//! Accepts the textual UUID forms and the 22 character compressed encoding
//! IFC uses for `GlobalId`. Both decode to the same 128 bit value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// IFC compressed GUID alphabet (base 64, non-standard ordering)
const IFC_ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_$";

const COMPRESSED_LEN: usize = 22;

/// Entity GUID
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Guid(pub Uuid);

/// Error returned for text that is not a GUID
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid GUID: {0:?}")]
pub struct InvalidGuid(pub String);

impl Guid {
    /// Parse a GUID from text
    ///
    /// Surrounding whitespace is ignored. Returns `None` when the value is
    /// neither a UUID nor a compressed IFC GUID.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.len() == COMPRESSED_LEN {
            if let Some(guid) = decode_compressed(text.as_bytes()) {
                return Some(guid);
            }
        }
        Uuid::parse_str(text).ok().map(Guid)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Encode as the 22 character IFC representation
    pub fn to_compressed(&self) -> String {
        let bytes = self.0.as_bytes();
        let mut out = String::with_capacity(COMPRESSED_LEN);
        push_chars(&mut out, bytes[0] as u32, 2);
        for chunk in bytes[1..].chunks(3) {
            let n = (chunk[0] as u32) << 16 | (chunk[1] as u32) << 8 | chunk[2] as u32;
            push_chars(&mut out, n, 4);
        }
        out
    }
}

fn push_chars(out: &mut String, mut value: u32, width: usize) {
    let mut buf = [0u8; 4];
    for slot in buf[..width].iter_mut().rev() {
        *slot = IFC_ALPHABET[(value % 64) as usize];
        value /= 64;
    }
    for &b in &buf[..width] {
        out.push(b as char);
    }
}

fn digit(b: u8) -> Option<u32> {
    IFC_ALPHABET.iter().position(|&c| c == b).map(|p| p as u32)
}

fn decode_chunk(chars: &[u8]) -> Option<u32> {
    chars
        .iter()
        .try_fold(0u32, |acc, &c| digit(c).map(|d| acc * 64 + d))
}

fn decode_compressed(text: &[u8]) -> Option<Guid> {
    let mut bytes = [0u8; 16];
    let head = decode_chunk(&text[..2])?;
    if head > 0xFF {
        return None;
    }
    bytes[0] = head as u8;
    for (i, chunk) in text[2..].chunks(4).enumerate() {
        let n = decode_chunk(chunk)?;
        let at = 1 + i * 3;
        bytes[at] = (n >> 16) as u8;
        bytes[at + 1] = (n >> 8) as u8;
        bytes[at + 2] = n as u8;
    }
    Some(Guid(Uuid::from_bytes(bytes)))
}

impl FromStr for Guid {
    type Err = InvalidGuid;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Guid::parse(s).ok_or_else(|| InvalidGuid(s.to_string()))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Guid(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_forms() {
        let hyphenated = Guid::parse("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0").unwrap();
        let simple = Guid::parse("0f1e2d3c4b5a69788796a5b4c3d2e1f0").unwrap();
        let braced = Guid::parse(" {0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0} ").unwrap();
        assert_eq!(hyphenated, simple);
        assert_eq!(hyphenated, braced);
    }

    #[test]
    fn test_parse_compressed() {
        // All zero bits
        let zero = Guid::parse("0000000000000000000000").unwrap();
        assert_eq!(zero.0, Uuid::nil());

        let guid = Guid::parse("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0").unwrap();
        let compressed = guid.to_compressed();
        assert_eq!(compressed.len(), 22);
        assert_eq!(Guid::parse(&compressed), Some(guid));
    }

    #[test]
    fn test_known_compressed_value() {
        // Max value of the leading chunk is "3$"
        let guid = Guid::parse("3$$$$$$$$$$$$$$$$$$$$$").unwrap();
        assert_eq!(guid.0.as_bytes(), &[0xFF; 16]);
        assert_eq!(guid.to_compressed(), "3$$$$$$$$$$$$$$$$$$$$$");
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(Guid::parse(""), None);
        assert_eq!(Guid::parse("i1234"), None);
        assert_eq!(Guid::parse("not-a-guid"), None);
        // Leading chunk overflows a byte
        assert_eq!(Guid::parse("4000000000000000000000"), None);
        // Characters outside the alphabet
        assert_eq!(Guid::parse("00000000000000000000-+"), None);
    }
}
