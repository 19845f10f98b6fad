//! Filesystem object identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of one filesystem object: `(sequence, object number, version)`.
///
/// The canonical string form is `0x<seq>:0x<oid>:0x<ver>` in lowercase hex.
/// It is used verbatim as the file name of markers and tier links, so it must
/// round-trip through [`Fid::from_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fid {
    pub seq: u64,
    pub oid: u32,
    pub ver: u32,
}

impl Fid {
    pub const ZERO: Fid = Fid {
        seq: 0,
        oid: 0,
        ver: 0,
    };

    pub const fn new(seq: u64, oid: u32, ver: u32) -> Self {
        Self { seq, oid, ver }
    }

    pub fn is_zero(&self) -> bool {
        *self == Fid::ZERO
    }

    /// Low 16 bits of the object number.
    pub fn shard(&self) -> u16 {
        (self.oid & 0xFFFF) as u16
    }

    /// Shard directory name, four lowercase hex digits.
    pub fn shard_name(&self) -> String {
        shard_name(self.shard())
    }
}

pub fn shard_name(shard: u16) -> String {
    format!("{:04x}", shard)
}

/// Parses a shard directory name produced by [`shard_name`].
pub fn parse_shard_name(name: &str) -> Option<u16> {
    if name.len() != 4 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    u16::from_str_radix(name, 16).ok()
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:0x{:x}:0x{:x}", self.seq, self.oid, self.ver)
    }
}

impl FromStr for Fid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidFid(s.to_string());
        let mut parts = s.split(':');
        let seq = parts.next().ok_or_else(invalid)?;
        let oid = parts.next().ok_or_else(invalid)?;
        let ver = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Fid {
            seq: parse_hex(seq).ok_or_else(invalid)?,
            oid: parse_hex(oid)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(invalid)?,
            ver: parse_hex(ver)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(invalid)?,
        })
    }
}

fn parse_hex(field: &str) -> Option<u64> {
    let digits = field.strip_prefix("0x")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

impl TryFrom<String> for Fid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Fid> for String {
    fn from(value: Fid) -> Self {
        value.to_string()
    }
}
