use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GrapefruitError;

/// Number of bits in a DHT identifier, and so the number of routing buckets.
pub const ID_BITS: usize = 160;

/// A 160-bit identifier shared by DHT nodes and torrents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id20([u8; 20]);

pub type NodeId = Id20;
pub type InfoHash = Id20;

impl Id20 {
    pub const LEN: usize = 20;

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GrapefruitError> {
        let arr: [u8; 20] = bytes.try_into().map_err(|_| GrapefruitError::InvalidId {
            reason: format!("expected 20 bytes, got {}", bytes.len()),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn xor(&self, other: &Id20) -> Id20 {
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Id20(out)
    }

    /// Bit length of this value read as a big-endian integer.
    pub fn bit_len(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return (20 - i) * 8 - byte.leading_zeros() as usize;
            }
        }
        0
    }

    /// Routing bucket for a distance: bit length minus one, 0 for a zero distance.
    pub fn bucket_index(&self) -> usize {
        self.bit_len().saturating_sub(1)
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(40);
        for byte in self.0 {
            s.push_str(&format!("{:02x}", byte));
        }
        s
    }
}

impl fmt::Debug for Id20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id20({})", self.to_hex())
    }
}

impl fmt::Display for Id20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Id20 {
    type Err = GrapefruitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 || !s.is_ascii() {
            return Err(GrapefruitError::InvalidId {
                reason: format!("expected 40 hex characters, got {:?}", s),
            });
        }
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|e| GrapefruitError::InvalidId {
                reason: e.to_string(),
            })?;
        }
        Ok(Id20(out))
    }
}

impl From<[u8; 20]> for Id20 {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Id20 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id20 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
