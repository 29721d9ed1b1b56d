//! Primitive wire types and the canonical byte encoding used for hashing.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use crate::error::{KernelError, Result};

/// 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// 20-byte account / module address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Address whose trailing 8 bytes hold `n` big-endian.
    pub const fn from_low_u64(n: u64) -> Self {
        let b = n.to_be_bytes();
        let mut out = [0u8; 20];
        let mut i = 0;
        while i < 8 {
            out[12 + i] = b[i];
            i += 1;
        }
        Address(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| KernelError::Deserialization(format!("address needs 20 bytes, got {}", bytes.len())))?;
        Ok(Address(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| KernelError::Deserialization(format!("invalid address hex: {}", e)))?;
        Address::from_slice(&raw)
    }
}

/// 4-byte entry point tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// First four bytes of the SHA-256 of an entry point signature.
    pub fn from_signature(signature: &str) -> Self {
        let digest = sha256(signature.as_bytes());
        Selector([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Leading selector of a call payload, if it has one.
    pub fn from_calldata(data: &[u8]) -> Option<Self> {
        let head: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(Selector(head))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Selector {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| KernelError::Deserialization(format!("invalid selector hex: {}", e)))?;
        let arr: [u8; 4] = raw
            .as_slice()
            .try_into()
            .map_err(|_| KernelError::Deserialization("selector needs 4 bytes".to_string()))?;
        Ok(Selector(arr))
    }
}

// Hex strings for human readable formats (toml, json), raw bytes for bincode.
macro_rules! hex_serde {
    ($ty:ident, $len:expr) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                } else {
                    let raw = <[u8; $len]>::deserialize(deserializer)?;
                    Ok($ty(raw))
                }
            }
        }
    };
}

hex_serde!(Address, 20);
hex_serde!(Selector, 4);

/// bincode encode with the crate error type.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| KernelError::Serialization(e.to_string()))
}

/// bincode decode with the crate error type.
pub fn decode<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| KernelError::Deserialization(e.to_string()))
}

/// Trait for objects that have a canonical binary representation for hashing/signing.
/// careful: This must be deterministic across platforms/versions.
pub trait CanonicalSerialize {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.canonical_serialize(&mut buf).expect("memory write failed");
        buf
    }

    fn canonical_hash(&self) -> Hash {
        sha256(&self.to_canonical_bytes())
    }
}

// --- Primitives (big-endian) ---

impl CanonicalSerialize for u8 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&[*self])
    }
}

impl CanonicalSerialize for u32 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_be_bytes())
    }
}

impl CanonicalSerialize for u64 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_be_bytes())
    }
}

impl CanonicalSerialize for u128 {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_be_bytes())
    }
}

impl CanonicalSerialize for [u8] {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let len = self.len() as u32;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(self)
    }
}

impl CanonicalSerialize for Vec<u8> {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.as_slice().canonical_serialize(writer)
    }
}

impl CanonicalSerialize for Hash {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self)
    }
}

impl CanonicalSerialize for Address {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl CanonicalSerialize for Selector {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl<T: CanonicalSerialize> CanonicalSerialize for Option<T> {
    fn canonical_serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Some(v) => {
                writer.write_all(&[1])?;
                v.canonical_serialize(writer)
            }
            None => writer.write_all(&[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address::from_low_u64(0x4337);
        let text = addr.to_string();
        assert_eq!(text, "0x0000000000000000000000000000000000004337");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_serde_formats() {
        let addr = Address::from_low_u64(7);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));

        // bincode keeps the raw 20 bytes
        let bin = encode(&addr).unwrap();
        assert_eq!(bin.len(), 20);
        assert_eq!(decode::<Address>(&bin).unwrap(), addr);
    }

    #[test]
    fn test_selector_from_calldata() {
        let sel = Selector::from_signature("transfer(address,uint256)");
        let mut data = sel.0.to_vec();
        data.extend_from_slice(b"args");
        assert_eq!(Selector::from_calldata(&data), Some(sel));
        assert_eq!(Selector::from_calldata(&[1, 2, 3]), None);
    }

    #[test]
    fn test_canonical_bytes_are_length_prefixed() {
        let a = (b"ab".to_vec(), b"c".to_vec());
        let b = (b"a".to_vec(), b"bc".to_vec());
        let enc = |(x, y): &(Vec<u8>, Vec<u8>)| {
            let mut buf = x.to_canonical_bytes();
            buf.extend(y.to_canonical_bytes());
            buf
        };
        assert_ne!(enc(&a), enc(&b));
    }
}
