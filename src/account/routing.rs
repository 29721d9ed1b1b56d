//! Operation routing tag and the validation verdict encoding.
//!
//! Tag layout (32 bytes, big-endian):
//! `[mode:1][identity-type:1][identity-ref:20][nonce-key:2][sequence:8]`
//!
//! Verdict layout (32 bytes): `[authorizer:20][validUntil:6][validAfter:6]`.

use serde::{Deserialize, Serialize};

use super::types::{PermissionId, ValidationIdentity, ValidationType};
use crate::encoding::Address;
use crate::error::{KernelError, Result};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValidationMode {
    Default,
    /// Signature carries a root-approved install of the identity.
    Enable,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RoutingTag {
    pub mode: ValidationMode,
    pub identity: ValidationIdentity,
    pub nonce_key: u16,
    pub sequence: u64,
}

impl RoutingTag {
    pub fn new(identity: ValidationIdentity, sequence: u64) -> Self {
        Self {
            mode: ValidationMode::Default,
            identity,
            nonce_key: 0,
            sequence,
        }
    }

    pub fn root(sequence: u64) -> Self {
        Self::new(ValidationIdentity::Root, sequence)
    }

    pub fn enable(mut self) -> Self {
        self.mode = ValidationMode::Enable;
        self
    }

    pub fn decode(raw: &[u8; 32]) -> Result<Self> {
        let mode = match raw[0] {
            0x00 => ValidationMode::Default,
            0x01 => ValidationMode::Enable,
            other => return Err(KernelError::InvalidRoutingTag(format!("unknown mode 0x{:02x}", other))),
        };

        let reference = &raw[2..22];
        let identity = match ValidationType::from_byte(raw[1])? {
            ValidationType::Root => {
                if reference.iter().any(|b| *b != 0) {
                    return Err(KernelError::InvalidRoutingTag("root tag carries a reference".to_string()));
                }
                ValidationIdentity::Root
            }
            ValidationType::Validator => ValidationIdentity::Validator(Address::from_slice(reference)?),
            ValidationType::Permission => {
                if reference[4..].iter().any(|b| *b != 0) {
                    return Err(KernelError::InvalidRoutingTag("permission reference is 4 bytes".to_string()));
                }
                ValidationIdentity::Permission(PermissionId([reference[0], reference[1], reference[2], reference[3]]))
            }
        };

        let nonce_key = u16::from_be_bytes([raw[22], raw[23]]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&raw[24..32]);

        Ok(Self {
            mode,
            identity,
            nonce_key,
            sequence: u64::from_be_bytes(seq),
        })
    }

    pub fn encode(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = match self.mode {
            ValidationMode::Default => 0x00,
            ValidationMode::Enable => 0x01,
        };
        out[1] = self.identity.validation_type() as u8;
        match self.identity {
            ValidationIdentity::Root => {}
            ValidationIdentity::Validator(addr) => out[2..22].copy_from_slice(addr.as_bytes()),
            ValidationIdentity::Permission(id) => out[2..6].copy_from_slice(&id.0),
        }
        out[22..24].copy_from_slice(&self.nonce_key.to_be_bytes());
        out[24..32].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    /// Sequence space the entry point tracks this tag under.
    pub fn sequence_key(&self) -> [u8; 24] {
        let mut key = [0u8; 24];
        key.copy_from_slice(&self.encode()[..24]);
        key
    }
}

const MAX_U48: u64 = (1 << 48) - 1;

/// Caller-agnostic verdict of one authorization.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct ValidationData {
    pub authorizer: Address,
    /// 0 means no expiry.
    pub valid_until: u64,
    pub valid_after: u64,
}

impl ValidationData {
    pub const FAILURE_AUTHORIZER: Address = Address::from_low_u64(1);

    pub fn failure() -> Self {
        Self {
            authorizer: Self::FAILURE_AUTHORIZER,
            valid_until: 0,
            valid_after: 0,
        }
    }

    pub fn authorized(by: Address) -> Self {
        Self {
            authorizer: by,
            valid_until: 0,
            valid_after: 0,
        }
    }

    /// Window-only verdict, as policies return it.
    pub fn window(valid_after: u64, valid_until: u64) -> Self {
        Self {
            authorizer: Address::ZERO,
            valid_until: valid_until.min(MAX_U48),
            valid_after: valid_after.min(MAX_U48),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.authorizer == Self::FAILURE_AUTHORIZER
    }

    pub fn is_within(&self, now: u64) -> bool {
        now >= self.valid_after && (self.valid_until == 0 || now <= self.valid_until)
    }

    /// Failure dominates; windows intersect; the authorizer of `self` is kept.
    pub fn intersect(self, other: ValidationData) -> ValidationData {
        if self.is_failure() || other.is_failure() {
            return ValidationData::failure();
        }
        let valid_until = match (self.valid_until, other.valid_until) {
            (0, b) => b,
            (a, 0) => a,
            (a, b) => a.min(b),
        };
        ValidationData {
            authorizer: self.authorizer,
            valid_until,
            valid_after: self.valid_after.max(other.valid_after),
        }
    }

    pub fn pack(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..20].copy_from_slice(self.authorizer.as_bytes());
        out[20..26].copy_from_slice(&self.valid_until.min(MAX_U48).to_be_bytes()[2..]);
        out[26..32].copy_from_slice(&self.valid_after.min(MAX_U48).to_be_bytes()[2..]);
        out
    }

    pub fn unpack(raw: &[u8; 32]) -> Self {
        let read48 = |bytes: &[u8]| {
            let mut buf = [0u8; 8];
            buf[2..].copy_from_slice(bytes);
            u64::from_be_bytes(buf)
        };
        Self {
            authorizer: Address(raw[..20].try_into().unwrap_or([0u8; 20])),
            valid_until: read48(&raw[20..26]),
            valid_after: read48(&raw[26..32]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_layout() {
        let v = Address::from_low_u64(0xabcd);
        let tag = RoutingTag::new(ValidationIdentity::Validator(v), 0x0102);
        let raw = tag.encode();
        assert_eq!(raw[0], 0x00);
        assert_eq!(raw[1], 0x01);
        assert_eq!(&raw[2..22], v.as_bytes());
        assert_eq!(&raw[30..32], &[0x01, 0x02]);
        assert_eq!(RoutingTag::decode(&raw).unwrap(), tag);
    }

    #[test]
    fn test_permission_tag_decodes() {
        let id = PermissionId([9, 8, 7, 6]);
        let tag = RoutingTag::new(ValidationIdentity::Permission(id), 3).enable();
        let decoded = RoutingTag::decode(&tag.encode()).unwrap();
        assert_eq!(decoded.identity, ValidationIdentity::Permission(id));
        assert_eq!(decoded.mode, ValidationMode::Enable);
    }

    #[test]
    fn test_malformed_tags_rejected() {
        let mut raw = RoutingTag::root(0).encode();
        raw[0] = 0x07;
        assert!(RoutingTag::decode(&raw).is_err());

        let mut raw = RoutingTag::root(0).encode();
        raw[1] = 0x09;
        assert!(RoutingTag::decode(&raw).is_err());

        // root tags must not smuggle a reference
        let mut raw = RoutingTag::root(0).encode();
        raw[5] = 1;
        assert!(RoutingTag::decode(&raw).is_err());
    }

    #[test]
    fn test_sequence_key_separates_identities() {
        let a = RoutingTag::new(ValidationIdentity::Validator(Address::from_low_u64(1)), 5);
        let b = RoutingTag::new(ValidationIdentity::Validator(Address::from_low_u64(2)), 5);
        assert_ne!(a.sequence_key(), b.sequence_key());
        assert_eq!(a.sequence_key(), RoutingTag { sequence: 99, ..a }.sequence_key());
    }

    #[test]
    fn test_verdict_packing() {
        let v = ValidationData {
            authorizer: Address::from_low_u64(0x77),
            valid_until: 2_000,
            valid_after: 1_000,
        };
        let packed = v.pack();
        assert_eq!(&packed[..20], Address::from_low_u64(0x77).as_bytes());
        assert_eq!(ValidationData::unpack(&packed), v);
        assert!(ValidationData::unpack(&ValidationData::failure().pack()).is_failure());
    }

    #[test]
    fn test_intersect_windows() {
        let by = Address::from_low_u64(0x77);
        let open = ValidationData::authorized(by);
        let merged = open.intersect(ValidationData::window(100, 500)).intersect(ValidationData::window(200, 0));
        assert_eq!(merged.authorizer, by);
        assert_eq!(merged.valid_after, 200);
        assert_eq!(merged.valid_until, 500);
        assert!(merged.is_within(300));
        assert!(!merged.is_within(501));
        assert!(!merged.is_within(199));

        assert!(open.intersect(ValidationData::failure()).is_failure());
    }
}
