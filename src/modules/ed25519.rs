//! Ed25519 owner validator and permission signer.

use super::{split_permission_id, Module, ModuleContext, Signer, Validator};
use crate::account::routing::ValidationData;
use crate::account::types::{ModuleType, PermissionId, UserOperation};
use crate::chain::Contract;
use crate::crypto::verify_with_pubkey;
use crate::encoding::{Address, Hash};
use crate::error::Result;

const OWNER_KEY: &[u8] = b"owner";

/// Validator holding one Ed25519 owner key per account.
///
/// Install data is the 32-byte public key; an operation signature is the
/// 64-byte signature over the operation hash.
#[derive(Debug, Default)]
pub struct Ed25519Validator;

impl Ed25519Validator {
    pub fn owner(ctx: &ModuleContext<'_>) -> Option<Vec<u8>> {
        ctx.load(OWNER_KEY)
    }
}

impl Contract for Ed25519Validator {
    fn name(&self) -> &str {
        "Ed25519Validator"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for Ed25519Validator {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Validator
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        if self.is_initialized(ctx) {
            return Err(ctx.reject("already initialized"));
        }
        if data.len() != 32 {
            return Err(ctx.reject(format!("owner key must be 32 bytes, got {}", data.len())));
        }
        ctx.store(OWNER_KEY, data.to_vec());
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        if !self.is_initialized(ctx) {
            return Err(ctx.reject("not initialized"));
        }
        ctx.clear(OWNER_KEY);
        Ok(())
    }

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool {
        ctx.load(OWNER_KEY).is_some()
    }

    fn as_validator(&self) -> Option<&dyn Validator> {
        Some(self)
    }
}

impl Validator for Ed25519Validator {
    fn validate_user_op(
        &self,
        ctx: &mut ModuleContext<'_>,
        op: &UserOperation,
        op_hash: &Hash,
    ) -> Result<ValidationData> {
        let owner = match Self::owner(ctx) {
            Some(owner) => owner,
            None => return Ok(ValidationData::failure()),
        };
        if verify_with_pubkey(op_hash, &op.signature, &owner) {
            Ok(ValidationData::authorized(ctx.module))
        } else {
            Ok(ValidationData::failure())
        }
    }

    fn is_valid_signature_with_sender(
        &self,
        ctx: &mut ModuleContext<'_>,
        _sender: Address,
        digest: &Hash,
        signature: &[u8],
    ) -> Result<bool> {
        Ok(Self::owner(ctx)
            .map(|owner| verify_with_pubkey(digest, signature, &owner))
            .unwrap_or(false))
    }
}

/// Signer for permissions: one Ed25519 key per (account, permission).
///
/// Install data is `permission id (4) ++ public key (32)`.
#[derive(Debug, Default)]
pub struct Ed25519Signer;

fn signer_key(id: PermissionId) -> Vec<u8> {
    let mut key = b"signer:".to_vec();
    key.extend_from_slice(&id.0);
    key
}

impl Contract for Ed25519Signer {
    fn name(&self) -> &str {
        "Ed25519Signer"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for Ed25519Signer {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Signer
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let (id, key) = split_permission_id(ctx.module, data)?;
        if key.len() != 32 {
            return Err(ctx.reject("signer key must be 32 bytes"));
        }
        ctx.store(&signer_key(id), key.to_vec());
        // any permission counts towards initialization
        ctx.store(b"installed", vec![1]);
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let (id, _) = split_permission_id(ctx.module, data)?;
        ctx.clear(&signer_key(id));
        Ok(())
    }

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool {
        ctx.load(b"installed").is_some()
    }

    fn as_signer(&self) -> Option<&dyn Signer> {
        Some(self)
    }
}

impl Signer for Ed25519Signer {
    fn check_user_op_signature(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        op: &UserOperation,
        op_hash: &Hash,
    ) -> Result<ValidationData> {
        match ctx.load(&signer_key(id)) {
            Some(key) if verify_with_pubkey(op_hash, &op.signature, &key) => Ok(ValidationData::authorized(ctx.module)),
            _ => Ok(ValidationData::failure()),
        }
    }

    fn check_signature(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        _sender: Address,
        digest: &Hash,
        signature: &[u8],
    ) -> Result<bool> {
        Ok(ctx
            .load(&signer_key(id))
            .map(|key| verify_with_pubkey(digest, signature, &key))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::crypto::KeyPair;

    fn op(signature: Vec<u8>) -> UserOperation {
        UserOperation {
            sender: Address::from_low_u64(0xacc),
            nonce: [0u8; 32],
            call_data: vec![],
            prefund: 0,
            signature,
        }
    }

    #[test]
    fn test_validator_lifecycle() {
        let mut chain = Chain::new(1, 0);
        let key = KeyPair::from_seed(&[1u8; 32]);
        let module = Address::from_low_u64(0x11);
        let mut ctx = ModuleContext::new(&mut chain, module, Address::from_low_u64(0xacc));

        assert!(Ed25519Validator.on_install(&mut ctx, &[0u8; 31]).is_err());
        Ed25519Validator.on_install(&mut ctx, &key.public_key_bytes()).unwrap();
        assert!(Ed25519Validator.is_initialized(&ctx));
        assert!(Ed25519Validator.on_install(&mut ctx, &key.public_key_bytes()).is_err());

        Ed25519Validator.on_uninstall(&mut ctx, &[]).unwrap();
        assert!(!Ed25519Validator.is_initialized(&ctx));
    }

    #[test]
    fn test_validator_verdicts() {
        let mut chain = Chain::new(1, 0);
        let key = KeyPair::from_seed(&[1u8; 32]);
        let module = Address::from_low_u64(0x11);
        let mut ctx = ModuleContext::new(&mut chain, module, Address::from_low_u64(0xacc));
        Ed25519Validator.on_install(&mut ctx, &key.public_key_bytes()).unwrap();

        let hash = [5u8; 32];
        let good = Ed25519Validator
            .validate_user_op(&mut ctx, &op(key.sign_bytes(&hash)), &hash)
            .unwrap();
        assert_eq!(good, ValidationData::authorized(module));

        let other = KeyPair::from_seed(&[2u8; 32]);
        let bad = Ed25519Validator
            .validate_user_op(&mut ctx, &op(other.sign_bytes(&hash)), &hash)
            .unwrap();
        assert!(bad.is_failure());
    }

    #[test]
    fn test_signer_keys_are_per_permission() {
        let mut chain = Chain::new(1, 0);
        let key = KeyPair::from_seed(&[3u8; 32]);
        let mut ctx = ModuleContext::new(&mut chain, Address::from_low_u64(0x12), Address::from_low_u64(0xacc));
        let id = PermissionId([0, 0, 0, 1]);

        let mut data = id.0.to_vec();
        data.extend_from_slice(&key.public_key_bytes());
        Ed25519Signer.on_install(&mut ctx, &data).unwrap();

        let hash = [9u8; 32];
        let sig = key.sign_bytes(&hash);
        assert!(Ed25519Signer
            .check_signature(&mut ctx, id, Address::ZERO, &hash, &sig)
            .unwrap());
        assert!(!Ed25519Signer
            .check_signature(&mut ctx, PermissionId([0, 0, 0, 2]), Address::ZERO, &hash, &sig)
            .unwrap());
    }
}
