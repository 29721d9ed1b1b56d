//! Account-level signature checks (ERC-1271 style).
//!
//! Signature layout: `[validation type:1][reference][module signature]` where
//! the reference is empty for root, 20 bytes for a validator and 4 bytes for a
//! permission. The hash is bound to this account and chain before any module
//! sees it.

use tracing::debug;

use super::kernel::Kernel;
use super::types::{ModuleType, PermissionId, ValidationIdentity, ValidationType};
use crate::chain::Chain;
use crate::encoding::{sha256, Address, CanonicalSerialize, Hash};
use crate::error::{KernelError, Result};
use crate::modules::{load_module, policy_of, signer_of, validator_of, ModuleContext};

pub const ERC1271_MAGIC: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];
pub const ERC1271_INVALID: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

const REPLAY_SAFE_DOMAIN: &[u8] = b"compass.kernel.replay-safe";

impl Kernel {
    /// Returns `ERC1271_MAGIC` when `signature` is valid for `hash`.
    /// Never mutates state.
    pub fn is_valid_signature(&mut self, chain: &mut Chain, caller: Address, hash: &Hash, signature: &[u8]) -> [u8; 4] {
        let valid = self.view(chain, |k, chain| k.check_account_signature(chain, caller, hash, signature));
        match valid {
            Ok(true) => ERC1271_MAGIC,
            Ok(false) => ERC1271_INVALID,
            Err(e) => {
                debug!("signature check on {} faulted: {}", self.address(), e);
                ERC1271_INVALID
            }
        }
    }

    /// `hash` wrapped in this account's domain.
    pub fn replay_safe_hash(&self, chain: &Chain, hash: &Hash) -> Hash {
        let mut buf = REPLAY_SAFE_DOMAIN.to_canonical_bytes();
        buf.extend(self.address().to_canonical_bytes());
        buf.extend(chain.chain_id().to_canonical_bytes());
        buf.extend(hash.to_canonical_bytes());
        sha256(&buf)
    }

    fn check_account_signature(&mut self, chain: &mut Chain, caller: Address, hash: &Hash, signature: &[u8]) -> Result<bool> {
        let (identity, rest) = match split_prefix(signature) {
            Some(parts) => parts,
            None => return Ok(false),
        };
        let identity = match identity {
            ValidationIdentity::Root => self.registry.root().ok_or(KernelError::NotInitialized)?,
            other => {
                let config = self.registry.validation(&other);
                if !config.hook.is_installed() || config.epoch < self.registry.valid_epoch_from() {
                    return Ok(false);
                }
                other
            }
        };
        let digest = self.replay_safe_hash(chain, hash);
        self.check_identity_signature(chain, identity, caller, &digest, rest)
    }

    /// Asks `identity`'s modules whether `signature` covers `digest`.
    pub(crate) fn check_identity_signature(
        &mut self,
        chain: &mut Chain,
        identity: ValidationIdentity,
        sender: Address,
        digest: &Hash,
        signature: &[u8],
    ) -> Result<bool> {
        let account = self.address();
        match identity {
            ValidationIdentity::Root => Err(KernelError::InvalidValidationType),
            ValidationIdentity::Validator(module) => {
                let code = load_module(chain, module, ModuleType::Validator)?;
                let validator = validator_of(&code, module)?;
                let mut ctx = ModuleContext::new(chain, module, account);
                validator.is_valid_signature_with_sender(&mut ctx, sender, digest, signature)
            }
            ValidationIdentity::Permission(id) => {
                let config = match self.registry.permission(&id) {
                    Some(config) => config.clone(),
                    None => return Ok(false),
                };
                for entry in config.policies.iter().filter(|e| !e.flags.skip_signature) {
                    let code = load_module(chain, entry.policy, ModuleType::Policy)?;
                    let policy = policy_of(&code, entry.policy)?;
                    let mut ctx = ModuleContext::new(chain, entry.policy, account);
                    let verdict = policy.check_signature_policy(&mut ctx, id, sender, digest, signature)?;
                    if verdict.is_failure() || !verdict.is_within(chain.timestamp()) {
                        return Ok(false);
                    }
                }
                let code = load_module(chain, config.signer, ModuleType::Signer)?;
                let signer = signer_of(&code, config.signer)?;
                let mut ctx = ModuleContext::new(chain, config.signer, account);
                signer.check_signature(&mut ctx, id, sender, digest, signature)
            }
        }
    }
}

/// Splits the identity prefix off an account signature.
pub fn split_prefix(signature: &[u8]) -> Option<(ValidationIdentity, &[u8])> {
    let (&kind, rest) = signature.split_first()?;
    match ValidationType::from_byte(kind).ok()? {
        ValidationType::Root => Some((ValidationIdentity::Root, rest)),
        ValidationType::Validator => {
            if rest.len() < 20 {
                return None;
            }
            let address = Address::from_slice(&rest[..20]).ok()?;
            Some((ValidationIdentity::Validator(address), &rest[20..]))
        }
        ValidationType::Permission => {
            if rest.len() < 4 {
                return None;
            }
            let id = PermissionId([rest[0], rest[1], rest[2], rest[3]]);
            Some((ValidationIdentity::Permission(id), &rest[4..]))
        }
    }
}

/// Builds an account signature for `identity`.
pub fn with_prefix(identity: ValidationIdentity, signature: &[u8]) -> Vec<u8> {
    let mut out = vec![identity.validation_type() as u8];
    match identity {
        ValidationIdentity::Root => {}
        ValidationIdentity::Validator(address) => out.extend_from_slice(address.as_bytes()),
        ValidationIdentity::Permission(id) => out.extend_from_slice(&id.0),
    }
    out.extend_from_slice(signature);
    out
}
