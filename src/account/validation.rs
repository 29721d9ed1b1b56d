//! Validation resolver.
//!
//! Turns an operation into a verdict: decode the routing tag, pick the
//! identity, run the identity checks and its modules, then remember which
//! hook the execution phase has to run under. Authorization problems come
//! back as `ValidationData::failure()`; only malformed input and module
//! faults are `Err`.

use tracing::debug;

use super::calls::{EnableEnvelope, PermissionSignature, ValidatorInstall, EXECUTE_USER_OP};
use super::execution::effective_selector;
use super::kernel::Kernel;
use super::routing::{RoutingTag, ValidationData, ValidationMode};
use super::types::{HookRef, ModuleType, PermissionId, UserOperation, ValidationIdentity};
use crate::chain::Chain;
use crate::encoding::{self, sha256, Address, CanonicalSerialize, Hash};
use crate::error::{KernelError, Result};
use crate::modules::{load_module, policy_of, signer_of, validator_of, ModuleContext};

const ENABLE_DOMAIN: &[u8] = b"compass.kernel.enable";

impl Kernel {
    /// `authorize(operation)`: entry point only.
    ///
    /// `missing_funds` is paid to the caller on success, best-effort: if the
    /// account cannot pay, the verdict stands and the entry point decides.
    pub fn validate_user_op(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        op: &UserOperation,
        op_hash: Hash,
        missing_funds: u128,
    ) -> Result<ValidationData> {
        if caller != self.entry_point() {
            return Err(KernelError::NotEntryPoint(caller));
        }
        let tag = RoutingTag::decode(&op.nonce)?;

        let registry = self.registry.clone();
        let snapshot = chain.snapshot();
        let verdict = match self.resolve(chain, &tag, op, &op_hash) {
            Ok(verdict) if !verdict.is_failure() => verdict,
            other => {
                self.registry = registry;
                chain.restore(snapshot);
                if let Ok(verdict) = &other {
                    debug!("operation {} refused by {}", hex::encode(op_hash), tag.identity);
                    return Ok(*verdict);
                }
                return other;
            }
        };

        if missing_funds > 0 {
            if let Err(e) = chain.call(self.address(), caller, missing_funds, &[]) {
                debug!("prefund of {} from {} not paid: {}", missing_funds, self.address(), e);
            }
        }
        Ok(verdict)
    }

    fn resolve(&mut self, chain: &mut Chain, tag: &RoutingTag, op: &UserOperation, op_hash: &Hash) -> Result<ValidationData> {
        let root = self.registry.root().ok_or(KernelError::NotInitialized)?;
        let via_root = tag.identity.is_root_placeholder();
        let identity = if via_root { root } else { tag.identity };

        let mut signature = op.signature.clone();
        if tag.mode == ValidationMode::Enable {
            match self.enable(chain, identity, via_root, &op.signature)? {
                Some(inner) => signature = inner,
                None => return Ok(ValidationData::failure()),
            }
        }

        let config = self.registry.validation(&identity);
        if !via_root {
            if !config.hook.is_installed() {
                debug!("{} is not installed", identity);
                return Ok(ValidationData::failure());
            }
            if config.epoch < self.registry.valid_epoch_from() {
                debug!(
                    "{} is at epoch {}, floor is {}",
                    identity,
                    config.epoch,
                    self.registry.valid_epoch_from()
                );
                return Ok(ValidationData::failure());
            }
            let allowed = effective_selector(&op.call_data)
                .map(|s| self.registry.is_selector_allowed(&identity, &s))
                .unwrap_or(false);
            if !allowed {
                debug!("{} may not authorize this selector", identity);
                return Ok(ValidationData::failure());
            }
        }

        let op = op.with_signature(signature);
        let verdict = match identity {
            ValidationIdentity::Root => return Err(KernelError::InvalidValidationType),
            ValidationIdentity::Validator(module) => {
                let code = load_module(chain, module, ModuleType::Validator)?;
                let validator = validator_of(&code, module)?;
                let mut ctx = ModuleContext::new(chain, module, self.address());
                validator.validate_user_op(&mut ctx, &op, op_hash)?
            }
            ValidationIdentity::Permission(id) => self.validate_permission(chain, id, &op, op_hash)?,
        };
        if verdict.is_failure() {
            return Ok(verdict);
        }

        self.registry.record_execution_hook(*op_hash, config.hook);
        if let HookRef::Module(_) = config.hook {
            // hooked identities must come through the hook-checked execute
            if op.outer_selector() != Some(*EXECUTE_USER_OP) {
                debug!("{} is hooked but the call bypasses the hook", identity);
                return Ok(ValidationData::failure());
            }
        }
        Ok(verdict)
    }

    /// Every policy that takes part, then the signer; verdicts intersect and
    /// the signer is the authorizer.
    fn validate_permission(
        &mut self,
        chain: &mut Chain,
        id: PermissionId,
        op: &UserOperation,
        op_hash: &Hash,
    ) -> Result<ValidationData> {
        let config = match self.registry.permission(&id) {
            Some(config) => config.clone(),
            None => return Ok(ValidationData::failure()),
        };
        let parts: PermissionSignature = match encoding::decode(&op.signature) {
            Ok(parts) => parts,
            Err(_) => return Ok(ValidationData::failure()),
        };
        let account = self.address();

        let mut window = ValidationData::window(0, 0);
        for (index, entry) in config.policies.iter().enumerate() {
            if entry.flags.skip_user_op {
                continue;
            }
            let code = load_module(chain, entry.policy, ModuleType::Policy)?;
            let policy = policy_of(&code, entry.policy)?;
            let policy_data = parts.policy_data.get(index).map(Vec::as_slice).unwrap_or(&[]);
            let mut ctx = ModuleContext::new(chain, entry.policy, account);
            let verdict = policy.check_user_op_policy(&mut ctx, id, op, policy_data)?;
            if verdict.is_failure() {
                return Ok(verdict);
            }
            window = window.intersect(verdict);
        }

        let code = load_module(chain, config.signer, ModuleType::Signer)?;
        let signer = signer_of(&code, config.signer)?;
        let mut ctx = ModuleContext::new(chain, config.signer, account);
        let signed = op.with_signature(parts.signer_data);
        let verdict = signer.check_user_op_signature(&mut ctx, id, &signed, op_hash)?;
        Ok(verdict.intersect(window))
    }

    /// Enable mode: install the validator named by the tag from a root-signed
    /// envelope. Returns the signature the validator should check, or `None`
    /// when the envelope does not authorize the install.
    fn enable(
        &mut self,
        chain: &mut Chain,
        identity: ValidationIdentity,
        via_root: bool,
        signature: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let module = match identity {
            ValidationIdentity::Validator(module) if !via_root && !self.registry.is_validation_installed(&identity) => {
                module
            }
            _ => return Ok(None),
        };
        let envelope: EnableEnvelope = match encoding::decode(signature) {
            Ok(envelope) => envelope,
            Err(_) => return Ok(None),
        };
        let root = self.registry.root().ok_or(KernelError::NotInitialized)?;

        let digest = self.enable_digest(chain, identity, &envelope.install)?;
        let approved = self.check_identity_signature(chain, root, self.address(), &digest, &envelope.enable_signature)?;
        if !approved {
            debug!("enable envelope for {} not signed by root", module);
            return Ok(None);
        }
        self.install_validator(chain, module, &envelope.install)?;
        Ok(Some(envelope.user_op_signature))
    }

    /// What the root signs to approve an enable-mode install.
    pub fn enable_digest(&self, chain: &Chain, identity: ValidationIdentity, install: &ValidatorInstall) -> Result<Hash> {
        let mut buf = ENABLE_DOMAIN.to_canonical_bytes();
        buf.extend(self.address().to_canonical_bytes());
        buf.extend(chain.chain_id().to_canonical_bytes());
        buf.push(identity.validation_type() as u8);
        if let ValidationIdentity::Validator(module) = identity {
            buf.extend(module.to_canonical_bytes());
        }
        buf.extend(self.registry.current_epoch().to_canonical_bytes());
        buf.extend(encoding::encode(install)?.to_canonical_bytes());
        Ok(sha256(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::calls::{hook_checked, KernelCall, PermissionInstall};
    use crate::account::mode::{encode_single, Execution, ExecutionMode};
    use crate::account::types::{PassFlags, PolicyEntry};
    use crate::crypto::KeyPair;
    use crate::encoding::Selector;
    use crate::modules::policy::TimeWindow;
    use crate::modules::{Ed25519Signer, Ed25519Validator, TimeWindowPolicy};
    use crate::test_support::{Fixture, RecordingHook, ENTRY_POINT, ROOT_VALIDATOR};
    use std::sync::Arc;

    const V2: Address = Address::from_low_u64(0x22);
    const HOOK: Address = Address::from_low_u64(0x41);

    fn execute_call() -> Vec<u8> {
        KernelCall::Execute {
            mode: ExecutionMode::single().encode(),
            execution_data: encode_single(&Execution::new(Address::from_low_u64(0xbee), 0, vec![])),
        }
        .encode()
        .unwrap()
    }

    fn install_v2(fx: &mut Fixture, hook: HookRef, selector: Option<Selector>) -> KeyPair {
        let key = KeyPair::from_seed(&[2u8; 32]);
        let _ = fx.chain.deploy(V2, Arc::new(Ed25519Validator));
        let install = encoding::encode(&ValidatorInstall {
            hook,
            validator_data: key.public_key_bytes().to_vec(),
            hook_data: vec![],
            selector,
        })
        .unwrap();
        fx.install_module(ModuleType::Validator, V2, &install).unwrap();
        key
    }

    fn validate(fx: &mut Fixture, op: &UserOperation) -> ValidationData {
        let hash = fx.entry_point.user_op_hash(&fx.chain, op);
        fx.kernel
            .validate_user_op(&mut fx.chain, ENTRY_POINT, op, hash, 0)
            .unwrap()
    }

    #[test]
    fn test_root_operation_authorized_by_root_validator() {
        let mut fx = Fixture::new();
        let op = fx.signed_op(RoutingTag::root(0), execute_call());
        let verdict = validate(&mut fx, &op);
        assert_eq!(verdict, ValidationData::authorized(ROOT_VALIDATOR));
        assert_eq!(verdict.valid_until, 0);
        assert_eq!(verdict.valid_after, 0);
    }

    #[test]
    fn test_bad_proof_is_a_failure_verdict() {
        let mut fx = Fixture::new();
        let op = fx.signed_op(RoutingTag::root(0), execute_call()).with_signature(vec![0u8; 64]);
        assert!(validate(&mut fx, &op).is_failure());
    }

    #[test]
    fn test_only_entry_point_may_authorize() {
        let mut fx = Fixture::new();
        let op = fx.signed_op(RoutingTag::root(0), execute_call());
        let stranger = Address::from_low_u64(0x5757);
        assert_eq!(
            fx.kernel.validate_user_op(&mut fx.chain, stranger, &op, [0u8; 32], 0),
            Err(KernelError::NotEntryPoint(stranger))
        );
    }

    #[test]
    fn test_selector_outside_allow_list_fails_without_state_change() {
        let mut fx = Fixture::new();
        let key = install_v2(&mut fx, HookRef::NoHook, None);
        let registry = fx.kernel.registry().clone();
        let state = fx.chain.state().clone();

        let op = fx.signed_op_with(&key, RoutingTag::new(ValidationIdentity::Validator(V2), 0), execute_call());
        assert!(validate(&mut fx, &op).is_failure());
        assert_eq!(fx.kernel.registry(), &registry);
        assert_eq!(fx.chain.state(), &state);
    }

    #[test]
    fn test_granted_selector_authorizes() {
        let mut fx = Fixture::new();
        let key = install_v2(&mut fx, HookRef::NoHook, Some(*crate::account::calls::EXECUTE));
        let op = fx.signed_op_with(&key, RoutingTag::new(ValidationIdentity::Validator(V2), 0), execute_call());
        assert_eq!(validate(&mut fx, &op), ValidationData::authorized(V2));
    }

    #[test]
    fn test_stale_epoch_always_fails() {
        let mut fx = Fixture::new();
        let key = install_v2(&mut fx, HookRef::NoHook, Some(*crate::account::calls::EXECUTE));
        fx.kernel.invalidate_epoch(&mut fx.chain, ENTRY_POINT, 2).unwrap();

        let op = fx.signed_op_with(&key, RoutingTag::new(ValidationIdentity::Validator(V2), 0), execute_call());
        assert!(validate(&mut fx, &op).is_failure());

        // root is exempt
        let op = fx.signed_op(RoutingTag::root(0), execute_call());
        assert!(!validate(&mut fx, &op).is_failure());
    }

    #[test]
    fn test_uninstalled_identity_fails() {
        let mut fx = Fixture::new();
        let key = KeyPair::from_seed(&[2u8; 32]);
        let op = fx.signed_op_with(&key, RoutingTag::new(ValidationIdentity::Validator(V2), 0), execute_call());
        assert!(validate(&mut fx, &op).is_failure());
    }

    #[test]
    fn test_hooked_identity_must_use_hook_checked_execute() {
        let mut fx = Fixture::new();
        fx.chain.deploy(HOOK, Arc::new(RecordingHook::default())).unwrap();
        let key = install_v2(&mut fx, HookRef::Module(HOOK), Some(*crate::account::calls::EXECUTE));
        let tag = RoutingTag::new(ValidationIdentity::Validator(V2), 0);

        let direct = fx.signed_op_with(&key, tag, execute_call());
        assert!(validate(&mut fx, &direct).is_failure());

        let wrapped = fx.signed_op_with(&key, tag, hook_checked(&execute_call()));
        assert_eq!(validate(&mut fx, &wrapped), ValidationData::authorized(V2));
    }

    #[test]
    fn test_malformed_tag_is_an_error() {
        let mut fx = Fixture::new();
        let mut op = fx.signed_op(RoutingTag::root(0), execute_call());
        op.nonce[1] = 0x09;
        let hash = fx.entry_point.user_op_hash(&fx.chain, &op);
        assert!(matches!(
            fx.kernel.validate_user_op(&mut fx.chain, ENTRY_POINT, &op, hash, 0),
            Err(KernelError::InvalidRoutingTag(_))
        ));
    }

    #[test]
    fn test_prefund_paid_on_success_only() {
        let mut fx = Fixture::new();
        let account = fx.kernel.address();
        fx.chain.set_balance(&account, 1_000);

        let op = fx.signed_op(RoutingTag::root(0), execute_call());
        let hash = fx.entry_point.user_op_hash(&fx.chain, &op);
        fx.kernel
            .validate_user_op(&mut fx.chain, ENTRY_POINT, &op, hash, 100)
            .unwrap();
        assert_eq!(fx.chain.balance_of(&ENTRY_POINT), 100);

        let bad = op.with_signature(vec![0u8; 64]);
        let hash = fx.entry_point.user_op_hash(&fx.chain, &bad);
        fx.kernel
            .validate_user_op(&mut fx.chain, ENTRY_POINT, &bad, hash, 100)
            .unwrap();
        assert_eq!(fx.chain.balance_of(&ENTRY_POINT), 100);
    }

    #[test]
    fn test_unpaid_prefund_does_not_change_verdict() {
        let mut fx = Fixture::new();
        let op = fx.signed_op(RoutingTag::root(0), execute_call());
        let hash = fx.entry_point.user_op_hash(&fx.chain, &op);
        let verdict = fx
            .kernel
            .validate_user_op(&mut fx.chain, ENTRY_POINT, &op, hash, 100)
            .unwrap();
        assert!(!verdict.is_failure());
        assert_eq!(fx.chain.balance_of(&ENTRY_POINT), 0);
    }

    #[test]
    fn test_enable_mode_installs_and_validates() {
        let mut fx = Fixture::new();
        fx.chain.deploy(V2, Arc::new(Ed25519Validator)).unwrap();
        let key = KeyPair::from_seed(&[2u8; 32]);
        let identity = ValidationIdentity::Validator(V2);
        let install = ValidatorInstall {
            hook: HookRef::NoHook,
            validator_data: key.public_key_bytes().to_vec(),
            hook_data: vec![],
            selector: Some(*crate::account::calls::EXECUTE),
        };

        let digest = fx.kernel.enable_digest(&fx.chain, identity, &install).unwrap();
        let mut op = fx.signed_op_with(&key, RoutingTag::new(identity, 0).enable(), execute_call());
        let envelope = EnableEnvelope {
            install,
            enable_signature: fx.root_key.sign_bytes(&digest),
            user_op_signature: op.signature.clone(),
        };
        op.signature = encoding::encode(&envelope).unwrap();

        assert_eq!(validate(&mut fx, &op), ValidationData::authorized(V2));
        assert!(fx.kernel.registry().is_validation_installed(&identity));
    }

    #[test]
    fn test_enable_mode_without_root_approval_fails() {
        let mut fx = Fixture::new();
        fx.chain.deploy(V2, Arc::new(Ed25519Validator)).unwrap();
        let key = KeyPair::from_seed(&[2u8; 32]);
        let identity = ValidationIdentity::Validator(V2);
        let install = ValidatorInstall {
            hook: HookRef::NoHook,
            validator_data: key.public_key_bytes().to_vec(),
            hook_data: vec![],
            selector: Some(*crate::account::calls::EXECUTE),
        };
        let digest = fx.kernel.enable_digest(&fx.chain, identity, &install).unwrap();
        let mut op = fx.signed_op_with(&key, RoutingTag::new(identity, 0).enable(), execute_call());
        let envelope = EnableEnvelope {
            install,
            // self-signed: not the root
            enable_signature: key.sign_bytes(&digest),
            user_op_signature: op.signature.clone(),
        };
        op.signature = encoding::encode(&envelope).unwrap();

        assert!(validate(&mut fx, &op).is_failure());
        assert!(!fx.kernel.registry().is_validation_installed(&identity));
    }

    #[test]
    fn test_permission_verdict_merges_policy_window() {
        let mut fx = Fixture::new();
        let id = PermissionId([0, 0, 0, 3]);
        let policy = Address::from_low_u64(0x50);
        let signer = Address::from_low_u64(0x5a);
        fx.chain.deploy(policy, Arc::new(TimeWindowPolicy)).unwrap();
        fx.chain.deploy(signer, Arc::new(Ed25519Signer)).unwrap();
        let key = KeyPair::from_seed(&[4u8; 32]);

        let window = TimeWindow {
            valid_after: 500,
            valid_until: 5_000,
        };
        let window_data = TimeWindowPolicy::install_data(id, window).unwrap()[4..].to_vec();
        let install = PermissionInstall {
            id,
            hook: HookRef::NoHook,
            policies: vec![(
                PolicyEntry {
                    policy,
                    flags: PassFlags::default(),
                },
                window_data,
            )],
            signer,
            signer_data: key.public_key_bytes().to_vec(),
            hook_data: vec![],
            selector: Some(*crate::account::calls::EXECUTE),
        };
        fx.kernel.install_permission(&mut fx.chain, ENTRY_POINT, &install).unwrap();

        let mut op = fx.signed_op_with(&key, RoutingTag::new(ValidationIdentity::Permission(id), 0), execute_call());
        // the signature is outside the hash
        let parts = PermissionSignature {
            policy_data: vec![vec![]],
            signer_data: op.signature.clone(),
        };
        op.signature = encoding::encode(&parts).unwrap();

        let verdict = validate(&mut fx, &op);
        assert_eq!(verdict.authorizer, signer);
        assert_eq!((verdict.valid_after, verdict.valid_until), (500, 5_000));
    }
}
