//! Module capability traits and the reference modules shipped with the kernel.
//!
//! A module is a `Contract` that also answers `as_module()`. Each role it can
//! play is exposed through one of the `as_*` views; the account only ever
//! reaches a module through the view matching the slot it was installed in.

pub mod ed25519;
pub mod executor;
pub mod hooks;
pub mod policy;

use std::sync::Arc;

use crate::account::routing::ValidationData;
use crate::account::types::{ModuleType, PermissionId, UserOperation};
use crate::chain::{Chain, Contract};
use crate::encoding::{Address, Hash};
use crate::error::{KernelError, Result};

pub use ed25519::{Ed25519Signer, Ed25519Validator};
pub use executor::ScheduledTransferExecutor;
pub use hooks::ValueLimitHook;
pub use policy::{SudoPolicy, TimeWindowPolicy};

/// Storage view of one module for one account.
pub struct ModuleContext<'a> {
    pub chain: &'a mut Chain,
    pub module: Address,
    pub account: Address,
}

impl<'a> ModuleContext<'a> {
    pub fn new(chain: &'a mut Chain, module: Address, account: Address) -> Self {
        Self { chain, module, account }
    }

    fn slot(&self, key: &[u8]) -> Vec<u8> {
        let mut slot = self.account.as_bytes().to_vec();
        slot.extend_from_slice(key);
        slot
    }

    pub fn load(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.chain.state().load(&self.module, &self.slot(key)).cloned()
    }

    pub fn store(&mut self, key: &[u8], value: Vec<u8>) {
        let slot = self.slot(key);
        let module = self.module;
        self.chain.state_mut().store(module, slot, value);
    }

    pub fn clear(&mut self, key: &[u8]) {
        let slot = self.slot(key);
        let module = self.module;
        self.chain.state_mut().clear(&module, &slot);
    }

    pub fn now(&self) -> u64 {
        self.chain.timestamp()
    }

    pub fn reject(&self, reason: impl Into<String>) -> KernelError {
        KernelError::rejected(self.module, reason)
    }
}

/// Lifecycle shared by every module role.
pub trait Module: Contract {
    fn is_module_type(&self, module_type: ModuleType) -> bool;

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()>;

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()>;

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool;

    fn as_validator(&self) -> Option<&dyn Validator> {
        None
    }

    fn as_executor(&self) -> Option<&dyn Executor> {
        None
    }

    fn as_hook(&self) -> Option<&dyn Hook> {
        None
    }

    fn as_fallback(&self) -> Option<&dyn Fallback> {
        None
    }

    fn as_policy(&self) -> Option<&dyn Policy> {
        None
    }

    fn as_signer(&self) -> Option<&dyn Signer> {
        None
    }
}

pub trait Validator: Module {
    /// Verdict for an operation hash. `Err` is reserved for faults; a bad
    /// proof is `Ok(ValidationData::failure())`.
    fn validate_user_op(
        &self,
        ctx: &mut ModuleContext<'_>,
        op: &UserOperation,
        op_hash: &Hash,
    ) -> Result<ValidationData>;

    fn is_valid_signature_with_sender(
        &self,
        ctx: &mut ModuleContext<'_>,
        sender: Address,
        digest: &Hash,
        signature: &[u8],
    ) -> Result<bool>;
}

/// Marker role: installed executors may drive `execute_from_executor`.
pub trait Executor: Module {}

pub trait Hook: Module {
    /// Runs before the guarded action; the returned context is handed back
    /// to `post_check` unchanged.
    fn pre_check(&self, ctx: &mut ModuleContext<'_>, sender: Address, value: u128, data: &[u8]) -> Result<Vec<u8>>;

    fn post_check(&self, ctx: &mut ModuleContext<'_>, context: &[u8]) -> Result<()>;
}

pub trait Fallback: Module {
    fn supports_selector(&self, _selector: &crate::encoding::Selector) -> bool {
        true
    }
}

pub trait Policy: Module {
    fn check_user_op_policy(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        op: &UserOperation,
        policy_data: &[u8],
    ) -> Result<ValidationData>;

    fn check_signature_policy(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        sender: Address,
        digest: &Hash,
        signature: &[u8],
    ) -> Result<ValidationData>;
}

pub trait Signer: Module {
    fn check_user_op_signature(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        op: &UserOperation,
        op_hash: &Hash,
    ) -> Result<ValidationData>;

    fn check_signature(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        sender: Address,
        digest: &Hash,
        signature: &[u8],
    ) -> Result<bool>;
}

/// Deployed code at `address`, required to be a module exposing `role`.
pub(crate) fn load_module(chain: &Chain, address: Address, role: ModuleType) -> Result<Arc<dyn Contract>> {
    let code = chain.code_at(&address)?;
    let supported = code.as_module().map(|m| m.is_module_type(role)).unwrap_or(false);
    if !supported {
        return Err(missing(address, role));
    }
    Ok(code)
}

fn missing(address: Address, role: ModuleType) -> KernelError {
    KernelError::MissingCapability {
        module: address,
        capability: role.name(),
    }
}

pub(crate) fn module_of(code: &Arc<dyn Contract>, address: Address, role: ModuleType) -> Result<&dyn Module> {
    code.as_module().ok_or_else(|| missing(address, role))
}

pub(crate) fn validator_of(code: &Arc<dyn Contract>, address: Address) -> Result<&dyn Validator> {
    code.as_module()
        .and_then(|m| m.as_validator())
        .ok_or_else(|| missing(address, ModuleType::Validator))
}

pub(crate) fn hook_of(code: &Arc<dyn Contract>, address: Address) -> Result<&dyn Hook> {
    code.as_module()
        .and_then(|m| m.as_hook())
        .ok_or_else(|| missing(address, ModuleType::Hook))
}

pub(crate) fn fallback_of(code: &Arc<dyn Contract>, address: Address) -> Result<&dyn Fallback> {
    code.as_module()
        .and_then(|m| m.as_fallback())
        .ok_or_else(|| missing(address, ModuleType::Fallback))
}

pub(crate) fn policy_of(code: &Arc<dyn Contract>, address: Address) -> Result<&dyn Policy> {
    code.as_module()
        .and_then(|m| m.as_policy())
        .ok_or_else(|| missing(address, ModuleType::Policy))
}

pub(crate) fn signer_of(code: &Arc<dyn Contract>, address: Address) -> Result<&dyn Signer> {
    code.as_module()
        .and_then(|m| m.as_signer())
        .ok_or_else(|| missing(address, ModuleType::Signer))
}

/// Leading permission id of a policy/signer install or deinit payload.
pub(crate) fn split_permission_id(module: Address, data: &[u8]) -> Result<(PermissionId, &[u8])> {
    if data.len() < 4 {
        return Err(KernelError::rejected(module, "payload must start with a permission id"));
    }
    Ok((PermissionId([data[0], data[1], data[2], data[3]]), &data[4..]))
}
