//! The account: identity, configuration and the native dispatch table.
//!
//! Every public entry point runs atomically: on `Err` both the registry and
//! the chain state are put back to where they were when the entry point was
//! entered. Behavior is split by concern across the sibling modules
//! (`validation`, `hooks`, `execution`, `fallback`, `installer`, `signature`);
//! this file holds the state, the access rules and the routing between them.

use serde::{Deserialize, Serialize};

use super::calls::{KernelCall, EXECUTE_USER_OP};
use super::registry::ModuleRegistry;
use super::types::{HookRef, ModuleType, ValidationIdentity};
use crate::chain::Chain;
use crate::config::AccountSettings;
use crate::encoding::{self, Address, Selector};
use crate::error::{KernelError, Result};
use crate::modules::load_module;

pub const ACCOUNT_ID: &str = "compass.kernel.v1";

#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    address: Address,
    entry_point: Address,
    delegate_call_enabled: bool,
    pub(crate) registry: ModuleRegistry,
}

/// Persisted form of an account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AccountRecord {
    pub address: Address,
    pub entry_point: Address,
    pub delegate_call_enabled: bool,
    pub registry: ModuleRegistry,
}

impl Kernel {
    pub fn new(address: Address, entry_point: Address) -> Self {
        Self {
            address,
            entry_point,
            delegate_call_enabled: false,
            registry: ModuleRegistry::new(),
        }
    }

    pub fn from_settings(address: Address, settings: &AccountSettings) -> Self {
        Self::new(address, settings.entry_point).with_delegate_call(settings.delegate_call_enabled)
    }

    pub fn with_delegate_call(mut self, enabled: bool) -> Self {
        self.delegate_call_enabled = enabled;
        self
    }

    pub fn from_record(record: AccountRecord) -> Self {
        Self {
            address: record.address,
            entry_point: record.entry_point,
            delegate_call_enabled: record.delegate_call_enabled,
            registry: record.registry,
        }
    }

    pub fn to_record(&self) -> AccountRecord {
        AccountRecord {
            address: self.address,
            entry_point: self.entry_point,
            delegate_call_enabled: self.delegate_call_enabled,
            registry: self.registry.clone(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn delegate_call_enabled(&self) -> bool {
        self.delegate_call_enabled
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.root().is_some()
    }

    pub fn account_id(&self) -> &'static str {
        ACCOUNT_ID
    }

    /// Installs the first root identity. Only callable once.
    pub fn initialize(
        &mut self,
        chain: &mut Chain,
        identity: ValidationIdentity,
        hook: HookRef,
        validator_data: &[u8],
        hook_data: &[u8],
    ) -> Result<()> {
        if self.is_initialized() {
            return Err(KernelError::AlreadyInitialized);
        }
        self.atomically(chain, |k, chain| {
            k.set_root_identity(chain, identity, hook, validator_data, hook_data)
        })
    }

    /// Runs `f`, rolling back the registry and the chain if it fails.
    pub(crate) fn atomically<T, F>(&mut self, chain: &mut Chain, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self, &mut Chain) -> Result<T>,
    {
        let registry = self.registry.clone();
        let snapshot = chain.snapshot();
        let result = f(self, chain);
        if result.is_err() {
            self.registry = registry;
            chain.restore(snapshot);
        }
        result
    }

    /// Runs `f` and always rolls back.
    pub(crate) fn view<T, F>(&mut self, chain: &mut Chain, f: F) -> T
    where
        F: FnOnce(&mut Self, &mut Chain) -> T,
    {
        let registry = self.registry.clone();
        let snapshot = chain.snapshot();
        let out = f(self, chain);
        self.registry = registry;
        chain.restore(snapshot);
        out
    }

    pub(crate) fn is_trusted(&self, caller: Address) -> bool {
        caller == self.entry_point || caller == self.address
    }

    /// Access rule for the privileged native entry points.
    ///
    /// The entry point and the account itself pass straight through. Anyone
    /// else only gets in when the root validator doubles as a hook, in which
    /// case the call runs wrapped by it.
    pub(crate) fn privileged<T, F>(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        value: u128,
        data: &[u8],
        action: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Self, &mut Chain) -> Result<T>,
    {
        if self.is_trusted(caller) {
            return action(self, chain);
        }
        match self.registry.root() {
            Some(ValidationIdentity::Validator(root)) if is_hook_capable(chain, root) => {
                self.run_wrapped(chain, HookRef::Module(root), caller, value, data, action)
            }
            _ => Err(KernelError::InvalidCaller(caller)),
        }
    }

    /// Raw call into the account: native entry points first, then the
    /// fallback router.
    pub fn handle_call(&mut self, chain: &mut Chain, caller: Address, value: u128, data: &[u8]) -> Result<Vec<u8>> {
        self.atomically(chain, |k, chain| {
            if value > 0 && caller != k.address {
                chain.transfer(&caller, &k.address, value)?;
            }
            k.dispatch(chain, caller, value, data)
        })
    }

    /// Routing without the value transfer; also the path for calls the
    /// account makes to itself.
    pub(crate) fn dispatch(&mut self, chain: &mut Chain, caller: Address, value: u128, data: &[u8]) -> Result<Vec<u8>> {
        if Selector::from_calldata(data) == Some(*EXECUTE_USER_OP) {
            // only reachable through `execute_user_op`, which carries the op hash
            return Err(if caller == self.entry_point {
                KernelError::UnknownOperation
            } else {
                KernelError::NotEntryPoint(caller)
            });
        }

        let call = match KernelCall::decode(data)? {
            Some(call) => call,
            None => return self.route_fallback(chain, caller, value, data),
        };

        match call {
            KernelCall::ExecuteFromExecutor { mode, execution_data } => {
                let outcomes = self.executor_dispatch(chain, caller, mode, &execution_data)?;
                encoding::encode(&outcomes)
            }
            call => self.privileged(chain, caller, value, data, |k, chain| k.native(chain, call)),
        }
    }

    fn native(&mut self, chain: &mut Chain, call: KernelCall) -> Result<Vec<u8>> {
        match call {
            KernelCall::Execute { mode, execution_data } => {
                let outcomes = self.dispatch_execution(chain, &mode, &execution_data)?;
                encoding::encode(&outcomes)
            }
            KernelCall::ExecuteFromExecutor { .. } => Err(KernelError::InvalidExecutor(self.address)),
            KernelCall::InstallModule {
                module_type,
                module,
                init_data,
            } => self.install_module_inner(chain, module_type, module, &init_data).map(|_| Vec::new()),
            KernelCall::UninstallModule {
                module_type,
                module,
                deinit_data,
            } => self
                .uninstall_module_inner(chain, module_type, module, &deinit_data)
                .map(|_| Vec::new()),
            KernelCall::ChangeRootIdentity {
                identity,
                hook,
                validator_data,
                hook_data,
            } => self
                .set_root_identity(chain, identity, hook, &validator_data, &hook_data)
                .map(|_| Vec::new()),
            KernelCall::InvalidateEpoch { epoch } => self.invalidate_epoch_inner(chain, epoch).map(|_| Vec::new()),
            KernelCall::InstallPermission(install) => self.install_permission_inner(chain, &install).map(|_| Vec::new()),
            KernelCall::UninstallPermission { id, deinit_data } => self
                .uninstall_permission_inner(chain, id, &deinit_data)
                .map(|_| Vec::new()),
        }
    }

    /// Whether `module` currently occupies a `module_type` slot. `context`
    /// names the slot for keyed types: a selector for fallbacks, a permission
    /// id for policies and signers.
    pub fn is_module_installed(&self, module_type: u8, module: Address, context: &[u8]) -> bool {
        let module_type = match ModuleType::from_id(module_type) {
            Ok(t) => t,
            Err(_) => return false,
        };
        match module_type {
            ModuleType::Validator => self.registry.is_validation_installed(&ValidationIdentity::Validator(module)),
            ModuleType::Executor => self.registry.executor(&module).is_some(),
            ModuleType::Fallback => Selector::from_calldata(context)
                .and_then(|s| self.registry.selector(&s))
                .map(|c| c.target == module)
                .unwrap_or(false),
            ModuleType::Hook => self.registry.hook_references().contains(&HookRef::Module(module)),
            ModuleType::Policy | ModuleType::Signer => {
                if context.len() < 4 {
                    return false;
                }
                let id = super::types::PermissionId([context[0], context[1], context[2], context[3]]);
                self.registry
                    .permission(&id)
                    .map(|p| {
                        if module_type == ModuleType::Signer {
                            p.signer == module
                        } else {
                            p.policies.iter().any(|e| e.policy == module)
                        }
                    })
                    .unwrap_or(false)
            }
        }
    }

    pub fn supports_module(&self, module_type: u8) -> bool {
        ModuleType::from_id(module_type).is_ok()
    }
}

fn is_hook_capable(chain: &Chain, module: Address) -> bool {
    load_module(chain, module, ModuleType::Hook).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::calls::{ExecutorInstall, FallbackInstall};
    use crate::account::mode::{encode_single, CallType, CallOutcome, Execution, ExecutionMode};
    use crate::test_support::{Counter, EchoFallback, Fixture, OwnerGate, ACCOUNT, ENTRY_POINT};
    use std::sync::Arc;

    #[test]
    fn test_initialize_once() {
        let mut fx = Fixture::new();
        assert!(fx.kernel.is_initialized());
        let root = fx.kernel.registry().root();
        let err = fx
            .kernel
            .initialize(&mut fx.chain, root.unwrap(), HookRef::NoHook, &[], &[])
            .unwrap_err();
        assert_eq!(err, KernelError::AlreadyInitialized);
    }

    #[test]
    fn test_strangers_cannot_reach_privileged_entry_points() {
        let mut fx = Fixture::new();
        let stranger = Address::from_low_u64(0x5757);
        let call = KernelCall::InvalidateEpoch { epoch: 9 }.encode().unwrap();

        let err = fx.kernel.handle_call(&mut fx.chain, stranger, 0, &call).unwrap_err();
        assert_eq!(err, KernelError::InvalidCaller(stranger));
        assert_eq!(fx.kernel.registry().valid_epoch_from(), 0);

        fx.kernel.handle_call(&mut fx.chain, ENTRY_POINT, 0, &call).unwrap();
        assert_eq!(fx.kernel.registry().valid_epoch_from(), 9);
    }

    #[test]
    fn test_root_hook_opens_privileged_access() {
        let mut fx = Fixture::new();
        let gate = Address::from_low_u64(0x6a7e);
        let owner = Address::from_low_u64(0x0a11ce);
        fx.chain.deploy(gate, Arc::new(OwnerGate)).unwrap();
        fx.kernel
            .change_root_identity(
                &mut fx.chain,
                ENTRY_POINT,
                ValidationIdentity::Validator(gate),
                HookRef::NoHook,
                owner.as_bytes(),
                &[],
            )
            .unwrap();

        let call = KernelCall::InvalidateEpoch { epoch: 3 }.encode().unwrap();
        let stranger = Address::from_low_u64(0x5757);
        assert!(fx.kernel.handle_call(&mut fx.chain, stranger, 0, &call).is_err());
        fx.kernel.handle_call(&mut fx.chain, owner, 0, &call).unwrap();
        assert_eq!(fx.kernel.registry().valid_epoch_from(), 3);
    }

    #[test]
    fn test_execute_through_raw_call() {
        let mut fx = Fixture::new();
        let counter = Address::from_low_u64(0xc0);
        fx.chain.deploy(counter, Arc::new(Counter)).unwrap();

        let call = KernelCall::Execute {
            mode: ExecutionMode::single().encode(),
            execution_data: encode_single(&Execution::new(counter, 0, b"inc".to_vec())),
        }
        .encode()
        .unwrap();
        let out = fx.kernel.handle_call(&mut fx.chain, ENTRY_POINT, 0, &call).unwrap();
        let outcomes: Vec<CallOutcome> = encoding::decode(&out).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(Counter::count(&fx.chain, &counter), 1);
    }

    #[test]
    fn test_module_slots_are_unique() {
        let mut fx = Fixture::new();
        let executor = Address::from_low_u64(0xe1);
        fx.chain.deploy(executor, Arc::new(crate::test_support::NoopExecutor)).unwrap();
        let install = encoding::encode(&ExecutorInstall {
            hook: HookRef::NoHook,
            executor_data: vec![],
            hook_data: vec![],
        })
        .unwrap();

        fx.install_module(ModuleType::Executor, executor, &install).unwrap();
        let err = fx.install_module(ModuleType::Executor, executor, &install).unwrap_err();
        assert!(matches!(err, KernelError::AlreadyInstalled { .. }));
        assert_eq!(fx.kernel.registry().installed_executors().len(), 1);

        let fallback = Address::from_low_u64(0xfb);
        let other = Address::from_low_u64(0xfc);
        fx.chain.deploy(fallback, Arc::new(EchoFallback)).unwrap();
        fx.chain.deploy(other, Arc::new(EchoFallback)).unwrap();
        let selector = Selector::from_signature("ping()");
        let fb = |hook| {
            encoding::encode(&FallbackInstall {
                selector,
                hook,
                call_type: CallType::Single,
                fallback_data: vec![],
                hook_data: vec![],
            })
            .unwrap()
        };
        fx.install_module(ModuleType::Fallback, fallback, &fb(HookRef::NoHook)).unwrap();
        let err = fx.install_module(ModuleType::Fallback, other, &fb(HookRef::NoHook)).unwrap_err();
        assert_eq!(err, KernelError::SelectorTaken(selector));
        assert!(fx
            .kernel
            .is_module_installed(ModuleType::Fallback.id(), fallback, &selector.0));
        assert!(!fx.kernel.is_module_installed(ModuleType::Fallback.id(), other, &selector.0));
    }

    #[test]
    fn test_record_roundtrip() {
        let fx = Fixture::new();
        let record = fx.kernel.to_record();
        assert_eq!(record.address, ACCOUNT);
        assert_eq!(Kernel::from_record(record), fx.kernel);
    }

    #[test]
    fn test_supported_module_types() {
        let fx = Fixture::new();
        assert!((1..=6).all(|t| fx.kernel.supports_module(t)));
        assert!(!fx.kernel.supports_module(0));
        assert!(!fx.kernel.supports_module(7));
        assert_eq!(fx.kernel.account_id(), ACCOUNT_ID);
    }
}
