//! Module installer.
//!
//! The only writer of the registry besides the validation resolver. Registry
//! entries are written before a module's `on_install` runs, so a module that
//! calls back into the account already sees itself installed.

use tracing::{info, warn};

use super::calls::{
    ExecutorInstall, FallbackInstall, FallbackUninstall, KernelCall, PermissionInstall, PermissionModuleUninstall,
    ValidatorInstall,
};
use super::kernel::Kernel;
use super::mode::CallType;
use super::types::{
    ExecutorConfig, HookRef, ModuleType, PermissionConfig, PermissionId, SelectorConfig, ValidationConfig,
    ValidationIdentity,
};
use crate::chain::{Chain, Event};
use crate::encoding::{self, Address, Selector};
use crate::error::{KernelError, Result};
use crate::modules::{fallback_of, load_module, module_of, Module, ModuleContext};

fn with_permission_id(id: PermissionId, data: &[u8]) -> Vec<u8> {
    let mut out = id.0.to_vec();
    out.extend_from_slice(data);
    out
}

impl Kernel {
    pub fn install_module(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        module_type: u8,
        module: Address,
        init_data: &[u8],
    ) -> Result<()> {
        let call = KernelCall::InstallModule {
            module_type,
            module,
            init_data: init_data.to_vec(),
        }
        .encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| {
                k.install_module_inner(chain, module_type, module, init_data)
            })
        })
    }

    pub fn uninstall_module(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        module_type: u8,
        module: Address,
        deinit_data: &[u8],
    ) -> Result<()> {
        let call = KernelCall::UninstallModule {
            module_type,
            module,
            deinit_data: deinit_data.to_vec(),
        }
        .encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| {
                k.uninstall_module_inner(chain, module_type, module, deinit_data)
            })
        })
    }

    pub fn change_root_identity(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        identity: ValidationIdentity,
        hook: HookRef,
        validator_data: &[u8],
        hook_data: &[u8],
    ) -> Result<()> {
        let call = KernelCall::ChangeRootIdentity {
            identity,
            hook,
            validator_data: validator_data.to_vec(),
            hook_data: hook_data.to_vec(),
        }
        .encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| {
                k.set_root_identity(chain, identity, hook, validator_data, hook_data)
            })
        })
    }

    /// Voids every grant issued before `epoch`.
    pub fn invalidate_epoch(&mut self, chain: &mut Chain, caller: Address, epoch: u32) -> Result<()> {
        let call = KernelCall::InvalidateEpoch { epoch }.encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| k.invalidate_epoch_inner(chain, epoch))
        })
    }

    pub fn install_permission(&mut self, chain: &mut Chain, caller: Address, install: &PermissionInstall) -> Result<()> {
        let call = KernelCall::InstallPermission(install.clone()).encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| k.install_permission_inner(chain, install))
        })
    }

    pub fn uninstall_permission(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        id: PermissionId,
        deinit_data: &[u8],
    ) -> Result<()> {
        let call = KernelCall::UninstallPermission {
            id,
            deinit_data: deinit_data.to_vec(),
        }
        .encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| {
                k.uninstall_permission_inner(chain, id, deinit_data)
            })
        })
    }

    // --- install ---

    pub(crate) fn install_module_inner(
        &mut self,
        chain: &mut Chain,
        module_type: u8,
        module: Address,
        init_data: &[u8],
    ) -> Result<()> {
        let module_type = ModuleType::from_id(module_type)?;
        match module_type {
            ModuleType::Validator => {
                let install: ValidatorInstall = encoding::decode(init_data)?;
                return self.install_validator(chain, module, &install);
            }
            ModuleType::Executor => {
                let install: ExecutorInstall = encoding::decode(init_data)?;
                self.install_executor(chain, module, &install)?;
            }
            ModuleType::Fallback => {
                let install: FallbackInstall = encoding::decode(init_data)?;
                self.install_fallback(chain, module, &install)?;
            }
            ModuleType::Hook | ModuleType::Policy | ModuleType::Signer => {
                // attachments only: initialize, never track
                let code = load_module(chain, module, module_type)?;
                let m = module_of(&code, module, module_type)?;
                let mut ctx = ModuleContext::new(chain, module, self.address());
                m.on_install(&mut ctx, init_data)?;
            }
        }
        self.emit_installed(chain, module_type, module);
        Ok(())
    }

    pub(crate) fn install_validator(&mut self, chain: &mut Chain, module: Address, install: &ValidatorInstall) -> Result<()> {
        let identity = ValidationIdentity::Validator(module);
        if self.registry.is_validation_installed(&identity) {
            return Err(KernelError::AlreadyInstalled {
                module_type: ModuleType::Validator.id(),
                module,
            });
        }
        let code = load_module(chain, module, ModuleType::Validator)?;
        let validator = module_of(&code, module, ModuleType::Validator)?;

        let hook = install.hook.normalized();
        let epoch = self.registry.next_epoch_for(&identity);
        self.registry.set_validation(identity, ValidationConfig { epoch, hook });
        if let Some(selector) = install.selector {
            self.grant_selector(chain, identity, selector);
        }

        {
            let mut ctx = ModuleContext::new(chain, module, self.address());
            validator.on_install(&mut ctx, &install.validator_data)?;
        }
        self.attach_hook(chain, hook, &install.hook_data, false)?;
        self.emit_installed(chain, ModuleType::Validator, module);
        info!("validator {} installed on {} at epoch {}", module, self.address(), epoch);
        Ok(())
    }

    fn install_executor(&mut self, chain: &mut Chain, module: Address, install: &ExecutorInstall) -> Result<()> {
        if self.registry.executor(&module).is_some() {
            return Err(KernelError::AlreadyInstalled {
                module_type: ModuleType::Executor.id(),
                module,
            });
        }
        let code = load_module(chain, module, ModuleType::Executor)?;
        let executor = module_of(&code, module, ModuleType::Executor)?;

        let hook = install.hook.normalized();
        self.registry.set_executor(module, ExecutorConfig { hook });
        {
            let mut ctx = ModuleContext::new(chain, module, self.address());
            executor.on_install(&mut ctx, &install.executor_data)?;
        }
        self.attach_hook(chain, hook, &install.hook_data, true)?;
        info!("executor {} installed on {} (hook {})", module, self.address(), hook);
        Ok(())
    }

    fn install_fallback(&mut self, chain: &mut Chain, module: Address, install: &FallbackInstall) -> Result<()> {
        let selector = install.selector;
        if self.registry.selector(&selector).is_some() || KernelCall::is_native(&selector) {
            return Err(KernelError::SelectorTaken(selector));
        }
        match install.call_type {
            CallType::Single => {}
            CallType::DelegateCall if self.delegate_call_enabled() => {}
            other => return Err(KernelError::UnsupportedCallType(other.to_byte())),
        }

        let code = load_module(chain, module, ModuleType::Fallback)?;
        let fallback = fallback_of(&code, module)?;
        if !fallback.supports_selector(&selector) {
            return Err(KernelError::rejected(module, format!("selector {} not served", selector)));
        }

        let hook = install.hook.normalized();
        self.registry.set_selector(
            selector,
            SelectorConfig {
                hook,
                target: module,
                call_type: install.call_type,
            },
        );
        {
            let mut ctx = ModuleContext::new(chain, module, self.address());
            fallback.on_install(&mut ctx, &install.fallback_data)?;
        }
        self.attach_hook(chain, hook, &install.hook_data, true)?;
        info!("fallback {} serves {} on {}", module, selector, self.address());
        Ok(())
    }

    /// Initializes the hook paired with an entry. `force` re-runs `on_install`
    /// even when the hook already holds state for this account.
    fn attach_hook(&mut self, chain: &mut Chain, hook: HookRef, data: &[u8], force: bool) -> Result<()> {
        let address = match hook {
            HookRef::Module(address) => address,
            _ => return Ok(()),
        };
        let code = load_module(chain, address, ModuleType::Hook)?;
        let m = module_of(&code, address, ModuleType::Hook)?;
        let mut ctx = ModuleContext::new(chain, address, self.address());
        if force || !m.is_initialized(&ctx) {
            m.on_install(&mut ctx, data)?;
        }
        Ok(())
    }

    fn grant_selector(&mut self, chain: &mut Chain, identity: ValidationIdentity, selector: Selector) {
        self.registry.grant_selector(identity, selector);
        chain.emit(Event::SelectorGranted {
            account: self.address(),
            identity,
            selector,
        });
    }

    fn emit_installed(&self, chain: &mut Chain, module_type: ModuleType, module: Address) {
        chain.emit(Event::ModuleInstalled {
            account: self.address(),
            module_type,
            module,
        });
    }

    pub(crate) fn install_permission_inner(&mut self, chain: &mut Chain, install: &PermissionInstall) -> Result<()> {
        let id = install.id;
        let identity = ValidationIdentity::Permission(id);
        if self.registry.is_validation_installed(&identity) {
            return Err(KernelError::PermissionInstalled(id));
        }

        // capability checks before any write
        let signer_code = load_module(chain, install.signer, ModuleType::Signer)?;
        let mut policy_codes = Vec::with_capacity(install.policies.len());
        for (entry, _) in &install.policies {
            policy_codes.push(load_module(chain, entry.policy, ModuleType::Policy)?);
        }

        let hook = install.hook.normalized();
        let epoch = self.registry.next_epoch_for(&identity);
        self.registry.set_validation(identity, ValidationConfig { epoch, hook });
        self.registry.set_permission(
            id,
            PermissionConfig {
                policies: install.policies.iter().map(|(entry, _)| *entry).collect(),
                signer: install.signer,
            },
        );
        if let Some(selector) = install.selector {
            self.grant_selector(chain, identity, selector);
        }

        for ((entry, data), code) in install.policies.iter().zip(&policy_codes) {
            let policy = module_of(code, entry.policy, ModuleType::Policy)?;
            let mut ctx = ModuleContext::new(chain, entry.policy, self.address());
            policy.on_install(&mut ctx, &with_permission_id(id, data))?;
        }
        {
            let signer = module_of(&signer_code, install.signer, ModuleType::Signer)?;
            let mut ctx = ModuleContext::new(chain, install.signer, self.address());
            signer.on_install(&mut ctx, &with_permission_id(id, &install.signer_data))?;
        }
        self.attach_hook(chain, hook, &install.hook_data, false)?;

        for (entry, _) in &install.policies {
            self.emit_installed(chain, ModuleType::Policy, entry.policy);
        }
        self.emit_installed(chain, ModuleType::Signer, install.signer);
        info!(
            "permission {} installed on {} with {} policies",
            id,
            self.address(),
            install.policies.len()
        );
        Ok(())
    }

    // --- root ---

    pub(crate) fn set_root_identity(
        &mut self,
        chain: &mut Chain,
        identity: ValidationIdentity,
        hook: HookRef,
        validator_data: &[u8],
        hook_data: &[u8],
    ) -> Result<()> {
        if self.registry.root() == Some(identity) {
            return Err(KernelError::AlreadyRoot(identity));
        }
        let installed = self.registry.is_validation_installed(&identity);
        match identity {
            ValidationIdentity::Root => return Err(KernelError::InvalidValidationType),
            ValidationIdentity::Validator(module) if !installed => {
                let install = ValidatorInstall {
                    hook,
                    validator_data: validator_data.to_vec(),
                    hook_data: hook_data.to_vec(),
                    selector: None,
                };
                self.install_validator(chain, module, &install)?;
            }
            ValidationIdentity::Permission(id) if !installed => {
                return Err(KernelError::PermissionNotInstalled(id));
            }
            _ => {
                // already installed: the requested hook replaces the old one
                let epoch = self.registry.validation(&identity).epoch;
                let hook = hook.normalized();
                self.registry.set_validation(identity, ValidationConfig { epoch, hook });
                self.attach_hook(chain, hook, hook_data, false)?;
            }
        }
        self.registry.set_root(identity);
        chain.emit(Event::RootIdentityChanged {
            account: self.address(),
            identity,
        });
        info!("root of {} is now {}", self.address(), identity);
        Ok(())
    }

    pub(crate) fn invalidate_epoch_inner(&mut self, chain: &mut Chain, epoch: u32) -> Result<()> {
        let floor = self.registry.valid_epoch_from();
        if epoch <= floor {
            return Err(KernelError::EpochNotIncreasing { floor, requested: epoch });
        }
        self.registry.raise_epoch_floor(epoch);
        chain.emit(Event::EpochInvalidated {
            account: self.address(),
            epoch,
        });
        info!("grants of {} before epoch {} invalidated", self.address(), epoch);
        Ok(())
    }

    // --- uninstall ---

    pub(crate) fn uninstall_module_inner(
        &mut self,
        chain: &mut Chain,
        module_type: u8,
        module: Address,
        deinit_data: &[u8],
    ) -> Result<()> {
        let module_type = ModuleType::from_id(module_type)?;
        let not_installed = KernelError::NotInstalled {
            module_type: module_type.id(),
            module,
        };

        let module_data = match module_type {
            ModuleType::Validator => {
                let identity = ValidationIdentity::Validator(module);
                if self.registry.root() == Some(identity) {
                    return Err(KernelError::RootCannotBeRemoved);
                }
                if !self.registry.is_validation_installed(&identity) {
                    return Err(not_installed);
                }
                self.registry.clear_validation(&identity);
                deinit_data.to_vec()
            }
            ModuleType::Executor => {
                self.registry.remove_executor(&module).ok_or(not_installed)?;
                deinit_data.to_vec()
            }
            ModuleType::Fallback => {
                let uninstall: FallbackUninstall = encoding::decode(deinit_data)?;
                match self.registry.selector(&uninstall.selector) {
                    Some(config) if config.target == module => {}
                    _ => return Err(not_installed),
                }
                self.registry.remove_selector(&uninstall.selector);
                uninstall.fallback_data
            }
            ModuleType::Hook => {
                if self.backs_root(module) {
                    return Err(KernelError::RootCannotBeRemoved);
                }
                load_module(chain, module, ModuleType::Hook)?;
                // keep the root operable
                if let Some(root) = self.registry.root() {
                    if self.registry.validation(&root).hook == HookRef::Module(module) {
                        self.registry.set_validation_hook(&root, HookRef::NoHook);
                        info!("root hook {} of {} reset to no-hook", module, self.address());
                    }
                }
                deinit_data.to_vec()
            }
            ModuleType::Policy | ModuleType::Signer => {
                let uninstall: PermissionModuleUninstall = encoding::decode(deinit_data)?;
                if self.registry.root() == Some(ValidationIdentity::Permission(uninstall.id)) || self.backs_root(module) {
                    return Err(KernelError::RootCannotBeRemoved);
                }
                let attached = self.registry.permission(&uninstall.id).map_or(false, |config| match module_type {
                    ModuleType::Policy => config.policies.iter().any(|entry| entry.policy == module),
                    _ => config.signer == module,
                });
                if !attached {
                    return Err(not_installed);
                }
                with_permission_id(uninstall.id, &uninstall.data)
            }
        };

        self.notify_uninstall(chain, module_type, module, &module_data);
        chain.emit(Event::ModuleUninstalled {
            account: self.address(),
            module_type,
            module,
        });
        info!("{} {} uninstalled from {}", module_type, module, self.address());
        Ok(())
    }

    pub(crate) fn uninstall_permission_inner(&mut self, chain: &mut Chain, id: PermissionId, deinit_data: &[u8]) -> Result<()> {
        let identity = ValidationIdentity::Permission(id);
        if self.registry.root() == Some(identity) {
            return Err(KernelError::RootCannotBeRemoved);
        }
        if !self.registry.is_validation_installed(&identity) {
            return Err(KernelError::PermissionNotInstalled(id));
        }
        self.registry.clear_validation(&identity);
        let config = self
            .registry
            .remove_permission(&id)
            .ok_or(KernelError::PermissionNotInstalled(id))?;

        let data = with_permission_id(id, deinit_data);
        for entry in &config.policies {
            self.notify_uninstall(chain, ModuleType::Policy, entry.policy, &data);
            chain.emit(Event::ModuleUninstalled {
                account: self.address(),
                module_type: ModuleType::Policy,
                module: entry.policy,
            });
        }
        self.notify_uninstall(chain, ModuleType::Signer, config.signer, &data);
        chain.emit(Event::ModuleUninstalled {
            account: self.address(),
            module_type: ModuleType::Signer,
            module: config.signer,
        });
        info!("permission {} removed from {}", id, self.address());
        Ok(())
    }

    /// Whether `module` is the root validator or a policy or signer of the
    /// root permission. Its `on_uninstall` would leave the root unable to
    /// authorize.
    fn backs_root(&self, module: Address) -> bool {
        match self.registry.root() {
            Some(ValidationIdentity::Validator(root)) => root == module,
            Some(ValidationIdentity::Permission(id)) => self.registry.permission(&id).map_or(false, |config| {
                config.signer == module || config.policies.iter().any(|entry| entry.policy == module)
            }),
            _ => false,
        }
    }

    /// Runs the module's `on_uninstall`; its failure is reported, never fatal.
    fn notify_uninstall(&mut self, chain: &mut Chain, module_type: ModuleType, module: Address, data: &[u8]) {
        let snapshot = chain.snapshot();
        let result = self.call_on_uninstall(chain, module_type, module, data);
        let success = result.is_ok();
        if let Err(e) = result {
            chain.restore(snapshot);
            warn!("on_uninstall of {} failed on {}: {}", module, self.address(), e);
        }
        chain.emit(Event::ModuleUninstallResult {
            account: self.address(),
            module,
            success,
        });
    }

    fn call_on_uninstall(&self, chain: &mut Chain, module_type: ModuleType, module: Address, data: &[u8]) -> Result<()> {
        let code = chain.code_at(&module)?;
        let m = module_of(&code, module, module_type)?;
        let mut ctx = ModuleContext::new(chain, module, self.address());
        m.on_uninstall(&mut ctx, data)
    }
}
