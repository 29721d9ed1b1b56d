//! Per-account module registry.
//!
//! This is the account's whole configuration: root identity, epoch counters,
//! validations, permissions, executors and fallback selectors. Write access is
//! crate-private; only the installer and the validation resolver mutate it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::types::{
    ExecutorConfig, HookRef, PermissionConfig, PermissionId, SelectorConfig, ValidationConfig, ValidationIdentity,
};
use crate::encoding::{Address, Hash, Selector};

/// Bumped whenever the persisted layout changes.
pub const REGISTRY_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModuleRegistry {
    pub version: u32,
    root: Option<ValidationIdentity>,
    current_epoch: u32,
    valid_epoch_from: u32,
    validations: HashMap<ValidationIdentity, ValidationConfig>,
    allowed_selectors: HashSet<(ValidationIdentity, Selector)>,
    permissions: HashMap<PermissionId, PermissionConfig>,
    executors: HashMap<Address, ExecutorConfig>,
    selectors: HashMap<Selector, SelectorConfig>,
    /// Hook resolved during validation, consumed by the hook-checked execute.
    #[serde(skip)]
    execution_hooks: HashMap<Hash, HookRef>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            version: REGISTRY_VERSION,
            root: None,
            current_epoch: 0,
            valid_epoch_from: 0,
            validations: HashMap::new(),
            allowed_selectors: HashSet::new(),
            permissions: HashMap::new(),
            executors: HashMap::new(),
            selectors: HashMap::new(),
            execution_hooks: HashMap::new(),
        }
    }

    // --- Reads ---

    pub fn root(&self) -> Option<ValidationIdentity> {
        self.root
    }

    pub fn current_epoch(&self) -> u32 {
        self.current_epoch
    }

    pub fn valid_epoch_from(&self) -> u32 {
        self.valid_epoch_from
    }

    /// Config for `identity`; an unknown identity reads as not installed.
    pub fn validation(&self, identity: &ValidationIdentity) -> ValidationConfig {
        self.validations.get(identity).copied().unwrap_or_default()
    }

    pub fn is_validation_installed(&self, identity: &ValidationIdentity) -> bool {
        self.validation(identity).hook.is_installed()
    }

    pub fn is_selector_allowed(&self, identity: &ValidationIdentity, selector: &Selector) -> bool {
        self.allowed_selectors.contains(&(*identity, *selector))
    }

    pub fn permission(&self, id: &PermissionId) -> Option<&PermissionConfig> {
        self.permissions.get(id)
    }

    pub fn executor(&self, executor: &Address) -> Option<ExecutorConfig> {
        self.executors.get(executor).copied()
    }

    pub fn selector(&self, selector: &Selector) -> Option<SelectorConfig> {
        self.selectors.get(selector).copied()
    }

    pub fn installed_validations(&self) -> Vec<(ValidationIdentity, ValidationConfig)> {
        let mut out: Vec<_> = self
            .validations
            .iter()
            .filter(|(_, c)| c.hook.is_installed())
            .map(|(id, c)| (*id, *c))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn installed_executors(&self) -> Vec<(Address, ExecutorConfig)> {
        let mut out: Vec<_> = self.executors.iter().map(|(a, c)| (*a, *c)).collect();
        out.sort_by_key(|(a, _)| *a);
        out
    }

    pub fn installed_selectors(&self) -> Vec<(Selector, SelectorConfig)> {
        let mut out: Vec<_> = self.selectors.iter().map(|(s, c)| (*s, *c)).collect();
        out.sort_by_key(|(s, _)| *s);
        out
    }

    pub fn allowed_selectors_of(&self, identity: &ValidationIdentity) -> Vec<Selector> {
        let mut out: Vec<_> = self
            .allowed_selectors
            .iter()
            .filter(|(id, _)| id == identity)
            .map(|(_, s)| *s)
            .collect();
        out.sort();
        out
    }

    // --- Writes (installer / resolver only) ---

    pub(crate) fn set_root(&mut self, identity: ValidationIdentity) {
        self.root = Some(identity);
    }

    /// Epoch a (re)installed identity starts at. Reinstalling inside the
    /// current epoch opens a new one so grants from before are not reused.
    pub(crate) fn next_epoch_for(&mut self, identity: &ValidationIdentity) -> u32 {
        if self.validation(identity).epoch == self.current_epoch {
            self.current_epoch += 1;
        }
        self.current_epoch
    }

    pub(crate) fn raise_epoch_floor(&mut self, epoch: u32) {
        self.valid_epoch_from = epoch;
        if self.current_epoch < epoch {
            self.current_epoch = epoch;
        }
    }

    pub(crate) fn set_validation(&mut self, identity: ValidationIdentity, config: ValidationConfig) {
        self.validations.insert(identity, config);
    }

    pub(crate) fn set_validation_hook(&mut self, identity: &ValidationIdentity, hook: HookRef) {
        if let Some(config) = self.validations.get_mut(identity) {
            config.hook = hook;
        }
    }

    /// Marks the identity uninstalled and revokes its selectors. The epoch is
    /// kept so a reinstall in the same epoch still bumps it.
    pub(crate) fn clear_validation(&mut self, identity: &ValidationIdentity) {
        self.set_validation_hook(identity, HookRef::NotInstalled);
        self.allowed_selectors.retain(|(id, _)| id != identity);
    }

    pub(crate) fn grant_selector(&mut self, identity: ValidationIdentity, selector: Selector) {
        self.allowed_selectors.insert((identity, selector));
    }

    pub(crate) fn set_permission(&mut self, id: PermissionId, config: PermissionConfig) {
        self.permissions.insert(id, config);
    }

    pub(crate) fn remove_permission(&mut self, id: &PermissionId) -> Option<PermissionConfig> {
        self.permissions.remove(id)
    }

    pub(crate) fn set_executor(&mut self, executor: Address, config: ExecutorConfig) {
        self.executors.insert(executor, config);
    }

    pub(crate) fn remove_executor(&mut self, executor: &Address) -> Option<ExecutorConfig> {
        self.executors.remove(executor)
    }

    pub(crate) fn set_selector(&mut self, selector: Selector, config: SelectorConfig) {
        self.selectors.insert(selector, config);
    }

    pub(crate) fn remove_selector(&mut self, selector: &Selector) -> Option<SelectorConfig> {
        self.selectors.remove(selector)
    }

    pub(crate) fn record_execution_hook(&mut self, op_hash: Hash, hook: HookRef) {
        self.execution_hooks.insert(op_hash, hook);
    }

    pub(crate) fn take_execution_hook(&mut self, op_hash: &Hash) -> Option<HookRef> {
        self.execution_hooks.remove(op_hash)
    }

    /// Every hook reference held by an installed entry.
    pub fn hook_references(&self) -> Vec<HookRef> {
        self.validations
            .values()
            .map(|c| c.hook)
            .filter(HookRef::is_installed)
            .chain(self.executors.values().map(|c| c.hook))
            .chain(self.selectors.values().map(|c| c.hook))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(n: u64) -> ValidationIdentity {
        ValidationIdentity::Validator(Address::from_low_u64(n))
    }

    #[test]
    fn test_unknown_identity_reads_not_installed() {
        let registry = ModuleRegistry::new();
        let config = registry.validation(&validator(1));
        assert_eq!(config.hook, HookRef::NotInstalled);
        assert_eq!(config.epoch, 0);
        assert!(!registry.is_validation_installed(&validator(1)));
    }

    #[test]
    fn test_epoch_bumps_only_on_same_epoch_reinstall() {
        let mut registry = ModuleRegistry::new();

        // first ever install opens epoch 1
        let e = registry.next_epoch_for(&validator(1));
        assert_eq!(e, 1);
        registry.set_validation(validator(1), ValidationConfig { epoch: e, hook: HookRef::NoHook });

        // a fresh identity joins the current epoch
        assert_eq!(registry.next_epoch_for(&validator(2)), 1);

        // reinstalling validator 1 inside epoch 1 opens epoch 2
        registry.clear_validation(&validator(1));
        assert_eq!(registry.next_epoch_for(&validator(1)), 2);
    }

    #[test]
    fn test_raise_floor_drags_current_epoch() {
        let mut registry = ModuleRegistry::new();
        registry.next_epoch_for(&validator(1));
        registry.raise_epoch_floor(5);
        assert_eq!(registry.valid_epoch_from(), 5);
        assert_eq!(registry.current_epoch(), 5);
    }

    #[test]
    fn test_clear_validation_revokes_selectors() {
        let mut registry = ModuleRegistry::new();
        let sel = Selector([1, 2, 3, 4]);
        registry.set_validation(validator(1), ValidationConfig { epoch: 1, hook: HookRef::NoHook });
        registry.grant_selector(validator(1), sel);
        assert!(registry.is_selector_allowed(&validator(1), &sel));

        registry.clear_validation(&validator(1));
        assert!(!registry.is_selector_allowed(&validator(1), &sel));
        assert_eq!(registry.validation(&validator(1)).epoch, 1);
    }

    #[test]
    fn test_snapshot_roundtrip_drops_transient_hooks() {
        let mut registry = ModuleRegistry::new();
        registry.set_root(validator(1));
        registry.record_execution_hook([7u8; 32], HookRef::NoHook);

        let bytes = bincode::serialize(&registry).unwrap();
        let mut restored: ModuleRegistry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.root(), Some(validator(1)));
        assert_eq!(restored.take_execution_hook(&[7u8; 32]), None);
    }
}
