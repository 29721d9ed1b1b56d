//! Shared fixture and toy contracts for unit tests.

use crate::account::routing::{RoutingTag, ValidationData};
use crate::account::types::{HookRef, ModuleType, UserOperation, ValidationIdentity};
use crate::account::Kernel;
use crate::chain::{CallContext, Chain, Contract};
use crate::crypto::KeyPair;
use crate::encoding::{self, Address, Hash, Selector};
use crate::entry_point::EntryPoint;
use crate::error::{KernelError, Result};
use crate::modules::{Ed25519Validator, Executor, Fallback, Hook, Module, ModuleContext, Validator};
use std::sync::Arc;

pub const CHAIN_ID: u64 = 31337;
pub const ACCOUNT: Address = Address::from_low_u64(0xacc0);
pub const ENTRY_POINT: Address = Address::from_low_u64(0x4337);
pub const ROOT_VALIDATOR: Address = Address::from_low_u64(0x11);

/// Account initialized with an Ed25519 root validator, plus an entry point.
pub struct Fixture {
    pub chain: Chain,
    pub kernel: Kernel,
    pub entry_point: EntryPoint,
    pub root_key: KeyPair,
}

impl Fixture {
    pub fn new() -> Self {
        let mut chain = Chain::new(CHAIN_ID, 1_000);
        chain.deploy(ROOT_VALIDATOR, Arc::new(Ed25519Validator)).unwrap();
        let root_key = KeyPair::from_seed(&[1u8; 32]);
        let mut kernel = Kernel::new(ACCOUNT, ENTRY_POINT);
        kernel
            .initialize(
                &mut chain,
                ValidationIdentity::Validator(ROOT_VALIDATOR),
                HookRef::NoHook,
                &root_key.public_key_bytes(),
                &[],
            )
            .unwrap();
        Self {
            chain,
            kernel,
            entry_point: EntryPoint::new(ENTRY_POINT),
            root_key,
        }
    }

    pub fn install_module(&mut self, module_type: ModuleType, module: Address, data: &[u8]) -> Result<()> {
        self.kernel
            .install_module(&mut self.chain, ENTRY_POINT, module_type.id(), module, data)
    }

    pub fn uninstall_module(&mut self, module_type: ModuleType, module: Address, data: &[u8]) -> Result<()> {
        self.kernel
            .uninstall_module(&mut self.chain, ENTRY_POINT, module_type.id(), module, data)
    }

    pub fn signed_op(&self, tag: RoutingTag, call_data: Vec<u8>) -> UserOperation {
        self.signed_op_with(&self.root_key, tag, call_data)
    }

    pub fn signed_op_with(&self, key: &KeyPair, tag: RoutingTag, call_data: Vec<u8>) -> UserOperation {
        let op = UserOperation {
            sender: self.kernel.address(),
            nonce: tag.encode(),
            call_data,
            prefund: 0,
            signature: Vec::new(),
        };
        self.sign_with(key, op)
    }

    /// Signs `op` again with the root key after fields were changed.
    pub fn resign(&self, op: UserOperation) -> UserOperation {
        self.sign_with(&self.root_key, op)
    }

    fn sign_with(&self, key: &KeyPair, op: UserOperation) -> UserOperation {
        let hash = self.entry_point.user_op_hash(&self.chain, &op);
        op.with_signature(key.sign_bytes(&hash))
    }
}

fn read_u64(chain: &Chain, owner: &Address, key: &[u8]) -> u64 {
    chain
        .state()
        .load(owner, key)
        .and_then(|raw| encoding::decode::<u64>(raw).ok())
        .unwrap_or(0)
}

/// `inc*` bumps a counter in the running frame's storage; `fail` reverts.
/// Also installable as a fallback for selectors starting with `inc`.
pub struct Counter;

impl Counter {
    pub fn count(chain: &Chain, at: &Address) -> u64 {
        read_u64(chain, at, b"count")
    }
}

impl Contract for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    fn call(&self, ctx: &mut CallContext<'_>, data: &[u8]) -> Result<Vec<u8>> {
        if data.starts_with(b"inc") {
            let next = read_u64(ctx.chain, &ctx.this, b"count") + 1;
            ctx.store(b"count", encoding::encode(&next)?);
            ctx.emit("inc", next.to_be_bytes().to_vec());
            return Ok(next.to_be_bytes().to_vec());
        }
        Err(KernelError::CallFailed(format!("counter: unknown call {:?}", data)))
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for Counter {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Fallback
    }

    fn on_install(&self, _ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_uninstall(&self, _ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn is_initialized(&self, _ctx: &ModuleContext<'_>) -> bool {
        false
    }

    fn as_fallback(&self) -> Option<&dyn Fallback> {
        Some(self)
    }
}

impl Fallback for Counter {
    fn supports_selector(&self, selector: &Selector) -> bool {
        selector.0.starts_with(b"inc")
    }
}

/// Fallback returning the original caller appended to its call data.
pub struct EchoFallback;

impl Contract for EchoFallback {
    fn name(&self) -> &str {
        "EchoFallback"
    }

    fn call(&self, _ctx: &mut CallContext<'_>, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 24 {
            return Err(KernelError::CallFailed("echo: no caller suffix".to_string()));
        }
        Ok(data[data.len() - 20..].to_vec())
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for EchoFallback {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Fallback
    }

    fn on_install(&self, _ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_uninstall(&self, _ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn is_initialized(&self, _ctx: &ModuleContext<'_>) -> bool {
        false
    }

    fn as_fallback(&self) -> Option<&dyn Fallback> {
        Some(self)
    }
}

impl Fallback for EchoFallback {}

/// Hook counting its pre and post checks per account.
#[derive(Default)]
pub struct RecordingHook {
    fail_pre: bool,
    fail_post: bool,
}

impl RecordingHook {
    pub fn failing_pre() -> Self {
        Self {
            fail_pre: true,
            fail_post: false,
        }
    }

    pub fn failing_post() -> Self {
        Self {
            fail_pre: false,
            fail_post: true,
        }
    }

    pub fn counts(chain: &Chain, hook: Address, account: Address) -> (u64, u64) {
        let slot = |key: &[u8]| {
            let mut slot = account.as_bytes().to_vec();
            slot.extend_from_slice(key);
            read_u64(chain, &hook, &slot)
        };
        (slot(b"pre"), slot(b"post"))
    }

    fn bump(ctx: &mut ModuleContext<'_>, key: &[u8]) -> Result<()> {
        let count: u64 = match ctx.load(key) {
            Some(raw) => encoding::decode(&raw)?,
            None => 0,
        };
        ctx.store(key, encoding::encode(&(count + 1))?);
        Ok(())
    }
}

impl Contract for RecordingHook {
    fn name(&self) -> &str {
        "RecordingHook"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for RecordingHook {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Hook
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        ctx.store(b"installed", vec![1]);
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        ctx.clear(b"installed");
        Ok(())
    }

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool {
        ctx.load(b"installed").is_some()
    }

    fn as_hook(&self) -> Option<&dyn Hook> {
        Some(self)
    }
}

impl Hook for RecordingHook {
    fn pre_check(&self, ctx: &mut ModuleContext<'_>, _sender: Address, _value: u128, _data: &[u8]) -> Result<Vec<u8>> {
        if self.fail_pre {
            return Err(ctx.reject("pre-check refused"));
        }
        Self::bump(ctx, b"pre")?;
        Ok(b"ctx".to_vec())
    }

    fn post_check(&self, ctx: &mut ModuleContext<'_>, context: &[u8]) -> Result<()> {
        if self.fail_post {
            return Err(ctx.reject("post-check refused"));
        }
        if context != b"ctx" {
            return Err(ctx.reject("context lost between checks"));
        }
        Self::bump(ctx, b"post")
    }
}

/// Executor with no behavior of its own; refuses non-empty deinit data.
pub struct NoopExecutor;

impl Contract for NoopExecutor {
    fn name(&self) -> &str {
        "NoopExecutor"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for NoopExecutor {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Executor
    }

    fn on_install(&self, _ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            return Err(ctx.reject("unexpected deinit data"));
        }
        Ok(())
    }

    fn is_initialized(&self, _ctx: &ModuleContext<'_>) -> bool {
        false
    }

    fn as_executor(&self) -> Option<&dyn Executor> {
        Some(self)
    }
}

impl Executor for NoopExecutor {}

/// Root validator that authorizes one owner address directly, as a hook on
/// privileged calls. Never validates operations.
pub struct OwnerGate;

impl OwnerGate {
    fn owner(ctx: &ModuleContext<'_>) -> Option<Address> {
        ctx.load(b"owner").and_then(|raw| Address::from_slice(&raw).ok())
    }
}

impl Contract for OwnerGate {
    fn name(&self) -> &str {
        "OwnerGate"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for OwnerGate {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        matches!(module_type, ModuleType::Validator | ModuleType::Hook)
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        if data.len() != 20 {
            return Err(ctx.reject("owner must be an address"));
        }
        ctx.store(b"owner", data.to_vec());
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        ctx.clear(b"owner");
        Ok(())
    }

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool {
        Self::owner(ctx).is_some()
    }

    fn as_validator(&self) -> Option<&dyn Validator> {
        Some(self)
    }

    fn as_hook(&self) -> Option<&dyn Hook> {
        Some(self)
    }
}

impl Validator for OwnerGate {
    fn validate_user_op(&self, _ctx: &mut ModuleContext<'_>, _op: &UserOperation, _op_hash: &Hash) -> Result<ValidationData> {
        Ok(ValidationData::failure())
    }

    fn is_valid_signature_with_sender(
        &self,
        ctx: &mut ModuleContext<'_>,
        sender: Address,
        _digest: &Hash,
        _signature: &[u8],
    ) -> Result<bool> {
        Ok(Self::owner(ctx) == Some(sender))
    }
}

impl Hook for OwnerGate {
    fn pre_check(&self, ctx: &mut ModuleContext<'_>, sender: Address, _value: u128, _data: &[u8]) -> Result<Vec<u8>> {
        if Self::owner(ctx) != Some(sender) {
            return Err(ctx.reject(format!("{} is not the owner", sender)));
        }
        Ok(Vec::new())
    }

    fn post_check(&self, _ctx: &mut ModuleContext<'_>, _context: &[u8]) -> Result<()> {
        Ok(())
    }
}
