//! Account type definitions: identities, hook references and per-module records

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encoding::{Address, Selector};
use crate::error::{KernelError, Result};

/// Delegated-permission identifier.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PermissionId(pub [u8; 4]);

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermissionId({})", self)
    }
}

/// Who may authorize an operation.
///
/// `Root` only appears in routing tags and signature prefixes; the account's
/// stored root is always a concrete `Validator` or `Permission`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum ValidationIdentity {
    Root,
    Validator(Address),
    Permission(PermissionId),
}

impl ValidationIdentity {
    pub fn validation_type(&self) -> ValidationType {
        match self {
            ValidationIdentity::Root => ValidationType::Root,
            ValidationIdentity::Validator(_) => ValidationType::Validator,
            ValidationIdentity::Permission(_) => ValidationType::Permission,
        }
    }

    pub fn is_root_placeholder(&self) -> bool {
        matches!(self, ValidationIdentity::Root)
    }
}

impl fmt::Display for ValidationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIdentity::Root => write!(f, "root"),
            ValidationIdentity::Validator(addr) => write!(f, "validator:{}", addr),
            ValidationIdentity::Permission(id) => write!(f, "permission:{}", id),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ValidationType {
    Root = 0x00,
    Validator = 0x01,
    Permission = 0x02,
}

impl ValidationType {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(ValidationType::Root),
            0x01 => Ok(ValidationType::Validator),
            0x02 => Ok(ValidationType::Permission),
            other => Err(KernelError::InvalidRoutingTag(format!("unknown validation type 0x{:02x}", other))),
        }
    }
}

/// Reference from an installed entry to the hook guarding it.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum HookRef {
    /// Slot is empty: the owning entry is not installed.
    #[default]
    NotInstalled,
    /// Installed, no interception.
    NoHook,
    Module(Address),
}

impl HookRef {
    const NO_HOOK_ADDRESS: Address = Address::from_low_u64(1);

    pub fn is_installed(&self) -> bool {
        !matches!(self, HookRef::NotInstalled)
    }

    pub fn module(&self) -> Option<Address> {
        match self {
            HookRef::Module(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Callers may pass `NotInstalled` to mean "no hook" when installing.
    pub fn normalized(self) -> Self {
        match self {
            HookRef::NotInstalled => HookRef::NoHook,
            other => other,
        }
    }

    pub fn to_address(&self) -> Address {
        match self {
            HookRef::NotInstalled => Address::ZERO,
            HookRef::NoHook => Self::NO_HOOK_ADDRESS,
            HookRef::Module(addr) => *addr,
        }
    }

    pub fn from_address(addr: Address) -> Self {
        if addr.is_zero() {
            HookRef::NotInstalled
        } else if addr == Self::NO_HOOK_ADDRESS {
            HookRef::NoHook
        } else {
            HookRef::Module(addr)
        }
    }
}

impl fmt::Display for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookRef::NotInstalled => write!(f, "not-installed"),
            HookRef::NoHook => write!(f, "no-hook"),
            HookRef::Module(addr) => write!(f, "{}", addr),
        }
    }
}

/// Module roles. Discriminants are the wire ids.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ModuleType {
    Validator = 1,
    Executor = 2,
    Fallback = 3,
    Hook = 4,
    Policy = 5,
    Signer = 6,
}

impl ModuleType {
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(ModuleType::Validator),
            2 => Ok(ModuleType::Executor),
            3 => Ok(ModuleType::Fallback),
            4 => Ok(ModuleType::Hook),
            5 => Ok(ModuleType::Policy),
            6 => Ok(ModuleType::Signer),
            other => Err(KernelError::InvalidModuleType(other)),
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ModuleType::Validator => "validator",
            ModuleType::Executor => "executor",
            ModuleType::Fallback => "fallback",
            ModuleType::Hook => "hook",
            ModuleType::Policy => "policy",
            ModuleType::Signer => "signer",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-identity record. Grants are void once `epoch` falls below the floor.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ValidationConfig {
    pub epoch: u32,
    pub hook: HookRef,
}

/// Which checks a policy takes part in.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PassFlags {
    pub skip_user_op: bool,
    pub skip_signature: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct PolicyEntry {
    pub policy: Address,
    pub flags: PassFlags,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PermissionConfig {
    pub policies: Vec<PolicyEntry>,
    pub signer: Address,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExecutorConfig {
    pub hook: HookRef,
}

/// Fallback routing for one selector.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct SelectorConfig {
    pub hook: HookRef,
    pub target: Address,
    pub call_type: super::mode::CallType,
}

/// Externally supplied request processed by the entry point.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct UserOperation {
    pub sender: Address,
    /// Routing tag: mode, identity and sequence.
    pub nonce: [u8; 32],
    pub call_data: Vec<u8>,
    /// Fee reimbursement the entry point asks for during validation.
    pub prefund: u128,
    pub signature: Vec<u8>,
}

impl UserOperation {
    pub fn outer_selector(&self) -> Option<Selector> {
        Selector::from_calldata(&self.call_data)
    }

    pub fn with_signature(&self, signature: Vec<u8>) -> Self {
        Self {
            signature,
            ..self.clone()
        }
    }
}
