use thiserror::Error;

use crate::account::types::{PermissionId, ValidationIdentity};
use crate::encoding::{Address, Selector};

pub type Result<T> = std::result::Result<T, KernelError>;

/// Every abort the account can raise. Authorization failures are not in here:
/// they travel as a failure `ValidationData` so callers can probe validity.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    // --- routing ---
    #[error("Unknown selector: {0}")]
    UnknownSelector(Selector),
    #[error("Unsupported execution mode: {0}")]
    UnsupportedExecutionMode(String),
    #[error("Unsupported call type: 0x{0:02x}")]
    UnsupportedCallType(u8),
    #[error("Invalid routing tag: {0}")]
    InvalidRoutingTag(String),
    #[error("Caller {0} is not allowed to invoke this entry point")]
    InvalidCaller(Address),
    #[error("Only the entry point may invoke this entry point (caller {0})")]
    NotEntryPoint(Address),

    // --- installation ---
    #[error("Module {module} is already installed as type {module_type}")]
    AlreadyInstalled { module_type: u8, module: Address },
    #[error("Module {module} is not installed as type {module_type}")]
    NotInstalled { module_type: u8, module: Address },
    #[error("Selector {0} already routes to a fallback module")]
    SelectorTaken(Selector),
    #[error("Permission {0} is already installed")]
    PermissionInstalled(PermissionId),
    #[error("Permission {0} is not installed")]
    PermissionNotInstalled(PermissionId),
    #[error("Root validation identity cannot be removed")]
    RootCannotBeRemoved,
    #[error("{0} is already the root identity")]
    AlreadyRoot(ValidationIdentity),
    #[error("Invalid module type: {0}")]
    InvalidModuleType(u8),
    #[error("Invalid validation type for this action")]
    InvalidValidationType,
    #[error("Module {module} lacks the {capability} capability")]
    MissingCapability { module: Address, capability: &'static str },
    #[error("No code deployed at {0}")]
    NoCode(Address),
    #[error("Code already deployed at {0}")]
    CodeExists(Address),
    #[error("Account already initialized")]
    AlreadyInitialized,
    #[error("Account not initialized")]
    NotInitialized,
    #[error("Epoch must increase: floor is {floor}, got {requested}")]
    EpochNotIncreasing { floor: u32, requested: u32 },

    // --- execution ---
    #[error("Execution {index} reverted: {reason}")]
    ExecutionReverted { index: usize, reason: String },
    #[error("Call failed: {0}")]
    CallFailed(String),
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u128, required: u128 },
    #[error("Balance overflow")]
    Overflow,
    #[error("Executor {0} is not installed")]
    InvalidExecutor(Address),
    #[error("No validated operation recorded for this hash")]
    UnknownOperation,

    // --- hooks ---
    #[error("Hook {hook} rejected pre-check: {reason}")]
    PreCheckFailed { hook: Address, reason: String },
    #[error("Hook {hook} rejected post-check: {reason}")]
    PostCheckFailed { hook: Address, reason: String },
    #[error("Hook reference is not installed")]
    HookNotInstalled,

    // --- modules ---
    #[error("Module {module} rejected the call: {reason}")]
    ModuleRejected { module: Address, reason: String },

    // --- entry point ---
    #[error("Operation {index} failed validation: {reason}")]
    FailedOp { index: usize, reason: String },

    // --- codec / storage ---
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl KernelError {
    pub fn rejected(module: Address, reason: impl Into<String>) -> Self {
        KernelError::ModuleRejected {
            module,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for KernelError {
    fn from(err: bincode::Error) -> Self {
        KernelError::Deserialization(err.to_string())
    }
}

impl From<sled::Error> for KernelError {
    fn from(err: sled::Error) -> Self {
        KernelError::Database(err.to_string())
    }
}
