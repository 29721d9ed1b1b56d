//! Modular smart account.
//!
//! - `kernel`: account state, access rules and native dispatch
//! - `validation`: turns an operation into a verdict
//! - `hooks`: pre/post checks around guarded actions
//! - `execution`: execution modes and outbound calls
//! - `fallback`: routing of unknown selectors to fallback modules
//! - `installer`: module lifecycle, root changes and epoch invalidation
//! - `signature`: account-level signature checks
//! - `store`: persisted account records

pub mod calls;
pub mod execution;
pub mod fallback;
pub mod hooks;
pub mod installer;
pub mod kernel;
pub mod mode;
pub mod registry;
pub mod routing;
pub mod signature;
pub mod store;
pub mod types;
pub mod validation;

pub use kernel::{AccountRecord, Kernel, ACCOUNT_ID};
pub use mode::{CallOutcome, CallType, ExecType, Execution, ExecutionMode};
pub use registry::ModuleRegistry;
pub use routing::{RoutingTag, ValidationData, ValidationMode};
pub use store::{AccountStore, AccountSummary};
pub use types::{HookRef, ModuleType, PermissionId, UserOperation, ValidationIdentity};
