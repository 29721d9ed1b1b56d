//! Native entry points of the account and their call data.
//!
//! Call data is `selector ++ bincode(args)`. The hook-checked execute entry
//! point is special: its call data is `EXECUTE_USER_OP ++ inner call data`.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use super::mode::CallType;
use super::types::{HookRef, PermissionId, PolicyEntry, ValidationIdentity};
use crate::encoding::{self, Address, Selector};
use crate::error::Result;

lazy_static! {
    pub static ref EXECUTE: Selector = Selector::from_signature("execute(bytes32,bytes)");
    pub static ref EXECUTE_FROM_EXECUTOR: Selector = Selector::from_signature("executeFromExecutor(bytes32,bytes)");
    pub static ref EXECUTE_USER_OP: Selector = Selector::from_signature("executeUserOp(bytes,bytes32)");
    pub static ref INSTALL_MODULE: Selector = Selector::from_signature("installModule(uint256,address,bytes)");
    pub static ref UNINSTALL_MODULE: Selector = Selector::from_signature("uninstallModule(uint256,address,bytes)");
    pub static ref CHANGE_ROOT: Selector = Selector::from_signature("changeRootValidator(bytes21,address,bytes,bytes)");
    pub static ref INVALIDATE_EPOCH: Selector = Selector::from_signature("invalidateNonce(uint32)");
    pub static ref INSTALL_PERMISSION: Selector = Selector::from_signature("installPermission(bytes)");
    pub static ref UNINSTALL_PERMISSION: Selector = Selector::from_signature("uninstallPermission(bytes4,bytes)");
}

/// Decoded call to one of the account's privileged native entry points.
#[derive(Clone, PartialEq, Debug)]
pub enum KernelCall {
    Execute {
        mode: [u8; 32],
        execution_data: Vec<u8>,
    },
    ExecuteFromExecutor {
        mode: [u8; 32],
        execution_data: Vec<u8>,
    },
    InstallModule {
        module_type: u8,
        module: Address,
        init_data: Vec<u8>,
    },
    UninstallModule {
        module_type: u8,
        module: Address,
        deinit_data: Vec<u8>,
    },
    ChangeRootIdentity {
        identity: ValidationIdentity,
        hook: HookRef,
        validator_data: Vec<u8>,
        hook_data: Vec<u8>,
    },
    InvalidateEpoch {
        epoch: u32,
    },
    InstallPermission(PermissionInstall),
    UninstallPermission {
        id: PermissionId,
        deinit_data: Vec<u8>,
    },
}

impl KernelCall {
    pub fn selector(&self) -> Selector {
        match self {
            KernelCall::Execute { .. } => *EXECUTE,
            KernelCall::ExecuteFromExecutor { .. } => *EXECUTE_FROM_EXECUTOR,
            KernelCall::InstallModule { .. } => *INSTALL_MODULE,
            KernelCall::UninstallModule { .. } => *UNINSTALL_MODULE,
            KernelCall::ChangeRootIdentity { .. } => *CHANGE_ROOT,
            KernelCall::InvalidateEpoch { .. } => *INVALIDATE_EPOCH,
            KernelCall::InstallPermission(_) => *INSTALL_PERMISSION,
            KernelCall::UninstallPermission { .. } => *UNINSTALL_PERMISSION,
        }
    }

    /// Selectors the account serves itself; never available to fallbacks.
    pub fn is_native(selector: &Selector) -> bool {
        [
            *EXECUTE,
            *EXECUTE_FROM_EXECUTOR,
            *EXECUTE_USER_OP,
            *INSTALL_MODULE,
            *UNINSTALL_MODULE,
            *CHANGE_ROOT,
            *INVALIDATE_EPOCH,
            *INSTALL_PERMISSION,
            *UNINSTALL_PERMISSION,
        ]
        .contains(selector)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let args = match self {
            KernelCall::Execute { mode, execution_data } | KernelCall::ExecuteFromExecutor { mode, execution_data } => {
                encoding::encode(&(mode, execution_data))?
            }
            KernelCall::InstallModule {
                module_type,
                module,
                init_data,
            } => encoding::encode(&(module_type, module, init_data))?,
            KernelCall::UninstallModule {
                module_type,
                module,
                deinit_data,
            } => encoding::encode(&(module_type, module, deinit_data))?,
            KernelCall::ChangeRootIdentity {
                identity,
                hook,
                validator_data,
                hook_data,
            } => encoding::encode(&(identity, hook, validator_data, hook_data))?,
            KernelCall::InvalidateEpoch { epoch } => encoding::encode(epoch)?,
            KernelCall::InstallPermission(install) => encoding::encode(install)?,
            KernelCall::UninstallPermission { id, deinit_data } => encoding::encode(&(id, deinit_data))?,
        };
        let mut out = self.selector().0.to_vec();
        out.extend(args);
        Ok(out)
    }

    /// `Ok(None)` when the selector is not a native entry point.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        let selector = match Selector::from_calldata(data) {
            Some(s) => s,
            None => return Ok(None),
        };
        let args = &data[4..];

        let call = if selector == *EXECUTE {
            let (mode, execution_data) = encoding::decode(args)?;
            KernelCall::Execute { mode, execution_data }
        } else if selector == *EXECUTE_FROM_EXECUTOR {
            let (mode, execution_data) = encoding::decode(args)?;
            KernelCall::ExecuteFromExecutor { mode, execution_data }
        } else if selector == *INSTALL_MODULE {
            let (module_type, module, init_data) = encoding::decode(args)?;
            KernelCall::InstallModule {
                module_type,
                module,
                init_data,
            }
        } else if selector == *UNINSTALL_MODULE {
            let (module_type, module, deinit_data) = encoding::decode(args)?;
            KernelCall::UninstallModule {
                module_type,
                module,
                deinit_data,
            }
        } else if selector == *CHANGE_ROOT {
            let (identity, hook, validator_data, hook_data) = encoding::decode(args)?;
            KernelCall::ChangeRootIdentity {
                identity,
                hook,
                validator_data,
                hook_data,
            }
        } else if selector == *INVALIDATE_EPOCH {
            KernelCall::InvalidateEpoch {
                epoch: encoding::decode(args)?,
            }
        } else if selector == *INSTALL_PERMISSION {
            KernelCall::InstallPermission(encoding::decode(args)?)
        } else if selector == *UNINSTALL_PERMISSION {
            let (id, deinit_data) = encoding::decode(args)?;
            KernelCall::UninstallPermission { id, deinit_data }
        } else {
            return Ok(None);
        };
        Ok(Some(call))
    }
}

/// Wraps native call data for the hook-checked execute path.
pub fn hook_checked(inner: &[u8]) -> Vec<u8> {
    let mut out = EXECUTE_USER_OP.0.to_vec();
    out.extend_from_slice(inner);
    out
}

// --- Install payloads ---

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct ValidatorInstall {
    pub hook: HookRef,
    pub validator_data: Vec<u8>,
    pub hook_data: Vec<u8>,
    /// Selector the validator may authorize right away.
    pub selector: Option<Selector>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct ExecutorInstall {
    pub hook: HookRef,
    pub executor_data: Vec<u8>,
    pub hook_data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct FallbackInstall {
    pub selector: Selector,
    pub hook: HookRef,
    pub call_type: CallType,
    pub fallback_data: Vec<u8>,
    pub hook_data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct FallbackUninstall {
    pub selector: Selector,
    pub fallback_data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PermissionInstall {
    pub id: PermissionId,
    pub hook: HookRef,
    /// Each policy with its own install data.
    pub policies: Vec<(PolicyEntry, Vec<u8>)>,
    pub signer: Address,
    pub signer_data: Vec<u8>,
    pub hook_data: Vec<u8>,
    pub selector: Option<Selector>,
}

/// Deinit payload for a policy or signer: which permission it belongs to.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct PermissionModuleUninstall {
    pub id: PermissionId,
    pub data: Vec<u8>,
}

/// Root-signed request, carried in an operation signature, to install a
/// validator while authorizing that very operation.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct EnableEnvelope {
    pub install: ValidatorInstall,
    pub enable_signature: Vec<u8>,
    pub user_op_signature: Vec<u8>,
}

/// Per-module pieces of a permission-routed operation signature.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct PermissionSignature {
    pub policy_data: Vec<Vec<u8>>,
    pub signer_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::mode::ExecutionMode;
    use crate::account::types::ModuleType;

    #[test]
    fn test_native_selectors_distinct() {
        let all = [
            *EXECUTE,
            *EXECUTE_FROM_EXECUTOR,
            *EXECUTE_USER_OP,
            *INSTALL_MODULE,
            *UNINSTALL_MODULE,
            *CHANGE_ROOT,
            *INVALIDATE_EPOCH,
            *INSTALL_PERMISSION,
            *UNINSTALL_PERMISSION,
        ];
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_call_decode_matches_encode() {
        let call = KernelCall::InstallModule {
            module_type: ModuleType::Executor.id(),
            module: Address::from_low_u64(0xe1),
            init_data: vec![1, 2, 3],
        };
        let data = call.encode().unwrap();
        assert_eq!(Selector::from_calldata(&data), Some(*INSTALL_MODULE));
        assert_eq!(KernelCall::decode(&data).unwrap(), Some(call));

        let exec = KernelCall::Execute {
            mode: ExecutionMode::single().encode(),
            execution_data: vec![9; 60],
        };
        assert_eq!(KernelCall::decode(&exec.encode().unwrap()).unwrap(), Some(exec));
    }

    #[test]
    fn test_foreign_selector_is_not_native() {
        let data = Selector::from_signature("onERC721Received(address,address,uint256,bytes)").0.to_vec();
        assert_eq!(KernelCall::decode(&data).unwrap(), None);
        assert_eq!(KernelCall::decode(&[1, 2]).unwrap(), None);
        // hook-checked execute never decodes as a plain native call
        assert_eq!(KernelCall::decode(&hook_checked(&[])).unwrap(), None);
    }

    #[test]
    fn test_truncated_args_rejected() {
        let mut data = INSTALL_MODULE.0.to_vec();
        data.push(1);
        assert!(KernelCall::decode(&data).is_err());
    }
}
