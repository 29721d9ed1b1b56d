//! Execution dispatcher.
//!
//! Interprets an execution mode and performs the sub-calls it describes. The
//! same mode check backs `supports_execution_mode`, so what the account
//! advertises and what it runs cannot drift apart.

use tracing::{debug, warn};

use super::calls::{KernelCall, EXECUTE_USER_OP};
use super::kernel::Kernel;
use super::mode::{
    decode_batch, decode_delegate, decode_single, CallOutcome, CallType, ExecType, Execution, ExecutionMode,
};
use super::types::{HookRef, UserOperation};
use crate::chain::{Chain, Event};
use crate::encoding::{Address, Hash, Selector};
use crate::error::{KernelError, Result};

impl Kernel {
    pub(crate) fn check_execution_mode(&self, mode: &ExecutionMode) -> Result<()> {
        if mode.mode_selector != ExecutionMode::DEFAULT_SELECTOR {
            return Err(KernelError::UnsupportedExecutionMode(format!(
                "mode selector 0x{}",
                hex::encode(mode.mode_selector)
            )));
        }
        match mode.call_type {
            CallType::Single | CallType::Batch => Ok(()),
            CallType::DelegateCall if self.delegate_call_enabled() => Ok(()),
            CallType::DelegateCall => Err(KernelError::UnsupportedExecutionMode(
                "delegate calls are disabled for this account".to_string(),
            )),
            CallType::Static => Err(KernelError::UnsupportedExecutionMode(
                "static calls are reserved".to_string(),
            )),
        }
    }

    pub fn supports_execution_mode(&self, mode: &[u8; 32]) -> bool {
        ExecutionMode::decode(mode)
            .and_then(|m| self.check_execution_mode(&m))
            .is_ok()
    }

    /// `execute(mode, payload)` as a privileged entry point.
    pub fn execute(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        mode: [u8; 32],
        execution_data: &[u8],
    ) -> Result<Vec<CallOutcome>> {
        let call = KernelCall::Execute {
            mode,
            execution_data: execution_data.to_vec(),
        }
        .encode()?;
        self.atomically(chain, |k, chain| {
            k.privileged(chain, caller, 0, &call, |k, chain| {
                k.dispatch_execution(chain, &mode, execution_data)
            })
        })
    }

    /// Execution on behalf of an installed executor, wrapped by its hook.
    pub fn execute_from_executor(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        mode: [u8; 32],
        execution_data: &[u8],
    ) -> Result<Vec<CallOutcome>> {
        self.atomically(chain, |k, chain| k.executor_dispatch(chain, caller, mode, execution_data))
    }

    pub(crate) fn executor_dispatch(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        mode: [u8; 32],
        execution_data: &[u8],
    ) -> Result<Vec<CallOutcome>> {
        let hook = match self.registry.executor(&caller) {
            Some(config) if config.hook.is_installed() => config.hook,
            _ => return Err(KernelError::InvalidExecutor(caller)),
        };
        let call = KernelCall::ExecuteFromExecutor {
            mode,
            execution_data: execution_data.to_vec(),
        }
        .encode()?;
        self.run_wrapped(chain, hook, caller, 0, &call, |k, chain| {
            k.dispatch_execution(chain, &mode, execution_data)
        })
    }

    /// Executes an operation the resolver already approved, under the hook it
    /// recorded for `op_hash`. Entry point only.
    pub fn execute_user_op(
        &mut self,
        chain: &mut Chain,
        caller: Address,
        op: &UserOperation,
        op_hash: Hash,
    ) -> Result<Vec<u8>> {
        if caller != self.entry_point() {
            return Err(KernelError::NotEntryPoint(caller));
        }
        // consumed even if execution fails
        let hook = self
            .registry
            .take_execution_hook(&op_hash)
            .ok_or(KernelError::UnknownOperation)?;

        let hook_checked = op.outer_selector() == Some(*EXECUTE_USER_OP);
        self.atomically(chain, |k, chain| {
            if hook_checked {
                let inner = &op.call_data[4..];
                k.run_wrapped(chain, hook, caller, 0, inner, |k, chain| k.dispatch(chain, caller, 0, inner))
            } else {
                if let HookRef::Module(h) = hook {
                    return Err(KernelError::PreCheckFailed {
                        hook: h,
                        reason: "hooked identity used a direct entry point".to_string(),
                    });
                }
                k.dispatch(chain, caller, 0, &op.call_data)
            }
        })
    }

    /// Decodes and runs `execution_data` under `mode`. The mode and the whole
    /// payload are checked before the first sub-call.
    pub(crate) fn dispatch_execution(
        &mut self,
        chain: &mut Chain,
        mode: &[u8; 32],
        execution_data: &[u8],
    ) -> Result<Vec<CallOutcome>> {
        let mode = ExecutionMode::decode(mode)?;
        self.check_execution_mode(&mode)?;
        debug!("dispatching {} on {}", mode, self.address());

        match mode.call_type {
            CallType::Single => {
                let exec = decode_single(execution_data)?;
                let result = self.call_out(chain, &exec);
                Ok(vec![self.settle(chain, mode.exec_type, 0, result)?])
            }
            CallType::Batch => {
                let execs = decode_batch(execution_data)?;
                let mut outcomes = Vec::with_capacity(execs.len());
                for (index, exec) in execs.iter().enumerate() {
                    let result = self.call_out(chain, exec);
                    outcomes.push(self.settle(chain, mode.exec_type, index, result)?);
                }
                Ok(outcomes)
            }
            CallType::DelegateCall => {
                let (target, call_data) = decode_delegate(execution_data)?;
                let account = self.address();
                let result = chain.delegate_call(account, account, target, &call_data);
                Ok(vec![self.settle(chain, mode.exec_type, 0, result)?])
            }
            CallType::Static => Err(KernelError::UnsupportedCallType(CallType::Static.to_byte())),
        }
    }

    /// One sub-call. A call to the account itself is dispatched in-process
    /// and gets its own rollback scope.
    fn call_out(&mut self, chain: &mut Chain, exec: &Execution) -> Result<Vec<u8>> {
        let account = self.address();
        if exec.target == account {
            return self.atomically(chain, |k, chain| k.dispatch(chain, account, exec.value, &exec.call_data));
        }
        chain.call(account, exec.target, exec.value, &exec.call_data)
    }

    fn settle(&self, chain: &mut Chain, exec_type: ExecType, index: usize, result: Result<Vec<u8>>) -> Result<CallOutcome> {
        match (result, exec_type) {
            (Ok(data), _) => Ok(CallOutcome::Success(data)),
            (Err(e), ExecType::RevertOnFailure) => Err(KernelError::ExecutionReverted {
                index,
                reason: e.to_string(),
            }),
            (Err(e), ExecType::BestEffort) => {
                let reason = e.to_string();
                warn!("execution {} on {} failed, continuing: {}", index, self.address(), reason);
                chain.emit(Event::TryExecuteUnsuccessful {
                    account: self.address(),
                    index,
                    reason: reason.clone(),
                });
                Ok(CallOutcome::Failed(reason))
            }
        }
    }
}

/// Selector that authorization is checked against: the wrapped call for the
/// hook-checked execute, the outer call otherwise.
pub(crate) fn effective_selector(call_data: &[u8]) -> Option<Selector> {
    let outer = Selector::from_calldata(call_data)?;
    if outer == *EXECUTE_USER_OP {
        Selector::from_calldata(&call_data[4..])
    } else {
        Some(outer)
    }
}
