use tracing::debug;

use super::kernel::Kernel;
use super::mode::CallType;
use super::types::HookRef;
use crate::chain::Chain;
use crate::encoding::{Address, Selector};
use crate::error::{KernelError, Result};

impl Kernel {
    /// Forwards a call the account does not implement natively to the
    /// fallback module registered for its selector.
    ///
    /// Single-shape fallbacks receive `data ++ caller` so they can recover the
    /// original requester; delegate-shape fallbacks run as the account and see
    /// the caller directly.
    pub(crate) fn route_fallback(&mut self, chain: &mut Chain, caller: Address, value: u128, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            // plain value transfer
            return Ok(Vec::new());
        }
        let selector = Selector::from_calldata(data).ok_or_else(|| {
            let mut padded = [0u8; 4];
            padded[..data.len()].copy_from_slice(data);
            KernelError::UnknownSelector(Selector(padded))
        })?;
        let config = self
            .registry
            .selector(&selector)
            .ok_or(KernelError::UnknownSelector(selector))?;

        if config.hook == HookRef::NoHook && !self.is_trusted(caller) {
            return Err(KernelError::InvalidCaller(caller));
        }
        debug!("routing {} from {} to fallback {}", selector, caller, config.target);

        self.run_wrapped(chain, config.hook, caller, value, data, |k, chain| match config.call_type {
            CallType::Single => {
                let mut forwarded = Vec::with_capacity(data.len() + 20);
                forwarded.extend_from_slice(data);
                forwarded.extend_from_slice(caller.as_bytes());
                chain.call(k.address(), config.target, value, &forwarded)
            }
            CallType::DelegateCall => chain.delegate_call(k.address(), caller, config.target, data),
            other => Err(KernelError::UnsupportedCallType(other.to_byte())),
        })
    }
}
