use tracing::{debug, warn};

use super::kernel::Kernel;
use super::types::{HookRef, ModuleType};
use crate::chain::Chain;
use crate::encoding::Address;
use crate::error::{KernelError, Result};
use crate::modules::{hook_of, load_module, ModuleContext};

impl Kernel {
    /// Runs `action` between the hook's `pre_check` and `post_check`.
    ///
    /// The context returned by `pre_check` is passed straight to `post_check`
    /// and never stored. A failing `post_check` fails the whole call; the
    /// enclosing `atomically` rolls the action back.
    pub(crate) fn run_wrapped<T, F>(
        &mut self,
        chain: &mut Chain,
        hook: HookRef,
        sender: Address,
        value: u128,
        data: &[u8],
        action: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Self, &mut Chain) -> Result<T>,
    {
        let hook_address = match hook {
            HookRef::NotInstalled => return Err(KernelError::HookNotInstalled),
            HookRef::NoHook => return action(self, chain),
            HookRef::Module(address) => address,
        };

        let code = load_module(chain, hook_address, ModuleType::Hook)?;
        let checks = hook_of(&code, hook_address)?;

        let context = {
            let mut ctx = ModuleContext::new(chain, hook_address, self.address());
            checks
                .pre_check(&mut ctx, sender, value, data)
                .map_err(|e| KernelError::PreCheckFailed {
                    hook: hook_address,
                    reason: e.to_string(),
                })?
        };
        debug!("pre-check of {} passed for {}", hook_address, sender);

        let result = action(self, chain)?;

        let mut ctx = ModuleContext::new(chain, hook_address, self.address());
        if let Err(e) = checks.post_check(&mut ctx, &context) {
            warn!("post-check of {} failed, rolling back: {}", hook_address, e);
            return Err(KernelError::PostCheckFailed {
                hook: hook_address,
                reason: e.to_string(),
            });
        }
        Ok(result)
    }
}
