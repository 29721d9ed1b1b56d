use super::{Hook, Module, ModuleContext};
use crate::account::types::ModuleType;
use crate::chain::Contract;
use crate::encoding::{self, Address};
use crate::error::Result;

const LIMIT_KEY: &[u8] = b"limit";
const PRE_CALLS_KEY: &[u8] = b"pre_calls";
const POST_CALLS_KEY: &[u8] = b"post_calls";

/// Caps how much native value one guarded action may move out of the account.
///
/// `pre_check` rejects calls carrying more than the limit and snapshots the
/// account balance as its context; `post_check` rejects if the balance fell by
/// more than the limit while the action ran. Install data is a bincode `u128`.
#[derive(Debug, Default)]
pub struct ValueLimitHook;

impl ValueLimitHook {
    pub fn install_data(limit: u128) -> Result<Vec<u8>> {
        encoding::encode(&limit)
    }

    pub fn limit(ctx: &ModuleContext<'_>) -> Option<u128> {
        ctx.load(LIMIT_KEY).and_then(|raw| encoding::decode(&raw).ok())
    }

    /// (pre, post) invocation counts for `account`.
    pub fn calls(chain: &crate::chain::Chain, hook: Address, account: Address) -> (u64, u64) {
        let read = |key: &[u8]| {
            let mut slot = account.as_bytes().to_vec();
            slot.extend_from_slice(key);
            chain
                .state()
                .load(&hook, &slot)
                .and_then(|raw| encoding::decode::<u64>(raw).ok())
                .unwrap_or(0)
        };
        (read(PRE_CALLS_KEY), read(POST_CALLS_KEY))
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

impl Contract for ValueLimitHook {
    fn name(&self) -> &str {
        "ValueLimitHook"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for ValueLimitHook {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Hook
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        // re-attaching to another entry without data keeps the current limit
        if data.is_empty() && self.is_initialized(ctx) {
            return Ok(());
        }
        let limit: u128 = encoding::decode(data)?;
        ctx.store(LIMIT_KEY, encoding::encode(&limit)?);
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        ctx.clear(LIMIT_KEY);
        Ok(())
    }

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool {
        ctx.load(LIMIT_KEY).is_some()
    }

    fn as_hook(&self) -> Option<&dyn Hook> {
        Some(self)
    }
}

impl Hook for ValueLimitHook {
    fn pre_check(&self, ctx: &mut ModuleContext<'_>, _sender: Address, value: u128, _data: &[u8]) -> Result<Vec<u8>> {
        let limit = Self::limit(ctx).ok_or_else(|| ctx.reject("no limit configured"))?;
        if value > limit {
            return Err(ctx.reject(format!("value {} exceeds limit {}", value, limit)));
        }
        Self::bump(ctx, PRE_CALLS_KEY)?;
        let balance = ctx.chain.balance_of(&ctx.account);
        encoding::encode(&balance)
    }

    fn post_check(&self, ctx: &mut ModuleContext<'_>, context: &[u8]) -> Result<()> {
        let before: u128 = encoding::decode(context)?;
        let after = ctx.chain.balance_of(&ctx.account);
        let limit = Self::limit(ctx).unwrap_or(0);
        let spent = before.saturating_sub(after);
        if spent > limit {
            return Err(ctx.reject(format!("action moved {} out, limit is {}", spent, limit)));
        }
        Self::bump(ctx, POST_CALLS_KEY)
    }
}
