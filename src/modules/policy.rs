//! Permission policies.

use serde::{Deserialize, Serialize};

use super::{split_permission_id, Module, ModuleContext, Policy};
use crate::account::routing::ValidationData;
use crate::account::types::{ModuleType, PermissionId, UserOperation};
use crate::chain::Contract;
use crate::encoding::{self, Address, Hash};
use crate::error::Result;

fn policy_key(id: PermissionId) -> Vec<u8> {
    let mut key = b"policy:".to_vec();
    key.extend_from_slice(&id.0);
    key
}

/// Allows everything the signer approves.
#[derive(Debug, Default)]
pub struct SudoPolicy;

impl Contract for SudoPolicy {
    fn name(&self) -> &str {
        "SudoPolicy"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for SudoPolicy {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Policy
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let (id, _) = split_permission_id(ctx.module, data)?;
        ctx.store(&policy_key(id), vec![1]);
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let (id, _) = split_permission_id(ctx.module, data)?;
        ctx.clear(&policy_key(id));
        Ok(())
    }

    fn is_initialized(&self, _ctx: &ModuleContext<'_>) -> bool {
        true
    }

    fn as_policy(&self) -> Option<&dyn Policy> {
        Some(self)
    }
}

impl Policy for SudoPolicy {
    fn check_user_op_policy(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        _op: &UserOperation,
        _policy_data: &[u8],
    ) -> Result<ValidationData> {
        Ok(match ctx.load(&policy_key(id)) {
            Some(_) => ValidationData::window(0, 0),
            None => ValidationData::failure(),
        })
    }

    fn check_signature_policy(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        _sender: Address,
        _digest: &Hash,
        _signature: &[u8],
    ) -> Result<ValidationData> {
        Ok(match ctx.load(&policy_key(id)) {
            Some(_) => ValidationData::window(0, 0),
            None => ValidationData::failure(),
        })
    }
}

/// Window a permission may be used in; install data is
/// `permission id ++ bincode(TimeWindow)`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimeWindow {
    pub valid_after: u64,
    /// 0 means open ended.
    pub valid_until: u64,
}

#[derive(Debug, Default)]
pub struct TimeWindowPolicy;

impl TimeWindowPolicy {
    pub fn install_data(id: PermissionId, window: TimeWindow) -> Result<Vec<u8>> {
        let mut data = id.0.to_vec();
        data.extend(encoding::encode(&window)?);
        Ok(data)
    }

    fn window(ctx: &ModuleContext<'_>, id: PermissionId) -> Option<TimeWindow> {
        ctx.load(&policy_key(id)).and_then(|raw| encoding::decode(&raw).ok())
    }

    fn verdict(ctx: &ModuleContext<'_>, id: PermissionId) -> ValidationData {
        match Self::window(ctx, id) {
            Some(w) => ValidationData::window(w.valid_after, w.valid_until),
            None => ValidationData::failure(),
        }
    }
}

impl Contract for TimeWindowPolicy {
    fn name(&self) -> &str {
        "TimeWindowPolicy"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for TimeWindowPolicy {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Policy
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let (id, rest) = split_permission_id(ctx.module, data)?;
        let window: TimeWindow = encoding::decode(rest)?;
        if window.valid_until != 0 && window.valid_until < window.valid_after {
            return Err(ctx.reject("window ends before it starts"));
        }
        ctx.store(&policy_key(id), rest.to_vec());
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let (id, _) = split_permission_id(ctx.module, data)?;
        ctx.clear(&policy_key(id));
        Ok(())
    }

    fn is_initialized(&self, _ctx: &ModuleContext<'_>) -> bool {
        true
    }

    fn as_policy(&self) -> Option<&dyn Policy> {
        Some(self)
    }
}

impl Policy for TimeWindowPolicy {
    fn check_user_op_policy(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        _op: &UserOperation,
        _policy_data: &[u8],
    ) -> Result<ValidationData> {
        Ok(Self::verdict(ctx, id))
    }

    fn check_signature_policy(
        &self,
        ctx: &mut ModuleContext<'_>,
        id: PermissionId,
        _sender: Address,
        _digest: &Hash,
        _signature: &[u8],
    ) -> Result<ValidationData> {
        // signatures have no expiry check downstream, so enforce it here
        let verdict = Self::verdict(ctx, id);
        if verdict.is_within(ctx.now()) {
            Ok(verdict)
        } else {
            Ok(ValidationData::failure())
        }
    }
}
