//! Scripted walk through the account lifecycle: root setup, a hooked session
//! validator, a scheduled executor and a rejected operation.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::account::calls::{hook_checked, ExecutorInstall, KernelCall, ValidatorInstall, EXECUTE};
use crate::account::mode::{encode_single, CallOutcome, Execution, ExecutionMode};
use crate::account::types::{HookRef, ModuleType, UserOperation, ValidationIdentity};
use crate::account::{AccountStore, Kernel, RoutingTag};
use crate::chain::Chain;
use crate::config::KernelConfig;
use crate::crypto::KeyPair;
use crate::encoding::{self, sha256, Address};
use crate::entry_point::{EntryPoint, OpReceipt};
use crate::error::Result;
use crate::modules::executor::Schedule;
use crate::modules::{Ed25519Validator, ScheduledTransferExecutor, ValueLimitHook};

pub const ROOT_VALIDATOR: Address = Address::from_low_u64(0x1001);
pub const SESSION_VALIDATOR: Address = Address::from_low_u64(0x1002);
pub const LIMIT_HOOK: Address = Address::from_low_u64(0x1003);
pub const SCHEDULER: Address = Address::from_low_u64(0x1004);

const PAYEE: Address = Address::from_low_u64(0xbee);
const SESSION_LIMIT: u128 = 5_000;

#[derive(Serialize, Debug)]
pub struct DemoReport {
    pub account: Address,
    pub receipts: Vec<OpReceipt>,
    pub scheduled: Vec<CallOutcome>,
    pub rejected: String,
    pub account_balance: u128,
    pub payee_balance: u128,
}

/// Account address derived from its first owner key.
pub fn account_address(owner: &KeyPair) -> Address {
    let digest = sha256(&owner.public_key_bytes());
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&digest[..20]);
    Address(raw)
}

struct Session {
    chain: Chain,
    kernel: Kernel,
    entry_point: EntryPoint,
}

impl Session {
    fn op(&self, key: &KeyPair, tag: RoutingTag, call_data: Vec<u8>) -> UserOperation {
        let tag = self.entry_point.next_tag(self.kernel.address(), tag);
        let op = UserOperation {
            sender: self.kernel.address(),
            nonce: tag.encode(),
            call_data,
            prefund: 0,
            signature: Vec::new(),
        };
        let hash = self.entry_point.user_op_hash(&self.chain, &op);
        op.with_signature(key.sign_bytes(&hash))
    }

    fn submit(&mut self, op: UserOperation) -> Result<Vec<OpReceipt>> {
        self.entry_point.handle_ops(&mut self.chain, &mut self.kernel, &[op])
    }
}

pub fn run_demo(config: &KernelConfig, store: &AccountStore) -> Result<DemoReport> {
    let now = if config.chain.genesis_timestamp > 0 {
        config.chain.genesis_timestamp
    } else {
        chrono::Utc::now().timestamp().max(0) as u64
    };
    let mut chain = Chain::new(config.chain.chain_id, now);
    chain.deploy(ROOT_VALIDATOR, Arc::new(Ed25519Validator))?;
    chain.deploy(SESSION_VALIDATOR, Arc::new(Ed25519Validator))?;
    chain.deploy(LIMIT_HOOK, Arc::new(ValueLimitHook))?;
    chain.deploy(SCHEDULER, Arc::new(ScheduledTransferExecutor))?;

    let owner = KeyPair::generate();
    let session_key = KeyPair::generate();
    let address = account_address(&owner);
    info!("demo account {} on chain {}", address, chain.chain_id());

    let mut kernel = Kernel::from_settings(address, &config.account);
    kernel.initialize(
        &mut chain,
        ValidationIdentity::Validator(ROOT_VALIDATOR),
        HookRef::NoHook,
        &owner.public_key_bytes(),
        &[],
    )?;
    chain.set_balance(&address, 1_000_000);

    let mut session = Session {
        chain,
        kernel,
        entry_point: EntryPoint::new(config.account.entry_point),
    };
    let mut receipts = Vec::new();

    // root installs a session key, capped by the value limit hook
    let install_session = KernelCall::InstallModule {
        module_type: ModuleType::Validator.id(),
        module: SESSION_VALIDATOR,
        init_data: encoding::encode(&ValidatorInstall {
            hook: HookRef::Module(LIMIT_HOOK),
            validator_data: session_key.public_key_bytes().to_vec(),
            hook_data: ValueLimitHook::install_data(SESSION_LIMIT)?,
            selector: Some(*EXECUTE),
        })?,
    }
    .encode()?;
    let op = session.op(&owner, RoutingTag::root(0), install_session);
    receipts.extend(session.submit(op)?);

    // root installs a recurring payment
    let install_scheduler = KernelCall::InstallModule {
        module_type: ModuleType::Executor.id(),
        module: SCHEDULER,
        init_data: encoding::encode(&ExecutorInstall {
            hook: HookRef::NoHook,
            executor_data: ScheduledTransferExecutor::install_data(&Schedule {
                recipient: PAYEE,
                amount: 250,
                interval: 86_400,
            })?,
            hook_data: vec![],
        })?,
    }
    .encode()?;
    let op = session.op(&owner, RoutingTag::root(0), install_scheduler);
    receipts.extend(session.submit(op)?);

    // the session key pays within its limit
    let session_tag = RoutingTag::new(ValidationIdentity::Validator(SESSION_VALIDATOR), 0);
    let pay = |amount: u128| -> Result<Vec<u8>> {
        Ok(hook_checked(
            &KernelCall::Execute {
                mode: ExecutionMode::single().encode(),
                execution_data: encode_single(&Execution::new(PAYEE, amount, Vec::new())),
            }
            .encode()?,
        ))
    };
    let op = session.op(&session_key, session_tag, pay(1_000)?);
    receipts.extend(session.submit(op)?);

    // over the limit: validation passes, the hook reverts execution
    let op = session.op(&session_key, session_tag, pay(SESSION_LIMIT + 1)?);
    receipts.extend(session.submit(op)?);

    // the session key may not reconfigure the account
    let escalate = KernelCall::InvalidateEpoch { epoch: 99 }.encode()?;
    let op = session.op(&session_key, session_tag, escalate);
    let rejected = match session.submit(op) {
        Ok(_) => "accepted".to_string(),
        Err(e) => e.to_string(),
    };

    let scheduled = ScheduledTransferExecutor::trigger(&mut session.chain, &mut session.kernel, SCHEDULER)?;

    store.save(&session.kernel)?;
    info!("account {} saved", address);

    Ok(DemoReport {
        account: address,
        account_balance: session.chain.balance_of(&address),
        payee_balance: session.chain.balance_of(&PAYEE),
        receipts,
        scheduled,
        rejected,
    })
}
