use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Executor, Module, ModuleContext};
use crate::account::mode::{encode_single, CallOutcome, Execution, ExecutionMode};
use crate::account::types::ModuleType;
use crate::account::Kernel;
use crate::chain::{Chain, Contract};
use crate::encoding::{self, Address};
use crate::error::Result;

const SCHEDULE_KEY: &[u8] = b"schedule";
const LAST_RUN_KEY: &[u8] = b"last_run";

/// Recurring payment the executor may push out of the account.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Schedule {
    pub recipient: Address,
    pub amount: u128,
    /// Minimum seconds between two payments.
    pub interval: u64,
}

/// Executor that pays a fixed amount to a fixed recipient at most once per
/// interval. Anyone may trigger it; the schedule is the authorization.
#[derive(Debug, Default)]
pub struct ScheduledTransferExecutor;

impl ScheduledTransferExecutor {
    pub fn install_data(schedule: &Schedule) -> Result<Vec<u8>> {
        encoding::encode(schedule)
    }

    pub fn schedule(ctx: &ModuleContext<'_>) -> Option<Schedule> {
        ctx.load(SCHEDULE_KEY).and_then(|raw| encoding::decode(&raw).ok())
    }

    /// Runs one payment for `kernel` if it is due.
    pub fn trigger(chain: &mut Chain, kernel: &mut Kernel, executor: Address) -> Result<Vec<CallOutcome>> {
        let snapshot = chain.snapshot();
        let result = Self::run(chain, kernel, executor);
        if result.is_err() {
            chain.restore(snapshot);
        }
        result
    }

    fn run(chain: &mut Chain, kernel: &mut Kernel, executor: Address) -> Result<Vec<CallOutcome>> {
        let execution = {
            let mut ctx = ModuleContext::new(chain, executor, kernel.address());
            let schedule = Self::schedule(&ctx).ok_or_else(|| ctx.reject("no schedule for this account"))?;
            let now = ctx.now();
            let last_run: Option<u64> = match ctx.load(LAST_RUN_KEY) {
                Some(raw) => Some(encoding::decode(&raw)?),
                None => None,
            };
            if let Some(last) = last_run {
                if now < last.saturating_add(schedule.interval) {
                    return Err(ctx.reject(format!("next payment due at {}", last + schedule.interval)));
                }
            }
            // recorded before calling into the account
            ctx.store(LAST_RUN_KEY, encoding::encode(&now)?);
            Execution::new(schedule.recipient, schedule.amount, Vec::new())
        };

        info!(
            "scheduled transfer of {} from {} to {}",
            execution.value,
            kernel.address(),
            execution.target
        );
        kernel.execute_from_executor(chain, executor, ExecutionMode::single().encode(), &encode_single(&execution))
    }
}

impl Contract for ScheduledTransferExecutor {
    fn name(&self) -> &str {
        "ScheduledTransferExecutor"
    }

    fn as_module(&self) -> Option<&dyn Module> {
        Some(self)
    }
}

impl Module for ScheduledTransferExecutor {
    fn is_module_type(&self, module_type: ModuleType) -> bool {
        module_type == ModuleType::Executor
    }

    fn on_install(&self, ctx: &mut ModuleContext<'_>, data: &[u8]) -> Result<()> {
        let schedule: Schedule = encoding::decode(data)?;
        if schedule.interval == 0 {
            return Err(ctx.reject("interval must be non-zero"));
        }
        ctx.store(SCHEDULE_KEY, data.to_vec());
        ctx.clear(LAST_RUN_KEY);
        Ok(())
    }

    fn on_uninstall(&self, ctx: &mut ModuleContext<'_>, _data: &[u8]) -> Result<()> {
        ctx.clear(SCHEDULE_KEY);
        ctx.clear(LAST_RUN_KEY);
        Ok(())
    }

    fn is_initialized(&self, ctx: &ModuleContext<'_>) -> bool {
        ctx.load(SCHEDULE_KEY).is_some()
    }

    fn as_executor(&self) -> Option<&dyn Executor> {
        Some(self)
    }
}

impl Executor for ScheduledTransferExecutor {}
