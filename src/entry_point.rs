//! Operation entry point.
//!
//! Drives the two-phase protocol against one account: every operation in a
//! batch is validated (sequence, verdict, window, prefund) before any of them
//! executes. A validation failure aborts the whole batch and leaves nothing
//! behind; an execution failure only marks that operation's receipt.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::account::routing::{RoutingTag, ValidationData};
use crate::account::types::UserOperation;
use crate::account::Kernel;
use crate::chain::{Chain, Event};
use crate::encoding::{sha256, Address, CanonicalSerialize, Hash};
use crate::error::{KernelError, Result};

const USER_OP_DOMAIN: &[u8] = b"compass.entrypoint.user-op";

/// Outcome of one executed operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OpReceipt {
    pub op_hash: Hash,
    pub sender: Address,
    pub sequence: u64,
    pub success: bool,
    pub revert_reason: Option<String>,
    pub return_data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct EntryPoint {
    address: Address,
    /// Next expected sequence per (sender, tag prefix).
    sequences: HashMap<(Address, [u8; 24]), u64>,
}

impl EntryPoint {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            sequences: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn get_nonce(&self, sender: Address, key: [u8; 24]) -> u64 {
        self.sequences.get(&(sender, key)).copied().unwrap_or(0)
    }

    /// Next sequence for `tag`'s routing, ready to sign.
    pub fn next_tag(&self, sender: Address, mut tag: RoutingTag) -> RoutingTag {
        tag.sequence = self.get_nonce(sender, tag.sequence_key());
        tag
    }

    /// Hash the account authorizes: everything but the signature, bound to
    /// this entry point and chain.
    pub fn user_op_hash(&self, chain: &Chain, op: &UserOperation) -> Hash {
        let mut buf = USER_OP_DOMAIN.to_canonical_bytes();
        buf.extend(self.address.to_canonical_bytes());
        buf.extend(chain.chain_id().to_canonical_bytes());
        buf.extend(op.sender.to_canonical_bytes());
        buf.extend(op.nonce.to_canonical_bytes());
        buf.extend(op.call_data.to_canonical_bytes());
        buf.extend(op.prefund.to_canonical_bytes());
        sha256(&buf)
    }

    /// Validates then executes `ops` against `kernel`.
    pub fn handle_ops(&mut self, chain: &mut Chain, kernel: &mut Kernel, ops: &[UserOperation]) -> Result<Vec<OpReceipt>> {
        let snapshot = chain.snapshot();
        let saved_kernel = kernel.clone();
        let saved_sequences = self.sequences.clone();

        let mut validated = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            match self.validate_op(chain, kernel, index, op) {
                Ok((op_hash, sequence, _)) => validated.push((op_hash, sequence)),
                Err(e) => {
                    warn!("batch of {} rejected: {}", ops.len(), e);
                    chain.restore(snapshot);
                    *kernel = saved_kernel;
                    self.sequences = saved_sequences;
                    return Err(e);
                }
            }
        }

        let mut receipts = Vec::with_capacity(ops.len());
        for (op, (op_hash, sequence)) in ops.iter().zip(validated) {
            let receipt = match kernel.execute_user_op(chain, self.address, op, op_hash) {
                Ok(return_data) => OpReceipt {
                    op_hash,
                    sender: op.sender,
                    sequence,
                    success: true,
                    revert_reason: None,
                    return_data,
                },
                Err(e) => {
                    warn!("operation {} reverted: {}", hex::encode(op_hash), e);
                    OpReceipt {
                        op_hash,
                        sender: op.sender,
                        sequence,
                        success: false,
                        revert_reason: Some(e.to_string()),
                        return_data: Vec::new(),
                    }
                }
            };
            chain.emit(Event::UserOperation {
                op_hash,
                sender: op.sender,
                sequence,
                success: receipt.success,
            });
            receipts.push(receipt);
        }
        info!(
            "handled {} operations, {} succeeded",
            receipts.len(),
            receipts.iter().filter(|r| r.success).count()
        );
        Ok(receipts)
    }

    /// Runs the validation phase for `op` on copies and reports the verdict.
    pub fn simulate_validation(&self, chain: &Chain, kernel: &Kernel, op: &UserOperation) -> Result<ValidationData> {
        let mut entry_point = self.clone();
        let mut chain = chain.clone();
        let mut kernel = kernel.clone();
        let (_, _, verdict) = entry_point.validate_op(&mut chain, &mut kernel, 0, op)?;
        Ok(verdict)
    }

    fn validate_op(
        &mut self,
        chain: &mut Chain,
        kernel: &mut Kernel,
        index: usize,
        op: &UserOperation,
    ) -> Result<(Hash, u64, ValidationData)> {
        let fail = |reason: String| KernelError::FailedOp { index, reason };

        if op.sender != kernel.address() {
            return Err(fail(format!("AA20 account not deployed: {}", op.sender)));
        }
        let tag = RoutingTag::decode(&op.nonce).map_err(|e| fail(format!("AA25 invalid account nonce: {}", e)))?;
        let key = (op.sender, tag.sequence_key());
        let expected = self.sequences.get(&key).copied().unwrap_or(0);
        if tag.sequence != expected {
            return Err(fail(format!(
                "AA25 invalid account nonce: expected {}, got {}",
                expected, tag.sequence
            )));
        }
        self.sequences.insert(key, expected + 1);

        let op_hash = self.user_op_hash(chain, op);
        let before = chain.balance_of(&self.address);
        let verdict = kernel
            .validate_user_op(chain, self.address, op, op_hash, op.prefund)
            .map_err(|e| fail(format!("AA23 reverted: {}", e)))?;
        if verdict.is_failure() {
            return Err(fail("AA24 signature error".to_string()));
        }
        if !verdict.is_within(chain.timestamp()) {
            return Err(fail("AA22 expired or not due".to_string()));
        }
        let paid = chain.balance_of(&self.address).saturating_sub(before);
        if paid < op.prefund {
            return Err(fail(format!("AA21 didn't pay prefund: {} of {}", paid, op.prefund)));
        }
        Ok((op_hash, tag.sequence, verdict))
    }
}
