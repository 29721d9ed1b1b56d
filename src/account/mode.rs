//! Execution mode descriptor and execution payload codecs.
//!
//! Mode layout (32 bytes): `[callType:1][execType:1][unused:4][modeSelector:4][payload:22]`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encoding::{self, Address};
use crate::error::{KernelError, Result};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallType {
    Single,
    Batch,
    /// Reserved read-only shape; never executed.
    Static,
    DelegateCall,
}

impl CallType {
    pub fn to_byte(self) -> u8 {
        match self {
            CallType::Single => 0x00,
            CallType::Batch => 0x01,
            CallType::Static => 0xFE,
            CallType::DelegateCall => 0xFF,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(CallType::Single),
            0x01 => Ok(CallType::Batch),
            0xFE => Ok(CallType::Static),
            0xFF => Ok(CallType::DelegateCall),
            other => Err(KernelError::UnsupportedCallType(other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecType {
    RevertOnFailure,
    BestEffort,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExecutionMode {
    pub call_type: CallType,
    pub exec_type: ExecType,
    pub mode_selector: [u8; 4],
    pub payload: [u8; 22],
}

impl ExecutionMode {
    pub const DEFAULT_SELECTOR: [u8; 4] = [0u8; 4];

    pub fn new(call_type: CallType, exec_type: ExecType) -> Self {
        Self {
            call_type,
            exec_type,
            mode_selector: Self::DEFAULT_SELECTOR,
            payload: [0u8; 22],
        }
    }

    pub fn single() -> Self {
        Self::new(CallType::Single, ExecType::RevertOnFailure)
    }

    pub fn batch() -> Self {
        Self::new(CallType::Batch, ExecType::RevertOnFailure)
    }

    pub fn delegate() -> Self {
        Self::new(CallType::DelegateCall, ExecType::RevertOnFailure)
    }

    pub fn best_effort(mut self) -> Self {
        self.exec_type = ExecType::BestEffort;
        self
    }

    pub fn decode(raw: &[u8; 32]) -> Result<Self> {
        let call_type = CallType::from_byte(raw[0])?;
        let exec_type = match raw[1] {
            0x00 => ExecType::RevertOnFailure,
            0x01 => ExecType::BestEffort,
            other => {
                return Err(KernelError::UnsupportedExecutionMode(format!("unknown exec type 0x{:02x}", other)))
            }
        };
        let mut mode_selector = [0u8; 4];
        mode_selector.copy_from_slice(&raw[6..10]);
        let mut payload = [0u8; 22];
        payload.copy_from_slice(&raw[10..32]);
        Ok(Self {
            call_type,
            exec_type,
            mode_selector,
            payload,
        })
    }

    pub fn encode(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0] = self.call_type.to_byte();
        out[1] = match self.exec_type {
            ExecType::RevertOnFailure => 0x00,
            ExecType::BestEffort => 0x01,
        };
        out[6..10].copy_from_slice(&self.mode_selector);
        out[10..32].copy_from_slice(&self.payload);
        out
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/0x{}", self.call_type, self.exec_type, hex::encode(self.mode_selector))
    }
}

/// One sub-call.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Execution {
    pub target: Address,
    pub value: u128,
    pub call_data: Vec<u8>,
}

impl Execution {
    pub fn new(target: Address, value: u128, call_data: Vec<u8>) -> Self {
        Self {
            target,
            value,
            call_data,
        }
    }
}

/// `[target:20][value:32][calldata]`
pub fn encode_single(exec: &Execution) -> Vec<u8> {
    let mut out = Vec::with_capacity(52 + exec.call_data.len());
    out.extend_from_slice(exec.target.as_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&exec.value.to_be_bytes());
    out.extend_from_slice(&exec.call_data);
    out
}

pub fn decode_single(data: &[u8]) -> Result<Execution> {
    if data.len() < 52 {
        return Err(KernelError::Deserialization(format!("single execution needs 52 bytes, got {}", data.len())));
    }
    if data[20..36].iter().any(|b| *b != 0) {
        return Err(KernelError::Deserialization("execution value exceeds u128".to_string()));
    }
    let mut value = [0u8; 16];
    value.copy_from_slice(&data[36..52]);
    Ok(Execution {
        target: Address::from_slice(&data[..20])?,
        value: u128::from_be_bytes(value),
        call_data: data[52..].to_vec(),
    })
}

pub fn encode_batch(execs: &[Execution]) -> Result<Vec<u8>> {
    encoding::encode(&execs)
}

pub fn decode_batch(data: &[u8]) -> Result<Vec<Execution>> {
    encoding::decode(data)
}

/// `[target:20][calldata]`
pub fn encode_delegate(target: Address, call_data: &[u8]) -> Vec<u8> {
    let mut out = target.as_bytes().to_vec();
    out.extend_from_slice(call_data);
    out
}

pub fn decode_delegate(data: &[u8]) -> Result<(Address, Vec<u8>)> {
    if data.len() < 20 {
        return Err(KernelError::Deserialization("delegate execution needs a target".to_string()));
    }
    Ok((Address::from_slice(&data[..20])?, data[20..].to_vec()))
}

/// Per-item result of a dispatched execution.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub enum CallOutcome {
    Success(Vec<u8>),
    Failed(String),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }
}
