//! In-process host chain the account runs on.
//!
//! Holds native balances, per-contract storage, deployed code and an event
//! log. Every call frame is journaled: a failing call leaves the state exactly
//! as it was before the frame started.

pub mod balance;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::account::types::{ModuleType, ValidationIdentity};
use crate::encoding::{Address, Hash, Selector};
use crate::error::{KernelError, Result};
use crate::modules::Module;

pub use balance::BalanceStore;

/// Mutable world state. Cloned to take a snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct State {
    pub balances: BalanceStore,
    storage: HashMap<Address, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl State {
    pub fn load(&self, owner: &Address, key: &[u8]) -> Option<&Vec<u8>> {
        self.storage.get(owner).and_then(|slots| slots.get(key))
    }

    pub fn store(&mut self, owner: Address, key: Vec<u8>, value: Vec<u8>) {
        self.storage.entry(owner).or_default().insert(key, value);
    }

    pub fn clear(&mut self, owner: &Address, key: &[u8]) {
        if let Some(slots) = self.storage.get_mut(owner) {
            slots.remove(key);
            if slots.is_empty() {
                self.storage.remove(owner);
            }
        }
    }
}

/// Something that happened on chain, kept in order of emission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    ModuleInstalled {
        account: Address,
        module_type: ModuleType,
        module: Address,
    },
    ModuleUninstalled {
        account: Address,
        module_type: ModuleType,
        module: Address,
    },
    ModuleUninstallResult {
        account: Address,
        module: Address,
        success: bool,
    },
    RootIdentityChanged {
        account: Address,
        identity: ValidationIdentity,
    },
    EpochInvalidated {
        account: Address,
        epoch: u32,
    },
    SelectorGranted {
        account: Address,
        identity: ValidationIdentity,
        selector: Selector,
    },
    TryExecuteUnsuccessful {
        account: Address,
        index: usize,
        reason: String,
    },
    UserOperation {
        op_hash: Hash,
        sender: Address,
        sequence: u64,
        success: bool,
    },
    Log {
        emitter: Address,
        topic: String,
        data: Vec<u8>,
    },
}

/// Frame handed to code invoked through `Chain::call` / `Chain::delegate_call`.
pub struct CallContext<'a> {
    pub chain: &'a mut Chain,
    /// Storage owner of this frame (the account itself for delegate calls).
    pub this: Address,
    /// Address whose code is running.
    pub code_address: Address,
    pub caller: Address,
    pub value: u128,
}

impl CallContext<'_> {
    pub fn load(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.chain.state.load(&self.this, key).cloned()
    }

    pub fn store(&mut self, key: &[u8], value: Vec<u8>) {
        self.chain.state.store(self.this, key.to_vec(), value);
    }

    pub fn emit(&mut self, topic: &str, data: Vec<u8>) {
        let emitter = self.this;
        self.chain.emit(Event::Log {
            emitter,
            topic: topic.to_string(),
            data,
        });
    }
}

/// Code deployed at an address.
pub trait Contract: Send + Sync {
    fn name(&self) -> &str;

    fn call(&self, _ctx: &mut CallContext<'_>, _data: &[u8]) -> Result<Vec<u8>> {
        Err(KernelError::CallFailed(format!("{} does not accept calls", self.name())))
    }

    fn as_module(&self) -> Option<&dyn Module> {
        None
    }
}

/// Captured state plus event log length; `Chain::restore` rewinds to it.
#[derive(Clone)]
pub struct Snapshot {
    state: State,
    events_len: usize,
}

#[derive(Clone)]
pub struct Chain {
    chain_id: u64,
    timestamp: u64,
    state: State,
    code: HashMap<Address, Arc<dyn Contract>>,
    events: Vec<Event>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("chain_id", &self.chain_id)
            .field("timestamp", &self.timestamp)
            .field("contracts", &self.code.len())
            .field("events", &self.events.len())
            .finish()
    }
}

impl Chain {
    pub fn new(chain_id: u64, timestamp: u64) -> Self {
        Self {
            chain_id,
            timestamp,
            state: State::default(),
            code: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    pub fn advance(&mut self, seconds: u64) {
        self.timestamp += seconds;
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    // --- Code ---

    pub fn deploy(&mut self, address: Address, code: Arc<dyn Contract>) -> Result<()> {
        if self.code.contains_key(&address) {
            return Err(KernelError::CodeExists(address));
        }
        debug!("deployed {} at {}", code.name(), address);
        self.code.insert(address, code);
        Ok(())
    }

    pub fn has_code(&self, address: &Address) -> bool {
        self.code.contains_key(address)
    }

    pub fn code_at(&self, address: &Address) -> Result<Arc<dyn Contract>> {
        self.code.get(address).cloned().ok_or(KernelError::NoCode(*address))
    }

    // --- Balances ---

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.state.balances.get_balance(address)
    }

    pub fn set_balance(&mut self, address: &Address, amount: u128) {
        self.state.balances.set_balance(address, amount);
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<()> {
        self.state.balances.transfer(from, to, amount)
    }

    // --- Events ---

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    // --- Journaling ---

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state.clone(),
            events_len: self.events.len(),
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.state = snapshot.state;
        self.events.truncate(snapshot.events_len);
    }

    /// Value transfer plus code invocation at `to`. Addresses without code
    /// accept plain transfers and return empty data.
    pub fn call(&mut self, from: Address, to: Address, value: u128, data: &[u8]) -> Result<Vec<u8>> {
        let snapshot = self.snapshot();
        let result = self.call_frame(from, to, value, data);
        if result.is_err() {
            self.restore(snapshot);
        }
        result
    }

    fn call_frame(&mut self, from: Address, to: Address, value: u128, data: &[u8]) -> Result<Vec<u8>> {
        self.transfer(&from, &to, value)?;
        let code = match self.code.get(&to) {
            Some(code) => code.clone(),
            None => return Ok(Vec::new()),
        };
        let mut ctx = CallContext {
            chain: &mut *self,
            this: to,
            code_address: to,
            caller: from,
            value,
        };
        code.call(&mut ctx, data)
    }

    /// Runs `target`'s code with `account` as the storage owner and the
    /// original caller preserved.
    pub fn delegate_call(&mut self, account: Address, caller: Address, target: Address, data: &[u8]) -> Result<Vec<u8>> {
        let code = self.code_at(&target)?;
        let snapshot = self.snapshot();
        let mut ctx = CallContext {
            chain: &mut *self,
            this: account,
            code_address: target,
            caller,
            value: 0,
        };
        let result = code.call(&mut ctx, data);
        if result.is_err() {
            self.restore(snapshot);
        }
        result
    }
}
