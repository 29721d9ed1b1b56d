//! Persistent account records on sled.
//!
//! Keys are `account:<address>`; values are bincode `AccountRecord`s wrapped
//! with a format version so older snapshots can be recognized.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::kernel::{AccountRecord, Kernel};
use super::registry::REGISTRY_VERSION;
use crate::encoding::{self, Address};
use crate::error::{KernelError, Result};

const ACCOUNT_PREFIX: &str = "account:";

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    version: u32,
    record: AccountRecord,
}

pub struct AccountStore {
    db: sled::Db,
}

impl AccountStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!("account store opened at {}", path.as_ref().display());
        Ok(Self { db })
    }

    /// In-memory store, removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    // Generic helper: put
    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = encoding::encode(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    // Generic helper: get
    fn get<T: for<'a> Deserialize<'a>>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(raw) => Ok(Some(encoding::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, kernel: &Kernel) -> Result<()> {
        let stored = StoredRecord {
            version: REGISTRY_VERSION,
            record: kernel.to_record(),
        };
        self.put(&format!("{}{}", ACCOUNT_PREFIX, kernel.address()), &stored)?;
        self.db.flush()?;
        debug!("saved account {}", kernel.address());
        Ok(())
    }

    pub fn load(&self, address: &Address) -> Result<Option<Kernel>> {
        let stored: Option<StoredRecord> = self.get(&format!("{}{}", ACCOUNT_PREFIX, address))?;
        match stored {
            Some(stored) if stored.version != REGISTRY_VERSION => Err(KernelError::Database(format!(
                "account {} stored with format {}, expected {}",
                address, stored.version, REGISTRY_VERSION
            ))),
            Some(stored) => Ok(Some(Kernel::from_record(stored.record))),
            None => Ok(None),
        }
    }

    pub fn remove(&self, address: &Address) -> Result<bool> {
        let removed = self.db.remove(format!("{}{}", ACCOUNT_PREFIX, address).as_bytes())?;
        Ok(removed.is_some())
    }

    /// Every stored account address.
    pub fn list(&self) -> Result<Vec<Address>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(ACCOUNT_PREFIX.as_bytes()) {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key[ACCOUNT_PREFIX.len()..]).to_string();
            out.push(text.parse()?);
        }
        Ok(out)
    }
}

/// Human-readable view of an account for `inspect`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountSummary {
    pub address: String,
    pub account_id: String,
    pub entry_point: String,
    pub delegate_call_enabled: bool,
    pub root: Option<String>,
    pub current_epoch: u32,
    pub valid_epoch_from: u32,
    pub validations: Vec<ValidationSummary>,
    pub executors: Vec<(String, String)>,
    pub fallbacks: Vec<FallbackSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidationSummary {
    pub identity: String,
    pub epoch: u32,
    pub hook: String,
    pub selectors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FallbackSummary {
    pub selector: String,
    pub target: String,
    pub hook: String,
    pub call_type: String,
}

impl AccountSummary {
    pub fn of(kernel: &Kernel) -> Self {
        let registry = kernel.registry();
        Self {
            address: kernel.address().to_string(),
            account_id: kernel.account_id().to_string(),
            entry_point: kernel.entry_point().to_string(),
            delegate_call_enabled: kernel.delegate_call_enabled(),
            root: registry.root().map(|r| r.to_string()),
            current_epoch: registry.current_epoch(),
            valid_epoch_from: registry.valid_epoch_from(),
            validations: registry
                .installed_validations()
                .into_iter()
                .map(|(identity, config)| ValidationSummary {
                    identity: identity.to_string(),
                    epoch: config.epoch,
                    hook: config.hook.to_string(),
                    selectors: registry
                        .allowed_selectors_of(&identity)
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                })
                .collect(),
            executors: registry
                .installed_executors()
                .into_iter()
                .map(|(executor, config)| (executor.to_string(), config.hook.to_string()))
                .collect(),
            fallbacks: registry
                .installed_selectors()
                .into_iter()
                .map(|(selector, config)| FallbackSummary {
                    selector: selector.to_string(),
                    target: config.target.to_string(),
                    hook: config.hook.to_string(),
                    call_type: format!("{:?}", config.call_type),
                })
                .collect(),
        }
    }
}
