use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::encoding::Address;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct KernelConfig {
    pub account: AccountSettings,
    pub chain: ChainSettings,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AccountSettings {
    /// The one caller allowed to drive validation and the hook-checked
    /// execute.
    pub entry_point: Address,
    /// Permits delegate-shaped execution and fallbacks.
    #[serde(default)]
    pub delegate_call_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChainSettings {
    pub chain_id: u64,
    #[serde(default)]
    pub genesis_timestamp: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            account: AccountSettings {
                entry_point: Address::from_low_u64(0x4337),
                delegate_call_enabled: false,
            },
            chain: ChainSettings {
                chain_id: 31337,
                genesis_timestamp: 0,
            },
            storage: StorageConfig {
                db_path: "./data/accounts".to_string(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn load_or_default(path: &str) -> Self {
        if std::path::Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => {
                        info!("Config loaded from {}", path);
                        c
                    }
                    Err(e) => {
                        warn!("Error parsing config: {}. Using defaults.", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!("Error reading config: {}. Using defaults.", e);
                    Self::default()
                }
            }
        } else {
            info!("Config file not found at '{}'. Using defaults.", path);
            Self::default()
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
