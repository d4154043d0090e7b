//! Configuration management for the transaction engine.
//!
//! Settings are stored in TOML. Every field has a default so a partial file
//! (or no file at all) yields a usable configuration. Values are validated
//! before they reach the engine.
//!
//! ```toml
//! [network]
//! name = "testnet"
//!
//! [fees]
//! max_fee = 10000
//! dust = 600
//! fallback_rate = 30
//! default_speed = "standard"
//!
//! [polling]
//! interval_secs = 5
//! max_attempts = 60
//! ```

use anyhow::{anyhow, Result};
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::{self, LogConfig, LogLevel};
use crate::poller::PollConfig;
use crate::types::{FeePolicy, TxExecutionSpeed, DEFAULT_DUST, DEFAULT_MAX_FEE, FALLBACK_FEE_RATE};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub fees: FeeConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Network selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// `bitcoin` (mainnet) or `testnet`
    #[serde(default = "default_network")]
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network(),
        }
    }
}

/// Fee ceiling, dust threshold and fee-rate fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_max_fee")]
    pub max_fee: u64,

    #[serde(default = "default_dust")]
    pub dust: u64,

    /// sat/byte used when the oracle is unreachable
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate: u64,

    #[serde(default)]
    pub default_speed: TxExecutionSpeed,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            max_fee: default_max_fee(),
            dust: default_dust(),
            fallback_rate: default_fallback_rate(),
            default_speed: TxExecutionSpeed::default(),
        }
    }
}

/// Confirmation polling cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Fee market oracle endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_url")]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: default_oracle_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Block explorer backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of an Esplora REST API; derived from the network when empty
    #[serde(default)]
    pub esplora_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries for read requests before the error is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            esplora_url: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&content)?;
        logging::log_config(
            LogLevel::Info,
            "loaded configuration",
            Some(json!({ "path": path.display().to_string(), "network": config.network.name })),
        );
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }
        fs::write(path, content).map_err(|e| anyhow!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Default location: `<config dir>/coinflow/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("coinflow").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.bitcoin_network()?;

        self.fee_policy()
            .validate()
            .map_err(|e| anyhow!("Invalid fee settings: {}", e))?;

        if self.polling.interval_secs == 0 {
            return Err(anyhow!("Invalid polling interval: must be greater than 0"));
        }
        if self.polling.max_attempts == 0 {
            return Err(anyhow!("Invalid polling attempts: must be greater than 0"));
        }
        if self.oracle.timeout_secs == 0 || self.backend.timeout_secs == 0 {
            return Err(anyhow!("Invalid timeout: must be greater than 0"));
        }

        Ok(())
    }

    /// Install the configured logger, or apply the configured level to the
    /// one already installed
    pub fn init_logging(&self) -> Result<()> {
        logging::init(&self.logging).map_err(|e| anyhow!(e))?;
        logging::set_log_level(self.logging.level);
        Ok(())
    }

    /// The configured network
    pub fn bitcoin_network(&self) -> Result<Network> {
        match self.network.name.to_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            other => Err(anyhow!("Invalid network type: {}", other)),
        }
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy::new(self.fees.max_fee, self.fees.dust).with_fallback_rate(self.fees.fallback_rate)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.polling.interval_secs),
            max_attempts: self.polling.max_attempts,
        }
    }

    /// Esplora base URL for the configured network
    pub fn esplora_url(&self) -> Result<String> {
        if let Some(url) = &self.backend.esplora_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        Ok(match self.bitcoin_network()? {
            Network::Bitcoin => "https://blockstream.info/api".to_string(),
            _ => "https://blockstream.info/testnet/api".to_string(),
        })
    }
}

// Default value functions

fn default_network() -> String {
    "testnet".to_string()
}

fn default_max_fee() -> u64 {
    DEFAULT_MAX_FEE
}

fn default_dust() -> u64 {
    DEFAULT_DUST
}

fn default_fallback_rate() -> u64 {
    FALLBACK_FEE_RATE
}

fn default_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    60
}

fn default_oracle_url() -> String {
    "https://mempool.space/api/v1/fees/recommended".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}
