//! Common data types for the transaction engine
//!
//! These types describe the values that flow between the chain client, the
//! funding selector and the signer. They never carry private key material.

use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TxError;

/// Protocol version of every transaction the engine builds
pub const TX_VERSION: i32 = 2;

/// Default minimum permissible output value in satoshis
pub const DEFAULT_DUST: u64 = 600;

/// Default ceiling on the absolute fee of a transaction in satoshis
pub const DEFAULT_MAX_FEE: u64 = 10_000;

/// Fee rate (sat/byte) used when the fee oracle cannot be reached
pub const FALLBACK_FEE_RATE: u64 = 30;

/// UTXO limit used when every unspent output at an address is wanted
pub const ALL_UTXOS: usize = 999_999;

/// An unspent transaction output as reported by a chain client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
    /// Hash of the transaction that created the output, in display order
    pub tx_hash: String,
    /// Index of the output within that transaction
    pub output_index: u32,
    /// Hex encoded locking script
    pub locking_script: String,
    /// Value in satoshis
    pub amount: u64,
}

impl Utxo {
    pub fn new(
        tx_hash: impl Into<String>,
        output_index: u32,
        locking_script: impl Into<String>,
        amount: u64,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            output_index,
            locking_script: locking_script.into(),
            amount,
        }
    }

    /// The outpoint this UTXO is identified by
    pub fn outpoint(&self) -> Result<OutPoint, TxError> {
        let txid = Txid::from_str(&self.tx_hash).map_err(|e| {
            TxError::malformed_utxo(&self.tx_hash, self.output_index, format!("bad tx hash: {}", e))
        })?;
        Ok(OutPoint::new(txid, self.output_index))
    }

    /// Decode the hex locking script
    pub fn script_pubkey(&self) -> Result<ScriptBuf, TxError> {
        let bytes = hex::decode(&self.locking_script).map_err(|e| {
            TxError::malformed_utxo(
                &self.tx_hash,
                self.output_index,
                format!("bad locking script: {}", e),
            )
        })?;
        Ok(ScriptBuf::from(bytes))
    }
}

/// Coarse fee-rate selection mapped to a market-sourced rate
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TxExecutionSpeed {
    /// Confirmation within a few hours
    Slow,
    /// Confirmation within about half an hour
    #[default]
    Standard,
    /// Next block
    Fast,
}

impl fmt::Display for TxExecutionSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxExecutionSpeed::Slow => write!(f, "slow"),
            TxExecutionSpeed::Standard => write!(f, "standard"),
            TxExecutionSpeed::Fast => write!(f, "fast"),
        }
    }
}

impl FromStr for TxExecutionSpeed {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slow" => Ok(TxExecutionSpeed::Slow),
            "standard" => Ok(TxExecutionSpeed::Standard),
            "fast" => Ok(TxExecutionSpeed::Fast),
            other => Err(TxError::Config(format!("Unknown speed tier: {}", other))),
        }
    }
}

/// Fee ceiling, dust threshold and fallback rate applied while assembling
///
/// Passed into the engine explicitly so alternate policies can be exercised
/// side by side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Maximum absolute fee in satoshis
    pub max_fee: u64,
    /// Minimum output value in satoshis
    pub dust: u64,
    /// Rate in sat/byte used when the oracle fails
    pub fallback_rate: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            max_fee: DEFAULT_MAX_FEE,
            dust: DEFAULT_DUST,
            fallback_rate: FALLBACK_FEE_RATE,
        }
    }
}

impl FeePolicy {
    pub fn new(max_fee: u64, dust: u64) -> Self {
        Self {
            max_fee,
            dust,
            ..Default::default()
        }
    }

    pub fn with_fallback_rate(mut self, rate: u64) -> Self {
        self.fallback_rate = rate;
        self
    }

    /// Whether an output of this value would be rejected
    pub fn is_dust(&self, amount: u64) -> bool {
        amount < self.dust
    }

    /// Check the ceiling leaves room above the dust threshold
    pub fn validate(&self) -> Result<(), TxError> {
        if self.max_fee <= self.dust {
            return Err(TxError::Config(format!(
                "max_fee ({}) must exceed dust ({})",
                self.max_fee, self.dust
            )));
        }
        if self.fallback_rate == 0 {
            return Err(TxError::Config("fallback_rate must be greater than 0".to_string()));
        }
        Ok(())
    }
}
