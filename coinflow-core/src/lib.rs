//! Coinflow core library
//!
//! This crate funds, prices, signs, verifies, broadcasts and tracks Bitcoin
//! transactions that spend pay-to-public-key-hash outputs and pay-to-script-hash
//! contracts. Blockchain access is abstracted behind [`ChainClient`], so the
//! same engine runs against block explorers, full nodes or an in-memory mock.
//!
//! # Modules
//!
//! - `types`: UTXOs, speed tiers and the fee/dust policy
//! - `error`: Error taxonomy shared by every stage
//! - `config`: TOML configuration
//! - `logging`: Logger installation and structured pipeline events
//! - `keys`: Public key serialization, addresses and subordinate scripts
//! - `client`: Chain client contract and an in-memory mock
//! - `hooks`: Pre-condition, post-condition and script extension traits
//! - `draft`: The unsigned transaction under construction
//! - `funding`: Homogeneous-script UTXO selection
//! - `fee`: Fee oracles, size based fees and the fee ceiling
//! - `signer`: Signature hashes and signature scripts
//! - `verifier`: Local script execution before broadcast
//! - `builder`: Transactions from explicit UTXO lists, signed externally
//! - `poller`: Broadcast and confirmation polling
//! - `account`: The single-key transaction pipeline
//! - `contract`: Hash-lock contracts and ready-made hooks
//! - `wallet`: BIP-39/BIP-32 account derivation
//!
//! # Security Considerations
//!
//! - Private keys never leave [`Account`] and are only read
//! - Every signed transaction is verified locally before it is broadcast
//! - Seeds and hash-lock secrets are zeroized on drop
//! - Identifiers are shortened before they are logged

/// Common data types
pub mod types;

/// Error taxonomy
pub mod error;

/// Configuration management
pub mod config;

/// Logging infrastructure
pub mod logging;

/// Keys, addresses and subordinate scripts
pub mod keys;

/// Chain client contract
pub mod client;

/// Per-call strategy hooks
pub mod hooks;

/// Unsigned transaction drafts
pub mod draft;

/// UTXO funding
pub mod funding;

/// Fee estimation
pub mod fee;

/// Signing
pub mod signer;

/// Local verification
pub mod verifier;

/// Externally signed transactions
pub mod builder;

/// Broadcast and confirmation polling
pub mod poller;

/// Single-key accounts
pub mod account;

/// Contract scripts and hooks
pub mod contract;

/// Mnemonic wallets
pub mod wallet;

pub use account::{Account, BuiltTransaction, TxRequest};
pub use builder::{BuiltTx, TxBuilder};
pub use client::{ChainClient, ChainClientError, ChainClientExt, MockChainClient};
pub use config::Config;
pub use error::{ErrorCategory, TxError, TxResult};
pub use fee::{FeeOracle, FeeOracleError, FeeRates, StaticFeeOracle};
pub use hooks::{PostCondition, PreCondition, ScriptExtension, TxInUpdate};
pub use poller::{InstantTimer, PollConfig, SubmissionState, Timer, TokioTimer};
pub use types::{FeePolicy, TxExecutionSpeed, Utxo};
pub use wallet::Wallet;

// Re-export the bitcoin types that appear in the public API
pub use bitcoin::{Address, Network, PublicKey, Script, ScriptBuf, Transaction, Txid};
pub use tokio_util::sync::CancellationToken;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
///
/// Installs the default logger. Safe to call more than once; only the first
/// call has any effect.
pub fn init() -> Result<(), String> {
    logging::init(&logging::LogConfig::default()).map_err(|e| format!("Failed to initialize logging: {}", e))
}
