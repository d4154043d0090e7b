//! Error handling for the transaction engine
//!
//! Every stage of the pipeline (funding, fee estimation, signing, verification,
//! submission) reports failures through [`TxError`]. Variants carry the
//! context needed to explain the failure without re-deriving state: the
//! address involved, required versus available amounts, or the underlying
//! chain client error.
//!
//! # Usage
//!
//! ```
//! use coinflow_core::error::{ErrorCategory, TxError};
//!
//! let err = TxError::InsufficientBalance {
//!     address: "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8".to_string(),
//!     required: 20_000,
//!     available: 5_000,
//! };
//! assert_eq!(err.category(), ErrorCategory::Funding);
//! assert!(!err.is_retryable());
//! ```

use bitcoin::Network;
use std::fmt;
use thiserror::Error;

use crate::client::ChainClientError;

/// The main error type for transaction construction and submission
#[derive(Debug, Error)]
pub enum TxError {
    /// An address could not be decoded or belongs to another network
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The chain client reports a network the key policy does not cover
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(Network),

    /// A UTXO returned by the chain client could not be interpreted
    #[error("Malformed UTXO {tx_hash}:{output_index}: {reason}")]
    MalformedUtxo {
        tx_hash: String,
        output_index: u32,
        reason: String,
    },

    /// A script could not be assembled
    #[error("Invalid script: {0}")]
    InvalidScript(String),

    /// The address does not hold enough value for the outputs plus the fee ceiling
    #[error("Insufficient balance at {address}: required {required}, available {available}")]
    InsufficientBalance {
        address: String,
        required: u64,
        available: u64,
    },

    /// Funding could not close the gap using UTXOs that share one locking script
    #[error("Mismatched locking scripts at {address}: selected {selected} of {required} required")]
    MismatchedScripts {
        address: String,
        required: u64,
        selected: u64,
    },

    /// Explicit funding produced a different number of inputs than requested
    #[error("UTXO count mismatch: expected {expected} inputs, got {actual}")]
    UtxoCountMismatch { expected: usize, actual: usize },

    /// Funded inputs do not cover the requested value plus the fee
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// An output would be created below the dust threshold
    #[error("Dust output: {amount} satoshis (minimum is {minimum} satoshis)")]
    DustOutput { amount: u64, minimum: u64 },

    /// The caller's pre-condition rejected the transaction before funding
    #[error("Pre-condition check failed")]
    PreConditionFailed,

    /// The post-condition never held, or the submission was cancelled
    #[error("Post-condition check failed: {0}")]
    PostConditionFailed(String),

    /// The script interpreter rejected a signed input
    #[error("Script verification failed for input {index}: {reason}")]
    ScriptVerificationFailed { index: usize, reason: String },

    /// Signature hash computation or ECDSA signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Externally computed signatures do not match the input count
    #[error("Signature count mismatch: expected {expected}, got {actual}")]
    SignatureCountMismatch { expected: usize, actual: usize },

    /// A chain client call failed
    #[error("Chain client error: {0}")]
    Client(#[from] ChainClientError),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mnemonic or derivation path problems
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),
}

/// Type alias for a Result with TxError
pub type TxResult<T> = Result<T, TxError>;

/// Error category for logging and caller decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad address, unsupported network, malformed UTXO or script
    Validation,
    /// Balance, script homogeneity, input counts and dust
    Funding,
    /// Pre- and post-condition outcomes
    Condition,
    /// Chain client failures
    Network,
    /// Script interpreter failures
    Verification,
    /// Signature production failures
    Signing,
    /// Configuration and key derivation
    Config,
}

impl ErrorCategory {
    /// Convert the error category to a string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Funding => "Funding",
            ErrorCategory::Condition => "Condition",
            ErrorCategory::Network => "Network",
            ErrorCategory::Verification => "Verification",
            ErrorCategory::Signing => "Signing",
            ErrorCategory::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TxError {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            TxError::InvalidAddress(_)
            | TxError::UnsupportedNetwork(_)
            | TxError::MalformedUtxo { .. }
            | TxError::InvalidScript(_) => ErrorCategory::Validation,
            TxError::InsufficientBalance { .. }
            | TxError::MismatchedScripts { .. }
            | TxError::UtxoCountMismatch { .. }
            | TxError::InsufficientFunds { .. }
            | TxError::DustOutput { .. } => ErrorCategory::Funding,
            TxError::PreConditionFailed | TxError::PostConditionFailed(_) => {
                ErrorCategory::Condition
            }
            TxError::Client(_) => ErrorCategory::Network,
            TxError::ScriptVerificationFailed { .. } => ErrorCategory::Verification,
            TxError::Signing(_) | TxError::SignatureCountMismatch { .. } => ErrorCategory::Signing,
            TxError::Config(_) | TxError::KeyDerivation(_) => ErrorCategory::Config,
        }
    }

    /// Whether repeating the same call may succeed without changing its inputs.
    ///
    /// Only chain client failures qualify. Funding and estimation failures
    /// must be rebuilt by the caller since a retry could select different UTXOs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxError::Client(err) if err.is_transient())
    }

    /// Create a new malformed UTXO error
    pub fn malformed_utxo<S: Into<String>>(tx_hash: &str, output_index: u32, reason: S) -> Self {
        TxError::MalformedUtxo {
            tx_hash: tx_hash.to_string(),
            output_index,
            reason: reason.into(),
        }
    }
}

impl From<bitcoin::address::Error> for TxError {
    fn from(err: bitcoin::address::Error) -> Self {
        TxError::InvalidAddress(err.to_string())
    }
}

impl From<bitcoin::secp256k1::Error> for TxError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        TxError::Signing(err.to_string())
    }
}

impl From<bitcoin::sighash::Error> for TxError {
    fn from(err: bitcoin::sighash::Error) -> Self {
        TxError::Signing(format!("Signature hash error: {}", err))
    }
}

impl From<bitcoin::script::PushBytesError> for TxError {
    fn from(err: bitcoin::script::PushBytesError) -> Self {
        TxError::InvalidScript(err.to_string())
    }
}

impl From<bitcoin::bip32::Error> for TxError {
    fn from(err: bitcoin::bip32::Error) -> Self {
        TxError::KeyDerivation(err.to_string())
    }
}
