//! Per-call strategy objects
//!
//! Callers customize a transaction without subclassing the engine by passing
//! hooks along with each request:
//!
//! - [`PreCondition`] runs once against the unsigned draft before funding. It
//!   usually adds the payment outputs and may refuse the transaction, for
//!   example when a contract is already funded.
//! - [`ScriptExtension`] pushes extra data (such as a revealed secret) into
//!   every signature script, between the public key and the contract.
//! - [`PostCondition`] is polled after broadcast until the intended effect is
//!   visible on chain.
//! - [`TxInUpdate`] adjusts each input (sequence numbers for time locks) before
//!   its signature hash is computed.
//!
//! Plain closures implement the traits, so simple cases need no new types.

use async_trait::async_trait;
use bitcoin::script::Builder;
use bitcoin::{Transaction, TxIn};

use crate::draft::TxDraft;
use crate::error::TxError;

/// Checks and extends an unsigned transaction before funding
#[async_trait]
pub trait PreCondition: Send + Sync {
    /// Return false to abort with `PreConditionFailed`
    async fn check(&self, draft: &mut TxDraft) -> bool;
}

#[async_trait]
impl<F> PreCondition for F
where
    F: Fn(&mut TxDraft) -> bool + Send + Sync,
{
    async fn check(&self, draft: &mut TxDraft) -> bool {
        self(draft)
    }
}

/// Confirms the broadcast transaction had its intended effect
#[async_trait]
pub trait PostCondition: Send + Sync {
    async fn check(&self, tx: &Transaction) -> bool;
}

#[async_trait]
impl<F> PostCondition for F
where
    F: Fn(&Transaction) -> bool + Send + Sync,
{
    async fn check(&self, tx: &Transaction) -> bool {
        self(tx)
    }
}

/// Adds pushes to a signature script after the public key
pub trait ScriptExtension: Send + Sync {
    fn extend(&self, builder: Builder) -> Result<Builder, TxError>;
}

impl<F> ScriptExtension for F
where
    F: Fn(Builder) -> Result<Builder, TxError> + Send + Sync,
{
    fn extend(&self, builder: Builder) -> Result<Builder, TxError> {
        self(builder)
    }
}

/// Mutates an input before its signature hash is computed
pub type TxInUpdate = dyn Fn(&mut TxIn) + Send + Sync;
