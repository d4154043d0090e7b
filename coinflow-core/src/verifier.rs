//! Local script verification before broadcast
//!
//! Replays the consensus script interpreter for every signed input against
//! the value and locking script it spends. Nothing here touches the network;
//! a failure means the transaction was assembled or signed incorrectly and
//! must not be broadcast.

use bitcoin::consensus::encode::serialize;
use bitcoin::{Amount, Transaction, TxOut};
use log::debug;

use crate::draft::TxDraft;
use crate::error::{TxError, TxResult};

/// Verify every input of a signed transaction
pub fn verify_inputs(tx: &Transaction, spent: &[TxOut]) -> TxResult<()> {
    if spent.len() != tx.input.len() {
        return Err(TxError::ScriptVerificationFailed {
            index: spent.len().min(tx.input.len()),
            reason: format!(
                "{} inputs but {} recorded spent outputs",
                tx.input.len(),
                spent.len()
            ),
        });
    }

    let bytes = serialize(tx);
    for (index, output) in spent.iter().enumerate() {
        output
            .script_pubkey
            .verify(index, Amount::from_sat(output.value), &bytes)
            .map_err(|e| TxError::ScriptVerificationFailed {
                index,
                reason: e.to_string(),
            })?;
    }
    debug!("verified {} inputs of {}", spent.len(), tx.txid());
    Ok(())
}

/// Verify a signed draft
pub fn verify(draft: &TxDraft) -> TxResult<()> {
    verify_inputs(draft.transaction(), draft.spent_outputs())
}
