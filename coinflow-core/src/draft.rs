//! Unsigned transaction under construction
//!
//! A [`TxDraft`] wraps the transaction being assembled together with the
//! outputs its inputs spend. The spent values and locking scripts are what
//! the verifier replays, and the first funded locking script is the reference
//! every later input must match.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::{OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::types::TX_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDraft {
    tx: Transaction,
    spent: Vec<TxOut>,
    reference_script: Option<ScriptBuf>,
}

impl Default for TxDraft {
    fn default() -> Self {
        Self::new()
    }
}

impl TxDraft {
    /// Empty version 2 transaction
    pub fn new() -> Self {
        Self {
            tx: Transaction {
                version: TX_VERSION,
                lock_time: LockTime::ZERO,
                input: Vec::new(),
                output: Vec::new(),
            },
            spent: Vec::new(),
            reference_script: None,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Mutable access for hooks that set lock times or reorder nothing else
    pub fn transaction_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }

    pub fn into_transaction(self) -> Transaction {
        self.tx
    }

    pub fn add_output(&mut self, value: u64, script_pubkey: ScriptBuf) {
        self.tx.output.push(TxOut { value, script_pubkey });
    }

    /// Append an input spending `outpoint`, recording what it spends
    pub fn add_input(&mut self, outpoint: OutPoint, spent: TxOut) {
        self.tx.input.push(TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
        self.spent.push(spent);
    }

    /// Outputs spent by each input, in input order
    pub fn spent_outputs(&self) -> &[TxOut] {
        &self.spent
    }

    /// Locking script of the first funded UTXO
    pub fn reference_script(&self) -> Option<&Script> {
        self.reference_script
            .as_deref()
            .or_else(|| self.spent.first().map(|spent| spent.script_pubkey.as_script()))
    }

    pub(crate) fn set_reference_script(&mut self, script: ScriptBuf) {
        self.reference_script = Some(script);
    }

    pub fn input_count(&self) -> usize {
        self.tx.input.len()
    }

    pub fn input_value(&self) -> u64 {
        self.spent.iter().map(|out| out.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.tx.output.iter().map(|out| out.value).sum()
    }

    /// Implicit fee: inputs minus outputs
    pub fn fee(&self) -> u64 {
        self.input_value().saturating_sub(self.output_value())
    }

    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Consensus serialization
    pub fn serialize(&self) -> Vec<u8> {
        serialize(&self.tx)
    }

    pub fn size(&self) -> usize {
        self.serialize().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_draft_accounting() {
        let mut draft = TxDraft::new();
        assert_eq!(draft.transaction().version, 2);

        let txid =
            Txid::from_str("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap();
        draft.add_input(
            OutPoint::new(txid, 0),
            TxOut {
                value: 50_000,
                script_pubkey: ScriptBuf::new(),
            },
        );
        draft.add_output(10_000, ScriptBuf::new());
        draft.add_output(38_000, ScriptBuf::new());

        assert_eq!(draft.input_count(), 1);
        assert_eq!(draft.input_value(), 50_000);
        assert_eq!(draft.output_value(), 48_000);
        assert_eq!(draft.fee(), 2_000);
        assert!(draft.transaction().input[0].script_sig.is_empty());
        assert_eq!(draft.size(), draft.serialize().len());
    }
}
