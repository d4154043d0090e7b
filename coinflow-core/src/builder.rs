//! Transactions assembled from explicit UTXO lists
//!
//! Unlike an [`Account`](crate::account::Account), the builder never holds a
//! private key. It produces the unsigned transaction together with one
//! signature hash per input; the caller signs those hashes elsewhere (a
//! hardware device, a threshold signing service) and hands the signatures
//! back through [`BuiltTx::inject_sigs`].
//!
//! Inputs come in two groups. Primary inputs spend the key's own P2PKH
//! outputs; contract inputs spend P2SH outputs of an optional contract and
//! start at the split point.

use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{self, ecdsa::Signature};
use bitcoin::sighash::LegacySighash;
use bitcoin::{Address, PublicKey, Script, ScriptBuf, Transaction, TxOut, Txid};
use log::info;
use serde_json::json;
use std::sync::Arc;

use crate::client::ChainClient;
use crate::draft::TxDraft;
use crate::error::{TxError, TxResult};
use crate::funding::accept_utxo;
use crate::keys::{decode_address, push_bytes, public_key_to_address, script_address, serialize_public_key};
use crate::logging::{self, sanitize_for_logging, LogLevel};
use crate::signer::{inject_signatures, signature_hash};
use crate::types::{FeePolicy, Utxo};
use crate::verifier;

/// Value of the output marking the recipient of an Omni send
pub const OMNI_REFERENCE: u64 = 546;

/// OP_RETURN script carrying an Omni simple send
///
/// The payload is `omni`, a zero version and transaction type, then the
/// property id and the amount, both big-endian.
pub fn omni_script(token: u32, amount: u64) -> TxResult<ScriptBuf> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(b"omni");
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(&token.to_be_bytes());
    payload.extend_from_slice(&amount.to_be_bytes());
    Ok(Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(push_bytes(&payload)?)
        .into_script())
}

/// Inputs added, outputs still to come
struct Funded {
    draft: TxDraft,
    public_key: PublicKey,
    from: Address,
    primary_script: Option<ScriptBuf>,
    split: usize,
}

/// Assembles transactions with a fixed fee
pub struct TxBuilder {
    client: Arc<dyn ChainClient>,
    policy: FeePolicy,
    fee: u64,
}

impl TxBuilder {
    /// Builder paying `max_fee - dust`, the largest fee the clamp can keep
    pub fn new(client: Arc<dyn ChainClient>, policy: FeePolicy) -> Self {
        let fee = policy.max_fee.saturating_sub(policy.dust);
        Self { client, policy, fee }
    }

    /// Use a different fixed fee
    pub fn with_fee(mut self, fee: u64) -> TxResult<Self> {
        if fee.saturating_add(self.policy.dust) > self.policy.max_fee {
            return Err(TxError::Config(format!(
                "fee {} leaves no room for dust {} under max_fee {}",
                fee, self.policy.dust, self.policy.max_fee
            )));
        }
        self.fee = fee;
        Ok(self)
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Build from caller-supplied UTXO lists
    ///
    /// Every UTXO of each list must share that list's first locking script;
    /// a skipped UTXO fails the build with `UtxoCountMismatch`.
    pub fn build(
        &self,
        public_key: &secp256k1::PublicKey,
        to: &str,
        contract: Option<&Script>,
        value: u64,
        primary_utxos: &[Utxo],
        contract_utxos: &[Utxo],
    ) -> TxResult<BuiltTx> {
        let destination = decode_address(to, self.client.network())?;
        let mut funded = self.fund(public_key, contract, primary_utxos, contract_utxos)?;

        let available = funded.draft.input_value();
        let needed = value.saturating_add(self.fee);
        if available < needed {
            return Err(TxError::InsufficientFunds { needed, available });
        }

        if value > 0 {
            if self.policy.is_dust(value) {
                return Err(TxError::DustOutput {
                    amount: value,
                    minimum: self.policy.dust,
                });
            }
            funded.draft.add_output(value, destination.script_pubkey());
        }
        let change = available - needed;
        if change > self.policy.dust {
            funded.draft.add_output(change, funded.from.script_pubkey());
        }
        if funded.draft.transaction().output.is_empty() {
            return Err(TxError::DustOutput {
                amount: change,
                minimum: self.policy.dust,
            });
        }

        logging::log_transaction(
            LogLevel::Info,
            "built transaction",
            Some(json!({
                "from": sanitize_for_logging(&funded.from.to_string()),
                "to": sanitize_for_logging(to),
                "value": value,
                "fee": self.fee,
                "primary_inputs": funded.split,
                "contract_inputs": funded.draft.input_count() - funded.split,
                "outputs": funded.draft.transaction().output.len(),
            })),
        );
        self.finish(funded, contract)
    }

    /// Build an Omni simple send of `token_value` units of property `token`
    ///
    /// `to` receives an [`OMNI_REFERENCE`] output followed by the OP_RETURN
    /// payload from [`omni_script`]. The inputs must cover `btc_value`, the
    /// fee and the reference output; what is left above dust returns to the
    /// key's address.
    #[allow(clippy::too_many_arguments)]
    pub fn build_omni(
        &self,
        public_key: &secp256k1::PublicKey,
        to: &str,
        contract: Option<&Script>,
        token: u32,
        token_value: u64,
        btc_value: u64,
        primary_utxos: &[Utxo],
        contract_utxos: &[Utxo],
    ) -> TxResult<BuiltTx> {
        if token_value == 0 {
            return Err(TxError::InvalidScript("omni send of zero tokens".to_string()));
        }
        let destination = decode_address(to, self.client.network())?;
        let mut funded = self.fund(public_key, contract, primary_utxos, contract_utxos)?;

        let available = funded.draft.input_value();
        let needed = btc_value.saturating_add(self.fee).saturating_add(OMNI_REFERENCE);
        if available < needed {
            return Err(TxError::InsufficientFunds { needed, available });
        }

        funded.draft.add_output(OMNI_REFERENCE, destination.script_pubkey());
        funded.draft.add_output(0, omni_script(token, token_value)?);
        let change = available - self.fee - OMNI_REFERENCE;
        if change > self.policy.dust {
            funded.draft.add_output(change, funded.from.script_pubkey());
        }

        logging::log_transaction(
            LogLevel::Info,
            "built omni transaction",
            Some(json!({
                "from": sanitize_for_logging(&funded.from.to_string()),
                "to": sanitize_for_logging(to),
                "token": token,
                "token_value": token_value,
                "fee": self.fee,
                "primary_inputs": funded.split,
                "contract_inputs": funded.draft.input_count() - funded.split,
            })),
        );
        self.finish(funded, contract)
    }

    /// Add the primary inputs, then the contract inputs, all-or-nothing
    fn fund(
        &self,
        public_key: &secp256k1::PublicKey,
        contract: Option<&Script>,
        primary_utxos: &[Utxo],
        contract_utxos: &[Utxo],
    ) -> TxResult<Funded> {
        let network = self.client.network();
        let public_key = serialize_public_key(public_key, network)?;
        let from = public_key_to_address(&public_key, network);

        let mut draft = TxDraft::new();
        let mut primary_script: Option<ScriptBuf> = None;
        for utxo in primary_utxos {
            accept_utxo(&mut draft, &mut primary_script, utxo)?;
        }
        let split = draft.input_count();

        if contract.is_some() {
            let mut contract_script: Option<ScriptBuf> = None;
            for utxo in contract_utxos {
                accept_utxo(&mut draft, &mut contract_script, utxo)?;
            }
        }

        let expected = primary_utxos.len() + contract.map_or(0, |_| contract_utxos.len());
        if draft.input_count() != expected {
            return Err(TxError::UtxoCountMismatch {
                expected,
                actual: draft.input_count(),
            });
        }

        Ok(Funded {
            draft,
            public_key,
            from,
            primary_script,
            split,
        })
    }

    /// Compute one digest per input and wrap the result
    fn finish(&self, funded: Funded, contract: Option<&Script>) -> TxResult<BuiltTx> {
        let Funded {
            draft,
            public_key,
            primary_script,
            split,
            ..
        } = funded;

        let mut hashes = Vec::with_capacity(draft.input_count());
        for index in 0..draft.input_count() {
            let subscript = if index < split {
                primary_script.as_deref()
            } else {
                contract
            };
            let subscript = subscript.ok_or_else(|| {
                TxError::Signing(format!("no subscript for input {}", index))
            })?;
            hashes.push(signature_hash(draft.transaction(), index, subscript)?);
        }

        let spent = draft.spent_outputs().to_vec();
        Ok(BuiltTx {
            tx: draft.into_transaction(),
            spent,
            hashes,
            public_key,
            contract: contract.map(ToOwned::to_owned),
            split,
            client: Arc::clone(&self.client),
        })
    }

    /// Build after fetching the requested number of UTXOs from the chain
    ///
    /// Primary UTXOs come from the key's address, contract UTXOs from the
    /// contract's P2SH address. Nothing is fetched for a count of zero.
    pub async fn build_from_chain(
        &self,
        public_key: &secp256k1::PublicKey,
        to: &str,
        contract: Option<&Script>,
        value: u64,
        primary_count: usize,
        contract_count: usize,
    ) -> TxResult<BuiltTx> {
        let network = self.client.network();
        let from = public_key_to_address(&serialize_public_key(public_key, network)?, network);

        let primary = self.fetch(&from.to_string(), primary_count).await?;
        let contract_utxos = match contract {
            Some(script) => {
                let address = script_address(script, network)?;
                self.fetch(&address.to_string(), contract_count).await?
            }
            None => Vec::new(),
        };

        self.build(public_key, to, contract, value, &primary, &contract_utxos)
    }

    async fn fetch(&self, address: &str, count: usize) -> TxResult<Vec<Utxo>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let utxos = self.client.get_utxos(address, count, 0).await?;
        if utxos.len() < count {
            return Err(TxError::UtxoCountMismatch {
                expected: count,
                actual: utxos.len(),
            });
        }
        Ok(utxos)
    }
}

/// Unsigned transaction with its signature hashes
pub struct BuiltTx {
    tx: Transaction,
    spent: Vec<TxOut>,
    hashes: Vec<LegacySighash>,
    public_key: PublicKey,
    contract: Option<ScriptBuf>,
    split: usize,
    client: Arc<dyn ChainClient>,
}

impl BuiltTx {
    /// One digest per input, in input order
    pub fn hashes(&self) -> &[LegacySighash] {
        &self.hashes
    }

    /// Index of the first contract input
    pub fn split(&self) -> usize {
        self.split
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }

    /// Attach one signature per input
    pub fn inject_sigs(&mut self, signatures: &[Signature]) -> TxResult<()> {
        inject_signatures(
            &mut self.tx,
            signatures,
            &self.public_key,
            self.contract.as_deref(),
            self.split,
        )
    }

    /// Run the script interpreter over every signed input
    pub fn verify(&self) -> TxResult<()> {
        verifier::verify_inputs(&self.tx, &self.spent)
    }

    /// Wire encoding of the transaction
    pub fn serialize(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(&self.tx)
    }

    /// Broadcast the signed transaction
    pub async fn submit(&self) -> TxResult<Txid> {
        let txid = self.txid();
        self.client.publish_transaction(&self.tx).await?;
        logging::log_submission(
            LogLevel::Info,
            "submitted built transaction",
            Some(json!({ "txid": sanitize_for_logging(&txid.to_string()) })),
        );
        info!("broadcast {}", txid);
        Ok(txid)
    }
}
