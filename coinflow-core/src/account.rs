//! Single-key account
//!
//! An [`Account`] owns one private key and a shared chain client. It runs the
//! whole pipeline for a transaction:
//!
//! 1. the pre-condition adds outputs to an empty draft
//! 2. the draft is funded from the account address, or from the contract's
//!    P2SH address when a contract is being spent
//! 3. a signed copy is measured and the fee taken from the last output
//! 4. every input is signed and verified locally
//! 5. the transaction is broadcast and the post-condition polled
//!
//! Nothing is broadcast unless every earlier step succeeded.

use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, Network, PublicKey, Script, ScriptBuf, Txid};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::{ChainClient, ChainClientExt};
use crate::config::Config;
use crate::contract::PayToAddress;
use crate::draft::TxDraft;
use crate::error::TxError;
use crate::fee::{apply_fee, estimate_fee, resolve_fee_rate, FeeOracle};
use crate::funding::FundingSelector;
use crate::hooks::{PostCondition, PreCondition, ScriptExtension, TxInUpdate};
use crate::keys::{decode_address, public_key_for, public_key_to_address, script_address, slave_address, slave_script};
use crate::logging::{self, sanitize_for_logging, LogLevel};
use crate::poller::{PollConfig, Submitter, Timer, TokioTimer};
use crate::signer::{Signer, SigningOptions};
use crate::types::{FeePolicy, TxExecutionSpeed};
use crate::verifier;

/// Hooks and options for one transaction
#[derive(Clone, Copy, Default)]
pub struct TxRequest<'a> {
    /// Redeem script of the P2SH outputs to spend instead of the account's own
    pub contract: Option<&'a Script>,
    pub speed: TxExecutionSpeed,
    pub update_tx_in: Option<&'a TxInUpdate>,
    pub pre_condition: Option<&'a dyn PreCondition>,
    pub extension: Option<&'a dyn ScriptExtension>,
    pub post_condition: Option<&'a dyn PostCondition>,
    /// Spend every UTXO without a change output
    pub send_all: bool,
}

impl<'a> TxRequest<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract(mut self, contract: &'a Script) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn speed(mut self, speed: TxExecutionSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub fn update_tx_in(mut self, update: &'a TxInUpdate) -> Self {
        self.update_tx_in = Some(update);
        self
    }

    pub fn pre_condition(mut self, condition: &'a dyn PreCondition) -> Self {
        self.pre_condition = Some(condition);
        self
    }

    pub fn extension(mut self, extension: &'a dyn ScriptExtension) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn post_condition(mut self, condition: &'a dyn PostCondition) -> Self {
        self.post_condition = Some(condition);
        self
    }

    pub fn send_all(mut self, send_all: bool) -> Self {
        self.send_all = send_all;
        self
    }

    fn signing_options(&self) -> SigningOptions<'a> {
        SigningOptions {
            contract: self.contract,
            extension: self.extension,
            update_tx_in: self.update_tx_in,
            contract_from: 0,
        }
    }
}

/// Signed transaction that was not broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltTransaction {
    pub txid: Txid,
    /// Consensus serialization
    pub raw: Vec<u8>,
    pub fee: u64,
}

/// One private key bound to a chain client
pub struct Account {
    secret_key: SecretKey,
    public_key: PublicKey,
    network: Network,
    client: Arc<dyn ChainClient>,
    fee_oracle: Option<Arc<dyn FeeOracle>>,
    timer: Arc<dyn Timer>,
    policy: FeePolicy,
    poll: PollConfig,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address().to_string())
            .field("network", &self.network)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Account on the client's network
    ///
    /// Fails with `UnsupportedNetwork` unless the client is on mainnet or testnet.
    pub fn new(secret_key: SecretKey, client: Arc<dyn ChainClient>) -> Result<Self, TxError> {
        let network = client.network();
        let public_key = public_key_for(&secret_key, network)?;
        Ok(Self {
            secret_key,
            public_key,
            network,
            client,
            fee_oracle: None,
            timer: Arc::new(TokioTimer),
            policy: FeePolicy::default(),
            poll: PollConfig::default(),
        })
    }

    pub fn with_fee_oracle(mut self, oracle: Arc<dyn FeeOracle>) -> Self {
        self.fee_oracle = Some(oracle);
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_policy(mut self, policy: FeePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll cadence for submissions; zero attempts or a zero interval are rejected
    pub fn with_poll_config(mut self, poll: PollConfig) -> Result<Self, TxError> {
        poll.validate()?;
        self.poll = poll;
        Ok(self)
    }

    /// Apply the fee policy and poll cadence of a loaded configuration
    pub fn with_config(self, config: &Config) -> Result<Self, TxError> {
        self.with_policy(config.fee_policy()).with_poll_config(config.poll_config())
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    /// P2PKH receiving address
    pub fn address(&self) -> Address {
        public_key_to_address(&self.public_key, self.network)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Public key bytes as the network serializes them
    pub fn serialized_public_key(&self) -> Vec<u8> {
        self.public_key.to_bytes()
    }

    /// HASH160 of the serialized public key
    pub fn pub_key_hash(&self) -> [u8; 20] {
        use bitcoin::hashes::Hash;
        self.public_key.pubkey_hash().to_byte_array()
    }

    /// Subordinate address of this account for `nonce`
    pub fn slave_address(&self, nonce: &[u8]) -> Result<Address, TxError> {
        slave_address(&self.pub_key_hash(), nonce, self.network)
    }

    /// Subordinate script of this account for `nonce`
    pub fn slave_script(&self, nonce: &[u8]) -> Result<ScriptBuf, TxError> {
        slave_script(&self.pub_key_hash(), nonce)
    }

    /// Balance of the account address at zero confirmations
    pub async fn balance(&self) -> Result<u64, TxError> {
        Ok(self.client.balance(&self.address().to_string(), 0).await?)
    }

    /// Pay `value` to `to`, or sweep the whole balance when `send_all` is set
    ///
    /// Returns the txid and the fee paid.
    pub async fn transfer(
        &self,
        to: &str,
        value: u64,
        speed: TxExecutionSpeed,
        send_all: bool,
        cancel: &CancellationToken,
    ) -> Result<(Txid, u64), TxError> {
        let payment = self.payment(to, value, send_all).await?;
        let request = TxRequest::new().speed(speed).pre_condition(&payment).send_all(send_all);
        self.send_transaction(request, cancel).await
    }

    /// Same as [`transfer`](Self::transfer) without broadcasting
    pub async fn build_transfer(
        &self,
        to: &str,
        value: u64,
        speed: TxExecutionSpeed,
        send_all: bool,
    ) -> Result<(Txid, Vec<u8>), TxError> {
        let payment = self.payment(to, value, send_all).await?;
        let request = TxRequest::new().speed(speed).pre_condition(&payment).send_all(send_all);
        let built = self.build_transaction(request).await?;
        Ok((built.txid, built.raw))
    }

    async fn payment(&self, to: &str, value: u64, send_all: bool) -> Result<PayToAddress, TxError> {
        let destination = decode_address(to, self.network)?;
        let value = if send_all { self.balance().await? } else { value };
        Ok(PayToAddress {
            script_pubkey: destination.script_pubkey(),
            value,
        })
    }

    /// Build, sign, verify, broadcast and confirm a transaction
    ///
    /// Returns the txid and the fee paid. Cancelling `cancel` at any point
    /// before the post-condition holds fails with `PostConditionFailed`.
    pub async fn send_transaction(
        &self,
        request: TxRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(Txid, u64), TxError> {
        let (draft, fee) = tokio::select! {
            prepared = self.prepare(&request) => prepared?,
            _ = cancel.cancelled() => {
                return Err(TxError::PostConditionFailed("cancelled before broadcast".to_string()));
            }
        };

        let submitter = Submitter::new(Arc::clone(&self.client), Arc::clone(&self.timer), self.poll)?;
        let txid = submitter
            .submit_and_confirm(draft.transaction(), request.post_condition, cancel)
            .await?;
        info!(
            "{}",
            self.client
                .format_transaction_view("successfully submitted transaction", &txid.to_string())
        );
        Ok((txid, fee))
    }

    /// Build, sign and verify a transaction without broadcasting it
    pub async fn build_transaction(&self, request: TxRequest<'_>) -> Result<BuiltTransaction, TxError> {
        let (draft, fee) = self.prepare(&request).await?;
        Ok(BuiltTransaction {
            txid: draft.txid(),
            raw: draft.serialize(),
            fee,
        })
    }

    /// Funding address for a request
    fn source_address(&self, contract: Option<&Script>) -> Result<Address, TxError> {
        match contract {
            Some(contract) => script_address(contract, self.network),
            None => Ok(self.address()),
        }
    }

    async fn prepare(&self, request: &TxRequest<'_>) -> Result<(TxDraft, u64), TxError> {
        let mut draft = TxDraft::new();
        if let Some(condition) = request.pre_condition {
            if !condition.check(&mut draft).await {
                return Err(TxError::PreConditionFailed);
            }
        }

        let address = self.source_address(request.contract)?.to_string();
        logging::log_transaction(
            LogLevel::Info,
            "funding",
            Some(json!({
                "address": sanitize_for_logging(&address),
                "speed": request.speed.to_string(),
                "send_all": request.send_all,
            })),
        );
        let selector = FundingSelector::new(self.client.as_ref(), self.policy);
        if request.send_all {
            selector.fund_all(&mut draft, &address).await?;
        } else {
            selector.fund(&mut draft, &address).await?;
        }

        let options = request.signing_options();
        let signer = Signer::new(&self.secret_key, &self.public_key);
        info!("estimating signed size");
        let size = signer.estimate_signed_size(&draft, &options)?;
        let rate = resolve_fee_rate(self.fee_oracle.as_deref(), request.speed, &self.policy).await;
        let fee = estimate_fee(size, rate, &self.policy);
        apply_fee(&mut draft, fee, &self.policy)?;

        info!("signing {} inputs", draft.input_count());
        signer.sign(&mut draft, &options)?;
        info!("verifying signed transaction");
        verifier::verify(&draft)?;

        logging::log_transaction(
            LogLevel::Info,
            "transaction ready",
            Some(json!({
                "txid": sanitize_for_logging(&draft.txid().to_string()),
                "inputs": draft.input_count(),
                "outputs": draft.transaction().output.len(),
                "fee": fee,
                "size": draft.size(),
            })),
        );
        Ok((draft, fee))
    }
}
