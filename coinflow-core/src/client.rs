//! Chain client contract
//!
//! The engine never talks to a blockchain directly. Everything it needs
//! (unspent outputs, confirmation counts, script state and broadcast) goes
//! through [`ChainClient`], so block explorers, full nodes and in-memory test
//! doubles are interchangeable.
//!
//! Every call is a suspension point. Callers that need cancellation race the
//! returned future against their token; implementations do not take one.

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize;
use bitcoin::{Address, Network, OutPoint, Transaction, Txid};
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::types::{Utxo, ALL_UTXOS};

/// Errors reported by chain client backends
#[derive(Debug, Error)]
pub enum ChainClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Data parsing error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

impl ChainClientError {
    /// Whether the failure is expected to clear up on its own
    pub fn is_transient(&self) -> bool {
        match self {
            ChainClientError::Connection(_) | ChainClientError::Timeout(_) => true,
            ChainClientError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Capabilities every blockchain backend provides
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Network this client is bound to; fixed for the client's lifetime
    fn network(&self) -> Network;

    /// Up to `limit` unspent outputs at `address` with at least `min_confirmations`
    async fn get_utxos(
        &self,
        address: &str,
        limit: usize,
        min_confirmations: u64,
    ) -> Result<Vec<Utxo>, ChainClientError>;

    /// Number of confirmations of a transaction (0 while unconfirmed)
    async fn get_confirmations(&self, txid: &Txid) -> Result<u64, ChainClientError>;

    /// Whether `address` has received at least `target`, with the total received
    async fn script_funded(&self, address: &str, target: u64) -> Result<(bool, u64), ChainClientError>;

    /// Whether `address` received at least `target` and has since been emptied,
    /// with the remaining balance
    async fn script_redeemed(&self, address: &str, target: u64) -> Result<(bool, u64), ChainClientError>;

    /// Whether an output at `script_address` was spent to `spender_address`,
    /// with the hex signature script of the spending input
    async fn script_spent(
        &self,
        script_address: &str,
        spender_address: &str,
    ) -> Result<(bool, String), ChainClientError>;

    /// Broadcast a fully signed transaction
    async fn publish_transaction(&self, tx: &Transaction) -> Result<(), ChainClientError>;
}

/// Convenience queries derived from the core contract
#[async_trait]
pub trait ChainClientExt: ChainClient {
    /// Sum of every unspent output at the address
    async fn balance(&self, address: &str, confirmations: u64) -> Result<u64, ChainClientError> {
        let utxos = self.get_utxos(address, ALL_UTXOS, confirmations).await?;
        Ok(utxos.iter().map(|utxo| utxo.amount).sum())
    }

    /// Number of spendable outputs at the address
    async fn utxo_count(&self, address: &str, confirmations: u64) -> Result<usize, ChainClientError> {
        Ok(self.get_utxos(address, ALL_UTXOS, confirmations).await?.len())
    }

    /// Append a block explorer link for the transaction to `msg`
    ///
    /// Returns an empty string on networks without a public explorer.
    fn format_transaction_view(&self, msg: &str, txid: &str) -> String {
        match self.network() {
            Network::Bitcoin => format!(
                "{}, transaction can be viewed at https://live.blockcypher.com/btc/tx/{}",
                msg, txid
            ),
            Network::Testnet => format!(
                "{}, transaction can be viewed at https://live.blockcypher.com/btc-testnet/tx/{}",
                msg, txid
            ),
            _ => String::new(),
        }
    }
}

impl<T: ChainClient + ?Sized> ChainClientExt for T {}

#[derive(Default)]
struct MockState {
    utxos: HashMap<String, Vec<Utxo>>,
    received: HashMap<String, u64>,
    spent_by: HashMap<String, String>,
    confirmations: HashMap<Txid, u64>,
    published: Vec<Transaction>,
    publish_error: Option<String>,
    confirm_on_publish: Option<u64>,
}

/// In-memory chain client.
///
/// FOR TESTING PURPOSES ONLY. Published transactions are applied to the
/// in-memory UTXO set: spent outputs disappear and new outputs are credited
/// to the address their locking script encodes.
pub struct MockChainClient {
    network: Network,
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Credit an unspent output to an address
    pub fn with_utxo(self, address: &str, utxo: Utxo) -> Self {
        self.add_utxo(address, utxo);
        self
    }

    /// Make every broadcast fail with the given message
    pub fn with_publish_error(self, message: &str) -> Self {
        self.state().publish_error = Some(message.to_string());
        self
    }

    /// Report this many confirmations for every transaction once it is published
    pub fn with_confirm_on_publish(self, confirmations: u64) -> Self {
        self.state().confirm_on_publish = Some(confirmations);
        self
    }

    pub fn add_utxo(&self, address: &str, utxo: Utxo) {
        let mut state = self.state();
        *state.received.entry(address.to_string()).or_default() += utxo.amount;
        state.utxos.entry(address.to_string()).or_default().push(utxo);
    }

    pub fn set_confirmations(&self, txid: Txid, confirmations: u64) {
        self.state().confirmations.insert(txid, confirmations);
    }

    /// Every transaction broadcast so far, in order
    pub fn published(&self) -> Vec<Transaction> {
        self.state().published.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state().published.len()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn get_utxos(
        &self,
        address: &str,
        limit: usize,
        _min_confirmations: u64,
    ) -> Result<Vec<Utxo>, ChainClientError> {
        let state = self.state();
        Ok(state
            .utxos
            .get(address)
            .map(|utxos| utxos.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_confirmations(&self, txid: &Txid) -> Result<u64, ChainClientError> {
        Ok(self.state().confirmations.get(txid).copied().unwrap_or(0))
    }

    async fn script_funded(&self, address: &str, target: u64) -> Result<(bool, u64), ChainClientError> {
        let received = self.state().received.get(address).copied().unwrap_or(0);
        Ok((received >= target, received))
    }

    async fn script_redeemed(&self, address: &str, target: u64) -> Result<(bool, u64), ChainClientError> {
        let (received, balance) = {
            let state = self.state();
            let received = state.received.get(address).copied().unwrap_or(0);
            let balance = state
                .utxos
                .get(address)
                .map(|utxos| utxos.iter().map(|utxo| utxo.amount).sum())
                .unwrap_or(0);
            (received, balance)
        };
        Ok((received >= target && balance == 0, balance))
    }

    async fn script_spent(
        &self,
        script_address: &str,
        spender_address: &str,
    ) -> Result<(bool, String), ChainClientError> {
        let state = self.state();
        match state.spent_by.get(script_address) {
            Some(sig_script) if state.received.contains_key(spender_address) => {
                Ok((true, sig_script.clone()))
            }
            _ => Ok((false, String::new())),
        }
    }

    async fn publish_transaction(&self, tx: &Transaction) -> Result<(), ChainClientError> {
        let mut state = self.state();
        if let Some(message) = &state.publish_error {
            return Err(ChainClientError::Rejected(message.clone()));
        }

        let txid = tx.txid();
        debug!("mock broadcast of {} ({} bytes)", txid, serialize(tx).len());

        // Rebroadcasts are recorded but spend and credit nothing new
        if state.published.iter().any(|published| published.txid() == txid) {
            state.published.push(tx.clone());
            return Ok(());
        }

        for input in &tx.input {
            let OutPoint { txid: prev, vout } = input.previous_output;
            let mut spent_from = None;
            for (address, utxos) in state.utxos.iter_mut() {
                let before = utxos.len();
                utxos.retain(|utxo| !(utxo.tx_hash == prev.to_string() && utxo.output_index == vout));
                if utxos.len() != before {
                    spent_from = Some(address.clone());
                }
            }
            if let Some(address) = spent_from {
                state.spent_by.insert(address, hex::encode(input.script_sig.as_bytes()));
            }
        }

        for (index, output) in tx.output.iter().enumerate() {
            if let Ok(address) = Address::from_script(&output.script_pubkey, self.network) {
                let address = address.to_string();
                *state.received.entry(address.clone()).or_default() += output.value;
                state.utxos.entry(address).or_default().push(Utxo::new(
                    txid.to_string(),
                    index as u32,
                    hex::encode(output.script_pubkey.as_bytes()),
                    output.value,
                ));
            }
        }

        if let Some(confirmations) = state.confirm_on_publish {
            state.confirmations.insert(txid, confirmations);
        }
        state.published.push(tx.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8";

    fn utxo(index: u32, amount: u64) -> Utxo {
        Utxo::new(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            index,
            "76a914000000000000000000000000000000000000000088ac",
            amount,
        )
    }

    #[tokio::test]
    async fn test_balance_and_count() {
        let client = MockChainClient::new(Network::Testnet)
            .with_utxo(ADDRESS, utxo(0, 1_000))
            .with_utxo(ADDRESS, utxo(1, 2_500));

        assert_eq!(client.balance(ADDRESS, 0).await.unwrap(), 3_500);
        assert_eq!(client.utxo_count(ADDRESS, 0).await.unwrap(), 2);
        assert_eq!(client.get_utxos(ADDRESS, 1, 0).await.unwrap().len(), 1);
        assert_eq!(client.balance("unknown", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_script_predicates() {
        let client = MockChainClient::new(Network::Testnet).with_utxo(ADDRESS, utxo(0, 1_000));

        assert_eq!(client.script_funded(ADDRESS, 1_000).await.unwrap(), (true, 1_000));
        assert_eq!(client.script_funded(ADDRESS, 1_001).await.unwrap(), (false, 1_000));
        assert_eq!(client.script_redeemed(ADDRESS, 1_000).await.unwrap(), (false, 1_000));
    }

    #[test]
    fn test_format_transaction_view() {
        let testnet = MockChainClient::new(Network::Testnet);
        assert!(testnet
            .format_transaction_view("sent", "abcd")
            .ends_with("https://live.blockcypher.com/btc-testnet/tx/abcd"));
        let regtest = MockChainClient::new(Network::Regtest);
        assert_eq!(regtest.format_transaction_view("sent", "abcd"), "");
    }

    #[test]
    fn test_transient_errors() {
        assert!(ChainClientError::Timeout("t".into()).is_transient());
        assert!(ChainClientError::Http { status: 503, message: String::new() }.is_transient());
        assert!(!ChainClientError::Http { status: 400, message: String::new() }.is_transient());
        assert!(!ChainClientError::Rejected("bad".into()).is_transient());
    }

    #[tokio::test]
    async fn test_rebroadcast_credits_once() {
        let client = MockChainClient::new(Network::Testnet);
        let tx = Transaction {
            version: 2,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: Vec::new(),
            output: vec![bitcoin::TxOut {
                value: 4_000,
                script_pubkey: crate::keys::decode_address(ADDRESS, Network::Testnet)
                    .unwrap()
                    .script_pubkey(),
            }],
        };

        client.publish_transaction(&tx).await.unwrap();
        client.publish_transaction(&tx).await.unwrap();

        assert_eq!(client.publish_count(), 2);
        assert_eq!(client.script_funded(ADDRESS, 4_000).await.unwrap(), (true, 4_000));
        assert_eq!(client.utxo_count(ADDRESS, 0).await.unwrap(), 1);
        assert_eq!(client.balance(ADDRESS, 0).await.unwrap(), 4_000);
    }
}
