//! Esplora (Blockstream compatible) chain client
//!
//! Endpoints used:
//!
//! - `GET /address/:address/utxo` and `GET /blocks/tip/height` for UTXOs
//! - `GET /tx/:txid/status` for confirmations
//! - `GET /address/:address` for received totals and balances
//! - `GET /address/:address/txs` to find the transaction spending a script
//! - `POST /tx` to broadcast
//!
//! Esplora does not return locking scripts with UTXOs, so every UTXO of an
//! address is given that address's own output script.

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Address, Network, Transaction, Txid};
use coinflow_core::logging::{self, sanitize_for_logging, LogLevel};
use coinflow_core::{ChainClient, ChainClientError, Config, Utxo};
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;

use crate::http::{build_client, get_json, get_text, map_reqwest_error};

/// Default number of retries for GET requests
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: TxStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Stats {
    #[serde(default)]
    pub funded_txo_sum: u64,
    #[serde(default)]
    pub spent_txo_sum: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AddressInfo {
    #[serde(default)]
    pub chain_stats: Stats,
    #[serde(default)]
    pub mempool_stats: Stats,
}

impl AddressInfo {
    /// Total ever received, confirmed or not
    pub fn received(&self) -> u64 {
        self.chain_stats.funded_txo_sum + self.mempool_stats.funded_txo_sum
    }

    /// Current balance, confirmed or not
    pub fn balance(&self) -> u64 {
        self.received()
            .saturating_sub(self.chain_stats.spent_txo_sum + self.mempool_stats.spent_txo_sum)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Prevout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Vin {
    #[serde(default)]
    pub prevout: Option<Prevout>,
    #[serde(default)]
    pub scriptsig: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Vout {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EsploraTx {
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
}

/// Confirmations of a transaction at `tip`
pub(crate) fn confirmations(status: &TxStatus, tip: u64) -> u64 {
    match (status.confirmed, status.block_height) {
        (true, Some(height)) if tip >= height => tip - height + 1,
        (true, _) => 1,
        _ => 0,
    }
}

/// Signature script of the first input spending `script_address` in a
/// transaction that pays `spender_address`
pub(crate) fn find_spend(txs: &[EsploraTx], script_address: &str, spender_address: &str) -> Option<String> {
    txs.iter()
        .filter(|tx| {
            tx.vout
                .iter()
                .any(|out| out.scriptpubkey_address.as_deref() == Some(spender_address))
        })
        .flat_map(|tx| tx.vin.iter())
        .find(|vin| {
            vin.prevout
                .as_ref()
                .and_then(|prevout| prevout.scriptpubkey_address.as_deref())
                == Some(script_address)
        })
        .map(|vin| vin.scriptsig.clone())
}

/// Chain client backed by an Esplora REST API
pub struct EsploraClient {
    network: Network,
    base_url: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl EsploraClient {
    /// Client for `base_url` (without a trailing slash)
    pub fn new(network: Network, base_url: &str, timeout: Duration, max_retries: u32) -> Result<Self, ChainClientError> {
        Ok(Self {
            network,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            http: build_client(timeout)?,
        })
    }

    /// Client for the public Blockstream instance of the network
    pub fn blockstream(network: Network) -> Result<Self, ChainClientError> {
        let url = match network {
            Network::Bitcoin => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            other => {
                return Err(ChainClientError::NotFound(format!(
                    "no public Esplora instance for {}",
                    other
                )))
            }
        };
        Self::new(network, url, Duration::from_secs(30), DEFAULT_MAX_RETRIES)
    }

    /// Client configured from the `[network]` and `[backend]` sections
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Self::new(
            config.bitcoin_network()?,
            &config.esplora_url()?,
            Duration::from_secs(config.backend.timeout_secs),
            config.backend.max_retries,
        )?;
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn tip_height(&self) -> Result<u64, ChainClientError> {
        let body = get_text(&self.http, &self.url("/blocks/tip/height"), self.max_retries).await?;
        body.trim()
            .parse()
            .map_err(|e| ChainClientError::Parse(format!("invalid tip height {:?}: {}", body, e)))
    }

    async fn address_info(&self, address: &str) -> Result<AddressInfo, ChainClientError> {
        get_json(&self.http, &self.url(&format!("/address/{}", address)), self.max_retries).await
    }

    fn output_script_hex(&self, address: &str) -> Result<String, ChainClientError> {
        let address = Address::<NetworkUnchecked>::from_str(address)
            .map_err(|e| ChainClientError::Parse(format!("{}: {}", address, e)))?
            .require_network(self.network)
            .map_err(|e| ChainClientError::Parse(format!("{}: {}", address, e)))?;
        Ok(hex::encode(address.script_pubkey().as_bytes()))
    }
}

#[async_trait]
impl ChainClient for EsploraClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn get_utxos(
        &self,
        address: &str,
        limit: usize,
        min_confirmations: u64,
    ) -> Result<Vec<Utxo>, ChainClientError> {
        let script = self.output_script_hex(address)?;
        let utxos: Vec<EsploraUtxo> =
            get_json(&self.http, &self.url(&format!("/address/{}/utxo", address)), self.max_retries).await?;
        let tip = if min_confirmations > 0 { self.tip_height().await? } else { 0 };

        let selected: Vec<Utxo> = utxos
            .into_iter()
            .filter(|utxo| min_confirmations == 0 || confirmations(&utxo.status, tip) >= min_confirmations)
            .take(limit)
            .map(|utxo| Utxo::new(utxo.txid, utxo.vout, script.clone(), utxo.value))
            .collect();
        debug!("{} utxos at {}", selected.len(), sanitize_for_logging(address));
        Ok(selected)
    }

    async fn get_confirmations(&self, txid: &Txid) -> Result<u64, ChainClientError> {
        let status: TxStatus =
            match get_json(&self.http, &self.url(&format!("/tx/{}/status", txid)), self.max_retries).await {
                Ok(status) => status,
                Err(ChainClientError::NotFound(_)) => return Ok(0),
                Err(e) => return Err(e),
            };
        if !status.confirmed {
            return Ok(0);
        }
        Ok(confirmations(&status, self.tip_height().await?))
    }

    async fn script_funded(&self, address: &str, target: u64) -> Result<(bool, u64), ChainClientError> {
        let received = self.address_info(address).await?.received();
        Ok((received >= target, received))
    }

    async fn script_redeemed(&self, address: &str, target: u64) -> Result<(bool, u64), ChainClientError> {
        let info = self.address_info(address).await?;
        let balance = info.balance();
        Ok((info.received() >= target && balance == 0, balance))
    }

    async fn script_spent(
        &self,
        script_address: &str,
        spender_address: &str,
    ) -> Result<(bool, String), ChainClientError> {
        let txs: Vec<EsploraTx> = get_json(
            &self.http,
            &self.url(&format!("/address/{}/txs", script_address)),
            self.max_retries,
        )
        .await?;
        Ok(match find_spend(&txs, script_address, spender_address) {
            Some(sig_script) => (true, sig_script),
            None => (false, String::new()),
        })
    }

    async fn publish_transaction(&self, tx: &Transaction) -> Result<(), ChainClientError> {
        let response = self
            .http
            .post(self.url("/tx"))
            .body(serialize_hex(tx))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(ChainClientError::Rejected(body));
        }
        if !status.is_success() {
            return Err(ChainClientError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        logging::log_network(
            LogLevel::Info,
            "published transaction",
            Some(logging::log_params(
                vec![("txid", json!(body.trim())), ("vsize", json!(tx.vsize()))],
                &["txid"],
            )),
        );
        Ok(())
    }
}
