//! Mnemonic wallet
//!
//! Derives [`Account`]s from a BIP-39 mnemonic along BIP-32 paths such as
//! `m/44'/1'/0'/0/0`. The phrase and every derived seed are wiped from memory
//! when dropped.

use bdk::keys::bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, ExtendedPrivKey};
use log::debug;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::account::Account;
use crate::client::ChainClient;
use crate::error::TxError;
use crate::keys::SECP;

/// Source of accounts sharing one mnemonic and chain client
pub struct Wallet {
    mnemonic: Zeroizing<String>,
    client: Arc<dyn ChainClient>,
}

impl Wallet {
    /// Wallet over an existing phrase
    pub fn new(mnemonic: &str, client: Arc<dyn ChainClient>) -> Result<Self, TxError> {
        Mnemonic::parse(mnemonic).map_err(|e| TxError::KeyDerivation(format!("invalid mnemonic: {}", e)))?;
        Ok(Self {
            mnemonic: Zeroizing::new(mnemonic.to_string()),
            client,
        })
    }

    /// Wallet over a fresh 12 word phrase
    pub fn generate(client: Arc<dyn ChainClient>) -> Result<Self, TxError> {
        let entropy = Zeroizing::new(rand::random::<[u8; 16]>());
        let mnemonic = Mnemonic::from_entropy(&entropy[..])
            .map_err(|e| TxError::KeyDerivation(format!("mnemonic generation failed: {}", e)))?;
        Ok(Self {
            mnemonic: Zeroizing::new(mnemonic.to_string()),
            client,
        })
    }

    /// The phrase, for backup
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Account at `path` under the seed of the mnemonic and `passphrase`
    pub fn account(&self, path: &str, passphrase: &str) -> Result<Account, TxError> {
        let path = DerivationPath::from_str(path)
            .map_err(|e| TxError::KeyDerivation(format!("invalid derivation path {}: {}", path, e)))?;
        let mnemonic = Mnemonic::parse(self.mnemonic.as_str())
            .map_err(|e| TxError::KeyDerivation(format!("invalid mnemonic: {}", e)))?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));

        let master = ExtendedPrivKey::new_master(self.client.network(), &seed[..])?;
        let child = master.derive_priv(&SECP, &path)?;
        debug!("derived account at {}", path);
        Account::new(child.private_key, Arc::clone(&self.client))
    }
}
