//! Contract scripts and ready-made hooks
//!
//! The hash-lock contract pays whoever reveals the preimage of a SHA-256 hash
//! and signs for a given public key hash:
//!
//! ```text
//! OP_SIZE 32 OP_EQUALVERIFY OP_SHA256 <secret hash> OP_EQUALVERIFY
//! OP_DUP OP_HASH160 <pubkey hash> OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! The hooks below cover the usual contract lifecycle: fund the P2SH address
//! ([`PayToScript`] then [`ScriptFunded`]), claim it with the secret
//! ([`ClaimScript`], [`RevealSecret`], then [`ScriptSpent`]), and read the
//! secret back out of the spending signature script ([`extract_secret`]).

use async_trait::async_trait;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160, OP_SHA256, OP_SIZE};
use bitcoin::script::{Builder, Instruction};
use bitcoin::{Script, ScriptBuf, Transaction};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::client::ChainClient;
use crate::draft::TxDraft;
use crate::error::TxError;
use crate::hooks::{PostCondition, PreCondition, ScriptExtension};
use crate::keys::{push_bytes, PUBKEY_HASH_LEN};

/// Length of a hash-lock secret and of its hash
pub const SECRET_LEN: usize = 32;

/// SHA-256 of a secret
pub fn sha256_secret(secret: &[u8]) -> [u8; 32] {
    Sha256::digest(secret).into()
}

/// Fresh random 32 byte secret
pub fn random_secret() -> Zeroizing<[u8; SECRET_LEN]> {
    Zeroizing::new(rand::random())
}

/// Hash-lock contract paying `pubkey_hash` against the preimage of `secret_hash`
pub fn hash_lock_script(secret_hash: &[u8; 32], pubkey_hash: &[u8]) -> Result<ScriptBuf, TxError> {
    if pubkey_hash.len() != PUBKEY_HASH_LEN {
        return Err(TxError::InvalidScript(format!(
            "public key hash must be {} bytes, got {}",
            PUBKEY_HASH_LEN,
            pubkey_hash.len()
        )));
    }
    Ok(Builder::new()
        .push_opcode(OP_SIZE)
        .push_int(SECRET_LEN as i64)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_SHA256)
        .push_slice(push_bytes(secret_hash)?)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(push_bytes(pubkey_hash)?)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_script())
}

/// Find the pushed preimage of `secret_hash` in a hex signature script
pub fn extract_secret(sig_script_hex: &str, secret_hash: &[u8; 32]) -> Result<Option<Vec<u8>>, TxError> {
    let bytes = hex::decode(sig_script_hex)
        .map_err(|e| TxError::InvalidScript(format!("signature script is not hex: {}", e)))?;
    let script = Script::from_bytes(&bytes);
    for instruction in script.instructions() {
        let instruction = instruction.map_err(|e| TxError::InvalidScript(e.to_string()))?;
        if let Instruction::PushBytes(data) = instruction {
            if data.len() == SECRET_LEN && sha256_secret(data.as_bytes()) == *secret_hash {
                return Ok(Some(data.as_bytes().to_vec()));
            }
        }
    }
    Ok(None)
}

/// Pre-condition adding a fixed payment
#[derive(Debug, Clone)]
pub struct PayToAddress {
    pub script_pubkey: ScriptBuf,
    pub value: u64,
}

#[async_trait]
impl PreCondition for PayToAddress {
    async fn check(&self, draft: &mut TxDraft) -> bool {
        draft.add_output(self.value, self.script_pubkey.clone());
        true
    }
}

/// Pre-condition topping a script address up to `target`
///
/// Refuses when the address already received `target`, so a retried deposit
/// never pays twice.
pub struct PayToScript {
    client: Arc<dyn ChainClient>,
    script_address: String,
    script_pubkey: ScriptBuf,
    target: u64,
}

impl PayToScript {
    pub fn new(client: Arc<dyn ChainClient>, contract: &Script, target: u64) -> Result<Self, TxError> {
        let address = crate::keys::script_address(contract, client.network())?;
        Ok(Self {
            client,
            script_address: address.to_string(),
            script_pubkey: address.script_pubkey(),
            target,
        })
    }
}

#[async_trait]
impl PreCondition for PayToScript {
    async fn check(&self, draft: &mut TxDraft) -> bool {
        match self.client.script_funded(&self.script_address, self.target).await {
            Ok((true, _)) => {
                debug!("{} already funded", self.script_address);
                false
            }
            Ok((false, received)) => match self.target.checked_sub(received) {
                Some(missing) if missing > 0 => {
                    draft.add_output(missing, self.script_pubkey.clone());
                    true
                }
                _ => {
                    warn!(
                        "{} reported unfunded with {} received against target {}",
                        self.script_address, received, self.target
                    );
                    false
                }
            },
            Err(e) => {
                warn!("could not check funding of {}: {}", self.script_address, e);
                false
            }
        }
    }
}

/// Pre-condition sending the whole remaining contract balance to `destination`
///
/// Refuses once the contract has been redeemed.
pub struct ClaimScript {
    client: Arc<dyn ChainClient>,
    script_address: String,
    destination: ScriptBuf,
    target: u64,
}

impl ClaimScript {
    pub fn new(
        client: Arc<dyn ChainClient>,
        contract: &Script,
        destination: ScriptBuf,
        target: u64,
    ) -> Result<Self, TxError> {
        let address = crate::keys::script_address(contract, client.network())?;
        Ok(Self {
            client,
            script_address: address.to_string(),
            destination,
            target,
        })
    }
}

#[async_trait]
impl PreCondition for ClaimScript {
    async fn check(&self, draft: &mut TxDraft) -> bool {
        match self.client.script_redeemed(&self.script_address, self.target).await {
            Ok((false, balance)) if balance > 0 => {
                draft.add_output(balance, self.destination.clone());
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("could not check redemption of {}: {}", self.script_address, e);
                false
            }
        }
    }
}

/// Extension pushing a hash-lock secret
pub struct RevealSecret {
    secret: Zeroizing<Vec<u8>>,
}

impl RevealSecret {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }
}

impl ScriptExtension for RevealSecret {
    fn extend(&self, builder: Builder) -> Result<Builder, TxError> {
        Ok(builder.push_slice(push_bytes(&self.secret)?))
    }
}

/// Post-condition: the address received at least `target`
pub struct ScriptFunded {
    pub client: Arc<dyn ChainClient>,
    pub address: String,
    pub target: u64,
}

#[async_trait]
impl PostCondition for ScriptFunded {
    async fn check(&self, _tx: &Transaction) -> bool {
        matches!(self.client.script_funded(&self.address, self.target).await, Ok((true, _)))
    }
}

/// Post-condition: the address received `target` and is now empty
pub struct ScriptRedeemed {
    pub client: Arc<dyn ChainClient>,
    pub address: String,
    pub target: u64,
}

#[async_trait]
impl PostCondition for ScriptRedeemed {
    async fn check(&self, _tx: &Transaction) -> bool {
        matches!(self.client.script_redeemed(&self.address, self.target).await, Ok((true, _)))
    }
}

/// Post-condition: the script address was spent to `spender_address`
pub struct ScriptSpent {
    pub client: Arc<dyn ChainClient>,
    pub script_address: String,
    pub spender_address: String,
}

#[async_trait]
impl PostCondition for ScriptSpent {
    async fn check(&self, _tx: &Transaction) -> bool {
        matches!(
            self.client.script_spent(&self.script_address, &self.spender_address).await,
            Ok((true, _))
        )
    }
}

/// Post-condition: the transaction itself has `min_confirmations`
pub struct Confirmed {
    pub client: Arc<dyn ChainClient>,
    pub min_confirmations: u64,
}

#[async_trait]
impl PostCondition for Confirmed {
    async fn check(&self, tx: &Transaction) -> bool {
        match self.client.get_confirmations(&tx.txid()).await {
            Ok(confirmations) => confirmations >= self.min_confirmations,
            Err(e) => {
                debug!("confirmation lookup failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChainClientError, MockChainClient};
    use crate::types::Utxo;
    use bitcoin::Network;

    #[test]
    fn test_hash_lock_layout() {
        let hash = sha256_secret(&[7u8; 32]);
        let script = hash_lock_script(&hash, &[1u8; 20]).unwrap();
        let bytes = script.as_bytes();
        // OP_SIZE, push(0x20), OP_EQUALVERIFY, OP_SHA256, push32
        assert_eq!(&bytes[..5], &[0x82, 0x01, 0x20, 0x88, 0xa8]);
        assert_eq!(bytes[5], 0x20);
        assert_eq!(&bytes[6..38], &hash);
        assert_eq!(*bytes.last().unwrap(), 0xac);
        assert!(hash_lock_script(&hash, &[1u8; 19]).is_err());
    }

    #[test]
    fn test_extract_secret() {
        let secret = [9u8; 32];
        let hash = sha256_secret(&secret);
        let script = Builder::new()
            .push_slice(push_bytes(&[1u8; 71]).unwrap())
            .push_slice(push_bytes(&secret).unwrap())
            .into_script();

        let found = extract_secret(&hex::encode(script.as_bytes()), &hash).unwrap();
        assert_eq!(found, Some(secret.to_vec()));
        assert_eq!(extract_secret(&hex::encode(script.as_bytes()), &[0u8; 32]).unwrap(), None);
        assert!(extract_secret("zz", &hash).is_err());
    }

    #[tokio::test]
    async fn test_pay_to_script_tops_up_once() {
        let contract = hash_lock_script(&sha256_secret(b"x"), &[2u8; 20]).unwrap();
        let address = crate::keys::script_address(&contract, Network::Testnet).unwrap().to_string();
        let client = Arc::new(MockChainClient::new(Network::Testnet));
        let pay = PayToScript::new(client.clone(), &contract, 50_000).unwrap();

        client.add_utxo(
            &address,
            Utxo::new(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                0,
                "00",
                20_000,
            ),
        );
        let mut draft = TxDraft::new();
        assert!(pay.check(&mut draft).await);
        assert_eq!(draft.transaction().output[0].value, 30_000);

        client.add_utxo(
            &address,
            Utxo::new(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                1,
                "00",
                30_000,
            ),
        );
        assert!(!pay.check(&mut TxDraft::new()).await);
    }

    #[test]
    fn test_random_secret_differs() {
        assert_ne!(*random_secret(), *random_secret());
    }

    // Reports unfunded whatever it has received, like a lagging indexer
    struct LaggingClient {
        received: u64,
    }

    #[async_trait]
    impl ChainClient for LaggingClient {
        fn network(&self) -> Network {
            Network::Testnet
        }

        async fn get_utxos(&self, _: &str, _: usize, _: u64) -> Result<Vec<Utxo>, ChainClientError> {
            Ok(Vec::new())
        }

        async fn get_confirmations(&self, _: &bitcoin::Txid) -> Result<u64, ChainClientError> {
            Ok(0)
        }

        async fn script_funded(&self, _: &str, _: u64) -> Result<(bool, u64), ChainClientError> {
            Ok((false, self.received))
        }

        async fn script_redeemed(&self, _: &str, _: u64) -> Result<(bool, u64), ChainClientError> {
            Ok((false, 0))
        }

        async fn script_spent(&self, _: &str, _: &str) -> Result<(bool, String), ChainClientError> {
            Ok((false, String::new()))
        }

        async fn publish_transaction(&self, _: &Transaction) -> Result<(), ChainClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pay_to_script_refuses_overfunded_report() {
        let contract = hash_lock_script(&sha256_secret(b"x"), &[2u8; 20]).unwrap();

        for received in [50_000, 80_000] {
            let pay = PayToScript::new(Arc::new(LaggingClient { received }), &contract, 50_000).unwrap();
            let mut draft = TxDraft::new();
            assert!(!pay.check(&mut draft).await);
            assert!(draft.transaction().output.is_empty());
        }
    }
}
