//! Key and address conventions
//!
//! Public keys are serialized according to a fixed per-network policy:
//! compressed on mainnet, uncompressed on testnet. Every other network is
//! rejected. The receiving address of a key is the P2PKH address of that
//! serialization, so the policy decides which address an account owns.
//!
//! Subordinate ("slave") scripts let a master key pre-commit to any number of
//! spendable addresses without generating new keys:
//!
//! ```text
//! <nonce> OP_DROP OP_DUP OP_HASH160 <master pubkey hash> OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! The P2SH address of that script depends only on the hash and the nonce.

use bitcoin::address::NetworkUnchecked;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DROP, OP_DUP, OP_EQUALVERIFY, OP_HASH160};
use bitcoin::script::{Builder, PushBytes};
use bitcoin::secp256k1::{self, All, Secp256k1};
use bitcoin::{Address, Network, PublicKey, Script, ScriptBuf};
use once_cell::sync::Lazy;
use std::str::FromStr;

use crate::error::TxError;

/// Shared verification and signing context
pub(crate) static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Length of a HASH160 digest
pub const PUBKEY_HASH_LEN: usize = 20;

/// Serialize a public key using the network's encoding policy
pub fn serialize_public_key(key: &secp256k1::PublicKey, network: Network) -> Result<PublicKey, TxError> {
    let compressed = match network {
        Network::Bitcoin => true,
        Network::Testnet => false,
        other => return Err(TxError::UnsupportedNetwork(other)),
    };
    Ok(PublicKey {
        compressed,
        inner: *key,
    })
}

/// Public key of a secret key, serialized for the network
pub fn public_key_for(secret: &secp256k1::SecretKey, network: Network) -> Result<PublicKey, TxError> {
    serialize_public_key(&secp256k1::PublicKey::from_secret_key(&SECP, secret), network)
}

/// P2PKH receiving address of a serialized public key
pub fn public_key_to_address(key: &PublicKey, network: Network) -> Address {
    Address::p2pkh(key, network)
}

/// Decode an address and require it to belong to the network
pub fn decode_address(address: &str, network: Network) -> Result<Address, TxError> {
    let unchecked = Address::<NetworkUnchecked>::from_str(address)
        .map_err(|e| TxError::InvalidAddress(format!("{}: {}", address, e)))?;
    unchecked
        .require_network(network)
        .map_err(|e| TxError::InvalidAddress(format!("{}: {}", address, e)))
}

/// Check that an address decodes for the network
pub fn validate_address(address: &str, network: Network) -> Result<(), TxError> {
    decode_address(address, network).map(|_| ())
}

/// P2SH address that receives funds locked by `script`
pub fn script_address(script: &Script, network: Network) -> Result<Address, TxError> {
    Ok(Address::p2sh(script, network)?)
}

/// Borrow bytes as a script push, rejecting oversized data
pub(crate) fn push_bytes(data: &[u8]) -> Result<&PushBytes, TxError> {
    <&PushBytes>::try_from(data).map_err(TxError::from)
}

/// Subordinate locking script for a master key hash and nonce
pub fn slave_script(master_pubkey_hash: &[u8], nonce: &[u8]) -> Result<ScriptBuf, TxError> {
    if master_pubkey_hash.len() != PUBKEY_HASH_LEN {
        return Err(TxError::InvalidScript(format!(
            "master public key hash must be {} bytes, got {}",
            PUBKEY_HASH_LEN,
            master_pubkey_hash.len()
        )));
    }
    Ok(Builder::new()
        .push_slice(push_bytes(nonce)?)
        .push_opcode(OP_DROP)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(push_bytes(master_pubkey_hash)?)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_script())
}

/// Subordinate P2SH address for a master key hash and nonce
pub fn slave_address(master_pubkey_hash: &[u8], nonce: &[u8], network: Network) -> Result<Address, TxError> {
    let script = slave_script(master_pubkey_hash, nonce)?;
    script_address(&script, network)
}
