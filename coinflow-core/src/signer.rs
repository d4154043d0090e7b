//! Signature hashes and signature scripts
//!
//! Every input is signed with legacy `SIGHASH_ALL`. The subscript committed to
//! is the contract when one is being spent, otherwise the locking script of
//! the first funded UTXO. Signature scripts are assembled in a fixed order
//! that the verifier relies on:
//!
//! ```text
//! <DER signature || 0x01> <serialized public key> [extension pushes] [contract]
//! ```

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{self, Message, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, LegacySighash, SighashCache};
use bitcoin::{PublicKey, Script, ScriptBuf, Transaction};

use crate::draft::TxDraft;
use crate::error::TxError;
use crate::hooks::{ScriptExtension, TxInUpdate};
use crate::keys::{push_bytes, SECP};

/// Optional parts of a signing pass
#[derive(Clone, Copy, Default)]
pub struct SigningOptions<'a> {
    /// Redeem script of the P2SH outputs being spent
    pub contract: Option<&'a Script>,
    /// Extra pushes after the public key
    pub extension: Option<&'a dyn ScriptExtension>,
    /// Applied to every input before its digest is computed
    pub update_tx_in: Option<&'a TxInUpdate>,
    /// Index of the first input spending the contract; earlier inputs spend
    /// the reference script
    pub contract_from: usize,
}

/// Legacy SIGHASH_ALL digest of input `index` committing to `subscript`
pub fn signature_hash(tx: &Transaction, index: usize, subscript: &Script) -> Result<LegacySighash, TxError> {
    let cache = SighashCache::new(tx);
    Ok(cache.legacy_signature_hash(index, subscript, EcdsaSighashType::All.to_u32())?)
}

/// Assemble a signature script from a raw signature
pub fn build_signature_script(
    signature: &secp256k1::ecdsa::Signature,
    public_key: &PublicKey,
    extension: Option<&dyn ScriptExtension>,
    contract: Option<&Script>,
) -> Result<ScriptBuf, TxError> {
    let sig = ecdsa::Signature::sighash_all(*signature).to_vec();
    let key = public_key.to_bytes();

    let mut builder = Builder::new()
        .push_slice(push_bytes(&sig)?)
        .push_slice(push_bytes(&key)?);
    if let Some(extension) = extension {
        builder = extension.extend(builder)?;
    }
    if let Some(contract) = contract {
        builder = builder.push_slice(push_bytes(contract.as_bytes())?);
    }
    Ok(builder.into_script())
}

/// Signs drafts with one private key
pub struct Signer<'a> {
    secret_key: &'a SecretKey,
    public_key: &'a PublicKey,
}

impl<'a> Signer<'a> {
    pub fn new(secret_key: &'a SecretKey, public_key: &'a PublicKey) -> Self {
        Self { secret_key, public_key }
    }

    /// Sign one digest
    pub fn sign_hash(&self, hash: &LegacySighash) -> Result<secp256k1::ecdsa::Signature, TxError> {
        let message = Message::from_slice(&hash.to_byte_array())?;
        Ok(SECP.sign_ecdsa(&message, self.secret_key))
    }

    /// Sign every input of the draft in input order
    ///
    /// Inputs before `contract_from` commit to the reference script and carry
    /// no contract push, matching [`inject_signatures`] with the same split.
    pub fn sign(&self, draft: &mut TxDraft, options: &SigningOptions<'_>) -> Result<(), TxError> {
        let reference: Option<ScriptBuf> = draft.reference_script().map(ToOwned::to_owned);
        if options.contract.is_none() && reference.is_none() {
            return Err(TxError::Signing("transaction has no funded inputs".to_string()));
        }

        let input_count = draft.input_count();
        for index in 0..input_count {
            if let Some(update) = options.update_tx_in {
                update(&mut draft.transaction_mut().input[index]);
            }
            let contract = options.contract.filter(|_| index >= options.contract_from);
            let subscript = contract
                .or(reference.as_deref())
                .ok_or_else(|| TxError::Signing(format!("no subscript for input {}", index)))?;
            let hash = signature_hash(draft.transaction(), index, subscript)?;
            let signature = self.sign_hash(&hash)?;
            let script_sig = build_signature_script(&signature, self.public_key, options.extension, contract)?;
            draft.transaction_mut().input[index].script_sig = script_sig;
        }
        Ok(())
    }

    /// Serialized size of the draft once signed, measured on a copy
    pub fn estimate_signed_size(&self, draft: &TxDraft, options: &SigningOptions<'_>) -> Result<usize, TxError> {
        let mut copy = draft.clone();
        self.sign(&mut copy, options)?;
        Ok(copy.size())
    }
}

/// Attach externally produced signatures, one per input in input order
///
/// Inputs at or past `split` spend the contract and get it appended.
pub fn inject_signatures(
    tx: &mut Transaction,
    signatures: &[secp256k1::ecdsa::Signature],
    public_key: &PublicKey,
    contract: Option<&Script>,
    split: usize,
) -> Result<(), TxError> {
    if signatures.len() != tx.input.len() {
        return Err(TxError::SignatureCountMismatch {
            expected: tx.input.len(),
            actual: signatures.len(),
        });
    }
    for (index, signature) in signatures.iter().enumerate() {
        let contract = if index >= split { contract } else { None };
        tx.input[index].script_sig = build_signature_script(signature, public_key, None, contract)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::public_key_for;
    use bitcoin::script::Instruction;
    use bitcoin::{Network, OutPoint, TxOut, Txid};
    use std::str::FromStr;

    fn pushes(script: &Script) -> Vec<Vec<u8>> {
        script
            .instructions()
            .filter_map(|ins| match ins.unwrap() {
                Instruction::PushBytes(bytes) => Some(bytes.as_bytes().to_vec()),
                Instruction::Op(_) => None,
            })
            .collect()
    }

    fn funded_draft(public_key: &PublicKey) -> TxDraft {
        let script = ScriptBuf::new_p2pkh(&public_key.pubkey_hash());
        let mut draft = TxDraft::new();
        let txid =
            Txid::from_str("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b").unwrap();
        for vout in 0..2 {
            draft.add_input(
                OutPoint::new(txid, vout),
                TxOut {
                    value: 20_000,
                    script_pubkey: script.clone(),
                },
            );
        }
        draft.set_reference_script(script.clone());
        draft.add_output(30_000, script);
        draft
    }

    #[test]
    fn test_signature_script_layout() {
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public_key = public_key_for(&secret, Network::Bitcoin).unwrap();
        let signer = Signer::new(&secret, &public_key);
        let mut draft = funded_draft(&public_key);

        signer.sign(&mut draft, &SigningOptions::default()).unwrap();

        for input in &draft.transaction().input {
            let pushes = pushes(&input.script_sig);
            assert_eq!(pushes.len(), 2);
            assert_eq!(*pushes[0].last().unwrap(), 0x01);
            assert_eq!(pushes[1], public_key.to_bytes());
        }
    }

    #[test]
    fn test_extension_and_contract_order() {
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public_key = public_key_for(&secret, Network::Testnet).unwrap();
        let signature = Signer::new(&secret, &public_key)
            .sign_hash(&LegacySighash::all_zeros())
            .unwrap();
        let contract = ScriptBuf::from(vec![0x51]);
        let extension = |builder: Builder| -> Result<Builder, TxError> {
            Ok(builder.push_slice(push_bytes(b"secret")?))
        };

        let script = build_signature_script(
            &signature,
            &public_key,
            Some(&extension as &dyn ScriptExtension),
            Some(contract.as_script()),
        )
        .unwrap();
        let pushes = pushes(&script);
        assert_eq!(pushes.len(), 4);
        assert_eq!(pushes[1].len(), 65);
        assert_eq!(pushes[2], b"secret".to_vec());
        assert_eq!(pushes[3], vec![0x51]);
    }

    #[test]
    fn test_estimate_does_not_mutate() {
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public_key = public_key_for(&secret, Network::Bitcoin).unwrap();
        let signer = Signer::new(&secret, &public_key);
        let draft = funded_draft(&public_key);

        let size = signer.estimate_signed_size(&draft, &SigningOptions::default()).unwrap();
        assert!(size > draft.size());
        assert!(draft.transaction().input.iter().all(|input| input.script_sig.is_empty()));
    }

    #[test]
    fn test_inject_signature_count() {
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public_key = public_key_for(&secret, Network::Bitcoin).unwrap();
        let mut tx = funded_draft(&public_key).into_transaction();
        assert!(matches!(
            inject_signatures(&mut tx, &[], &public_key, None, 0),
            Err(TxError::SignatureCountMismatch { expected: 2, actual: 0 })
        ));
    }

    #[test]
    fn test_sign_without_inputs() {
        let secret = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let public_key = public_key_for(&secret, Network::Bitcoin).unwrap();
        let mut draft = TxDraft::new();
        assert!(matches!(
            Signer::new(&secret, &public_key).sign(&mut draft, &SigningOptions::default()),
            Err(TxError::Signing(_))
        ));
    }
}
