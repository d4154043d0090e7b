use std::sync::{Arc, Once};

use bitcoin::hashes::Hash;
use bitcoin::script::Instruction;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::{Script, TxOut};
use coinflow_core::client::MockChainClient;
use coinflow_core::draft::TxDraft;
use coinflow_core::keys::{decode_address, public_key_for, public_key_to_address, slave_address, slave_script};
use coinflow_core::signer::{Signer, SigningOptions};
use coinflow_core::verifier;
use coinflow_core::{FeePolicy, Network, TxBuilder, TxError, Utxo};

// Static initialization for test module
static INIT_LOGGER: Once = Once::new();

fn setup() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

const DESTINATION: &str = "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8";
const TX_HASH: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
const NONCE: [u8; 32] = [0x5a; 32];

struct Fixture {
    client: Arc<MockChainClient>,
    secret: SecretKey,
    public_key: bitcoin::secp256k1::PublicKey,
    pubkey_hash: [u8; 20],
}

fn fixture() -> Fixture {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x33; 32]).unwrap();
    let public_key = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret);
    let serialized = public_key_for(&secret, Network::Testnet).unwrap();
    Fixture {
        client: Arc::new(MockChainClient::new(Network::Testnet)),
        secret,
        public_key,
        pubkey_hash: serialized.pubkey_hash().to_byte_array(),
    }
}

fn sign_all(fixture: &Fixture, hashes: &[bitcoin::sighash::LegacySighash]) -> Vec<bitcoin::secp256k1::ecdsa::Signature> {
    let secp = Secp256k1::new();
    hashes
        .iter()
        .map(|hash| {
            let message = Message::from_slice(&hash.to_byte_array()).unwrap();
            secp.sign_ecdsa(&message, &fixture.secret)
        })
        .collect()
}

fn pushes(script: &Script) -> Vec<Vec<u8>> {
    script
        .instructions()
        .filter_map(|ins| match ins.unwrap() {
            Instruction::PushBytes(bytes) => Some(bytes.as_bytes().to_vec()),
            Instruction::Op(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_sign_outside_and_submit() {
    setup();

    let fixture = fixture();
    let address = public_key_to_address(&public_key_for(&fixture.secret, Network::Testnet).unwrap(), Network::Testnet);
    let script = hex::encode(address.script_pubkey().as_bytes());
    for (vout, amount) in [(0, 25_000), (1, 25_000), (2, 99_000)] {
        fixture
            .client
            .add_utxo(&address.to_string(), Utxo::new(TX_HASH, vout, script.clone(), amount));
    }

    let builder = TxBuilder::new(fixture.client.clone(), FeePolicy::default())
        .with_fee(2_000)
        .unwrap();
    let mut built = builder
        .build_from_chain(&fixture.public_key, DESTINATION, None, 30_000, 2, 0)
        .await
        .unwrap();

    // Only the two requested outputs are spent
    assert_eq!(built.transaction().input.len(), 2);
    assert_eq!(built.hashes().len(), 2);
    assert_eq!(built.split(), 2);
    assert_eq!(built.transaction().output[0].value, 30_000);
    assert_eq!(built.transaction().output[1].value, 50_000 - 30_000 - 2_000);

    // Unsigned inputs do not verify
    assert!(built.verify().is_err());

    let signatures = sign_all(&fixture, built.hashes());
    assert!(matches!(
        built.inject_sigs(&signatures[..1]),
        Err(TxError::SignatureCountMismatch { expected: 2, actual: 1 })
    ));
    built.inject_sigs(&signatures).unwrap();
    built.verify().unwrap();

    let txid = built.submit().await.unwrap();
    assert_eq!(fixture.client.published()[0].txid(), txid);
}

#[tokio::test]
async fn test_mixed_primary_and_contract_inputs() {
    setup();

    let fixture = fixture();
    let serialized = public_key_for(&fixture.secret, Network::Testnet).unwrap();
    let address = public_key_to_address(&serialized, Network::Testnet);
    fixture.client.add_utxo(
        &address.to_string(),
        Utxo::new(TX_HASH, 0, hex::encode(address.script_pubkey().as_bytes()), 12_000),
    );

    let contract = slave_script(&fixture.pubkey_hash, &NONCE).unwrap();
    let contract_address = slave_address(&fixture.pubkey_hash, &NONCE, Network::Testnet).unwrap();
    fixture.client.add_utxo(
        &contract_address.to_string(),
        Utxo::new(TX_HASH, 3, hex::encode(contract_address.script_pubkey().as_bytes()), 18_000),
    );

    let builder = TxBuilder::new(fixture.client.clone(), FeePolicy::default())
        .with_fee(1_500)
        .unwrap();
    let mut built = builder
        .build_from_chain(&fixture.public_key, DESTINATION, Some(contract.as_script()), 20_000, 1, 1)
        .await
        .unwrap();

    assert_eq!(built.split(), 1);
    assert_eq!(built.transaction().input.len(), 2);
    assert_ne!(built.hashes()[0], built.hashes()[1]);

    let signatures = sign_all(&fixture, built.hashes());
    built.inject_sigs(&signatures).unwrap();
    built.verify().unwrap();

    let tx = built.transaction();
    assert_eq!(tx.output[0].value, 20_000);
    assert_eq!(tx.output[1].value, 30_000 - 20_000 - 1_500);
}

#[tokio::test]
async fn test_missing_chain_utxos() {
    setup();

    let fixture = fixture();
    let builder = TxBuilder::new(fixture.client.clone(), FeePolicy::default());

    let err = builder
        .build_from_chain(&fixture.public_key, DESTINATION, None, 1_000, 3, 0)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TxError::UtxoCountMismatch { expected: 3, actual: 0 }));
}

#[test]
fn test_external_and_local_signing_agree() {
    setup();

    let fixture = fixture();
    let serialized = public_key_for(&fixture.secret, Network::Testnet).unwrap();
    let address = public_key_to_address(&serialized, Network::Testnet);
    let contract = slave_script(&fixture.pubkey_hash, &NONCE).unwrap();
    let contract_address = slave_address(&fixture.pubkey_hash, &NONCE, Network::Testnet).unwrap();

    let primary = vec![
        Utxo::new(TX_HASH, 0, hex::encode(address.script_pubkey().as_bytes()), 12_000),
        Utxo::new(TX_HASH, 1, hex::encode(address.script_pubkey().as_bytes()), 7_000),
    ];
    let contract_utxos = vec![Utxo::new(
        TX_HASH,
        3,
        hex::encode(contract_address.script_pubkey().as_bytes()),
        18_000,
    )];

    // Signed outside the engine
    let builder = TxBuilder::new(fixture.client.clone(), FeePolicy::default())
        .with_fee(1_500)
        .unwrap();
    let mut built = builder
        .build(&fixture.public_key, DESTINATION, Some(contract.as_script()), 20_000, &primary, &contract_utxos)
        .unwrap();
    let signatures = sign_all(&fixture, built.hashes());
    built.inject_sigs(&signatures).unwrap();
    built.verify().unwrap();

    // Same inputs and outputs signed locally
    let mut draft = TxDraft::new();
    for utxo in primary.iter().chain(&contract_utxos) {
        draft.add_input(
            utxo.outpoint().unwrap(),
            TxOut {
                value: utxo.amount,
                script_pubkey: utxo.script_pubkey().unwrap(),
            },
        );
    }
    draft.add_output(20_000, decode_address(DESTINATION, Network::Testnet).unwrap().script_pubkey());
    draft.add_output(37_000 - 20_000 - 1_500, address.script_pubkey());
    let options = SigningOptions {
        contract: Some(contract.as_script()),
        contract_from: built.split(),
        ..Default::default()
    };
    Signer::new(&fixture.secret, &serialized).sign(&mut draft, &options).unwrap();
    verifier::verify(&draft).unwrap();

    let external = built.transaction();
    let local = draft.transaction();
    assert_eq!(built.split(), 2);
    assert_eq!(external.output, local.output);
    assert_eq!(external.input.len(), local.input.len());

    for (index, (theirs, ours)) in external.input.iter().zip(&local.input).enumerate() {
        let theirs = pushes(&theirs.script_sig);
        let ours = pushes(&ours.script_sig);
        assert_eq!(theirs.len(), ours.len(), "push count of input {}", index);
        assert_eq!(theirs[1], serialized.to_bytes());
        assert_eq!(theirs[1], ours[1]);
        if index >= built.split() {
            assert_eq!(theirs.len(), 3);
            assert_eq!(theirs[2], contract.as_bytes());
            assert_eq!(theirs[2], ours[2]);
        } else {
            assert_eq!(theirs.len(), 2);
        }
    }

    // Deterministic signatures over identical digests
    assert_eq!(external, local);
}
