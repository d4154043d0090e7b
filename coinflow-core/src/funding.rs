//! UTXO funding
//!
//! Selects unspent outputs of a single address to pay for a draft. Only
//! outputs sharing one locking script are combined: the first UTXO reported
//! by the backend fixes the reference script, and every later UTXO with a
//! different script is skipped. Signing later commits every input to that
//! reference script, so mixing scripts would produce invalid signatures.
//!
//! [`FundingSelector::fund`] over-collects by `max_fee` so the fee can be
//! taken out of the change output after the signed size is known.

use bitcoin::{Script, ScriptBuf, TxOut};
use log::{debug, info};
use serde_json::json;

use crate::client::{ChainClient, ChainClientExt};
use crate::draft::TxDraft;
use crate::error::TxError;
use crate::keys::decode_address;
use crate::logging::{self, sanitize_for_logging, LogLevel};
use crate::types::{FeePolicy, Utxo, ALL_UTXOS};

/// Add `utxo` as an input of the draft if its locking script matches `reference`
///
/// An empty reference is set from the first UTXO seen. Returns whether the
/// UTXO was used.
pub(crate) fn accept_utxo(
    draft: &mut TxDraft,
    reference: &mut Option<ScriptBuf>,
    utxo: &Utxo,
) -> Result<bool, TxError> {
    let script = utxo.script_pubkey()?;
    if !matches_reference(reference.as_deref(), &script) {
        debug!(
            "skipping utxo {}:{} with foreign locking script",
            sanitize_for_logging(&utxo.tx_hash),
            utxo.output_index
        );
        return Ok(false);
    }

    let outpoint = utxo.outpoint()?;
    if reference.is_none() {
        *reference = Some(script.clone());
    }
    draft.add_input(
        outpoint,
        TxOut {
            value: utxo.amount,
            script_pubkey: script,
        },
    );
    Ok(true)
}

fn matches_reference(reference: Option<&Script>, script: &ScriptBuf) -> bool {
    reference.map_or(true, |reference| reference == script.as_script())
}

/// Accept every matching UTXO into the draft and record the reference script
fn accept_into_draft<'u>(
    draft: &mut TxDraft,
    utxos: impl IntoIterator<Item = &'u Utxo>,
    mut stop: impl FnMut(&Utxo) -> bool,
) -> Result<(), TxError> {
    let mut reference = draft.reference_script().map(ToOwned::to_owned);
    for utxo in utxos {
        if accept_utxo(draft, &mut reference, utxo)? && stop(utxo) {
            break;
        }
    }
    if let Some(script) = reference {
        draft.set_reference_script(script);
    }
    Ok(())
}

/// Funds drafts from the UTXOs of one address
pub struct FundingSelector<'a> {
    client: &'a dyn ChainClient,
    policy: FeePolicy,
}

impl<'a> FundingSelector<'a> {
    pub fn new(client: &'a dyn ChainClient, policy: FeePolicy) -> Self {
        Self { client, policy }
    }

    fn check_outputs(&self, draft: &TxDraft) -> Result<(), TxError> {
        for output in &draft.transaction().output {
            if self.policy.is_dust(output.value) {
                return Err(TxError::DustOutput {
                    amount: output.value,
                    minimum: self.policy.dust,
                });
            }
        }
        Ok(())
    }

    /// Fund the outputs of the draft plus `max_fee`, adding a change output
    ///
    /// Fails with `InsufficientBalance` before touching the draft when the
    /// address holds less than the outputs plus the fee ceiling, and with
    /// `MismatchedScripts` when enough value exists only under other scripts.
    pub async fn fund(&self, draft: &mut TxDraft, address: &str) -> Result<(), TxError> {
        self.check_outputs(draft)?;

        let required = draft.output_value();
        let utxos = self.client.get_utxos(address, ALL_UTXOS, 0).await?;
        let balance: u64 = utxos.iter().map(|utxo| utxo.amount).sum();
        let needed = required.saturating_add(self.policy.max_fee);

        logging::log_transaction(
            LogLevel::Info,
            "funding transaction",
            Some(json!({
                "address": sanitize_for_logging(address),
                "required": required,
                "balance": balance,
                "utxos": utxos.len(),
            })),
        );

        if balance < needed {
            return Err(TxError::InsufficientBalance {
                address: address.to_string(),
                required: needed,
                available: balance,
            });
        }

        let mut accumulator = i128::from(required);
        let threshold = -i128::from(self.policy.max_fee);
        let mut selected = 0u64;
        accept_into_draft(draft, &utxos, |utxo| {
            accumulator -= i128::from(utxo.amount);
            selected += utxo.amount;
            accumulator <= threshold
        })?;

        if accumulator > threshold {
            return Err(TxError::MismatchedScripts {
                address: address.to_string(),
                required: needed,
                selected,
            });
        }

        let change = u64::try_from(-accumulator).map_err(|_| TxError::InsufficientFunds {
            needed,
            available: selected,
        })?;
        let change_script = decode_address(address, self.client.network())?.script_pubkey();
        draft.add_output(change, change_script);
        info!(
            "funded {} sat with {} inputs, change {} sat",
            required,
            draft.input_count(),
            change
        );
        Ok(())
    }

    /// Spend every UTXO of the address carrying the reference script
    ///
    /// No change output is added; the caller's outputs absorb everything.
    pub async fn fund_all(&self, draft: &mut TxDraft, address: &str) -> Result<(), TxError> {
        self.check_outputs(draft)?;

        let utxos = self.client.get_utxos(address, ALL_UTXOS, 0).await?;
        accept_into_draft(draft, &utxos, |_| false)?;

        let (inputs, outputs) = (draft.input_value(), draft.output_value());
        if inputs < outputs || draft.input_count() == 0 {
            return Err(TxError::InsufficientFunds {
                needed: outputs,
                available: inputs,
            });
        }
        info!(
            "swept {} inputs worth {} sat from {}",
            draft.input_count(),
            inputs,
            sanitize_for_logging(address)
        );
        Ok(())
    }

    /// Balance of the address at zero confirmations
    pub async fn balance(&self, address: &str) -> Result<u64, TxError> {
        Ok(self.client.balance(address, 0).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockChainClient;
    use bitcoin::Network;

    const ADDRESS: &str = "mfWxJ45yp2SFn7UciZyNpvDKrzbhyfKrY8";
    const TX_HASH: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

    fn own_script() -> String {
        hex::encode(
            decode_address(ADDRESS, Network::Testnet)
                .unwrap()
                .script_pubkey()
                .as_bytes(),
        )
    }

    fn utxo(index: u32, script: &str, amount: u64) -> Utxo {
        Utxo::new(TX_HASH, index, script, amount)
    }

    #[tokio::test]
    async fn test_fund_with_change() {
        let script = own_script();
        let client = MockChainClient::new(Network::Testnet)
            .with_utxo(ADDRESS, utxo(0, &script, 30_000))
            .with_utxo(ADDRESS, utxo(1, &script, 20_000))
            .with_utxo(ADDRESS, utxo(2, &script, 5_000));
        let selector = FundingSelector::new(&client, FeePolicy::default());

        let mut draft = TxDraft::new();
        draft.add_output(10_000, ScriptBuf::new());
        selector.fund(&mut draft, ADDRESS).await.unwrap();

        // 30k already covers 10k + max_fee, so the walk stops after one input
        assert_eq!(draft.input_count(), 1);
        assert_eq!(draft.transaction().output.len(), 2);
        assert_eq!(draft.transaction().output[1].value, 20_000);
        assert_eq!(draft.input_value(), draft.output_value());
    }

    #[tokio::test]
    async fn test_fund_skips_foreign_scripts() {
        let script = own_script();
        let foreign = "a914000000000000000000000000000000000000000087";
        let client = MockChainClient::new(Network::Testnet)
            .with_utxo(ADDRESS, utxo(0, &script, 8_000))
            .with_utxo(ADDRESS, utxo(1, foreign, 40_000))
            .with_utxo(ADDRESS, utxo(2, &script, 8_000));
        let selector = FundingSelector::new(&client, FeePolicy::default());

        let mut draft = TxDraft::new();
        draft.add_output(5_000, ScriptBuf::new());
        selector.fund(&mut draft, ADDRESS).await.unwrap();

        assert_eq!(draft.input_count(), 2);
        assert!(draft
            .spent_outputs()
            .iter()
            .all(|out| hex::encode(out.script_pubkey.as_bytes()) == script));
        assert_eq!(draft.transaction().output[1].value, 11_000);
    }

    #[tokio::test]
    async fn test_fund_mismatched_scripts() {
        let script = own_script();
        let foreign = "a914000000000000000000000000000000000000000087";
        let client = MockChainClient::new(Network::Testnet)
            .with_utxo(ADDRESS, utxo(0, &script, 2_000))
            .with_utxo(ADDRESS, utxo(1, foreign, 40_000));
        let selector = FundingSelector::new(&client, FeePolicy::default());

        let mut draft = TxDraft::new();
        draft.add_output(5_000, ScriptBuf::new());
        let err = selector.fund(&mut draft, ADDRESS).await.unwrap_err();
        assert!(matches!(err, TxError::MismatchedScripts { selected: 2_000, .. }));
    }

    #[tokio::test]
    async fn test_fund_insufficient_balance() {
        let client = MockChainClient::new(Network::Testnet).with_utxo(ADDRESS, utxo(0, &own_script(), 14_999));
        let selector = FundingSelector::new(&client, FeePolicy::default());

        let mut draft = TxDraft::new();
        draft.add_output(5_000, ScriptBuf::new());
        let err = selector.fund(&mut draft, ADDRESS).await.unwrap_err();
        assert!(matches!(
            err,
            TxError::InsufficientBalance { required: 15_000, available: 14_999, .. }
        ));
        assert_eq!(draft.input_count(), 0);
    }

    #[tokio::test]
    async fn test_fund_rejects_dust_output() {
        let client = MockChainClient::new(Network::Testnet).with_utxo(ADDRESS, utxo(0, &own_script(), 50_000));
        let selector = FundingSelector::new(&client, FeePolicy::default());

        let mut draft = TxDraft::new();
        draft.add_output(599, ScriptBuf::new());
        assert!(matches!(
            selector.fund(&mut draft, ADDRESS).await,
            Err(TxError::DustOutput { amount: 599, minimum: 600 })
        ));
    }

    #[tokio::test]
    async fn test_fund_all() {
        let script = own_script();
        let client = MockChainClient::new(Network::Testnet)
            .with_utxo(ADDRESS, utxo(0, &script, 3_000))
            .with_utxo(ADDRESS, utxo(1, &script, 4_000));
        let selector = FundingSelector::new(&client, FeePolicy::default());

        let mut draft = TxDraft::new();
        draft.add_output(7_000, ScriptBuf::new());
        selector.fund_all(&mut draft, ADDRESS).await.unwrap();
        assert_eq!(draft.input_count(), 2);
        assert_eq!(draft.transaction().output.len(), 1);

        let mut greedy = TxDraft::new();
        greedy.add_output(7_001, ScriptBuf::new());
        assert!(matches!(
            selector.fund_all(&mut greedy, ADDRESS).await,
            Err(TxError::InsufficientFunds { needed: 7_001, .. })
        ));
    }
}
