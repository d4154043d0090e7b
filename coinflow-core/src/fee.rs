//! Fee estimation for transactions
//!
//! Estimation has two phases:
//!
//! 1. Resolve a **rate** (satoshis per byte) for the requested speed tier from
//!    a [`FeeOracle`]. Any oracle failure degrades to the policy's fallback
//!    rate instead of failing the transaction.
//! 2. Multiply the **size** of a dry-run signed copy of the transaction by that
//!    rate. Signature scripts vary in length with the DER encoding of each
//!    signature, so the size is measured rather than predicted.
//!
//! The product is clamped with [`clamp_fee`] and taken out of the last output
//! with [`apply_fee`].

use async_trait::async_trait;
use log::warn;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::draft::TxDraft;
use crate::error::TxError;
use crate::logging::{self, LogLevel};
use crate::types::{FeePolicy, TxExecutionSpeed};

/// Errors raised while querying a fee oracle
#[derive(Debug, Error)]
pub enum FeeOracleError {
    #[error("Fee oracle unreachable: {0}")]
    Network(String),

    #[error("Fee oracle returned malformed data: {0}")]
    Parse(String),

    #[error("Fee oracle returned an invalid rate: {0}")]
    InvalidRate(String),
}

/// Market fee rates in sat/byte for each speed tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRates {
    pub slow: Decimal,
    pub standard: Decimal,
    pub fast: Decimal,
}

impl FeeRates {
    pub fn new(slow: Decimal, standard: Decimal, fast: Decimal) -> Self {
        Self { slow, standard, fast }
    }

    /// Rate for a speed tier
    pub fn for_speed(&self, speed: TxExecutionSpeed) -> Decimal {
        match speed {
            TxExecutionSpeed::Slow => self.slow,
            TxExecutionSpeed::Standard => self.standard,
            TxExecutionSpeed::Fast => self.fast,
        }
    }

    /// Reject zero, negative or unordered rates
    pub fn validate(&self) -> Result<(), FeeOracleError> {
        if self.slow <= Decimal::ZERO || self.standard <= Decimal::ZERO || self.fast <= Decimal::ZERO {
            return Err(FeeOracleError::InvalidRate(format!(
                "rates must be positive: {}/{}/{}",
                self.slow, self.standard, self.fast
            )));
        }
        if self.slow > self.fast {
            return Err(FeeOracleError::InvalidRate(format!(
                "slow rate {} exceeds fast rate {}",
                self.slow, self.fast
            )));
        }
        Ok(())
    }
}

/// Source of market fee rates
#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn fee_rates(&self) -> Result<FeeRates, FeeOracleError>;
}

/// Oracle returning fixed rates, or always failing when built with `unreachable`
#[derive(Debug, Clone)]
pub struct StaticFeeOracle {
    rates: Option<FeeRates>,
}

impl StaticFeeOracle {
    pub fn new(rates: FeeRates) -> Self {
        Self { rates: Some(rates) }
    }

    /// Same rate for every tier
    pub fn flat(rate: Decimal) -> Self {
        Self::new(FeeRates::new(rate, rate, rate))
    }

    pub fn unreachable() -> Self {
        Self { rates: None }
    }
}

impl Default for StaticFeeOracle {
    fn default() -> Self {
        Self::new(FeeRates::new(dec!(5), dec!(10), dec!(20)))
    }
}

#[async_trait]
impl FeeOracle for StaticFeeOracle {
    async fn fee_rates(&self) -> Result<FeeRates, FeeOracleError> {
        self.rates
            .ok_or_else(|| FeeOracleError::Network("static oracle has no rates".to_string()))
    }
}

/// Resolve the fee rate for a speed tier, falling back on any oracle failure
pub async fn resolve_fee_rate(
    oracle: Option<&dyn FeeOracle>,
    speed: TxExecutionSpeed,
    policy: &FeePolicy,
) -> Decimal {
    let fallback = Decimal::from(policy.fallback_rate);
    let Some(oracle) = oracle else {
        return fallback;
    };

    match oracle.fee_rates().await.and_then(|rates| rates.validate().map(|_| rates)) {
        Ok(rates) => rates.for_speed(speed),
        Err(e) => {
            warn!("Fee oracle failed ({}), using fallback rate {} sat/byte", e, fallback);
            fallback
        }
    }
}

/// Total fee for a given size, rounded up to the next satoshi
pub fn calculate_total_fee(fee_rate: Decimal, tx_size: usize) -> u64 {
    (fee_rate * Decimal::from(tx_size)).ceil().to_u64().unwrap_or(u64::MAX)
}

/// Apply the fee ceiling
///
/// A fee above `max_fee - dust` is forced to exactly `max_fee`.
pub fn clamp_fee(fee: u64, policy: &FeePolicy) -> u64 {
    if fee > policy.max_fee.saturating_sub(policy.dust) {
        policy.max_fee
    } else {
        fee
    }
}

/// Size-based fee for a signed transaction of `signed_size` bytes
pub fn estimate_fee(signed_size: usize, rate: Decimal, policy: &FeePolicy) -> u64 {
    let fee = clamp_fee(calculate_total_fee(rate, signed_size), policy);
    logging::log_transaction(
        LogLevel::Debug,
        "estimated fee",
        Some(json!({ "size": signed_size, "rate": rate.to_string(), "fee": fee })),
    );
    fee
}

/// Subtract the fee from the last output of the draft
///
/// Fails with `DustOutput` when the remainder would fall below the dust
/// threshold, and `InsufficientFunds` when there is no output to pay from.
pub fn apply_fee(draft: &mut TxDraft, fee: u64, policy: &FeePolicy) -> Result<(), TxError> {
    let last = draft
        .transaction_mut()
        .output
        .last_mut()
        .ok_or(TxError::InsufficientFunds {
            needed: fee,
            available: 0,
        })?;

    let remaining = last.value.saturating_sub(fee);
    if last.value < fee || policy.is_dust(remaining) {
        return Err(TxError::DustOutput {
            amount: remaining,
            minimum: policy.dust,
        });
    }
    last.value = remaining;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;

    #[test]
    fn test_calculate_total_fee() {
        assert_eq!(calculate_total_fee(dec!(30), 226), 6_780);
        assert_eq!(calculate_total_fee(dec!(1.1), 150), 165);
        assert_eq!(calculate_total_fee(dec!(0.5), 3), 2);
        assert_eq!(calculate_total_fee(dec!(0), 300), 0);
    }

    #[test]
    fn test_clamp_threshold() {
        let policy = FeePolicy::default();
        // At the threshold the fee is kept
        assert_eq!(clamp_fee(9_400, &policy), 9_400);
        // Just above it jumps straight to the ceiling
        assert_eq!(clamp_fee(9_401, &policy), 10_000);
        assert_eq!(clamp_fee(250_000, &policy), 10_000);
        assert_eq!(clamp_fee(0, &policy), 0);
    }

    #[test]
    fn test_apply_fee_to_last_output() {
        let policy = FeePolicy::default();
        let mut draft = TxDraft::new();
        draft.add_output(10_000, ScriptBuf::new());
        draft.add_output(40_000, ScriptBuf::new());

        apply_fee(&mut draft, 6_780, &policy).unwrap();
        assert_eq!(draft.transaction().output[0].value, 10_000);
        assert_eq!(draft.transaction().output[1].value, 33_220);
    }

    #[test]
    fn test_apply_fee_rejects_dust_remainder() {
        let policy = FeePolicy::default();
        let mut draft = TxDraft::new();
        draft.add_output(10_000, ScriptBuf::new());

        let err = apply_fee(&mut draft, 9_500, &policy).unwrap_err();
        assert!(matches!(err, TxError::DustOutput { amount: 500, minimum: 600 }));
        // Output left untouched
        assert_eq!(draft.transaction().output[0].value, 10_000);

        assert!(matches!(
            apply_fee(&mut draft, 12_000, &policy),
            Err(TxError::DustOutput { amount: 0, .. })
        ));
        assert!(matches!(
            apply_fee(&mut TxDraft::new(), 100, &policy),
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_fee_rate() {
        let policy = FeePolicy::default();
        let oracle = StaticFeeOracle::default();

        assert_eq!(resolve_fee_rate(Some(&oracle), TxExecutionSpeed::Slow, &policy).await, dec!(5));
        assert_eq!(resolve_fee_rate(Some(&oracle), TxExecutionSpeed::Fast, &policy).await, dec!(20));
        assert_eq!(
            resolve_fee_rate(Some(&StaticFeeOracle::unreachable()), TxExecutionSpeed::Fast, &policy).await,
            dec!(30)
        );
        assert_eq!(resolve_fee_rate(None, TxExecutionSpeed::Standard, &policy).await, dec!(30));

        let invalid = StaticFeeOracle::flat(dec!(0));
        assert_eq!(resolve_fee_rate(Some(&invalid), TxExecutionSpeed::Standard, &policy).await, dec!(30));
    }
}
