//! Fee oracle for mempool.space style `/v1/fees/recommended` endpoints

use anyhow::Result;
use async_trait::async_trait;
use coinflow_core::{Config, FeeOracle, FeeOracleError, FeeRates};
use log::debug;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::http::{build_client, get_text};

/// Public mempool.space endpoint
pub const DEFAULT_ORACLE_URL: &str = "https://mempool.space/api/v1/fees/recommended";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    fastest_fee: Decimal,
    half_hour_fee: Decimal,
    hour_fee: Decimal,
}

/// Parse a recommended fees body into speed tier rates
///
/// The hour estimate is the slow tier, the half hour estimate the standard
/// tier and the fastest estimate the fast tier.
pub fn parse_rates(body: &str) -> Result<FeeRates, FeeOracleError> {
    let fees: RecommendedFees =
        serde_json::from_str(body).map_err(|e| FeeOracleError::Parse(e.to_string()))?;
    let rates = FeeRates::new(fees.hour_fee, fees.half_hour_fee, fees.fastest_fee);
    rates.validate()?;
    Ok(rates)
}

/// Oracle querying a recommended fees endpoint over HTTP
pub struct RecommendedFeeOracle {
    url: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl RecommendedFeeOracle {
    pub fn new(url: &str, timeout: Duration, max_retries: u32) -> Result<Self, FeeOracleError> {
        let http = build_client(timeout).map_err(|e| FeeOracleError::Network(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            max_retries,
            http,
        })
    }

    /// Oracle configured from the `[oracle]` section
    pub fn from_config(config: &Config) -> Result<Self> {
        let oracle = Self::new(
            &config.oracle.url,
            Duration::from_secs(config.oracle.timeout_secs),
            config.backend.max_retries,
        )?;
        Ok(oracle)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeeOracle for RecommendedFeeOracle {
    async fn fee_rates(&self) -> Result<FeeRates, FeeOracleError> {
        let body = get_text(&self.http, &self.url, self.max_retries)
            .await
            .map_err(|e| FeeOracleError::Network(e.to_string()))?;
        let rates = parse_rates(&body)?;
        debug!(
            "fee rates from {}: slow {} standard {} fast {}",
            self.url, rates.slow, rates.standard, rates.fast
        );
        Ok(rates)
    }
}
