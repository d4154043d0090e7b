//! Broadcast and confirmation polling
//!
//! A signed transaction moves through these states:
//!
//! ```text
//! Built -> Broadcasting -> Polling -> Confirmed
//!                 ^            |
//!                 +------------+  (attempts exhausted: broadcast again)
//!
//! any state -> Cancelled  (token cancelled)
//! any state -> Failed     (broadcast rejected)
//! ```
//!
//! The post-condition is checked once per interval. When every attempt of a
//! round comes back false the transaction is broadcast again, since it may
//! have been evicted from the mempool. Only the cancellation token ends an
//! unconfirmed submission.

use async_trait::async_trait;
use bitcoin::{Transaction, Txid};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::ChainClient;
use crate::error::TxError;
use crate::hooks::PostCondition;
use crate::logging::{self, sanitize_for_logging, LogLevel};

/// Default pause between post-condition checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of checks before broadcasting again
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

/// Source of delays between polls
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Timer backed by the tokio clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timer that returns immediately, for tests
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantTimer;

#[async_trait]
impl Timer for InstantTimer {
    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}

/// Poll cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Result<Self, TxError> {
        let config = Self { interval, max_attempts };
        config.validate()?;
        Ok(config)
    }

    /// Every round must wait at least once before broadcasting again
    pub fn validate(&self) -> Result<(), TxError> {
        if self.interval.is_zero() {
            return Err(TxError::Config("poll interval must be greater than 0".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(TxError::Config("poll attempts must be greater than 0".to_string()));
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Lifecycle of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionState {
    Built,
    Broadcasting,
    Polling,
    Confirmed,
    Cancelled,
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Confirmed | SubmissionState::Cancelled | SubmissionState::Failed
        )
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionState::Built => "built",
            SubmissionState::Broadcasting => "broadcasting",
            SubmissionState::Polling => "polling",
            SubmissionState::Confirmed => "confirmed",
            SubmissionState::Cancelled => "cancelled",
            SubmissionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Drives one signed transaction to confirmation
pub struct Submitter {
    client: Arc<dyn ChainClient>,
    timer: Arc<dyn Timer>,
    config: PollConfig,
    state: Mutex<SubmissionState>,
    broadcasts: Mutex<u32>,
}

impl Submitter {
    pub fn new(client: Arc<dyn ChainClient>, timer: Arc<dyn Timer>, config: PollConfig) -> Result<Self, TxError> {
        config.validate()?;
        Ok(Self {
            client,
            timer,
            config,
            state: Mutex::new(SubmissionState::Built),
            broadcasts: Mutex::new(0),
        })
    }

    pub fn state(&self) -> SubmissionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of broadcasts made so far
    pub fn broadcasts(&self) -> u32 {
        *self.broadcasts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, txid: &Txid, next: SubmissionState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("submission {} {} -> {}", sanitize_for_logging(&txid.to_string()), *state, next);
        *state = next;
    }

    fn cancelled(&self, txid: &Txid) -> TxError {
        self.transition(txid, SubmissionState::Cancelled);
        warn!("submission of {} cancelled before confirmation", txid);
        TxError::PostConditionFailed(format!("cancelled before {} was confirmed", txid))
    }

    /// Broadcast `tx` and poll `post_condition` until it holds
    ///
    /// A missing post-condition succeeds right after the first broadcast.
    /// Cancellation at any await point fails with `PostConditionFailed`.
    pub async fn submit_and_confirm(
        &self,
        tx: &Transaction,
        post_condition: Option<&dyn PostCondition>,
        cancel: &CancellationToken,
    ) -> Result<Txid, TxError> {
        let txid = tx.txid();

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&txid));
            }

            self.transition(&txid, SubmissionState::Broadcasting);
            let published = tokio::select! {
                result = self.client.publish_transaction(tx) => result,
                _ = cancel.cancelled() => return Err(self.cancelled(&txid)),
            };
            if let Err(e) = published {
                self.transition(&txid, SubmissionState::Failed);
                logging::log_submission(
                    LogLevel::Error,
                    "broadcast failed",
                    Some(json!({ "txid": sanitize_for_logging(&txid.to_string()), "error": e.to_string() })),
                );
                return Err(e.into());
            }
            let round = {
                let mut broadcasts = self.broadcasts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                *broadcasts += 1;
                *broadcasts
            };
            logging::log_submission(
                LogLevel::Info,
                "broadcast transaction",
                Some(json!({ "txid": sanitize_for_logging(&txid.to_string()), "round": round })),
            );

            self.transition(&txid, SubmissionState::Polling);
            for attempt in 1..=self.config.max_attempts {
                let satisfied = match post_condition {
                    None => true,
                    Some(condition) => tokio::select! {
                        ok = condition.check(tx) => ok,
                        _ = cancel.cancelled() => return Err(self.cancelled(&txid)),
                    },
                };
                if satisfied {
                    self.transition(&txid, SubmissionState::Confirmed);
                    info!("transaction {} confirmed after {} checks", txid, attempt);
                    return Ok(txid);
                }
                debug!("post-condition for {} not met (attempt {})", txid, attempt);

                tokio::select! {
                    _ = self.timer.sleep(self.config.interval) => {}
                    _ = cancel.cancelled() => return Err(self.cancelled(&txid)),
                }
            }

            warn!(
                "post-condition for {} not met after {} checks, broadcasting again",
                txid, self.config.max_attempts
            );
        }
    }
}
