//! HTTP backends for coinflow
//!
//! - [`EsploraClient`]: a [`coinflow_core::ChainClient`] over the Esplora REST API
//! - [`RecommendedFeeOracle`]: a [`coinflow_core::FeeOracle`] over a
//!   recommended fees endpoint
//!
//! GET requests that fail with connection errors, timeouts, HTTP 429 or 5xx
//! are retried with exponential backoff. Broadcasts are never retried here;
//! the submitter in `coinflow-core` owns rebroadcasting.

mod http;

pub mod esplora;
pub mod fee_oracle;

pub use esplora::EsploraClient;
pub use fee_oracle::{parse_rates, RecommendedFeeOracle};
pub use http::{Backoff, BACKOFF_FACTOR, INITIAL_BACKOFF};
