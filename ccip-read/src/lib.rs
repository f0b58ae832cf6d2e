//! Client side of [ERC-3668](https://eips.ethereum.org/EIPS/eip-3668)
//! "CCIP-Read".
//!
//! A contract may answer an `eth_call` by reverting with
//! `OffchainLookup`, asking the caller to fetch data from a gateway and hand
//! it to a callback on the contract. [`CcipReadRunner`] performs that cycle,
//! possibly several times and across several gateways, until the contract
//! returns a result or the attempt budget is used up.
//!
//! [`middleware::CcipReadMiddleware`] plugs the runner into an ethers-rs
//! middleware stack.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use error::*;
pub use fetch::{HttpFetcher, OffchainRequest, OffchainRequestBody};
pub use runner::{CcipReadRequest, CcipReadRunner, LookupState, DEFAULT_MAX_ATTEMPTS};
pub use settings::{load_settings, CcipReadConf};
pub use signal::{OffchainLookup, OffchainTryNext, Outcome, UNANSWERED};
pub use traits::*;

mod error;
pub mod fetch;
pub mod middleware;
mod runner;
pub mod settings;
pub mod signal;
mod traits;

/// Mocks for testing code built on the runner.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
