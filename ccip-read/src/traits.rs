use std::{error::Error as StdError, fmt::Debug};

use async_trait::async_trait;
use auto_impl::auto_impl;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockId, Bytes, NameOrAddress,
};

use crate::FetchError;

/// The read-only call the resolution loop is built on top of.
///
/// Implementors must not perform any off-chain lookup handling of their own;
/// the runner owns that.
#[async_trait]
pub trait CallPrimitive: Send + Sync + Debug {
    /// Error returned by [`CallPrimitive::call`] and
    /// [`CallPrimitive::resolve_address`].
    type Error: StdError + Send + Sync + 'static;

    /// Execute `tx` as a call against `block` and return the raw return data.
    async fn call(&self, tx: &TypedTransaction, block: Option<BlockId>)
        -> Result<Bytes, Self::Error>;

    /// Resolve a call target to the canonical address it points at.
    async fn resolve_address(&self, target: &NameOrAddress) -> Result<Address, Self::Error>;

    /// The revert payload carried by `error`, if `error` is a call exception
    /// that has one.
    fn revert_data(&self, error: &Self::Error) -> Option<Bytes>;
}

/// Fetches the answer for an off-chain lookup from one gateway URL.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait OffchainFetcher: Send + Sync + Debug {
    /// Query `url_template` on behalf of `sender` with the lookup's
    /// `call_data` and return the decoded `data` field of the response.
    async fn fetch(
        &self,
        url_template: &str,
        sender: Address,
        call_data: &Bytes,
    ) -> Result<Bytes, FetchError>;
}
