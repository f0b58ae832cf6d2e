//! An ethers-rs middleware layer which resolves `eth_call`s that revert with
//! `OffchainLookup`.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{JsonRpcError, MiddlewareError},
    types::transaction::eip2718::TypedTransaction,
};

use crate::{
    settings::CcipReadConf, CallPrimitive, CcipReadError, CcipReadRequest, CcipReadRunner,
    HttpFetcher, OffchainFetcher,
};

mod error;

/// Exposes any [`Middleware`] as a [`CallPrimitive`].
#[derive(Debug)]
pub struct MiddlewareCaller<M> {
    inner: Arc<M>,
}

impl<M> MiddlewareCaller<M> {
    /// Wrap `inner`.
    pub fn new(inner: Arc<M>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M> CallPrimitive for MiddlewareCaller<M>
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    type Error = M::Error;

    async fn call(
        &self,
        tx: &TypedTransaction,
        block: Option<BlockId>,
    ) -> Result<Bytes, Self::Error> {
        self.inner.call(tx, block).await
    }

    async fn resolve_address(&self, target: &NameOrAddress) -> Result<Address, Self::Error> {
        match target {
            NameOrAddress::Address(address) => Ok(*address),
            NameOrAddress::Name(name) => self.inner.resolve_name(name).await,
        }
    }

    fn revert_data(&self, error: &Self::Error) -> Option<Bytes> {
        error
            .as_error_response()
            .and_then(JsonRpcError::as_revert_data)
    }
}

/// A middleware whose `call` follows ERC-3668 off-chain lookups. Every
/// other method is passed to the inner middleware.
#[derive(Debug)]
pub struct CcipReadMiddleware<M, F = HttpFetcher> {
    inner: Arc<M>,
    runner: CcipReadRunner<MiddlewareCaller<M>, F>,
    enabled: bool,
}

impl<M> CcipReadMiddleware<M> {
    /// Wrap `inner` using an HTTP fetcher built from `conf`.
    pub fn new(inner: Arc<M>, conf: &CcipReadConf) -> eyre::Result<Self> {
        conf.validate()?;
        Ok(Self::with_fetcher(inner, conf.build_fetcher()?, conf))
    }
}

impl<M, F> CcipReadMiddleware<M, F> {
    /// Wrap `inner`, fetching gateway responses with `fetcher`.
    pub fn with_fetcher(inner: Arc<M>, fetcher: F, conf: &CcipReadConf) -> Self {
        let caller = MiddlewareCaller::new(inner.clone());
        Self {
            inner,
            runner: CcipReadRunner::new(caller, fetcher, conf.max_attempts),
            enabled: conf.enabled,
        }
    }

    /// The runner behind [`Middleware::call`].
    pub fn runner(&self) -> &CcipReadRunner<MiddlewareCaller<M>, F> {
        &self.runner
    }

    /// Whether `call` follows off-chain lookups.
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl<M, F> Middleware for CcipReadMiddleware<M, F>
where
    M: Middleware + 'static,
    M::Error: 'static,
    F: OffchainFetcher + 'static,
{
    type Error = CcipReadError<M::Error>;
    type Provider = M::Provider;
    type Inner = M;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn call(
        &self,
        tx: &TypedTransaction,
        block: Option<BlockId>,
    ) -> Result<Bytes, Self::Error> {
        let request = CcipReadRequest::new(tx.clone(), block, self.enabled);
        self.runner.call(request).await
    }
}

#[cfg(test)]
mod tests {
    use ethers::{
        abi::AbiEncode,
        providers::{MockProvider, MockResponse},
    };
    use serde_json::json;

    use super::*;
    use crate::{
        signal::OffchainLookup,
        test_utils::MockFetcher,
    };

    fn target() -> Address {
        Address::repeat_byte(0x42)
    }

    fn revert_response(data: Vec<u8>) -> MockResponse {
        MockResponse::Error(JsonRpcError {
            code: 3,
            message: "execution reverted".to_owned(),
            data: Some(json!(format!("0x{}", hex::encode(data)))),
        })
    }

    fn middleware(
        enabled: bool,
    ) -> (CcipReadMiddleware<Provider<MockProvider>, MockFetcher>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        let conf = CcipReadConf {
            enabled,
            ..Default::default()
        };
        let middleware =
            CcipReadMiddleware::with_fetcher(Arc::new(provider), MockFetcher::default(), &conf);
        (middleware, mock)
    }

    fn tx() -> TypedTransaction {
        TransactionRequest::new()
            .to(target())
            .data(vec![1, 2, 3, 4])
            .into()
    }

    fn lookup() -> OffchainLookup {
        OffchainLookup {
            sender: target(),
            urls: vec![],
            call_data: Bytes::new(),
            callback_function: [0xde, 0xad, 0xbe, 0xef],
            extra_data: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn plain_call_passes_through() {
        let (middleware, mock) = middleware(true);
        mock.push::<Bytes, _>(Bytes::from(vec![9])).unwrap();

        let result = middleware.call(&tx(), None).await.unwrap();

        assert_eq!(result, Bytes::from(vec![9]));
    }

    #[tokio::test]
    async fn lookup_is_followed_to_the_callback() {
        let (middleware, mock) = middleware(true);
        // responses are served last in, first out
        mock.push::<Bytes, _>(Bytes::from(b"chonk".to_vec())).unwrap();
        mock.push_response(revert_response(lookup().encode()));

        let result = middleware.call(&tx(), None).await.unwrap();

        assert_eq!(result, Bytes::from(b"chonk".to_vec()));
        assert!(middleware.runner().fetcher().fetches().is_empty());
    }

    #[tokio::test]
    async fn disabled_middleware_returns_the_revert() {
        let (middleware, mock) = middleware(false);
        mock.push_response(revert_response(lookup().encode()));

        let err = middleware.call(&tx(), None).await.unwrap_err();

        let revert = err.as_error_response().and_then(JsonRpcError::as_revert_data);
        assert_eq!(revert, Some(Bytes::from(lookup().encode())));
    }

    #[tokio::test]
    async fn unrelated_revert_keeps_its_json_rpc_error() {
        let (middleware, mock) = middleware(true);
        mock.push_response(revert_response(vec![0x08, 0xc3, 0x79, 0xa0]));

        let err = middleware.call(&tx(), None).await.unwrap_err();

        assert!(err.as_inner().is_some());
        assert_eq!(err.as_error_response().map(|e| e.code), Some(3));
    }
}
