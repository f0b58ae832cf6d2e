//! Scripted stand-ins for a contract and for gateways.

use std::{collections::HashMap, fmt::Debug};

use async_trait::async_trait;
use ethers::{
    abi::AbiEncode,
    types::{transaction::eip2718::TypedTransaction, Address, BlockId, Bytes, NameOrAddress},
};
use parking_lot::Mutex;
use thiserror::Error;

use crate::{fetch::parse_response, CallPrimitive, FetchError, OffchainFetcher};

/// Failure of a [`MockContract`] call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MockCallError {
    /// The contract reverted with the given payload
    #[error("execution reverted: {0}")]
    Revert(Bytes),
    /// Anything that is not a call exception
    #[error("mock call failed: {0}")]
    Other(String),
}

/// Revert with an ABI encoded custom error.
pub fn revert<E: AbiEncode>(error: E) -> Result<Bytes, MockCallError> {
    Err(MockCallError::Revert(error.encode().into()))
}

type CallHandler = Box<dyn Fn(&[u8]) -> Result<Bytes, MockCallError> + Send + Sync>;

/// A contract at a fixed address whose behaviour is a closure over the
/// calldata. Every call is recorded.
pub struct MockContract {
    address: Address,
    names: HashMap<String, Address>,
    handler: CallHandler,
    calls: Mutex<Vec<Bytes>>,
    resolutions: Mutex<Vec<NameOrAddress>>,
}

impl Debug for MockContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockContract")
            .field("address", &self.address)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl MockContract {
    /// Deploy a mock at `address`.
    pub fn new(
        address: Address,
        handler: impl Fn(&[u8]) -> Result<Bytes, MockCallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            address,
            names: HashMap::new(),
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            resolutions: Mutex::new(Vec::new()),
        }
    }

    /// Make `name` resolve to `address`.
    pub fn with_name(mut self, name: &str, address: Address) -> Self {
        self.names.insert(name.to_owned(), address);
        self
    }

    /// Calldata of every call made so far, oldest first.
    pub fn calls(&self) -> Vec<Bytes> {
        self.calls.lock().clone()
    }

    /// Every target passed to `resolve_address`, oldest first.
    pub fn resolutions(&self) -> Vec<NameOrAddress> {
        self.resolutions.lock().clone()
    }

    /// Calldata of every call that started with `selector`.
    pub fn calls_to(&self, selector: [u8; 4]) -> Vec<Bytes> {
        self.calls
            .lock()
            .iter()
            .filter(|data| data.starts_with(&selector))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CallPrimitive for MockContract {
    type Error = MockCallError;

    async fn call(
        &self,
        tx: &TypedTransaction,
        _block: Option<BlockId>,
    ) -> Result<Bytes, Self::Error> {
        let data = tx.data().cloned().unwrap_or_default();
        self.calls.lock().push(data.clone());
        match tx.to() {
            Some(NameOrAddress::Address(to)) if *to == self.address => (self.handler)(&data),
            other => Err(MockCallError::Other(format!("no contract at {other:?}"))),
        }
    }

    async fn resolve_address(&self, target: &NameOrAddress) -> Result<Address, Self::Error> {
        self.resolutions.lock().push(target.clone());
        match target {
            NameOrAddress::Address(address) => Ok(*address),
            NameOrAddress::Name(name) => self
                .names
                .get(name)
                .copied()
                .ok_or_else(|| MockCallError::Other(format!("unknown name {name}"))),
        }
    }

    fn revert_data(&self, error: &Self::Error) -> Option<Bytes> {
        match error {
            MockCallError::Revert(data) => Some(data.clone()),
            MockCallError::Other(_) => None,
        }
    }
}

/// A fetch made against a [`MockFetcher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedFetch {
    /// URL template as found in the lookup
    pub url: String,
    /// Sender passed along
    pub sender: Address,
    /// Request data passed along
    pub call_data: Bytes,
}

/// Gateways keyed by URL template. Registered bodies go through the real
/// response parser; unknown URLs behave like a gateway that sent no body.
#[derive(Debug, Default)]
pub struct MockFetcher {
    bodies: HashMap<String, String>,
    raw: HashMap<String, Bytes>,
    fetches: Mutex<Vec<RecordedFetch>>,
}

impl MockFetcher {
    /// Serve `{"data": "0x<data>"}` at `url`.
    pub fn with_answer(self, url: &str, data: impl AsRef<[u8]>) -> Self {
        let body = format!(r#"{{"data":"0x{}"}}"#, hex::encode(data));
        self.with_body(url, &body)
    }

    /// Serve a raw body at `url`.
    pub fn with_body(mut self, url: &str, body: &str) -> Self {
        self.bodies.insert(url.to_owned(), body.to_owned());
        self
    }

    /// Return `data` from `url` as is, skipping the response parser.
    pub fn with_raw(mut self, url: &str, data: impl Into<Bytes>) -> Self {
        self.raw.insert(url.to_owned(), data.into());
        self
    }

    /// Every fetch made so far, oldest first.
    pub fn fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.lock().clone()
    }

    /// URL templates fetched so far, oldest first.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetches.lock().iter().map(|f| f.url.clone()).collect()
    }
}

#[async_trait]
impl OffchainFetcher for MockFetcher {
    async fn fetch(
        &self,
        url_template: &str,
        sender: Address,
        call_data: &Bytes,
    ) -> Result<Bytes, FetchError> {
        self.fetches.lock().push(RecordedFetch {
            url: url_template.to_owned(),
            sender,
            call_data: call_data.clone(),
        });
        if let Some(data) = self.raw.get(url_template) {
            return Ok(data.clone());
        }
        let body = self
            .bodies
            .get(url_template)
            .map(String::as_bytes)
            .unwrap_or_default();
        parse_response(body)
    }
}
